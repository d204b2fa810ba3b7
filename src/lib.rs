//! Typed register maps, two-tier polling and config snapshots for SPI/I2C
//! radio and sensor chips.
//!
//! Each physical chip is a [`Device`]: one [`Transport`], one cached register
//! map and one mutex. A [`Scheduler`] drives every device on a fixed tick,
//! refreshing hot registers each tick and the whole map on a slower cadence,
//! while interrupt watchers and display readers share the same lock.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  tick   ┌──────────────────────────┐  read/write  ┌───────────┐
//! │ Scheduler  │────────▶│ Device<Chip>             │─────────────▶│ Transport │
//! │            │         │  ┌────────────────────┐  │              └───────────┘
//! └────────────┘         │  │ RegisterMap (cache)│  │
//! ┌────────────┐  edge   │  └────────────────────┘  │
//! │ Watcher    │────────▶│  Mutex                   │◀──── rows() / save()
//! └────────────┘         └──────────────────────────┘
//! ```
//!
//! - **Frequent tier** reads hot registers only, coalesced into bursts
//! - **Infrequent tier** reads every readable register
//! - **Writes** go straight to hardware and update the cache on success
//! - **Snapshots** hold every writeable register as hex and restore all-or-nothing
//!
//! # Example
//!
//! ```rust,no_run
//! use embedded_regwatch::prelude::*;
//!
//! # fn spi() -> Box<dyn Transport> { unimplemented!() }
//! let radio = std::sync::Arc::new(Device::new(Cc1101::new(), spi(), 0, 0).unwrap());
//! radio.reset().unwrap();
//!
//! let mut app = App::new(
//!     Scheduler::builder()
//!         .tick_period(std::time::Duration::from_millis(100))
//!         .infrequent_period(std::time::Duration::from_secs(1))
//!         .build(),
//! );
//! app.add_device(radio.clone());
//! app.start().unwrap();
//!
//! for row in radio.rows() {
//!     println!("{:#06x} {:<10} {}", row.address, row.name, row.value);
//! }
//! app.shutdown();
//! ```

#![deny(unsafe_code)]

pub mod access;
pub mod app;
pub mod builder;
pub mod chips;
pub mod config;
pub mod device;
pub mod error;
pub mod helpers;
pub mod interrupt;
pub mod receive;
pub mod register;
pub mod scheduler;
pub mod slice;
pub mod snapshot;
pub mod table;
pub mod transport;
pub mod value;

#[cfg(test)]
mod test_support;

pub use access::{Access, AccessPolicy};
pub use app::App;
pub use builder::SchedulerBuilder;
pub use chips::{Cc1101, Sgp30, Si446x};
pub use config::{ConvergenceConfig, MonitorConfig};
pub use device::{Chip, ConvergencePolicy, Device, DeviceView, Packet};
pub use error::{ConfigError, DecodeError, Error, Result, SchemaError, TableError, TransportError};
pub use interrupt::{ChannelEdgeSource, Edge, EdgeEvent, EdgeSource, InterruptWatcher, WatcherConfig};
pub use receive::{Decoder, ReceivePipeline, Received};
pub use register::{Register, Variable};
pub use scheduler::{Consumer, Monitored, NoConsumer, Scheduler};
pub use slice::{ROSlice, RWSlice};
pub use snapshot::{DeviceInfo, Snapshot};
pub use table::{
    DenseRegisterTable, RegisterMap, RegisterRow, RegisterTable, RegisterTableSet,
    SparseRegisterTable, VariableWidthRegisterTable,
};
pub use transport::Transport;
pub use value::{Address, Bytes, RegisterValue, Scalar};

pub mod prelude {
    pub use super::{
        Access, App, Bytes, Cc1101, Chip, Consumer, Device, DeviceView, Error, InterruptWatcher,
        Monitored, MonitorConfig, Register, RegisterMap, RegisterTable, RegisterTableSet, Result,
        Scheduler, SchedulerBuilder, Sgp30, Si446x, Snapshot, SparseRegisterTable, Transport,
        Variable,
    };
}
