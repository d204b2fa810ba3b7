//! Register maps and hooks for the supported chip families.
//!
//! Each family shows one addressing style: a flat SPI register file with
//! strobes ([`cc1101`]), an API-command radio split into sub-tables
//! ([`si446x`]) and a command-word I2C sensor with CRC-framed responses
//! ([`sgp30`]).

pub mod cc1101;
pub mod sgp30;
pub mod si446x;

pub use cc1101::Cc1101;
pub use sgp30::Sgp30;
pub use si446x::Si446x;
