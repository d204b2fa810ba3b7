//! Monitor example: one simulated CC1101 driven by the scheduler, with an
//! interrupt watcher draining packets on every GDO0 edge.
//!
//! Run with `RUST_LOG=debug cargo run --example monitor` to see the log.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use embedded_regwatch::{
    ChannelEdgeSource, DecodeError, Decoder, Edge, ReceivePipeline, TransportError, WatcherConfig,
    chips::cc1101::{self, Mode, marc},
    prelude::*,
};
use tracing_subscriber::EnvFilter;

// ============ Simulated radio ============
// 0x00-0x2E: configuration, 0x30-0x3D: status, 0x3F: RX FIFO.
// Empty writes are strobes.

const MARCSTATE: usize = 0x35;
const RSSI: usize = 0x34;
const RXBYTES: usize = 0x3B;

#[derive(Clone)]
struct SimRadio {
    regs: Arc<Mutex<[u8; 0x40]>>,
    air: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl Default for SimRadio {
    fn default() -> Self {
        Self {
            regs: Arc::new(Mutex::new([0u8; 0x40])),
            air: Arc::default(),
        }
    }
}

impl SimRadio {
    fn transmit(&self, payload: &[u8]) {
        let mut frame = vec![payload.len() as u8];
        frame.extend_from_slice(payload);
        let mut regs = self.regs.lock().unwrap();
        let mut air = self.air.lock().unwrap();
        air.push_back(frame);
        regs[RXBYTES] = air.front().map_or(0, |f| f.len() as u8);
        regs[RSSI] = regs[RSSI].wrapping_add(3);
    }
}

impl Transport for SimRadio {
    fn read(&mut self, address: u32, buf: &mut [u8]) -> core::result::Result<(), TransportError> {
        let mut regs = self.regs.lock().unwrap();
        if address == cc1101::FIFO {
            let mut air = self.air.lock().unwrap();
            let frame = air.pop_front().unwrap_or_default();
            buf.fill(0);
            let n = frame.len().min(buf.len());
            buf[..n].copy_from_slice(&frame[..n]);
            regs[RXBYTES] = air.front().map_or(0, |f| f.len() as u8);
            return Ok(());
        }
        let start = address as usize;
        let end = start + buf.len();
        if end > regs.len() {
            return Err(TransportError::Nack { address });
        }
        buf.copy_from_slice(&regs[start..end]);
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> core::result::Result<(), TransportError> {
        let mut regs = self.regs.lock().unwrap();
        if data.is_empty() {
            regs[MARCSTATE] = match address {
                cc1101::SRX => marc::RX,
                cc1101::STX => marc::TX,
                _ => marc::IDLE,
            };
            return Ok(());
        }
        let start = address as usize;
        regs[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

// ============ Protocol ============

/// Length-prefixed text frames.
struct TextFrames;

impl Decoder for TextFrames {
    type Message = String;

    fn decode(&mut self, raw: &[u8]) -> core::result::Result<String, DecodeError> {
        match raw.split_first() {
            Some((len, body)) if *len as usize == body.len() => String::from_utf8(body.to_vec())
                .map_err(|_| DecodeError::new("payload is not UTF-8", raw)),
            _ => Err(DecodeError::new("length prefix mismatch", raw)),
        }
    }
}

fn main() -> embedded_regwatch::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let sim = SimRadio::default();
    let radio = Arc::new(Device::new(Cc1101::new(), sim.clone(), 0, 0)?);
    radio.reset()?;
    radio.with_view(|view| view.write_register("PKTLEN", 0x3D))?;
    println!("entered RX: {}", radio.set_mode(Mode::Rx)?);

    // GDO0 asserts on sync word; the GPIO driver would hold `gdo0`.
    let (gdo0, source) = ChannelEdgeSource::channel(0, Edge::Falling);
    let mut pipeline = ReceivePipeline::new(TextFrames);
    let watcher = InterruptWatcher::spawn(
        source,
        Arc::clone(&radio),
        WatcherConfig::default(),
        move |_, radio| {
            pipeline.drain(radio, |msg| println!("received: {msg}"))?;
            Ok(())
        },
    )
    .map_err(|e| TransportError::io(0, e))?;

    let config = MonitorConfig {
        tick_ms: 20,
        infrequent_ms: 200,
        ..Default::default()
    };
    let mut app = App::from_config(&config);
    app.add_device(radio.clone());
    app.add_watcher(watcher);
    app.start().map_err(|e| TransportError::io(0, e))?;

    for payload in ["hello", "from", "the air"] {
        sim.transmit(payload.as_bytes());
        gdo0.trigger(Edge::Falling);
        thread::sleep(Duration::from_millis(60));
    }

    for row in radio.rows().iter().filter(|r| r.hot) {
        println!("{:#06x} {:<10} {}", row.address, row.name, row.value);
    }
    println!("clean shutdown: {}", app.shutdown());
    Ok(())
}
