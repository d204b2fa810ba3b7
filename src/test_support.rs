//! Test support utilities - only compiled in test builds.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    io,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing_subscriber::EnvFilter;

use crate::{
    access::Access,
    device::Chip,
    error::{TableError, TransportError},
    register::{Register, Variable},
    snapshot::DeviceInfo,
    table::{DenseRegisterTable, SparseRegisterTable},
    transport::Transport,
};

/// Routes log output through the test harness. Set `RUST_LOG` to see it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// One recorded bus transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    Read { address: u32, len: usize },
    Write { address: u32, data: Vec<u8> },
}

#[derive(Default)]
struct MockState {
    memory: BTreeMap<u32, Vec<u8>>,
    scripted: HashMap<u32, VecDeque<Vec<u8>>>,
    effects: HashMap<u32, Vec<(u32, Vec<u8>)>>,
    log: Vec<Transfer>,
    fail_reads: bool,
    fail_writes: bool,
}

/// In-memory transport that records every transfer.
///
/// Clones share state, so a test can keep a handle after moving the transport
/// into a device. `unit` is the number of bytes one address holds; `None` means
/// one address holds a whole transfer (command-keyed sensors).
#[derive(Clone)]
pub struct MockTransport {
    unit: Option<usize>,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn bytewise() -> Self {
        Self::with_unit(Some(1))
    }

    pub fn words(bytes: usize) -> Self {
        Self::with_unit(Some(bytes))
    }

    pub fn vectors() -> Self {
        Self::with_unit(None)
    }

    fn with_unit(unit: Option<usize>) -> Self {
        Self {
            unit,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Presets the bytes held at `address`.
    pub fn poke(&self, address: u32, bytes: &[u8]) {
        self.state().memory.insert(address, bytes.to_vec());
    }

    pub fn peek(&self, address: u32) -> Option<Vec<u8>> {
        self.state().memory.get(&address).cloned()
    }

    /// Queues responses returned by successive reads of `address` before the
    /// backing memory is consulted.
    pub fn script(&self, address: u32, responses: &[&[u8]]) {
        let mut state = self.state();
        let queue = state.scripted.entry(address).or_default();
        queue.extend(responses.iter().map(|r| r.to_vec()));
    }

    /// After any write to `trigger`, store `bytes` at `target`.
    pub fn on_write(&self, trigger: u32, target: u32, bytes: &[u8]) {
        self.state()
            .effects
            .entry(trigger)
            .or_default()
            .push((target, bytes.to_vec()));
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state().fail_reads = fail;
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    pub fn log(&self) -> Vec<Transfer> {
        self.state().log.clone()
    }

    pub fn clear_log(&self) {
        self.state().log.clear();
    }

    pub fn reads(&self) -> Vec<(u32, usize)> {
        self.log()
            .into_iter()
            .filter_map(|t| match t {
                Transfer::Read { address, len } => Some((address, len)),
                Transfer::Write { .. } => None,
            })
            .collect()
    }

    pub fn writes(&self) -> Vec<(u32, Vec<u8>)> {
        self.log()
            .into_iter()
            .filter_map(|t| match t {
                Transfer::Write { address, data } => Some((address, data)),
                Transfer::Read { .. } => None,
            })
            .collect()
    }
}

impl Transport for MockTransport {
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), TransportError> {
        let unit = self.unit;
        let mut state = self.state();
        state.log.push(Transfer::Read {
            address,
            len: buf.len(),
        });
        if state.fail_reads {
            return Err(TransportError::io(
                address,
                io::Error::new(io::ErrorKind::TimedOut, "mock read failure"),
            ));
        }
        if let Some(resp) = state.scripted.get_mut(&address).and_then(|q| q.pop_front()) {
            let n = resp.len().min(buf.len());
            buf.fill(0);
            buf[..n].copy_from_slice(&resp[..n]);
            return Ok(());
        }

        let mut offset = 0;
        let mut addr = address;
        while offset < buf.len() {
            let remaining = buf.len() - offset;
            let step = unit.unwrap_or(remaining).min(remaining);
            match state.memory.get(&addr) {
                Some(bytes) => {
                    let n = bytes.len().min(step);
                    buf[offset..offset + n].copy_from_slice(&bytes[..n]);
                    buf[offset + n..offset + step].fill(0);
                }
                None => buf[offset..offset + step].fill(0),
            }
            offset += step;
            addr += 1;
        }
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), TransportError> {
        let unit = self.unit;
        let mut state = self.state();
        state.log.push(Transfer::Write {
            address,
            data: data.to_vec(),
        });
        if state.fail_writes {
            return Err(TransportError::Nack { address });
        }
        match unit {
            Some(unit) => {
                for (i, chunk) in data.chunks(unit).enumerate() {
                    state.memory.insert(address + i as u32, chunk.to_vec());
                }
            }
            None if !data.is_empty() => {
                state.memory.insert(address, data.to_vec());
            }
            None => {}
        }
        if let Some(effects) = state.effects.get(&address).cloned() {
            for (target, bytes) in effects {
                state.memory.insert(target, bytes);
            }
        }
        Ok(())
    }
}

/// Status register from the worked example: DATA_READY at bit 3, ERROR at bit 0.
pub fn status_register() -> Register<u8, u8> {
    Register::new(0x00, "STATUS")
        .read_only()
        .hot()
        .describe("Device status")
        .variable(Variable::new(0x08, "DATA_READY"))
        .variable(Variable::new(0x01, "ERROR"))
}

/// Small mixed-access map: hot status, RW config, a WO command and a gap.
pub fn test_registers() -> Vec<Register<u8, u8>> {
    vec![
        status_register(),
        Register::new(0x01, "CONFIG")
            .variable(Variable::new(0x70, "MODE"))
            .variable(Variable::new(0x0F, "GAIN")),
        Register::new(0x02, "THRESHOLD"),
        Register::new(0x03, "COMMAND").write_only(),
        Register::new(0x04, "RSSI").read_only().hot(),
        Register::new(0x20, "CHANNEL").access(Access::ReadWrite),
    ]
}

pub fn test_table() -> SparseRegisterTable<u8, u8> {
    SparseRegisterTable::new(test_registers()).unwrap()
}

pub fn test_dense_table() -> DenseRegisterTable<u8, u8> {
    DenseRegisterTable::new(test_registers()).unwrap()
}

pub fn test_device_info() -> DeviceInfo {
    DeviceInfo::new("TESTCHIP", 0, 0x42)
}

/// Chip over [`test_registers`] using every default hook.
#[derive(Debug, Default)]
pub struct TestChip;

impl Chip for TestChip {
    type Map = SparseRegisterTable<u8, u8>;

    fn name(&self) -> &str {
        "TESTCHIP"
    }

    fn build_map(&self) -> Result<Self::Map, TableError> {
        SparseRegisterTable::new(test_registers())
    }
}
