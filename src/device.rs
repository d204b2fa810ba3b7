//! Devices: one chip, one transport, one mutex.
//!
//! Every transport call and every cache access of a device happens inside
//! [`Device::with_view`] or one of the methods built on it, so the scheduler,
//! interrupt callbacks and display readers are strictly serialized per device.
//! Different devices share nothing and can be serviced concurrently.

use std::{
    path::Path,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, warn};

use crate::{
    error::{Error, Operation, Result, SchemaError, TableError},
    snapshot::{DeviceInfo, Snapshot},
    table::{Buffer, RefreshStats, RegisterMap, RegisterRow, RegisterTable, RegisterTableSet},
    transport::Transport,
    value::{Address, RegisterValue, Scalar},
};

/// Maximum packet a chip hands to the receive path in one call.
pub const PACKET_CAPACITY: usize = 64;

/// Fixed-capacity receive buffer.
pub type Packet = heapless::Vec<u8, PACKET_CAPACITY>;

/// Retry budget for state-change convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergencePolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        Self {
            attempts: 50,
            backoff: Duration::from_micros(10),
        }
    }
}

/// Behaviour of one chip family.
///
/// The register map is data built by [`Chip::build_map`]; the hooks only decide
/// what to refresh or command on each cadence. Every hook runs with the device
/// mutex held.
pub trait Chip: Send + 'static {
    type Map: RegisterMap;

    /// Name written to and checked against config snapshots.
    fn name(&self) -> &str;

    fn build_map(&self) -> core::result::Result<Self::Map, TableError>;

    /// Re-establishes baseline state.
    fn reset(&mut self, view: &mut DeviceView<'_, Self::Map>) -> Result<()> {
        view.refresh(false).map(drop)
    }

    /// Called every tick before the frequent update. Chips with their own
    /// measurement cadence check `now` themselves.
    fn update_timed(&mut self, view: &mut DeviceView<'_, Self::Map>, now: Instant) -> Result<()> {
        let _ = (view, now);
        Ok(())
    }

    fn update_frequent(&mut self, view: &mut DeviceView<'_, Self::Map>) -> Result<()> {
        view.refresh(true).map(drop)
    }

    fn update_infrequent(&mut self, view: &mut DeviceView<'_, Self::Map>) -> Result<()> {
        view.refresh(false).map(drop)
    }

    /// Pulls at most one packet into `packet`. Returns whether one arrived.
    fn receive(&mut self, view: &mut DeviceView<'_, Self::Map>, packet: &mut Packet) -> Result<bool> {
        let _ = (view, packet);
        Ok(false)
    }
}

struct DeviceState<C: Chip> {
    transport: Box<dyn Transport>,
    map: C::Map,
    chip: C,
}

/// A chip on a bus together with its cached register map.
pub struct Device<C: Chip> {
    info: DeviceInfo,
    responsive: AtomicBool,
    policy: ConvergencePolicy,
    state: Mutex<DeviceState<C>>,
}

impl<C: Chip> core::fmt::Debug for Device<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Device")
            .field("info", &self.info)
            .field("responsive", &self.responsive())
            .finish_non_exhaustive()
    }
}

impl<C: Chip> Device<C> {
    pub fn new(
        chip: C,
        transport: impl Transport + 'static,
        bus: u32,
        address: u32,
    ) -> core::result::Result<Self, TableError> {
        let map = chip.build_map()?;
        Ok(Self {
            info: DeviceInfo::new(chip.name(), bus, address),
            responsive: AtomicBool::new(true),
            policy: ConvergencePolicy::default(),
            state: Mutex::new(DeviceState {
                transport: Box::new(transport),
                map,
                chip,
            }),
        })
    }

    pub fn with_policy(mut self, policy: ConvergencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// False after a state change failed to converge, until a write succeeds.
    pub fn responsive(&self) -> bool {
        self.responsive.load(Ordering::Acquire)
    }

    // A panic inside a callback must not wedge the device for everyone else.
    fn lock(&self) -> MutexGuard<'_, DeviceState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with exclusive access to the transport and the register map.
    pub fn with_view<R>(&self, f: impl FnOnce(&mut DeviceView<'_, C::Map>) -> R) -> R {
        let mut guard = self.lock();
        let state = &mut *guard;
        let mut view = DeviceView {
            name: &self.info.name,
            transport: state.transport.as_mut(),
            map: &mut state.map,
            responsive: &self.responsive,
            policy: self.policy,
        };
        f(&mut view)
    }

    /// Like [`Device::with_view`], with the chip state alongside.
    pub fn with_chip<R>(&self, f: impl FnOnce(&mut C, &mut DeviceView<'_, C::Map>) -> R) -> R {
        let mut guard = self.lock();
        let DeviceState {
            transport,
            map,
            chip,
        } = &mut *guard;
        let mut view = DeviceView {
            name: &self.info.name,
            transport: transport.as_mut(),
            map,
            responsive: &self.responsive,
            policy: self.policy,
        };
        f(chip, &mut view)
    }

    /// Zero-I/O access to the cached register map.
    pub fn with_cached<R>(&self, f: impl FnOnce(&C::Map) -> R) -> R {
        f(&self.lock().map)
    }

    pub fn reset(&self) -> Result<()> {
        set_responsive(&self.responsive, &self.info.name, true);
        self.with_chip(|chip, view| chip.reset(view))
    }

    pub fn update_timed(&self, now: Instant) -> Result<()> {
        self.with_chip(|chip, view| chip.update_timed(view, now))
    }

    pub fn update_frequent(&self) -> Result<()> {
        self.with_chip(|chip, view| chip.update_frequent(view))
    }

    pub fn update_infrequent(&self) -> Result<()> {
        self.with_chip(|chip, view| chip.update_infrequent(view))
    }

    /// Clears `packet` and pulls at most one packet into it.
    pub fn receive(&self, packet: &mut Packet) -> Result<bool> {
        packet.clear();
        self.with_chip(|chip, view| chip.receive(view, packet))
    }

    /// Raw read of `len` bytes at a bus address.
    pub fn read(&self, address: u32, len: usize) -> Result<Vec<u8>> {
        self.with_view(|view| view.read(address, len))
    }

    /// Raw write at a bus address.
    pub fn write(&self, address: u32, data: &[u8]) -> Result<()> {
        self.with_view(|view| view.write(address, data))
    }

    pub fn rows(&self) -> Vec<RegisterRow> {
        self.with_cached(|map| map.rows())
    }

    pub fn save(&self) -> Snapshot {
        self.with_cached(|map| map.save(&self.info))
    }

    /// Loads a snapshot into the cache and writes it to the chip.
    pub fn load(&self, snapshot: &Snapshot) -> Result<usize> {
        self.with_view(|view| {
            let staged = view.map_mut().load(snapshot, &self.info.name)?;
            view.flush()?;
            Ok(staged)
        })
    }

    pub fn save_config(&self, path: impl AsRef<Path>) -> core::result::Result<(), SchemaError> {
        self.save().to_path(path)
    }

    pub fn load_config(&self, path: impl AsRef<Path>) -> Result<usize> {
        let snapshot = Snapshot::from_path(path)?;
        let staged = self.load(&snapshot)?;
        info!(device = %self.info.name, registers = staged, "config loaded");
        Ok(staged)
    }
}

fn set_responsive(flag: &AtomicBool, name: &str, value: bool) {
    let was = flag.swap(value, Ordering::AcqRel);
    match (was, value) {
        (false, true) => info!(device = %name, "device responsive again"),
        (true, false) => warn!(device = %name, "device marked unresponsive"),
        _ => {}
    }
}

/// Exclusive access to one device's transport and register map.
pub struct DeviceView<'a, M> {
    name: &'a str,
    transport: &'a mut dyn Transport,
    map: &'a mut M,
    responsive: &'a AtomicBool,
    policy: ConvergencePolicy,
}

impl<'a, M: RegisterMap> DeviceView<'a, M> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn responsive(&self) -> bool {
        self.responsive.load(Ordering::Acquire)
    }

    pub fn policy(&self) -> ConvergencePolicy {
        self.policy
    }

    pub fn map(&self) -> &M {
        &*self.map
    }

    pub fn map_mut(&mut self) -> &mut M {
        &mut *self.map
    }

    pub fn transport(&mut self) -> &mut dyn Transport {
        &mut *self.transport
    }

    fn restore(&self) {
        set_responsive(self.responsive, self.name, true);
    }

    fn degrade(&self) {
        set_responsive(self.responsive, self.name, false);
    }

    pub fn read(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.transport.read(address, &mut buf)?;
        Ok(buf)
    }

    pub fn read_value<V: Scalar>(&mut self, address: u32) -> Result<V> {
        let buf = self.read(address, V::BYTES)?;
        Ok(V::from_be_slice(&buf))
    }

    /// Raw write; success restores responsiveness.
    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.transport.write(address, data)?;
        self.restore();
        Ok(())
    }

    pub fn write_value<V: Scalar>(&mut self, address: u32, value: V) -> Result<()> {
        self.write(address, &value.to_be_vec())
    }

    /// Issues a bare command.
    pub fn strobe(&mut self, address: u32) -> Result<()> {
        self.transport.write(address, &[])?;
        Ok(())
    }

    /// Refreshes the map. Skipped while the device is unresponsive so readers
    /// keep seeing the last good values.
    pub fn refresh(&mut self, frequent: bool) -> Result<RefreshStats> {
        if !self.responsive() {
            debug!(device = %self.name, "refresh skipped, device unresponsive");
            return Ok(RefreshStats::default());
        }
        self.map.refresh(&mut *self.transport, frequent)
    }

    pub fn flush(&mut self) -> Result<usize> {
        let written = self.map.flush(&mut *self.transport)?;
        if written > 0 {
            self.restore();
        }
        Ok(written)
    }

    pub fn rows(&self) -> Vec<RegisterRow> {
        self.map.rows()
    }
}

impl<'a, A, V, B> DeviceView<'a, RegisterTable<A, V, B>>
where
    A: Address,
    V: RegisterValue,
    B: Buffer<A, V>,
{
    /// Cached value; no I/O.
    pub fn value(&self, name: &str) -> Result<V> {
        self.map.value(name)
    }

    pub fn variable_value(&self, register: &str, variable: &str) -> Result<V> {
        self.map.variable_value(register, variable)
    }

    pub fn write_register(&mut self, name: &str, value: V) -> Result<()> {
        self.map.write(&mut *self.transport, name, value)?;
        self.restore();
        Ok(())
    }

    pub fn write_variable(&mut self, register: &str, variable: &str, value: V) -> Result<()> {
        self.map
            .write_variable(&mut *self.transport, register, variable, value)?;
        self.restore();
        Ok(())
    }

    /// Reads a register from the chip, or returns the cached value while the
    /// device is unresponsive.
    pub fn read_register(&mut self, name: &str) -> Result<V> {
        if self.responsive() {
            return self.map.read(&mut *self.transport, name);
        }
        let reg = self
            .map
            .find(name)
            .ok_or_else(|| Error::UnknownRegister(name.to_owned()))?;
        if !reg.readable() {
            return Err(Error::access(name, Operation::Read));
        }
        self.map.value(name)
    }

    fn readback(&mut self, register: &str, variable: Option<&str>) -> Result<V> {
        let raw = self.map.read(&mut *self.transport, register)?;
        match variable {
            Some(var) => self.map.variable_value(register, var),
            None => Ok(raw),
        }
    }

    /// Polls `register` (or one of its variables) until it reads `expected`.
    ///
    /// Gives up after the policy's attempt budget, marks the device
    /// unresponsive and returns `Ok(false)`. The cached value is then put back
    /// to what it was before polling, so readers never see a half-way state.
    pub fn wait_for(&mut self, register: &str, variable: Option<&str>, expected: &V) -> Result<bool> {
        let reg = self
            .map
            .find(register)
            .ok_or_else(|| Error::UnknownRegister(register.to_owned()))?;
        if !reg.readable() {
            return Err(Error::access(register, Operation::Read));
        }
        let before = self.map.value(register)?;

        let mut last = None;
        for attempt in 0..self.policy.attempts {
            if attempt > 0 {
                thread::sleep(self.policy.backoff);
            }
            match self.readback(register, variable) {
                Ok(value) if value == *expected => {
                    self.restore();
                    return Ok(true);
                }
                Ok(value) => last = Some(value),
                Err(err) if err.is_transient() => {
                    debug!(device = %self.name, register, %err, "readback failed");
                }
                Err(err) => return Err(err),
            }
        }

        warn!(
            device = %self.name,
            register,
            variable,
            expected = ?expected,
            last = ?last,
            attempts = self.policy.attempts,
            "state change did not converge"
        );
        self.map.store(register, before)?;
        self.degrade();
        Ok(false)
    }

    /// Writes `value` and waits for the readback to match.
    pub fn converge(&mut self, register: &str, variable: Option<&str>, value: V) -> Result<bool> {
        let reg = self
            .map
            .find(register)
            .ok_or_else(|| Error::UnknownRegister(register.to_owned()))?;
        if !reg.readable() {
            return Err(Error::access(register, Operation::Read));
        }
        match variable {
            Some(var) => self.write_variable(register, var, value.clone())?,
            None => self.write_register(register, value.clone())?,
        }
        self.wait_for(register, variable, &value)
    }
}

impl DeviceView<'_, RegisterTableSet> {
    /// Runs `f` against one sub-table with the same transport and lock.
    pub fn with_table<T, R>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut DeviceView<'_, T>) -> Result<R>,
    ) -> Result<R>
    where
        T: RegisterMap,
    {
        let table = self.map.table_mut::<T>(name)?;
        let mut view = DeviceView {
            name: self.name,
            transport: &mut *self.transport,
            map: table,
            responsive: self.responsive,
            policy: self.policy,
        };
        f(&mut view)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_support::{MockTransport, TestChip, test_device_info};

    fn device() -> (Device<TestChip>, MockTransport) {
        let bus = MockTransport::bytewise();
        let dev = Device::new(TestChip::default(), bus.clone(), 0, 0x42)
            .unwrap()
            .with_policy(ConvergencePolicy {
                attempts: 3,
                backoff: Duration::ZERO,
            });
        (dev, bus)
    }

    #[test]
    fn identity_comes_from_the_chip() {
        let (dev, _) = device();
        assert_eq!(dev.info(), &test_device_info());
        assert_eq!(dev.name(), "TESTCHIP");
        assert!(dev.responsive());
    }

    #[test]
    fn write_to_read_only_is_rejected_without_io() {
        let (dev, bus) = device();
        let err = dev
            .with_view(|view| view.write_register("STATUS", 1))
            .unwrap_err();
        assert!(matches!(err, Error::AccessViolation { .. }));
        assert!(bus.log().is_empty());
    }

    #[test]
    fn converge_succeeds_when_readback_matches() {
        let (dev, bus) = device();
        let ok = dev
            .with_view(|view| view.converge("CONFIG", Some("MODE"), 3))
            .unwrap();
        assert!(ok);
        assert!(dev.responsive());
        assert_eq!(bus.peek(0x01), Some(vec![0x30]));
    }

    #[test]
    fn failed_convergence_degrades_without_error() {
        let (dev, bus) = device();
        bus.script(0x01, &[&[0x00], &[0x00], &[0x00]]);

        let ok = dev
            .with_view(|view| view.converge("CONFIG", None, 0x42))
            .unwrap();
        assert!(!ok);
        assert!(!dev.responsive());

        // Reads now come from the cache and frequent updates stay quiet.
        bus.clear_log();
        let cached = dev.with_view(|view| view.value("CONFIG")).unwrap();
        let read = dev.with_view(|view| view.read_register("CONFIG")).unwrap();
        assert_eq!(read, cached);
        dev.update_frequent().unwrap();
        assert!(bus.log().is_empty());

        // A later successful write brings it back.
        dev.with_view(|view| view.write_register("THRESHOLD", 7)).unwrap();
        assert!(dev.responsive());
    }

    #[test]
    fn failed_wait_keeps_value_from_before_polling() {
        let (dev, bus) = device();
        bus.poke(0x00, &[0x08]);
        dev.update_frequent().unwrap();
        bus.script(0x00, &[&[0x01], &[0x01], &[0x01]]);

        let ok = dev
            .with_view(|view| view.wait_for("STATUS", None, &0x80))
            .unwrap();

        assert!(!ok);
        assert_eq!(bus.reads().len(), 1 + 3);
        assert_eq!(dev.with_view(|view| view.value("STATUS")).unwrap(), 0x08);
        assert_eq!(dev.rows()[0].value, "08");
    }

    #[test]
    fn convergence_needs_a_readable_register() {
        let (dev, bus) = device();
        let err = dev
            .with_view(|view| view.converge("COMMAND", None, 1))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::AccessViolation {
                operation: Operation::Read,
                ..
            }
        ));
        assert!(bus.log().is_empty());
    }

    #[test]
    fn hooks_default_to_tiered_refresh() {
        let (dev, bus) = device();
        dev.update_frequent().unwrap();
        assert_eq!(bus.reads(), vec![(0x00, 1), (0x04, 1)]);

        bus.clear_log();
        dev.update_infrequent().unwrap();
        assert_eq!(bus.reads().len(), 3);

        bus.clear_log();
        dev.update_timed(Instant::now()).unwrap();
        assert!(bus.log().is_empty());
    }

    #[test]
    fn reset_restores_responsiveness_and_refreshes() {
        let (dev, bus) = device();
        bus.script(0x01, &[&[0x00], &[0x00], &[0x00]]);
        dev.with_view(|view| view.converge("CONFIG", None, 0x42))
            .unwrap();
        assert!(!dev.responsive());

        bus.poke(0x02, &[0x99]);
        dev.reset().unwrap();
        assert!(dev.responsive());
        assert_eq!(dev.with_view(|view| view.value("THRESHOLD")).unwrap(), 0x99);
    }

    #[test]
    fn raw_access() {
        let (dev, bus) = device();
        bus.poke(0x10, &[0x12]);
        bus.poke(0x11, &[0x34]);

        assert_eq!(dev.read(0x10, 2).unwrap(), vec![0x12, 0x34]);
        let word: u16 = dev.with_view(|view| view.read_value(0x10)).unwrap();
        assert_eq!(word, 0x1234);

        dev.with_view(|view| {
            view.write_value(0x20, 0xBEEFu16)?;
            view.strobe(0x36)
        })
        .unwrap();
        assert_eq!(
            bus.writes(),
            vec![(0x20, vec![0xBE, 0xEF]), (0x36, vec![])]
        );
    }

    #[test]
    fn receive_defaults_to_no_packet() {
        let (dev, _) = device();
        let mut packet = Packet::new();
        packet.push(1).unwrap();
        assert!(!dev.receive(&mut packet).unwrap());
        assert!(packet.is_empty());
    }

    #[test]
    fn config_file_round_trip_flushes_to_second_device() {
        let (first, _) = device();
        first
            .with_view(|view| {
                view.write_register("CONFIG", 0x5A)?;
                view.write_register("CHANNEL", 0x07)
            })
            .unwrap();

        let path = std::env::temp_dir().join(format!(
            "regwatch-device-{}.json",
            std::process::id()
        ));
        first.save_config(&path).unwrap();

        let (second, bus) = device();
        let loaded = second.load_config(&path);
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded.unwrap(), 4);
        assert_eq!(second.with_view(|v| v.value("CONFIG")).unwrap(), 0x5A);
        assert_eq!(bus.peek(0x20), Some(vec![0x07]));
        assert!(!second.with_cached(|map| map.any_dirty()));
    }

    #[test]
    fn mismatched_snapshot_leaves_device_untouched() {
        let (dev, bus) = device();
        let mut snap = Snapshot::new(DeviceInfo::new("CC1101", 0, 0));
        snap.registers.insert("CONFIG".into(), "FF".into());

        let err = dev.load(&snap).unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(SchemaError::DeviceMismatch { .. })
        ));
        assert!(bus.log().is_empty());
        assert_eq!(dev.with_view(|v| v.value("CONFIG")).unwrap(), 0);
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let (dev, bus) = device();
        let dev = Arc::new(dev);
        let worker = Arc::clone(&dev);
        let joined = thread::spawn(move || {
            worker.with_view(|_| panic!("callback blew up"));
        })
        .join();
        assert!(joined.is_err());

        bus.poke(0x00, &[0xA8]);
        dev.update_frequent().unwrap();
        assert_eq!(
            dev.with_view(|v| v.variable_value("STATUS", "DATA_READY"))
                .unwrap(),
            1
        );
    }

    #[test]
    fn rows_are_available_without_io() {
        let (dev, bus) = device();
        let rows = dev.rows();
        assert_eq!(rows.len(), 6);
        assert!(bus.log().is_empty());
    }
}
