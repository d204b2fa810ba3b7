//! Register tables: descriptors plus a cached raw-value buffer.
//!
//! A table never owns its device. Every operation that touches hardware takes the
//! transport as an argument, so the caller decides which lock guards it (see
//! [`Device::with_view`](crate::device::Device::with_view)).
//!
//! Two refresh tiers bound transport bandwidth:
//!
//! - `refresh(bus, true)` re-reads only registers flagged hot (status, IRQ, RSSI)
//!   and is meant to run many times per second.
//! - `refresh(bus, false)` reads every readable register once and is meant to run
//!   around 1 Hz to pick up slow-changing configuration.
//!
//! Scalar tables coalesce contiguous addresses into one burst per run. Vector
//! tables read each register on its own, since every register is a separate
//! command on the chips that use them.

mod buffer;
mod set;

use std::{any::Any, collections::BTreeMap, io, marker::PhantomData};

use bitmaps::Bitmap;
use tracing::{debug, trace};

use crate::{
    access::{Access, AccessPolicy},
    error::{Error, Operation, Result, SchemaError, TableError},
    helpers::coalesce,
    register::{Register, Variable},
    snapshot::{DeviceInfo, Snapshot},
    transport::Transport,
    value::{Address, Bytes, RegisterValue, decode_hex},
};

pub use buffer::{Buffer, DenseBuffer, SparseBuffer};
pub use set::RegisterTableSet;

/// Upper bound on registers in one table; hot and dirty sets are fixed bitmaps.
pub const MAX_REGISTERS: usize = 1024;

/// Table whose buffer spans the whole declared address range.
pub type DenseRegisterTable<A, V> = RegisterTable<A, V, DenseBuffer<A, V>>;

/// Table whose buffer holds only declared addresses.
pub type SparseRegisterTable<A, V> = RegisterTable<A, V, SparseBuffer<A, V>>;

/// Table of byte-sequence registers, each with its own declared width.
pub type VariableWidthRegisterTable<A> = RegisterTable<A, Bytes, SparseBuffer<A, Bytes>>;

/// What a refresh did on the bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub registers: usize,
    pub transfers: usize,
}

impl core::ops::AddAssign for RefreshStats {
    fn add_assign(&mut self, rhs: Self) {
        self.registers += rhs.registers;
        self.transfers += rhs.transfers;
    }
}

/// Diagnostic row for one variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRow {
    pub name: String,
    pub nice_name: String,
    pub description: String,
    pub access: Access,
    pub value: String,
}

/// Diagnostic row for one register, in table order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRow {
    pub address: u32,
    pub name: String,
    pub nice_name: String,
    pub description: String,
    pub access: Access,
    pub hot: bool,
    pub value: String,
    pub variables: Vec<VariableRow>,
}

/// Type-erased register map: a single table or a set of sub-tables.
///
/// This is what a [`Device`](crate::device::Device) drives on every tick and what
/// display layers iterate when they do not know a table's type parameters.
pub trait RegisterMap: Any + Send {
    /// Re-reads hot registers (`frequent`) or every readable register.
    fn refresh(&mut self, bus: &mut dyn Transport, frequent: bool) -> Result<RefreshStats>;

    /// Writes every register changed by a snapshot load and clears the dirty set.
    fn flush(&mut self, bus: &mut dyn Transport) -> Result<usize>;

    /// True if any register awaits a flush.
    fn any_dirty(&self) -> bool;

    /// Adds the hex value of every writeable register to `out`.
    fn export(&self, out: &mut BTreeMap<String, String>);

    /// Validates one snapshot entry. `None` means the name is not in this map.
    fn check_entry(&self, name: &str, hex: &str) -> Option<core::result::Result<(), SchemaError>>;

    /// Applies one entry previously accepted by [`RegisterMap::check_entry`].
    fn stage_entry(&mut self, name: &str, hex: &str) -> core::result::Result<(), SchemaError>;

    /// Diagnostic rows in address order.
    fn rows(&self) -> Vec<RegisterRow>;

    /// Register names in address order.
    fn names(&self) -> Vec<String>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Snapshot of every writeable register.
    fn save(&self, device: &DeviceInfo) -> Snapshot {
        let mut snapshot = Snapshot::new(device.clone());
        self.export(&mut snapshot.registers);
        snapshot
    }

    /// Loads a snapshot into the cache, all or nothing, and marks the loaded
    /// registers dirty. Returns the number of registers staged.
    fn load(
        &mut self,
        snapshot: &Snapshot,
        device_name: &str,
    ) -> core::result::Result<usize, SchemaError> {
        snapshot.check_device(device_name)?;
        for (name, hex) in &snapshot.registers {
            match self.check_entry(name, hex) {
                Some(result) => result?,
                None => return Err(SchemaError::UnknownRegister(name.clone())),
            }
        }
        for (name, hex) in &snapshot.registers {
            self.stage_entry(name, hex)?;
        }
        Ok(snapshot.registers.len())
    }

    /// Serializes [`RegisterMap::save`] as JSON into `sink`.
    fn write_to(
        &self,
        sink: &mut dyn io::Write,
        device: &DeviceInfo,
    ) -> core::result::Result<(), SchemaError> {
        self.save(device).to_writer(sink)
    }

    /// Parses JSON from `source` and [`RegisterMap::load`]s it.
    fn read_from(
        &mut self,
        source: &mut dyn io::Read,
        device_name: &str,
    ) -> core::result::Result<usize, SchemaError> {
        let snapshot = Snapshot::from_reader(source)?;
        self.load(&snapshot, device_name)
    }
}

/// Ordered register descriptors plus the cached raw buffer for one address space.
///
/// Registers are kept address-ascending regardless of declaration order; lookup
/// by address is a binary search.
pub struct RegisterTable<A, V, B = DenseBuffer<A, V>> {
    base: u32,
    registers: Vec<Register<A, V>>,
    by_name: BTreeMap<String, usize>,
    buffer: B,
    hot: Bitmap<MAX_REGISTERS>,
    dirty: Bitmap<MAX_REGISTERS>,
    _phantom: PhantomData<fn() -> (A, V)>,
}

impl<A, V, B> core::fmt::Debug for RegisterTable<A, V, B>
where
    A: Address,
    V: RegisterValue,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegisterTable")
            .field("base", &self.base)
            .field("registers", &self.registers.len())
            .finish_non_exhaustive()
    }
}

impl<A, V, B> RegisterTable<A, V, B>
where
    A: Address,
    V: RegisterValue,
    B: Buffer<A, V>,
{
    /// Builds a table at bus base address 0.
    pub fn new(registers: Vec<Register<A, V>>) -> core::result::Result<Self, TableError> {
        Self::with_base(0, registers)
    }

    /// Builds a table whose registers sit at `base + address` on the bus.
    pub fn with_base(
        base: u32,
        mut registers: Vec<Register<A, V>>,
    ) -> core::result::Result<Self, TableError> {
        if registers.len() > MAX_REGISTERS {
            return Err(TableError::TooManyRegisters {
                count: registers.len(),
                max: MAX_REGISTERS,
            });
        }
        registers.sort_by_key(|r| r.address());

        let mut by_name = BTreeMap::new();
        let mut hot = Bitmap::new();
        for (idx, reg) in registers.iter().enumerate() {
            reg.validate()?;
            if idx > 0 && registers[idx - 1].address() == reg.address() {
                return Err(TableError::DuplicateAddress(reg.address().to_string()));
            }
            if by_name.insert(reg.name().to_owned(), idx).is_some() {
                return Err(TableError::DuplicateName(reg.name().to_owned()));
            }
            if reg.is_hot() {
                hot.set(idx, true);
            }
        }

        Ok(Self {
            base,
            buffer: B::for_registers(&registers),
            registers,
            by_name,
            hot,
            dirty: Bitmap::new(),
            _phantom: PhantomData,
        })
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Registers in address-ascending order.
    pub fn registers(&self) -> impl Iterator<Item = &Register<A, V>> {
        self.registers.iter()
    }

    /// Registers flagged for the frequent tier, address-ascending.
    pub fn hot_registers(&self) -> impl Iterator<Item = &Register<A, V>> {
        self.registers
            .iter()
            .enumerate()
            .filter(|(idx, _)| self.hot.get(*idx))
            .map(|(_, reg)| reg)
    }

    fn index_of(&self, addr: A) -> Option<usize> {
        self.registers
            .binary_search_by_key(&addr, |r| r.address())
            .ok()
    }

    /// Register at `addr`, if declared.
    pub fn register(&self, addr: A) -> Option<&Register<A, V>> {
        self.index_of(addr).map(|i| &self.registers[i])
    }

    /// Register called `name`, if declared.
    pub fn find(&self, name: &str) -> Option<&Register<A, V>> {
        self.by_name.get(name).map(|i| &self.registers[*i])
    }

    fn lookup(&self, name: &str) -> Result<(usize, &Register<A, V>)> {
        self.by_name
            .get(name)
            .map(|i| (*i, &self.registers[*i]))
            .ok_or_else(|| Error::UnknownRegister(name.to_owned()))
    }

    fn lookup_variable<'t>(
        reg: &'t Register<A, V>,
        variable: &str,
    ) -> Result<&'t Variable<A, V>> {
        reg.find_variable(variable)
            .ok_or_else(|| Error::UnknownVariable {
                register: reg.name().to_owned(),
                variable: variable.to_owned(),
            })
    }

    /// Cached raw value at `addr`. Never touches the transport.
    pub fn get(&self, addr: A) -> Option<&V> {
        self.index_of(addr)?;
        self.buffer.get(addr)
    }

    /// Cached raw value of the register called `name`.
    pub fn value(&self, name: &str) -> Result<V> {
        let (_, reg) = self.lookup(name)?;
        Ok(self.cached(reg))
    }

    /// Cached value of one variable, already shifted down.
    pub fn variable_value(&self, register: &str, variable: &str) -> Result<V> {
        let (_, reg) = self.lookup(register)?;
        let var = Self::lookup_variable(reg, variable)?;
        Ok(var.get(&self.cached(reg)))
    }

    fn cached(&self, reg: &Register<A, V>) -> V {
        self.buffer
            .get(reg.address())
            .cloned()
            .unwrap_or_else(|| reg.zero())
    }

    /// Stores a value in the cache without any I/O, e.g. after a chip-specific
    /// command returned it out of band.
    pub fn store(&mut self, name: &str, value: V) -> Result<()> {
        let (_, reg) = self.lookup(name)?;
        let addr = reg.address();
        self.check_len(reg, &value)?;
        self.buffer.set(addr, value);
        Ok(())
    }

    fn check_len(&self, reg: &Register<A, V>, value: &V) -> Result<()> {
        if value.encoded_len() != reg.byte_width() {
            return Err(Error::ValueLength {
                register: reg.name().to_owned(),
                expected: reg.byte_width(),
                found: value.encoded_len(),
            });
        }
        Ok(())
    }

    /// Address runs a refresh would read, in order.
    ///
    /// Only readable registers take part; the frequent tier further restricts to
    /// hot registers. Vector registers are never merged.
    pub fn blocks(&self, frequent: bool) -> Vec<(A, A)> {
        let selected = self
            .registers
            .iter()
            .enumerate()
            .filter(|(idx, reg)| reg.readable() && (!frequent || self.hot.get(*idx)))
            .map(|(_, reg)| reg.address());

        match V::FIXED_LEN {
            Some(_) => coalesce(selected),
            None => selected.map(|a| (a, a)).collect(),
        }
    }

    /// Reads one run from the bus into the cache.
    fn read_run(&mut self, bus: &mut dyn Transport, start: A, end: A) -> Result<usize> {
        match V::FIXED_LEN {
            Some(unit) => {
                let count = start.distance(end);
                let mut raw = vec![0u8; count * unit];
                bus.read(self.base + start.to_bus(), &mut raw)?;

                let mut addr = Some(start);
                for chunk in raw.chunks(unit) {
                    let Some(a) = addr else { break };
                    self.buffer.set(a, V::from_be_slice(chunk));
                    addr = a.next();
                }
                Ok(count)
            }
            None => {
                let width = self
                    .register(start)
                    .map(|r| r.byte_width())
                    .unwrap_or_default();
                let mut raw = vec![0u8; width];
                bus.read(self.base + start.to_bus(), &mut raw)?;
                self.buffer.set(start, V::from_be_slice(&raw));
                Ok(1)
            }
        }
    }

    /// Refreshes the cache from hardware; see the module docs for the two tiers.
    pub fn refresh(&mut self, bus: &mut dyn Transport, frequent: bool) -> Result<RefreshStats> {
        let mut stats = RefreshStats::default();
        for (start, end) in self.blocks(frequent) {
            trace!(base = self.base, %start, %end, "refresh run");
            stats.registers += self.read_run(bus, start, end)?;
            stats.transfers += 1;
        }
        Ok(stats)
    }

    /// Reads one register from hardware into the cache and returns it.
    pub fn read(&mut self, bus: &mut dyn Transport, name: &str) -> Result<V> {
        let (_, reg) = self.lookup(name)?;
        if !reg.readable() {
            return Err(Error::access(name, Operation::Read));
        }
        let addr = reg.address();
        self.read_run(bus, addr, addr)?;
        let (_, reg) = self.lookup(name)?;
        Ok(self.cached(reg))
    }

    /// Writes a whole register with exactly one transport write.
    ///
    /// Fails with [`Error::AccessViolation`] before any I/O if the register is
    /// not writeable.
    pub fn write(&mut self, bus: &mut dyn Transport, name: &str, value: V) -> Result<()> {
        let (idx, reg) = self.lookup(name)?;
        if !reg.writeable() {
            return Err(Error::access(name, Operation::Write));
        }
        self.check_len(reg, &value)?;
        let addr = reg.address();

        bus.write(self.base + addr.to_bus(), &value.to_be_vec())?;
        self.buffer.set(addr, value);
        self.dirty.set(idx, false);
        Ok(())
    }

    /// Read-modify-write of one variable against the cached register value.
    pub fn write_variable(
        &mut self,
        bus: &mut dyn Transport,
        register: &str,
        variable: &str,
        value: V,
    ) -> Result<()> {
        let (_, reg) = self.lookup(register)?;
        let var = Self::lookup_variable(reg, variable)?;
        if !reg.writeable() || !var.can_write() {
            return Err(Error::access(
                &format!("{register}.{variable}"),
                Operation::Write,
            ));
        }
        let raw = var.set(&self.cached(reg), &value);
        self.write(bus, register, raw)
    }

    /// True if the register at `name` was loaded from a snapshot and not yet
    /// flushed.
    pub fn is_dirty(&self, name: &str) -> bool {
        self.by_name.get(name).is_some_and(|i| self.dirty.get(*i))
    }

    fn parse_entry(&self, reg: &Register<A, V>, hex: &str) -> core::result::Result<V, SchemaError> {
        if !reg.writeable() {
            return Err(SchemaError::NotWriteable(reg.name().to_owned()));
        }
        if hex.len() != reg.hex_len() {
            return Err(SchemaError::InvalidValueLength {
                register: reg.name().to_owned(),
                expected: reg.hex_len(),
                found: hex.len(),
            });
        }
        let bytes = decode_hex(hex).ok_or_else(|| SchemaError::InvalidHex {
            register: reg.name().to_owned(),
            value: hex.to_owned(),
        })?;
        Ok(V::from_be_slice(&bytes))
    }
}

impl<A, V, B> RegisterMap for RegisterTable<A, V, B>
where
    A: Address,
    V: RegisterValue,
    B: Buffer<A, V>,
{
    fn refresh(&mut self, bus: &mut dyn Transport, frequent: bool) -> Result<RefreshStats> {
        RegisterTable::refresh(self, bus, frequent)
    }

    fn flush(&mut self, bus: &mut dyn Transport) -> Result<usize> {
        let dirty: Vec<A> = self
            .registers
            .iter()
            .enumerate()
            .filter(|(idx, _)| self.dirty.get(*idx))
            .map(|(_, reg)| reg.address())
            .collect();
        if dirty.is_empty() {
            return Ok(0);
        }

        let runs = match V::FIXED_LEN {
            Some(_) => coalesce(dirty.iter().copied()),
            None => dirty.iter().map(|a| (*a, *a)).collect(),
        };
        for (start, end) in runs {
            let mut data = Vec::new();
            let mut addr = Some(start);
            while let Some(a) = addr {
                if let Some(v) = self.buffer.get(a) {
                    v.write_be(&mut data);
                }
                if a == end {
                    break;
                }
                addr = a.next();
            }
            debug!(base = self.base, %start, %end, bytes = data.len(), "flush run");
            bus.write(self.base + start.to_bus(), &data)?;

            let mut addr = Some(start);
            while let Some(a) = addr {
                if let Some(idx) = self.index_of(a) {
                    self.dirty.set(idx, false);
                }
                if a == end {
                    break;
                }
                addr = a.next();
            }
        }
        Ok(dirty.len())
    }

    fn any_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    fn export(&self, out: &mut BTreeMap<String, String>) {
        for reg in self.registers.iter().filter(|r| r.writeable()) {
            out.insert(reg.name().to_owned(), self.cached(reg).to_hex());
        }
    }

    fn check_entry(&self, name: &str, hex: &str) -> Option<core::result::Result<(), SchemaError>> {
        let reg = self.find(name)?;
        Some(self.parse_entry(reg, hex).map(drop))
    }

    fn stage_entry(&mut self, name: &str, hex: &str) -> core::result::Result<(), SchemaError> {
        let idx = *self
            .by_name
            .get(name)
            .ok_or_else(|| SchemaError::UnknownRegister(name.to_owned()))?;
        let value = self.parse_entry(&self.registers[idx], hex)?;
        let addr = self.registers[idx].address();
        self.buffer.set(addr, value);
        self.dirty.set(idx, true);
        Ok(())
    }

    fn rows(&self) -> Vec<RegisterRow> {
        self.registers
            .iter()
            .enumerate()
            .map(|(idx, reg)| {
                let raw = self.cached(reg);
                RegisterRow {
                    address: self.base + reg.address().to_bus(),
                    name: reg.name().to_owned(),
                    nice_name: reg.display_name().to_owned(),
                    description: reg.description().to_owned(),
                    access: reg.mode(),
                    hot: self.hot.get(idx),
                    value: raw.to_hex(),
                    variables: reg
                        .variables()
                        .map(|var| VariableRow {
                            name: var.name().to_owned(),
                            nice_name: var.display_name().to_owned(),
                            description: var.description().to_owned(),
                            access: var.mode(),
                            value: var.get(&raw).to_hex(),
                        })
                        .collect(),
                }
            })
            .collect()
    }

    fn names(&self) -> Vec<String> {
        self.registers.iter().map(|r| r.name().to_owned()).collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
