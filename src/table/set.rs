use std::{any::Any, collections::BTreeMap};

use tracing::trace;

use super::{RefreshStats, RegisterMap, RegisterRow};
use crate::{
    error::{Error, Result, SchemaError, TableError},
    transport::Transport,
};

struct SubTable {
    name: String,
    volatile: bool,
    map: Box<dyn RegisterMap>,
}

/// Named sub-tables of a command-protocol chip.
///
/// Each sub-table is addressed independently (normally by giving it a base of
/// `opcode << 8`) and may use its own address and value types. Register names
/// are unique across the whole set, so snapshots stay flat.
///
/// On the frequent tier only sub-tables marked volatile take part, and they are
/// refreshed in full: a command returns its whole response either way.
#[derive(Default)]
pub struct RegisterTableSet {
    tables: Vec<SubTable>,
}

impl core::fmt::Debug for RegisterTableSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list()
            .entries(self.tables.iter().map(|t| &t.name))
            .finish()
    }
}

impl RegisterTableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sub-table. Refresh order is insertion order.
    pub fn add(
        mut self,
        name: impl Into<String>,
        volatile: bool,
        map: impl RegisterMap,
    ) -> core::result::Result<Self, TableError> {
        let name = name.into();
        if self.tables.iter().any(|t| t.name == name) {
            return Err(TableError::DuplicateTable(name));
        }
        let existing: Vec<String> = self.tables.iter().flat_map(|t| t.map.names()).collect();
        if let Some(dup) = map.names().into_iter().find(|n| existing.contains(n)) {
            return Err(TableError::DuplicateName(dup));
        }
        self.tables.push(SubTable {
            name,
            volatile,
            map: Box::new(map),
        });
        Ok(self)
    }

    /// `(name, volatile)` of every sub-table, in refresh order.
    pub fn sub_tables(&self) -> impl Iterator<Item = (&str, bool)> {
        self.tables.iter().map(|t| (t.name.as_str(), t.volatile))
    }

    fn entry(&self, name: &str) -> Result<&SubTable> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| Error::UnknownTable(name.to_owned()))
    }

    /// Type-erased sub-table.
    pub fn map(&self, name: &str) -> Result<&dyn RegisterMap> {
        Ok(self.entry(name)?.map.as_ref())
    }

    /// Sub-table `name` as its concrete table type.
    pub fn table<T: RegisterMap>(&self, name: &str) -> Result<&T> {
        self.entry(name)?
            .map
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| Error::UnknownTable(name.to_owned()))
    }

    pub fn table_mut<T: RegisterMap>(&mut self, name: &str) -> Result<&mut T> {
        self.tables
            .iter_mut()
            .find(|t| t.name == name)
            .ok_or_else(|| Error::UnknownTable(name.to_owned()))?
            .map
            .as_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| Error::UnknownTable(name.to_owned()))
    }
}

impl RegisterMap for RegisterTableSet {
    fn refresh(&mut self, bus: &mut dyn Transport, frequent: bool) -> Result<RefreshStats> {
        let mut stats = RefreshStats::default();
        for sub in self.tables.iter_mut().filter(|t| !frequent || t.volatile) {
            trace!(table = %sub.name, frequent, "refresh sub-table");
            stats += sub.map.refresh(bus, false)?;
        }
        Ok(stats)
    }

    fn flush(&mut self, bus: &mut dyn Transport) -> Result<usize> {
        let mut written = 0;
        for sub in &mut self.tables {
            written += sub.map.flush(bus)?;
        }
        Ok(written)
    }

    fn any_dirty(&self) -> bool {
        self.tables.iter().any(|t| t.map.any_dirty())
    }

    fn export(&self, out: &mut BTreeMap<String, String>) {
        for sub in &self.tables {
            sub.map.export(out);
        }
    }

    fn check_entry(&self, name: &str, hex: &str) -> Option<core::result::Result<(), SchemaError>> {
        self.tables.iter().find_map(|t| t.map.check_entry(name, hex))
    }

    fn stage_entry(&mut self, name: &str, hex: &str) -> core::result::Result<(), SchemaError> {
        match self
            .tables
            .iter_mut()
            .find(|t| t.map.check_entry(name, hex).is_some())
        {
            Some(sub) => sub.map.stage_entry(name, hex),
            None => Err(SchemaError::UnknownRegister(name.to_owned())),
        }
    }

    fn rows(&self) -> Vec<RegisterRow> {
        self.tables.iter().flat_map(|t| t.map.rows()).collect()
    }

    fn names(&self) -> Vec<String> {
        self.tables.iter().flat_map(|t| t.map.names()).collect()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        register::Register,
        snapshot::Snapshot,
        table::{RegisterTable, SparseRegisterTable},
        test_support::{MockTransport, test_device_info},
    };

    fn sub(base: u32, prefix: &str, first_read_only: bool) -> SparseRegisterTable<u8, u8> {
        let mut a = Register::new(0x00, format!("{prefix}_A"));
        if first_read_only {
            a = a.read_only();
        }
        RegisterTable::with_base(base, vec![a, Register::new(0x01, format!("{prefix}_B"))])
            .unwrap()
    }

    fn set() -> RegisterTableSet {
        RegisterTableSet::new()
            .add("PART_INFO", false, sub(0x0100, "PART", true))
            .unwrap()
            .add("DEVICE_STATE", true, sub(0x3300, "STATE", true))
            .unwrap()
    }

    #[test]
    fn frequent_refresh_skips_static_sub_tables() {
        let mut tables = set();
        let mut bus = MockTransport::bytewise();

        tables.refresh(&mut bus, true).unwrap();
        assert_eq!(bus.reads(), vec![(0x3300, 2)]);

        bus.clear_log();
        let stats = tables.refresh(&mut bus, false).unwrap();
        assert_eq!(bus.reads(), vec![(0x0100, 2), (0x3300, 2)]);
        assert_eq!(stats, RefreshStats { registers: 4, transfers: 2 });
    }

    #[test]
    fn sub_tables_may_differ_in_types() {
        let wide: SparseRegisterTable<u16, u16> =
            RegisterTable::with_base(0x2000, vec![Register::new(0x0000, "WORD")]).unwrap();
        let mut tables = set().add("WIDE", true, wide).unwrap();
        let mut bus = MockTransport::words(2);
        bus.poke(0x2000, &[0xBE, 0xEF]);

        tables.refresh(&mut bus, true).unwrap();

        let wide = tables.table::<SparseRegisterTable<u16, u16>>("WIDE").unwrap();
        assert_eq!(wide.value("WORD").unwrap(), 0xBEEF);
        assert!(matches!(
            tables.table::<SparseRegisterTable<u8, u8>>("WIDE"),
            Err(Error::UnknownTable(_))
        ));
        assert!(matches!(
            tables.map("NOPE"),
            Err(Error::UnknownTable(_))
        ));
    }

    #[test]
    fn names_are_unique_across_sub_tables() {
        let err = set()
            .add("AGAIN", false, sub(0x0200, "PART", false))
            .unwrap_err();
        assert_eq!(err, TableError::DuplicateName("PART_A".into()));

        let err = set()
            .add("PART_INFO", false, sub(0x0200, "OTHER", false))
            .unwrap_err();
        assert_eq!(err, TableError::DuplicateTable("PART_INFO".into()));
    }

    #[test]
    fn snapshot_spans_all_sub_tables() {
        let info = test_device_info();
        let mut tables = set();
        let mut snap = Snapshot::new(info.clone());
        snap.registers.insert("PART_B".into(), "11".into());
        snap.registers.insert("STATE_B".into(), "22".into());

        assert_eq!(tables.load(&snap, &info.name).unwrap(), 2);
        assert!(tables.any_dirty());

        let mut bus = MockTransport::bytewise();
        assert_eq!(tables.flush(&mut bus).unwrap(), 2);
        assert_eq!(
            bus.writes(),
            vec![(0x0101, vec![0x11]), (0x3301, vec![0x22])]
        );
        assert_eq!(tables.save(&info).registers, snap.registers);
    }

    #[test]
    fn unknown_name_aborts_set_load() {
        let info = test_device_info();
        let mut tables = set();
        let mut snap = Snapshot::new(info.clone());
        snap.registers.insert("PART_B".into(), "11".into());
        snap.registers.insert("ZZZ".into(), "22".into());

        assert!(tables.load(&snap, &info.name).is_err());
        assert!(!tables.any_dirty());
    }

    #[test]
    fn rows_carry_bus_addresses() {
        let tables = set();
        let rows = tables.rows();
        let addrs: Vec<u32> = rows.iter().map(|r| r.address).collect();
        assert_eq!(addrs, vec![0x0100, 0x0101, 0x3300, 0x3301]);
    }
}
