//! Silicon Labs Si446x transceivers (API-command protocol).
//!
//! There is no flat register file: every group of values is the response to a
//! command opcode. Each group is a sub-table whose base is `opcode << 8`, so the
//! transport sees the opcode in the high byte and the response offset in the
//! low byte.

use tracing::debug;

use crate::{
    access::Access,
    device::{Chip, Device, DeviceView, PACKET_CAPACITY, Packet},
    error::{Result, TableError},
    register::{Register, Variable},
    table::{RegisterTable, RegisterTableSet, SparseRegisterTable, VariableWidthRegisterTable},
    value::Bytes,
};

pub const PART_INFO: u8 = 0x01;
pub const FUNC_INFO: u8 = 0x10;
pub const GPIO_PIN_CFG: u8 = 0x13;
pub const FIFO_INFO: u8 = 0x15;
pub const INT_STATUS: u8 = 0x20;
pub const MODEM_STATUS: u8 = 0x22;
pub const DEVICE_STATE: u8 = 0x33;
pub const CHANGE_STATE: u8 = 0x34;
pub const READ_RX_FIFO: u8 = 0x77;

/// Sub-table of single-byte response fields.
pub type ByteTable = SparseRegisterTable<u8, u8>;

/// Bus address of offset `offset` in the response to `opcode`.
pub fn command(opcode: u8, offset: u8) -> u32 {
    u32::from(opcode) << 8 | u32::from(offset)
}

fn base(opcode: u8) -> u32 {
    command(opcode, 0)
}

/// Main states reported in DEVICE_STATE.CURR_STATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    Sleep = 1,
    SpiActive = 2,
    Ready = 3,
    TxTune = 5,
    RxTune = 6,
    Tx = 7,
    Rx = 8,
}

fn ro(addr: u8, name: &str) -> Register<u8, u8> {
    Register::new(addr, name).read_only()
}

fn part_info() -> core::result::Result<VariableWidthRegisterTable<u8>, TableError> {
    let fields: [(u8, &str, usize, &str); 6] = [
        (0, "CHIPREV", 1, "Chip mask revision"),
        (1, "PART", 2, "Part number, e.g. 0x4463"),
        (3, "PBUILD", 1, "Part build"),
        (4, "ID", 2, "Part ID"),
        (6, "CUSTOMER", 1, "Customer ID"),
        (7, "ROMID", 1, "ROM ID"),
    ];
    let regs = fields
        .iter()
        .map(|(addr, name, width, desc)| {
            Register::<u8, Bytes>::new(*addr, *name)
                .width(*width)
                .read_only()
                .describe(*desc)
        })
        .collect();
    RegisterTable::with_base(base(PART_INFO), regs)
}

fn func_info() -> core::result::Result<ByteTable, TableError> {
    RegisterTable::with_base(
        base(FUNC_INFO),
        vec![
            ro(0, "REVEXT"),
            ro(1, "REVBRANCH"),
            ro(2, "REVINT"),
            ro(3, "PATCH_MSB"),
            ro(4, "PATCH_LSB"),
            ro(5, "FUNC"),
        ],
    )
}

fn gpio_pin_cfg() -> core::result::Result<ByteTable, TableError> {
    let pin = |addr: u8, name: &str| {
        Register::new(addr, name)
            .variable(Variable::new(0x40, "PULL_CTL").describe("Enable pull-up"))
            .variable(Variable::new(0x3F, "MODE").describe("Pin function"))
    };
    RegisterTable::with_base(
        base(GPIO_PIN_CFG),
        vec![
            pin(0, "GPIO0"),
            pin(1, "GPIO1"),
            pin(2, "GPIO2"),
            pin(3, "GPIO3"),
            pin(4, "NIRQ"),
            pin(5, "SDO"),
            Register::new(6, "GEN_CONFIG")
                .variable(Variable::new(0x60, "DRV_STRENGTH").describe("Output drive strength")),
        ],
    )
}

fn int_status() -> core::result::Result<ByteTable, TableError> {
    RegisterTable::with_base(
        base(INT_STATUS),
        vec![
            ro(0, "INT_PEND"),
            ro(1, "INT_STATUS"),
            ro(2, "PH_PEND")
                .variable(Variable::new(0x20, "PACKET_SENT_PEND").access(Access::ReadOnly))
                .variable(Variable::new(0x10, "PACKET_RX_PEND").access(Access::ReadOnly))
                .variable(Variable::new(0x08, "CRC_ERROR_PEND").access(Access::ReadOnly)),
            ro(3, "PH_STATUS"),
            ro(4, "MODEM_INT_PEND"),
            ro(5, "MODEM_INT_STATUS"),
            ro(6, "CHIP_PEND"),
            ro(7, "CHIP_STATUS"),
        ],
    )
}

fn modem_status() -> core::result::Result<ByteTable, TableError> {
    RegisterTable::with_base(
        base(MODEM_STATUS),
        vec![
            ro(0, "MODEM_PEND"),
            ro(1, "MODEM_STATUS"),
            ro(2, "CURR_RSSI").hot().describe("Current RSSI"),
            ro(3, "LATCH_RSSI").hot().describe("RSSI latched at sync detect"),
            ro(4, "ANT1_RSSI"),
            ro(5, "ANT2_RSSI"),
            ro(6, "AFC_FREQ_OFFSET_MSB"),
            ro(7, "AFC_FREQ_OFFSET_LSB"),
        ],
    )
}

fn device_state() -> core::result::Result<ByteTable, TableError> {
    RegisterTable::with_base(
        base(DEVICE_STATE),
        vec![
            ro(0, "CURR_STATE")
                .hot()
                .variable(Variable::new(0x0F, "MAIN_STATE").access(Access::ReadOnly)),
            ro(1, "CURRENT_CHANNEL").hot(),
        ],
    )
}

/// Full Si446x map. Interrupt, modem and state groups are refreshed on the
/// frequent tier.
pub fn tables() -> core::result::Result<RegisterTableSet, TableError> {
    RegisterTableSet::new()
        .add("PART_INFO", false, part_info()?)?
        .add("FUNC_INFO", false, func_info()?)?
        .add("GPIO_PIN_CFG", false, gpio_pin_cfg()?)?
        .add("INT_STATUS", true, int_status()?)?
        .add("MODEM_STATUS", true, modem_status()?)?
        .add("DEVICE_STATE", true, device_state()?)
}

#[derive(Debug, Default)]
pub struct Si446x;

impl Si446x {
    fn change_state(view: &mut DeviceView<'_, RegisterTableSet>, state: State) -> Result<bool> {
        view.write(command(CHANGE_STATE, 0), &[state as u8])?;
        view.with_table::<ByteTable, _>("DEVICE_STATE", |table| {
            table.wait_for("CURR_STATE", Some("MAIN_STATE"), &(state as u8))
        })
    }
}

impl Chip for Si446x {
    type Map = RegisterTableSet;

    fn name(&self) -> &str {
        "SI446X"
    }

    fn build_map(&self) -> core::result::Result<Self::Map, TableError> {
        tables()
    }

    fn receive(&mut self, view: &mut DeviceView<'_, Self::Map>, packet: &mut Packet) -> Result<bool> {
        let pending = view.with_table::<ByteTable, _>("INT_STATUS", |table| {
            table.refresh(false)?;
            table.variable_value("PH_PEND", "PACKET_RX_PEND")
        })?;
        if pending == 0 {
            return Ok(false);
        }

        let count = view
            .read(command(FIFO_INFO, 0), 1)?
            .first()
            .copied()
            .map_or(0, usize::from);
        if count == 0 {
            return Ok(false);
        }
        let take = count.min(PACKET_CAPACITY);
        let data = view.read(command(READ_RX_FIFO, 0), take)?;
        let _ = packet.extend_from_slice(&data);
        debug!(device = %view.name(), len = take, "packet read from RX FIFO");
        Ok(true)
    }
}

impl Device<Si446x> {
    /// Commands a state change and waits for DEVICE_STATE to report it.
    pub fn change_state(&self, state: State) -> Result<bool> {
        self.with_view(|view| Si446x::change_state(view, state))
    }

    /// Cached part number, e.g. `0x4463`.
    pub fn part(&self) -> Result<u16> {
        self.with_cached(|map| {
            let part = map
                .table::<VariableWidthRegisterTable<u8>>("PART_INFO")?
                .value("PART")?;
            Ok(part.view().read_u16_be_at(0).unwrap_or_default())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{device::ConvergencePolicy, table::RegisterMap, test_support::MockTransport};

    fn radio() -> (Device<Si446x>, MockTransport) {
        let bus = MockTransport::bytewise();
        let dev = Device::new(Si446x, bus.clone(), 0, 0)
            .unwrap()
            .with_policy(ConvergencePolicy {
                attempts: 4,
                backoff: Duration::ZERO,
            });
        (dev, bus)
    }

    #[test]
    fn sub_tables_are_addressed_by_opcode() {
        let map = tables().unwrap();
        let groups: Vec<(&str, bool)> = map.sub_tables().collect();
        assert_eq!(
            groups,
            vec![
                ("PART_INFO", false),
                ("FUNC_INFO", false),
                ("GPIO_PIN_CFG", false),
                ("INT_STATUS", true),
                ("MODEM_STATUS", true),
                ("DEVICE_STATE", true),
            ]
        );
        assert_eq!(command(GPIO_PIN_CFG, 4), 0x1304);
    }

    #[test]
    fn frequent_tick_issues_only_volatile_commands() {
        let (dev, bus) = radio();
        dev.update_frequent().unwrap();

        let opcodes: Vec<u32> = bus.reads().iter().map(|(addr, _)| addr >> 8).collect();
        assert_eq!(opcodes, vec![0x20, 0x22, 0x33]);
        assert_eq!(bus.reads()[0], (0x2000, 8));
    }

    #[test]
    fn infrequent_tick_reads_every_group() {
        let (dev, bus) = radio();
        bus.poke(0x0101, &[0x44]);
        bus.poke(0x0102, &[0x63]);

        dev.update_infrequent().unwrap();

        // PART_INFO is variable-width: one command per field.
        let part_reads = bus.reads().iter().filter(|(a, _)| a >> 8 == 0x01).count();
        assert_eq!(part_reads, 6);
        assert_eq!(dev.part().unwrap(), 0x4463);
    }

    #[test]
    fn gpio_write_goes_to_its_command() {
        let (dev, bus) = radio();
        dev.with_view(|view| {
            view.with_table::<ByteTable, _>("GPIO_PIN_CFG", |t| t.write_variable("GPIO2", "MODE", 0x14))
        })
        .unwrap();
        assert_eq!(bus.writes(), vec![(0x1302, vec![0x14])]);
    }

    #[test]
    fn change_state_waits_for_device_state() {
        let (dev, bus) = radio();
        bus.on_write(command(CHANGE_STATE, 0), 0x3300, &[State::Rx as u8]);

        assert!(dev.change_state(State::Rx).unwrap());
        assert!(dev.responsive());

        // The chip keeps reporting RX.
        assert!(!dev.change_state(State::Tx).unwrap());
        assert!(!dev.responsive());
    }

    #[test]
    fn receive_checks_pending_then_reads_fifo() {
        let (dev, bus) = radio();
        let mut packet = Packet::new();
        assert!(!dev.receive(&mut packet).unwrap());

        bus.poke(0x2002, &[0x10]);
        bus.poke(0x1500, &[4]);
        bus.script(0x7700, &[&[1, 2, 3, 4]]);
        assert!(dev.receive(&mut packet).unwrap());
        assert_eq!(&packet[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn snapshot_covers_gpio_only() {
        let (dev, _) = radio();
        let snap = dev.save();
        let names: Vec<&str> = snap.registers.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            vec!["GEN_CONFIG", "GPIO0", "GPIO1", "GPIO2", "GPIO3", "NIRQ", "SDO"]
        );
        assert_eq!(dev.with_cached(|m| m.rows().len()), 6 + 6 + 7 + 8 + 8 + 2);
    }
}
