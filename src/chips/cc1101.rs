//! TI CC1101 sub-GHz transceiver.
//!
//! Flat 8-bit register file: configuration at 0x00..=0x2E, read-only status at
//! 0x30..=0x3D. Command strobes share the status addresses and are sent as
//! empty writes; the SPI transport sets the burst bit that tells the two apart.

use tracing::{debug, warn};

use crate::{
    access::Access,
    device::{Chip, Device, DeviceView, PACKET_CAPACITY, Packet},
    error::{Result, TableError},
    register::{Register, Variable},
    table::SparseRegisterTable,
};

pub type Cc1101Map = SparseRegisterTable<u8, u8>;

pub const SRES: u32 = 0x30;
pub const SFSTXON: u32 = 0x31;
pub const SXOFF: u32 = 0x32;
pub const SCAL: u32 = 0x33;
pub const SRX: u32 = 0x34;
pub const STX: u32 = 0x35;
pub const SIDLE: u32 = 0x36;
pub const SWOR: u32 = 0x38;
pub const SPWD: u32 = 0x39;
pub const SFRX: u32 = 0x3A;
pub const SFTX: u32 = 0x3B;
pub const SNOP: u32 = 0x3D;

/// FIFO address; reads drain RX, writes fill TX.
pub const FIFO: u32 = 0x3F;

const CONFIG: &[(u8, &str, &str)] = &[
    (0x00, "IOCFG2", "GDO2 output pin configuration"),
    (0x01, "IOCFG1", "GDO1 output pin configuration"),
    (0x02, "IOCFG0", "GDO0 output pin configuration"),
    (0x03, "FIFOTHR", "RX FIFO and TX FIFO thresholds"),
    (0x04, "SYNC1", "Sync word, high byte"),
    (0x05, "SYNC0", "Sync word, low byte"),
    (0x06, "PKTLEN", "Packet length"),
    (0x07, "PKTCTRL1", "Packet automation control"),
    (0x08, "PKTCTRL0", "Packet automation control"),
    (0x09, "ADDR", "Device address"),
    (0x0A, "CHANNR", "Channel number"),
    (0x0B, "FSCTRL1", "Frequency synthesizer control"),
    (0x0C, "FSCTRL0", "Frequency synthesizer control"),
    (0x0D, "FREQ2", "Frequency control word, high byte"),
    (0x0E, "FREQ1", "Frequency control word, middle byte"),
    (0x0F, "FREQ0", "Frequency control word, low byte"),
    (0x10, "MDMCFG4", "Modem configuration"),
    (0x11, "MDMCFG3", "Modem configuration"),
    (0x12, "MDMCFG2", "Modem configuration"),
    (0x13, "MDMCFG1", "Modem configuration"),
    (0x14, "MDMCFG0", "Modem configuration"),
    (0x15, "DEVIATN", "Modem deviation setting"),
    (0x16, "MCSM2", "Main radio control state machine configuration"),
    (0x17, "MCSM1", "Main radio control state machine configuration"),
    (0x18, "MCSM0", "Main radio control state machine configuration"),
    (0x19, "FOCCFG", "Frequency offset compensation configuration"),
    (0x1A, "BSCFG", "Bit synchronization configuration"),
    (0x1B, "AGCCTRL2", "AGC control"),
    (0x1C, "AGCCTRL1", "AGC control"),
    (0x1D, "AGCCTRL0", "AGC control"),
    (0x1E, "WOREVT1", "Event 0 timeout, high byte"),
    (0x1F, "WOREVT0", "Event 0 timeout, low byte"),
    (0x20, "WORCTRL", "Wake on radio control"),
    (0x21, "FREND1", "Front end RX configuration"),
    (0x22, "FREND0", "Front end TX configuration"),
    (0x23, "FSCAL3", "Frequency synthesizer calibration"),
    (0x24, "FSCAL2", "Frequency synthesizer calibration"),
    (0x25, "FSCAL1", "Frequency synthesizer calibration"),
    (0x26, "FSCAL0", "Frequency synthesizer calibration"),
    (0x27, "RCCTRL1", "RC oscillator configuration"),
    (0x28, "RCCTRL0", "RC oscillator configuration"),
    (0x29, "FSTEST", "Frequency synthesizer calibration control"),
    (0x2A, "PTEST", "Production test"),
    (0x2B, "AGCTEST", "AGC test"),
    (0x2C, "TEST2", "Various test settings"),
    (0x2D, "TEST1", "Various test settings"),
    (0x2E, "TEST0", "Various test settings"),
];

// (address, name, description, hot)
const STATUS: &[(u8, &str, &str, bool)] = &[
    (0x30, "PARTNUM", "Part number", false),
    (0x31, "VERSION", "Current version number", false),
    (0x32, "FREQEST", "Frequency offset estimate", false),
    (0x33, "LQI", "Demodulator estimate for link quality", true),
    (0x34, "RSSI", "Received signal strength indication", true),
    (0x35, "MARCSTATE", "Control state machine state", true),
    (0x36, "WORTIME1", "WOR timer, high byte", false),
    (0x37, "WORTIME0", "WOR timer, low byte", false),
    (0x38, "PKTSTATUS", "Current GDOx status and packet status", true),
    (0x39, "VCO_VC_DAC", "Current setting from PLL calibration module", false),
    (0x3A, "TXBYTES", "Underflow and number of bytes in the TX FIFO", true),
    (0x3B, "RXBYTES", "Overflow and number of bytes in the RX FIFO", true),
    (0x3C, "RCCTRL1_STATUS", "Last RC oscillator calibration result", false),
    (0x3D, "RCCTRL0_STATUS", "Last RC oscillator calibration result", false),
];

// (register, mask, name, description)
const FIELDS: &[(&str, u8, &str, &str)] = &[
    ("IOCFG2", 0x40, "GDO2_INV", "Invert output"),
    ("IOCFG2", 0x3F, "GDO2_CFG", "Output selection"),
    ("IOCFG0", 0x40, "GDO0_INV", "Invert output"),
    ("IOCFG0", 0x3F, "GDO0_CFG", "Output selection"),
    ("PKTCTRL1", 0xE0, "PQT", "Preamble quality threshold"),
    ("PKTCTRL1", 0x08, "CRC_AUTOFLUSH", "Flush RX FIFO on bad CRC"),
    ("PKTCTRL1", 0x04, "APPEND_STATUS", "Append RSSI and LQI to payload"),
    ("PKTCTRL1", 0x03, "ADR_CHK", "Address check"),
    ("PKTCTRL0", 0x40, "WHITE_DATA", "Data whitening"),
    ("PKTCTRL0", 0x30, "PKT_FORMAT", "Packet format"),
    ("PKTCTRL0", 0x04, "CRC_EN", "CRC calculation"),
    ("PKTCTRL0", 0x03, "LENGTH_CONFIG", "Packet length mode"),
    ("MDMCFG2", 0x80, "DEM_DCFILT_OFF", "Disable digital DC blocking filter"),
    ("MDMCFG2", 0x70, "MOD_FORMAT", "Modulation format"),
    ("MDMCFG2", 0x08, "MANCHESTER_EN", "Manchester encoding"),
    ("MDMCFG2", 0x07, "SYNC_MODE", "Sync word qualifier mode"),
    ("MCSM1", 0x30, "CCA_MODE", "Clear channel indication"),
    ("MCSM1", 0x0C, "RXOFF_MODE", "State after a packet is received"),
    ("MCSM1", 0x03, "TXOFF_MODE", "State after a packet is sent"),
    ("LQI", 0x80, "CRC_OK", "Last packet CRC matched"),
    ("LQI", 0x7F, "LQI_EST", "Link quality estimate"),
    ("MARCSTATE", 0x1F, "MARC_STATE", "Main radio control state"),
    ("PKTSTATUS", 0x80, "CRC_OK", "Last packet CRC matched"),
    ("PKTSTATUS", 0x40, "CS", "Carrier sense"),
    ("PKTSTATUS", 0x20, "PQT_REACHED", "Preamble quality reached"),
    ("PKTSTATUS", 0x10, "CCA", "Channel is clear"),
    ("PKTSTATUS", 0x08, "SFD", "Start of frame delimiter found"),
    ("PKTSTATUS", 0x04, "GDO2", "Current GDO2 value"),
    ("PKTSTATUS", 0x01, "GDO0", "Current GDO0 value"),
    ("TXBYTES", 0x80, "TXFIFO_UNDERFLOW", "TX FIFO underflowed"),
    ("TXBYTES", 0x7F, "NUM_TXBYTES", "Bytes in TX FIFO"),
    ("RXBYTES", 0x80, "RXFIFO_OVERFLOW", "RX FIFO overflowed"),
    ("RXBYTES", 0x7F, "NUM_RXBYTES", "Bytes in RX FIFO"),
];

/// Values of MARCSTATE.MARC_STATE.
pub mod marc {
    pub const SLEEP: u8 = 0x00;
    pub const IDLE: u8 = 0x01;
    pub const RX: u8 = 0x0D;
    pub const RXFIFO_OVERFLOW: u8 = 0x11;
    pub const TX: u8 = 0x13;
    pub const TXFIFO_UNDERFLOW: u8 = 0x16;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Rx,
    Tx,
}

impl Mode {
    fn strobe(self) -> u32 {
        match self {
            Mode::Idle => SIDLE,
            Mode::Rx => SRX,
            Mode::Tx => STX,
        }
    }

    fn state(self) -> u8 {
        match self {
            Mode::Idle => marc::IDLE,
            Mode::Rx => marc::RX,
            Mode::Tx => marc::TX,
        }
    }
}

fn with_fields(mut reg: Register<u8, u8>) -> Register<u8, u8> {
    let register = reg.name().to_owned();
    for (_, mask, name, description) in FIELDS.iter().filter(|f| f.0 == register) {
        let mut var = Variable::new(*mask, *name).describe(*description);
        if reg.mode() == Access::ReadOnly {
            var = var.access(Access::ReadOnly);
        }
        reg = reg.variable(var);
    }
    reg
}

/// Full CC1101 register map.
pub fn registers() -> Vec<Register<u8, u8>> {
    let config = CONFIG
        .iter()
        .map(|(addr, name, desc)| with_fields(Register::new(*addr, *name).describe(*desc)));
    let status = STATUS.iter().map(|(addr, name, desc, hot)| {
        let reg = Register::new(*addr, *name).read_only().describe(*desc);
        with_fields(if *hot { reg.hot() } else { reg })
    });
    config.chain(status).collect()
}

/// CC1101 in variable-length packet mode, RX after every packet.
#[derive(Debug, Default)]
pub struct Cc1101 {
    mode: Option<Mode>,
}

impl Cc1101 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last mode that converged.
    pub fn mode(&self) -> Option<Mode> {
        self.mode
    }

    fn enter(&mut self, view: &mut DeviceView<'_, Cc1101Map>, mode: Mode) -> Result<bool> {
        view.strobe(mode.strobe())?;
        let ok = view.wait_for("MARCSTATE", Some("MARC_STATE"), &mode.state())?;
        self.mode = ok.then_some(mode);
        Ok(ok)
    }

    fn flush_rx(&mut self, view: &mut DeviceView<'_, Cc1101Map>) -> Result<()> {
        view.strobe(SIDLE)?;
        view.strobe(SFRX)?;
        self.enter(view, Mode::Rx).map(drop)
    }
}

impl Chip for Cc1101 {
    type Map = Cc1101Map;

    fn name(&self) -> &str {
        "CC1101"
    }

    fn build_map(&self) -> core::result::Result<Self::Map, TableError> {
        Cc1101Map::new(registers())
    }

    fn reset(&mut self, view: &mut DeviceView<'_, Self::Map>) -> Result<()> {
        view.strobe(SRES)?;
        self.mode = None;
        view.refresh(false).map(drop)
    }

    fn receive(&mut self, view: &mut DeviceView<'_, Self::Map>, packet: &mut Packet) -> Result<bool> {
        let status = view.read_register("RXBYTES")?;
        let overflow = view.variable_value("RXBYTES", "RXFIFO_OVERFLOW")?;
        if overflow != 0 {
            warn!(device = %view.name(), status, "RX FIFO overflow, flushing");
            self.flush_rx(view)?;
            return Ok(false);
        }

        let pending = view.variable_value("RXBYTES", "NUM_RXBYTES")? as usize;
        if pending == 0 {
            return Ok(false);
        }
        let take = pending.min(PACKET_CAPACITY);
        let data = view.read(FIFO, take)?;
        let _ = packet.extend_from_slice(&data);
        debug!(device = %view.name(), len = take, "packet drained");

        if self.mode == Some(Mode::Rx) {
            // Latched packet status clears once the FIFO is read; pick up the
            // new values for RSSI/LQI displays.
            view.refresh(true)?;
        }
        Ok(true)
    }
}

impl Device<Cc1101> {
    /// Strobes into `mode` and waits for MARCSTATE to follow. A timeout marks
    /// the device unresponsive and returns `Ok(false)`.
    pub fn set_mode(&self, mode: Mode) -> Result<bool> {
        self.with_chip(|chip, view| chip.enter(view, mode))
    }

    pub fn part_number(&self) -> Result<(u8, u8)> {
        self.with_view(|view| Ok((view.value("PARTNUM")?, view.value("VERSION")?)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{device::ConvergencePolicy, table::RegisterMap, test_support::{MockTransport, init_tracing}};

    fn radio() -> (Device<Cc1101>, MockTransport) {
        let bus = MockTransport::bytewise();
        let dev = Device::new(Cc1101::new(), bus.clone(), 0, 0)
            .unwrap()
            .with_policy(ConvergencePolicy {
                attempts: 5,
                backoff: Duration::ZERO,
            });
        (dev, bus)
    }

    #[test]
    fn map_covers_both_blocks() {
        let map = Cc1101::new().build_map().unwrap();
        assert_eq!(map.len(), 47 + 14);
        assert_eq!(map.blocks(false), vec![(0x00, 0x2E), (0x30, 0x3D)]);
        assert_eq!(
            map.blocks(true),
            vec![(0x33, 0x35), (0x38, 0x38), (0x3A, 0x3B)]
        );
    }

    #[test]
    fn snapshot_holds_only_configuration() {
        let (dev, _) = radio();
        let snap = dev.save();
        assert_eq!(snap.registers.len(), 47);
        assert!(snap.registers.contains_key("FREQ2"));
        assert!(!snap.registers.contains_key("RSSI"));
    }

    #[test]
    fn set_mode_converges_on_marcstate() {
        let (dev, bus) = radio();
        bus.on_write(SRX, 0x35, &[marc::RX]);

        assert!(dev.set_mode(Mode::Rx).unwrap());
        assert!(dev.responsive());
        assert_eq!(dev.with_chip(|chip, _| chip.mode()), Some(Mode::Rx));
        assert_eq!(bus.writes()[0], (SRX, vec![]));
    }

    #[test]
    fn stuck_radio_soft_degrades() {
        init_tracing();
        let (dev, bus) = radio();
        bus.poke(0x34, &[0x50]);
        dev.update_frequent().unwrap();
        bus.poke(0x35, &[marc::IDLE]);

        assert!(!dev.set_mode(Mode::Rx).unwrap());
        assert!(!dev.responsive());

        // The last good RSSI is still served.
        bus.poke(0x34, &[0x10]);
        dev.update_frequent().unwrap();
        assert_eq!(dev.with_view(|v| v.read_register("RSSI")).unwrap(), 0x50);
    }

    #[test]
    fn receive_drains_fifo() {
        let (dev, bus) = radio();
        bus.poke(0x3B, &[0x03]);
        bus.script(FIFO, &[&[0x02, 0xAB, 0xCD]]);

        let mut packet = Packet::new();
        assert!(dev.receive(&mut packet).unwrap());
        assert_eq!(&packet[..], &[0x02, 0xAB, 0xCD]);
        assert!(bus.reads().contains(&(FIFO, 3)));
    }

    #[test]
    fn receive_flushes_on_overflow() {
        let (dev, bus) = radio();
        bus.poke(0x3B, &[0x80 | 0x40]);
        bus.on_write(SRX, 0x35, &[marc::RX]);

        let mut packet = Packet::new();
        assert!(!dev.receive(&mut packet).unwrap());
        assert!(packet.is_empty());

        let strobes: Vec<u32> = bus
            .writes()
            .into_iter()
            .filter(|(_, data)| data.is_empty())
            .map(|(addr, _)| addr)
            .collect();
        assert_eq!(strobes, vec![SIDLE, SFRX, SRX]);
        assert!(!bus.reads().iter().any(|(addr, _)| *addr == FIFO));
    }

    #[test]
    fn empty_fifo_yields_nothing() {
        let (dev, _) = radio();
        let mut packet = Packet::new();
        assert!(!dev.receive(&mut packet).unwrap());
    }

    #[test]
    fn reset_strobes_and_reads_identity() {
        let (dev, bus) = radio();
        bus.poke(0x30, &[0x00]);
        bus.poke(0x31, &[0x14]);

        dev.reset().unwrap();

        assert_eq!(bus.writes()[0], (SRES, vec![]));
        assert_eq!(dev.part_number().unwrap(), (0x00, 0x14));
        assert!(!dev.with_cached(|map| map.any_dirty()));
    }
}
