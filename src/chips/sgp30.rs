//! Sensirion SGP30 air-quality sensor (I2C, 16-bit command words).
//!
//! Every register is a command whose response is a run of big-endian words,
//! each followed by a CRC-8 byte. Cached values keep the raw frames, CRCs
//! included, so a snapshot can replay them verbatim.

use std::time::{Duration, Instant};

use crc::{CRC_8_NRSC_5, Crc};
use tracing::debug;

use crate::{
    device::{Chip, Device, DeviceView},
    error::{Error, Operation, Result, TableError, TransportError},
    register::{Register, Variable},
    slice::RWSlice,
    table::{RegisterTable, VariableWidthRegisterTable},
    value::Bytes,
};

pub type Sgp30Map = VariableWidthRegisterTable<u16>;

pub const INIT_AIR_QUALITY: u16 = 0x2003;
pub const MEASURE_IAQ: u16 = 0x2008;
pub const GET_IAQ_BASELINE: u16 = 0x2015;
pub const SET_IAQ_BASELINE: u16 = 0x201E;
pub const GET_FEATURE_SET: u16 = 0x202F;
pub const MEASURE_RAW: u16 = 0x2050;
pub const GET_SERIAL_ID: u16 = 0x3682;

/// IAQ measurements must be issued once per second to keep the on-chip
/// baseline compensation running.
pub const MEASURE_INTERVAL: Duration = Duration::from_secs(1);

const WORD_FRAME: usize = 3;

/// CRC-8 used on every data word: polynomial 0x31, init 0xFF.
const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_NRSC_5);

pub fn crc8(data: &[u8]) -> u8 {
    CRC8.checksum(data)
}

/// Splits a response into words, checking each CRC.
pub fn words(address: u16, frame: &[u8]) -> core::result::Result<Vec<u16>, TransportError> {
    if frame.len() % WORD_FRAME != 0 {
        return Err(TransportError::ShortTransfer {
            address: u32::from(address),
            expected: frame.len().next_multiple_of(WORD_FRAME),
            actual: frame.len(),
        });
    }
    frame
        .chunks(WORD_FRAME)
        .map(|chunk| {
            if crc8(&chunk[..2]) != chunk[2] {
                return Err(TransportError::Checksum {
                    address: u32::from(address),
                });
            }
            Ok(u16::from_be_bytes([chunk[0], chunk[1]]))
        })
        .collect()
}

/// Frames words with their CRCs, ready to be written or cached.
pub fn frame(words: &[u16]) -> Bytes {
    let mut raw = vec![0u8; words.len() * WORD_FRAME];
    let mut out = RWSlice::new(&mut raw);
    for (i, word) in words.iter().enumerate() {
        let at = i * WORD_FRAME;
        out.write_u16_be_at(at, *word);
        out.write_u8_at(at + 2, crc8(&word.to_be_bytes()));
    }
    Bytes::new(raw)
}

fn word_mask(index: usize, count: usize) -> Bytes {
    let mut mask = vec![0u8; count * WORD_FRAME];
    mask[index * WORD_FRAME] = 0xFF;
    mask[index * WORD_FRAME + 1] = 0xFF;
    Bytes::new(mask)
}

pub fn registers() -> Vec<Register<u16, Bytes>> {
    vec![
        Register::new(MEASURE_IAQ, "MEASURE_IAQ")
            .width(6)
            .read_only()
            .describe("CO2eq [ppm] and TVOC [ppb]")
            .variable(Variable::new(word_mask(0, 2), "CO2EQ"))
            .variable(Variable::new(word_mask(1, 2), "TVOC")),
        Register::new(GET_IAQ_BASELINE, "GET_IAQ_BASELINE")
            .width(6)
            .read_only(),
        Register::new(SET_IAQ_BASELINE, "SET_IAQ_BASELINE")
            .width(6)
            .write_only()
            .describe("Baseline restored after power-up (TVOC word first)"),
        Register::new(GET_FEATURE_SET, "GET_FEATURE_SET")
            .width(3)
            .read_only(),
        Register::new(MEASURE_RAW, "MEASURE_RAW")
            .width(6)
            .read_only()
            .describe("Raw H2 and ethanol signals"),
        Register::new(GET_SERIAL_ID, "GET_SERIAL_ID")
            .width(9)
            .read_only(),
    ]
}

/// One decoded IAQ measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AirQuality {
    pub co2eq_ppm: u16,
    pub tvoc_ppb: u16,
}

#[derive(Debug, Default)]
pub struct Sgp30 {
    last_measure: Option<Instant>,
}

impl Sgp30 {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads `name` and checks the CRC of every word. Only a frame that
    /// passes is cached; while unresponsive the cached frame is returned.
    fn read_checked(view: &mut DeviceView<'_, Sgp30Map>, name: &str) -> Result<Vec<u16>> {
        let reg = view
            .map()
            .find(name)
            .ok_or_else(|| Error::UnknownRegister(name.to_owned()))?;
        if !reg.readable() {
            return Err(Error::access(name, Operation::Read));
        }
        let (address, width) = (reg.address(), reg.byte_width());

        if !view.responsive() {
            let cached = view.map().value(name)?;
            return Ok(words(address, cached.as_slice())?);
        }

        let bus = view.map().base() + u32::from(address);
        let raw = view.read(bus, width)?;
        let decoded = words(address, &raw)?;
        view.map_mut().store(name, Bytes::new(raw))?;
        Ok(decoded)
    }
}

impl Chip for Sgp30 {
    type Map = Sgp30Map;

    fn name(&self) -> &str {
        "SGP30"
    }

    fn build_map(&self) -> core::result::Result<Self::Map, TableError> {
        RegisterTable::new(registers())
    }

    fn reset(&mut self, view: &mut DeviceView<'_, Self::Map>) -> Result<()> {
        view.strobe(u32::from(INIT_AIR_QUALITY))?;
        self.last_measure = None;
        let serial = Self::read_checked(view, "GET_SERIAL_ID")?;
        let features = Self::read_checked(view, "GET_FEATURE_SET")?;
        debug!(device = %view.name(), ?serial, ?features, "air quality init");
        Ok(())
    }

    fn update_timed(&mut self, view: &mut DeviceView<'_, Self::Map>, now: Instant) -> Result<()> {
        if self
            .last_measure
            .is_some_and(|last| now.saturating_duration_since(last) < MEASURE_INTERVAL)
        {
            return Ok(());
        }
        self.last_measure = Some(now);
        Self::read_checked(view, "MEASURE_IAQ").map(drop)
    }

    // Measurements are timed; nothing to poll on the fast tier.
    fn update_frequent(&mut self, _view: &mut DeviceView<'_, Self::Map>) -> Result<()> {
        Ok(())
    }

    /// Reads the baseline and stages it for restore, swapped into the order
    /// the set command expects.
    fn update_infrequent(&mut self, view: &mut DeviceView<'_, Self::Map>) -> Result<()> {
        if !view.responsive() {
            return Ok(());
        }
        let baseline = Self::read_checked(view, "GET_IAQ_BASELINE")?;
        Self::read_checked(view, "GET_FEATURE_SET")?;
        if let [co2eq, tvoc] = baseline[..] {
            view.map_mut().store("SET_IAQ_BASELINE", frame(&[tvoc, co2eq]))?;
        }
        Ok(())
    }
}

impl Device<Sgp30> {
    /// Last measurement from the cache, or `None` before the first one.
    pub fn air_quality(&self) -> Result<Option<AirQuality>> {
        self.with_cached(|map| {
            let raw = map.value("MEASURE_IAQ")?;
            if raw.as_slice().iter().all(|b| *b == 0) {
                return Ok(None);
            }
            match words(MEASURE_IAQ, raw.as_slice())?[..] {
                [co2eq_ppm, tvoc_ppb] => Ok(Some(AirQuality {
                    co2eq_ppm,
                    tvoc_ppb,
                })),
                _ => Ok(None),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{table::RegisterMap, test_support::MockTransport, value::RegisterValue};

    fn sensor() -> (Device<Sgp30>, MockTransport) {
        let bus = MockTransport::vectors();
        let dev = Device::new(Sgp30::new(), bus.clone(), 1, 0x58).unwrap();
        (dev, bus)
    }

    #[test]
    fn crc_matches_datasheet_example() {
        assert_eq!(crc8(&[0xBE, 0xEF]), 0x92);
        assert_eq!(frame(&[0xBEEF]).as_slice(), &[0xBE, 0xEF, 0x92]);
    }

    #[test]
    fn words_reject_bad_crc() {
        assert_eq!(words(MEASURE_IAQ, &[0xBE, 0xEF, 0x92]).unwrap(), vec![0xBEEF]);
        assert!(matches!(
            words(MEASURE_IAQ, &[0xBE, 0xEF, 0x93]),
            Err(TransportError::Checksum { address: 0x2008 })
        ));
        assert!(matches!(
            words(MEASURE_IAQ, &[0xBE, 0xEF]),
            Err(TransportError::ShortTransfer { expected: 3, .. })
        ));
    }

    #[test]
    fn timed_update_measures_once_per_second() {
        let (dev, bus) = sensor();
        bus.poke(u32::from(MEASURE_IAQ), frame(&[450, 12]).as_slice());
        assert_eq!(dev.air_quality().unwrap(), None);

        let start = Instant::now();
        dev.update_timed(start).unwrap();
        dev.update_timed(start + Duration::from_millis(500)).unwrap();
        assert_eq!(bus.reads(), vec![(0x2008, 6)]);

        dev.update_timed(start + Duration::from_millis(1000)).unwrap();
        assert_eq!(bus.reads().len(), 2);
        assert_eq!(
            dev.air_quality().unwrap(),
            Some(AirQuality {
                co2eq_ppm: 450,
                tvoc_ppb: 12
            })
        );
    }

    #[test]
    fn corrupted_measurement_is_transient() {
        let (dev, bus) = sensor();
        bus.poke(u32::from(MEASURE_IAQ), &[0x01, 0xC2, 0x00, 0x00, 0x0C, 0x00]);
        let err = dev.update_timed(Instant::now()).unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(
            err,
            Error::Transport(TransportError::Checksum { .. })
        ));
    }

    #[test]
    fn corrupted_measurement_keeps_last_good_value() {
        let (dev, bus) = sensor();
        bus.poke(u32::from(MEASURE_IAQ), frame(&[450, 12]).as_slice());
        let start = Instant::now();
        dev.update_timed(start).unwrap();

        bus.poke(u32::from(MEASURE_IAQ), &[0x01, 0xC2, 0x00, 0x00, 0x0C, 0x00]);
        assert!(dev.update_timed(start + MEASURE_INTERVAL).is_err());

        assert_eq!(
            dev.air_quality().unwrap(),
            Some(AirQuality {
                co2eq_ppm: 450,
                tvoc_ppb: 12
            })
        );
        let row = dev.rows().into_iter().find(|r| r.name == "MEASURE_IAQ").unwrap();
        assert_eq!(row.value, frame(&[450, 12]).to_hex());
    }

    #[test]
    fn frequent_tier_is_silent() {
        let (dev, bus) = sensor();
        dev.update_frequent().unwrap();
        assert!(bus.log().is_empty());
    }

    #[test]
    fn infrequent_update_stages_swapped_baseline() {
        let (dev, bus) = sensor();
        bus.poke(u32::from(GET_IAQ_BASELINE), frame(&[0x8A1B, 0x8C2D]).as_slice());
        bus.poke(u32::from(GET_FEATURE_SET), frame(&[0x0022]).as_slice());

        dev.update_infrequent().unwrap();

        assert_eq!(
            bus.reads(),
            vec![(0x2015, 6), (0x202F, 3)]
        );
        let snap = dev.save();
        assert_eq!(snap.registers["SET_IAQ_BASELINE"], frame(&[0x8C2D, 0x8A1B]).to_hex());

        // Restoring on a fresh sensor writes the frame back verbatim.
        let (fresh, fresh_bus) = sensor();
        fresh.load(&snap).unwrap();
        assert_eq!(
            fresh_bus.writes(),
            vec![(0x201E, frame(&[0x8C2D, 0x8A1B]).into_vec())]
        );
        assert!(!fresh.with_cached(|m| m.any_dirty()));
    }

    #[test]
    fn reset_initialises_then_reads_identity() {
        let (dev, bus) = sensor();
        bus.poke(u32::from(GET_SERIAL_ID), frame(&[0, 0x0148, 0xA2F3]).as_slice());
        bus.poke(u32::from(GET_FEATURE_SET), frame(&[0x0022]).as_slice());

        dev.reset().unwrap();

        assert_eq!(bus.writes(), vec![(0x2003, vec![])]);
        assert_eq!(bus.reads(), vec![(0x3682, 9), (0x202F, 3)]);
    }

    #[test]
    fn variables_mask_each_word() {
        let (dev, bus) = sensor();
        bus.poke(u32::from(MEASURE_IAQ), frame(&[0x01C2, 0x000C]).as_slice());
        dev.update_timed(Instant::now()).unwrap();

        let tvoc = dev
            .with_cached(|m| m.variable_value("MEASURE_IAQ", "TVOC"))
            .unwrap();
        assert_eq!(tvoc.view().read_u16_be_at(4), Some(0x000C));
    }
}
