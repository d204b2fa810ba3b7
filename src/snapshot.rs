//! Config snapshot file format.
//!
//! One JSON file per device:
//!
//! ```text
//! { "device": { "name": "CC1101", "bus": 0, "address": 0 },
//!   "registers": { "FREQ2": "21", "FREQ1": "65", ... } }
//! ```
//!
//! Values are hex strings of exactly two characters per register byte.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// Identity of a device on its bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub bus: u32,
    pub address: u32,
}

impl DeviceInfo {
    pub fn new(name: impl Into<String>, bus: u32, address: u32) -> Self {
        Self {
            name: name.into(),
            bus,
            address,
        }
    }
}

/// Serialized register configuration of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub device: DeviceInfo,
    #[serde(default)]
    pub registers: BTreeMap<String, String>,
}

impl Snapshot {
    pub fn new(device: DeviceInfo) -> Self {
        Self {
            device,
            registers: BTreeMap::new(),
        }
    }

    /// Fails with [`SchemaError::DeviceMismatch`] unless the snapshot was taken
    /// from a device called `live_name`.
    pub fn check_device(&self, live_name: &str) -> Result<(), SchemaError> {
        if self.device.name != live_name {
            return Err(SchemaError::DeviceMismatch {
                expected: live_name.to_owned(),
                found: self.device.name.clone(),
            });
        }
        Ok(())
    }

    pub fn from_reader(reader: impl Read) -> Result<Self, SchemaError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn to_writer(&self, writer: impl Write) -> Result<(), SchemaError> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<(), SchemaError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.to_writer(&mut writer)?;
        writer.flush()?;
        Ok(())
    }
}
