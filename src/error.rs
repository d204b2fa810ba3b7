//! Error types.
//!
//! Only [`Error::AccessViolation`] and [`SchemaError`] are meant to reach the
//! immediate caller as hard failures. [`TransportError`] is absorbed at the
//! device/scheduler boundary, and [`DecodeError`] at the packet boundary.

use std::io;

use thiserror::Error;

use crate::value::encode_hex;

/// Result type alias for register and device operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Failure talking to hardware.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error on bus address {address:#06x}: {source}")]
    Io {
        address: u32,
        #[source]
        source: io::Error,
    },

    #[error("device did not acknowledge address {address:#06x}")]
    Nack { address: u32 },

    #[error("short transfer at {address:#06x}: expected {expected} bytes, got {actual}")]
    ShortTransfer {
        address: u32,
        expected: usize,
        actual: usize,
    },

    #[error("checksum mismatch in data read from {address:#06x}")]
    Checksum { address: u32 },

    #[error("edge source closed")]
    Disconnected,
}

impl TransportError {
    pub fn io(address: u32, source: io::Error) -> Self {
        Self::Io { address, source }
    }
}

/// Register operation named in an [`Error::AccessViolation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
}

impl core::fmt::Display for Operation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Operation::Read => write!(f, "read"),
            Operation::Write => write!(f, "write"),
        }
    }
}

/// Inconsistent register table declaration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("address {0} declared twice")]
    DuplicateAddress(String),

    #[error("register name `{0}` declared twice")]
    DuplicateName(String),

    #[error("sub-table `{0}` declared twice")]
    DuplicateTable(String),

    #[error("table declares {count} registers, at most {max} are supported")]
    TooManyRegisters { count: usize, max: usize },

    #[error("register `{register}` is {declared} bytes wide, its value type holds {expected}")]
    WidthMismatch {
        register: String,
        declared: usize,
        expected: usize,
    },

    #[error("register `{0}` has zero width")]
    ZeroWidth(String),

    #[error("variable `{variable}` of `{register}` has a mask wider than the register")]
    MaskTooWide { register: String, variable: String },

    #[error("variable `{variable}` of `{register}` has an empty mask")]
    EmptyMask { register: String, variable: String },
}

/// Config snapshot inconsistency. A load that fails with any of these leaves the
/// table untouched.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("snapshot is for device `{found}`, live device is `{expected}`")]
    DeviceMismatch { expected: String, found: String },

    #[error("snapshot names unknown register `{0}`")]
    UnknownRegister(String),

    #[error("register `{register}` expects {expected} hex characters, got {found}")]
    InvalidValueLength {
        register: String,
        expected: usize,
        found: usize,
    },

    #[error("register `{register}` has a non-hex value `{value}`")]
    InvalidHex { register: String, value: String },

    #[error("register `{0}` is not writeable")]
    NotWriteable(String),

    #[error("malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Unreadable monitor config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Top-level error for register and device operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("{operation} of register `{register}` is not permitted")]
    AccessViolation {
        register: String,
        operation: Operation,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("no register `{0}`")]
    UnknownRegister(String),

    #[error("register `{register}` has no variable `{variable}`")]
    UnknownVariable { register: String, variable: String },

    #[error("no sub-table `{0}`")]
    UnknownTable(String),

    #[error("value for `{register}` is {found} bytes, expected {expected}")]
    ValueLength {
        register: String,
        expected: usize,
        found: usize,
    },
}

impl Error {
    pub(crate) fn access(register: &str, operation: Operation) -> Self {
        Self::AccessViolation {
            register: register.to_owned(),
            operation,
        }
    }

    /// True for failures the monitoring loop should log and ride out.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

/// Malformed received payload, raised by decoder collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot decode {}-byte payload [{}]: {reason}", .raw.len(), encode_hex(.raw))]
pub struct DecodeError {
    pub reason: String,
    pub raw: Vec<u8>,
}

impl DecodeError {
    pub fn new(reason: impl Into<String>, raw: &[u8]) -> Self {
        Self {
            reason: reason.into(),
            raw: raw.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_name_the_register() {
        let err = Error::access("PARTNUM", Operation::Write);
        assert_eq!(err.to_string(), "write of register `PARTNUM` is not permitted");

        let err = SchemaError::InvalidValueLength {
            register: "FREQ2".into(),
            expected: 2,
            found: 4,
        };
        assert!(err.to_string().contains("FREQ2"));
    }

    #[test]
    fn decode_error_keeps_raw_bytes() {
        let err = DecodeError::new("bad crc", &[0xDE, 0xAD]);
        assert_eq!(err.raw, vec![0xDE, 0xAD]);
        assert!(err.to_string().contains("DEAD"));
    }

    #[test]
    fn only_transport_errors_are_transient() {
        let err: Error = TransportError::Nack { address: 0x30 }.into();
        assert!(err.is_transient());
        assert!(!Error::UnknownRegister("X".into()).is_transient());
    }
}
