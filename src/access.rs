use serde::{Deserialize, Serialize};

/// Controls whether a register or field may be read from or written to hardware.
pub trait AccessPolicy {
    /// Returns true if a scalar read through the transport is allowed.
    fn can_read(&self) -> bool;
    /// Returns true if a write through the transport is allowed.
    fn can_write(&self) -> bool;
}

/// Hardware access mode of a register or variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Access {
    #[serde(rename = "RO")]
    ReadOnly,
    #[serde(rename = "WO")]
    WriteOnly,
    #[default]
    #[serde(rename = "RW")]
    ReadWrite,
}

impl Access {
    /// Short label used in diagnostic listings.
    pub const fn label(self) -> &'static str {
        match self {
            Access::ReadOnly => "RO",
            Access::WriteOnly => "WO",
            Access::ReadWrite => "RW",
        }
    }
}

impl AccessPolicy for Access {
    fn can_read(&self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }

    fn can_write(&self) -> bool {
        matches!(self, Access::WriteOnly | Access::ReadWrite)
    }
}

impl core::fmt::Display for Access {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}
