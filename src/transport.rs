//! Byte-level transport boundary.
//!
//! The raw SPI/I2C drivers live outside this crate. A chip's transport turns an
//! address plus a byte count into whatever framing the bus needs: a header byte
//! with read and burst bits on SPI, a register pointer write on I2C, or a command
//! opcode followed by a response poll for API-command radios.

use crate::error::TransportError;

/// Blocking read/write channel to one physical chip.
///
/// Implementations are owned exclusively by one [`Device`](crate::device::Device)
/// and only ever called with the device mutex held, so they need `Send` but not
/// `Sync`.
pub trait Transport: Send {
    /// Fills `buf` with `buf.len()` bytes read starting at `address`.
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), TransportError>;

    /// Writes `data` starting at `address`. An empty `data` is a bare command
    /// (a strobe on chips that have them).
    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), TransportError> {
        (**self).read(address, buf)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), TransportError> {
        (**self).write(address, data)
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), TransportError> {
        (**self).read(address, buf)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), TransportError> {
        (**self).write(address, data)
    }
}
