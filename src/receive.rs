//! Packet boundary between chips and protocol decoders.
//!
//! Decoding is someone else's business; this module only guarantees that a
//! malformed payload is logged with its raw bytes and never stops the pipeline.

use tracing::{debug, warn};

use crate::{
    device::{Chip, Device, Packet},
    error::{DecodeError, Result},
    value::encode_hex,
};

/// Turns one raw packet into a protocol message.
pub trait Decoder: Send {
    type Message;

    fn decode(&mut self, raw: &[u8]) -> core::result::Result<Self::Message, DecodeError>;
}

/// Outcome of pulling one packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received<M> {
    /// The chip had nothing buffered.
    Empty,
    Message(M),
    /// A packet arrived but did not decode; already logged.
    Rejected(DecodeError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    pub decoded: u64,
    pub rejected: u64,
}

/// Pulls packets from a device and hands them to a decoder.
#[derive(Debug)]
pub struct ReceivePipeline<D> {
    decoder: D,
    packet: Packet,
    stats: ReceiveStats,
}

impl<D: Decoder> ReceivePipeline<D> {
    /// Upper bound on packets taken by one [`ReceivePipeline::drain`].
    pub const MAX_DRAIN: usize = 32;

    pub fn new(decoder: D) -> Self {
        Self {
            decoder,
            packet: Packet::new(),
            stats: ReceiveStats::default(),
        }
    }

    pub fn stats(&self) -> ReceiveStats {
        self.stats
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// Pulls and decodes at most one packet.
    pub fn poll<C: Chip>(&mut self, device: &Device<C>) -> Result<Received<D::Message>> {
        if !device.receive(&mut self.packet)? {
            return Ok(Received::Empty);
        }
        match self.decoder.decode(&self.packet) {
            Ok(message) => {
                self.stats.decoded += 1;
                debug!(device = %device.name(), len = self.packet.len(), "packet decoded");
                Ok(Received::Message(message))
            }
            Err(err) => {
                self.stats.rejected += 1;
                warn!(
                    device = %device.name(),
                    raw = %encode_hex(&err.raw),
                    reason = %err.reason,
                    "dropping undecodable packet"
                );
                Ok(Received::Rejected(err))
            }
        }
    }

    /// Pulls packets until the chip is empty, passing each decoded message to
    /// `sink`. Returns the number of messages delivered.
    pub fn drain<C: Chip>(
        &mut self,
        device: &Device<C>,
        mut sink: impl FnMut(D::Message),
    ) -> Result<usize> {
        let mut delivered = 0;
        for _ in 0..Self::MAX_DRAIN {
            match self.poll(device)? {
                Received::Empty => break,
                Received::Message(message) => {
                    sink(message);
                    delivered += 1;
                }
                Received::Rejected(_) => {}
            }
        }
        Ok(delivered)
    }
}
