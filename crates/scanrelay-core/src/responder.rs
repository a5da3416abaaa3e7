//! Offset-read responder for the pull path
//!
//! A peer that prefers reads over notifications fetches the envelope with
//! long reads: each read at `offset` answers with the envelope tail from that
//! offset, and the peer advances by however much it received.

use bytes::{BufMut, Bytes};
use tracing::debug;

use crate::envelope::EnvelopeReader;
use crate::error::AttError;

/// Kind of access the stack forwarded to the delivery characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOp {
    /// Characteristic value read
    ReadChr,
    /// Characteristic value write
    WriteChr,
    /// Descriptor read
    ReadDsc,
    /// Descriptor write
    WriteDsc,
}

/// Serves reads of the current envelope
#[derive(Debug, Clone)]
pub struct ReadResponder {
    envelope: EnvelopeReader,
}

impl ReadResponder {
    /// Create a responder over the live envelope
    pub fn new(envelope: EnvelopeReader) -> Self {
        Self { envelope }
    }

    /// Envelope bytes from `offset` to the end.
    ///
    /// No envelope answers with an empty value. An offset at or past the end
    /// is [`AttError::InvalidOffset`].
    pub fn read(&self, offset: u16) -> Result<Bytes, AttError> {
        let Some(envelope) = self.envelope.snapshot() else {
            debug!(offset, "Read with no envelope available");
            return Ok(Bytes::new());
        };

        let start = usize::from(offset);
        if start >= envelope.len() {
            return Err(AttError::InvalidOffset {
                offset,
                len: envelope.len(),
            });
        }
        Ok(envelope.slice(start..))
    }

    /// Handle one stack access callback, appending the answer to `out`
    pub fn access<B: BufMut>(
        &self,
        op: AccessOp,
        offset: u16,
        out: &mut B,
    ) -> Result<usize, AttError> {
        if op != AccessOp::ReadChr {
            debug!(?op, "Unsupported access on delivery characteristic");
            return Err(AttError::Unlikely);
        }

        let value = self.read(offset)?;
        if out.remaining_mut() < value.len() {
            return Err(AttError::InsufficientResources);
        }
        out.put_slice(&value);
        Ok(value.len())
    }
}
