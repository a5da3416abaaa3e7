//! Scan result envelope
//!
//! One envelope is produced per scan cycle from the record store. It is the
//! unit both delivery paths work on: the chunked transport pushes it in
//! frames, the read responder serves slices of it.
//!
//! ## Wire Format
//!
//! All multi-byte integers are little-endian.
//!
//! ```text
//! +--------------+-----------------------------------------------------+
//! | record_count | record_count x record                               |
//! | (u16)        |                                                     |
//! +--------------+-----------------------------------------------------+
//!
//! record:
//! +--------+----------------+---------+--------+----------+
//! | id_len | id_bytes       | channel | signal | auth_tag |
//! | (u8)   | (id_len bytes) | (u8)    | (i8)   | (u8)     |
//! +--------+----------------+---------+--------+----------+
//! ```
//!
//! `auth_tag` is [`AuthMode::code`]; unknown tags decode as
//! [`AuthMode::Unknown`].
//!
//! ## Ownership
//!
//! The scan cycle holds the only [`EnvelopeSlot`]; everyone else gets an
//! [`EnvelopeReader`]. An envelope is an immutable [`Bytes`], so a reader that
//! took a snapshot keeps a valid buffer even if the cycle replaces the slot
//! contents right after.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes};
use parking_lot::RwLock;

use crate::error::EnvelopeError;
use crate::types::{AuthMode, NetworkRecord};

/// Size of the leading record count
pub const COUNT_LEN: usize = 2;

/// Per-record bytes besides the identifier: id_len, channel, signal, auth_tag
const RECORD_FIXED_LEN: usize = 4;

/// Largest record count the count field can carry
pub const MAX_RECORDS: usize = u16::MAX as usize;

/// One record flattened into wire fields
struct StagedRecord<'a> {
    id: &'a [u8],
    channel: u8,
    signal: i8,
    auth_tag: u8,
}

/// Encode records into an envelope.
///
/// Returns `Ok(None)` for an empty record set: there is nothing to deliver,
/// and the cycle treats this as "no envelope".
///
/// # Errors
///
/// - [`EnvelopeError::TooManyRecords`] if the count does not fit the u16 field
/// - [`EnvelopeError::Allocation`] if the output buffer cannot be reserved
pub fn encode(records: &[NetworkRecord]) -> Result<Option<Bytes>, EnvelopeError> {
    if records.is_empty() {
        return Ok(None);
    }
    if records.len() > MAX_RECORDS {
        return Err(EnvelopeError::TooManyRecords {
            count: records.len(),
        });
    }

    let staged: Vec<StagedRecord<'_>> = records
        .iter()
        .map(|r| StagedRecord {
            id: r.ssid().as_bytes(),
            channel: r.channel(),
            signal: r.rssi(),
            auth_tag: r.auth().code(),
        })
        .collect();

    let size = encoded_len(&staged);
    let mut buf: Vec<u8> = Vec::new();
    buf.try_reserve_exact(size)
        .map_err(|_| EnvelopeError::Allocation { bytes: size })?;

    buf.put_u16_le(staged.len() as u16);
    for rec in &staged {
        buf.put_u8(rec.id.len() as u8);
        buf.put_slice(rec.id);
        buf.put_u8(rec.channel);
        buf.put_i8(rec.signal);
        buf.put_u8(rec.auth_tag);
    }

    debug_assert_eq!(buf.len(), size);
    Ok(Some(Bytes::from(buf)))
}

fn encoded_len(staged: &[StagedRecord<'_>]) -> usize {
    COUNT_LEN
        + staged
            .iter()
            .map(|r| RECORD_FIXED_LEN + r.id.len())
            .sum::<usize>()
}

/// Decode an envelope back into records.
///
/// An empty input is the "no envelope" case and yields no records.
///
/// # Errors
///
/// - [`EnvelopeError::Truncated`] if the input ends inside a field
/// - [`EnvelopeError::TrailingBytes`] if bytes remain after the last record
pub fn decode(bytes: &[u8]) -> Result<Vec<NetworkRecord>, EnvelopeError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }

    let total = bytes.len();
    let mut buf = bytes;
    let position = |buf: &[u8]| total - buf.remaining();

    ensure(buf, COUNT_LEN, position(buf))?;
    let count = buf.get_u16_le() as usize;

    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        ensure(buf, 1, position(buf))?;
        let id_len = buf.get_u8() as usize;

        ensure(buf, id_len + RECORD_FIXED_LEN - 1, position(buf))?;
        let (id, rest) = buf.split_at(id_len);
        buf = rest;
        let channel = buf.get_u8();
        let signal = buf.get_i8();
        let auth = AuthMode::from_code(buf.get_u8());

        records.push(NetworkRecord::new(id, channel, signal, auth));
    }

    if buf.has_remaining() {
        return Err(EnvelopeError::TrailingBytes {
            extra: buf.remaining(),
        });
    }

    Ok(records)
}

fn ensure(buf: &[u8], needed: usize, offset: usize) -> Result<(), EnvelopeError> {
    if buf.remaining() < needed {
        return Err(EnvelopeError::Truncated {
            offset,
            needed: needed - buf.remaining(),
        });
    }
    Ok(())
}

/// Holder of the single live envelope, owned by the scan cycle
#[derive(Debug, Default)]
pub struct EnvelopeSlot {
    current: Arc<RwLock<Option<Bytes>>>,
}

impl EnvelopeSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the current envelope, leaving the slot empty
    pub fn clear(&mut self) {
        self.current.write().take();
    }

    /// Install a new envelope, returning the one it replaced
    pub fn replace(&mut self, envelope: Bytes) -> Option<Bytes> {
        self.current.write().replace(envelope)
    }

    /// Current envelope, if any
    pub fn snapshot(&self) -> Option<Bytes> {
        self.current.read().clone()
    }

    /// Read-only handle for the pull path
    pub fn reader(&self) -> EnvelopeReader {
        EnvelopeReader {
            current: Arc::clone(&self.current),
        }
    }
}

/// Read-only view of the live envelope
#[derive(Debug, Clone)]
pub struct EnvelopeReader {
    current: Arc<RwLock<Option<Bytes>>>,
}

impl EnvelopeReader {
    /// Current envelope, if any. The returned buffer stays valid after the
    /// slot is replaced.
    pub fn snapshot(&self) -> Option<Bytes> {
        self.current.read().clone()
    }

    /// Length of the current envelope, zero when absent
    pub fn len(&self) -> usize {
        self.current.read().as_ref().map_or(0, Bytes::len)
    }

    /// Whether no envelope is available
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
