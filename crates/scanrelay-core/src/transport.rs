//! Chunked notification transport
//!
//! An envelope usually does not fit into one notification, so it is pushed
//! as a sequence of frames sized to the negotiated MTU.
//!
//! ## Frame Format
//!
//! ```text
//! +-----------+----------+----------------------------+
//! | total_len | offset   | payload                    |
//! | (u16 LE)  | (u16 LE) | envelope[offset..offset+n] |
//! +-----------+----------+----------------------------+
//! ```
//!
//! Every frame of a transfer carries the same `total_len`; offsets ascend
//! strictly and payloads tile `0..total_len` without gaps. The 16-bit length
//! field caps a transfer at 65535 bytes: anything past that is not sent.
//!
//! ## Sizing
//!
//! ```text
//! max_payload = mtu - 3          (ATT notification overhead)
//! chunk_size  = max_payload - 4  (frame header)
//! ```
//!
//! An MTU of 0 is read as the protocol default of 23. If `max_payload` is 4 or
//! less no frame can carry payload and the transfer is skipped.

use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::error::{PushError, TransportError};
use crate::link::{PushTarget, DEFAULT_ATT_MTU};
use crate::port::NotifySink;

/// Bytes the ATT layer adds to every notification
pub const ATT_NOTIFY_OVERHEAD: u16 = 3;

/// Bytes of `total_len` + `offset` at the start of each frame
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest transfer the length field can describe
pub const MAX_WIRE_LEN: usize = u16::MAX as usize;

/// Usable notification payload for an MTU
pub fn max_payload(mtu: u16) -> u16 {
    let mtu = if mtu == 0 { DEFAULT_ATT_MTU } else { mtu };
    mtu.saturating_sub(ATT_NOTIFY_OVERHEAD)
}

/// How one envelope is cut into frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePlan {
    chunk_size: usize,
    total_len: u16,
    source_len: usize,
}

impl FramePlan {
    /// Plan a transfer of `len` bytes over a link with the given MTU
    pub fn for_mtu(mtu: u16, len: usize) -> Result<Self, TransportError> {
        let max_payload = max_payload(mtu);
        if usize::from(max_payload) <= FRAME_HEADER_LEN {
            return Err(TransportError::MtuTooSmall { mtu, max_payload });
        }
        Self::new(usize::from(max_payload) - FRAME_HEADER_LEN, len)
    }

    /// Plan a transfer of `len` bytes with an explicit payload size per frame
    pub fn new(chunk_size: usize, len: usize) -> Result<Self, TransportError> {
        if chunk_size == 0 {
            return Err(TransportError::ZeroChunk);
        }
        Ok(Self {
            chunk_size,
            total_len: len.min(MAX_WIRE_LEN) as u16,
            source_len: len,
        })
    }

    /// Payload bytes per full frame
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Bytes actually transferred
    pub fn total_len(&self) -> u16 {
        self.total_len
    }

    /// Whether the source was longer than the length field allows
    pub fn is_truncated(&self) -> bool {
        self.source_len > MAX_WIRE_LEN
    }

    /// Number of frames in the transfer
    pub fn frame_count(&self) -> usize {
        usize::from(self.total_len).div_ceil(self.chunk_size)
    }

    /// Frames over `envelope`, in send order
    pub fn frames<'a>(&self, envelope: &'a [u8]) -> Frames<'a> {
        let end = usize::from(self.total_len).min(envelope.len());
        Frames {
            data: &envelope[..end],
            total_len: self.total_len,
            chunk_size: self.chunk_size,
            offset: 0,
        }
    }
}

/// Iterator over the frames of one transfer
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    data: &'a [u8],
    total_len: u16,
    chunk_size: usize,
    offset: usize,
}

impl<'a> Iterator for Frames<'a> {
    type Item = Frame<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }
        let end = (self.offset + self.chunk_size).min(self.data.len());
        let frame = Frame {
            total_len: self.total_len,
            offset: self.offset as u16,
            payload: &self.data[self.offset..end],
        };
        self.offset = end;
        Some(frame)
    }
}

/// One frame, borrowing its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Length of the whole transfer
    pub total_len: u16,
    /// Position of `payload` within the transfer
    pub offset: u16,
    /// Transfer bytes carried by this frame
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Serialize header and payload
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        buf.put_u16_le(self.total_len);
        buf.put_u16_le(self.offset);
        buf.put_slice(self.payload);
        buf.freeze()
    }

    /// Parse a received frame
    pub fn decode(bytes: &'a [u8]) -> Result<Self, TransportError> {
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(TransportError::FrameTooShort { len: bytes.len() });
        }
        let (mut header, payload) = bytes.split_at(FRAME_HEADER_LEN);
        Ok(Self {
            total_len: header.get_u16_le(),
            offset: header.get_u16_le(),
            payload,
        })
    }

    /// Encoded size
    pub fn wire_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }
}

/// Why a cycle did not push anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The cycle produced no envelope
    NoEnvelope,
    /// No peer connected
    NotConnected,
    /// Peer connected but not subscribed
    NotSubscribed,
    /// MTU leaves no room for payload
    MtuTooSmall {
        /// Negotiated MTU
        mtu: u16,
    },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoEnvelope => write!(f, "no envelope"),
            SkipReason::NotConnected => write!(f, "no peer connected"),
            SkipReason::NotSubscribed => write!(f, "peer not subscribed"),
            SkipReason::MtuTooSmall { mtu } => write!(f, "MTU {} too small", mtu),
        }
    }
}

/// Result of one push delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Nothing was pushed
    Skipped(SkipReason),
    /// Every frame was accepted
    Delivered {
        /// Frames pushed
        frames: usize,
        /// Envelope bytes pushed
        bytes: usize,
        /// Whether the envelope was cut at the length field limit
        truncated: bool,
    },
    /// A push failed; later frames were not sent
    Aborted {
        /// Frames accepted before the failure
        frames_sent: usize,
        /// Offset of the frame that failed
        offset: u16,
        /// Push failure
        error: PushError,
    },
}

impl DeliveryOutcome {
    /// Whether the whole envelope reached the peer
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryOutcome::Skipped(reason) => write!(f, "skipped ({})", reason),
            DeliveryOutcome::Delivered { frames, bytes, .. } => {
                write!(f, "delivered {} bytes in {} frames", bytes, frames)
            }
            DeliveryOutcome::Aborted {
                frames_sent,
                offset,
                error,
            } => write!(
                f,
                "aborted at offset {} after {} frames: {}",
                offset, frames_sent, error
            ),
        }
    }
}

/// Pushes envelopes to the subscribed peer frame by frame
#[derive(Clone)]
pub struct ChunkedTransport {
    sink: Arc<dyn NotifySink>,
}

impl ChunkedTransport {
    /// Create a transport over a notification sink
    pub fn new(sink: Arc<dyn NotifySink>) -> Self {
        Self { sink }
    }

    /// Push `envelope` to `target`.
    ///
    /// Frames go out one at a time in ascending offset order. The first
    /// failed push ends the transfer; nothing is retried.
    pub fn deliver(&self, target: &PushTarget, envelope: &[u8]) -> DeliveryOutcome {
        if envelope.is_empty() {
            return DeliveryOutcome::Skipped(SkipReason::NoEnvelope);
        }

        let plan = match FramePlan::for_mtu(target.mtu, envelope.len()) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(mtu = target.mtu, error = %e, "Not sending envelope");
                return DeliveryOutcome::Skipped(SkipReason::MtuTooSmall { mtu: target.mtu });
            }
        };

        if plan.is_truncated() {
            warn!(
                len = envelope.len(),
                sent = plan.total_len(),
                "Envelope exceeds frame length field, truncating"
            );
        }

        let mut frames_sent = 0;
        for frame in plan.frames(envelope) {
            let wire = frame.encode();
            if let Err(error) = self.sink.notify(target.conn, target.attr, &wire) {
                warn!(
                    conn = %target.conn,
                    offset = frame.offset,
                    error = %error,
                    "Notify failed, aborting transfer"
                );
                return DeliveryOutcome::Aborted {
                    frames_sent,
                    offset: frame.offset,
                    error,
                };
            }
            debug!(offset = frame.offset, len = frame.payload.len(), "Frame sent");
            frames_sent += 1;
        }

        info!(
            conn = %target.conn,
            frames = frames_sent,
            bytes = plan.total_len(),
            mtu = target.mtu,
            "Envelope pushed"
        );
        DeliveryOutcome::Delivered {
            frames: frames_sent,
            bytes: usize::from(plan.total_len()),
            truncated: plan.is_truncated(),
        }
    }
}

impl fmt::Debug for ChunkedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedTransport").finish_non_exhaustive()
    }
}

/// Receiver-side frame reassembly.
///
/// A frame at offset 0 starts a new transfer and drops any partial one.
/// Any error also drops the partial transfer.
#[derive(Debug, Default)]
pub struct Reassembler {
    buf: BytesMut,
    total_len: Option<u16>,
}

impl Reassembler {
    /// Create an idle reassembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one received frame; returns the transfer once it is complete
    pub fn push(&mut self, bytes: &[u8]) -> Result<Option<Bytes>, TransportError> {
        let frame = Frame::decode(bytes)?;
        let result = self.accept(&frame);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn accept(&mut self, frame: &Frame<'_>) -> Result<Option<Bytes>, TransportError> {
        if frame.offset == 0 {
            self.buf.clear();
            self.total_len = Some(frame.total_len);
        }

        let total = self.total_len.ok_or(TransportError::OutOfOrder {
            expected: 0,
            got: frame.offset,
        })?;
        if frame.total_len != total {
            return Err(TransportError::LengthMismatch {
                expected: total,
                got: frame.total_len,
            });
        }
        if usize::from(frame.offset) != self.buf.len() {
            return Err(TransportError::OutOfOrder {
                expected: self.buf.len() as u16,
                got: frame.offset,
            });
        }
        if usize::from(frame.offset) + frame.payload.len() > usize::from(total) {
            return Err(TransportError::Overrun {
                offset: frame.offset,
                len: frame.payload.len(),
                total,
            });
        }

        self.buf.extend_from_slice(frame.payload);
        if self.buf.len() == usize::from(total) {
            self.total_len = None;
            return Ok(Some(self.buf.split().freeze()));
        }
        Ok(None)
    }

    /// Bytes received so far for the transfer in progress
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partial transfer
    pub fn reset(&mut self) {
        self.buf.clear();
        self.total_len = None;
    }
}
