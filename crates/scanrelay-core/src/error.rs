//! Error types for scanrelay
//!
//! Errors fall into three groups:
//!
//! - **Fatal**: [`RelayError`] values that leave the scan cycle or the node
//!   (driver faults, link bring-up failures, bad configuration).
//! - **Cycle-local**: [`EnvelopeError`], [`TransportError`], [`PushError`] and
//!   non-fatal [`DriverError`]s. These are logged and folded into the
//!   [`CycleReport`](crate::cycle::CycleReport); they never stop the node.
//! - **Peer-protocol**: [`AttError`], answered back to the peer with its ATT code.

use thiserror::Error;

use crate::types::ConnHandle;

/// Main error type for relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// The discovery driver reported a condition it cannot recover from
    #[error("Driver fault on channel {channel}: {reason}")]
    DriverFatal {
        /// Channel being scanned when the fault was raised
        channel: u8,
        /// Driver-provided description
        reason: String,
    },

    /// Advertising could not be started at bring-up
    #[error("Advertising error: {0}")]
    Advertising(#[from] AdvertiseError),

    /// Envelope encoding or decoding failed
    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// Frame planning or reassembly failed
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration is missing or inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (config or fixture) error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A background task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(String),
}

/// Result type alias using RelayError
pub type RelayResult<T> = Result<T, RelayError>;

/// Failure reported by a discovery driver for one channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The radio is unusable; the node must stop
    #[error("radio fault: {0}")]
    Fatal(String),

    /// This channel's scan failed; the next channel may still succeed
    #[error("scan on channel {channel} failed: {reason}")]
    Channel {
        /// Channel that failed
        channel: u8,
        /// Driver-provided description
        reason: String,
    },
}

impl DriverError {
    /// Whether the failure should terminate the node
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::Fatal(_))
    }
}

/// Failure of a single notification push
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    /// No peer is connected under this handle
    #[error("no connection with handle {0}")]
    NotConnected(ConnHandle),

    /// The stack refused the notification
    #[error("notify rejected by stack (rc={0})")]
    Rejected(i32),

    /// The stack ran out of buffers for the frame
    #[error("out of notify buffers")]
    NoBuffers,
}

/// Failure to start advertising
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdvertiseError {
    /// Advertising fields were rejected
    #[error("advertising fields rejected (rc={0})")]
    Fields(i32),

    /// Advertising start was rejected
    #[error("advertising start rejected (rc={0})")]
    Start(i32),
}

/// Envelope encoding and decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The staging buffer could not be allocated
    #[error("could not allocate {bytes} bytes for envelope")]
    Allocation {
        /// Requested size
        bytes: usize,
    },

    /// More records than the 16-bit count field can carry
    #[error("{count} records exceed the envelope count field")]
    TooManyRecords {
        /// Number of records offered
        count: usize,
    },

    /// The input ended inside a record
    #[error("envelope truncated at byte {offset}: need {needed} more")]
    Truncated {
        /// Position where decoding stopped
        offset: usize,
        /// Bytes missing
        needed: usize,
    },

    /// Bytes left over after the declared records
    #[error("{extra} trailing bytes after last record")]
    TrailingBytes {
        /// Number of unread bytes
        extra: usize,
    },
}

/// Frame planning and reassembly errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Negotiated MTU leaves no room for payload after the frame header
    #[error("MTU {mtu} too small for notify payload (max payload {max_payload})")]
    MtuTooSmall {
        /// Negotiated MTU
        mtu: u16,
        /// MTU minus ATT overhead
        max_payload: u16,
    },

    /// Chunk size of zero requested
    #[error("chunk size must be positive")]
    ZeroChunk,

    /// Frame shorter than its header
    #[error("frame of {len} bytes is shorter than the frame header")]
    FrameTooShort {
        /// Received frame length
        len: usize,
    },

    /// Frame arrived at an unexpected offset
    #[error("frame offset {got} out of order (expected {expected})")]
    OutOfOrder {
        /// Next offset the reassembler was waiting for
        expected: u16,
        /// Offset carried by the frame
        got: u16,
    },

    /// Frame announced a different total length than the transfer in progress
    #[error("frame total length {got} does not match transfer length {expected}")]
    LengthMismatch {
        /// Length announced by the first frame
        expected: u16,
        /// Length carried by this frame
        got: u16,
    },

    /// Frame payload runs past the announced total length
    #[error("frame payload overruns transfer: offset {offset} + {len} > {total}")]
    Overrun {
        /// Frame offset
        offset: u16,
        /// Payload length
        len: usize,
        /// Announced total length
        total: u16,
    },
}

/// Errors answered to the peer on the pull-read path
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttError {
    /// Read offset at or past the end of the envelope
    #[error("invalid offset {offset} (envelope is {len} bytes)")]
    InvalidOffset {
        /// Requested offset
        offset: u16,
        /// Current envelope length
        len: usize,
    },

    /// Operation not supported on the delivery characteristic
    #[error("unsupported access on delivery characteristic")]
    Unlikely,

    /// Response buffer could not hold the reply
    #[error("insufficient resources for read response")]
    InsufficientResources,
}

impl AttError {
    /// ATT protocol error code sent back to the peer
    pub fn code(&self) -> u8 {
        match self {
            AttError::InvalidOffset { .. } => 0x07,
            AttError::Unlikely => 0x0E,
            AttError::InsufficientResources => 0x11,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::DriverFatal {
            channel: 6,
            reason: "phy timeout".to_string(),
        };
        assert_eq!(format!("{}", err), "Driver fault on channel 6: phy timeout");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let relay_err: RelayError = io_err.into();
        assert!(matches!(relay_err, RelayError::Io(_)));
    }

    #[test]
    fn test_driver_error_fatality() {
        assert!(DriverError::Fatal("dead".into()).is_fatal());
        assert!(!DriverError::Channel {
            channel: 3,
            reason: "busy".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_att_error_codes() {
        assert_eq!(AttError::InvalidOffset { offset: 4, len: 4 }.code(), 0x07);
        assert_eq!(AttError::Unlikely.code(), 0x0E);
        assert_eq!(AttError::InsufficientResources.code(), 0x11);
    }
}
