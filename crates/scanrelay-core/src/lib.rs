//! Scan Relay Core Library
//!
//! Periodic WiFi discovery relayed to a single peer over a low-bandwidth
//! notification link.
//!
//! ## Overview
//!
//! Every cycle the relay scans each configured channel, buffers what it
//! found in a bounded [`RecordStore`], serializes the records into one
//! compact envelope, and hands that envelope to the peer in two ways:
//!
//! - **push**: when the peer is subscribed, the envelope is cut into
//!   MTU-sized frames and notified frame by frame ([`ChunkedTransport`])
//! - **pull**: the peer reads the envelope at increasing offsets
//!   ([`ReadResponder`])
//!
//! Radio, advertising and notification primitives sit behind the traits in
//! [`port`]; [`sim`] provides host implementations of all of them.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use scanrelay_core::{
//!     events::event_channel, sim::{LoggingAdvertiser, RecordingSink, SimulatedRadio},
//!     AttrHandle, ChunkedTransport, PeerLink, RelayConfig, ScanCycle,
//! };
//!
//! let config = RelayConfig::default();
//! let (event_tx, _events) = event_channel();
//! let link = PeerLink::new(&config.link, AttrHandle(3), Arc::new(LoggingAdvertiser::new()), event_tx.clone());
//! link.start()?;
//!
//! let mut cycle = ScanCycle::new(
//!     config.scan.clone(),
//!     Box::new(SimulatedRadio::generated(40, 7)),
//!     link,
//!     ChunkedTransport::new(Arc::new(RecordingSink::new())),
//!     event_tx,
//! );
//! let report = cycle.run_once()?;
//! println!("{} records, {}", report.records, report.delivery);
//! ```

pub mod config;
pub mod cycle;
pub mod envelope;
pub mod error;
pub mod events;
pub mod link;
pub mod logging;
pub mod port;
pub mod responder;
pub mod sim;
pub mod store;
pub mod transport;
pub mod types;

// Re-exports
pub use config::{LinkConfig, LoggingConfig, RelayConfig, ScanConfig};
pub use cycle::{CycleReport, ScanCycle};
pub use envelope::{EnvelopeReader, EnvelopeSlot};
pub use error::{
    AdvertiseError, AttError, DriverError, EnvelopeError, PushError, RelayError, RelayResult,
    TransportError,
};
pub use events::{RelayEvent, EVENT_CHANNEL_CAPACITY};
pub use link::{LinkEvent, LinkPhase, LinkSnapshot, PeerLink, PushTarget};
pub use port::{AdvertisingParams, Advertiser, NotifySink, ScanDriver, ScanRequest};
pub use responder::{AccessOp, ReadResponder};
pub use store::{ChannelIntake, RecordStore};
pub use transport::{ChunkedTransport, DeliveryOutcome, FramePlan, Reassembler, SkipReason};
pub use types::*;
