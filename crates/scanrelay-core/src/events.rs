//! Relay event types
//!
//! Consumers (the node binary, tests, a future UI) subscribe to a
//! `broadcast` channel of [`RelayEvent`]s to follow the relay without
//! polling it.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  RelayEvent                                                 │
//! │  ├── CycleCompleted: one scan cycle finished                │
//! │  └── LinkChanged: peer link moved to another phase          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use tokio::sync::broadcast;

use crate::cycle::CycleReport;
use crate::link::LinkPhase;

/// Default capacity for the event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Notifications about relay activity
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// A scan cycle finished
    CycleCompleted(CycleReport),
    /// The peer link changed phase
    LinkChanged {
        /// Phase before the change
        from: LinkPhase,
        /// Phase after the change
        to: LinkPhase,
    },
}

impl fmt::Display for RelayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayEvent::CycleCompleted(report) => write!(
                f,
                "cycle {} completed: {} records, {}",
                report.cycle, report.records, report.delivery
            ),
            RelayEvent::LinkChanged { from, to } => write!(f, "link {} -> {}", from, to),
        }
    }
}

/// Create the relay event channel
pub fn event_channel() -> (broadcast::Sender<RelayEvent>, broadcast::Receiver<RelayEvent>) {
    broadcast::channel(EVENT_CHANNEL_CAPACITY)
}
