//! Per-cycle buffer of discovered networks
//!
//! Records are kept in discovery order: channels ascending, then the order the
//! driver reported them within a channel. Two caps bound the buffer:
//!
//! - **per-channel**: anything past the cap within one channel is dropped
//! - **global**: once the buffer is full, later records are not accepted
//!
//! Neither cap is an error; both only show up in logs and in the
//! [`ChannelIntake`] returned for each channel.

use tracing::{debug, info};

use crate::types::NetworkRecord;

/// Outcome of feeding one channel's scan results into the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelIntake {
    /// Channel the results came from
    pub channel: u8,
    /// Records reported by the driver
    pub discovered: usize,
    /// Records dropped by the per-channel cap
    pub truncated: usize,
    /// Records dropped because the store was full
    pub overflowed: usize,
    /// Records appended to the store
    pub accepted: usize,
}

/// Fixed-capacity record buffer owned by the scan cycle
#[derive(Debug, Clone)]
pub struct RecordStore {
    records: Vec<NetworkRecord>,
    per_channel_cap: usize,
    global_cap: usize,
}

impl RecordStore {
    /// Create an empty store with the given caps
    pub fn new(per_channel_cap: usize, global_cap: usize) -> Self {
        Self {
            records: Vec::with_capacity(global_cap),
            per_channel_cap,
            global_cap,
        }
    }

    /// Drop every record from the previous cycle
    pub fn reset(&mut self) {
        self.records.clear();
    }

    /// Append one channel's results, applying both caps
    pub fn ingest_channel(
        &mut self,
        channel: u8,
        mut discovered: Vec<NetworkRecord>,
    ) -> ChannelIntake {
        let mut intake = ChannelIntake {
            channel,
            discovered: discovered.len(),
            ..Default::default()
        };

        if discovered.len() > self.per_channel_cap {
            info!(
                channel,
                found = discovered.len(),
                cap = self.per_channel_cap,
                "Channel over per-channel cap, truncating"
            );
            intake.truncated = discovered.len() - self.per_channel_cap;
            discovered.truncate(self.per_channel_cap);
        }

        let room = self.remaining();
        if discovered.len() > room {
            intake.overflowed = discovered.len() - room;
            discovered.truncate(room);
            debug!(
                channel,
                dropped = intake.overflowed,
                cap = self.global_cap,
                "Record store full"
            );
        }

        intake.accepted = discovered.len();
        self.records.extend(discovered);
        intake
    }

    /// Records buffered this cycle, in discovery order
    pub fn records(&self) -> &[NetworkRecord] {
        &self.records
    }

    /// Number of buffered records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing was buffered this cycle
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether the global cap has been reached
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.global_cap
    }

    /// Free slots before the global cap
    pub fn remaining(&self) -> usize {
        self.global_cap.saturating_sub(self.records.len())
    }

    /// Per-channel cap
    pub fn per_channel_cap(&self) -> usize {
        self.per_channel_cap
    }

    /// Global cap
    pub fn global_cap(&self) -> usize {
        self.global_cap
    }
}
