//! Scan cycle orchestrator
//!
//! One cycle: reset the store, scan every configured channel, serialize the
//! store into a fresh envelope, and push it to the peer when it is
//! subscribed. Cycles repeat on a fixed period until shutdown.
//!
//! ```text
//!   ┌─────────┐   records   ┌────────────┐  envelope  ┌─────────────┐
//!   │ driver  │ ──────────► │ RecordStore│ ─────────► │ EnvelopeSlot│
//!   └─────────┘  per chan   └────────────┘   encode   └──────┬──────┘
//!                                                            │
//!                              push (subscribed)  ◄──────────┤
//!                              pull (ReadResponder) ◄────────┘
//! ```
//!
//! The driver blocks, so [`ScanCycle::run`] moves the cycle onto the blocking
//! pool for each iteration and takes it back afterwards.

use bytes::Bytes;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::ScanConfig;
use crate::envelope::{self, EnvelopeReader, EnvelopeSlot};
use crate::error::{DriverError, EnvelopeError, RelayError, RelayResult};
use crate::events::RelayEvent;
use crate::link::PeerLink;
use crate::port::ScanDriver;
use crate::store::{ChannelIntake, RecordStore};
use crate::transport::{ChunkedTransport, DeliveryOutcome, SkipReason};
use crate::types::NetworkRecord;

/// Summary of one finished cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Cycle number, starting at 1
    pub cycle: u64,
    /// Per-channel intake, for channels that scanned successfully
    pub channels: Vec<ChannelIntake>,
    /// Channels whose scan failed (non-fatally)
    pub failed_channels: Vec<u8>,
    /// Records buffered this cycle
    pub records: usize,
    /// Size of the envelope produced, if any
    pub envelope_len: Option<usize>,
    /// Why no envelope was produced despite buffered records
    pub envelope_error: Option<EnvelopeError>,
    /// What happened on the push path
    pub delivery: DeliveryOutcome,
}

impl CycleReport {
    /// Records dropped by the per-channel cap
    pub fn truncated(&self) -> usize {
        self.channels.iter().map(|c| c.truncated).sum()
    }

    /// Records dropped because the store was full
    pub fn overflowed(&self) -> usize {
        self.channels.iter().map(|c| c.overflowed).sum()
    }
}

/// Owner of the record store and the envelope slot
pub struct ScanCycle {
    config: ScanConfig,
    driver: Box<dyn ScanDriver>,
    store: RecordStore,
    envelope: EnvelopeSlot,
    link: PeerLink,
    transport: ChunkedTransport,
    event_tx: broadcast::Sender<RelayEvent>,
    cycle: u64,
    cycle_limit: Option<u64>,
}

impl ScanCycle {
    /// Create an orchestrator; nothing is scanned until the first cycle
    pub fn new(
        config: ScanConfig,
        driver: Box<dyn ScanDriver>,
        link: PeerLink,
        transport: ChunkedTransport,
        event_tx: broadcast::Sender<RelayEvent>,
    ) -> Self {
        let store = RecordStore::new(config.per_channel_cap, config.global_cap);
        Self {
            config,
            driver,
            store,
            envelope: EnvelopeSlot::new(),
            link,
            transport,
            event_tx,
            cycle: 0,
            cycle_limit: None,
        }
    }

    /// Stop [`run`](Self::run) after `limit` cycles
    pub fn with_cycle_limit(mut self, limit: u64) -> Self {
        self.cycle_limit = Some(limit);
        self
    }

    /// Read-only handle to the live envelope, for the pull path
    pub fn envelope_reader(&self) -> EnvelopeReader {
        self.envelope.reader()
    }

    /// Current envelope, if the last cycle produced one
    pub fn envelope(&self) -> Option<Bytes> {
        self.envelope.snapshot()
    }

    /// Records buffered by the last cycle
    pub fn records(&self) -> &[NetworkRecord] {
        self.store.records()
    }

    /// Number of cycles run so far
    pub fn cycles_run(&self) -> u64 {
        self.cycle
    }

    /// Run one full cycle.
    ///
    /// Only a fatal driver error is returned; everything else ends up in the
    /// report.
    pub fn run_once(&mut self) -> RelayResult<CycleReport> {
        self.cycle += 1;
        self.store.reset();
        debug!(cycle = self.cycle, "Scan cycle starting");

        let mut channels = Vec::new();
        let mut failed_channels = Vec::new();
        for channel in self.config.channels() {
            let request = self.config.request_for(channel);
            match self.driver.scan_channel(&request) {
                Ok(found) => {
                    let kept = found.len().min(self.store.per_channel_cap());
                    for (i, record) in found[..kept].iter().enumerate() {
                        info!(
                            "[{:2}] {:<32} RSSI:{:4} CH:{:2} AUTH:{}",
                            i + 1,
                            record.ssid(),
                            record.rssi(),
                            record.channel(),
                            record.auth()
                        );
                    }
                    channels.push(self.store.ingest_channel(channel, found));
                }
                Err(DriverError::Fatal(reason)) => {
                    error!(channel, %reason, "Driver fault, stopping");
                    return Err(RelayError::DriverFatal { channel, reason });
                }
                Err(e) => {
                    warn!(channel, error = %e, "Channel scan failed, continuing");
                    failed_channels.push(channel);
                }
            }
        }

        // The previous envelope must never outlive a new cycle
        self.envelope.clear();
        let (current, envelope_error) = match envelope::encode(self.store.records()) {
            Ok(Some(bytes)) => {
                self.envelope.replace(bytes.clone());
                (Some(bytes), None)
            }
            Ok(None) => (None, None),
            Err(e) => {
                error!(error = %e, "Failed to serialize scan results");
                (None, Some(e))
            }
        };

        info!(
            cycle = self.cycle,
            records = self.store.len(),
            envelope_len = current.as_ref().map_or(0, Bytes::len),
            "Scan done"
        );

        let delivery = self.deliver(current.as_ref());
        let report = CycleReport {
            cycle: self.cycle,
            channels,
            failed_channels,
            records: self.store.len(),
            envelope_len: current.as_ref().map(Bytes::len),
            envelope_error,
            delivery,
        };

        // No subscribers is fine
        let _ = self.event_tx.send(RelayEvent::CycleCompleted(report.clone()));
        Ok(report)
    }

    fn deliver(&self, envelope: Option<&Bytes>) -> DeliveryOutcome {
        let Some(envelope) = envelope else {
            info!("No envelope this cycle, skipping delivery");
            return DeliveryOutcome::Skipped(SkipReason::NoEnvelope);
        };

        match self.link.push_target() {
            Some(target) => self.transport.deliver(&target, envelope),
            None if self.link.phase().is_connected() => {
                debug!("Peer not subscribed, skipping push");
                DeliveryOutcome::Skipped(SkipReason::NotSubscribed)
            }
            None => {
                debug!("No peer connected, skipping push");
                DeliveryOutcome::Skipped(SkipReason::NotConnected)
            }
        }
    }

    /// Run cycles on the configured period until shutdown, the cycle limit,
    /// or a fatal driver error.
    ///
    /// The first cycle starts immediately. A cycle that overruns the period
    /// delays the next one instead of bunching them up. An invalid scan
    /// config (such as a zero period) is rejected before the first cycle.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> RelayResult<()> {
        self.config.validate()?;
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_ms = self.config.interval_ms,
            channels = ?self.config.channels(),
            "Scan loop started"
        );

        let mut cycle = self;
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let (returned, result) = tokio::task::spawn_blocking(move || {
                let result = cycle.run_once();
                (cycle, result)
            })
            .await
            .map_err(|e| RelayError::Task(e.to_string()))?;
            cycle = returned;
            result?;

            if cycle.cycle_limit.is_some_and(|limit| cycle.cycle >= limit) {
                info!(cycles = cycle.cycle, "Cycle limit reached");
                return Ok(());
            }
        }

        info!(cycles = cycle.cycle, "Scan loop stopped");
        Ok(())
    }
}

impl std::fmt::Debug for ScanCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanCycle")
            .field("config", &self.config)
            .field("cycle", &self.cycle)
            .field("records", &self.store.len())
            .field("link", &self.link)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::events::event_channel;
    use crate::link::LinkEvent;
    use crate::logging::{read_instance_entries, JsonlLayer};
    use crate::sim::{LoggingAdvertiser, RecordingSink, SimulatedRadio};
    use crate::types::{AttrHandle, AuthMode, ConnHandle};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tracing_subscriber::layer::SubscriberExt;

    const ATTR: AttrHandle = AttrHandle(3);
    const CONN: ConnHandle = ConnHandle(1);

    fn small_config() -> ScanConfig {
        ScanConfig {
            channel_min: 1,
            channel_max: 3,
            interval_ms: 10,
            ..Default::default()
        }
    }

    fn build(radio: SimulatedRadio) -> (ScanCycle, PeerLink, Arc<RecordingSink>) {
        build_with(small_config(), radio)
    }

    fn build_with(
        config: ScanConfig,
        radio: SimulatedRadio,
    ) -> (ScanCycle, PeerLink, Arc<RecordingSink>) {
        let (tx, _rx) = event_channel();
        let link = PeerLink::new(
            &LinkConfig::default(),
            ATTR,
            Arc::new(LoggingAdvertiser::new()),
            tx.clone(),
        );
        link.start().unwrap();
        let sink = Arc::new(RecordingSink::new());
        let cycle = ScanCycle::new(
            config,
            Box::new(radio),
            link.clone(),
            ChunkedTransport::new(sink.clone()),
            tx,
        );
        (cycle, link, sink)
    }

    fn subscribe(link: &PeerLink) {
        link.handle_event(LinkEvent::Connected { conn: CONN, status: 0 });
        link.handle_event(LinkEvent::Subscribe {
            conn: CONN,
            attr: ATTR,
            notify: true,
        });
    }

    fn radio() -> SimulatedRadio {
        SimulatedRadio::from_records(vec![
            NetworkRecord::new("home", 1, -40, AuthMode::Wpa2Psk),
            NetworkRecord::new("cafe", 3, -70, AuthMode::Open),
        ])
    }

    #[test]
    fn test_cycle_without_peer_keeps_envelope() {
        let (mut cycle, _link, sink) = build(radio());
        let report = cycle.run_once().unwrap();

        assert_eq!(report.records, 2);
        assert_eq!(report.delivery, DeliveryOutcome::Skipped(SkipReason::NotConnected));
        assert!(sink.frames().is_empty());

        let envelope = cycle.envelope().unwrap();
        assert_eq!(envelope::decode(&envelope).unwrap(), cycle.records());
    }

    #[test]
    fn test_cycle_pushes_to_subscribed_peer() {
        let (mut cycle, link, sink) = build(radio());
        subscribe(&link);

        let report = cycle.run_once().unwrap();
        assert!(report.delivery.is_delivered());
        assert!(!sink.frames().is_empty());
    }

    #[test]
    fn test_connected_but_unsubscribed_skips() {
        let (mut cycle, link, _sink) = build(radio());
        link.handle_event(LinkEvent::Connected { conn: CONN, status: 0 });

        let report = cycle.run_once().unwrap();
        assert_eq!(report.delivery, DeliveryOutcome::Skipped(SkipReason::NotSubscribed));
    }

    #[test]
    fn test_empty_scan_clears_previous_envelope() {
        let (mut cycle, _link, _sink) = build(radio());
        cycle.run_once().unwrap();
        assert!(cycle.envelope().is_some());

        cycle.driver = Box::new(SimulatedRadio::from_records(Vec::new()));
        let report = cycle.run_once().unwrap();
        assert_eq!(report.envelope_len, None);
        assert_eq!(report.delivery, DeliveryOutcome::Skipped(SkipReason::NoEnvelope));
        assert!(cycle.envelope().is_none());
    }

    #[test]
    fn test_serialization_failure_leaves_no_envelope() {
        let config = ScanConfig {
            channel_min: 1,
            channel_max: 1,
            per_channel_cap: 70_000,
            global_cap: 70_000,
            ..small_config()
        };
        let (mut cycle, _link, _sink) = build_with(config, radio());
        cycle.run_once().unwrap();
        assert!(cycle.envelope().is_some());

        let crowded = (0..65_536)
            .map(|i| NetworkRecord::new(format!("ap-{i}"), 1, -60, AuthMode::Open))
            .collect();
        cycle.driver = Box::new(SimulatedRadio::from_records(crowded));

        let report = cycle.run_once().unwrap();
        assert_eq!(report.records, 65_536);
        assert_eq!(
            report.envelope_error,
            Some(EnvelopeError::TooManyRecords { count: 65_536 })
        );
        assert_eq!(report.envelope_len, None);
        assert_eq!(report.delivery, DeliveryOutcome::Skipped(SkipReason::NoEnvelope));
        assert!(cycle.envelope().is_none());
    }

    #[test]
    fn test_record_lines_numbered_per_channel() {
        let mut networks: Vec<NetworkRecord> = (0..40)
            .map(|i| NetworkRecord::new(format!("busy-{i}"), 1, -50, AuthMode::Wpa2Psk))
            .collect();
        networks.push(NetworkRecord::new("quiet", 3, -80, AuthMode::Open));
        let (mut cycle, _link, _sink) = build(SimulatedRadio::from_records(networks));

        let temp = TempDir::new().unwrap();
        let layer = JsonlLayer::new(temp.path(), "cycle-log").unwrap();
        let subscriber = tracing_subscriber::registry().with(layer);
        let report = tracing::subscriber::with_default(subscriber, || cycle.run_once().unwrap());
        assert_eq!(report.truncated(), 8);

        let lines: Vec<String> = read_instance_entries(temp.path(), "cycle-log")
            .unwrap()
            .into_iter()
            .map(|entry| entry.msg)
            .filter(|msg| msg.starts_with('['))
            .collect();

        // 32 kept on channel 1, then channel 3 starts again at 1
        assert_eq!(lines.len(), 33);
        assert!(lines[0].starts_with("[ 1] busy-0 "));
        assert!(lines[31].starts_with("[32] busy-31 "));
        assert!(lines[32].starts_with("[ 1] quiet "));
        assert!(lines[32].contains("CH: 3"));
    }

    #[test]
    fn test_channel_failure_continues() {
        let radio = radio().with_failing_channel(2);
        let (mut cycle, _link, _sink) = build(radio);

        let report = cycle.run_once().unwrap();
        assert_eq!(report.failed_channels, vec![2]);
        assert_eq!(report.records, 2);
        assert_eq!(report.channels.len(), 2);
    }

    #[test]
    fn test_fatal_driver_error_stops() {
        let radio = radio().with_fatal_channel(2);
        let (mut cycle, _link, _sink) = build(radio);

        let err = cycle.run_once().unwrap_err();
        assert!(matches!(err, RelayError::DriverFatal { channel: 2, .. }));
    }

    #[tokio::test]
    async fn test_run_stops_at_cycle_limit() {
        let (tx, mut rx) = event_channel();
        let link = PeerLink::new(
            &LinkConfig::default(),
            ATTR,
            Arc::new(LoggingAdvertiser::new()),
            tx.clone(),
        );
        let cycle = ScanCycle::new(
            small_config(),
            Box::new(radio()),
            link,
            ChunkedTransport::new(Arc::new(RecordingSink::new())),
            tx,
        )
        .with_cycle_limit(2);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        cycle.run(shutdown_rx).await.unwrap();

        let mut completed = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let RelayEvent::CycleCompleted(report) = event {
                completed.push(report.cycle);
            }
        }
        assert_eq!(completed, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_run_rejects_zero_interval() {
        let config = ScanConfig {
            interval_ms: 0,
            ..small_config()
        };
        let (cycle, _link, _sink) = build_with(config, radio());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let err = cycle.run(shutdown_rx).await.unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (cycle, _link, _sink) = build(radio());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        shutdown_tx.send(true).unwrap();
        cycle.run(shutdown_rx).await.unwrap();
    }
}
