//! End-to-end relay pipeline tests
//!
//! Wires a [`ScanCycle`] to a [`SimulatedRadio`], a [`PeerLink`] driven by its
//! event loop, and a [`SimulatedCentral`] acting as the peer, then checks what
//! the peer actually receives over the push and pull paths.

use std::sync::Arc;
use std::time::Duration;

use scanrelay_core::envelope;
use scanrelay_core::events::event_channel;
use scanrelay_core::sim::{LoggingAdvertiser, RecordingSink, SimulatedCentral, SimulatedRadio};
use scanrelay_core::transport::FramePlan;
use scanrelay_core::{
    AttError, AttrHandle, AuthMode, ChunkedTransport, ConnHandle, DeliveryOutcome, LinkConfig,
    LinkPhase, NetworkRecord, PeerLink, PushError, ReadResponder, RelayError, RelayEvent,
    ScanConfig, ScanCycle, SkipReason,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

const ATTR: AttrHandle = AttrHandle(3);
const CONN: ConnHandle = ConnHandle(1);

// ============================================================================
// Harness
// ============================================================================

struct Relay {
    cycle: ScanCycle,
    link: PeerLink,
    advertiser: Arc<LoggingAdvertiser>,
    central: Arc<SimulatedCentral>,
    responder: ReadResponder,
    events: broadcast::Receiver<RelayEvent>,
    shutdown_tx: watch::Sender<bool>,
    link_task: JoinHandle<()>,
}

impl Relay {
    async fn shutdown(self) {
        self.shutdown_tx.send(true).unwrap();
        self.link_task.await.unwrap();
    }
}

fn relay_with(radio: SimulatedRadio, scan: ScanConfig) -> Relay {
    let (event_tx, events) = event_channel();
    let (link_tx, link_rx) = mpsc::channel(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let advertiser = Arc::new(LoggingAdvertiser::new());
    let link = PeerLink::new(&LinkConfig::default(), ATTR, advertiser.clone(), event_tx.clone());
    link.start().unwrap();
    let link_task = link.clone().spawn_event_loop(link_rx, shutdown_rx);

    let central = Arc::new(SimulatedCentral::new(CONN, ATTR, link_tx));
    let cycle = ScanCycle::new(
        scan,
        Box::new(radio),
        link.clone(),
        ChunkedTransport::new(central.clone()),
        event_tx,
    );
    let responder = ReadResponder::new(cycle.envelope_reader());

    Relay {
        cycle,
        link,
        advertiser,
        central,
        responder,
        events,
        shutdown_tx,
        link_task,
    }
}

fn relay(radio: SimulatedRadio) -> Relay {
    relay_with(radio, ScanConfig::default())
}

async fn wait_for_phase(link: &PeerLink, phase: LinkPhase) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while link.phase() != phase {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("link never reached {:?}, stuck in {:?}", phase, link.phase()));
}

async fn subscribe(relay: &Relay, mtu: u16) {
    relay.central.connect().await.unwrap();
    relay.central.exchange_mtu(mtu).await.unwrap();
    relay.central.subscribe().await.unwrap();
    wait_for_phase(&relay.link, LinkPhase::ConnectedSubscribed).await;
}

fn neighbourhood() -> Vec<NetworkRecord> {
    vec![
        NetworkRecord::new("home", 1, -41, AuthMode::Wpa2Psk),
        NetworkRecord::new("upstairs", 1, -67, AuthMode::Wpa2Wpa3Psk),
        NetworkRecord::new("", 6, -80, AuthMode::Open),
        NetworkRecord::new("cafe-guest", 6, -72, AuthMode::Open),
        NetworkRecord::new("corp", 11, -58, AuthMode::Wpa2Enterprise),
        NetworkRecord::new("printer", 13, -88, AuthMode::Wep),
    ]
}

fn crowded_channel(channel: u8, count: usize) -> Vec<NetworkRecord> {
    (0..count)
        .map(|i| NetworkRecord::new(format!("ap-{:02}", i), channel, -50, AuthMode::WpaPsk))
        .collect()
}

// ============================================================================
// Push Path
// ============================================================================

#[tokio::test]
async fn test_subscribed_peer_receives_cycle_records() {
    let mut relay = relay(SimulatedRadio::from_records(neighbourhood()));
    subscribe(&relay, 23).await;

    let report = relay.cycle.run_once().unwrap();
    assert!(report.delivery.is_delivered(), "delivery: {}", report.delivery);

    let received = relay.central.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0], relay.cycle.records());
    assert_eq!(received[0].len(), 6);
    assert_eq!(relay.central.rejected(), 0);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_frame_count_follows_negotiated_mtu() {
    for mtu in [23u16, 64, 185, 247] {
        let mut relay = relay(SimulatedRadio::from_records(neighbourhood()));
        subscribe(&relay, mtu).await;

        let report = relay.cycle.run_once().unwrap();
        let len = report.envelope_len.unwrap();
        let expected = FramePlan::for_mtu(mtu, len).unwrap().frame_count();
        match report.delivery {
            DeliveryOutcome::Delivered { frames, bytes, .. } => {
                assert_eq!(frames, expected, "mtu {}", mtu);
                assert_eq!(bytes, len);
            }
            other => panic!("mtu {}: unexpected {:?}", mtu, other),
        }
        assert_eq!(relay.central.received().len(), 1);

        relay.shutdown().await;
    }
}

#[tokio::test]
async fn test_crowded_channel_keeps_first_32() {
    let mut relay = relay(SimulatedRadio::from_records(crowded_channel(6, 40)));
    subscribe(&relay, 185).await;

    let report = relay.cycle.run_once().unwrap();
    assert_eq!(report.records, 32);
    assert_eq!(report.truncated(), 8);

    let received = &relay.central.received()[0];
    let names: Vec<String> = received
        .iter()
        .map(|r| r.ssid().to_string_lossy().into_owned())
        .collect();
    let expected: Vec<String> = (0..32).map(|i| format!("ap-{:02}", i)).collect();
    assert_eq!(names, expected);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_global_cap_bounds_envelope() {
    let records: Vec<NetworkRecord> = (1..=13).flat_map(|ch| crowded_channel(ch, 30)).collect();
    let mut relay = relay(SimulatedRadio::from_records(records));
    subscribe(&relay, 247).await;

    let report = relay.cycle.run_once().unwrap();
    assert_eq!(report.records, 256);
    assert_eq!(report.overflowed(), 13 * 30 - 256);

    let received = &relay.central.received()[0];
    assert_eq!(received.len(), 256);
    assert_eq!(received[0].channel(), 1);
    assert_eq!(received[255].channel(), 9);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_raw_ssid_bytes_survive_relay() {
    let odd = vec![
        NetworkRecord::new([0xff, 0xfe, b'x'], 3, -60, AuthMode::Open),
        NetworkRecord::new([b'a'; 32], 3, -61, AuthMode::from_code(77)),
    ];
    let mut relay = relay(SimulatedRadio::from_records(odd.clone()));
    subscribe(&relay, 23).await;

    relay.cycle.run_once().unwrap();
    assert_eq!(relay.central.received()[0], odd);
    assert_eq!(relay.central.received()[0][1].auth(), AuthMode::Unknown);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_unsubscribed_peer_gets_nothing() {
    let mut relay = relay(SimulatedRadio::from_records(neighbourhood()));
    subscribe(&relay, 23).await;
    relay.central.unsubscribe().await.unwrap();
    wait_for_phase(&relay.link, LinkPhase::ConnectedUnsubscribed).await;

    let report = relay.cycle.run_once().unwrap();
    assert_eq!(report.delivery, DeliveryOutcome::Skipped(SkipReason::NotSubscribed));
    assert!(relay.central.received().is_empty());

    relay.shutdown().await;
}

#[tokio::test]
async fn test_failed_push_aborts_and_next_cycle_starts_over() {
    let (event_tx, _events) = event_channel();
    let link = PeerLink::new(
        &LinkConfig::default(),
        ATTR,
        Arc::new(LoggingAdvertiser::new()),
        event_tx.clone(),
    );
    link.start().unwrap();
    link.handle_event(scanrelay_core::LinkEvent::Connected { conn: CONN, status: 0 });
    link.handle_event(scanrelay_core::LinkEvent::Subscribe {
        conn: CONN,
        attr: ATTR,
        notify: true,
    });

    let sink = Arc::new(RecordingSink::new());
    sink.fail_after(2);
    let mut cycle = ScanCycle::new(
        ScanConfig::default(),
        Box::new(SimulatedRadio::from_records(neighbourhood())),
        link,
        ChunkedTransport::new(sink.clone()),
        event_tx,
    );

    let report = cycle.run_once().unwrap();
    assert_eq!(
        report.delivery,
        DeliveryOutcome::Aborted {
            frames_sent: 2,
            offset: 32,
            error: PushError::NoBuffers
        }
    );
    assert_eq!(sink.frames().len(), 2);

    // Nothing is retried; the next cycle sends a fresh envelope from offset 0
    sink.clear();
    sink.fail_after(usize::MAX);
    let report = cycle.run_once().unwrap();
    assert!(report.delivery.is_delivered());
    assert_eq!(&sink.frames()[0][2..4], &[0, 0]);
}

// ============================================================================
// Connection Lifecycle
// ============================================================================

#[tokio::test]
async fn test_disconnect_restarts_advertising_and_stops_push() {
    let mut relay = relay(SimulatedRadio::from_records(neighbourhood()));
    subscribe(&relay, 185).await;
    assert_eq!(relay.advertiser.starts(), 1);

    relay.central.disconnect(0x13).await.unwrap();
    wait_for_phase(&relay.link, LinkPhase::Advertising).await;
    assert_eq!(relay.advertiser.starts(), 2);

    let snapshot = relay.link.snapshot();
    assert!(!snapshot.subscribed);
    assert_eq!(snapshot.mtu, 23);

    // A stray subscribe after the disconnect changes nothing
    relay.central.subscribe().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(relay.link.phase(), LinkPhase::Advertising);

    let report = relay.cycle.run_once().unwrap();
    assert_eq!(report.delivery, DeliveryOutcome::Skipped(SkipReason::NotConnected));
    assert!(relay.central.received().is_empty());

    relay.shutdown().await;
}

#[tokio::test]
async fn test_failed_connect_readvertises() {
    let relay = relay(SimulatedRadio::from_records(neighbourhood()));

    relay.central.fail_connect(0x3e).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while relay.advertiser.starts() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(relay.link.phase(), LinkPhase::Advertising);

    relay.shutdown().await;
}

#[tokio::test]
async fn test_link_changes_are_published() {
    let mut relay = relay(SimulatedRadio::from_records(neighbourhood()));
    // Disconnected -> Advertising from start()
    assert!(matches!(
        relay.events.recv().await.unwrap(),
        RelayEvent::LinkChanged { to: LinkPhase::Advertising, .. }
    ));

    subscribe(&relay, 23).await;
    let mut phases = Vec::new();
    while let Ok(RelayEvent::LinkChanged { to, .. }) = relay.events.try_recv() {
        phases.push(to);
    }
    assert_eq!(
        phases,
        vec![LinkPhase::ConnectedUnsubscribed, LinkPhase::ConnectedSubscribed]
    );

    relay.cycle.run_once().unwrap();
    assert!(matches!(
        relay.events.recv().await.unwrap(),
        RelayEvent::CycleCompleted(report) if report.delivery.is_delivered()
    ));

    relay.shutdown().await;
}

// ============================================================================
// Pull Path
// ============================================================================

#[tokio::test]
async fn test_pull_reads_whole_envelope() {
    let mut relay = relay(SimulatedRadio::from_records(neighbourhood()));
    relay.cycle.run_once().unwrap();

    let pulled = relay.central.pull_envelope(&relay.responder).unwrap();
    assert_eq!(Some(pulled.clone()), relay.cycle.envelope());
    assert_eq!(envelope::decode(&pulled).unwrap(), relay.cycle.records());

    relay.shutdown().await;
}

#[tokio::test]
async fn test_pull_without_envelope_is_empty() {
    let mut relay = relay(SimulatedRadio::from_records(Vec::new()));
    let report = relay.cycle.run_once().unwrap();
    assert_eq!(report.envelope_len, None);

    let pulled = relay.central.pull_envelope(&relay.responder).unwrap();
    assert!(pulled.is_empty());

    relay.shutdown().await;
}

#[tokio::test]
async fn test_pull_spanning_cycles_sees_newer_envelope() {
    let mut relay = relay(SimulatedRadio::from_records(neighbourhood()));
    relay.cycle.run_once().unwrap();
    let first = relay.responder.read(0).unwrap();

    relay.cycle.run_once().unwrap();
    let second = relay.responder.read(0).unwrap();

    // The earlier snapshot stays intact
    assert_eq!(envelope::decode(&first).unwrap().len(), 6);
    assert_eq!(first, second);

    let len = second.len() as u16;
    assert_eq!(
        relay.responder.read(len),
        Err(AttError::InvalidOffset {
            offset: len,
            len: len as usize
        })
    );
    assert_eq!(relay.responder.read(len - 1).unwrap().len(), 1);

    relay.shutdown().await;
}

// ============================================================================
// Scan Loop
// ============================================================================

#[tokio::test]
async fn test_run_loop_delivers_every_cycle() {
    let scan = ScanConfig {
        interval_ms: 20,
        ..Default::default()
    };
    let relay = relay_with(SimulatedRadio::from_records(neighbourhood()), scan);
    subscribe(&relay, 64).await;

    let central = relay.central.clone();
    let (_stop_tx, stop_rx) = watch::channel(false);
    relay.cycle.with_cycle_limit(3).run(stop_rx).await.unwrap();

    assert_eq!(central.received().len(), 3);
    relay.shutdown_tx.send(true).unwrap();
    relay.link_task.await.unwrap();
}

#[tokio::test]
async fn test_fatal_driver_error_ends_run_loop() {
    let radio = SimulatedRadio::from_records(neighbourhood()).with_fatal_channel(11);
    let relay = relay(radio);

    let (_stop_tx, stop_rx) = watch::channel(false);
    let err = relay.cycle.run(stop_rx).await.unwrap_err();
    assert!(matches!(err, RelayError::DriverFatal { channel: 11, .. }));

    relay.shutdown_tx.send(true).unwrap();
    relay.link_task.await.unwrap();
}

#[tokio::test]
async fn test_failing_channels_do_not_stop_cycle() {
    let radio = SimulatedRadio::from_records(neighbourhood())
        .with_failing_channel(1)
        .with_failing_channel(13);
    let mut relay = relay(radio);
    subscribe(&relay, 23).await;

    let report = relay.cycle.run_once().unwrap();
    assert_eq!(report.failed_channels, vec![1, 13]);
    assert_eq!(report.records, 3);
    assert!(report.delivery.is_delivered());

    relay.shutdown().await;
}
