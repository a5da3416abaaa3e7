//! Scan relay node
//!
//! Runs the relay loop on the host: a simulated radio feeds the scan cycle,
//! a simulated peer connects, subscribes and receives every envelope (or
//! pulls it with long reads), until the cycle limit or Ctrl+C.
//!
//! ```bash
//! # Generated networks, pushed to a peer at MTU 185, every 10 s
//! scanrelay-node
//!
//! # Fixture radio, pull-mode peer, three fast cycles, JSONL logs
//! scanrelay-node --fixture networks.json --peer pull --interval-ms 500 \
//!     --cycles 3 --logs-dir ./logs --name bench-a
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use scanrelay_core::envelope;
use scanrelay_core::events::event_channel;
use scanrelay_core::logging::LoggingBuilder;
use scanrelay_core::sim::{LoggingAdvertiser, SimulatedCentral, SimulatedRadio};
use scanrelay_core::{
    AttrHandle, ChunkedTransport, ConnHandle, LinkPhase, PeerLink, ReadResponder, RelayConfig,
    RelayEvent, ScanCycle,
};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};

/// Value handle of the delivery characteristic
const DELIVERY_ATTR: AttrHandle = AttrHandle(3);

/// Connection handle the simulated peer uses
const PEER_CONN: ConnHandle = ConnHandle(1);

/// Buffered link-layer events
const LINK_EVENT_CAPACITY: usize = 32;

/// How the simulated peer takes envelopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PeerMode {
    /// Subscribe and receive notifications
    Push,
    /// Stay unsubscribed and read the envelope after each cycle
    Pull,
    /// No peer; the relay only advertises
    None,
}

/// Scan relay node
#[derive(Parser, Debug)]
#[command(name = "scanrelay-node")]
#[command(about = "Scan relay node - periodic WiFi discovery relayed to one peer")]
struct Args {
    /// Relay configuration (default: <config dir>/scanrelay/relay.json if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Instance name used for JSONL log files
    #[arg(short, long)]
    name: Option<String>,

    /// Write JSONL logs under this directory
    #[arg(long)]
    logs_dir: Option<PathBuf>,

    /// Radio fixture (JSON); generated networks are used otherwise
    #[arg(short, long)]
    fixture: Option<PathBuf>,

    /// Number of generated networks
    #[arg(long, default_value_t = 48)]
    generate: usize,

    /// Seed for generated networks
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Simulated peer behaviour
    #[arg(long, value_enum, default_value_t = PeerMode::Push)]
    peer: PeerMode,

    /// MTU the simulated peer negotiates
    #[arg(long, default_value_t = 185)]
    peer_mtu: u16,

    /// Override the scan period
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Stop after this many cycles
    #[arg(long)]
    cycles: Option<u64>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Default config location, if a file exists there
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("scanrelay").join("relay.json"))
        .filter(|path| path.exists())
}

fn load_config(args: &Args) -> Result<RelayConfig> {
    let path = args.config.clone().or_else(default_config_path);
    let mut config = match &path {
        Some(path) => RelayConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => RelayConfig::default(),
    };

    if let Some(name) = &args.name {
        config.logging.instance = name.clone();
    }
    if let Some(dir) = &args.logs_dir {
        config.logging.logs_dir = Some(dir.clone());
    }
    if let Some(interval_ms) = args.interval_ms {
        config.scan.interval_ms = interval_ms;
    }
    config.validate()?;
    Ok(config)
}

fn load_radio(fixture: Option<&Path>, generate: usize, seed: u64) -> Result<SimulatedRadio> {
    match fixture {
        Some(path) => SimulatedRadio::load(path)
            .with_context(|| format!("Failed to load fixture {}", path.display())),
        None => Ok(SimulatedRadio::generated(generate, seed)),
    }
}

async fn wait_for_phase(link: &PeerLink, phase: LinkPhase) -> Result<()> {
    tokio::time::timeout(Duration::from_secs(5), async {
        while link.phase() != phase {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .with_context(|| format!("Peer link never reached {}", phase))
}

/// Bring the simulated peer into position before the first cycle
async fn connect_peer(
    central: &SimulatedCentral,
    link: &PeerLink,
    mode: PeerMode,
    mtu: u16,
) -> Result<()> {
    if mode == PeerMode::None {
        return Ok(());
    }
    central.connect().await?;
    central.exchange_mtu(mtu).await?;
    match mode {
        PeerMode::Push => {
            central.subscribe().await?;
            wait_for_phase(link, LinkPhase::ConnectedSubscribed).await
        }
        _ => wait_for_phase(link, LinkPhase::ConnectedUnsubscribed).await,
    }
}

/// Log relay events; in pull mode, read the envelope after every cycle
async fn monitor_events(
    mut events: broadcast::Receiver<RelayEvent>,
    central: Arc<SimulatedCentral>,
    responder: ReadResponder,
    mode: PeerMode,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "Event monitor lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            RelayEvent::CycleCompleted(report) => {
                info!(
                    cycle = report.cycle,
                    records = report.records,
                    failed_channels = report.failed_channels.len(),
                    delivery = %report.delivery,
                    "Cycle completed"
                );
                if mode == PeerMode::Pull {
                    match central.pull_envelope(&responder) {
                        Ok(bytes) if bytes.is_empty() => info!("Peer pulled no envelope"),
                        Ok(bytes) => match envelope::decode(&bytes) {
                            Ok(records) => info!(
                                bytes = bytes.len(),
                                records = records.len(),
                                "Peer pulled envelope"
                            ),
                            Err(e) => warn!(error = %e, "Peer pulled a corrupt envelope"),
                        },
                        Err(e) => warn!(error = %e, code = e.code(), "Peer read refused"),
                    }
                }
            }
            RelayEvent::LinkChanged { from, to } => {
                info!(%from, %to, "Link changed");
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let log_path = LoggingBuilder::from_config(&config.logging)
        .with_default_level(level)
        .init()?;

    info!(
        instance = %config.logging.instance,
        device_name = %config.link.device_name,
        service = %config.link.service_uuid,
        characteristic = %config.link.characteristic_uuid,
        interval_ms = config.scan.interval_ms,
        "Scan relay starting"
    );
    if let Some(path) = &log_path {
        info!(path = %path.display(), "Writing JSONL logs");
    }

    let (event_tx, events) = event_channel();
    let (link_tx, link_rx) = mpsc::channel(LINK_EVENT_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let advertiser = Arc::new(LoggingAdvertiser::new());
    let link = PeerLink::new(&config.link, DELIVERY_ATTR, advertiser, event_tx.clone());
    link.start().context("Failed to start advertising")?;
    let link_task = link.clone().spawn_event_loop(link_rx, shutdown_rx.clone());

    let central = Arc::new(SimulatedCentral::new(PEER_CONN, DELIVERY_ATTR, link_tx));
    let radio = load_radio(args.fixture.as_deref(), args.generate, args.seed)?;

    let mut cycle = ScanCycle::new(
        config.scan.clone(),
        Box::new(radio),
        link.clone(),
        ChunkedTransport::new(central.clone()),
        event_tx,
    );
    if let Some(limit) = args.cycles {
        cycle = cycle.with_cycle_limit(limit);
    }
    let responder = ReadResponder::new(cycle.envelope_reader());

    connect_peer(&central, &link, args.peer, args.peer_mtu).await?;
    let monitor = tokio::spawn(monitor_events(events, central.clone(), responder, args.peer));

    let mut scan_task = tokio::spawn(cycle.run(shutdown_rx));
    let result = tokio::select! {
        joined = &mut scan_task => joined.context("Scan task panicked")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down");
            let _ = shutdown_tx.send(true);
            scan_task.await.context("Scan task panicked")?
        }
    };

    let _ = shutdown_tx.send(true);
    if let Err(e) = link_task.await {
        error!(error = %e, "Link task failed");
    }
    // Let the monitor drain the final cycle event before stopping it
    tokio::time::sleep(Duration::from_millis(50)).await;
    monitor.abort();

    let snapshot = link.snapshot();
    info!(
        phase = %snapshot.phase,
        mtu = snapshot.mtu,
        envelopes_received = central.received().len(),
        frames_rejected = central.rejected(),
        "Scan relay stopped"
    );

    result.context("Scan loop failed")
}
