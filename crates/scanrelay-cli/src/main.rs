//! Scan Relay CLI
//!
//! Offline tooling around scanrelay-core: inspect envelopes and frames
//! captured from a relay, and run scan cycles against fixtures.
//!
//! ## Usage
//!
//! ```bash
//! # Decode an envelope given as hex
//! scanrelay decode 010004686f6d6506d703
//!
//! # Decode an envelope dumped to a file, as JSON
//! scanrelay decode --file envelope.bin --json
//!
//! # Show how an envelope is framed at a given MTU
//! scanrelay frames --mtu 23 --file envelope.bin
//!
//! # Rebuild an envelope from captured notification frames
//! scanrelay reassemble 28000000... 28001000... --decode
//!
//! # Run one scan cycle against a radio fixture
//! scanrelay scan --fixture networks.json
//!
//! # Print the effective configuration
//! scanrelay config --config relay.json
//!
//! # Read back JSONL logs written by a node, warnings and up
//! scanrelay logs --logs-dir ./logs --instance bench-a --level warn
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scanrelay_core::envelope::decode;
use scanrelay_core::events::event_channel;
use scanrelay_core::logging::{
    read_all_entries, read_instance_entries, JsonLogEntry, LoggingBuilder,
};
use scanrelay_core::sim::{LoggingAdvertiser, RecordingSink, SimulatedRadio};
use scanrelay_core::transport::FramePlan;
use scanrelay_core::{
    AttrHandle, ChunkedTransport, ConnHandle, LinkEvent, NetworkRecord, PeerLink, Reassembler,
    RelayConfig, ScanCycle,
};

/// Attribute handle used for offline cycles
const OFFLINE_ATTR: AttrHandle = AttrHandle(3);

/// Scan Relay - WiFi scan relay tooling
#[derive(Parser)]
#[command(name = "scanrelay")]
#[command(version = "0.1.0")]
#[command(about = "Scan Relay - inspect envelopes and frames, run offline scan cycles")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode an envelope into its records
    Decode {
        #[command(flatten)]
        input: EnvelopeInput,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the notification frames an envelope is sent as
    Frames {
        #[command(flatten)]
        input: EnvelopeInput,

        /// Negotiated ATT MTU
        #[arg(short, long, default_value_t = 23)]
        mtu: u16,
    },

    /// Rebuild an envelope from notification frames, in receive order
    Reassemble {
        /// Frames as hex strings
        #[arg(required = true)]
        frames: Vec<String>,

        /// Also decode the rebuilt envelope
        #[arg(long = "decode")]
        decode_records: bool,
    },

    /// Run scan cycles against a simulated radio and print the result
    Scan {
        /// Radio fixture (JSON)
        #[arg(short, long, conflicts_with = "generate")]
        fixture: Option<PathBuf>,

        /// Generate this many random networks instead of loading a fixture
        #[arg(short, long)]
        generate: Option<usize>,

        /// Seed for generated networks
        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Relay configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Simulate a subscribed peer at this MTU
        #[arg(long)]
        peer_mtu: Option<u16>,

        /// Print records as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the effective relay configuration
    Config {
        /// Relay configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Show JSONL log entries written by relay nodes, oldest first
    Logs {
        /// Directory passed to the node as --logs-dir
        #[arg(short, long)]
        logs_dir: PathBuf,

        /// Only entries from this instance
        #[arg(short, long)]
        instance: Option<String>,

        /// Minimum level (trace, debug, info, warn, error)
        #[arg(long)]
        level: Option<String>,

        /// Print entries as JSON lines
        #[arg(long)]
        json: bool,
    },
}

/// Envelope given inline as hex or read from a binary file
#[derive(clap::Args)]
struct EnvelopeInput {
    /// Envelope bytes as hex (whitespace allowed)
    #[arg(required_unless_present = "file", conflicts_with = "file")]
    hex: Option<String>,

    /// Read raw envelope bytes from a file
    #[arg(long)]
    file: Option<PathBuf>,
}

impl EnvelopeInput {
    fn bytes(&self) -> Result<Vec<u8>> {
        match (&self.hex, &self.file) {
            (Some(hex), _) => parse_hex(hex),
            (None, Some(path)) => {
                std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
            }
            (None, None) => anyhow::bail!("No envelope given"),
        }
    }
}

fn setup_logging(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    LoggingBuilder::new("scanrelay-cli")
        .with_default_level(level)
        .init()?;
    Ok(())
}

/// Parse hex, ignoring whitespace
fn parse_hex(s: &str) -> Result<Vec<u8>> {
    let compact: String = s.split_whitespace().collect();
    hex::decode(&compact).map_err(|e| anyhow::anyhow!("Invalid hex format: {}", e))
}

fn load_config(path: Option<&Path>) -> Result<RelayConfig> {
    match path {
        Some(path) => RelayConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(RelayConfig::default()),
    }
}

fn print_records(records: &[NetworkRecord], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }
    for (i, record) in records.iter().enumerate() {
        println!(
            "[{:2}] {:<32} RSSI:{:4} CH:{:2} AUTH:{}",
            i,
            record.ssid(),
            record.rssi(),
            record.channel(),
            record.auth()
        );
    }
    Ok(())
}

fn cmd_decode(input: &EnvelopeInput, json: bool) -> Result<()> {
    let bytes = input.bytes()?;
    let records = decode(&bytes).context("Invalid envelope")?;
    if !json {
        println!("Envelope: {} bytes, {} records", bytes.len(), records.len());
    }
    print_records(&records, json)
}

fn cmd_frames(input: &EnvelopeInput, mtu: u16) -> Result<()> {
    let bytes = input.bytes()?;
    let plan = FramePlan::for_mtu(mtu, bytes.len())?;
    println!(
        "{} frames, chunk {} bytes, total_len {}{}",
        plan.frame_count(),
        plan.chunk_size(),
        plan.total_len(),
        if plan.is_truncated() { " (truncated)" } else { "" }
    );
    for frame in plan.frames(&bytes) {
        println!(
            "offset={:<5} len={:<3} {}",
            frame.offset,
            frame.payload.len(),
            hex::encode(frame.encode())
        );
    }
    Ok(())
}

fn cmd_reassemble(frames: &[String], decode_records: bool) -> Result<()> {
    let mut reassembler = Reassembler::new();
    let mut complete = None;
    for (i, frame) in frames.iter().enumerate() {
        let bytes = parse_hex(frame)?;
        complete = reassembler
            .push(&bytes)
            .with_context(|| format!("Frame {} rejected", i))?;
    }

    let Some(envelope) = complete else {
        anyhow::bail!(
            "Transfer incomplete: {} bytes received",
            reassembler.pending()
        );
    };

    println!("{}", hex::encode(&envelope));
    if decode_records {
        let records = decode(&envelope).context("Invalid envelope")?;
        print_records(&records, false)?;
    }
    Ok(())
}

fn cmd_scan(
    fixture: Option<&Path>,
    generate: Option<usize>,
    seed: u64,
    config: Option<&Path>,
    peer_mtu: Option<u16>,
    json: bool,
) -> Result<()> {
    let config = load_config(config)?;
    let radio = match (fixture, generate) {
        (Some(path), _) => SimulatedRadio::load(path)
            .with_context(|| format!("Failed to load fixture {}", path.display()))?,
        (None, Some(count)) => SimulatedRadio::generated(count, seed),
        (None, None) => anyhow::bail!("Either --fixture or --generate is required"),
    };

    let (event_tx, _events) = event_channel();
    let link = PeerLink::new(
        &config.link,
        OFFLINE_ATTR,
        Arc::new(LoggingAdvertiser::new()),
        event_tx.clone(),
    );
    link.start()?;
    if let Some(mtu) = peer_mtu {
        let conn = ConnHandle(1);
        link.handle_event(LinkEvent::Connected { conn, status: 0 });
        link.handle_event(LinkEvent::MtuUpdated { conn, mtu });
        link.handle_event(LinkEvent::Subscribe {
            conn,
            attr: OFFLINE_ATTR,
            notify: true,
        });
    }

    let sink = Arc::new(RecordingSink::new());
    let mut cycle = ScanCycle::new(
        config.scan.clone(),
        Box::new(radio),
        link,
        ChunkedTransport::new(sink.clone()),
        event_tx,
    );
    let report = cycle.run_once()?;

    if json {
        return print_records(cycle.records(), true);
    }

    println!(
        "Cycle {}: {} records from {} channels",
        report.cycle,
        report.records,
        report.channels.len()
    );
    if !report.failed_channels.is_empty() {
        println!("Failed channels: {:?}", report.failed_channels);
    }
    if report.truncated() > 0 || report.overflowed() > 0 {
        println!(
            "Dropped: {} over channel cap, {} over global cap",
            report.truncated(),
            report.overflowed()
        );
    }
    print_records(cycle.records(), false)?;

    match cycle.envelope() {
        Some(envelope) => {
            println!("Envelope ({} bytes): {}", envelope.len(), hex::encode(&envelope));
        }
        None => println!("Envelope: none"),
    }
    println!("Delivery: {}", report.delivery);
    for frame in sink.frames() {
        println!("  {}", hex::encode(&frame));
    }
    Ok(())
}

fn cmd_config(config: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Severity rank of a level name, lowest first
fn level_rank(level: &str) -> Option<u8> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Some(0),
        "debug" => Some(1),
        "info" => Some(2),
        "warn" => Some(3),
        "error" => Some(4),
        _ => None,
    }
}

fn cmd_logs(
    logs_dir: &Path,
    instance: Option<&str>,
    level: Option<&str>,
    json: bool,
) -> Result<()> {
    let min_rank = match level {
        Some(level) => level_rank(level)
            .with_context(|| format!("Unknown log level '{}'", level))?,
        None => 0,
    };

    let entries = match instance {
        Some(instance) => read_instance_entries(logs_dir, instance),
        None => read_all_entries(logs_dir),
    }
    .with_context(|| format!("Failed to read logs under {}", logs_dir.display()))?;

    let shown: Vec<&JsonLogEntry> = entries
        .iter()
        .filter(|entry| level_rank(&entry.level).unwrap_or(0) >= min_rank)
        .collect();

    if json {
        for entry in shown {
            println!("{}", entry.to_json_line()?);
        }
        return Ok(());
    }

    if shown.is_empty() {
        println!("No log entries under {}", logs_dir.display());
        return Ok(());
    }
    for entry in shown {
        let fields = entry
            .fields
            .as_ref()
            .map(|f| format!(" {}", f))
            .unwrap_or_default();
        println!(
            "{} {:<5} [{}] {}: {}{}",
            entry.ts, entry.level, entry.instance, entry.target, entry.msg, fields
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Decode { input, json } => cmd_decode(&input, json),
        Commands::Frames { input, mtu } => cmd_frames(&input, mtu),
        Commands::Reassemble {
            frames,
            decode_records,
        } => cmd_reassemble(&frames, decode_records),
        Commands::Scan {
            fixture,
            generate,
            seed,
            config,
            peer_mtu,
            json,
        } => cmd_scan(
            fixture.as_deref(),
            generate,
            seed,
            config.as_deref(),
            peer_mtu,
            json,
        ),
        Commands::Config { config } => cmd_config(config.as_deref()),
        Commands::Logs {
            logs_dir,
            instance,
            level,
            json,
        } => cmd_logs(&logs_dir, instance.as_deref(), level.as_deref(), json),
    }
}
