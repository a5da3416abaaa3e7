//! Simulated radio, link and peer for host runs and tests
//!
//! - [`SimulatedRadio`]: a [`ScanDriver`] fed from a JSON fixture or generated
//!   networks, with optional RSSI jitter and injected channel failures
//! - [`RecordingSink`]: a [`NotifySink`] that keeps every frame it accepts
//! - [`LoggingAdvertiser`]: an [`Advertiser`] that only counts and logs
//! - [`SimulatedCentral`]: a scripted peer that connects, subscribes,
//!   reassembles pushed envelopes and can pull them with long reads
//!
//! ## Fixture Format
//!
//! ```json
//! {
//!   "networks": [
//!     { "ssid": "home", "channel": 6, "rssi": -48, "auth": "WPA2_PSK" }
//!   ],
//!   "failing_channels": [11],
//!   "rssi_jitter": 3,
//!   "seed": 7
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::envelope;
use crate::error::{AdvertiseError, AttError, DriverError, PushError, RelayError, RelayResult};
use crate::link::{LinkEvent, DEFAULT_ATT_MTU};
use crate::port::{AdvertisingParams, Advertiser, NotifySink, ScanDriver, ScanRequest};
use crate::responder::ReadResponder;
use crate::transport::Reassembler;
use crate::types::{AttrHandle, AuthMode, ConnHandle, NetworkRecord, CHANNEL_MAX, CHANNEL_MIN};

/// Radio fixture loaded from JSON
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioFixture {
    /// Networks reported, grouped by their channel when scanned
    pub networks: Vec<NetworkRecord>,
    /// Channels whose scan fails non-fatally
    pub failing_channels: Vec<u8>,
    /// Channel whose scan reports a radio fault
    pub fatal_channel: Option<u8>,
    /// Maximum RSSI deviation applied per scan, in dB
    pub rssi_jitter: u8,
    /// Seed for the jitter generator
    pub seed: Option<u64>,
}

/// Scan driver backed by fixture data
pub struct SimulatedRadio {
    networks: BTreeMap<u8, Vec<NetworkRecord>>,
    failing_channels: BTreeSet<u8>,
    fatal_channel: Option<u8>,
    rssi_jitter: u8,
    rng: StdRng,
    scans: u64,
}

impl SimulatedRadio {
    /// Build a radio from a parsed fixture
    pub fn from_fixture(fixture: RadioFixture) -> Self {
        let mut networks: BTreeMap<u8, Vec<NetworkRecord>> = BTreeMap::new();
        for record in fixture.networks {
            networks.entry(record.channel()).or_default().push(record);
        }
        Self {
            networks,
            failing_channels: fixture.failing_channels.into_iter().collect(),
            fatal_channel: fixture.fatal_channel,
            rssi_jitter: fixture.rssi_jitter,
            rng: StdRng::seed_from_u64(fixture.seed.unwrap_or_else(rand::random)),
            scans: 0,
        }
    }

    /// Load a JSON fixture file
    pub fn load(path: impl AsRef<Path>) -> RelayResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let fixture: RadioFixture = serde_json::from_str(&text)?;
        info!(
            path = %path.as_ref().display(),
            networks = fixture.networks.len(),
            "Loaded radio fixture"
        );
        Ok(Self::from_fixture(fixture))
    }

    /// Radio that reports exactly these records, without jitter
    pub fn from_records(records: Vec<NetworkRecord>) -> Self {
        Self::from_fixture(RadioFixture {
            networks: records,
            seed: Some(0),
            ..Default::default()
        })
    }

    /// Radio with `count` made-up networks spread over all channels
    pub fn generated(count: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let networks = (0..count)
            .map(|i| {
                let channel = rng.random_range(CHANNEL_MIN..=CHANNEL_MAX);
                let rssi = rng.random_range(-95i8..=-30);
                let auth = AuthMode::from_code(rng.random_range(0..=9));
                let ssid = if rng.random_range(0..10) == 0 {
                    String::new()
                } else {
                    format!("net-{:03}", i)
                };
                NetworkRecord::new(ssid, channel, rssi, auth)
            })
            .collect();
        Self::from_fixture(RadioFixture {
            networks,
            rssi_jitter: 4,
            seed: Some(seed),
            ..Default::default()
        })
    }

    /// Make scans of `channel` fail non-fatally
    pub fn with_failing_channel(mut self, channel: u8) -> Self {
        self.failing_channels.insert(channel);
        self
    }

    /// Make a scan of `channel` report a radio fault
    pub fn with_fatal_channel(mut self, channel: u8) -> Self {
        self.fatal_channel = Some(channel);
        self
    }

    /// Number of channel scans served
    pub fn scans(&self) -> u64 {
        self.scans
    }

    fn jittered(&mut self, record: &NetworkRecord) -> NetworkRecord {
        if self.rssi_jitter == 0 {
            return record.clone();
        }
        let spread = i16::from(self.rssi_jitter);
        let delta = self.rng.random_range(-spread..=spread);
        let rssi = (i16::from(record.rssi()) + delta).clamp(i16::from(i8::MIN), -1) as i8;
        record.with_rssi(rssi)
    }
}

impl ScanDriver for SimulatedRadio {
    fn scan_channel(&mut self, request: &ScanRequest) -> Result<Vec<NetworkRecord>, DriverError> {
        self.scans += 1;
        let channel = request.channel;

        if self.fatal_channel == Some(channel) {
            return Err(DriverError::Fatal(format!(
                "simulated radio fault on channel {}",
                channel
            )));
        }
        if self.failing_channels.contains(&channel) {
            return Err(DriverError::Channel {
                channel,
                reason: "simulated scan timeout".to_string(),
            });
        }

        let found = self.networks.get(&channel).cloned().unwrap_or_default();
        let found: Vec<NetworkRecord> = found
            .iter()
            .filter(|r| request.show_hidden || !r.ssid().is_empty())
            .map(|r| self.jittered(r))
            .collect();
        debug!(channel, found = found.len(), active = request.active, "Simulated scan");
        Ok(found)
    }
}

impl std::fmt::Debug for SimulatedRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedRadio")
            .field("channels", &self.networks.len())
            .field("failing_channels", &self.failing_channels)
            .field("fatal_channel", &self.fatal_channel)
            .field("scans", &self.scans)
            .finish()
    }
}

/// Notify sink that records every accepted frame
#[derive(Debug)]
pub struct RecordingSink {
    frames: Mutex<Vec<Bytes>>,
    fail_after: Mutex<Option<usize>>,
    connected: AtomicBool,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSink {
    /// Sink that accepts everything
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            fail_after: Mutex::new(None),
            connected: AtomicBool::new(true),
        }
    }

    /// Refuse every push once `count` frames were accepted
    pub fn fail_after(&self, count: usize) {
        *self.fail_after.lock() = Some(count);
    }

    /// Refuse every push as if the peer had gone away
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Frames accepted so far
    pub fn frames(&self) -> Vec<Bytes> {
        self.frames.lock().clone()
    }

    /// Forget accepted frames
    pub fn clear(&self) {
        self.frames.lock().clear();
    }
}

impl NotifySink for RecordingSink {
    fn notify(&self, conn: ConnHandle, _attr: AttrHandle, frame: &[u8]) -> Result<(), PushError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(PushError::NotConnected(conn));
        }
        let fail_after = *self.fail_after.lock();
        let mut frames = self.frames.lock();
        if fail_after.is_some_and(|limit| frames.len() >= limit) {
            return Err(PushError::NoBuffers);
        }
        frames.push(Bytes::copy_from_slice(frame));
        Ok(())
    }
}

/// Advertiser that logs and counts start requests
#[derive(Debug, Default)]
pub struct LoggingAdvertiser {
    starts: AtomicUsize,
    fail: AtomicBool,
}

impl LoggingAdvertiser {
    /// Advertiser that always succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later start fail
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of successful starts
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl Advertiser for LoggingAdvertiser {
    fn start_advertising(&self, params: &AdvertisingParams) -> Result<(), AdvertiseError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AdvertiseError::Start(-1));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        info!(
            name = %params.device_name,
            itvl_min = params.interval_min,
            itvl_max = params.interval_max,
            "Simulated advertising"
        );
        Ok(())
    }
}

/// Scripted peer device.
///
/// Link events go to the relay through `events`; pushed frames come back
/// through the [`NotifySink`] impl and are reassembled and decoded.
#[derive(Debug)]
pub struct SimulatedCentral {
    conn: ConnHandle,
    attr: AttrHandle,
    events: mpsc::Sender<LinkEvent>,
    connected: AtomicBool,
    mtu: Mutex<u16>,
    reassembler: Mutex<Reassembler>,
    received: Mutex<Vec<Vec<NetworkRecord>>>,
    rejected: AtomicUsize,
}

impl SimulatedCentral {
    /// Peer that will use `conn` and subscribe to `attr`
    pub fn new(conn: ConnHandle, attr: AttrHandle, events: mpsc::Sender<LinkEvent>) -> Self {
        Self {
            conn,
            attr,
            events,
            connected: AtomicBool::new(false),
            mtu: Mutex::new(DEFAULT_ATT_MTU),
            reassembler: Mutex::new(Reassembler::new()),
            received: Mutex::new(Vec::new()),
            rejected: AtomicUsize::new(0),
        }
    }

    async fn send(&self, event: LinkEvent) -> RelayResult<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| RelayError::Task("link event channel closed".to_string()))
    }

    /// Connect to the relay
    pub async fn connect(&self) -> RelayResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        *self.mtu.lock() = DEFAULT_ATT_MTU;
        self.send(LinkEvent::Connected {
            conn: self.conn,
            status: 0,
        })
        .await
    }

    /// Attempt a connection that the stack reports as failed
    pub async fn fail_connect(&self, status: i32) -> RelayResult<()> {
        self.send(LinkEvent::Connected {
            conn: self.conn,
            status,
        })
        .await
    }

    /// Renegotiate the ATT MTU
    pub async fn exchange_mtu(&self, mtu: u16) -> RelayResult<()> {
        *self.mtu.lock() = mtu;
        self.send(LinkEvent::MtuUpdated {
            conn: self.conn,
            mtu,
        })
        .await
    }

    /// Enable notifications on the delivery characteristic
    pub async fn subscribe(&self) -> RelayResult<()> {
        self.set_notify(true).await
    }

    /// Disable notifications on the delivery characteristic
    pub async fn unsubscribe(&self) -> RelayResult<()> {
        self.set_notify(false).await
    }

    async fn set_notify(&self, notify: bool) -> RelayResult<()> {
        self.send(LinkEvent::Subscribe {
            conn: self.conn,
            attr: self.attr,
            notify,
        })
        .await
    }

    /// Drop the connection
    pub async fn disconnect(&self, reason: i32) -> RelayResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.reassembler.lock().reset();
        self.send(LinkEvent::Disconnected {
            conn: self.conn,
            reason,
        })
        .await
    }

    /// Envelopes reassembled from notifications, decoded
    pub fn received(&self) -> Vec<Vec<NetworkRecord>> {
        self.received.lock().clone()
    }

    /// Frames or envelopes that could not be reassembled or decoded
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    /// Fetch the whole envelope with long reads.
    ///
    /// Each read returns at most `MTU - 1` bytes; a short read ends the
    /// transfer, as does an invalid-offset answer after the first read.
    /// Read offsets are 16-bit, so anything past offset 65535 is not
    /// reachable and the pull stops there.
    pub fn pull_envelope(&self, responder: &ReadResponder) -> Result<Bytes, AttError> {
        let per_read = usize::from((*self.mtu.lock()).max(DEFAULT_ATT_MTU)) - 1;
        let mut out = BytesMut::new();
        loop {
            let Ok(offset) = u16::try_from(out.len()) else {
                warn!(pulled = out.len(), "Read offset range exhausted, stopping pull");
                break;
            };
            let value = match responder.read(offset) {
                Ok(value) => value,
                Err(AttError::InvalidOffset { .. }) if offset > 0 => break,
                Err(e) => return Err(e),
            };
            let n = value.len().min(per_read);
            out.extend_from_slice(&value[..n]);
            if n < per_read {
                break;
            }
        }
        Ok(out.freeze())
    }
}

impl NotifySink for SimulatedCentral {
    fn notify(&self, conn: ConnHandle, attr: AttrHandle, frame: &[u8]) -> Result<(), PushError> {
        if conn != self.conn || !self.connected.load(Ordering::SeqCst) {
            return Err(PushError::NotConnected(conn));
        }
        if attr != self.attr {
            return Err(PushError::Rejected(-1));
        }

        let complete = match self.reassembler.lock().push(frame) {
            Ok(complete) => complete,
            Err(e) => {
                warn!(error = %e, "Peer dropped frame");
                self.rejected.fetch_add(1, Ordering::SeqCst);
                return Ok(());
            }
        };

        if let Some(bytes) = complete {
            match envelope::decode(&bytes) {
                Ok(records) => {
                    info!(records = records.len(), bytes = bytes.len(), "Peer received envelope");
                    self.received.lock().push(records);
                }
                Err(e) => {
                    warn!(error = %e, "Peer could not decode envelope");
                    self.rejected.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
        Ok(())
    }
}
