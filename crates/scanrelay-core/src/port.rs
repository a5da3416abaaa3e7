//! Ports to the radio and link-layer drivers
//!
//! The relay never talks to hardware directly. Discovery, advertising and
//! notification pushes go through these traits so that vendor drivers,
//! the simulated adapters in [`crate::sim`] and test doubles plug in the
//! same way.

use std::time::Duration;

use crate::error::{AdvertiseError, DriverError, PushError};
use crate::types::{AttrHandle, ConnHandle, NetworkRecord};

/// Parameters for one single-channel scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    /// Channel to scan
    pub channel: u8,
    /// Active (probe request) instead of passive scan
    pub active: bool,
    /// Report networks that hide their SSID
    pub show_hidden: bool,
    /// Minimum dwell time per channel for active scans
    pub dwell_min: Duration,
    /// Maximum dwell time per channel for active scans
    pub dwell_max: Duration,
}

/// Blocking discovery driver.
///
/// One call scans one channel and returns every network seen on it, in the
/// order the radio reported them. Zero results is not an error.
pub trait ScanDriver: Send {
    /// Scan a single channel
    fn scan_channel(&mut self, request: &ScanRequest) -> Result<Vec<NetworkRecord>, DriverError>;
}

/// Advertising parameters for the connectable advertisement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingParams {
    /// Complete local name
    pub device_name: String,
    /// Minimum advertising interval (0.625 ms units)
    pub interval_min: u16,
    /// Maximum advertising interval (0.625 ms units)
    pub interval_max: u16,
}

/// Link-layer advertising control
pub trait Advertiser: Send + Sync {
    /// Start undirected connectable, general discoverable advertising
    fn start_advertising(&self, params: &AdvertisingParams) -> Result<(), AdvertiseError>;
}

/// Notification push primitive.
///
/// Each call sends exactly one frame and returns once the stack accepted or
/// refused it.
pub trait NotifySink: Send + Sync {
    /// Push one notification to `conn` on characteristic `attr`
    fn notify(&self, conn: ConnHandle, attr: AttrHandle, frame: &[u8]) -> Result<(), PushError>;
}
