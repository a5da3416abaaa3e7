//! Relay configuration
//!
//! Every field has a default matching the reference firmware, so an empty
//! JSON object (or no file at all) yields a working configuration:
//!
//! ```json
//! {
//!   "scan": { "interval_ms": 10000, "channel_min": 1, "channel_max": 13,
//!             "per_channel_cap": 32, "global_cap": 256 },
//!   "link": { "device_name": "wifi", "default_mtu": 23 },
//!   "logging": { "instance": "scanrelay", "console": true }
//! }
//! ```

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, RelayResult};
use crate::link::DEFAULT_ATT_MTU;
use crate::port::{AdvertisingParams, ScanRequest};
use crate::types::{CHANNEL_MAX, CHANNEL_MIN};

/// Scan cycle settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Period between cycle starts
    pub interval_ms: u64,
    /// First channel scanned
    pub channel_min: u8,
    /// Last channel scanned
    pub channel_max: u8,
    /// Records kept per channel
    pub per_channel_cap: usize,
    /// Records kept per cycle
    pub global_cap: usize,
    /// Active scan (probe requests)
    pub active: bool,
    /// Include hidden networks
    pub show_hidden: bool,
    /// Minimum active dwell per channel
    pub dwell_min_ms: u64,
    /// Maximum active dwell per channel
    pub dwell_max_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            channel_min: CHANNEL_MIN,
            channel_max: CHANNEL_MAX,
            per_channel_cap: 32,
            global_cap: 256,
            active: true,
            show_hidden: true,
            dwell_min_ms: 100,
            dwell_max_ms: 300,
        }
    }
}

impl ScanConfig {
    /// Check the scan settings on their own
    pub fn validate(&self) -> RelayResult<()> {
        if self.interval_ms == 0 {
            return Err(config_err("scan.interval_ms must be positive"));
        }
        if self.channel_min < CHANNEL_MIN || self.channel_max > CHANNEL_MAX {
            return Err(config_err(format!(
                "scan channels must lie within {}..={}",
                CHANNEL_MIN, CHANNEL_MAX
            )));
        }
        if self.channel_min > self.channel_max {
            return Err(config_err("scan.channel_min is above scan.channel_max"));
        }
        if self.per_channel_cap == 0 || self.global_cap == 0 {
            return Err(config_err("record caps must be positive"));
        }
        if self.global_cap > u16::MAX as usize {
            return Err(config_err("scan.global_cap does not fit the envelope count field"));
        }
        if self.per_channel_cap > self.global_cap {
            return Err(config_err("scan.per_channel_cap is above scan.global_cap"));
        }
        if self.dwell_min_ms > self.dwell_max_ms {
            return Err(config_err("scan.dwell_min_ms is above scan.dwell_max_ms"));
        }
        Ok(())
    }

    /// Cycle period
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Channels scanned each cycle, ascending
    pub fn channels(&self) -> RangeInclusive<u8> {
        self.channel_min..=self.channel_max
    }

    /// Driver request for one channel
    pub fn request_for(&self, channel: u8) -> ScanRequest {
        ScanRequest {
            channel,
            active: self.active,
            show_hidden: self.show_hidden,
            dwell_min: Duration::from_millis(self.dwell_min_ms),
            dwell_max: Duration::from_millis(self.dwell_max_ms),
        }
    }
}

/// Link-layer settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Advertised device name
    pub device_name: String,
    /// Minimum advertising interval (0.625 ms units)
    pub adv_interval_min: u16,
    /// Maximum advertising interval (0.625 ms units)
    pub adv_interval_max: u16,
    /// MTU assumed until the peer renegotiates
    pub default_mtu: u16,
    /// Primary service UUID
    pub service_uuid: String,
    /// Delivery characteristic UUID (read + notify)
    pub characteristic_uuid: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device_name: "wifi".to_string(),
            adv_interval_min: 0x0020,
            adv_interval_max: 0x0060,
            default_mtu: DEFAULT_ATT_MTU,
            service_uuid: "10408a2c-6f61-489b-a245-4c8c4a3b3e8a".to_string(),
            characteristic_uuid: "2190e122-4d5b-62b7-a544-184d0a1d3419".to_string(),
        }
    }
}

impl LinkConfig {
    /// Advertising parameters for the advertiser port
    pub fn advertising_params(&self) -> AdvertisingParams {
        AdvertisingParams {
            device_name: self.device_name.clone(),
            interval_min: self.adv_interval_min,
            interval_max: self.adv_interval_max,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Instance name used in JSONL file names
    pub instance: String,
    /// Directory for JSONL logs; `None` disables file logging
    pub logs_dir: Option<PathBuf>,
    /// Also log to the console
    pub console: bool,
    /// Filter directive (e.g. "scanrelay_core=debug")
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            instance: "scanrelay".to_string(),
            logs_dir: None,
            console: true,
            filter: None,
        }
    }
}

/// Complete relay configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Scan cycle settings
    pub scan: ScanConfig,
    /// Link-layer settings
    pub link: LinkConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl RelayConfig {
    /// Load and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> RelayResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Parse and validate JSON config text
    pub fn from_json_str(text: &str) -> RelayResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> RelayResult<()> {
        self.scan.validate()?;

        let link = &self.link;
        if link.adv_interval_min > link.adv_interval_max {
            return Err(config_err("link.adv_interval_min is above link.adv_interval_max"));
        }
        if link.default_mtu < DEFAULT_ATT_MTU {
            return Err(config_err(format!(
                "link.default_mtu must be at least {}",
                DEFAULT_ATT_MTU
            )));
        }
        if link.device_name.is_empty() {
            return Err(config_err("link.device_name must not be empty"));
        }
        Ok(())
    }
}

fn config_err(msg: impl Into<String>) -> RelayError {
    RelayError::Config(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_firmware() {
        let config = RelayConfig::default();
        assert_eq!(config.scan.interval(), Duration::from_secs(10));
        assert_eq!(config.scan.channels(), 1..=13);
        assert_eq!(config.scan.per_channel_cap, 32);
        assert_eq!(config.scan.global_cap, 256);
        assert_eq!(config.link.device_name, "wifi");
        assert_eq!(config.link.default_mtu, 23);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = RelayConfig::from_json_str("{}").unwrap();
        assert_eq!(config, RelayConfig::default());
    }

    #[test]
    fn test_partial_json_overrides() {
        let config =
            RelayConfig::from_json_str(r#"{"scan": {"channel_max": 11, "global_cap": 64}}"#)
                .unwrap();
        assert_eq!(config.scan.channels(), 1..=11);
        assert_eq!(config.scan.global_cap, 64);
        assert_eq!(config.scan.per_channel_cap, 32);
    }

    #[test]
    fn test_rejects_out_of_range_channels() {
        let err = RelayConfig::from_json_str(r#"{"scan": {"channel_max": 14}}"#).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));

        let err = RelayConfig::from_json_str(r#"{"scan": {"channel_min": 0}}"#).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_rejects_inverted_caps() {
        let err = RelayConfig::from_json_str(r#"{"scan": {"per_channel_cap": 300}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("per_channel_cap"));
    }

    #[test]
    fn test_rejects_small_default_mtu() {
        let err = RelayConfig::from_json_str(r#"{"link": {"default_mtu": 20}}"#).unwrap_err();
        assert!(err.to_string().contains("default_mtu"));
    }

    #[test]
    fn test_scan_config_validates_alone() {
        let zero = ScanConfig {
            interval_ms: 0,
            ..Default::default()
        };
        let err = zero.validate().unwrap_err();
        assert!(err.to_string().contains("interval_ms"));
        assert!(ScanConfig::default().validate().is_ok());
    }

    #[test]
    fn test_request_for_channel() {
        let request = ScanConfig::default().request_for(6);
        assert_eq!(request.channel, 6);
        assert!(request.active);
        assert!(request.show_hidden);
        assert_eq!(request.dwell_min, Duration::from_millis(100));
        assert_eq!(request.dwell_max, Duration::from_millis(300));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(&path, r#"{"link": {"device_name": "scanner"}}"#).unwrap();

        let config = RelayConfig::load(&path).unwrap();
        assert_eq!(config.link.device_name, "scanner");
    }
}
