//! Core types for scanrelay

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Longest SSID an 802.11 beacon can carry
pub const SSID_MAX_LEN: usize = 32;

/// Lowest 2.4 GHz channel scanned
pub const CHANNEL_MIN: u8 = 1;

/// Highest 2.4 GHz channel scanned
pub const CHANNEL_MAX: u8 = 13;

/// Network identifier as captured from the radio.
///
/// The driver hands over a fixed 32-byte field that is usually, but not
/// always, NUL-terminated. The stored value is the bytes up to the first NUL
/// within those 32 bytes, so it is never longer than [`SSID_MAX_LEN`] and may
/// contain arbitrary non-UTF-8 bytes.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Ssid(Vec<u8>);

impl Ssid {
    /// Capture an SSID from a raw driver field
    pub fn from_raw(raw: &[u8]) -> Self {
        let bounded = &raw[..raw.len().min(SSID_MAX_LEN)];
        let end = bounded.iter().position(|&b| b == 0).unwrap_or(bounded.len());
        Self(bounded[..end].to_vec())
    }

    /// Raw identifier bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes (always ≤ 32)
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Hidden networks report an empty SSID
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lossy UTF-8 view for logs and tables
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }
}

impl From<&str> for Ssid {
    fn from(s: &str) -> Self {
        Self::from_raw(s.as_bytes())
    }
}

impl fmt::Debug for Ssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ssid({:?})", self.to_string_lossy())
    }
}

impl fmt::Display for Ssid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.to_string_lossy())
    }
}

impl Serialize for Ssid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string_lossy())
    }
}

impl<'de> Deserialize<'de> for Ssid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_raw(s.as_bytes()))
    }
}

/// Authentication mode advertised by a network.
///
/// Wire tags follow declaration order (`Open` = 0 ... `WapiPsk` = 8).
/// Any driver code outside that range maps to [`AuthMode::Unknown`], which is
/// written as tag 9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthMode {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "WEP")]
    Wep,
    #[serde(rename = "WPA_PSK")]
    WpaPsk,
    #[serde(rename = "WPA2_PSK")]
    Wpa2Psk,
    #[serde(rename = "WPA_WPA2_PSK")]
    WpaWpa2Psk,
    #[serde(rename = "WPA2_ENTERPRISE")]
    Wpa2Enterprise,
    #[serde(rename = "WPA3_PSK")]
    Wpa3Psk,
    #[serde(rename = "WPA2_WPA3_PSK")]
    Wpa2Wpa3Psk,
    #[serde(rename = "WAPI_PSK")]
    WapiPsk,
    #[serde(rename = "UNKNOWN", other)]
    Unknown,
}

impl AuthMode {
    /// Every recognised mode, in wire-tag order
    pub const KNOWN: [AuthMode; 9] = [
        AuthMode::Open,
        AuthMode::Wep,
        AuthMode::WpaPsk,
        AuthMode::Wpa2Psk,
        AuthMode::WpaWpa2Psk,
        AuthMode::Wpa2Enterprise,
        AuthMode::Wpa3Psk,
        AuthMode::Wpa2Wpa3Psk,
        AuthMode::WapiPsk,
    ];

    /// Map a driver or wire code to a mode
    pub fn from_code(code: u8) -> Self {
        Self::KNOWN
            .get(code as usize)
            .copied()
            .unwrap_or(AuthMode::Unknown)
    }

    /// Wire tag for this mode
    pub fn code(self) -> u8 {
        match self {
            AuthMode::Open => 0,
            AuthMode::Wep => 1,
            AuthMode::WpaPsk => 2,
            AuthMode::Wpa2Psk => 3,
            AuthMode::WpaWpa2Psk => 4,
            AuthMode::Wpa2Enterprise => 5,
            AuthMode::Wpa3Psk => 6,
            AuthMode::Wpa2Wpa3Psk => 7,
            AuthMode::WapiPsk => 8,
            AuthMode::Unknown => 9,
        }
    }

    /// Display name used in logs and tables
    pub fn as_str(self) -> &'static str {
        match self {
            AuthMode::Open => "OPEN",
            AuthMode::Wep => "WEP",
            AuthMode::WpaPsk => "WPA_PSK",
            AuthMode::Wpa2Psk => "WPA2_PSK",
            AuthMode::WpaWpa2Psk => "WPA_WPA2_PSK",
            AuthMode::Wpa2Enterprise => "WPA2_ENTERPRISE",
            AuthMode::Wpa3Psk => "WPA3_PSK",
            AuthMode::Wpa2Wpa3Psk => "WPA2_WPA3_PSK",
            AuthMode::WapiPsk => "WAPI_PSK",
            AuthMode::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One network seen during a scan.
///
/// Immutable once captured; the record store owns it for the rest of the cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    ssid: Ssid,
    channel: u8,
    rssi: i8,
    auth: AuthMode,
}

impl NetworkRecord {
    /// Capture a record. `ssid` is bounded to 32 bytes and cut at the first NUL.
    pub fn new(ssid: impl AsRef<[u8]>, channel: u8, rssi: i8, auth: AuthMode) -> Self {
        Self {
            ssid: Ssid::from_raw(ssid.as_ref()),
            channel,
            rssi,
            auth,
        }
    }

    /// Network identifier
    pub fn ssid(&self) -> &Ssid {
        &self.ssid
    }

    /// Primary channel
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Signal strength in dBm
    pub fn rssi(&self) -> i8 {
        self.rssi
    }

    /// Authentication mode
    pub fn auth(&self) -> AuthMode {
        self.auth
    }

    /// Copy of this record with a different signal strength
    pub fn with_rssi(&self, rssi: i8) -> Self {
        Self {
            rssi,
            ..self.clone()
        }
    }
}

/// Link-layer connection handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnHandle(pub u16);

impl fmt::Display for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// GATT attribute handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttrHandle(pub u16);

impl fmt::Display for AttrHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}
