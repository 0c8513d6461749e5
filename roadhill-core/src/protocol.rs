//! Roadhill wire protocol: inbound device messages and outbound directives.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::playback::{Blink, StartMode, Track};

/// Discriminator of the only inbound message the server acts on.
pub const MESSAGE_TYPE_DEVICE_INFO: &str = "DEVICE_INFO";

/// `type` field of an inbound message, if present and a string.
pub fn message_type(msg: &Value) -> Option<&str> {
    msg.get("type").and_then(Value::as_str)
}

/// Typed view of a DEVICE_INFO message. Extra fields sent by the device are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub firmware: FirmwareInfo,
}

/// Firmware the device reports as currently installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareInfo {
    pub sha256: String,
}

impl DeviceInfo {
    /// Extract and validate a DEVICE_INFO body. The caller has already checked the `type`.
    pub fn from_value(msg: Value) -> Result<Self, MalformedDeviceInfo> {
        let info: DeviceInfo = serde_json::from_value(msg).map_err(MalformedDeviceInfo::Schema)?;
        let digest = &info.firmware.sha256;
        if digest.is_empty() {
            return Err(MalformedDeviceInfo::InvalidDigest(digest.clone()));
        }
        if !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(MalformedDeviceInfo::InvalidDigest(digest.clone()));
        }
        Ok(info)
    }

    /// Reported digest in lowercase, comparable with the firmware store.
    pub fn normalized_digest(&self) -> String {
        self.firmware.sha256.to_ascii_lowercase()
    }
}

/// DEVICE_INFO that parsed as JSON but cannot be answered.
#[derive(Debug, thiserror::Error)]
pub enum MalformedDeviceInfo {
    #[error("missing or mistyped firmware.sha256: {0}")]
    Schema(#[source] serde_json::Error),
    #[error("firmware.sha256 is not a hex string: {0:?}")]
    InvalidDigest(String),
}

/// Outbound directive. Exactly one is sent per valid DEVICE_INFO.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Directive {
    /// Fetch and install the firmware image at `url`.
    #[serde(rename = "OTA")]
    Ota { url: String },
    /// Start a playback/lighting sequence.
    #[serde(rename = "PLAY")]
    Play(PlaybackDirective),
}

impl Directive {
    pub fn kind(&self) -> DirectiveKind {
        match self {
            Directive::Ota { .. } => DirectiveKind::Ota,
            Directive::Play(_) => DirectiveKind::Play,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    Ota,
    Play,
}

impl std::fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectiveKind::Ota => f.write_str("OTA"),
            DirectiveKind::Play => f.write_str("PLAY"),
        }
    }
}

/// Body of a PLAY directive. Track and blink entries are interpreted by the device firmware.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackDirective {
    pub version: String,
    pub tracks_url: String,
    pub tracks: Vec<Track>,
    pub blinks: Vec<Blink>,
    pub start: StartMode,
}
