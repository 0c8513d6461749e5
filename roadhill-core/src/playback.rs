//! Playback catalog: the track list and lighting schedule carried by PLAY.
//!
//! Entries are the device firmware's schema. The server keeps them as
//! configured, including keys it does not model, and only checks a few shapes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::PlaybackDirective;

/// Mask length in bytes (hex-encoded on the wire).
pub const BLINK_MASK_LEN: usize = 2;
/// Bulb control code length in bytes (hex-encoded on the wire).
pub const BLINK_CODE_LEN: usize = 15;

/// One audio asset on a playback channel.
///
/// Only `name` and `size` are required here. Optional fields the operator
/// leaves out stay out of the wire form, and any other keys (such as the
/// device parser's `time`) are carried through untouched in `extra`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// File name under the tracks directory.
    pub name: String,
    /// Size in bytes; the device checks it against Content-Length.
    pub size: u64,
    /// Start offset on the timeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    /// Crop begin, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin: Option<i64>,
    /// Crop end, exclusive; -1 plays to the end of the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
    /// Output channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chan: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One lighting event: at `time`, send `code` to the bulbs selected by `mask`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blink {
    pub time: u64,
    pub mask: String,
    pub code: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartMode {
    #[default]
    Immediate,
}

/// Configured PLAY payload. `tracks_dir` is relative to the asset root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlaybackPlan {
    #[serde(default = "default_version")]
    pub version: String,
    pub tracks_dir: String,
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub blinks: Vec<Blink>,
    #[serde(default)]
    pub start: StartMode,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for PlaybackPlan {
    fn default() -> Self {
        const CODE: &str = "100300000003c680c6f0fa33f0fafa";
        Self {
            version: default_version(),
            tracks_dir: "album000001".to_string(),
            tracks: vec![
                Track {
                    name: "8b76c5faf3fd66b66d5a36e6ffe9e7bb.mp3".to_string(),
                    size: 6_817_965,
                    position: Some(0),
                    begin: Some(0),
                    end: Some(-1),
                    chan: Some(0),
                    extra: Map::new(),
                },
                Track {
                    name: "894d204819a508c893912166d8746338.mp3".to_string(),
                    size: 1_009_228,
                    position: Some(5000),
                    begin: Some(0),
                    end: Some(-1),
                    chan: Some(1),
                    extra: Map::new(),
                },
            ],
            blinks: [0, 1000, 3000]
                .into_iter()
                .map(|time| Blink {
                    time,
                    mask: "ffff".to_string(),
                    code: CODE.to_string(),
                    extra: Map::new(),
                })
                .collect(),
            start: StartMode::Immediate,
        }
    }
}

impl PlaybackPlan {
    /// Shape checks on the entries this server knows about: a plain
    /// non-empty track name, a positive size, a crop range that is ordered
    /// when given, and hex mask/code of the bulb protocol's lengths.
    /// Everything else is left to the device.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.version.is_empty() {
            return Err(PlanError::EmptyVersion);
        }
        for (i, t) in self.tracks.iter().enumerate() {
            if t.name.is_empty() || t.name.contains('/') {
                return Err(PlanError::TrackName(i));
            }
            if t.size == 0 {
                return Err(PlanError::TrackSize(i));
            }
            let begin = t.begin.unwrap_or(0);
            if begin < 0 {
                return Err(PlanError::TrackCrop(i));
            }
            if let Some(end) = t.end {
                if end != -1 && end <= begin {
                    return Err(PlanError::TrackCrop(i));
                }
            }
        }
        for (i, b) in self.blinks.iter().enumerate() {
            if !is_hex_of_len(&b.mask, BLINK_MASK_LEN) {
                return Err(PlanError::BlinkMask(i));
            }
            if !is_hex_of_len(&b.code, BLINK_CODE_LEN) {
                return Err(PlanError::BlinkCode(i));
            }
        }
        Ok(())
    }

    /// Build the PLAY body with the externally resolvable tracks URL.
    pub fn to_directive(&self, tracks_url: impl Into<String>) -> PlaybackDirective {
        PlaybackDirective {
            version: self.version.clone(),
            tracks_url: tracks_url.into(),
            tracks: self.tracks.clone(),
            blinks: self.blinks.clone(),
            start: self.start,
        }
    }
}

fn is_hex_of_len(s: &str, bytes: usize) -> bool {
    s.len() == bytes * 2 && hex::decode(s).is_ok()
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("playback version is empty")]
    EmptyVersion,
    #[error("track {0}: name must be a plain file name")]
    TrackName(usize),
    #[error("track {0}: size must be positive")]
    TrackSize(usize),
    #[error("track {0}: crop range must satisfy 0 <= begin < end (or end = -1)")]
    TrackCrop(usize),
    #[error("blink {0}: mask must be {BLINK_MASK_LEN} hex-encoded bytes")]
    BlinkMask(usize),
    #[error("blink {0}: code must be {BLINK_CODE_LEN} hex-encoded bytes")]
    BlinkCode(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_plan_is_valid() {
        let plan = PlaybackPlan::default();
        plan.validate().unwrap();
        assert_eq!(plan.tracks.len(), 2);
        assert_eq!(plan.blinks.len(), 3);
        assert_eq!(plan.tracks[1].position, Some(5000));
    }

    #[test]
    fn validate_rejects_bad_entries() {
        let mut plan = PlaybackPlan::default();
        plan.tracks[0].size = 0;
        assert_eq!(plan.validate(), Err(PlanError::TrackSize(0)));

        let mut plan = PlaybackPlan::default();
        plan.tracks[1].begin = Some(100);
        plan.tracks[1].end = Some(50);
        assert_eq!(plan.validate(), Err(PlanError::TrackCrop(1)));

        let mut plan = PlaybackPlan::default();
        plan.tracks[0].name = "../secret.mp3".into();
        assert_eq!(plan.validate(), Err(PlanError::TrackName(0)));

        let mut plan = PlaybackPlan::default();
        plan.blinks[2].mask = "fff".into();
        assert_eq!(plan.validate(), Err(PlanError::BlinkMask(2)));

        let mut plan = PlaybackPlan::default();
        plan.blinks[0].code = "zz0300000003c680c6f0fa33f0fafa".into();
        assert_eq!(plan.validate(), Err(PlanError::BlinkCode(0)));
    }

    #[test]
    fn omitted_track_fields_stay_omitted() {
        let t: Track = serde_json::from_str(r#"{"name":"a.mp3","size":10}"#).unwrap();
        assert_eq!(t.begin, None);
        assert_eq!(t.end, None);
        assert_eq!(serde_json::to_string(&t).unwrap(), r#"{"name":"a.mp3","size":10}"#);
    }

    #[test]
    fn device_schema_entries_pass_through_unchanged() {
        let tracks = json!([
            {"name": "8b76c5faf3fd66b66d5a36e6ffe9e7bb", "size": 10, "time": 0, "begin": 5,
             "end": 90},
            {"name": "894d204819a508c893912166d8746338", "size": 20, "time": 300, "chan": 1}
        ]);
        let blinks = json!([
            {"time": 0, "mask": "ffff", "code": "100300000003c680c6f0fa33f0fafa", "repeat": 2}
        ]);
        let plan = PlaybackPlan {
            tracks: serde_json::from_value(tracks.clone()).unwrap(),
            blinks: serde_json::from_value(blinks.clone()).unwrap(),
            ..PlaybackPlan::default()
        };
        plan.validate().unwrap();
        assert_eq!(plan.tracks[0].extra["time"], 0);

        let wire = serde_json::to_value(plan.to_directive("http://host/files/album")).unwrap();
        assert_eq!(wire["tracks"], tracks);
        assert_eq!(wire["blinks"], blinks);
    }

    #[test]
    fn directive_passes_entries_through() {
        let plan = PlaybackPlan::default();
        let d = plan.to_directive("http://10.42.0.1/files/album000001");
        assert_eq!(d.tracks, plan.tracks);
        assert_eq!(d.blinks, plan.blinks);
        assert_eq!(d.start, StartMode::Immediate);
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["blinks"][1]["time"], 1000);
        assert_eq!(json["tracks"][0]["end"], -1);
        assert_eq!(json["tracks"][1]["position"], 5000);
    }
}
