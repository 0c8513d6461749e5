//! Roadhill device session protocol.
//! Host-driven: no network I/O; host passes received bytes and writes the frames it gets back.

pub mod firmware;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod wire;

pub use firmware::{FirmwareArtifact, LoadError, DIGEST_LEN};
pub use playback::{Blink, PlanError, PlaybackPlan, StartMode, Track};
pub use protocol::{
    DeviceInfo, Directive, DirectiveKind, MalformedDeviceInfo, PlaybackDirective,
    MESSAGE_TYPE_DEVICE_INFO,
};
pub use session::{Dispatcher, Outcome, ParseError, Session, SessionError, SessionState};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError, MAX_MESSAGE_LEN};
