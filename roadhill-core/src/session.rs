//! Host-driven session: the host feeds received bytes, the session returns outcomes.
//!
//! A [`Dispatcher`] holds everything shared between connections (firmware
//! identity and the two pre-encoded replies) and is never mutated after
//! construction. Each [`Session`] owns its receive buffer and nothing else.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::firmware::FirmwareArtifact;
use crate::protocol::{
    message_type, DeviceInfo, Directive, DirectiveKind, MalformedDeviceInfo, PlaybackDirective,
    MESSAGE_TYPE_DEVICE_INFO,
};
use crate::wire::{self, FrameDecodeError, FrameEncodeError, MAX_MESSAGE_LEN};

/// Decides OTA vs PLAY against the current firmware. Shared read-only by all sessions.
#[derive(Debug)]
pub struct Dispatcher {
    firmware: Arc<FirmwareArtifact>,
    ota_frame: Vec<u8>,
    play_frame: Vec<u8>,
}

impl Dispatcher {
    pub fn new(
        firmware: Arc<FirmwareArtifact>,
        ota_url: impl Into<String>,
        play: PlaybackDirective,
    ) -> Result<Self, FrameEncodeError> {
        let ota = Directive::Ota {
            url: ota_url.into(),
        };
        Ok(Self {
            firmware,
            ota_frame: wire::encode_frame(&ota)?,
            play_frame: wire::encode_frame(&Directive::Play(play))?,
        })
    }

    pub fn firmware(&self) -> &FirmwareArtifact {
        &self.firmware
    }

    /// OTA when the reported digest differs from the store, PLAY otherwise.
    pub fn decide(&self, info: &DeviceInfo) -> DirectiveKind {
        if info.normalized_digest() == self.firmware.current_digest() {
            DirectiveKind::Play
        } else {
            DirectiveKind::Ota
        }
    }

    /// Newline-terminated wire form of the directive for `kind`.
    pub fn frame(&self, kind: DirectiveKind) -> &[u8] {
        match kind {
            DirectiveKind::Ota => &self.ota_frame,
            DirectiveKind::Play => &self.play_frame,
        }
    }

    /// Evaluate one decoded message. Stateless: same input, same outcome.
    pub fn respond(&self, request: Value) -> Outcome {
        if message_type(&request) != Some(MESSAGE_TYPE_DEVICE_INFO) {
            return Outcome::Ignored { request };
        }
        match DeviceInfo::from_value(request.clone()) {
            Ok(info) => {
                let kind = self.decide(&info);
                Outcome::Reply {
                    request,
                    kind,
                    frame: self.frame(kind).to_vec(),
                }
            }
            Err(error) => Outcome::Rejected { request, error },
        }
    }
}

/// Result of handling one inbound message (or one discarded run of bytes).
#[derive(Debug)]
pub enum Outcome {
    /// Write `frame` to the device.
    Reply {
        request: Value,
        kind: DirectiveKind,
        frame: Vec<u8>,
    },
    /// Well-formed but not DEVICE_INFO; nothing is sent.
    Ignored { request: Value },
    /// Bytes that could not be decoded; nothing is sent.
    Unparseable { discarded: Vec<u8>, reason: ParseError },
    /// DEVICE_INFO without a usable firmware digest; nothing is sent.
    Rejected {
        request: Value,
        error: MalformedDeviceInfo,
    },
}

impl Outcome {
    /// Bytes to write to the socket, if any.
    pub fn frame(&self) -> Option<&[u8]> {
        match self {
            Outcome::Reply { frame, .. } => Some(frame),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("not valid JSON: {0}")]
    Json(#[source] serde_json::Error),
    #[error("message exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingMessage,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,
}

/// One device connection from accept to close.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    dispatcher: Arc<Dispatcher>,
    state: SessionState,
    buffer: Vec<u8>,
    max_message_len: usize,
}

impl Session {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self::with_max_message_len(dispatcher, MAX_MESSAGE_LEN)
    }

    pub fn with_max_message_len(dispatcher: Arc<Dispatcher>, max_message_len: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            dispatcher,
            state: SessionState::AwaitingMessage,
            buffer: Vec::new(),
            max_message_len,
        }
    }

    /// Log correlation id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Bytes received but not yet forming a complete message.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Feed received bytes; returns one outcome per message completed by them.
    pub fn on_data(&mut self, data: &[u8]) -> Result<Vec<Outcome>, SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Closed);
        }
        self.buffer.extend_from_slice(data);
        let mut outcomes = Vec::new();
        loop {
            let consumed = match wire::decode_frame(&self.buffer, self.max_message_len) {
                Ok((request, n)) => {
                    outcomes.push(self.dispatcher.respond(request));
                    n
                }
                Err(FrameDecodeError::NeedMore) => break,
                Err(FrameDecodeError::Malformed { skip, source }) => {
                    outcomes.push(Outcome::Unparseable {
                        discarded: self.buffer[..skip].to_vec(),
                        reason: ParseError::Json(source),
                    });
                    skip
                }
                Err(FrameDecodeError::TooLarge { skip }) => {
                    outcomes.push(Outcome::Unparseable {
                        discarded: self.buffer[..skip].to_vec(),
                        reason: ParseError::TooLarge {
                            limit: self.max_message_len,
                        },
                    });
                    skip
                }
            };
            self.buffer.drain(..consumed);
        }
        let blank = self
            .buffer
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        self.buffer.drain(..blank);
        Ok(outcomes)
    }

    /// Peer closed or the socket failed.
    pub fn on_closed(&mut self) {
        self.state = SessionState::Closed;
        self.buffer = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::PlaybackPlan;

    const DIGEST: &str = "abc123";
    const OTA_URL: &str = "http://10.42.0.1/files/roadhill.bin";

    fn dispatcher() -> Arc<Dispatcher> {
        let fw = Arc::new(FirmwareArtifact::with_digest(vec![0u8; 64], DIGEST));
        let play = PlaybackPlan::default().to_directive("http://10.42.0.1/files/album000001");
        Arc::new(Dispatcher::new(fw, OTA_URL, play).unwrap())
    }

    fn device_info(digest: &str) -> Vec<u8> {
        format!(r#"{{"type":"DEVICE_INFO","firmware":{{"sha256":"{digest}"}}}}"#).into_bytes()
    }

    fn replies(outcomes: &[Outcome]) -> Vec<Directive> {
        outcomes
            .iter()
            .filter_map(Outcome::frame)
            .map(|f| {
                assert_eq!(f.last(), Some(&b'\n'));
                serde_json::from_slice(f).unwrap()
            })
            .collect()
    }

    #[test]
    fn outdated_firmware_gets_ota() {
        let mut s = Session::new(dispatcher());
        let out = s.on_data(&device_info("000000")).unwrap();
        assert_eq!(out.len(), 1);
        let frame = out[0].frame().unwrap();
        assert_eq!(
            frame,
            format!("{{\"cmd\":\"OTA\",\"url\":\"{OTA_URL}\"}}\n").as_bytes()
        );
    }

    #[test]
    fn current_firmware_gets_play() {
        let mut s = Session::new(dispatcher());
        let out = s.on_data(&device_info(DIGEST)).unwrap();
        match replies(&out).as_slice() {
            [Directive::Play(p)] => {
                assert_eq!(p.version, "1.0");
                assert_eq!(p.tracks, PlaybackPlan::default().tracks);
                assert_eq!(p.blinks.len(), 3);
            }
            other => panic!("expected one PLAY, got {other:?}"),
        }
    }

    #[test]
    fn digest_comparison_ignores_case() {
        let mut s = Session::new(dispatcher());
        let out = s.on_data(&device_info("ABC123")).unwrap();
        assert!(matches!(
            out.as_slice(),
            [Outcome::Reply {
                kind: DirectiveKind::Play,
                ..
            }]
        ));
    }

    #[test]
    fn repeated_requests_are_idempotent() {
        let d = dispatcher();
        let mut s = Session::new(d.clone());
        let mut frames = Vec::new();
        for _ in 0..3 {
            for digest in ["000000", DIGEST] {
                let out = s.on_data(&device_info(digest)).unwrap();
                assert_eq!(out.len(), 1);
                frames.push(out[0].frame().unwrap().to_vec());
            }
        }
        for pair in frames.chunks(2) {
            assert_eq!(pair[0], d.frame(DirectiveKind::Ota));
            assert_eq!(pair[1], d.frame(DirectiveKind::Play));
        }
        assert_eq!(s.state(), SessionState::AwaitingMessage);
    }

    #[test]
    fn garbage_is_discarded_and_session_recovers() {
        let mut s = Session::new(dispatcher());
        let out = s.on_data(b"not valid json").unwrap();
        assert!(matches!(
            out.as_slice(),
            [Outcome::Unparseable {
                reason: ParseError::Json(_),
                ..
            }]
        ));
        assert!(out[0].frame().is_none());
        assert_eq!(s.pending(), 0);
        assert_eq!(s.state(), SessionState::AwaitingMessage);

        let out = s.on_data(&device_info("000000")).unwrap();
        assert_eq!(replies(&out).len(), 1);
    }

    #[test]
    fn other_types_are_ignored() {
        let mut s = Session::new(dispatcher());
        let input = b"{\"type\":\"PING\"}\n{\"firmware\":{\"sha256\":\"abc123\"}}\n[1,2]\n";
        let out = s.on_data(input).unwrap();
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|o| matches!(o, Outcome::Ignored { .. })));
        assert!(replies(&out).is_empty());
    }

    #[test]
    fn malformed_device_info_is_rejected_not_ignored() {
        let mut s = Session::new(dispatcher());
        let mut input = b"{\"type\":\"DEVICE_INFO\",\"firmware\":{\"sha256\":42}}\n".to_vec();
        input.extend_from_slice(&device_info("zz"));
        let out = s.on_data(&input).unwrap();
        assert!(matches!(
            out.as_slice(),
            [
                Outcome::Rejected {
                    error: MalformedDeviceInfo::Schema(_),
                    ..
                },
                Outcome::Rejected {
                    error: MalformedDeviceInfo::InvalidDigest(_),
                    ..
                }
            ]
        ));
    }

    #[test]
    fn message_split_across_reads() {
        let mut s = Session::new(dispatcher());
        let msg = device_info(DIGEST);
        let (a, b) = msg.split_at(17);
        assert!(s.on_data(a).unwrap().is_empty());
        assert_eq!(s.pending(), a.len());
        let out = s.on_data(b).unwrap();
        assert_eq!(replies(&out).len(), 1);
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn batched_messages_each_get_one_reply() {
        let mut s = Session::new(dispatcher());
        let mut buf = device_info("000000");
        buf.push(b'\n');
        buf.extend(device_info(DIGEST));
        buf.extend(b"\r\n");
        let out = s.on_data(&buf).unwrap();
        let kinds: Vec<_> = replies(&out).iter().map(Directive::kind).collect();
        assert_eq!(kinds, vec![DirectiveKind::Ota, DirectiveKind::Play]);
    }

    #[test]
    fn oversized_message_is_dropped() {
        let mut s = Session::with_max_message_len(dispatcher(), 16);
        let out = s.on_data(b"{\"type\":\"DEVICE_INFO\",\"pad\":\"").unwrap();
        assert!(matches!(
            out.as_slice(),
            [Outcome::Unparseable {
                reason: ParseError::TooLarge { limit: 16 },
                ..
            }]
        ));
        assert_eq!(s.pending(), 0);
    }

    #[test]
    fn closed_session_refuses_data() {
        let mut s = Session::new(dispatcher());
        s.on_closed();
        assert_eq!(s.state(), SessionState::Closed);
        assert!(matches!(s.on_data(b"{}"), Err(SessionError::Closed)));
    }

    #[test]
    fn sessions_do_not_share_buffers() {
        let d = dispatcher();
        let mut a = Session::new(d.clone());
        let mut b = Session::new(d);
        assert_ne!(a.id(), b.id());
        let msg = device_info("000000");
        assert!(a.on_data(&msg[..10]).unwrap().is_empty());
        let out = b.on_data(&device_info(DIGEST)).unwrap();
        assert_eq!(replies(&out)[0].kind(), DirectiveKind::Play);
        let out = a.on_data(&msg[10..]).unwrap();
        assert_eq!(replies(&out)[0].kind(), DirectiveKind::Ota);
    }
}
