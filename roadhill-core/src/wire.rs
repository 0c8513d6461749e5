//! Framing: one compact JSON value per line outbound; inbound values may be
//! newline-terminated or written back to back.

use serde_json::Value;

use crate::protocol::Directive;

/// Default cap on a single inbound message still being received.
pub const MAX_MESSAGE_LEN: usize = 64 * 1024;

const DELIMITER: u8 = b'\n';

/// Encode a directive as one frame: compact JSON followed by a single `\n`.
pub fn encode_frame(directive: &Directive) -> Result<Vec<u8>, FrameEncodeError> {
    let mut out = serde_json::to_vec(directive)?;
    out.push(DELIMITER);
    Ok(out)
}

/// Error encoding a directive into a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Decode one JSON value from the front of `bytes`, returning it with the number of bytes
/// consumed. An incomplete value yields `NeedMore`; feed more bytes and call again with the
/// whole buffer.
pub fn decode_frame(bytes: &[u8], max_len: usize) -> Result<(Value, usize), FrameDecodeError> {
    let mut stream = serde_json::Deserializer::from_slice(bytes).into_iter::<Value>();
    match stream.next() {
        None => Err(FrameDecodeError::NeedMore),
        Some(Ok(value)) => Ok((value, stream.byte_offset())),
        Some(Err(e)) if e.is_eof() => {
            if bytes.len() > max_len {
                Err(FrameDecodeError::TooLarge {
                    skip: skip_len(bytes),
                })
            } else {
                Err(FrameDecodeError::NeedMore)
            }
        }
        Some(Err(e)) => Err(FrameDecodeError::Malformed {
            skip: skip_len(bytes),
            source: e,
        }),
    }
}

/// Bytes to drop after a bad message: through the next delimiter, or everything buffered.
fn skip_len(bytes: &[u8]) -> usize {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    match bytes[start..].iter().position(|&b| b == DELIMITER) {
        Some(i) => start + i + 1,
        None => bytes.len(),
    }
}

/// Error decoding a frame (need more bytes, too large, or not JSON).
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("need more bytes")]
    NeedMore,
    #[error("message exceeds size limit")]
    TooLarge { skip: usize },
    #[error("malformed message: {source}")]
    Malformed {
        skip: usize,
        #[source]
        source: serde_json::Error,
    },
}
