//! Launcher wire codec.
//!
//! Every frame is a big-endian length followed by an ASCII body. The two
//! directions use different header widths:
//!
//! ```text
//! launcher → app   [u24 BE length] name[(':' | ws) data]
//! app → launcher   [u32 BE length] name[':' arg]
//!                  [u32 BE length] name ':' <raw bytes>
//! ```
//!
//! The width of each direction is a [`LengthPrefix`] so either side can be
//! changed independently.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{MAX_FRAME_BODY, NAME_SCAN_LIMIT};

/// Width of a frame's big-endian length header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthPrefix {
    /// 3-byte header (launcher → app by default).
    Three,
    /// 4-byte header (app → launcher by default).
    Four,
}

impl LengthPrefix {
    /// Header size in bytes.
    pub fn width(self) -> usize {
        match self {
            Self::Three => 3,
            Self::Four => 4,
        }
    }

    /// Largest body length the header can express.
    pub fn max_len(self) -> usize {
        match self {
            Self::Three => 0xFF_FFFF,
            Self::Four => u32::MAX as usize,
        }
    }

    /// Encodes a header for a body of `len` bytes.
    pub fn header(self, len: usize) -> Result<Vec<u8>> {
        if len > self.max_len() {
            bail!("Frame body of {len} bytes does not fit a {}-byte length", self.width());
        }
        let bytes = (len as u32).to_be_bytes();
        Ok(bytes[4 - self.width()..].to_vec())
    }

    /// Reads a header from the front of `bytes`.
    ///
    /// `bytes` must hold at least [`width`](Self::width) bytes.
    pub fn read(self, bytes: &[u8]) -> usize {
        bytes[..self.width()]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | usize::from(b))
    }
}

/// A command received from the launcher.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Command name.
    pub name: String,
    /// Text after the separator, leading whitespace removed.
    pub data: String,
    /// `data` parsed as JSON, when it is JSON.
    pub json: Option<Value>,
}

impl InboundMessage {
    /// Parses a frame body.
    ///
    /// The name ends at the first `:` or byte ≤ 0x20 within the first
    /// [`NAME_SCAN_LIMIT`] bytes; a body without a separator there is all
    /// name. Non-JSON data is kept as text.
    pub fn parse(body: &[u8]) -> Self {
        let scan = body.len().min(NAME_SCAN_LIMIT);
        let Some(sep) = body[..scan].iter().position(|&b| b == b':' || b <= 0x20) else {
            return Self {
                name: String::from_utf8_lossy(body).into_owned(),
                data: String::new(),
                json: None,
            };
        };

        let name = String::from_utf8_lossy(&body[..sep]).into_owned();
        let rest = &body[sep + 1..];
        let start = rest.iter().position(|&b| b > 0x20).unwrap_or(rest.len());
        let data = String::from_utf8_lossy(&rest[start..]).into_owned();
        let json = if data.is_empty() {
            None
        } else {
            serde_json::from_str(&data).ok()
        };

        Self { name, data, json }
    }

    /// Whether the command carried any data.
    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }
}

/// Body of an outbound text message: `name` or `name:arg`.
pub fn text_body(name: &str, arg: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(name.len() + 1 + arg.len());
    body.extend_from_slice(name.as_bytes());
    if !arg.is_empty() {
        body.push(b':');
        body.extend_from_slice(arg.as_bytes());
    }
    body
}

/// Body of an outbound binary message: `name:` then the raw bytes.
pub fn binary_body(name: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(name.len() + 1 + bytes.len());
    body.extend_from_slice(name.as_bytes());
    body.push(b':');
    body.extend_from_slice(bytes);
    body
}

/// Header and body in one buffer.
pub fn encode(prefix: LengthPrefix, body: &[u8]) -> Result<Vec<u8>> {
    let mut frame = prefix.header(body.len())?;
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Payload of a `CAPTUREIMAGERESULT` message.
///
/// `[i32 LE json length][json][uid][image]`.
pub fn image_payload(response_json: &str, uid: &[u8], image: &[u8]) -> Result<Vec<u8>> {
    let Ok(json_len) = i32::try_from(response_json.len()) else {
        bail!("Image response JSON too large: {} bytes", response_json.len());
    };
    let mut out = Vec::with_capacity(4 + response_json.len() + uid.len() + image.len());
    out.extend_from_slice(&json_len.to_le_bytes());
    out.extend_from_slice(response_json.as_bytes());
    out.extend_from_slice(uid);
    out.extend_from_slice(image);
    Ok(out)
}

/// A message sent by the application, as seen by the launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Message name.
    pub name: String,
    /// Bytes after the first `:` (text arg or raw binary).
    pub arg: Vec<u8>,
}

impl OutboundMessage {
    /// Splits an outbound body at its first `:`.
    pub fn parse(body: &[u8]) -> Self {
        match body.iter().position(|&b| b == b':') {
            Some(sep) => Self {
                name: String::from_utf8_lossy(&body[..sep]).into_owned(),
                arg: body[sep + 1..].to_vec(),
            },
            None => Self {
                name: String::from_utf8_lossy(body).into_owned(),
                arg: Vec::new(),
            },
        }
    }

    /// The argument as text.
    pub fn arg_text(&self) -> String {
        String::from_utf8_lossy(&self.arg).into_owned()
    }
}

/// Incremental decoder for a growable byte stream.
///
/// The launcher side of the link uses this; the application side reads
/// through the fixed-size [`FrameBuffer`](super::FrameBuffer).
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    prefix: LengthPrefix,
}

impl FrameDecoder {
    /// Create a decoder with an empty buffer.
    pub fn new(prefix: LengthPrefix) -> Self {
        Self {
            buf: Vec::new(),
            prefix,
        }
    }

    /// Feed bytes and extract every complete frame body.
    ///
    /// Incomplete data is kept for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.buf.extend_from_slice(bytes);
        let header = self.prefix.width();
        let mut bodies = Vec::new();

        loop {
            if self.buf.len() < header {
                break;
            }
            let length = self.prefix.read(&self.buf);
            if length > MAX_FRAME_BODY {
                bail!("Frame too large: {length} bytes (max {MAX_FRAME_BODY})");
            }
            let total = header + length;
            if self.buf.len() < total {
                break;
            }
            bodies.push(self.buf[header..total].to_vec());
            self.buf.drain(..total);
        }

        Ok(bodies)
    }

    /// Returns true if partial data is buffered.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}
