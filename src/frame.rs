//! Framing for the chat protocol.
//!
//! Every frame on the wire is a six digit, zero padded decimal byte count
//! followed by exactly that many bytes of percent-encoded text. The decoded
//! text holds up to six whitespace separated fields:
//!
//! ```text
//! type from to arg1 arg2 [payload]
//! ```
//!
//! A single websocket message can carry any number of frames, and a frame may
//! be split across messages, so [`FrameDecoder`] buffers bytes until a whole
//! frame is available.

use std::{fmt, str::FromStr};

use serde_json::{Map, Value};

/// Width of the decimal length header that prefixes every frame.
pub const LENGTH_WIDTH: usize = 6;

const FIELD_COUNT: usize = 5;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum FrameError {
    #[error("invalid frame length header {0:?}")]
    InvalidLength(String),
    #[error("frame body is not valid UTF-8")]
    InvalidUtf8,
    #[error("frame has {0} of 5 mandatory fields")]
    MissingField(usize),
    #[error("field {index} is not an integer: {value:?}")]
    InvalidField { index: usize, value: String },
}

/// The optional sixth field of a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Anything that did not decode as a JSON object.
    Raw(String),
    Structured(Map<String, Value>),
}

impl Payload {
    fn parse(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Payload::Structured(map),
            Ok(_) => Payload::Raw(raw.to_string()),
            Err(e) => {
                trace!("Payload is not structured ({}): {}", e, raw);
                Payload::Raw(raw.to_string())
            }
        }
    }

    pub fn as_structured(&self) -> Option<&Map<String, Value>> {
        match self {
            Payload::Structured(map) => Some(map),
            Payload::Raw(_) => None,
        }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Raw(text) => f.write_str(text),
            Payload::Structured(map) => {
                let json = serde_json::to_string(map).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub kind: i64,
    pub from: i64,
    pub to: i64,
    pub arg1: i64,
    pub arg2: i64,
    pub payload: Option<Payload>,
}

impl Message {
    pub fn new(kind: i64, from: i64, to: i64, arg1: i64, arg2: i64) -> Self {
        Self {
            kind,
            from,
            to,
            arg1,
            arg2,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Decodes a frame body. The body is percent-decoded before it is split.
    pub fn from_bytes(body: &[u8]) -> Result<Self, FrameError> {
        let text = std::str::from_utf8(body).map_err(|_| FrameError::InvalidUtf8)?;
        text.parse()
    }

    /// Text form of the message as the client sends it, terminated by a newline.
    pub fn to_command(&self) -> String {
        format!("{}\n", self)
    }
}

impl FromStr for Message {
    type Err = FrameError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = urlencoding::decode(text).map_err(|_| FrameError::InvalidUtf8)?;
        let (fields, payload) = split_fields(&text);
        if fields.len() < FIELD_COUNT {
            return Err(FrameError::MissingField(fields.len()));
        }

        let mut numbers = [0i64; FIELD_COUNT];
        for (index, (slot, field)) in numbers.iter_mut().zip(&fields).enumerate() {
            *slot = field.parse().map_err(|_| FrameError::InvalidField {
                index,
                value: field.to_string(),
            })?;
        }

        let [kind, from, to, arg1, arg2] = numbers;
        Ok(Self {
            kind,
            from,
            to,
            arg1,
            arg2,
            payload: payload.map(Payload::parse),
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.kind, self.from, self.to, self.arg1, self.arg2
        )?;
        if let Some(payload) = &self.payload {
            write!(f, " {}", payload)?;
        }
        Ok(())
    }
}

/// Splits off the five mandatory fields; whatever follows is the payload.
fn split_fields(text: &str) -> (Vec<&str>, Option<&str>) {
    let mut fields = Vec::with_capacity(FIELD_COUNT);
    let mut rest = text.trim();

    while fields.len() < FIELD_COUNT && !rest.is_empty() {
        match rest.find(char::is_whitespace) {
            Some(idx) => {
                fields.push(&rest[..idx]);
                rest = rest[idx..].trim_start();
            }
            None => {
                fields.push(rest);
                rest = "";
            }
        }
    }

    let payload = (!rest.is_empty()).then_some(rest);
    (fields, payload)
}

/// Prefixes `body` with its length header.
pub fn encode(body: &str) -> String {
    format!("{:0width$}{}", body.len(), body, width = LENGTH_WIDTH)
}

fn parse_length(header: &[u8]) -> Result<usize, FrameError> {
    std::str::from_utf8(header)
        .ok()
        .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| FrameError::InvalidLength(String::from_utf8_lossy(header).into_owned()))
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Takes the next complete frame off the buffer.
    ///
    /// Returns `None` when the buffer holds no complete frame. A frame with a
    /// bad body yields an error and is consumed, so the caller can keep
    /// draining. A bad length header leaves no way to find the next frame
    /// boundary, so the whole buffer is discarded.
    pub fn next_frame(&mut self) -> Option<Result<Message, FrameError>> {
        if self.buf.len() < LENGTH_WIDTH {
            return None;
        }

        let len = match parse_length(&self.buf[..LENGTH_WIDTH]) {
            Ok(len) => len,
            Err(e) => {
                self.buf.clear();
                return Some(Err(e));
            }
        };

        let end = LENGTH_WIDTH + len;
        if self.buf.len() < end {
            return None;
        }

        let frame: Vec<u8> = self.buf.drain(..end).collect();
        Some(Message::from_bytes(&frame[LENGTH_WIDTH..]))
    }

    /// Iterates over every complete frame currently buffered.
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { decoder: self }
    }
}

pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = Result<Message, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decoder.next_frame()
    }
}
