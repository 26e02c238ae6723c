//! STOMP 1.2 frame model and wire codec.
//!
//! A `Frame` is the one wire-level value the rest of the broker deals in:
//! command, headers, body. Parsing is a hand-rolled byte-slice scanner
//! rather than a parser-combinator grammar — the teacher crate this was
//! built from used `nom`'s old macro API, but a line-oriented text protocol
//! with a single binary-length fast path (the `content-length` header) reads
//! more plainly as a direct scan, matching the `Frame::check`/`Frame::parse`
//! split used elsewhere in the example pack for similar framed protocols.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{CodecError, FrameError};

/// The STOMP 1.2 commands this broker recognizes, lowercase, for dispatch.
///
/// Transactions and ACK/NACK are recognized here (so a client sending them
/// doesn't trip an "unrecognized command" error) but are not wired to any
/// handler logic — see spec Non-goals.
pub const VALID_COMMANDS: &[&str] = &[
    "connect",
    "stomp",
    "connected",
    "send",
    "message",
    "subscribe",
    "unsubscribe",
    "begin",
    "commit",
    "abort",
    "ack",
    "nack",
    "disconnect",
    "error",
    "receipt",
];

pub fn is_recognized_command(command: &str) -> bool {
    let lower = command.to_ascii_lowercase();
    VALID_COMMANDS.contains(&lower.as_str())
}

/// One STOMP frame: command, ordered headers, opaque body.
///
/// Headers are kept in a `Vec` rather than a `HashMap` so wire order is
/// preserved on serialization; duplicate names are deduplicated first-wins
/// at parse time (STOMP 1.2 §3.2), while programmatic mutation through
/// [`Frame::set_header`] behaves like a normal map (last write wins).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Frame {
            command: command.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_body(command: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Frame {
            command: command.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Command normalized to lowercase, for dispatch (spec §3).
    pub fn command_lower(&self) -> String {
        self.command.to_ascii_lowercase()
    }

    pub fn set_command(&mut self, command: impl Into<String>) {
        self.command = command.into();
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Sets a header, overwriting any existing value for `name` in place
    /// (or appending if absent). This is the "last-writer-wins" mutation
    /// path for code that builds/amends frames, distinct from parser
    /// dedup, which is first-wins.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(entry) = self.headers.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = value;
        } else {
            self.headers.push((name, value));
        }
    }

    /// Sets a header only if not already present.
    pub fn set_header_if_absent(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        if self.header(&name).is_none() {
            self.headers.push((name, value.into()));
        }
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    pub fn transaction(&self) -> Option<&str> {
        self.header("transaction")
    }

    /// Builds a CONNECTED response frame carrying the negotiated session id.
    pub fn connected(session: impl Into<String>) -> Self {
        let mut frame = Frame::new("CONNECTED");
        frame.set_header("session", session.into());
        frame.set_header("version", "1.2");
        frame
    }

    /// Builds an ERROR frame. Always carries `message`; `content-length` is
    /// stamped on serialization from the body length.
    pub fn error_frame(message: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        let mut frame = Frame::with_body("ERROR", body);
        frame.set_header("message", message.into());
        frame.set_header("content-type", "text/plain");
        frame
    }

    /// Builds a RECEIPT frame acknowledging `receipt_id`.
    pub fn receipt(receipt_id: impl Into<String>) -> Self {
        let mut frame = Frame::new("RECEIPT");
        frame.set_header("receipt-id", receipt_id.into());
        frame
    }

    /// Serializes this frame to the wire format: command line, header
    /// lines, blank line, body, NUL terminator. `content-length` is
    /// computed here if not already present (spec §4.1 serialize contract).
    pub fn serialize(&self, buf: &mut BytesMut) {
        let has_content_length = self.header("content-length").is_some();
        let extra = if has_content_length {
            0
        } else {
            "content-length:".len() + 10 + 1
        };
        let needed = self.command.len()
            + 1
            + self
                .headers
                .iter()
                .fold(0, |acc, (k, v)| acc + k.len() + v.len() + 2)
            + extra
            + 1
            + self.body.len()
            + 1;
        buf.reserve(needed);

        buf.put_slice(self.command.as_bytes());
        buf.put_u8(b'\n');
        for (name, value) in &self.headers {
            buf.put_slice(name.as_bytes());
            buf.put_u8(b':');
            buf.put_slice(value.as_bytes());
            buf.put_u8(b'\n');
        }
        if !has_content_length {
            buf.put_slice(format!("content-length:{}\n", self.body.len()).as_bytes());
        }
        buf.put_u8(b'\n');
        buf.put_slice(&self.body);
        buf.put_u8(0);
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        self.serialize(&mut buf);
        buf
    }

    /// Parses exactly one frame out of a complete in-memory buffer. Unlike
    /// the streaming [`StompCodec`], this fails with [`FrameError::IncompleteFrame`]
    /// rather than waiting for more input.
    pub fn parse_complete(buf: &[u8]) -> Result<Frame, FrameError> {
        match decode_frame(buf)? {
            Some((frame, _consumed)) => Ok(frame),
            None => Err(FrameError::IncompleteFrame),
        }
    }
}

fn find_byte(buf: &[u8], start: usize, byte: u8) -> Option<usize> {
    buf[start..].iter().position(|&b| b == byte).map(|i| i + start)
}

fn strip_cr(s: &[u8]) -> &[u8] {
    if s.last() == Some(&b'\r') {
        &s[..s.len() - 1]
    } else {
        s
    }
}

/// Attempts to decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when there isn't enough data yet to tell whether the
/// frame is malformed (the caller should wait for more bytes), `Ok(Some((frame,
/// consumed)))` on success, or `Err` for a frame that is definitively bad
/// (a `content-length` whose following byte isn't NUL).
fn decode_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, FrameError> {
    if buf.is_empty() {
        return Err(FrameError::EmptyBuffer);
    }

    let mut pos = 0usize;

    // Tolerate (and skip) stray leading blank lines, e.g. heartbeat newlines.
    let command_end = loop {
        let lf = match find_byte(buf, pos, b'\n') {
            Some(i) => i,
            None => return Ok(None),
        };
        if lf == pos {
            pos = lf + 1;
            continue;
        }
        break lf;
    };
    let command = String::from_utf8_lossy(strip_cr(&buf[pos..command_end])).into_owned();
    pos = command_end + 1;

    let mut headers: Vec<(String, String)> = Vec::new();
    loop {
        let lf = match find_byte(buf, pos, b'\n') {
            Some(i) => i,
            None => return Ok(None),
        };
        if lf == pos {
            // Blank line: end of headers.
            pos = lf + 1;
            break;
        }
        let line = strip_cr(&buf[pos..lf]);
        pos = lf + 1;
        if let Some(colon) = line.iter().position(|&b| b == b':') {
            let name = String::from_utf8_lossy(&line[..colon]).trim().to_string();
            let value = String::from_utf8_lossy(&line[colon + 1..])
                .trim()
                .to_string();
            // First occurrence wins (STOMP 1.2 §3.2); later duplicates are dropped.
            if !headers.iter().any(|(n, _)| n == &name) {
                headers.push((name, value));
            }
        }
    }

    let content_length = headers
        .iter()
        .find(|(n, _)| n == "content-length")
        .map(|(_, v)| v.clone());

    let body_start = pos;
    let (body, after_body) = match content_length {
        Some(raw_len) => {
            let len: usize = raw_len.parse().map_err(|_| FrameError::BodyNotTerminated)?;
            if buf.len() < body_start + len + 1 {
                return Ok(None);
            }
            let body = buf[body_start..body_start + len].to_vec();
            if buf[body_start + len] != 0 {
                return Err(FrameError::BodyNotTerminated);
            }
            (body, body_start + len + 1)
        }
        None => match find_byte(buf, body_start, 0u8) {
            None => return Ok(None),
            Some(nul) => (buf[body_start..nul].to_vec(), nul + 1),
        },
    };

    // Tolerate trailing blank lines (heartbeat padding) after the NUL.
    let mut end = after_body;
    loop {
        match buf.get(end) {
            Some(&b'\n') => end += 1,
            Some(&b'\r') if buf.get(end + 1) == Some(&b'\n') => end += 2,
            _ => break,
        }
    }

    Ok(Some((
        Frame {
            command,
            headers,
            body,
        },
        end,
    )))
}

/// `tokio_util` codec bridging raw bytes and [`Frame`]s, so any
/// `AsyncRead + AsyncWrite` transport can be wrapped in a `Framed<_, StompCodec>`.
#[derive(Debug, Default)]
pub struct StompCodec;

impl Decoder for StompCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        if src.is_empty() {
            return Ok(None);
        }
        match decode_frame(src) {
            Ok(Some((frame, consumed))) => {
                src.advance(consumed);
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(FrameError::EmptyBuffer) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Encoder<Frame> for StompCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), CodecError> {
        item.serialize(dst);
        Ok(())
    }
}
