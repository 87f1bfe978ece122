//! Incremental decoders for both directions of the channel.
//!
//! Both tolerate partial reads and resynchronize on noise: bytes that do
//! not belong to a frame are set aside for diagnostics instead of failing
//! the stream.

use std::mem;

use crate::command::COMMAND_MAGIC_NUMBER;
use crate::event::EVENT_MAGIC_NUMBER;
use crate::field::SEPARATOR;
use crate::{Command, CommandKind, Event, ProtocolError, decode_event};

/// Longest single token accepted by [`CommandDecoder`].
pub const MAX_TOKEN_SIZE: usize = 1024 * 1024;

/// Noise kept by [`CommandDecoder`] between two calls to
/// [`CommandDecoder::take_discarded`]. Bytes past this are dropped.
pub const MAX_DISCARD_SIZE: usize = 64 * 1024;

/// Longest event line accepted by [`EventFrameDecoder`] before it is
/// flushed as corrupted output.
pub const MAX_LINE_SIZE: usize = 16 * 1024 * 1024;

const SEP: u8 = SEPARATOR as u8;

/// Byte-at-a-time decoder for master→worker command frames.
///
/// A `:` opens a frame and terminates every token inside it. A frame is
/// complete once it holds the magic number, the opcode, and as many data
/// tokens as the opcode's arity. A line break inside a frame, a wrong
/// magic number or an unknown opcode abandons the frame; the separator
/// that ended the offending token may open the next frame.
#[derive(Debug, Default)]
pub struct CommandDecoder {
    in_frame: bool,
    token: Vec<u8>,
    tokens: Vec<String>,
    kind: Option<CommandKind>,
    discarded: Vec<u8>,
}

impl CommandDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte. Returns a result when a frame completes or is
    /// abandoned; `None` while more bytes are needed.
    pub fn push(&mut self, byte: u8) -> Option<Result<Command, ProtocolError>> {
        if !self.in_frame {
            match byte {
                SEP => self.in_frame = true,
                b'\n' | b'\r' => {}
                other if self.discarded.len() < MAX_DISCARD_SIZE => self.discarded.push(other),
                _ => {}
            }
            return None;
        }

        match byte {
            SEP => self.end_token(),
            b'\n' | b'\r' if self.token.is_empty() && self.tokens.is_empty() => {
                self.reset(false);
                None
            }
            b'\n' | b'\r' => {
                self.abandon(false);
                Some(Err(ProtocolError::Malformed(
                    "line break inside command frame".into(),
                )))
            }
            other if self.token.len() >= MAX_TOKEN_SIZE => {
                self.token.push(other);
                self.abandon(false);
                Some(Err(ProtocolError::Malformed(format!(
                    "command token exceeds {MAX_TOKEN_SIZE} bytes"
                ))))
            }
            other => {
                self.token.push(other);
                None
            }
        }
    }

    /// Bytes dropped as noise since the last call.
    pub fn take_discarded(&mut self) -> Vec<u8> {
        mem::take(&mut self.discarded)
    }

    /// Number of noise bytes waiting in [`CommandDecoder::take_discarded`].
    pub fn discarded_len(&self) -> usize {
        self.discarded.len()
    }

    /// True when no frame is partially buffered.
    pub fn is_idle(&self) -> bool {
        !self.in_frame && self.token.is_empty() && self.tokens.is_empty()
    }

    /// Abandon any partial frame and return everything set aside so far.
    pub fn finish(&mut self) -> Vec<u8> {
        if self.in_frame {
            self.abandon(false);
        }
        self.take_discarded()
    }

    fn end_token(&mut self) -> Option<Result<Command, ProtocolError>> {
        let raw = mem::take(&mut self.token);
        let token = match String::from_utf8(raw) {
            Ok(token) => token,
            Err(e) => {
                self.token = e.into_bytes();
                self.abandon(true);
                return Some(Err(ProtocolError::InvalidUtf8));
            }
        };

        match self.tokens.len() {
            0 if token.is_empty() => None,
            0 if token != COMMAND_MAGIC_NUMBER => {
                self.token = token.into_bytes();
                self.abandon(true);
                None
            }
            0 => {
                self.tokens.push(token);
                None
            }
            1 => match CommandKind::from_opcode(&token) {
                Some(kind) => {
                    self.kind = Some(kind);
                    self.tokens.push(token);
                    self.complete_if_ready(kind)
                }
                None => {
                    self.token = token.clone().into_bytes();
                    self.abandon(true);
                    Some(Err(ProtocolError::UnknownOpcode(token)))
                }
            },
            _ => {
                self.tokens.push(token);
                match self.kind {
                    Some(kind) => self.complete_if_ready(kind),
                    None => None,
                }
            }
        }
    }

    fn complete_if_ready(&mut self, kind: CommandKind) -> Option<Result<Command, ProtocolError>> {
        if self.tokens.len() < 2 + kind.arity() {
            return None;
        }
        let tokens = mem::take(&mut self.tokens);
        self.reset(false);
        Some(Command::from_tokens(kind, tokens.get(2..).unwrap_or(&[])))
    }

    /// Move the partial frame into the discarded bytes. With `reopen`, the
    /// separator that ended the current token opens a new frame.
    fn abandon(&mut self, reopen: bool) {
        self.discarded.push(SEP);
        for token in &self.tokens {
            self.discarded.extend_from_slice(token.as_bytes());
            self.discarded.push(SEP);
        }
        self.discarded.extend_from_slice(&self.token);
        self.tokens.clear();
        self.token.clear();
        self.reset(reopen);
    }

    fn reset(&mut self, reopen: bool) {
        self.in_frame = reopen;
        self.kind = None;
    }
}

/// One line read from the worker's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFrame {
    Event(Event),
    /// Output that is not an event frame, typically a stray write to the
    /// worker's stdout.
    Corrupted(String),
    /// Carried the event magic number but failed to decode.
    Malformed { line: String, error: ProtocolError },
}

/// Line-oriented decoder for worker→master event frames.
#[derive(Debug, Default)]
pub struct EventFrameDecoder {
    buf: Vec<u8>,
}

impl EventFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed data and extract every complete line.
    pub fn decode(&mut self, data: &[u8]) -> Vec<EventFrame> {
        self.buf.extend_from_slice(data);
        let mut frames = Vec::new();
        let mut offset = 0;

        while let Some(pos) = self
            .buf
            .get(offset..)
            .and_then(|rest| rest.iter().position(|&b| b == b'\n'))
        {
            let end = offset + pos;
            if let Some(line) = self.buf.get(offset..end) {
                decode_line(line, &mut frames);
            }
            offset = end + 1;
        }

        if offset > 0 {
            self.buf.drain(..offset);
        }
        if self.buf.len() > MAX_LINE_SIZE {
            let line = mem::take(&mut self.buf);
            frames.push(EventFrame::Corrupted(String::from_utf8_lossy(&line).into_owned()));
        }
        frames
    }

    /// Flush an unterminated trailing line at end of stream.
    pub fn finish(&mut self) -> Vec<EventFrame> {
        let mut frames = Vec::new();
        let line = mem::take(&mut self.buf);
        decode_line(&line, &mut frames);
        frames
    }
}

fn decode_line(line: &[u8], frames: &mut Vec<EventFrame>) {
    let line = String::from_utf8_lossy(line);
    let line = line.trim_end_matches('\r');
    if line.is_empty() {
        return;
    }

    let anchor = format!("{SEPARATOR}{EVENT_MAGIC_NUMBER}{SEPARATOR}");
    let Some(start) = line.find(&anchor) else {
        frames.push(EventFrame::Corrupted(line.to_string()));
        return;
    };

    let (noise, frame) = line.split_at(start);
    if !noise.is_empty() {
        frames.push(EventFrame::Corrupted(noise.to_string()));
    }
    frames.push(match decode_event(frame) {
        Ok(event) => EventFrame::Event(event),
        Err(error) => EventFrame::Malformed {
            line: frame.to_string(),
            error,
        },
    });
}
