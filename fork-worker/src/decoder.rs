use std::io::{self, Read};

use fork_proto::{Command, CommandDecoder, MAX_DISCARD_SIZE};
use tracing::warn;

use crate::dump::DumpSink;
use crate::error::ChannelError;

/// Read buffer size for the command channel.
const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Turns the worker's inbound byte stream into commands.
///
/// Bytes go through the frame decoder one at a time, so nothing assumes
/// line-buffered input. Noise and malformed frames are logged, dumped and
/// skipped; only end of stream and I/O errors end decoding.
pub struct ChannelDecoder<R> {
    input: R,
    frames: CommandDecoder,
    buf: Vec<u8>,
    pos: usize,
    len: usize,
    dump: DumpSink,
}

impl<R: Read> ChannelDecoder<R> {
    pub fn new(input: R, dump: DumpSink) -> Self {
        Self {
            input,
            frames: CommandDecoder::new(),
            buf: vec![0; READ_BUFFER_SIZE],
            pos: 0,
            len: 0,
            dump,
        }
    }

    /// Next well-formed command.
    pub fn decode(&mut self) -> Result<Command, ChannelError> {
        loop {
            let Some(byte) = self.next_byte()? else {
                let leftover = self.frames.finish();
                self.report_noise(&leftover);
                return Err(ChannelError::EndOfStream);
            };

            let result = self.frames.push(byte);
            let full = self.frames.discarded_len() >= MAX_DISCARD_SIZE;
            if byte == b'\n' || result.is_some() || full {
                let noise = self.frames.take_discarded();
                self.report_noise(&noise);
            }

            match result {
                Some(Ok(command)) => return Ok(command),
                Some(Err(e)) => {
                    self.dump
                        .dump_stream_error(&e, "Malformed command frame from the master process");
                }
                None => {}
            }
        }
    }

    fn next_byte(&mut self) -> Result<Option<u8>, ChannelError> {
        if self.pos >= self.len {
            loop {
                match self.input.read(&mut self.buf) {
                    Ok(0) => return Ok(None),
                    Ok(n) => {
                        self.pos = 0;
                        self.len = n;
                        break;
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(ChannelError::Io(e)),
                }
            }
        }
        let byte = self.buf.get(self.pos).copied();
        self.pos += 1;
        Ok(byte)
    }

    fn report_noise(&self, noise: &[u8]) {
        if noise.is_empty() {
            return;
        }
        warn!(bytes = noise.len(), "discarded non-protocol bytes on command channel");
        self.dump.dump_stream_text(&format!(
            "Corrupted command channel, discarded: {}",
            String::from_utf8_lossy(noise)
        ));
    }
}
