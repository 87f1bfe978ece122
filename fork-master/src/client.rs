//! Async master endpoint for one forked worker.

use std::collections::VecDeque;

use fork_proto::{Command, ErrorReport, Event, EventFrame, EventFrameDecoder, ShutdownMode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, warn};

use crate::error::MasterResult;

const READ_BUF_SIZE: usize = 64 * 1024;

/// What the master saw while driving one worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForkSummary {
    /// Decoded events, corrupted and malformed lines excluded.
    pub events: usize,
    pub classes_sent: Vec<String>,
    pub test_set_finished_sent: bool,
    pub bye_received: bool,
    /// The worker asked to skip the remaining classes.
    pub stopped_on_next_test: bool,
    /// Lines of non-protocol output on the worker's event stream.
    pub corrupted_lines: usize,
    pub malformed_frames: usize,
    pub jvm_exit_error: Option<ErrorReport>,
}

/// Sends commands to a worker and reads its events.
///
/// `R` is the worker's event stream (its stdout), `W` its command
/// stream (its stdin).
pub struct ForkClient<R, W> {
    reader: R,
    writer: W,
    decoder: EventFrameDecoder,
    pending: VecDeque<EventFrame>,
    eof: bool,
    /// Reusable read buffer (avoids inflating async Future size).
    read_buf: Box<[u8; READ_BUF_SIZE]>,
}

impl<R, W> ForkClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            decoder: EventFrameDecoder::new(),
            pending: VecDeque::new(),
            eof: false,
            read_buf: Box::new([0u8; READ_BUF_SIZE]),
        }
    }

    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }

    pub async fn send(&mut self, command: &Command) -> MasterResult<()> {
        debug!(%command, "sending command");
        self.writer.write_all(&command.encode()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn run_class(&mut self, class: &str) -> MasterResult<()> {
        self.send(&Command::run_class(class)).await
    }

    pub async fn test_set_finished(&mut self) -> MasterResult<()> {
        self.send(&Command::test_set_finished()).await
    }

    pub async fn skip_since_next_test(&mut self) -> MasterResult<()> {
        self.send(&Command::skip_since_next_test()).await
    }

    pub async fn shutdown(&mut self, mode: ShutdownMode) -> MasterResult<()> {
        self.send(&Command::shutdown(mode)).await
    }

    pub async fn noop(&mut self) -> MasterResult<()> {
        self.send(&Command::noop()).await
    }

    pub async fn bye_ack(&mut self) -> MasterResult<()> {
        self.send(&Command::bye_ack()).await
    }

    /// Next line from the worker, or `None` once its stream is closed.
    pub async fn next_frame(&mut self) -> MasterResult<Option<EventFrame>> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            if self.eof {
                return Ok(None);
            }

            let n = self.reader.read(self.read_buf.as_mut()).await?;
            if n == 0 {
                self.eof = true;
                self.pending.extend(self.decoder.finish());
            } else {
                // n <= read_buf.len() is guaranteed by read()
                let frames = self
                    .decoder
                    .decode(self.read_buf.get(..n).unwrap_or_default());
                self.pending.extend(frames);
            }
        }
    }

    /// Serve `classes` to the worker until its event stream ends.
    ///
    /// Each `next-test` request is answered with the next class, or with
    /// a single `testset-finished` once none are left; `bye` is answered
    /// with `bye-ack`. Every decoded event is passed to `on_event` in
    /// arrival order.
    pub async fn drive<I, F>(&mut self, classes: I, mut on_event: F) -> MasterResult<ForkSummary>
    where
        I: IntoIterator<Item = String>,
        F: FnMut(&Event),
    {
        let mut queue = classes.into_iter();
        let mut summary = ForkSummary::default();

        while let Some(frame) = self.next_frame().await? {
            let event = match frame {
                EventFrame::Event(event) => event,
                EventFrame::Corrupted(line) => {
                    warn!(%line, "corrupted output on worker event stream");
                    summary.corrupted_lines += 1;
                    continue;
                }
                EventFrame::Malformed { line, error } => {
                    warn!(%line, %error, "malformed event frame");
                    summary.malformed_frames += 1;
                    continue;
                }
            };
            summary.events += 1;

            match &event {
                Event::NextTest => {
                    let next = if summary.stopped_on_next_test {
                        None
                    } else {
                        queue.next()
                    };
                    match next {
                        Some(class) => {
                            self.run_class(&class).await?;
                            summary.classes_sent.push(class);
                        }
                        None if !summary.test_set_finished_sent => {
                            self.test_set_finished().await?;
                            summary.test_set_finished_sent = true;
                        }
                        None => debug!("next-test after test set finished"),
                    }
                }
                Event::StopOnNextTest if !summary.stopped_on_next_test => {
                    summary.stopped_on_next_test = true;
                    self.skip_since_next_test().await?;
                }
                Event::Bye => {
                    summary.bye_received = true;
                    self.bye_ack().await?;
                }
                Event::JvmExitError(report) => {
                    error!(
                        reason = report.message.as_deref().unwrap_or_default(),
                        "worker failed"
                    );
                    summary.jvm_exit_error = Some(report.clone());
                }
                _ => {}
            }
            on_event(&event);
        }

        Ok(summary)
    }
}
