//! Forked test worker side of the fork protocol.
//!
//! The worker reads commands from the master on one byte stream (its
//! stdin) and writes events on another (its stdout). [`CommandReader`]
//! owns the inbound side on a background thread, [`ChannelEncoder`] the
//! outbound side, and [`ForkedBooter`] wires both around a test provider.
//!
//! Nothing here logs to stdout: the library only emits `tracing` events
//! and leaves subscriber setup to the embedding binary.

mod booter;
pub mod config;
mod decoder;
mod dump;
mod encoder;
mod error;
mod listener;
mod listeners;
mod queue;
mod reader;
mod stack_trace;
mod terminator;

pub use booter::{ForkedBooter, ProviderRun, RunResult};
pub use config::BooterConfig;
pub use decoder::ChannelDecoder;
pub use dump::DumpSink;
pub use encoder::ChannelEncoder;
pub use error::{BooterError, BooterResult, ChannelError};
pub use listener::{ConsoleLogger, ConsoleOutputReceiver, ForkedRunListener, RunListener};
pub use listeners::{CommandListener, ListenerId, ListenerRegistry};
pub use queue::WorkQueue;
pub use reader::{CommandReader, ReaderState, TestClasses};
pub use stack_trace::trim_stack_trace;
pub use terminator::{ProcessTerminator, SystemTerminator, apply_shutdown};
