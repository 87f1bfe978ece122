//! Wire protocol between a build master and a forked test worker.
//!
//! Commands flow master→worker over the worker's stdin; events flow
//! worker→master over its stdout. Both directions share the stream with
//! whatever else the process prints, so every frame is anchored by a magic
//! number and free text is Base64 encoded.
//!
//! ## Wire Format
//!
//! ```text
//! :maven-surefire-command:<opcode>:[<base64 data>:]\n
//! :maven-surefire-event:<opcode>:[<run-mode>:][UTF-8:](<field>:)*\n
//! ```
//!
//! - **field**: Base64 text, a decimal integer, or `-` for an absent value
//! - **run-mode**: `normal-run` or `rerun-test-after-failure`
//!
//! ## Commands (master→worker)
//!
//! | Opcode                 | Data                   |
//! |------------------------|------------------------|
//! | `run-testclass`        | class name             |
//! | `testset-finished`     | (none)                 |
//! | `skip-since-next-test` | (none)                 |
//! | `shutdown`             | `testset`/`exit`/`kill`|
//! | `noop`                 | (none)                 |
//! | `bye-ack`              | (none)                 |
//!
//! ## Events (worker→master)
//!
//! | Opcodes                                   | Header          | Fields |
//! |-------------------------------------------|-----------------|--------|
//! | `sys-prop`                                | run-mode, UTF-8 | key, value |
//! | `testset-*`, `test-*`                     | run-mode, UTF-8 | source, source text, name, name text, group, message, elapsed, trace message, smart trace, stack trace |
//! | `std-out-stream[-new-line]`, `std-err-…`  | run-mode, UTF-8 | message |
//! | `console-{info,debug,warning}-log`        | UTF-8           | message |
//! | `console-error-log`, `jvm-exit-error`     | UTF-8           | message, smart trace, stack trace |
//! | `bye`, `stop-on-next-test`, `next-test`   |                 | |

mod command;
mod decoder;
mod error;
mod event;
mod field;
mod run_mode;
mod shutdown;

pub use command::{COMMAND_MAGIC_NUMBER, Command, CommandKind, encode_command};
pub use decoder::{
    CommandDecoder, EventFrame, EventFrameDecoder, MAX_DISCARD_SIZE, MAX_LINE_SIZE, MAX_TOKEN_SIZE,
};
pub use error::ProtocolError;
pub use event::{
    ConsoleLevel, EVENT_MAGIC_NUMBER, ErrorReport, Event, EventKind, OutputStream, ReportEntry,
    StackTrace, TestEventKind, decode_event,
};
pub use field::{CHARSET, NULL_FIELD, SEPARATOR, decode_integer, decode_text};
pub use run_mode::RunMode;
pub use shutdown::{DUMP_DIR_ENV, SHUTDOWN_ENV, ShutdownMode};
