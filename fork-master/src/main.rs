use std::fmt;
use std::path::PathBuf;
use std::process::{ExitCode, Stdio};
use std::time::Instant;

use clap::Parser;
use fork_master::{ForkClient, ForkSummary, MasterError, MasterResult};
use fork_proto::{ConsoleLevel, DUMP_DIR_ENV, Event, OutputStream, SHUTDOWN_ENV, ShutdownMode, TestEventKind};
use tracing::{info, warn};
use tracing_subscriber::fmt::time::FormatTime;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

#[derive(Parser)]
#[command(name = "fork-master", version)]
/// Fork a test worker, feed it test classes and print its events
struct Cli {
    /// What the worker does if this process goes away: testset, exit or kill
    #[arg(long, default_value = "testset", value_parser = parse_shutdown)]
    shutdown: ShutdownMode,
    /// Test class to run (repeatable)
    #[arg(long = "class", value_name = "NAME")]
    classes: Vec<String>,
    /// Directory where the worker writes its dump files
    #[arg(long)]
    dump_dir: Option<PathBuf>,
    /// Worker command line
    #[arg(last = true, required = true, value_name = "WORKER")]
    worker: Vec<String>,
}

fn parse_shutdown(parameter: &str) -> Result<ShutdownMode, String> {
    ShutdownMode::from_parameter(parameter).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_timer(Elapsed(Instant::now()))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> MasterResult<ExitCode> {
    let Some((program, args)) = cli.worker.split_first() else {
        return Err(MasterError::Config("missing worker command".into()));
    };

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .env(SHUTDOWN_ENV, cli.shutdown.parameter())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);
    if let Some(dir) = &cli.dump_dir {
        cmd.env(DUMP_DIR_ENV, dir);
    }

    info!(worker = %program, shutdown = %cli.shutdown, classes = cli.classes.len(), "forking worker");
    let mut child = cmd
        .spawn()
        .map_err(|e| MasterError::Spawn(format!("{program}: {e}")))?;
    let (Some(stdout), Some(stdin)) = (child.stdout.take(), child.stdin.take()) else {
        return Err(MasterError::Spawn("worker stdio not captured".into()));
    };

    let mut client = ForkClient::new(stdout, stdin);
    let summary = client.drive(cli.classes, print_event).await?;
    // Closing stdin tells the worker the master is gone.
    drop(client);
    let status = child.wait().await?;

    info!(
        status = %status,
        events = summary.events,
        classes = summary.classes_sent.len(),
        corrupted = summary.corrupted_lines,
        "worker finished"
    );
    Ok(exit_code(&summary, status.success()))
}

fn exit_code(summary: &ForkSummary, worker_succeeded: bool) -> ExitCode {
    if !summary.bye_received {
        warn!("worker exited without saying bye");
    }
    if worker_succeeded && summary.bye_received && summary.jvm_exit_error.is_none() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_event(event: &Event) {
    match event {
        Event::Test { kind, entry, .. } => {
            let source = entry.source_name.as_deref().unwrap_or("?");
            let label = match &entry.name {
                Some(name) => format!("{source}#{name}"),
                None => source.to_string(),
            };
            let status = match kind {
                TestEventKind::TestSetStarting => "RUNNING",
                TestEventKind::TestSetCompleted => "DONE",
                TestEventKind::TestStarting => "START",
                TestEventKind::TestSucceeded => "PASS",
                TestEventKind::TestFailed => "FAIL",
                TestEventKind::TestSkipped => "SKIP",
                TestEventKind::TestError => "ERROR",
                TestEventKind::TestAssumptionFailure => "ASSUME",
            };
            match entry.elapsed_ms {
                Some(ms) => println!("[{status}] {label} ({ms} ms)"),
                None => println!("[{status}] {label}"),
            }
            if let Some(message) = &entry.message {
                println!("    {message}");
            }
        }
        Event::Output {
            stream, message, new_line, ..
        } => {
            let message = message.as_deref().unwrap_or_default();
            match (stream, new_line) {
                (OutputStream::Stdout, true) => println!("{message}"),
                (OutputStream::Stdout, false) => print!("{message}"),
                (OutputStream::Stderr, true) => eprintln!("{message}"),
                (OutputStream::Stderr, false) => eprint!("{message}"),
            }
        }
        Event::Console { level, message } => {
            let message = message.as_deref().unwrap_or_default();
            match level {
                ConsoleLevel::Info => info!(target: "worker", "{message}"),
                ConsoleLevel::Debug => tracing::debug!(target: "worker", "{message}"),
                ConsoleLevel::Warning => warn!(target: "worker", "{message}"),
            }
        }
        Event::ConsoleError(report) => {
            tracing::error!(
                target: "worker",
                trace = report.stack_trace.as_deref().unwrap_or_default(),
                "{}",
                report.message.as_deref().unwrap_or_default()
            );
        }
        _ => {}
    }
}
