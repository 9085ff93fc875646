//! Purpose: `plinth` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs commands, emits results on
//! stdout.
//! Invariants: JSON payload schemas are typed structs, stable and
//! additive-only once published.
//! Invariants: Non-interactive errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `api::to_exit_code`.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use plinth::api::{reference_string, resolve_bundles, to_exit_code, Error, FileLockService};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }
}

#[derive(Serialize)]
struct MarkerPayload {
    target: String,
    marker: String,
}

#[derive(Serialize)]
struct LockPayload {
    marker: String,
    acquired: bool,
    held_ms: u64,
}

#[derive(Serialize)]
struct ResolvePayload {
    bundles: Vec<String>,
}

#[derive(Serialize)]
struct ErrorPayload {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
}

fn emit_json(payload: &impl Serialize) {
    match serde_json::to_string(payload) {
        Ok(line) => println!("{line}"),
        Err(err) => tracing::error!("could not serialize output: {err}"),
    }
}

fn main() {
    init_tracing();
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_env("PLINTH_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn emit_error(err: &Error) {
    let payload = ErrorPayload {
        error: ErrorBody {
            kind: format!("{:?}", err.kind()),
            message: err.to_string(),
        },
    };
    match serde_json::to_string(&payload) {
        Ok(line) => eprintln!("{line}"),
        Err(serialize_err) => eprintln!("{err} (unserializable: {serialize_err})"),
    }
}

#[derive(Parser, Debug)]
#[command(name = "plinth", version, about = "Plugin-runtime staging and cross-process file locks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the canonical lock-marker path for a target without locking it.
    Marker(MarkerArgs),
    /// Acquire the lock for a target, optionally hold it, then release.
    Lock(LockArgs),
    /// Resolve an installation's bundle reference string.
    Resolve(ResolveArgs),
}

#[derive(Args, Debug)]
struct MarkerArgs {
    /// Lock target (file or directory).
    target: PathBuf,
    /// Emit JSON instead of the bare path.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct LockArgs {
    /// Lock target (file or directory).
    target: PathBuf,
    /// Poll for at most this long instead of blocking indefinitely.
    #[arg(long)]
    timeout_ms: Option<i64>,
    /// Keep the lock held this long before releasing.
    #[arg(long, default_value_t = 0)]
    hold_ms: u64,
    /// Emit a JSON summary after release.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct ResolveArgs {
    /// Installation root containing a `plugins/` directory.
    install_root: PathBuf,
    /// Extra bundle location, appended after the plugin directory entries.
    #[arg(long = "extra")]
    extra: Vec<PathBuf>,
    /// Emit the references as a JSON array instead of the joined string.
    #[arg(long)]
    json: bool,
}

fn run() -> Result<RunOutcome, Error> {
    let cli = Cli::parse();
    match cli.command {
        Command::Marker(args) => run_marker(args),
        Command::Lock(args) => run_lock(args),
        Command::Resolve(args) => run_resolve(args),
    }
}

fn run_marker(args: MarkerArgs) -> Result<RunOutcome, Error> {
    let handle = FileLockService::new().get_locker(&args.target)?;
    if args.json {
        emit_json(&MarkerPayload {
            target: args.target.display().to_string(),
            marker: handle.marker_path().display().to_string(),
        });
    } else {
        println!("{}", handle.marker_path().display());
    }
    Ok(RunOutcome::ok())
}

fn run_lock(args: LockArgs) -> Result<RunOutcome, Error> {
    let mut handle = FileLockService::new().get_locker(&args.target)?;
    match args.timeout_ms {
        Some(timeout_ms) => handle.lock_timeout(timeout_ms)?,
        None => handle.lock()?,
    }
    tracing::debug!(marker = %handle.marker_path().display(), "lock acquired");
    if args.hold_ms > 0 {
        std::thread::sleep(Duration::from_millis(args.hold_ms));
    }
    let marker = handle.marker_path().display().to_string();
    handle.release()?;
    if args.json {
        emit_json(&LockPayload {
            marker,
            acquired: true,
            held_ms: args.hold_ms,
        });
    }
    Ok(RunOutcome::ok())
}

fn run_resolve(args: ResolveArgs) -> Result<RunOutcome, Error> {
    let extra: BTreeSet<PathBuf> = args.extra.into_iter().collect();
    if args.json {
        let references = resolve_bundles(&args.install_root, &extra)?;
        emit_json(&ResolvePayload {
            bundles: references
                .iter()
                .map(|reference| reference.as_str().to_string())
                .collect(),
        });
    } else {
        println!("{}", reference_string(&args.install_root, &extra)?);
    }
    Ok(RunOutcome::ok())
}
