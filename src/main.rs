use anyhow::{Context, Result};
use clap::builder::RangedU64ValueParser;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};

use clap_verbosity_flag::{InfoLevel, Verbosity};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use ssm2_lib::constants::{DEFAULT_MAX_ADDRESSES, MAX_ADDRESSES_PER_REQUEST};
use ssm2_lib::{ShutdownFlag, Ssm2Connection};

mod output;
mod session;

/// How long a stop request may take before the serial port is closed under the reader.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Live telemetry logger for Subaru ECUs speaking SSM2 over a K-line cable.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial device of the K-line adapter.
    #[arg(short, long, default_value = "/dev/ttyUSB0", global = true)]
    port: String,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long, global = true)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream parameters from the ECU until interrupted.
    Log(LogArgs),
    /// List the parameters the connected ECU supports.
    Params(ParamsArgs),
}

#[derive(Args, Debug)]
pub struct LogArgs {
    /// RomRaider logger definition file.
    #[arg(short, long)]
    pub defs: PathBuf,
    #[arg(short, long, value_enum, default_value_t = LogFormat::Csv)]
    pub format: LogFormat,
    /// Comma separated parameter names; a built-in set is used when omitted.
    #[arg(long, conflicts_with = "all")]
    pub params: Option<String>,
    /// Log every parameter the ECU supports.
    #[arg(long)]
    pub all: bool,
    /// Upper bound on addresses per read request.
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_ADDRESSES,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..=MAX_ADDRESSES_PER_REQUEST as u64)
    )]
    pub max_addresses: usize,
    /// Serve NDJSON to a single client on this unix socket instead of stdout.
    #[arg(long)]
    pub unix_socket: Option<PathBuf>,
    /// Directory for CSV log files.
    #[arg(long, default_value = ".")]
    pub logfile_path: PathBuf,
}

#[derive(Args, Debug)]
pub struct ParamsArgs {
    /// RomRaider logger definition file.
    #[arg(short, long)]
    pub defs: PathBuf,
    #[arg(short, long, value_enum, default_value_t = ListFormat::Text)]
    pub format: ListFormat,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Csv,
    Ndjson,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ListFormat {
    Text,
    Ndjson,
}

fn setup_logging(log_file_path: Option<PathBuf>, verbosity: &Verbosity<InfoLevel>) -> Result<Option<WorkerGuard>> {
    // stdout may carry NDJSON samples, so the console goes to stderr
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false);

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path).with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // INFO by default, DEBUG with -v, TRACE with -vv
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file, &cli.verbose)?;

    let result = match cli.command {
        Command::Log(args) => run_log(cli.port, args).await,
        Command::Params(args) => run_params(cli.port, args).await,
    };
    if let Err(e) = result {
        error!("{:?}", e);
        process::exit(1);
    }

    Ok(())
}

async fn run_log(port: String, args: LogArgs) -> Result<()> {
    if args.unix_socket.is_some() && args.format != LogFormat::Ndjson {
        anyhow::bail!("--unix-socket requires --format ndjson");
    }

    let connection: Ssm2Connection = Ssm2Connection::new();
    let close_handle = connection.close_handle();
    let shutdown = ShutdownFlag::new();

    let worker_shutdown = shutdown.clone();
    let mut worker =
        tokio::task::spawn_blocking(move || session::log_session(connection, &port, &args, &worker_shutdown));

    tokio::select! {
        result = &mut worker => return result.context("Logging task panicked")?,
        signal = shutdown_signal() => {
            signal?;
            info!("Stop requested, finishing the current sample");
            shutdown.request();
        }
    }

    match tokio::time::timeout(SHUTDOWN_GRACE, &mut worker).await {
        Ok(result) => result.context("Logging task panicked")?,
        Err(_) => {
            warn!("ECU went quiet, closing the serial port");
            close_handle.close();
            worker.await.context("Logging task panicked")?
        }
    }
}

async fn run_params(port: String, args: ParamsArgs) -> Result<()> {
    let connection: Ssm2Connection = Ssm2Connection::new();
    tokio::task::spawn_blocking(move || session::list_parameters(connection, &port, &args))
        .await
        .context("Parameter listing task panicked")?
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() -> Result<()> {
    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}
