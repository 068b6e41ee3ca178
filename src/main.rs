use anyhow::Result;
use clap::Parser;
use flowcast::{handle_line, ControlMode, FlowcastConfig, LoggingSink, SourceKind, StreamController};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};

#[derive(Parser, Debug)]
#[command(name = "flowcast")]
#[command(about = "Adaptive live video streaming core")]
#[command(version)]
#[command(long_about = "Streams JPEG frames from a video file or a capture device and adapts \
resolution and bitrate to reported network conditions. Control requests are read from stdin \
as one JSON object per line; responses are written to stdout.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "flowcast.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the stream")]
    validate_config: bool,

    /// Print effective configuration and exit
    #[arg(long, help = "Print the effective configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to daily rotated files in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<String>,

    /// Override the initial source (file or device)
    #[arg(long, value_name = "SOURCE")]
    source: Option<SourceKind>,

    /// Override the initial control mode (manual or adaptive)
    #[arg(long, value_name = "MODE")]
    mode: Option<ControlMode>,
}

#[derive(Debug)]
enum ShutdownReason {
    Signal(&'static str),
    InputClosed,
    SignalHandlersGone,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays a clean response channel
    let log_guard = init_logging(&args)?;

    info!("Starting Flowcast v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = match FlowcastConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Some(source) = args.source {
        config.controller.initial_source = source;
    }
    if let Some(mode) = args.mode {
        config.controller.initial_mode = mode;
    }

    if args.print_config {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                info!("Configuration validation successful");
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                exit_with(1, log_guard);
            }
        }
    }

    let controller = Arc::new(StreamController::new(config).await.map_err(|e| {
        error!("Failed to create stream controller: {}", e);
        e
    })?);

    controller.start().await.map_err(|e| {
        error!("Failed to start stream controller: {}", e);
        e
    })?;

    controller
        .spawn_emitter(Arc::new(LoggingSink::new("log", 300)))
        .await?;

    let mut control = tokio::spawn(run_control_channel(Arc::clone(&controller)));

    let (shutdown_sender, shutdown_receiver) = oneshot::channel();
    setup_signal_handlers(shutdown_sender);

    let reason = tokio::select! {
        reason = shutdown_receiver => reason.unwrap_or(ShutdownReason::SignalHandlersGone),
        _ = &mut control => ShutdownReason::InputClosed,
    };
    match reason {
        ShutdownReason::SignalHandlersGone => {
            warn!("Signal handlers exited without a shutdown request")
        }
        reason => info!("Shutdown initiated: {:?}", reason),
    }

    control.abort();
    let exit_code = controller.shutdown().await?;

    info!("Flowcast exited with code: {}", exit_code);
    exit_with(exit_code, log_guard);
}

/// Flush the file log writer, then exit. `process::exit` skips destructors.
fn exit_with(code: i32, log_guard: Option<WorkerGuard>) -> ! {
    drop(log_guard);
    std::process::exit(code);
}

/// Daily rotated log file writer in `dir`
fn file_log_writer(dir: &str) -> (NonBlocking, WorkerGuard) {
    let appender = tracing_appender::rolling::daily(dir, "flowcast.log");
    tracing_appender::non_blocking(appender)
}

/// Answer one JSON control request per stdin line until stdin closes
async fn run_control_channel(controller: Arc<StreamController>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Control input closed");
                break;
            }
            Err(e) => {
                error!("Failed to read control input: {}", e);
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(&controller, &line).await;
        let mut payload = match serde_json::to_vec(&response) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize control response: {}", e);
                continue;
            }
        };
        payload.push(b'\n');

        if let Err(e) = stdout.write_all(&payload).await {
            error!("Failed to write control response: {}", e);
            break;
        }
        let _ = stdout.flush().await;
    }
}

fn setup_signal_handlers(shutdown_sender: oneshot::Sender<ShutdownReason>) {
    let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));

    // Handle SIGTERM (service stop) - Unix only
    #[cfg(unix)]
    {
        let shutdown_sender_sigterm = Arc::clone(&shutdown_sender);
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    error!("Failed to register SIGTERM handler: {}", e);
                    return;
                }
            };
            if sigterm.recv().await.is_some() {
                info!("Received SIGTERM signal");
                if let Some(sender) = shutdown_sender_sigterm.lock().await.take() {
                    let _ = sender.send(ShutdownReason::Signal("SIGTERM"));
                }
            }
        });
    }

    // Handle SIGINT (Ctrl+C) - Cross-platform
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received SIGINT signal (Ctrl+C)");
            if let Some(sender) = shutdown_sender.lock().await.take() {
                let _ = sender.send(ShutdownReason::Signal("SIGINT"));
            }
        }
    });
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Determine log level based on flags
    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("flowcast={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .boxed()
        }
    };

    let (file_layer, guard) = match args.log_dir.as_deref() {
        Some(dir) => {
            let (writer, guard) = file_log_writer(dir);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}
