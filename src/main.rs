//! Linecast - newline-delimited TCP message server
//!
//! Accepts any number of TCP clients, prints every line they send and
//! broadcasts lines typed on stdin to all of them.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use std::io::BufRead;
use tokio::sync::{mpsc, Notify};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use linecast::{
    config::{Config, ConfigManager},
    console::{ConsoleCommand, Flow},
    metrics::MetricsServer,
    shutdown::ShutdownAwareTask,
    LineServer, ShutdownCoordinator,
};

/// CLI arguments for Linecast
#[derive(Parser, Debug)]
#[command(name = "linecast")]
#[command(about = "Linecast - newline-delimited TCP message server")]
#[command(version)]
#[command(long_about = "
Linecast - newline-delimited TCP message server

Every line a client sends (terminated by \\n) is printed to stdout.
Every line typed on stdin is broadcast to all connected clients.
Type /help for console commands.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  LINECAST_BIND_ADDRESS   - Bind address (IP, hostname, or empty for all)
  LINECAST_PORT           - Listening port
  LINECAST_ENCODING       - Text encoding label (e.g. utf-8, shift_jis)
  LINECAST_READ_TIMEOUT   - Idle read timeout (e.g. 10s)
  LINECAST_WRITE_TIMEOUT  - Write timeout (e.g. 10s)
  LINECAST_LOG_LEVEL      - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "linecast.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Bind address (overrides config file)
    #[arg(short, long, help = "Bind address: IP, hostname, or \"\" for all interfaces")]
    pub bind: Option<String>,

    /// Port to bind to (overrides config file)
    #[arg(short, long, help = "Port to bind to")]
    pub port: Option<u16>,

    /// Text encoding (overrides config file)
    #[arg(short, long, help = "Text encoding label, e.g. utf-8 or shift_jis")]
    pub encoding: Option<String>,

    /// Log level (overrides config file)
    #[arg(long, help = "Log level: trace, debug, info, warn, error")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long, help = "Write logs to this file")]
    pub log_file: Option<PathBuf>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Priority: CLI args > config file > environment > defaults
    let from_file = args.config.exists();
    let mut config = if from_file {
        ConfigManager::load_from_file(&args.config)?
    } else {
        ConfigManager::load_from_env()?
    };

    config.merge_with_cli_args(args.bind.as_deref(), args.port, args.encoding.as_deref());
    if let Some(level) = &args.log_level {
        config.monitoring.log_level = level.clone();
    }

    config
        .validate()
        .context("Final configuration validation failed")?;

    init_tracing(&args, &resolve_log_level(&args, &config))?;

    info!("Starting Linecast v{}", env!("CARGO_PKG_VERSION"));
    if from_file {
        info!("Loaded configuration from {}", args.config.display());
    } else {
        info!("Config file not found, using environment variables and defaults");
    }

    if args.validate_config {
        info!("Configuration is valid");
        info!("  Bind address: '{}'", config.server.bind_address);
        info!("  Port: {}", config.server.port);
        info!("  Encoding: {}", config.server.encoding);
        info!("  Read timeout: {:?}", config.server.read_timeout);
        info!("  Write timeout: {:?}", config.server.write_timeout);
        info!(
            "  Metrics: {}",
            if config.monitoring.metrics_enabled {
                "enabled"
            } else {
                "disabled"
            }
        );
        return Ok(());
    }

    let shutdown_coordinator = ShutdownCoordinator::new(config.server.join_timeout * 2);

    let server = Arc::new(LineServer::new(config.server.clone())?);
    let local_addr = server
        .start()
        .await
        .with_context(|| format!("Failed to start listener on port {}", config.server.port))?;
    info!("Accepting clients on {}", local_addr);

    let metrics_handle = match (config.monitoring.metrics_enabled, config.monitoring.metrics_addr) {
        (true, Some(addr)) => {
            info!("Starting metrics server on {}", addr);
            let metrics_server = MetricsServer::new(server.metrics(), server.registry(), addr);
            Some(tokio::spawn(async move {
                if let Err(e) = metrics_server.start().await {
                    error!("Metrics server error: {}", e);
                }
            }))
        }
        _ => None,
    };

    // Print received lines, sleeping between empty polls
    let poll_interval = config.monitoring.poll_interval;
    let poll_task = {
        let server = Arc::clone(&server);
        ShutdownAwareTask::spawn(&shutdown_coordinator, "poll-loop", move |mut shutdown_rx| {
            async move {
                loop {
                    match server.read().await {
                        Some(line) => println!("{}", line),
                        None => {
                            tokio::select! {
                                _ = tokio::time::sleep(poll_interval) => {}
                                _ = shutdown_rx.recv() => break,
                            }
                        }
                    }
                }
            }
        })
    };

    let console_quit = Arc::new(Notify::new());
    let console_task = {
        let server = Arc::clone(&server);
        let console_quit = Arc::clone(&console_quit);
        let input = spawn_stdin_reader();
        ShutdownAwareTask::spawn(&shutdown_coordinator, "console", move |_shutdown_rx| async move {
            run_console(&server, input).await;
            console_quit.notify_one();
        })
    };

    info!("Press Ctrl+C or type /quit to shut down");

    tokio::select! {
        result = shutdown_coordinator.listen_for_signals() => {
            if let Err(e) = result {
                error!("Error setting up signal handlers: {}", e);
            }
        }
        _ = console_quit.notified() => {
            shutdown_coordinator.trigger();
        }
    }

    info!("Initiating graceful shutdown...");
    shutdown_coordinator.shutdown_server(&server).await?;

    for task in [poll_task, console_task] {
        if let Err(e) = task.wait_for_completion_or_shutdown().await {
            warn!("Background task error: {}", e);
        }
    }

    if let Some(handle) = metrics_handle {
        handle.abort();
        info!("Metrics server shutdown");
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Forward stdin lines from a dedicated thread
///
/// Blocking reads live outside the runtime so an idle terminal never holds
/// up shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read console input: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Run operator input until /quit
async fn run_console(server: &LineServer, mut input: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = input.recv().await {
        let command = match ConsoleCommand::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        match command.execute(server).await {
            Ok(Flow::Continue(output)) => {
                for line in output {
                    eprintln!("{}", line);
                }
            }
            Ok(Flow::Quit) => return,
            Err(e) => eprintln!("error: {:#}", e),
        }
    }

    info!("Console input closed");
    // Keep serving; only a signal stops the server now
    std::future::pending::<()>().await;
}

/// Pick the log level: --verbose, then --log-level, then the loaded config
fn resolve_log_level(args: &CliArgs, config: &Config) -> String {
    if args.verbose {
        "debug".to_string()
    } else if let Some(level) = &args.log_level {
        level.clone()
    } else {
        config.monitoring.log_level.clone()
    }
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs, log_level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    match &args.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::sync::Mutex::new(file))
                        .with_thread_ids(true)
                        .with_ansi(false),
                )
                .with(env_filter)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(false)
                        .with_thread_ids(true)
                        .with_level(true)
                        .with_ansi(true),
                )
                .with(env_filter)
                .init();
        }
    }

    Ok(())
}
