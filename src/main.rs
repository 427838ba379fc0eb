//! Launchlink CLI - runs the application side of a launcher link, or a
//! launcher stand-in to talk to it.
//!
//! This is the main binary entry point. See the `launchlink` library for
//! the core functionality.

use anyhow::{Context, Result};
use launchlink::commands::{self, StateHost};
use launchlink::constants::{RECONNECT_DELAY, TICK_INTERVAL};
use launchlink::{launcher, CommandRegistry, Config, EchoHost, Transport, TransportOptions};
use mimalloc::MiMalloc;

/// mimalloc as the global allocator; the reader thread and the update loop
/// allocate frame bodies concurrently.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;
use clap::{Parser, Subcommand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Global flag for signal-triggered shutdown (as Arc for signal-hook compatibility)
static SHUTDOWN_FLAG: std::sync::LazyLock<Arc<AtomicBool>> =
    std::sync::LazyLock::new(|| Arc::new(AtomicBool::new(false)));

fn register_signals() -> Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::flag;
    flag::register(SIGINT, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGTERM, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGHUP, Arc::clone(&SHUTDOWN_FLAG))?;
    Ok(())
}

fn shutting_down() -> bool {
    SHUTDOWN_FLAG.load(Ordering::Relaxed)
}

/// Runs the application side until a signal arrives.
///
/// Connects to the launcher, answers its commands through the built-in
/// table and applies every state request with [`EchoHost`]. Reconnects after
/// transport faults.
fn run_app() -> Result<()> {
    register_signals()?;

    let config = Config::load()?;
    let mut registry = CommandRegistry::new();
    commands::register_builtin(&mut registry);

    let mut host = EchoHost::new(config.state_timings());
    if let Some(state) = &config.default_initial_state {
        host.reconciler().set_default_initial_state(state, false);
    }

    // Keep the last known state around for inspection after exit.
    let mut host = scopeguard::guard(host, |host| {
        let saved = Config::config_dir()
            .and_then(|dir| host.state().save_current_state(&dir.join("state.json")));
        if let Err(e) = saved {
            log::warn!("Failed to save state on exit: {e:#}");
        }
    });

    let mut transport = Transport::bind(TransportOptions::from(&config))?;
    log::info!(
        "launchlink v{} connecting to {} (listening on {})",
        env!("CARGO_PKG_VERSION"),
        config.connect_addr,
        transport.listen_addr()?
    );

    while !shutting_down() {
        if !transport.is_healthy() {
            if let Err(e) = transport.connect() {
                log::warn!("{e:#}; retrying in {}s", RECONNECT_DELAY.as_secs());
                std::thread::sleep(RECONNECT_DELAY);
                continue;
            }
        }

        let now = Instant::now();
        transport.tick(&registry, &mut *host, now);
        log_notices(host.process_events());

        host.reconciler().tick(now, &mut transport);
        log_notices(host.process_events());

        std::thread::sleep(TICK_INTERVAL);
    }

    log::info!("Shutting down after {} completed request(s)", host.completed());
    transport.shutdown();
    Ok(())
}

fn log_notices(notices: Vec<serde_json::Value>) {
    for notice in notices {
        log::info!("[Web] {notice}");
    }
}

fn run_launcher() -> Result<()> {
    register_signals()?;
    let config = Config::load()?;
    launcher::run(&config, &SHUTDOWN_FLAG)
}

fn init_logging() -> Result<()> {
    let filter = launchlink::env::Environment::current().default_log_filter();
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter));
    builder.format_timestamp_secs();

    if let Ok(path) = std::env::var("LAUNCHLINK_LOG_FILE") {
        let path = shellexpand::tilde(&path).into_owned();
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }

    builder.init();
    Ok(())
}

// CLI
#[derive(Parser)]
#[command(name = "launchlink")]
#[command(version)]
#[command(about = "Launcher transport and state reconciliation for streamed applications")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the application side of the launcher link
    Run,
    /// Run a loopback launcher stand-in (stdin lines are sent as commands)
    Launcher,
    /// Print the fields of NEW that differ from OLD
    Diff {
        /// Baseline JSON file
        old: String,
        /// Requested JSON file
        new: String,
    },
    /// Print A merged with B (arrays unioned)
    Merge {
        /// Base JSON file
        a: String,
        /// Overriding JSON file
        b: String,
    },
    /// Print the number of leaves in a JSON file
    Leaves {
        /// JSON file
        file: String,
    },
    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => run_app()?,
        Commands::Launcher => run_launcher()?,
        Commands::Diff { old, new } => commands::json::diff(&old, &new)?,
        Commands::Merge { a, b } => commands::json::merge(&a, &b)?,
        Commands::Leaves { file } => commands::json::leaves(&file)?,
        Commands::Config => {
            let config = Config::load()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
