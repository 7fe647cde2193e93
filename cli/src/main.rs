// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # devsim CLI
//!
//! The `devsim` binary presents one host as a network-attached device.
//!
//! ## Architecture
//!
//! One executable, three process roles:
//!
//! - **Control mode**: `devsim start|stop|restart|status` and `devsim config ...`
//! - **Master mode**: `devsim --daemon` supervises responders and serves the admin API
//! - **Responder mode**: `devsim --bootstrap <json>` runs one protocol responder
//!
//! ## Exit codes
//!
//! 0 success, 2 already running, 3 not running, 4 invalid config,
//! 5 bind failure, 1 anything else.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

mod commands;
mod daemon;

use commands::{ConfigCommand, GlobalArgs};
use devsim_core::domain::device_config::DeviceConfigManifest;
use devsim_core::domain::responder::ResponderBootstrap;

/// devsim - simulate a network-attached device
#[derive(Parser)]
#[command(name = "devsim")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Run as the master process (used by `devsim start`)
    #[arg(long, hide = true)]
    daemon: bool,

    /// Run a single responder from a bootstrap document (used by the master)
    #[arg(long, hide = true, value_name = "JSON", conflicts_with = "daemon")]
    bootstrap: Option<String>,

    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "DEVSIM_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Directory for the lock file, child list, logs and captured jobs
    #[arg(long, global = true, env = "DEVSIM_RUN_DIR", value_name = "DIR")]
    run_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "DEVSIM_LOG_LEVEL")]
    log_level: Option<String>,

    /// Print the outcome as one JSON object
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the master and all configured responders
    Start,

    /// Stop the master and every responder
    Stop {
        /// Seconds to wait after SIGTERM before SIGKILL
        #[arg(short, long, default_value = "5")]
        timeout: u64,
    },

    /// Stop (if running), then start
    Restart {
        /// Seconds to wait after SIGTERM before SIGKILL
        #[arg(short, long, default_value = "5")]
        timeout: u64,
    },

    /// Show master and responder liveness
    Status,

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() {
    let code = match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", format!("✗ {:#}", e).red());
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let args = GlobalArgs {
        config: cli.config,
        run_dir: cli.run_dir,
        log_level: cli.log_level,
        json: cli.json,
    };

    // Master mode (spawned by `devsim start`)
    if cli.daemon {
        let config_path = args.config_path()?;
        let run_dir = args.resolve_run_dir()?;
        let logging = DeviceConfigManifest::load(&config_path)
            .map(|manifest| manifest.logging())
            .unwrap_or_default();
        let level = args.log_level.clone().unwrap_or(logging.level);
        init_logging(&level, &logging.format)?;
        return daemon::run_master(config_path, run_dir).await;
    }

    // Responder mode (spawned by the master)
    if let Some(bootstrap) = cli.bootstrap {
        let bootstrap: ResponderBootstrap =
            serde_json::from_str(&bootstrap).context("Invalid responder bootstrap")?;
        init_logging(
            bootstrap.log_level.as_deref().unwrap_or("info"),
            bootstrap.log_format.as_deref().unwrap_or("text"),
        )?;
        return daemon::run_responder(bootstrap).await;
    }

    match cli.command {
        Some(command) => {
            init_logging(args.log_level.as_deref().unwrap_or("warn"), "text")?;
            match command {
                Commands::Start => commands::daemon::start(&args).await,
                Commands::Stop { timeout } => commands::daemon::stop(&args, timeout).await,
                Commands::Restart { timeout } => commands::daemon::restart(&args, timeout).await,
                Commands::Status => commands::daemon::status(&args).await,
                Commands::Config { command } => commands::config::handle_command(command, &args).await,
            }
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            Ok(1)
        }
    }
}

/// Initialize tracing subscriber for logging. `RUST_LOG` wins over `level`.
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        "json" => builder.json().init(),
        _ => builder.compact().init(),
    }

    Ok(())
}
