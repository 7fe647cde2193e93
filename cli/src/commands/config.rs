// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, hash-password

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::io::BufRead;
use std::path::PathBuf;

use devsim_core::domain::device_config::DeviceConfigManifest;
use devsim_core::domain::session::PasswordHash;

use super::GlobalArgs;

const CONFIG_INVALID_EXIT: i32 = 4;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the full manifest as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Hash an admin password for `spec.admin.password_hash`
    HashPassword {
        /// Password to hash (default: first line of stdin)
        #[arg(long, env = "DEVSIM_ADMIN_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
}

pub async fn handle_command(command: ConfigCommand, args: &GlobalArgs) -> Result<i32> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(args, paths, yaml),
        ConfigCommand::Validate { file } => validate(file.or_else(|| args.config.clone()), args.json),
        ConfigCommand::HashPassword { password } => hash_password(password),
    }
}

fn show(args: &GlobalArgs, show_paths: bool, as_yaml: bool) -> Result<i32> {
    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &args.config {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. DEVSIM_CONFIG_PATH: {}",
            std::env::var("DEVSIM_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./devsim.yaml");
        println!("  4. ~/.devsim/config.yaml");
        println!("  5. /etc/devsim/config.yaml");
        println!();
    }

    let path = DeviceConfigManifest::resolve_path(args.config.as_deref())?;
    let config = match DeviceConfigManifest::load(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", format!("✗ {}", e).red());
            return Ok(CONFIG_INVALID_EXIT);
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&config).context("Failed to encode config")?);
        return Ok(0);
    }
    if as_yaml {
        print!("{}", config.to_yaml_string()?);
        return Ok(0);
    }

    println!("{}", format!("Configuration: {}", path.display()).bold());
    println!();

    let identity = &config.spec.identity;
    println!("{}", "Device Identity:".bold());
    println!("  Name: {}", config.metadata.name);
    println!("  Hostname: {}", identity.hostname);
    println!("  Address: {}", identity.ip);
    println!("  Model: {}", identity.model);
    println!("  Serial: {}", identity.serial);
    println!("  MAC: {}", identity.mac);
    println!("  Device UUID: {}", config.identity_snapshot().device_uuid);
    println!();

    println!("{}", "Responders:".bold());
    for responder in &config.spec.responders {
        println!("  {} ({}/{})", responder.id().bold(), responder.kind, responder.port);
    }
    println!();

    let runtime = &config.spec.runtime;
    println!("{}", "Runtime:".bold());
    println!("  Bind address: {}", runtime.bind_address);
    println!("  Idle timeout: {:?}", runtime.idle_timeout);
    println!("  Shutdown grace: {:?}", runtime.shutdown_grace);
    println!("  Announce: {}", runtime.announce);
    println!("  Run dir: {}", config.spec.storage.run_dir.display());
    println!("  Jobs dir: {}", config.spec.storage.resolved_jobs_dir().display());
    println!();

    println!("{}", "Admin API:".bold());
    match &config.spec.admin {
        Some(admin) => {
            println!("  Listen: {}", admin.listen);
            println!("  Username: {}", admin.username);
        }
        None => println!("  {}", "(disabled)".dimmed()),
    }

    Ok(0)
}

fn validate(config_path: Option<PathBuf>, json: bool) -> Result<i32> {
    let result = DeviceConfigManifest::resolve_path(config_path.as_deref())
        .and_then(|path| DeviceConfigManifest::load(&path).map(|config| (path, config)));

    match result {
        Ok((path, config)) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "valid": true, "path": path, "name": config.metadata.name })
                );
            } else {
                println!(
                    "{}",
                    format!("✓ Configuration is valid: {}", path.display()).green()
                );
            }
            Ok(0)
        }
        Err(e) => {
            if json {
                println!("{}", serde_json::json!({ "valid": false, "error": e.to_string() }));
            } else {
                eprintln!("{}", format!("✗ {}", e).red());
            }
            Ok(CONFIG_INVALID_EXIT)
        }
    }
}

fn hash_password(password: Option<String>) -> Result<i32> {
    let password = match password {
        Some(password) => password,
        None => {
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("Failed to read password from stdin")?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    if password.is_empty() {
        anyhow::bail!("Password must not be empty");
    }

    println!("{}", PasswordHash::derive(&password));
    Ok(0)
}
