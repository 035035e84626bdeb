// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Scopekeeper Control CLI
//!
//! Operator tool for the persisted state of scopekeeper scopes.
//!
//! Usage:
//!   scopekeeper-ctl <command> [options]
//!
//! Commands:
//!   list [--prefix <path>]          List scopes
//!   inspect <scope> [--raw]         Show a scope summary or its raw State
//!   stats                           Aggregate inventory counts
//!   health [--stale-hours <n>]      Run health checks once
//!   snapshots <scope>               List snapshots of a scope
//!   restore <scope> <snapshot_id>   Restore a snapshot as the current State
//!   unlock <scope>                  Force-release a scope lock
//!   finalize <scope> [--dry-run] [--force] [--aggressive] [--strategy <s>]
//!   monitor [--interval <secs>] [--stale-hours <n>]

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use scopekeeper_core::config::EngineConfig;
use scopekeeper_core::inspector::{HealthThresholds, Monitor, MonitorConfig, TracingAlertSink};
use scopekeeper_core::{
    DestroyStrategy, DestroyerRegistry, Engine, FinalizeMode, FinalizeOptions,
    RecordOnlyDestroyer, ScopeError, ScopePath,
};
use tracing::{info, warn};

fn print_usage() {
    eprintln!(
        r#"Usage: scopekeeper-ctl <command> [options]

Inspect and repair scopekeeper scope state.

COMMANDS:
    list                            List scopes with a State document
    inspect <scope>                 Show a scope summary
    stats                           Aggregate counts over all scopes
    health                          Run the health checks once
    snapshots <scope>               List snapshots of a scope
    restore <scope> <snapshot_id>   Restore a snapshot as the current State
    unlock <scope>                  Force-release the lock of a scope
    finalize <scope>                Tear down every recorded resource of a scope
    monitor                         Run health checks periodically until Ctrl-C

LIST OPTIONS:
    --prefix <path>                 Only scopes under this path

INSPECT OPTIONS:
    --raw                           Print the State document as stored

FINALIZE OPTIONS:
    --dry-run                       Report what would be deleted, change nothing
    --force                         Forget records without destroying resources
    --aggressive                    Continue past failures
    --strategy <s>                  sequential | parallel (default: from config)

HEALTH / MONITOR OPTIONS:
    --stale-hours <n>               Alert on State older than this (default: 168)
    --interval <secs>               Seconds between checks (default: 300)

ENVIRONMENT:
    SCOPEKEEPER_BACKEND             local | remote | composite (default: local)
    SCOPEKEEPER_STATE_DIR           Local state directory (default: .scopekeeper)
    SCOPEKEEPER_REMOTE_ENDPOINT     Object store base URL
    SCOPEKEEPER_REMOTE_TOKEN        Bearer token for the object store
    SCOPEKEEPER_HOLDER_ID           Lock holder identity
    RUST_LOG                        Log filter (logs go to stderr)

EXAMPLES:
    # Scopes of one application
    scopekeeper-ctl list --prefix myapp

    # What would a teardown of the prod stage delete?
    scopekeeper-ctl finalize myapp/prod --dry-run

    # Recover a corrupted State from its latest snapshot
    scopekeeper-ctl snapshots myapp/prod
    scopekeeper-ctl restore myapp/prod 1735689600000
"#
    );
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    List {
        prefix: String,
    },
    Inspect {
        scope: String,
        raw: bool,
    },
    Stats,
    Health {
        stale_hours: u64,
    },
    Snapshots {
        scope: String,
    },
    Restore {
        scope: String,
        snapshot_id: String,
    },
    Unlock {
        scope: String,
    },
    Finalize {
        scope: String,
        dry_run: bool,
        force: bool,
        mode: FinalizeMode,
        strategy: Option<DestroyStrategy>,
    },
    Monitor {
        interval_secs: u64,
        stale_hours: u64,
    },
}

const DEFAULT_STALE_HOURS: u64 = 168;
const DEFAULT_INTERVAL_SECS: u64 = 300;

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from_vec(&args)
}

fn hours(count: u64) -> Duration {
    Duration::from_secs(count.saturating_mul(3600))
}

fn parse_number(args: &[String], i: usize, flag: &str) -> Result<u64, String> {
    args.get(i)
        .ok_or_else(|| format!("{} requires a number", flag))?
        .parse()
        .map_err(|_| format!("Invalid value for {}", flag))
}

fn parse_args_from_vec(args: &[String]) -> Result<Command, String> {
    if args.len() < 2 {
        return Err("No command specified".to_string());
    }

    match args[1].as_str() {
        "help" | "--help" | "-h" => {
            print_usage();
            std::process::exit(0);
        }
        "list" => {
            let mut prefix = String::new();
            let mut i = 2;
            while i < args.len() {
                match args[i].as_str() {
                    "--prefix" => {
                        i += 1;
                        prefix = args.get(i).ok_or("--prefix requires a path")?.clone();
                    }
                    arg => return Err(format!("Unknown argument: {}", arg)),
                }
                i += 1;
            }
            Ok(Command::List { prefix })
        }
        "inspect" => {
            let scope = args.get(2).ok_or("Scope path required")?.clone();
            let mut raw = false;
            for arg in &args[3..] {
                match arg.as_str() {
                    "--raw" => raw = true,
                    arg => return Err(format!("Unknown argument: {}", arg)),
                }
            }
            Ok(Command::Inspect { scope, raw })
        }
        "stats" => Ok(Command::Stats),
        "health" | "monitor" => {
            let mut stale_hours = DEFAULT_STALE_HOURS;
            let mut interval_secs = DEFAULT_INTERVAL_SECS;
            let mut i = 2;
            while i < args.len() {
                match args[i].as_str() {
                    "--stale-hours" => {
                        i += 1;
                        stale_hours = parse_number(args, i, "--stale-hours")?;
                    }
                    "--interval" if args[1] == "monitor" => {
                        i += 1;
                        interval_secs = parse_number(args, i, "--interval")?;
                        if interval_secs == 0 {
                            return Err("--interval must be greater than 0".to_string());
                        }
                    }
                    arg => return Err(format!("Unknown argument: {}", arg)),
                }
                i += 1;
            }
            if args[1] == "health" {
                Ok(Command::Health { stale_hours })
            } else {
                Ok(Command::Monitor {
                    interval_secs,
                    stale_hours,
                })
            }
        }
        "snapshots" => {
            let scope = args.get(2).ok_or("Scope path required")?.clone();
            Ok(Command::Snapshots { scope })
        }
        "restore" => {
            let scope = args.get(2).ok_or("Scope path required")?.clone();
            let snapshot_id = args.get(3).ok_or("Snapshot ID required")?.clone();
            Ok(Command::Restore { scope, snapshot_id })
        }
        "unlock" => {
            let scope = args.get(2).ok_or("Scope path required")?.clone();
            Ok(Command::Unlock { scope })
        }
        "finalize" => {
            let scope = args.get(2).ok_or("Scope path required")?.clone();
            let mut dry_run = false;
            let mut force = false;
            let mut mode = FinalizeMode::Conservative;
            let mut strategy = None;

            let mut i = 3;
            while i < args.len() {
                match args[i].as_str() {
                    "--dry-run" => dry_run = true,
                    "--force" => force = true,
                    "--aggressive" => mode = FinalizeMode::Aggressive,
                    "--strategy" => {
                        i += 1;
                        let value = args.get(i).ok_or("--strategy requires a value")?;
                        strategy = Some(value.parse().map_err(|e| format!("{}", e))?);
                    }
                    arg => return Err(format!("Unknown argument: {}", arg)),
                }
                i += 1;
            }

            if !dry_run && !force {
                return Err(
                    "finalize has no destroy capabilities; pass --dry-run or --force".to_string(),
                );
            }

            Ok(Command::Finalize {
                scope,
                dry_run,
                force,
                mode,
                strategy,
            })
        }
        cmd => Err(format!("Unknown command: {}", cmd)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scopekeeper_core=info,scopekeeper_ctl=info".into()),
        )
        .init();

    dotenvy::dotenv().ok();

    let cmd = match parse_args() {
        Ok(cmd) => cmd,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    let config = match EngineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match execute_command(config, cmd).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&e);
            ExitCode::FAILURE
        }
    }
}

/// Print an error as JSON on stderr, with the stable code for engine errors.
fn print_error(error: &anyhow::Error) {
    let body = match error.downcast_ref::<ScopeError>() {
        Some(scope_error) => serde_json::json!({
            "error": scope_error.error_code(),
            "message": scope_error.to_string(),
            "report": scope_error.report(),
        }),
        None => serde_json::json!({
            "error": "CLI_ERROR",
            "message": format!("{:#}", error),
        }),
    };
    eprintln!("{}", body);
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn execute_command(config: EngineConfig, cmd: Command) -> anyhow::Result<()> {
    let mut destroyers = DestroyerRegistry::new();
    if matches!(cmd, Command::Finalize { force: true, .. }) {
        destroyers.set_fallback(Arc::new(RecordOnlyDestroyer));
    }
    let engine = Engine::new(config, destroyers)?;
    let inspector = engine.inspector();

    match cmd {
        Command::List { prefix } => {
            let scopes: Vec<String> = inspector
                .list_scopes(&prefix)
                .await?
                .iter()
                .map(|p| p.to_string())
                .collect();
            print_json(&scopes)?;
        }

        Command::Inspect { scope, raw } => {
            let path = ScopePath::parse(&scope)?;
            if raw {
                let bytes = inspector.raw_state(&path).await?;
                match serde_json::from_slice::<serde_json::Value>(&bytes) {
                    Ok(value) => print_json(&value)?,
                    Err(_) => println!("{}", String::from_utf8_lossy(&bytes)),
                }
            } else {
                print_json(&inspector.inspect(&path).await?)?;
            }
        }

        Command::Stats => {
            print_json(&inspector.stats().await?)?;
        }

        Command::Health { stale_hours } => {
            let thresholds = HealthThresholds {
                stale_state_after: hours(stale_hours),
            };
            print_json(&inspector.check_health(&thresholds).await?)?;
        }

        Command::Snapshots { scope } => {
            let path = ScopePath::parse(&scope)?;
            print_json(&engine.store().list_snapshots(&path).await?)?;
        }

        Command::Restore { scope, snapshot_id } => {
            let mut handle = engine.scope_at(ScopePath::parse(&scope)?);
            handle.recover(&snapshot_id).await?;
            let stats = handle.get_stats()?;
            handle.release().await?;
            print_json(&stats)?;
        }

        Command::Unlock { scope } => {
            let path = ScopePath::parse(&scope)?;
            match engine.locks().force_release(&path).await? {
                Some(lease) => print_json(&lease)?,
                None => println!("null"),
            }
        }

        Command::Finalize {
            scope,
            dry_run,
            force,
            mode,
            strategy,
        } => {
            if force && !dry_run {
                warn!(scope = %scope, "Forgetting records without destroying resources");
            }
            let path = ScopePath::parse(&scope)?;
            // Refuse to create a State for a scope that was never deployed
            inspector.raw_state(&path).await?;
            let mut handle = engine.scope_at(path);
            if let Some(strategy) = strategy {
                handle = handle.with_destroy_strategy(strategy);
            }
            handle.initialize().await?;
            let options = FinalizeOptions {
                dry_run,
                mode,
                ..FinalizeOptions::default()
            };
            let report = handle.finalize(options).await?;
            print_json(&report)?;
        }

        Command::Monitor {
            interval_secs,
            stale_hours,
        } => {
            let mut monitor = Monitor::new(
                inspector,
                MonitorConfig {
                    poll_interval: Duration::from_secs(interval_secs),
                    thresholds: HealthThresholds {
                        stale_state_after: hours(stale_hours),
                    },
                },
            );
            monitor.add_sink(Arc::new(TracingAlertSink));

            let shutdown = monitor.shutdown_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl-C, stopping monitor");
                    shutdown.notify_one();
                }
            });

            monitor.run().await;
        }
    }

    Ok(())
}
