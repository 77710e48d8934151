// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Courier - multi-tenant outbound messaging relay.
//!
//! This is the binary entry point: `serve` runs the dispatch core, the other
//! subcommands are operator tools working directly on the store.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod admin;
mod serve;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use courier_config::CourierConfig;
use courier_core::DeliveryStatus;

/// Courier - multi-tenant outbound messaging relay.
#[derive(Parser, Debug)]
#[command(name = "courier", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the XDG hierarchy.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the dispatch workers, channel clients, and health monitor.
    Serve,
    /// Submit one send request.
    Submit {
        #[arg(long)]
        tenant: String,
        /// Destination number; formatting characters are stripped.
        #[arg(long)]
        to: String,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        media: Option<String>,
        /// Idempotency key scoped to the tenant.
        #[arg(long)]
        key: Option<String>,
        /// Earliest send time (RFC 3339).
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Submit a JSON array of send requests from a file.
    Batch { file: PathBuf },
    /// Inspect outbound channels.
    Chips {
        #[command(subcommand)]
        action: ChipsCommand,
    },
    /// Manage tenant quotas.
    Quota {
        #[command(subcommand)]
        action: QuotaCommand,
    },
    /// Inspect and replay the dead letter queue.
    Dlq {
        #[command(subcommand)]
        action: DlqCommand,
    },
    /// Show a tenant's delivery history.
    History {
        tenant: String,
        #[arg(long)]
        status: Option<DeliveryStatus>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
        /// Print records as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Cancel a job that has not been sent yet.
    Cancel { job_id: String },
    /// Show queue depth.
    Stats,
}

#[derive(Subcommand, Debug)]
enum ChipsCommand {
    /// List chips with status and reputation.
    List {
        /// Include deactivated chips.
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand, Debug)]
enum QuotaCommand {
    /// Set a tenant's per-period limit (-1 for unlimited).
    Set {
        tenant: String,
        #[arg(allow_negative_numbers = true)]
        limit: i64,
    },
    /// Show a tenant's usage for the current period.
    Show { tenant: String },
}

#[derive(Subcommand, Debug)]
enum DlqCommand {
    /// List dead letters, newest first.
    List {
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Put a dead letter back on the queue with a fresh attempt count.
    Requeue { id: String },
}

fn load_config(path: Option<&PathBuf>) -> CourierConfig {
    let loaded = match path {
        Some(path) => courier_config::load_and_validate_path(path),
        None => courier_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => config,
        Err(errors) => {
            courier_config::render_errors(&errors);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("courier: use --help for available commands");
        return;
    };
    let config = load_config(cli.config.as_ref());

    let result = match command {
        Commands::Serve => serve::run_serve(config).await.map(|()| String::new()),
        Commands::Submit {
            tenant,
            to,
            text,
            media,
            key,
            at,
        } => {
            let request = admin::request_from_args(tenant, to, text, media, key, at);
            admin::run(&config, |ops| async move { ops.submit(&request).await }).await
        }
        Commands::Batch { file } => {
            admin::run(&config, |ops| async move { ops.submit_file(&file).await }).await
        }
        Commands::Chips {
            action: ChipsCommand::List { all },
        } => admin::run(&config, |ops| async move { ops.list_chips(all).await }).await,
        Commands::Quota { action } => match action {
            QuotaCommand::Set { tenant, limit } => {
                admin::run(&config, |ops| async move { ops.set_quota(&tenant, limit).await })
                    .await
            }
            QuotaCommand::Show { tenant } => {
                admin::run(&config, |ops| async move { ops.show_quota(&tenant).await }).await
            }
        },
        Commands::Dlq { action } => match action {
            DlqCommand::List { tenant, limit } => {
                admin::run(&config, |ops| async move {
                    ops.list_dead_letters(tenant.as_deref(), limit).await
                })
                .await
            }
            DlqCommand::Requeue { id } => {
                admin::run(&config, |ops| async move { ops.requeue(&id).await }).await
            }
        },
        Commands::History {
            tenant,
            status,
            limit,
            json,
        } => {
            admin::run(&config, |ops| async move {
                ops.history(&tenant, status, limit, json).await
            })
            .await
        }
        Commands::Cancel { job_id } => {
            admin::run(&config, |ops| async move { ops.cancel(&job_id).await }).await
        }
        Commands::Stats => admin::run(&config, |ops| async move { ops.stats().await }).await,
    };

    match result {
        Ok(output) => {
            if !output.is_empty() {
                println!("{output}");
            }
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        // Only jemalloc supports advancing the stats epoch.
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    #[serial]
    fn config_file_is_layered_under_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("courier.toml");
        std::fs::write(&path, "[node]\nworkers = 3\nlog_level = \"warn\"\n").unwrap();

        // SAFETY: env-mutating tests run serially.
        unsafe { std::env::set_var("COURIER_NODE_LOG_LEVEL", "debug") };
        let loaded = courier_config::load_and_validate_path(&path);
        unsafe { std::env::remove_var("COURIER_NODE_LOG_LEVEL") };

        let Ok(config) = loaded else {
            panic!("config should load");
        };
        assert_eq!(config.node.workers, 3);
        assert_eq!(config.node.log_level, "debug");
    }

    #[test]
    fn cli_parses_quota_set_with_unlimited() {
        let cli = Cli::try_parse_from(["courier", "quota", "set", "acme", "-1"]).unwrap();
        match cli.command {
            Some(Commands::Quota {
                action: QuotaCommand::Set { tenant, limit },
            }) => {
                assert_eq!(tenant, "acme");
                assert_eq!(limit, -1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cli_parses_scheduled_submit() {
        let cli = Cli::try_parse_from([
            "courier",
            "--config",
            "/tmp/courier.toml",
            "submit",
            "--tenant",
            "acme",
            "--to",
            "+55 11 99999-0000",
            "--text",
            "hi",
            "--at",
            "2030-01-01T09:00:00Z",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/courier.toml")));
        match cli.command {
            Some(Commands::Submit { at, text, .. }) => {
                assert_eq!(text.as_deref(), Some("hi"));
                assert_eq!(at.unwrap().to_rfc3339(), "2030-01-01T09:00:00+00:00");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cli_parses_history_status_filter() {
        let cli =
            Cli::try_parse_from(["courier", "history", "acme", "--status", "failed"]).unwrap();
        match cli.command {
            Some(Commands::History { status, limit, .. }) => {
                assert_eq!(status, Some(DeliveryStatus::Failed));
                assert_eq!(limit, 50);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
