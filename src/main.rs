// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `anon-replicator`: continuous anonymizing replication, or a one-shot full
//! reindex.
//!
//! ```bash
//! anon-replicator [--full-reindex] [--log-json]
//! ```
//!
//! # Environment Variables
//!
//! - `REPLICATION_STORE_URL`, `REPLICATION_SOURCE_COLLECTION`,
//!   `REPLICATION_TARGET_COLLECTION`: required; without them the process
//!   does nothing and exits 0
//! - `RUST_LOG`: log verbosity (default: `info`)
//!
//! See [`anon_replication_engine::config`] for the optional settings and
//! [`anon_replication_engine::runner`] for how each mode maps to an exit code.

use std::process::ExitCode;

use anon_replication_engine::runner::{self, RunStatus};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Anonymizing replication between two collections
#[derive(Parser, Debug)]
#[command(name = "anon-replicator")]
#[command(about = "Replicate a collection into an anonymized copy")]
#[command(version)]
struct Cli {
    /// Rebuild the target once under the lock, then exit
    #[arg(long)]
    full_reindex: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "REPLICATION_LOG_JSON")]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let Some(config) = runner::load_config(|key| std::env::var(key).ok()) else {
        return ExitCode::SUCCESS;
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to build runtime");
            return ExitCode::FAILURE;
        }
    };

    let status: RunStatus = runtime.block_on(async move {
        if cli.full_reindex {
            runner::full_reindex(&config).await
        } else {
            runner::continuous(config, wait_for_ctrl_c()).await
        }
    });

    if status.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
