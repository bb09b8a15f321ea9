// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Conexus main entry point - CLI and server bootstrap.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};

use conexus::config::load_config;
use conexus::engine::{ContextEngine, SearchRequest};
use conexus::server::run_stdio;
use conexus::telemetry::{init_telemetry, TelemetryConfig};

/// Conexus - local code-intelligence engine.
#[derive(Parser)]
#[command(name = "conexus")]
#[command(author, version, about = "Local code-intelligence engine", long_about = None)]
struct Cli {
    /// Config file path (conexus.yaml / conexus.json by default)
    #[arg(short, long, env = "CONEXUS_CONFIG")]
    config: Option<PathBuf>,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve JSON-RPC over stdio
    Serve,
    /// Run one indexing pass and exit
    Index {
        /// Reindex every file regardless of change state
        #[arg(long)]
        force: bool,
        /// Restrict the run to these paths
        paths: Vec<String>,
    },
    /// Search the indexed corpus
    Search {
        query: String,
        /// Number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Print indexer status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut telemetry = match &cli.command {
        Command::Serve => TelemetryConfig::server(),
        _ => TelemetryConfig::default(),
    };
    if cli.verbose {
        telemetry = telemetry.with_level(tracing::Level::DEBUG);
    }
    let _guard = init_telemetry(&telemetry)?;

    let config = load_config(cli.config.as_deref())?;
    if config.server.port != 0 {
        bail!(
            "server.port {} requests the HTTP transport, which is served by an external \
             front-end; set server.port to 0 for stdio",
            config.server.port
        );
    }

    let engine = Arc::new(ContextEngine::new(config).await?);

    match cli.command {
        Command::Serve => {
            run_stdio(engine).await?;
        }
        Command::Index { force, paths } => {
            let controller = engine.controller();
            if force {
                controller.force_reindex()?;
            } else if !paths.is_empty() {
                controller.reindex_paths(paths)?;
            } else {
                controller.start(Default::default())?;
            }
            controller.wait_until_idle().await;

            let status = controller.status();
            if let Some(error) = &status.last_error {
                tracing::warn!(error = %error, "run finished with errors");
            }
            println!(
                "indexed {} files, {} chunks ({} failed), {} documents total",
                status.files_processed,
                status.chunks_created,
                status.files_failed,
                engine.store().count()?
            );
            engine.close().await;
        }
        Command::Search { query, top_k } => {
            let top_k = top_k.unwrap_or(engine.config().search.default_top_k);
            let response = engine
                .search(SearchRequest {
                    query,
                    top_k,
                    offset: 0,
                    filters: Default::default(),
                    boosts: Default::default(),
                    deadline: None,
                })
                .await?;

            for hit in &response.results {
                println!(
                    "{:.4}  {}:{}-{}  {}",
                    hit.score,
                    hit.doc.file_path,
                    hit.doc.start_line,
                    hit.doc.end_line,
                    hit.doc
                        .metadata
                        .get("symbol")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                );
            }
            println!(
                "{} of {} results in {:.1} ms{}",
                response.results.len(),
                response.total_count,
                response.query_time_ms,
                if response.degraded { " (bm25 only)" } else { "" }
            );
            engine.close().await;
        }
        Command::Status => {
            let status = engine.controller().status();
            println!("{}", serde_json::to_string_pretty(&status)?);
            engine.close().await;
        }
    }

    Ok(())
}
