//! skenariod: the Skenario daemon.
//!
//! - `serve` exposes the REST API over a redb run store
//! - `run` simulates one scenario from a TOML file and prints a JSON report
//! - `init` prints the default scenario as TOML, a starting point for `run`
//!
//! # Usage
//!
//! ```text
//! skenariod serve --port 3000 --data-dir /var/lib/skenario
//! skenariod run --config scenario.toml --store runs.redb
//! ```

use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use skenario_model::{Projections, RunSummary, Scenario, ScenarioConfig};
use skenario_store::{ORIGIN_CLI, RunStore};

#[derive(Parser)]
#[command(name = "skenariod", about = "Autoscaler simulation daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "3000")]
        port: u16,

        /// Data directory for the run store.
        #[arg(long, default_value = "/var/lib/skenario")]
        data_dir: PathBuf,

        /// Keep runs in memory only.
        #[arg(long)]
        in_memory: bool,
    },
    /// Simulate one scenario and print the report as JSON.
    Run {
        /// Scenario file (TOML).
        #[arg(long)]
        config: PathBuf,

        /// Override the scenario seed.
        #[arg(long)]
        seed: Option<u64>,

        /// Also persist the run into this redb file.
        #[arg(long)]
        store: Option<PathBuf>,
    },
    /// Print the default scenario as TOML.
    Init,
}

#[derive(Serialize)]
struct CliReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<u64>,
    ran_for: u64,
    traffic_pattern: String,
    summary: RunSummary,
    #[serde(flatten)]
    projections: Projections,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,skenario=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            port,
            data_dir,
            in_memory,
        } => serve(port, data_dir, in_memory).await,
        Command::Run {
            config,
            seed,
            store,
        } => run_once(&config, seed, store.as_deref()),
        Command::Init => {
            print!("{}", ScenarioConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

async fn serve(port: u16, data_dir: PathBuf, in_memory: bool) -> anyhow::Result<()> {
    let store = if in_memory {
        info!("run store kept in memory");
        RunStore::open_in_memory()?
    } else {
        std::fs::create_dir_all(&data_dir)?;
        let db_path = data_dir.join("skenario.redb");
        let store = RunStore::open(&db_path)?;
        info!(path = ?db_path, "run store opened");
        store
    };

    let router = skenario_api::build_router(store);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .ok();
            info!("shutdown signal received");
        })
        .await?;

    info!("skenariod stopped");
    Ok(())
}

fn run_once(path: &Path, seed: Option<u64>, store: Option<&Path>) -> anyhow::Result<()> {
    let mut config = ScenarioConfig::from_file(path)
        .with_context(|| format!("loading scenario from {}", path.display()))?;
    if let Some(seed) = seed {
        config.seed = seed;
    }

    let report = Scenario::build(config.clone())?.run()?;

    let run_id = match store {
        Some(db_path) => {
            let store = RunStore::open(db_path)?;
            Some(store.store_run(ORIGIN_CLI, &config, &report)?.id)
        }
        None => None,
    };

    let out = CliReport {
        run_id,
        ran_for: report.ran_for,
        traffic_pattern: report.traffic_pattern.clone(),
        summary: report.summary.clone(),
        projections: report.projections(),
    };
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &out)?;
    writeln!(stdout)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["skenariod", "serve"]).unwrap();
        match cli.command {
            Command::Serve { port, in_memory, .. } => {
                assert_eq!(port, 3000);
                assert!(!in_memory);
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn run_requires_config() {
        assert!(Cli::try_parse_from(["skenariod", "run"]).is_err());
        let cli =
            Cli::try_parse_from(["skenariod", "run", "--config", "s.toml", "--seed", "7"]).unwrap();
        assert!(matches!(cli.command, Command::Run { seed: Some(7), store: None, .. }));
    }
}
