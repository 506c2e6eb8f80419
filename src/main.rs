//! fscache - command line access to a filesystem cache directory
//!
//! Reads configuration from `FSCACHE_*` environment variables; `--dir` and
//! `--mode` override them. Values are read and printed as JSON.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fs_cache::cache::{CacheEngine, ExpirySource, StorageMode};
use fs_cache::Config;

// == CLI Arguments ==
/// Inspect and modify a filesystem-backed cache
#[derive(Parser, Debug)]
#[command(name = "fscache", author, version, about, long_about = None)]
struct Cli {
    /// Cache root directory (must exist)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Storage mode: single or chunked
    #[arg(long, global = true)]
    mode: Option<StorageMode>,

    /// Where single-file entries keep their expiry: mtime or header
    #[arg(long, global = true)]
    expiry: Option<ExpirySource>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the value stored under KEY
    Get {
        key: String,
        #[arg(long)]
        cluster: Option<String>,
    },
    /// Store VALUE (JSON, or a plain string) under KEY
    Set {
        key: String,
        value: String,
        /// TTL in seconds (default: FSCACHE_DEFAULT_TTL)
        #[arg(long)]
        ttl: Option<u64>,
        #[arg(long)]
        cluster: Option<String>,
    },
    /// Exit successfully if KEY holds a live entry
    Exists {
        key: String,
        #[arg(long)]
        cluster: Option<String>,
    },
    /// Remove the entry stored under KEY
    Delete {
        key: String,
        #[arg(long)]
        cluster: Option<String>,
    },
    /// Remove every entry, keeping the cache root
    Purge {
        /// Also remove all cluster entries
        #[arg(long)]
        clusters: bool,
    },
    /// Remove every entry of one cluster
    PurgeCluster { name: String },
    /// Remove all clusters, keeping plain entries
    PurgeClusters,
}

fn main() -> ExitCode {
    // Logs go to stderr so stdout carries only command output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fs_cache=info,fscache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = build_config(&cli);
    let engine = CacheEngine::open(&config)
        .with_context(|| format!("failed to open cache at {}", config.cache_dir.display()))?;
    info!(
        "Using {} cache at {}",
        engine.mode(),
        engine.cache_dir().display()
    );

    match cli.command {
        Command::Get { key, cluster } => {
            let value: Option<Value> = match &cluster {
                Some(name) => engine.get_from_cluster(key.as_str(), name.as_str()),
                None => engine.get(key.as_str()),
            };
            match value {
                Some(value) => {
                    println!("{}", serde_json::to_string_pretty(&value)?);
                    Ok(ExitCode::SUCCESS)
                }
                None => Ok(ExitCode::FAILURE),
            }
        }
        Command::Set {
            key,
            value,
            ttl,
            cluster,
        } => {
            let value = parse_value(&value);
            let ttl = ttl.map(Duration::from_secs);
            let saved = match &cluster {
                Some(name) => engine.save_to_cluster(key.as_str(), name.as_str(), &value, ttl),
                None => engine.save(key.as_str(), &value, ttl),
            };
            saved.with_context(|| format!("failed to save {}", key))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Exists { key, cluster } => {
            let found = match &cluster {
                Some(name) => engine.exists_in_cluster(key.as_str(), name.as_str()),
                None => engine.exists(key.as_str()),
            };
            Ok(if found {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Delete { key, cluster } => {
            let deleted = match &cluster {
                Some(name) => engine.delete_from_cluster(key.as_str(), name.as_str()),
                None => engine.delete(key.as_str()),
            };
            deleted.with_context(|| format!("failed to delete {}", key))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Purge { clusters } => {
            let report = engine.delete_all(clusters)?;
            println!(
                "removed {} files and {} directories",
                report.files_removed, report.dirs_removed
            );
            Ok(purge_exit_code(report.failures))
        }
        Command::PurgeCluster { name } => {
            let report = engine.delete_all_in_cluster(name.as_str());
            println!(
                "removed {} files and {} directories",
                report.files_removed, report.dirs_removed
            );
            Ok(purge_exit_code(report.failures))
        }
        Command::PurgeClusters => {
            let report = engine.delete_all_clusters();
            println!(
                "removed {} files and {} directories",
                report.files_removed, report.dirs_removed
            );
            Ok(purge_exit_code(report.failures))
        }
    }
}

/// Loads the environment configuration and applies command line overrides.
fn build_config(cli: &Cli) -> Config {
    let mut config = Config::from_env();
    if let Some(mode) = cli.mode {
        if mode != config.mode {
            // Switching mode also switches the layout defaults
            config = Config {
                cache_dir: config.cache_dir,
                default_ttl: config.default_ttl,
                file_suffix: config.file_suffix,
                cluster_dir: config.cluster_dir,
                ..Config::for_mode(mode)
            };
        }
    }
    if let Some(expiry) = cli.expiry {
        config.expiry_source = expiry;
    }
    if let Some(dir) = &cli.dir {
        config.cache_dir = dir.clone();
    }
    config
}

/// Accepts JSON, falling back to a plain string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn purge_exit_code(failures: usize) -> ExitCode {
    if failures == 0 {
        ExitCode::SUCCESS
    } else {
        eprintln!("{} paths could not be removed", failures);
        ExitCode::FAILURE
    }
}
