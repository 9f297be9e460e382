//! # Main — CLI Entry Point
//!
//! Routes CLI subcommands to the service or a one-shot local search.
//!
//! ## Subcommands
//!
//! - `serve`: start the HTTP/WebSocket API.
//! - `crack`: run one search in-process and stream its events to stdout.
//! - `hash`: print the digest of an input, for building test targets.
//!
//! ## Global Options
//!
//! - `--config` / `HASHREACH_CONFIG`: TOML settings file.
//! - `--database-url` / `DATABASE_URL`: persist tasks in PostgreSQL instead of memory.

mod cli;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "hashreach", about = "Recover digest preimages by keyspace search")]
struct Cli {
    /// TOML config file (defaults apply when omitted)
    #[arg(long, env = "HASHREACH_CONFIG")]
    config: Option<PathBuf>,

    /// PostgreSQL connection URL (or set DATABASE_URL env var)
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the REST API and per-task WebSocket streams
    Serve {
        /// Listen port (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Search for a digest's preimage in this process
    Crack {
        /// Target digest, hex encoded
        target: String,
        /// Digest algorithm tag
        #[arg(long, default_value = "md5")]
        hash_type: String,
        /// Candidate symbols, in enumeration order (config default if omitted)
        #[arg(long)]
        charset: Option<String>,
        /// Longest candidate to try (clamped to the configured ceiling)
        #[arg(long, default_value_t = 6)]
        max_length: usize,
    },
    /// Print the digest of INPUT
    Hash {
        input: String,
        #[arg(long, default_value = "md5")]
        hash_type: String,
    },
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // Initialize structured logging: LOG_FORMAT=json for K8s, human-readable otherwise
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();
    let config = hashreach::config::Config::load(cli.config.as_deref())
        .context("failed to load configuration")?;

    match &cli.command {
        Commands::Serve { port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cli::run_serve(&cli, config, *port))
        }
        Commands::Crack {
            target,
            hash_type,
            charset,
            max_length,
        } => {
            let spec = hashreach::task::TaskSpec {
                hash_type: hash_type.clone(),
                target_hash: target.clone(),
                charset: charset.clone(),
                max_length: *max_length,
                task_id: None,
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cli::run_crack(&cli, config, spec))
        }
        Commands::Hash { input, hash_type } => cli::run_hash(hash_type, input),
    }
}
