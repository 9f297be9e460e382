//! # CLI Execution Functions
//!
//! Kept out of `main.rs` so the entry point stays a thin dispatcher. Wires
//! the registry to its store, hub and metrics, then runs either the API
//! server or a single foreground search.

use anyhow::{Context, Result};
use hashreach::config::Config;
use hashreach::digest::DigestRegistry;
use hashreach::hub::Hub;
use hashreach::metrics::Metrics;
use hashreach::registry::TaskRegistry;
use hashreach::store::{MemoryStore, PgStore, TaskStore};
use hashreach::task::{TaskSpec, TaskStatus};
use std::sync::Arc;
use tracing::{info, warn};

use super::Cli;

// ── Wiring ──────────────────────────────────────────────────────

async fn open_store(cli: &Cli) -> Result<Arc<dyn TaskStore>> {
    match cli.database_url.as_deref() {
        Some(url) => {
            let store = PgStore::connect(url).await?;
            store.migrate().await?;
            info!("task store: postgres");
            Ok(Arc::new(store))
        }
        None => {
            info!("task store: in-memory (set DATABASE_URL to persist)");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn build_registry(cli: &Cli, config: Config) -> Result<(TaskRegistry, Arc<Metrics>)> {
    let store = open_store(cli).await?;
    let metrics = Arc::new(Metrics::new());
    let hub = Hub::new(config.mailbox_capacity, config.subscriber_capacity);
    let registry = TaskRegistry::new(
        config,
        DigestRegistry::with_builtins(),
        hub,
        store,
        Some(Arc::clone(&metrics)),
    );
    Ok((registry, metrics))
}

// ── Subcommands ─────────────────────────────────────────────────

pub async fn run_serve(cli: &Cli, config: Config, port: Option<u16>) -> Result<()> {
    let port = port.unwrap_or(config.port);
    info!(
        port,
        max_length_ceiling = config.max_length_ceiling,
        max_active_tasks = config.max_active_tasks,
        "hashreach starting"
    );
    let (registry, metrics) = build_registry(cli, config).await?;
    hashreach::dashboard::run(port, registry, metrics).await
}

/// Run one search in the foreground, printing each event as a JSON line.
/// Ctrl-C cancels the search.
pub async fn run_crack(cli: &Cli, config: Config, spec: TaskSpec) -> Result<()> {
    let (registry, _metrics) = build_registry(cli, config).await?;
    let task_id = registry.submit(spec).context("search rejected")?;
    let mut sub = registry.hub().subscribe(&task_id);

    loop {
        tokio::select! {
            event = sub.rx.recv() => {
                let Some(event) = event else { break };
                println!("{}", event.to_json());
                if event.is_terminal() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!(task_id = %task_id, "interrupted, cancelling search");
                registry.cancel(&task_id);
            }
        }
    }

    let task = registry
        .status(&task_id)
        .with_context(|| format!("task {} vanished", task_id))?;
    match (task.status, task.result.as_deref()) {
        (TaskStatus::Completed, Some(found)) if !found.is_empty() => {
            info!(task_id = %task_id, result = found, "preimage found");
        }
        (TaskStatus::Completed, _) => info!(task_id = %task_id, "keyspace exhausted, no match"),
        (TaskStatus::Failed, reason) => {
            anyhow::bail!("search failed: {}", reason.unwrap_or("unknown"))
        }
        (status, _) => info!(task_id = %task_id, status = %status, "search ended"),
    }
    Ok(())
}

pub fn run_hash(hash_type: &str, input: &str) -> Result<()> {
    let digests = DigestRegistry::with_builtins();
    let hash = digests.hash_hex(hash_type, input)?;
    println!("{}", hash);
    Ok(())
}
