//! Shared test helpers for integration tests.

#![allow(dead_code)]

use hashreach::config::Config;
use hashreach::dashboard::AppState;
use hashreach::digest::DigestRegistry;
use hashreach::hub::Hub;
use hashreach::metrics::Metrics;
use hashreach::registry::TaskRegistry;
use hashreach::store::{MemoryStore, PgStore, TaskStore};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for waiting on a small search to finish.
pub const WAIT: Duration = Duration::from_secs(10);

/// Returns the test database URL from the `TEST_DATABASE_URL` environment variable.
/// Panics if the variable is not set.
pub fn test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set for database tests")
}

/// Returns true if the test database URL is configured.
pub fn has_test_db() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

/// Connect to the test database, apply the schema and empty the table.
pub async fn setup_pg_store() -> PgStore {
    let store = PgStore::connect(&test_db_url())
        .await
        .expect("Failed to connect to test database");
    store.migrate().await.expect("migration failed");
    sqlx::raw_sql("TRUNCATE TABLE search_tasks")
        .execute(store.pool())
        .await
        .expect("truncate failed");
    store
}

/// Registry over an in-memory store with the given config.
pub fn registry_with(config: Config) -> (TaskRegistry, Arc<MemoryStore>) {
    registry_over(config, Arc::new(MemoryStore::new()))
}

/// Registry over an existing in-memory store, as if the process restarted.
pub fn registry_over(config: Config, store: Arc<MemoryStore>) -> (TaskRegistry, Arc<MemoryStore>) {
    let hub = Hub::new(config.mailbox_capacity, config.subscriber_capacity);
    let registry = TaskRegistry::new(
        config,
        DigestRegistry::with_builtins(),
        hub,
        Arc::clone(&store) as Arc<dyn TaskStore>,
        None,
    );
    (registry, store)
}

pub fn registry() -> TaskRegistry {
    registry_with(Config::default()).0
}

/// Build an Axum test app over a fresh in-memory registry.
pub fn build_test_app_with(config: Config) -> (axum::Router, TaskRegistry) {
    build_test_app_over(config, Arc::new(MemoryStore::new()))
}

/// Build an Axum test app over an existing in-memory store.
pub fn build_test_app_over(config: Config, store: Arc<MemoryStore>) -> (axum::Router, TaskRegistry) {
    let (registry, _) = registry_over(config, store);
    let state = AppState::new(registry.clone(), Arc::new(Metrics::new()));
    (hashreach::dashboard::build_router(state), registry)
}

pub fn build_test_app() -> (axum::Router, TaskRegistry) {
    build_test_app_with(Config::default())
}

pub fn md5(input: &str) -> String {
    DigestRegistry::with_builtins()
        .hash_hex("md5", input)
        .expect("md5 is built in")
}
