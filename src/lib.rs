//! # hashreach — Keyspace Search Service for Hex Digests
//!
//! Recovers the preimage of a digest by enumerating every string over a
//! charset up to a maximum length, running each search as a supervised task
//! with live progress streamed to any number of subscribers.
//!
//! ## Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`digest`] | Pluggable tag → digest function table (md5, sha1, sha2 family) |
//! | [`keyspace`] | Candidate enumeration order and keyspace size |
//! | [`engine`] | Blocking search loop with progress, budget and cancellation |
//! | [`progress`] | Atomic counters shared with a running search |
//! | [`task`] | Task records and the lifecycle state machine |
//! | [`events`] | Lifecycle events as streamed to subscribers |
//! | [`hub`] | Per-task fan-out with mailbox replay for late subscribers |
//! | [`registry`] | Submission, cancellation and run supervision |
//! | [`store`] | Persistence trait with in-memory and PostgreSQL backends |
//! | [`config`] | TOML + environment configuration |
//! | [`metrics`] | Prometheus counters |
//! | [`dashboard`] | Axum REST API and per-task WebSocket |

pub mod config;
pub mod dashboard;
pub mod digest;
pub mod engine;
pub mod error;
pub mod events;
pub mod hub;
pub mod keyspace;
pub mod metrics;
pub mod progress;
pub mod registry;
pub mod store;
pub mod task;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering from poisoning.
pub(crate) fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
