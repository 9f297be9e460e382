//! # Registry — Task Lifecycle and Run Supervision
//!
//! Owns every task this process has accepted. [`TaskRegistry::submit`]
//! validates a [`TaskSpec`], creates the PENDING record and spawns a driver
//! that runs the search engine on Tokio's blocking pool. The driver is the
//! only writer of its task's state; everything else reads.
//!
//! ## Driver
//!
//! ```text
//! create_record ─► STARTED ─► spawn_blocking(engine::run) ──► COMPLETED | FAILED | CANCELLED
//!                                  │ ProgressReport (unbounded mpsc)
//!                                  ▼
//!                     PROGRESS: watch ─► store ─► hub
//! ```
//!
//! Each running state change is applied in the same order to the task's
//! `watch` channel, the [`TaskStore`], and the [`Hub`]. The terminal state
//! goes to the store and hub first and to the `watch` channel last, so
//! anyone woken by [`TaskRegistry::wait_terminal`] finds it persisted and
//! published. Store errors are logged and ignored. A panic inside the
//! engine surfaces as a `JoinError` and ends the task as FAILED.
//!
//! Every status change goes through [`TaskStatus::can_transition_to`]; an
//! edge the state machine forbids is logged and not applied.
//!
//! ## Concurrency
//!
//! - Running tasks are tracked in `active` (id → cancellation token). An id
//!   stays there until its engine has returned and the terminal event is
//!   published, so the same id never has two engines at once.
//! - `max_active_tasks = 0` disables admission control.
//! - Reusing a terminal id discards the previous run's unread hub backlog, so
//!   a subscriber only ever sees one run per id.
//! - Progress percent is kept monotonic and stays at or below 99 until the
//!   task COMPLETES.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::digest::{DigestFn, DigestRegistry};
use crate::engine::{self, EngineConfig, Outcome, SearchJob};
use crate::error::SubmitError;
use crate::events::TaskEvent;
use crate::hub::Hub;
use crate::lock_or_recover;
use crate::metrics::Metrics;
use crate::progress::{format_hms, Progress, MAX_RUNNING_PERCENT};
use crate::store::TaskStore;
use crate::task::{Task, TaskSpec, TaskStatus};

/// How often a long run logs its counters at info level.
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(30);

struct Inner {
    config: Config,
    engine: EngineConfig,
    digests: DigestRegistry,
    hub: Hub,
    store: Arc<dyn TaskStore>,
    metrics: Option<Arc<Metrics>>,
    /// Every task seen by this process, by id.
    tasks: Mutex<HashMap<String, watch::Receiver<Task>>>,
    /// Tasks whose driver has not finished yet.
    active: Mutex<HashMap<String, CancellationToken>>,
}

/// Handle to the task registry. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<Inner>,
}

/// Fields of a submission after defaults, validation and clamping.
struct Resolved {
    task_id: String,
    hash_type: String,
    digest: DigestFn,
    target: String,
    charset: String,
    symbols: Vec<char>,
    max_length: usize,
}

impl TaskRegistry {
    pub fn new(
        config: Config,
        digests: DigestRegistry,
        hub: Hub,
        store: Arc<dyn TaskStore>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let engine = config.engine_config();
        TaskRegistry {
            inner: Arc::new(Inner {
                config,
                engine,
                digests,
                hub,
                store,
                metrics,
                tasks: Mutex::new(HashMap::new()),
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.inner.hub
    }

    pub fn digests(&self) -> &DigestRegistry {
        &self.inner.digests
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    fn resolve(&self, spec: TaskSpec) -> Result<Resolved, SubmitError> {
        let hash_type = spec.hash_type.to_ascii_lowercase();
        let Some(digest) = self.inner.digests.get(&hash_type) else {
            return Err(SubmitError::UnsupportedAlgorithm(spec.hash_type));
        };
        let target = spec.target_hash.trim().to_string();
        if target.is_empty() {
            return Err(SubmitError::EmptyTarget);
        }
        let charset = spec
            .charset
            .unwrap_or_else(|| self.inner.config.default_charset.clone());
        if charset.is_empty() {
            return Err(SubmitError::EmptyCharset);
        }
        let mut seen = HashSet::new();
        let symbols: Vec<char> = charset.chars().collect();
        for &c in &symbols {
            if !seen.insert(c) {
                return Err(SubmitError::DuplicateSymbol(c));
            }
        }
        if spec.max_length == 0 {
            return Err(SubmitError::InvalidMaxLength);
        }
        let ceiling = self.inner.config.max_length_ceiling;
        let max_length = spec.max_length.min(ceiling);
        let task_id = spec
            .task_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if max_length < spec.max_length {
            info!(
                task_id = %task_id,
                requested = spec.max_length,
                ceiling,
                "max_length clamped to ceiling"
            );
        }
        Ok(Resolved {
            task_id,
            hash_type,
            digest,
            target,
            charset,
            symbols,
            max_length,
        })
    }

    /// Validate `spec`, create its task and start the search. Returns the task id
    /// without waiting for the search to run.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, spec: TaskSpec) -> Result<String, SubmitError> {
        let r = self.resolve(spec)?;
        let cancel = CancellationToken::new();
        {
            let mut active = lock_or_recover(&self.inner.active);
            if active.contains_key(&r.task_id) {
                return Err(SubmitError::AlreadyActive(r.task_id));
            }
            let limit = self.inner.config.max_active_tasks;
            if limit > 0 && active.len() >= limit {
                return Err(SubmitError::AtCapacity { limit });
            }
            active.insert(r.task_id.clone(), cancel.clone());
        }
        self.inner.hub.reset(&r.task_id);

        let task = Task::new(
            r.task_id.clone(),
            r.hash_type.clone(),
            r.target.clone(),
            r.charset,
            r.max_length,
        );
        let (tx, rx) = watch::channel(task);
        lock_or_recover(&self.inner.tasks).insert(r.task_id.clone(), rx);

        let job = SearchJob {
            task_id: r.task_id.clone(),
            hash_type: r.hash_type,
            digest: r.digest,
            target: r.target,
            charset: r.symbols,
            max_length: r.max_length,
        };

        if let Some(m) = &self.inner.metrics {
            m.tasks_submitted.inc();
            m.tasks_active.inc();
        }
        info!(
            task_id = %job.task_id,
            hash_type = %job.hash_type,
            charset_len = job.charset.len(),
            max_length = job.max_length,
            keyspace = %job.keyspace(),
            "task submitted"
        );

        let inner = Arc::clone(&self.inner);
        tokio::spawn(drive(inner, job, tx, cancel));
        Ok(r.task_id)
    }

    /// Signal a running task to stop. Returns true only if this call
    /// signalled a task that was still running.
    pub fn cancel(&self, task_id: &str) -> bool {
        let active = lock_or_recover(&self.inner.active);
        let Some(token) = active.get(task_id) else {
            return false;
        };
        let terminal = lock_or_recover(&self.inner.tasks)
            .get(task_id)
            .map_or(true, |rx| rx.borrow().is_terminal());
        if terminal || token.is_cancelled() {
            return false;
        }
        token.cancel();
        info!(task_id, "cancellation requested");
        true
    }

    /// Current state of a task known to this process.
    pub fn status(&self, task_id: &str) -> Option<Task> {
        lock_or_recover(&self.inner.tasks)
            .get(task_id)
            .map(|rx| rx.borrow().clone())
    }

    /// Like [`status`](Self::status), falling back to the store for tasks
    /// from earlier processes.
    pub async fn lookup(&self, task_id: &str) -> Option<Task> {
        if let Some(task) = self.status(task_id) {
            return Some(task);
        }
        match self.inner.store.get(task_id).await {
            Ok(task) => task,
            Err(e) => {
                warn!(task_id, error = %e, "store lookup failed");
                None
            }
        }
    }

    /// Ids of tasks whose run has not finished.
    pub fn list_active(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock_or_recover(&self.inner.active).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// One page of persisted tasks, newest first. Records still running in
    /// this process are replaced by their live state.
    pub async fn list(&self, skip: usize, limit: usize) -> anyhow::Result<Vec<Task>> {
        let mut page = self.inner.store.list(skip, limit).await?;
        let tasks = lock_or_recover(&self.inner.tasks);
        for record in page.iter_mut().filter(|t| !t.is_terminal()) {
            if let Some(rx) = tasks.get(&record.task_id) {
                *record = rx.borrow().clone();
            }
        }
        Ok(page)
    }

    /// Wait until `task_id` reaches a terminal state or `timeout` elapses.
    pub async fn wait_terminal(&self, task_id: &str, timeout: Duration) -> Option<Task> {
        let mut rx = lock_or_recover(&self.inner.tasks).get(task_id).cloned()?;
        let waited = tokio::time::timeout(timeout, rx.wait_for(|t| t.is_terminal()))
            .await
            .map(|r| r.map(|task| task.clone()));
        match waited {
            Ok(Ok(task)) => Some(task),
            Ok(Err(_)) => {
                let task = rx.borrow().clone();
                task.is_terminal().then_some(task)
            }
            Err(_) => None,
        }
    }

    /// Cancel every running task, e.g. on shutdown.
    pub fn cancel_all(&self) -> usize {
        let ids = self.list_active();
        ids.iter().filter(|id| self.cancel(id)).count()
    }
}

fn persist(result: anyhow::Result<()>, task_id: &str, op: &'static str) {
    if let Err(e) = result {
        warn!(task_id, op, error = %e, "task store write failed");
    }
}

/// Apply `update` and move the task to `next`, unless the state machine
/// forbids that edge. Returns whether the change was applied.
fn advance(tx: &watch::Sender<Task>, next: TaskStatus, update: impl FnOnce(&mut Task)) -> bool {
    tx.send_if_modified(|t| {
        if !t.status.can_transition_to(next) {
            warn!(
                task_id = %t.task_id,
                from = %t.status,
                to = %next,
                "illegal status transition ignored"
            );
            return false;
        }
        t.status = next;
        update(t);
        true
    })
}

fn terminal_of(outcome: Outcome) -> (TaskStatus, Option<String>) {
    match outcome {
        Outcome::Found(candidate) => (TaskStatus::Completed, Some(candidate)),
        Outcome::Exhausted | Outcome::BudgetExceeded => (TaskStatus::Completed, Some(String::new())),
        Outcome::Cancelled => (TaskStatus::Cancelled, None),
        Outcome::Failed(reason) => (TaskStatus::Failed, Some(reason)),
    }
}

/// Runs one task from STARTED to its terminal state. Sole writer of `tx`.
async fn drive(
    inner: Arc<Inner>,
    job: SearchJob,
    tx: watch::Sender<Task>,
    cancel: CancellationToken,
) {
    let task_id = job.task_id.clone();
    let store = Arc::clone(&inner.store);

    let record = tx.borrow().clone();
    persist(store.create_record(&record).await, &task_id, "create_record");

    advance(&tx, TaskStatus::Started, |_| {});
    persist(store.mark_started(&task_id).await, &task_id, "mark_started");
    inner.hub.publish(
        &task_id,
        TaskEvent::Started {
            task_id: task_id.clone(),
            hash_type: job.hash_type.clone(),
            charset_length: job.charset.len(),
            max_length: job.max_length,
        },
    );

    let progress = Progress::new();
    let (report_tx, mut report_rx) = mpsc::unbounded_channel();
    let handle = {
        let job = job.clone();
        let config = inner.engine.clone();
        let cancel = cancel.clone();
        let progress = Arc::clone(&progress);
        tokio::task::spawn_blocking(move || {
            engine::run(&job, &config, &cancel, &progress, &report_tx)
        })
    };

    // The channel closes when the engine returns and drops its sender.
    let mut last_log = Instant::now();
    while let Some(report) = report_rx.recv().await {
        if last_log.elapsed() >= STATUS_LOG_INTERVAL {
            progress.log_status(&task_id);
            last_log = Instant::now();
        }
        let mut percent = 0;
        advance(&tx, TaskStatus::Progress, |t| {
            t.progress = t.progress.max(report.percent).min(MAX_RUNNING_PERCENT);
            t.current_combination = Some(report.candidate.clone());
            t.combinations_per_second = report.rate;
            percent = t.progress;
        });
        persist(
            store
                .update_progress(&task_id, percent, &report.candidate, report.rate)
                .await,
            &task_id,
            "update_progress",
        );
        inner.hub.publish(
            &task_id,
            TaskEvent::Progress {
                task_id: task_id.clone(),
                progress: percent,
                current_combination: report.candidate,
                combinations_per_second: report.rate,
            },
        );
        debug!(task_id = %task_id, percent, tested = report.tested, "progress");
    }

    let outcome = match handle.await {
        Ok(outcome) => outcome,
        Err(e) => Outcome::Failed(format!("search aborted: {}", e)),
    };
    let elapsed = progress.elapsed();
    let elapsed_time = format_hms(elapsed);
    let tested = progress.tested.load(std::sync::atomic::Ordering::Relaxed);
    let (status, result) = terminal_of(outcome);

    persist(
        store
            .mark_complete(&task_id, status, result.as_deref(), elapsed)
            .await,
        &task_id,
        "mark_complete",
    );

    let event = match status {
        TaskStatus::Cancelled => TaskEvent::Cancelled {
            task_id: task_id.clone(),
            elapsed_time: elapsed_time.clone(),
        },
        TaskStatus::Failed => TaskEvent::Failed {
            task_id: task_id.clone(),
            result: result.clone().unwrap_or_default(),
            elapsed_time: elapsed_time.clone(),
        },
        _ => TaskEvent::Completed {
            task_id: task_id.clone(),
            result: result.clone().unwrap_or_default(),
            elapsed_time: elapsed_time.clone(),
        },
    };
    inner.hub.publish(&task_id, event);

    if let Some(m) = &inner.metrics {
        m.tasks_active.dec();
        m.record_finished(status.as_str());
        m.record_tested(&job.hash_type, tested);
    }

    // Release the id before the watch turns terminal, so a waiter that
    // resubmits the same id on wake-up is not rejected as still active.
    lock_or_recover(&inner.active).remove(&task_id);
    advance(&tx, status, |t| {
        if status == TaskStatus::Completed {
            t.progress = 100;
        }
        t.result = result.clone();
        t.elapsed_time = Some(elapsed_time.clone());
        t.completed_at = Some(chrono::Utc::now());
    });

    match status {
        TaskStatus::Failed => warn!(
            task_id = %task_id,
            reason = result.as_deref().unwrap_or(""),
            tested,
            elapsed = %elapsed_time,
            "task failed"
        ),
        _ => info!(
            task_id = %task_id,
            status = %status,
            found = result.as_deref().is_some_and(|r| !r.is_empty()),
            tested,
            elapsed = %elapsed_time,
            "task finished"
        ),
    }
}
