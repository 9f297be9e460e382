//! # Store — Task Persistence
//!
//! The registry records every lifecycle step through the [`TaskStore`] trait.
//! Calls are fire-and-forget from the search's point of view: the driver logs
//! a failed write and carries on, so a database outage never aborts a run.
//!
//! ## Backends
//!
//! - [`MemoryStore`]: a map guarded by a Mutex. Default when no
//!   `DATABASE_URL` is configured, and used throughout the tests.
//! - [`PgStore`]: PostgreSQL via `sqlx::PgPool`, table `search_tasks`
//!   (`migrations/001_create_tasks.sql`).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::lock_or_recover;
use crate::progress::format_hms;
use crate::task::{Task, TaskStatus};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert (or overwrite, for a reused id) the PENDING record.
    async fn create_record(&self, task: &Task) -> Result<()>;

    async fn mark_started(&self, task_id: &str) -> Result<()>;

    async fn update_progress(
        &self,
        task_id: &str,
        percent: u8,
        candidate: &str,
        rate: u64,
    ) -> Result<()>;

    /// Record the terminal state. `result` is `None` only for CANCELLED.
    async fn mark_complete(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<&str>,
        elapsed: Duration,
    ) -> Result<()>;

    async fn get(&self, task_id: &str) -> Result<Option<Task>>;

    /// Most recent first, skipping the newest `skip` records.
    async fn list(&self, skip: usize, limit: usize) -> Result<Vec<Task>>;
}

// ── In-memory ───────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    tasks: Mutex<HashMap<String, Task>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.tasks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update(&self, task_id: &str, f: impl FnOnce(&mut Task)) -> Result<()> {
        let mut tasks = lock_or_recover(&self.tasks);
        let task = tasks
            .get_mut(task_id)
            .with_context(|| format!("no record for task {}", task_id))?;
        f(task);
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create_record(&self, task: &Task) -> Result<()> {
        lock_or_recover(&self.tasks).insert(task.task_id.clone(), task.clone());
        Ok(())
    }

    async fn mark_started(&self, task_id: &str) -> Result<()> {
        self.update(task_id, |t| t.status = TaskStatus::Started)
    }

    async fn update_progress(
        &self,
        task_id: &str,
        percent: u8,
        candidate: &str,
        rate: u64,
    ) -> Result<()> {
        self.update(task_id, |t| {
            t.status = TaskStatus::Progress;
            t.progress = percent;
            t.current_combination = Some(candidate.to_string());
            t.combinations_per_second = rate;
        })
    }

    async fn mark_complete(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<&str>,
        elapsed: Duration,
    ) -> Result<()> {
        self.update(task_id, |t| {
            t.status = status;
            if status == TaskStatus::Completed {
                t.progress = 100;
            }
            t.result = result.map(str::to_string);
            t.elapsed_time = Some(format_hms(elapsed));
            t.completed_at = Some(Utc::now());
        })
    }

    async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(lock_or_recover(&self.tasks).get(task_id).cloned())
    }

    async fn list(&self, skip: usize, limit: usize) -> Result<Vec<Task>> {
        let mut all: Vec<Task> = lock_or_recover(&self.tasks).values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all.into_iter().skip(skip).take(limit).collect())
    }
}

// ── PostgreSQL ──────────────────────────────────────────────────

const MIGRATION: &str = include_str!("../migrations/001_create_tasks.sql");

#[derive(sqlx::FromRow)]
struct TaskRow {
    task_id: String,
    hash_type: String,
    target_hash: String,
    charset: String,
    max_length: i32,
    status: String,
    progress: i16,
    current_combination: Option<String>,
    combinations_per_second: i64,
    result: Option<String>,
    elapsed_secs: Option<f64>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<TaskRow> for Task {
    type Error = anyhow::Error;

    fn try_from(row: TaskRow) -> Result<Self> {
        let status = row
            .status
            .parse::<TaskStatus>()
            .map_err(anyhow::Error::msg)?;
        Ok(Task {
            task_id: row.task_id,
            hash_type: row.hash_type,
            target_hash: row.target_hash,
            charset: row.charset,
            max_length: usize::try_from(row.max_length).unwrap_or(0),
            status,
            progress: u8::try_from(row.progress).unwrap_or(0),
            current_combination: row.current_combination,
            combinations_per_second: u64::try_from(row.combinations_per_second).unwrap_or(0),
            result: row.result,
            elapsed_time: row
                .elapsed_secs
                .map(|s| format_hms(Duration::from_secs_f64(s.max(0.0)))),
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

const TASK_COLUMNS: &str = "task_id, hash_type, target_hash, charset, max_length, status, progress, \
     current_combination, combinations_per_second, result, elapsed_secs, created_at, completed_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .context("failed to connect to PostgreSQL")?;
        Ok(PgStore { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `search_tasks` table if it does not exist.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATION)
            .execute(&self.pool)
            .await
            .context("failed to apply search_tasks migration")?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for PgStore {
    async fn create_record(&self, task: &Task) -> Result<()> {
        sqlx::query(
            "INSERT INTO search_tasks (task_id, hash_type, target_hash, charset, max_length, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (task_id) DO UPDATE SET
                hash_type = EXCLUDED.hash_type,
                target_hash = EXCLUDED.target_hash,
                charset = EXCLUDED.charset,
                max_length = EXCLUDED.max_length,
                status = EXCLUDED.status,
                progress = 0,
                current_combination = NULL,
                combinations_per_second = 0,
                result = NULL,
                elapsed_secs = NULL,
                created_at = EXCLUDED.created_at,
                started_at = NULL,
                completed_at = NULL",
        )
        .bind(&task.task_id)
        .bind(&task.hash_type)
        .bind(&task.target_hash)
        .bind(&task.charset)
        .bind(i32::try_from(task.max_length).unwrap_or(i32::MAX))
        .bind(task.status.as_str())
        .bind(task.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_started(&self, task_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE search_tasks SET status = 'STARTED', started_at = NOW() WHERE task_id = $1",
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_progress(
        &self,
        task_id: &str,
        percent: u8,
        candidate: &str,
        rate: u64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE search_tasks
             SET status = 'PROGRESS', progress = GREATEST(progress, $2),
                 current_combination = $3, combinations_per_second = $4
             WHERE task_id = $1",
        )
        .bind(task_id)
        .bind(i16::from(percent))
        .bind(candidate)
        .bind(i64::try_from(rate).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_complete(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<&str>,
        elapsed: Duration,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE search_tasks
             SET status = $2, result = $3, elapsed_secs = $4, completed_at = NOW(),
                 progress = CASE WHEN $2 = 'COMPLETED' THEN 100 ELSE progress END
             WHERE task_id = $1",
        )
        .bind(task_id)
        .bind(status.as_str())
        .bind(result)
        .bind(elapsed.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        let sql = format!("SELECT {} FROM search_tasks WHERE task_id = $1", TASK_COLUMNS);
        let row = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Task::try_from).transpose()
    }

    async fn list(&self, skip: usize, limit: usize) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {} FROM search_tasks ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            TASK_COLUMNS
        );
        let rows = sqlx::query_as::<_, TaskRow>(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(i64::try_from(skip).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Task::try_from).collect()
    }
}
