//! Task records and the submission request that creates them.
//!
//! ## State Machine
//!
//! ```text
//! PENDING → STARTED → PROGRESS ⟲ → COMPLETED | FAILED | CANCELLED
//! ```
//!
//! The three right-hand states are terminal. [`TaskStatus::can_transition_to`]
//! encodes the allowed edges; the registry's driver is the only code that
//! moves a task along them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Started,
    Progress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Started => "STARTED",
            TaskStatus::Progress => "PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Started) => true,
            (Started | Progress, Progress) => true,
            (Pending | Started | Progress, Completed | Failed | Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "STARTED" => Ok(TaskStatus::Started),
            "PROGRESS" => Ok(TaskStatus::Progress),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            "CANCELLED" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// Job description as accepted from the API layer.
///
/// `charset` and `max_length` fall back to configured defaults; `task_id`
/// falls back to a fresh UUID.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default = "default_hash_type")]
    pub hash_type: String,
    pub target_hash: String,
    #[serde(default)]
    pub charset: Option<String>,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default)]
    pub task_id: Option<String>,
}

fn default_hash_type() -> String {
    "md5".to_string()
}

fn default_max_length() -> usize {
    6
}

/// One submitted search job and its mutable run state.
///
/// Serializes to the status-query shape exposed by the API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub hash_type: String,
    pub target_hash: String,
    pub charset: String,
    pub max_length: usize,
    pub status: TaskStatus,
    pub progress: u8,
    pub current_combination: Option<String>,
    pub combinations_per_second: u64,
    pub result: Option<String>,
    pub elapsed_time: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(
        task_id: String,
        hash_type: String,
        target_hash: String,
        charset: String,
        max_length: usize,
    ) -> Self {
        Task {
            task_id,
            hash_type,
            target_hash,
            charset,
            max_length,
            status: TaskStatus::Pending,
            progress: 0,
            current_combination: None,
            combinations_per_second: 0,
            result: None,
            elapsed_time: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
