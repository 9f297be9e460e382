//! # Events — Task Lifecycle Records for Subscribers
//!
//! Every state change of a task is published to the notification hub as a
//! [`TaskEvent`]. The JSON shape is what WebSocket clients receive:
//!
//! | `status` | Extra fields |
//! |----------|--------------|
//! | `STARTED` | `hash_type`, `charset_length`, `max_length` |
//! | `PROGRESS` | `progress`, `current_combination`, `combinations_per_second` |
//! | `COMPLETED` | `result` (empty when nothing matched), `elapsed_time` |
//! | `FAILED` | `result` (failure reason), `elapsed_time` |
//! | `CANCELLED` | `elapsed_time` |
//!
//! All variants carry `task_id`. The hub never looks inside an event.

use serde::{Deserialize, Serialize};

use crate::task::TaskStatus;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskEvent {
    Started {
        task_id: String,
        hash_type: String,
        charset_length: usize,
        max_length: usize,
    },
    Progress {
        task_id: String,
        progress: u8,
        current_combination: String,
        combinations_per_second: u64,
    },
    Completed {
        task_id: String,
        result: String,
        elapsed_time: String,
    },
    Failed {
        task_id: String,
        result: String,
        elapsed_time: String,
    },
    Cancelled {
        task_id: String,
        elapsed_time: String,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> &str {
        match self {
            TaskEvent::Started { task_id, .. }
            | TaskEvent::Progress { task_id, .. }
            | TaskEvent::Completed { task_id, .. }
            | TaskEvent::Failed { task_id, .. }
            | TaskEvent::Cancelled { task_id, .. } => task_id,
        }
    }

    pub fn status(&self) -> TaskStatus {
        match self {
            TaskEvent::Started { .. } => TaskStatus::Started,
            TaskEvent::Progress { .. } => TaskStatus::Progress,
            TaskEvent::Completed { .. } => TaskStatus::Completed,
            TaskEvent::Failed { .. } => TaskStatus::Failed,
            TaskEvent::Cancelled { .. } => TaskStatus::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Wire representation sent to WebSocket subscribers.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"status":"{}","task_id":{:?}}}"#,
                self.status(),
                self.task_id()
            )
        })
    }
}
