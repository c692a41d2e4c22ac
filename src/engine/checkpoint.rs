//! # Task Checkpoints
//!
//! Persisted progress of one task: the step list, the index of the next step
//! to run and the shared params as they stood after the last completed step.
//! A worker that restarts picks the task up from here without re-running
//! steps whose side effects already happened.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use super::params::SharedParams;
use super::step::StepDescriptor;
use crate::store::StoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCheckpoint {
    pub task_id: Uuid,
    pub resource_id: Option<i64>,
    pub steps: Vec<StepDescriptor>,
    /// Index of the first step that has not completed
    pub next_step: usize,
    pub params: SharedParams,
    pub status: TaskStatus,
    /// Result of the last completed step
    pub last_result: Value,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TaskCheckpoint {
    pub fn new(
        task_id: Uuid,
        resource_id: Option<i64>,
        steps: Vec<StepDescriptor>,
        params: SharedParams,
    ) -> Self {
        Self {
            task_id,
            resource_id,
            steps,
            next_step: 0,
            params,
            status: TaskStatus::Running,
            last_result: Value::Null,
            error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub fn remaining_steps(&self) -> &[StepDescriptor] {
        self.steps.get(self.next_step..).unwrap_or(&[])
    }
}

/// Storage for task checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save_checkpoint(&self, checkpoint: &TaskCheckpoint) -> StoreResult<()>;

    async fn load_checkpoint(&self, task_id: Uuid) -> StoreResult<Option<TaskCheckpoint>>;

    async fn delete_checkpoint(&self, task_id: Uuid) -> StoreResult<bool>;

    /// Tasks that have neither completed nor failed, oldest first
    async fn running_checkpoints(&self) -> StoreResult<Vec<TaskCheckpoint>>;
}
