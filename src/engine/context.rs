//! # Task Context
//!
//! What a running step sees of its task: identity, the container it works
//! against, the progress side channel, explicit mid-step checkpointing and
//! nested synchronous sub-tasks.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::checkpoint::TaskCheckpoint;
use super::params::SharedParams;
use super::runner::{TaskDefinition, TaskEngine, TaskOutcome};
use crate::config::PollingConfig;
use crate::constants::events;
use crate::container::Container;
use crate::error::Result;

/// One progress message reported by a step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressMessage {
    pub step_id: String,
    pub message: String,
}

pub struct TaskContext {
    task_id: Uuid,
    name: String,
    resource_id: Option<i64>,
    container: Arc<Container>,
    engine: TaskEngine,
    checkpoint: Arc<Mutex<TaskCheckpoint>>,
    progress: Mutex<Vec<ProgressMessage>>,
}

impl TaskContext {
    pub(crate) fn new(
        definition: &TaskDefinition,
        engine: TaskEngine,
        checkpoint: Arc<Mutex<TaskCheckpoint>>,
    ) -> Self {
        Self {
            task_id: definition.task_id,
            name: definition.name.clone(),
            resource_id: definition.resource_id,
            container: Arc::clone(&definition.container),
            engine,
            checkpoint,
            progress: Mutex::new(Vec::new()),
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource_id(&self) -> Option<i64> {
        self.resource_id
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn engine(&self) -> &TaskEngine {
        &self.engine
    }

    /// Poll defaults steps start from
    pub fn polling(&self) -> &PollingConfig {
        self.engine.polling_config()
    }

    /// Report progress; observability only, never control flow
    pub fn progress(&self, step_id: &str, message: impl Into<String>) {
        let message = message.into();
        info!(
            task_id = %self.task_id,
            step_id = %step_id,
            message = %message,
            "Step progress"
        );
        self.engine.events().publish_step(
            events::STEP_PROGRESS,
            self.task_id,
            step_id,
            serde_json::json!({ "message": message }),
        );
        self.progress.lock().push(ProgressMessage {
            step_id: step_id.to_string(),
            message,
        });
    }

    pub fn progress_messages(&self) -> Vec<ProgressMessage> {
        self.progress.lock().clone()
    }

    /// Shared params as last persisted
    pub fn get_shared_data(&self) -> SharedParams {
        self.checkpoint.lock().params.clone()
    }

    /// Persist `params` now, before the current step finishes.
    ///
    /// Used right before an irreversible remote call or a sub-task so that a
    /// resumed run sees what was already started.
    pub async fn set_shared_data(&self, params: &SharedParams) -> Result<()> {
        let snapshot = {
            let mut checkpoint = self.checkpoint.lock();
            checkpoint.params = params.clone();
            checkpoint.clone()
        };
        self.engine.save_checkpoint(&snapshot).await
    }

    /// Run another task to completion and return its outcome.
    ///
    /// The child's error is returned unchanged, so it becomes this step's error.
    pub fn run_subtask(&self, definition: TaskDefinition) -> BoxFuture<'_, Result<TaskOutcome>> {
        let engine = self.engine.clone();
        let parent = self.task_id;
        Box::pin(async move {
            info!(
                task_id = %parent,
                subtask_id = %definition.task_id,
                subtask = %definition.name,
                "Starting sub-task"
            );
            engine.run(definition).await
        })
    }
}
