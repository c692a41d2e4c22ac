//! # Step Runner
//!
//! Runs one task: an ordered list of steps against one resource. Steps run
//! strictly in order, each only after the previous one's params were
//! persisted. The first error stops the task; nothing is rolled back, the
//! resource keeps whatever state the last successful step gave it, and the
//! failed checkpoint records where to resume.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::checkpoint::{CheckpointStore, TaskCheckpoint, TaskStatus};
use super::context::{ProgressMessage, TaskContext};
use super::events::EngineEventPublisher;
use super::params::SharedParams;
use super::registry::StepRegistry;
use super::step::StepDescriptor;
use crate::config::{EngineConfig, PollingConfig};
use crate::constants::events;
use crate::container::Container;
use crate::error::{OrchestratorError, Result};
use crate::logging::{log_step_operation, log_task_operation};

/// A task ready to run
#[derive(Clone)]
pub struct TaskDefinition {
    pub task_id: Uuid,
    /// Label for logs, e.g. `volume.create`
    pub name: String,
    pub resource_id: Option<i64>,
    pub container: Arc<Container>,
    pub steps: Vec<StepDescriptor>,
    pub params: SharedParams,
}

impl TaskDefinition {
    pub fn new(
        name: impl Into<String>,
        container: Arc<Container>,
        steps: Vec<StepDescriptor>,
        params: SharedParams,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            name: name.into(),
            resource_id: None,
            container,
            steps,
            params,
        }
    }

    pub fn with_task_id(mut self, task_id: Uuid) -> Self {
        self.task_id = task_id;
        self
    }

    pub fn with_resource(mut self, resource_id: i64) -> Self {
        self.resource_id = Some(resource_id);
        self
    }
}

impl std::fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("task_id", &self.task_id)
            .field("name", &self.name)
            .field("resource_id", &self.resource_id)
            .field("container", &self.container.name())
            .field("steps", &self.steps)
            .finish()
    }
}

/// Params as they stood after one step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSnapshot {
    pub index: usize,
    pub step_id: String,
    pub params: SharedParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub task_id: Uuid,
    pub status: TaskStatus,
    /// Result of the final step
    pub result: Value,
    pub params: SharedParams,
    /// One entry per step executed in this run
    pub snapshots: Vec<StepSnapshot>,
    /// Index the run started at; non-zero when resumed
    pub resumed_from: usize,
    pub progress: Vec<ProgressMessage>,
}

impl TaskOutcome {
    pub fn executed_steps(&self) -> Vec<&str> {
        self.snapshots.iter().map(|s| s.step_id.as_str()).collect()
    }
}

struct EngineInner {
    registry: Arc<StepRegistry>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    events: EngineEventPublisher,
    config: EngineConfig,
    polling: PollingConfig,
}

/// Cheap to clone; clones share registry, checkpoint store and event bus
#[derive(Clone)]
pub struct TaskEngine {
    inner: Arc<EngineInner>,
}

impl TaskEngine {
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                registry,
                checkpoints: None,
                events: EngineEventPublisher::default(),
                config: EngineConfig::default(),
                polling: PollingConfig::default(),
            }),
        }
    }

    pub fn builder(registry: Arc<StepRegistry>) -> TaskEngineBuilder {
        TaskEngineBuilder {
            registry,
            checkpoints: None,
            events: None,
            config: EngineConfig::default(),
            polling: PollingConfig::default(),
        }
    }

    pub fn registry(&self) -> &Arc<StepRegistry> {
        &self.inner.registry
    }

    pub fn events(&self) -> &EngineEventPublisher {
        &self.inner.events
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn polling_config(&self) -> &PollingConfig {
        &self.inner.polling
    }

    pub fn checkpoint_store(&self) -> Option<&Arc<dyn CheckpointStore>> {
        self.inner.checkpoints.as_ref()
    }

    pub(crate) async fn save_checkpoint(&self, checkpoint: &TaskCheckpoint) -> Result<()> {
        if !self.inner.config.persist_checkpoints {
            return Ok(());
        }
        if let Some(store) = &self.inner.checkpoints {
            store.save_checkpoint(checkpoint).await?;
        }
        Ok(())
    }

    async fn load_checkpoint(&self, task_id: Uuid) -> Result<Option<TaskCheckpoint>> {
        match &self.inner.checkpoints {
            Some(store) if self.inner.config.persist_checkpoints => {
                Ok(store.load_checkpoint(task_id).await?)
            }
            _ => Ok(None),
        }
    }

    /// Run `definition` to completion or first failure.
    ///
    /// An existing checkpoint for the task id wins over the definition's step
    /// list and params: a completed task returns its stored outcome without
    /// running anything, any other resumes at the first unfinished step.
    pub async fn run(&self, definition: TaskDefinition) -> Result<TaskOutcome> {
        let existing = self.load_checkpoint(definition.task_id).await?;

        let checkpoint = match existing {
            Some(checkpoint) if checkpoint.is_completed() => {
                info!(task_id = %definition.task_id, "Task already completed, returning stored outcome");
                return Ok(TaskOutcome {
                    task_id: checkpoint.task_id,
                    status: TaskStatus::Completed,
                    result: checkpoint.last_result,
                    params: checkpoint.params,
                    snapshots: Vec::new(),
                    resumed_from: checkpoint.next_step,
                    progress: Vec::new(),
                });
            }
            Some(mut checkpoint) => {
                self.inner.registry.ensure_registered(&checkpoint.steps)?;
                checkpoint.status = TaskStatus::Running;
                checkpoint.error = None;
                log_task_operation(
                    "resume",
                    definition.task_id,
                    checkpoint.resource_id,
                    "running",
                    Some(format!("from step {}", checkpoint.next_step).as_str()),
                );
                self.inner.events.publish_task(
                    events::TASK_RESUMED,
                    definition.task_id,
                    serde_json::json!({ "name": definition.name, "next_step": checkpoint.next_step }),
                );
                checkpoint
            }
            None => {
                self.inner.registry.ensure_registered(&definition.steps)?;
                log_task_operation("start", definition.task_id, definition.resource_id, "running", Some(definition.name.as_str()));
                self.inner.events.publish_task(
                    events::TASK_STARTED,
                    definition.task_id,
                    serde_json::json!({ "name": definition.name, "steps": definition.steps.len() }),
                );
                TaskCheckpoint::new(
                    definition.task_id,
                    definition.resource_id,
                    definition.steps.clone(),
                    definition.params.clone(),
                )
            }
        };

        self.save_checkpoint(&checkpoint).await?;

        let resumed_from = checkpoint.next_step;
        let steps = checkpoint.steps.clone();
        let mut params = checkpoint.params.clone();
        let mut last_result = checkpoint.last_result.clone();
        let shared = Arc::new(Mutex::new(checkpoint));
        let ctx = TaskContext::new(&definition, self.clone(), Arc::clone(&shared));
        let mut snapshots = Vec::with_capacity(steps.len().saturating_sub(resumed_from));

        for (index, descriptor) in steps.iter().enumerate().skip(resumed_from) {
            let step_id = descriptor.step_id();
            let step = self.inner.registry.get(step_id)?;

            log_step_operation("execute", ctx.task_id(), step_id, index, "started", None);
            self.inner
                .events
                .publish_step(events::STEP_STARTED, ctx.task_id(), step_id, serde_json::json!({ "index": index }));

            match step.execute(&ctx, step_id, params.clone(), descriptor.args()).await {
                Ok(output) => {
                    params = output.params;
                    last_result = output.result;

                    let snapshot = {
                        let mut checkpoint = shared.lock();
                        checkpoint.next_step = index + 1;
                        checkpoint.params = params.clone();
                        checkpoint.last_result = last_result.clone();
                        checkpoint.clone()
                    };
                    self.save_checkpoint(&snapshot).await?;

                    snapshots.push(StepSnapshot {
                        index,
                        step_id: step_id.to_string(),
                        params: params.clone(),
                    });
                    log_step_operation("execute", ctx.task_id(), step_id, index, "completed", None);
                    self.inner.events.publish_step(
                        events::STEP_COMPLETED,
                        ctx.task_id(),
                        step_id,
                        serde_json::json!({ "index": index, "result": last_result }),
                    );
                }
                Err(err) => {
                    self.fail(&ctx, &shared, step_id, index, &err).await;
                    return Err(err);
                }
            }
        }

        let completed = {
            let mut checkpoint = shared.lock();
            checkpoint.status = TaskStatus::Completed;
            checkpoint.clone()
        };
        self.save_checkpoint(&completed).await?;

        log_task_operation("complete", ctx.task_id(), ctx.resource_id(), "completed", Some(ctx.name()));
        self.inner.events.publish_task(
            events::TASK_COMPLETED,
            ctx.task_id(),
            serde_json::json!({ "name": ctx.name(), "steps_executed": snapshots.len() }),
        );

        Ok(TaskOutcome {
            task_id: ctx.task_id(),
            status: TaskStatus::Completed,
            result: last_result,
            params,
            snapshots,
            resumed_from,
            progress: ctx.progress_messages(),
        })
    }

    /// Run the remaining steps of a persisted task
    pub async fn resume(&self, container: Arc<Container>, task_id: Uuid) -> Result<TaskOutcome> {
        let checkpoint = self
            .load_checkpoint(task_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("Task checkpoint", task_id))?;

        let mut definition = TaskDefinition::new(
            format!("resume:{task_id}"),
            container,
            checkpoint.steps,
            checkpoint.params,
        )
        .with_task_id(task_id);
        definition.resource_id = checkpoint.resource_id;
        self.run(definition).await
    }

    async fn fail(
        &self,
        ctx: &TaskContext,
        shared: &Arc<Mutex<TaskCheckpoint>>,
        step_id: &str,
        index: usize,
        err: &OrchestratorError,
    ) {
        error!(
            task_id = %ctx.task_id(),
            step_id = %step_id,
            step_index = index,
            error_kind = err.kind(),
            error = %err,
            "Step failed, stopping task"
        );

        let failed = {
            let mut checkpoint = shared.lock();
            checkpoint.status = TaskStatus::Failed;
            checkpoint.error = Some(err.to_string());
            checkpoint.clone()
        };
        if let Err(save_err) = self.save_checkpoint(&failed).await {
            error!(task_id = %ctx.task_id(), error = %save_err, "Failed to persist failed checkpoint");
        }

        let context = serde_json::json!({
            "index": index,
            "error": err.to_string(),
            "error_kind": err.kind(),
        });
        self.inner
            .events
            .publish_step(events::STEP_FAILED, ctx.task_id(), step_id, context.clone());
        self.inner
            .events
            .publish_task(events::TASK_FAILED, ctx.task_id(), context);
        log_task_operation("fail", ctx.task_id(), ctx.resource_id(), "failed", Some(err.to_string().as_str()));
    }
}

pub struct TaskEngineBuilder {
    registry: Arc<StepRegistry>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    events: Option<EngineEventPublisher>,
    config: EngineConfig,
    polling: PollingConfig,
}

impl TaskEngineBuilder {
    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn events(mut self, events: EngineEventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    pub fn build(self) -> TaskEngine {
        TaskEngine {
            inner: Arc::new(EngineInner {
                registry: self.registry,
                checkpoints: self.checkpoints,
                events: self.events.unwrap_or_default(),
                config: self.config,
                polling: self.polling,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::engine::step::{Step, StepOutput};
    use crate::remote::{SimulatedConnector, SimulatedPlatform};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Appends its name to params `trail` and counts executions
    struct Recorder {
        name: &'static str,
        runs: AtomicU32,
        fail_on_run: Option<u32>,
    }

    impl Recorder {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                runs: AtomicU32::new(0),
                fail_on_run: None,
            })
        }

        fn failing_once(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                runs: AtomicU32::new(0),
                fail_on_run: Some(1),
            })
        }
    }

    #[async_trait]
    impl Step for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn execute(
            &self,
            _ctx: &TaskContext,
            step_id: &str,
            mut params: SharedParams,
            args: &[Value],
        ) -> Result<StepOutput> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on_run == Some(run) {
                return Err(OrchestratorError::validation(format!("{step_id} failed")));
            }
            let mut trail: Vec<String> = params.get("trail").unwrap_or_default();
            trail.push(step_id.to_string());
            params.set("trail", trail);
            Ok(StepOutput::new(json!({ "args": args }), params))
        }
    }

    fn container() -> Arc<Container> {
        Arc::new(Container::new(
            1,
            "engine-test",
            Arc::new(InMemoryStore::new()),
            Arc::new(SimulatedConnector::new(SimulatedPlatform::openstack())),
            ConnectionConfig::default(),
        ))
    }

    fn engine(registry: Arc<StepRegistry>, store: Arc<InMemoryStore>) -> TaskEngine {
        TaskEngine::builder(registry).checkpoint_store(store).build()
    }

    #[tokio::test]
    async fn test_steps_run_in_order_and_thread_params() {
        let registry = Arc::new(StepRegistry::new());
        registry.register(Recorder::new("a"));
        registry.register(Recorder::new("b"));
        let engine = engine(registry, Arc::new(InMemoryStore::new()));

        let definition = TaskDefinition::new(
            "test",
            container(),
            vec!["a".into(), StepDescriptor::with_args("b", vec![json!("x")]), "a".into()],
            SharedParams::new(),
        );
        let outcome = engine.run(definition).await.unwrap();

        assert_eq!(outcome.executed_steps(), vec!["a", "b", "a"]);
        assert_eq!(
            outcome.params.get::<Vec<String>>("trail").unwrap(),
            vec!["a", "b", "a"]
        );
        assert_eq!(outcome.snapshots[1].params.get::<Vec<String>>("trail").unwrap(), vec!["a", "b"]);
        assert_eq!(outcome.result, json!({ "args": [] }));
    }

    #[tokio::test]
    async fn test_unregistered_step_fails_before_running_anything() {
        let registry = Arc::new(StepRegistry::new());
        let a = Recorder::new("a");
        registry.register(a.clone());
        let engine = engine(registry, Arc::new(InMemoryStore::new()));

        let definition = TaskDefinition::new("test", container(), vec!["a".into(), "missing".into()], SharedParams::new());
        let err = engine.run(definition).await.unwrap_err();

        assert_eq!(err, OrchestratorError::StepNotRegistered("missing".to_string()));
        assert_eq!(a.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_stops_task_and_resume_skips_completed_steps() {
        let registry = Arc::new(StepRegistry::new());
        let a = Recorder::new("a");
        let b = Recorder::failing_once("b");
        let c = Recorder::new("c");
        registry.register(a.clone());
        registry.register(b.clone());
        registry.register(c.clone());
        let store = Arc::new(InMemoryStore::new());
        let engine = engine(registry, store.clone());
        let container = container();

        let definition = TaskDefinition::new(
            "test",
            container.clone(),
            vec!["a".into(), "b".into(), "c".into()],
            SharedParams::new(),
        );
        let task_id = definition.task_id;
        assert!(engine.run(definition).await.is_err());
        assert_eq!(c.runs.load(Ordering::SeqCst), 0);

        let failed = store.load_checkpoint(task_id).await.unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.next_step, 1);

        let outcome = engine.resume(container.clone(), task_id).await.unwrap();
        assert_eq!(outcome.resumed_from, 1);
        assert_eq!(outcome.executed_steps(), vec!["b", "c"]);
        assert_eq!(a.runs.load(Ordering::SeqCst), 1);
        assert_eq!(
            outcome.params.get::<Vec<String>>("trail").unwrap(),
            vec!["a", "b", "c"]
        );

        // Completed tasks return the stored outcome
        let again = engine.resume(container, task_id).await.unwrap();
        assert!(again.snapshots.is_empty());
        assert_eq!(again.params, outcome.params);
        assert_eq!(c.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_events_published_for_task_lifecycle() {
        let registry = Arc::new(StepRegistry::new());
        registry.register(Recorder::new("a"));
        let engine = TaskEngine::new(registry);
        let mut rx = engine.events().subscribe();

        let definition = TaskDefinition::new("test", container(), vec!["a".into()], SharedParams::new());
        engine.run(definition).await.unwrap();

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name);
        }
        assert_eq!(
            names,
            vec![
                events::TASK_STARTED,
                events::STEP_STARTED,
                events::STEP_COMPLETED,
                events::TASK_COMPLETED
            ]
        );
    }
}
