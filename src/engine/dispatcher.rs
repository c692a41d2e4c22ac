//! # Task Dispatcher
//!
//! Runs many tasks in parallel across resources on the tokio runtime, never
//! more than `engine.max_concurrent_tasks` at once. Each task still runs its
//! own steps strictly in sequence. Callers serialize operations on the same
//! resource themselves.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

use super::runner::{TaskDefinition, TaskEngine, TaskOutcome};
use crate::error::{OrchestratorError, Result};

#[derive(Clone)]
pub struct TaskDispatcher {
    engine: TaskEngine,
    permits: Arc<Semaphore>,
}

impl TaskDispatcher {
    pub fn new(engine: TaskEngine) -> Self {
        let max = engine.config().max_concurrent_tasks.max(1);
        Self::with_limit(engine, max)
    }

    pub fn with_limit(engine: TaskEngine, max_concurrent_tasks: usize) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
        }
    }

    /// Free worker slots right now
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Spawn one task; it waits for a free slot before its first step
    pub fn dispatch(&self, definition: TaskDefinition) -> JoinHandle<Result<TaskOutcome>> {
        let engine = self.engine.clone();
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| OrchestratorError::Worker(e.to_string()))?;
            debug!(task_id = %definition.task_id, task = %definition.name, "Worker slot acquired");
            engine.run(definition).await
        })
    }

    /// Run all tasks and collect results in input order
    pub async fn run_all(&self, definitions: Vec<TaskDefinition>) -> Vec<Result<TaskOutcome>> {
        let handles: Vec<_> = definitions.into_iter().map(|d| self.dispatch(d)).collect();
        join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.map_err(OrchestratorError::from).and_then(|result| result))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::container::Container;
    use crate::engine::context::TaskContext;
    use crate::engine::params::SharedParams;
    use crate::engine::registry::StepRegistry;
    use crate::engine::step::{Step, StepOutput};
    use crate::remote::{SimulatedConnector, SimulatedPlatform};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Tracks the peak number of concurrent executions
    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Step for Gauge {
        fn name(&self) -> &str {
            "gauge"
        }

        async fn execute(
            &self,
            _ctx: &TaskContext,
            _step_id: &str,
            params: SharedParams,
            _args: &[Value],
        ) -> Result<StepOutput> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(StepOutput::params(params))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_is_bounded() {
        let gauge = Arc::new(Gauge::default());
        let registry = Arc::new(StepRegistry::new());
        registry.register(gauge.clone());
        let dispatcher = TaskDispatcher::with_limit(TaskEngine::new(registry), 2);

        let container = Arc::new(Container::new(
            1,
            "dispatch-test",
            Arc::new(InMemoryStore::new()),
            Arc::new(SimulatedConnector::new(SimulatedPlatform::openstack())),
            ConnectionConfig::default(),
        ));
        let definitions = (0..6)
            .map(|_| TaskDefinition::new("gauge", container.clone(), vec!["gauge".into()], SharedParams::new()))
            .collect();

        let results = dispatcher.run_all(definitions).await;
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(dispatcher.available_slots(), 2);
    }
}
