//! # Orchestrator
//!
//! Entry point for callers: turns a resource operation into a task definition
//! from the workflow table, runs it on the task engine and returns the
//! resulting resource record.

use serde_json::{json, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use super::capability::CapabilityFactory;
use super::hooks::ResourceHooks;
use super::request::{CreateRequest, UpdateFields};
use super::table::{Operation, ResourceAction, WorkflowTable};
use super::{register_default_steps, WorkflowServices};
use crate::config::OrchestratorConfig;
use crate::constants::params;
use crate::container::Container;
use crate::engine::{
    CheckpointStore, EngineEventPublisher, SharedParams, StepRegistry, TaskDefinition,
    TaskDispatcher, TaskEngine, TaskOutcome,
};
use crate::error::{OrchestratorError, Result};
use crate::models::{Resource, ResourceKind};

/// Outcome of a workflow together with the resource as it stands afterwards
#[derive(Debug, Clone)]
pub struct WorkflowResult {
    pub resource: Resource,
    pub outcome: TaskOutcome,
}

pub struct Orchestrator {
    engine: TaskEngine,
    services: Arc<WorkflowServices>,
    dispatcher: TaskDispatcher,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("services", &self.services)
            .field("steps", self.engine.registry())
            .finish()
    }
}

impl Orchestrator {
    pub fn builder(config: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            checkpoints: None,
            events: None,
            hooks: None,
            capabilities: None,
            table: WorkflowTable::standard(),
        }
    }

    /// Wrap an engine whose registry already holds the workflow steps
    pub fn new(engine: TaskEngine, services: Arc<WorkflowServices>) -> Self {
        let dispatcher = TaskDispatcher::new(engine.clone());
        Self {
            engine,
            services,
            dispatcher,
        }
    }

    pub fn engine(&self) -> &TaskEngine {
        &self.engine
    }

    pub fn table(&self) -> &WorkflowTable {
        &self.services.table
    }

    pub fn events(&self) -> &EngineEventPublisher {
        self.engine.events()
    }

    pub async fn create_task(&self, container: &Arc<Container>, request: &CreateRequest) -> Result<TaskDefinition> {
        let steps = self.services.table.steps(request.kind, Operation::Create)?;
        let mut shared = request.to_params();
        if request.project.is_none() {
            if let Some(project) = project_scope(container, request.parent_id).await? {
                shared.set(params::PROJECT, project);
            }
        }
        Ok(TaskDefinition::new(
            format!("{}.create", request.kind),
            Arc::clone(container),
            steps,
            shared,
        ))
    }

    pub async fn update_task(
        &self,
        container: &Arc<Container>,
        resource_id: i64,
        fields: &UpdateFields,
    ) -> Result<TaskDefinition> {
        let shared = SharedParams::new().with(params::UPDATE_FIELDS, fields);
        self.existing_resource_task(container, resource_id, Operation::Update, shared)
            .await
    }

    pub async fn delete_task(&self, container: &Arc<Container>, resource_id: i64) -> Result<TaskDefinition> {
        self.existing_resource_task(container, resource_id, Operation::Delete, SharedParams::new())
            .await
    }

    pub async fn action_task(
        &self,
        container: &Arc<Container>,
        resource_id: i64,
        action: ResourceAction,
        action_params: Value,
    ) -> Result<TaskDefinition> {
        let action_params = if action_params.is_null() { json!({}) } else { action_params };
        let shared = SharedParams::new()
            .with(params::ACTION, action)
            .with(params::ACTION_PARAMS, action_params);
        self.existing_resource_task(container, resource_id, Operation::Action(action), shared)
            .await
    }

    async fn existing_resource_task(
        &self,
        container: &Arc<Container>,
        resource_id: i64,
        operation: Operation,
        mut shared: SharedParams,
    ) -> Result<TaskDefinition> {
        let resource = container.get_simple_resource(resource_id).await?;
        let steps = self.services.table.steps(resource.kind, operation)?;
        shared.set(params::RESOURCE_ID, resource_id);
        shared.set(params::KIND, resource.kind);
        if let Some(project) = project_scope(container, resource.parent_id).await? {
            shared.set(params::PROJECT, project);
        }
        Ok(TaskDefinition::new(
            format!("{}.{operation}", resource.kind),
            Arc::clone(container),
            steps,
            shared,
        )
        .with_resource(resource_id))
    }

    pub async fn create_resource(&self, container: &Arc<Container>, request: CreateRequest) -> Result<WorkflowResult> {
        let definition = self.create_task(container, &request).await?;
        self.run(container, definition).await
    }

    pub async fn update_resource(
        &self,
        container: &Arc<Container>,
        resource_id: i64,
        fields: UpdateFields,
    ) -> Result<WorkflowResult> {
        let definition = self.update_task(container, resource_id, &fields).await?;
        self.run(container, definition).await
    }

    pub async fn delete_resource(&self, container: &Arc<Container>, resource_id: i64) -> Result<WorkflowResult> {
        let definition = self.delete_task(container, resource_id).await?;
        self.run(container, definition).await
    }

    pub async fn run_action(
        &self,
        container: &Arc<Container>,
        resource_id: i64,
        action: ResourceAction,
        action_params: Value,
    ) -> Result<WorkflowResult> {
        let definition = self
            .action_task(container, resource_id, action, action_params)
            .await?;
        self.run(container, definition).await
    }

    /// Continue a persisted task from its first unfinished step
    pub async fn resume_task(&self, container: &Arc<Container>, task_id: Uuid) -> Result<WorkflowResult> {
        let outcome = self.engine.resume(Arc::clone(container), task_id).await?;
        let resource = resource_of(container, &outcome).await?;
        Ok(WorkflowResult { resource, outcome })
    }

    /// Run on a worker slot in the background
    pub fn dispatch(&self, definition: TaskDefinition) -> JoinHandle<Result<TaskOutcome>> {
        self.dispatcher.dispatch(definition)
    }

    /// Run independent tasks concurrently; results come back in input order
    pub async fn run_all(&self, definitions: Vec<TaskDefinition>) -> Vec<Result<TaskOutcome>> {
        self.dispatcher.run_all(definitions).await
    }

    pub async fn run(&self, container: &Arc<Container>, definition: TaskDefinition) -> Result<WorkflowResult> {
        info!(task_id = %definition.task_id, task = %definition.name, "Running workflow");
        let outcome = self.engine.run(definition).await?;
        let resource = resource_of(container, &outcome).await?;
        Ok(WorkflowResult { resource, outcome })
    }
}

async fn resource_of(container: &Container, outcome: &TaskOutcome) -> Result<Resource> {
    let id = outcome
        .params
        .get_i64(params::RESOURCE_ID)
        .ok_or_else(|| OrchestratorError::MissingParameter {
            step_id: "task outcome".to_string(),
            name: params::RESOURCE_ID.to_string(),
        })?;
    container.get_simple_resource(id).await
}

/// ext_id of the nearest project above `parent_id`
async fn project_scope(container: &Container, mut parent_id: Option<i64>) -> Result<Option<String>> {
    while let Some(id) = parent_id {
        let parent = container.get_simple_resource(id).await?;
        if parent.kind == ResourceKind::Project {
            return Ok(parent.valid_ext_id().map(str::to_string));
        }
        parent_id = parent.parent_id;
    }
    Ok(None)
}

pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    events: Option<EngineEventPublisher>,
    hooks: Option<Arc<dyn ResourceHooks>>,
    capabilities: Option<Arc<dyn CapabilityFactory>>,
    table: WorkflowTable,
}

impl OrchestratorBuilder {
    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn events(mut self, events: EngineEventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn ResourceHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn capabilities(mut self, capabilities: Arc<dyn CapabilityFactory>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn table(mut self, table: WorkflowTable) -> Self {
        self.table = table;
        self
    }

    pub fn build(self) -> Orchestrator {
        let mut services = WorkflowServices::new(self.table);
        if let Some(hooks) = self.hooks {
            services = services.with_hooks(hooks);
        }
        if let Some(capabilities) = self.capabilities {
            services = services.with_capabilities(capabilities);
        }
        let services = Arc::new(services);

        let registry = Arc::new(StepRegistry::new());
        register_default_steps(&registry, Arc::clone(&services));

        let events = self
            .events
            .unwrap_or_else(|| EngineEventPublisher::new(self.config.events.channel_capacity));
        let mut engine = TaskEngine::builder(registry)
            .config(self.config.engine.clone())
            .polling(self.config.polling.clone())
            .events(events);
        if let Some(store) = self.checkpoints {
            engine = engine.checkpoint_store(store);
        }
        Orchestrator::new(engine.build(), services)
    }
}
