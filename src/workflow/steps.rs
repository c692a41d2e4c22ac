//! # Generic Workflow Steps
//!
//! One implementation per step identifier, parameterized by the resource kind
//! found in the shared params. Every step is safe to re-run: it reads the
//! current resource record and remote state first and only acts on what is
//! still missing.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::capability::{ProvisioningCapability, RemoteDeletion};
use super::profiles::profile;
use super::request::{LinkRequest, UpdateFields};
use super::table::{adoption_steps, cascade_expunge_steps, Operation, ResourceAction};
use super::WorkflowServices;
use crate::constants::{attrib, params, steps};
use crate::engine::{SharedParams, Step, StepOutput, TaskContext, TaskDefinition};
use crate::error::{OrchestratorError, Result};
use crate::models::{is_ext_id_valid, LinkType, NewResource, Resource, ResourceKind, ResourceUpdate};
use crate::polling::{poll, Observation, PollOutcome, PollProgress, PollSpec};
use crate::remote::RemoteSpec;
use crate::state_machine::ResourceState;

fn resource_id(step_id: &str, shared: &SharedParams) -> Result<i64> {
    shared.require(step_id, params::RESOURCE_ID)
}

fn skipped(reason: &str, shared: SharedParams) -> StepOutput {
    StepOutput::new(json!({ "skipped": reason }), shared)
}

async fn capability(
    services: &WorkflowServices,
    ctx: &TaskContext,
    kind: ResourceKind,
    shared: &SharedParams,
) -> Result<Arc<dyn ProvisioningCapability>> {
    services
        .capabilities
        .capability(ctx.container(), kind, shared.get_str(params::PROJECT))
        .await
}

/// Task id for a sub-task, persisted before first use so a resumed parent
/// resumes the same child instead of starting a new one
async fn subtask_id(ctx: &TaskContext, shared: &mut SharedParams, key: &str) -> Result<Uuid> {
    let mut ids: Map<String, Value> = shared.get(params::SUBTASKS).unwrap_or_default();
    if let Some(id) = ids
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
    {
        return Ok(id);
    }
    let id = Uuid::new_v4();
    ids.insert(key.to_string(), Value::String(id.to_string()));
    shared.set(params::SUBTASKS, ids);
    ctx.set_shared_data(shared).await?;
    Ok(id)
}

fn describe(kind: ResourceKind, ext_id: &str, progress: &PollProgress<'_>) -> String {
    let seen = match progress.observation {
        Observation::Status(status) => status.as_str(),
        Observation::Pending => "pending",
        Observation::Gone => "not visible",
    };
    format!(
        "{kind} {ext_id}: {seen} (attempt {}/{})",
        progress.attempt, progress.max_attempts
    )
}

async fn wait_for(
    ctx: &TaskContext,
    step_id: &str,
    cap: &dyn ProvisioningCapability,
    ext_id: &str,
    spec: PollSpec,
) -> Result<PollOutcome> {
    let kind = cap.kind();
    poll(&spec, || cap.fetch_remote_status(ext_id), |p| ctx.progress(step_id, describe(kind, ext_id, p))).await
}

/// A remote entity that reached a declared error status leaves its resource
/// in `ERROR`; timeouts and transport failures leave it where it was
async fn mark_failed(ctx: &TaskContext, resource_id: i64, err: &OrchestratorError) {
    if !matches!(err, OrchestratorError::RemoteOperation { status_code: None, .. }) {
        return;
    }
    let reason = err.to_string();
    if let Err(e) = ctx
        .container()
        .update_resource_state(resource_id, ResourceState::Error, Some(&reason))
        .await
    {
        warn!(resource_id = resource_id, error = %e, "Could not mark resource as failed");
    }
}

pub struct CreateResourcePreStep {
    services: Arc<WorkflowServices>,
}

impl CreateResourcePreStep {
    pub fn new(services: Arc<WorkflowServices>) -> Self {
        Self { services }
    }

    /// Existing record for this create, or a freshly recorded intent
    async fn locate_or_record(&self, ctx: &TaskContext, step_id: &str, shared: &SharedParams) -> Result<Resource> {
        let container = ctx.container();
        if let Some(id) = shared.get_i64(params::RESOURCE_ID) {
            return container.get_simple_resource(id).await;
        }

        let kind: ResourceKind = shared.require(step_id, params::KIND)?;
        let name: String = shared.require(step_id, params::NAME)?;
        let parent_id = shared.get_i64(params::PARENT_ID);
        let ext_id = shared
            .get_str(params::EXT_ID)
            .filter(|e| is_ext_id_valid(Some(e)))
            .map(str::to_string);

        let existing = match &ext_id {
            Some(ext_id) => container.find_resource_by_extid(ext_id).await?,
            None => container.find_resource_by_name(kind, &name, parent_id).await?,
        };
        if let Some(existing) = existing {
            if existing.kind != kind {
                return Err(OrchestratorError::validation(format!(
                    "resource {} is a {}, not a {kind}",
                    existing.id, existing.kind
                )));
            }
            ctx.progress(step_id, format!("reusing {kind} {} in {}", existing.id, existing.state));
            return Ok(existing);
        }

        let mut new = NewResource::new(name, kind);
        new.parent_id = parent_id;
        new.ext_id = ext_id;
        new.desc = shared.get(params::DESC);
        new.tags = shared.get(params::TAGS).unwrap_or_default();
        if let Some(attrib) = shared.raw(params::ATTRIB) {
            new.attrib = attrib.clone();
        }
        self.services.hooks.pre_create(container, &new).await?;
        container.add_resource(new).await
    }
}

#[async_trait]
impl Step for CreateResourcePreStep {
    fn name(&self) -> &str {
        steps::CREATE_RESOURCE_PRE_STEP
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        step_id: &str,
        mut shared: SharedParams,
        _args: &[Value],
    ) -> Result<StepOutput> {
        let resource = self.locate_or_record(ctx, step_id, &shared).await?;

        match resource.state {
            ResourceState::Active => shared.set(params::ALREADY_PROVISIONED, true),
            ResourceState::Pending | ResourceState::Error => {
                ctx.container()
                    .update_resource_state(resource.id, ResourceState::Building, Some("create"))
                    .await?;
            }
            ResourceState::Building => {}
            other => {
                return Err(OrchestratorError::validation(format!(
                    "resource {} is {other} and cannot be created",
                    resource.id
                )))
            }
        }

        shared.set(params::RESOURCE_ID, resource.id);
        shared.set(params::OBJID, &resource.objid);
        shared.set(params::KIND, resource.kind);
        shared.set(params::NAME, &resource.name);
        Ok(StepOutput::new(json!({ "resource_id": resource.id }), shared))
    }
}

/// Provisions what a resource needs before it can be created remotely.
///
/// Args are `[kind, attribute]`. The attribute holds either the local id of
/// an existing resource or an object describing one to create through a
/// nested create task. Either way the dependency ends up linked and its id
/// and ext_id recorded on the resource.
pub struct ProvisionDependencyStep {
    services: Arc<WorkflowServices>,
}

impl ProvisionDependencyStep {
    pub fn new(services: Arc<WorkflowServices>) -> Self {
        Self { services }
    }
}

fn dependency_link(kind: ResourceKind) -> LinkType {
    match kind {
        ResourceKind::Volume => LinkType::Volume,
        ResourceKind::VolumeSnapshot => LinkType::Snapshot,
        ResourceKind::Network => LinkType::Network,
        ResourceKind::SecurityGroup | ResourceKind::NsxSecurityGroup => LinkType::SecurityGroup,
        _ => LinkType::Relation,
    }
}

#[async_trait]
impl Step for ProvisionDependencyStep {
    fn name(&self) -> &str {
        steps::PROVISION_DEPENDENCY_STEP
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        step_id: &str,
        mut shared: SharedParams,
        args: &[Value],
    ) -> Result<StepOutput> {
        let (kind, key) = match args {
            [kind, key, ..] => (
                kind.as_str().and_then(|k| k.parse::<ResourceKind>().ok()),
                key.as_str(),
            ),
            _ => (None, None),
        };
        let (Some(kind), Some(key)) = (kind, key) else {
            return Err(OrchestratorError::validation(format!(
                "{step_id} expects [kind, attribute] arguments, got {args:?}"
            )));
        };

        let container = ctx.container();
        let id = resource_id(step_id, &shared)?;
        let resource = container.get_simple_resource(id).await?;

        let dependency_id = match resource.attr(key).cloned() {
            None => return Ok(skipped("no dependency requested", shared)),
            Some(Value::Number(n)) => {
                let dependency_id = n.as_i64().ok_or_else(|| {
                    OrchestratorError::validation(format!("{key} must be a resource id, got {n}"))
                })?;
                let dependency = container.get_simple_resource(dependency_id).await?;
                if dependency.kind != kind || !dependency.state.is_usable() {
                    return Err(OrchestratorError::validation(format!(
                        "{key} must reference a usable {kind}, resource {dependency_id} is a {} in {}",
                        dependency.kind, dependency.state
                    )));
                }
                dependency_id
            }
            Some(Value::Object(mut spec)) => {
                let task_id = subtask_id(ctx, &mut shared, &format!("dependency:{key}")).await?;
                let name = spec
                    .remove(params::NAME)
                    .and_then(|n| n.as_str().map(str::to_string))
                    .unwrap_or_else(|| format!("{}-{key}", resource.name));

                let mut sub = SharedParams::new()
                    .with(params::KIND, kind)
                    .with(params::NAME, name)
                    .with(params::ATTRIB, Value::Object(spec));
                if let Some(parent_id) = resource.parent_id {
                    sub.set(params::PARENT_ID, parent_id);
                }
                if let Some(project) = shared.get_str(params::PROJECT) {
                    sub.set(params::PROJECT, project);
                }

                ctx.progress(step_id, format!("provisioning {kind} for {key}"));
                let definition = TaskDefinition::new(
                    format!("{kind}.create"),
                    Arc::clone(container),
                    self.services.table.steps(kind, Operation::Create)?,
                    sub,
                )
                .with_task_id(task_id);
                let outcome = ctx.run_subtask(definition).await?;
                outcome.params.require(step_id, params::RESOURCE_ID)?
            }
            Some(other) => {
                return Err(OrchestratorError::validation(format!(
                    "{key} must be a resource id or an object, got {other}"
                )))
            }
        };

        let dependency = container.get_simple_resource(dependency_id).await?;
        let mut patch = Map::new();
        patch.insert(key.to_string(), json!(dependency_id));
        patch.insert(format!("{key}_ext_id"), json!(dependency.ext_id));
        container
            .update_resource(id, ResourceUpdate::attrib(Value::Object(patch)), Some("dependency provisioned"))
            .await?;
        container
            .add_link(dependency_link(kind), id, dependency_id, Value::Null)
            .await?;

        let mut dependencies: Vec<i64> = shared.get(params::DEPENDENCIES).unwrap_or_default();
        if !dependencies.contains(&dependency_id) {
            dependencies.push(dependency_id);
        }
        shared.set(params::DEPENDENCIES, dependencies);
        Ok(StepOutput::new(json!({ "dependency": dependency_id }), shared))
    }
}

/// Creates (or finds) the remote entity and waits for it to become ready.
///
/// The ext_id is written to the resource as soon as the platform returns it,
/// before polling, so a retried task polls instead of creating again.
pub struct ProvisionRemoteStep {
    services: Arc<WorkflowServices>,
}

impl ProvisionRemoteStep {
    pub fn new(services: Arc<WorkflowServices>) -> Self {
        Self { services }
    }

    async fn ensure_remote(
        &self,
        ctx: &TaskContext,
        step_id: &str,
        cap: &dyn ProvisioningCapability,
        resource: &Resource,
    ) -> Result<String> {
        if let Some(ext_id) = resource.valid_ext_id() {
            ctx.progress(step_id, format!("{} {} tracks remote {ext_id}", resource.kind, resource.id));
            return Ok(ext_id.to_string());
        }

        let container = ctx.container();
        let parent_ext_id = match resource.parent_id {
            Some(parent_id) => container
                .get_simple_resource(parent_id)
                .await?
                .valid_ext_id()
                .map(str::to_string),
            None => None,
        };

        let found = match cap.find_by_name(&resource.name, parent_ext_id.as_deref()).await? {
            Some(record) if container.find_resource_by_extid(&record.id).await?.is_none() => {
                Some(record.id)
            }
            _ => None,
        };

        let ext_id = match found {
            Some(ext_id) => {
                ctx.progress(step_id, format!("found existing remote {} {ext_id}", resource.kind));
                ext_id
            }
            None => {
                let spec = RemoteSpec {
                    kind: resource.kind,
                    name: resource.name.clone(),
                    parent_ext_id,
                    attributes: resource.attrib.clone(),
                };
                cap.provision_remote(&spec).await?
            }
        };

        container
            .update_resource(resource.id, ResourceUpdate::ext_id(&ext_id), Some("remote entity assigned"))
            .await?;
        Ok(ext_id)
    }
}

#[async_trait]
impl Step for ProvisionRemoteStep {
    fn name(&self) -> &str {
        steps::PROVISION_REMOTE_STEP
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        step_id: &str,
        mut shared: SharedParams,
        _args: &[Value],
    ) -> Result<StepOutput> {
        if shared.flag(params::ALREADY_PROVISIONED) {
            return Ok(skipped("already provisioned", shared));
        }
        let container = ctx.container();
        let id = resource_id(step_id, &shared)?;
        let resource = container.get_simple_resource(id).await?;
        let kind_profile = profile(resource.kind);
        if !kind_profile.remote {
            return Ok(skipped("local-only kind", shared));
        }

        let cap = capability(&self.services, ctx, resource.kind, &shared).await?;
        let ext_id = self.ensure_remote(ctx, step_id, cap.as_ref(), &resource).await?;
        shared.set(params::EXT_ID, &ext_id);

        let spec = PollSpec::from_config(
            format!("{} create", resource.kind),
            kind_profile.create_success,
            kind_profile.create_error,
            ctx.polling(),
        )
        .with_target(&ext_id);
        let outcome = match wait_for(ctx, step_id, cap.as_ref(), &ext_id, spec).await {
            Ok(outcome) => outcome,
            Err(e) => {
                mark_failed(ctx, id, &e).await;
                return Err(e);
            }
        };

        let status = outcome.status.unwrap_or_default();
        let mut patch = Map::new();
        patch.insert(attrib::REMOTE_STATUS.to_string(), json!(status));
        container
            .update_resource(id, ResourceUpdate::attrib(Value::Object(patch)), None)
            .await?;
        shared.set(params::REMOTE_STATUS, &status);
        Ok(StepOutput::new(
            json!({ "ext_id": ext_id, "status": status, "attempts": outcome.attempts }),
            shared,
        ))
    }
}

#[derive(Debug, Default)]
pub struct LinkResourcesStep;

#[async_trait]
impl Step for LinkResourcesStep {
    fn name(&self) -> &str {
        steps::LINK_RESOURCES_STEP
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        step_id: &str,
        shared: SharedParams,
        _args: &[Value],
    ) -> Result<StepOutput> {
        let id = resource_id(step_id, &shared)?;
        let requests: Vec<LinkRequest> = match shared.raw(params::LINKS) {
            Some(raw) => serde_json::from_value(raw.clone())?,
            None => Vec::new(),
        };

        for request in &requests {
            ctx.container()
                .add_link(request.link_type, id, request.target, request.attrib.clone())
                .await?;
        }
        Ok(StepOutput::new(json!({ "linked": requests.len() }), shared))
    }
}

/// Registers the resources a stack created remotely as its children
pub struct DiscoverStackChildrenStep {
    services: Arc<WorkflowServices>,
}

impl DiscoverStackChildrenStep {
    pub fn new(services: Arc<WorkflowServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for DiscoverStackChildrenStep {
    fn name(&self) -> &str {
        steps::DISCOVER_STACK_CHILDREN_STEP
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        step_id: &str,
        mut shared: SharedParams,
        _args: &[Value],
    ) -> Result<StepOutput> {
        let container = ctx.container();
        let id = resource_id(step_id, &shared)?;
        let stack = container.get_simple_resource(id).await?;
        let Some(stack_ext_id) = stack.valid_ext_id() else {
            return Ok(skipped("no remote entity", shared));
        };

        let cap = capability(&self.services, ctx, stack.kind, &shared).await?;
        let records = cap.list_children(stack_ext_id).await?;
        let mut children: Vec<i64> = shared.get(params::CHILDREN).unwrap_or_default();

        for record in records {
            let child_id = match container.find_resource_by_extid(&record.id).await? {
                Some(existing) => existing.id,
                None => {
                    let task_id = subtask_id(ctx, &mut shared, &format!("child:{}", record.id)).await?;
                    let mut sub = SharedParams::new()
                        .with(params::KIND, record.kind)
                        .with(params::NAME, record.name.clone().unwrap_or_else(|| record.id.clone()))
                        .with(params::EXT_ID, &record.id)
                        .with(params::PARENT_ID, id)
                        .with(params::ATTRIB, &record.attributes);
                    if let Some(project) = shared.get_str(params::PROJECT) {
                        sub.set(params::PROJECT, project);
                    }
                    ctx.progress(step_id, format!("adopting {} {}", record.kind, record.id));
                    let definition = TaskDefinition::new(
                        format!("{}.adopt", record.kind),
                        Arc::clone(container),
                        adoption_steps(),
                        sub,
                    )
                    .with_task_id(task_id);
                    let outcome = ctx.run_subtask(definition).await?;
                    outcome.params.require(step_id, params::RESOURCE_ID)?
                }
            };
            container
                .add_link(LinkType::Stack, id, child_id, Value::Null)
                .await?;
            if !children.contains(&child_id) {
                children.push(child_id);
            }
        }

        debug!(stack_id = id, children = children.len(), "Stack children registered");
        shared.set(params::CHILDREN, &children);
        Ok(StepOutput::new(json!({ "children": children }), shared))
    }
}

#[derive(Debug, Default)]
pub struct CreateResourcePostStep;

#[async_trait]
impl Step for CreateResourcePostStep {
    fn name(&self) -> &str {
        steps::CREATE_RESOURCE_POST_STEP
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        step_id: &str,
        shared: SharedParams,
        _args: &[Value],
    ) -> Result<StepOutput> {
        let id = resource_id(step_id, &shared)?;
        let resource = ctx.container().get_simple_resource(id).await?;

        let update = match resource.state {
            ResourceState::Active if resource.active => None,
            ResourceState::Active => Some(ResourceUpdate {
                active: Some(true),
                ..Default::default()
            }),
            _ => Some(ResourceUpdate {
                state: Some(ResourceState::Active),
                active: Some(true),
                ..Default::default()
            }),
        };
        if let Some(update) = update {
            ctx.container()
                .update_resource(id, update, Some("create complete"))
                .await?;
        }
        Ok(StepOutput::new(json!({ "resource_id": id, "state": ResourceState::Active }), shared))
    }
}

pub struct UpdateResourcePreStep {
    services: Arc<WorkflowServices>,
}

impl UpdateResourcePreStep {
    pub fn new(services: Arc<WorkflowServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for UpdateResourcePreStep {
    fn name(&self) -> &str {
        steps::UPDATE_RESOURCE_PRE_STEP
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        step_id: &str,
        shared: SharedParams,
        _args: &[Value],
    ) -> Result<StepOutput> {
        let container = ctx.container();
        let id = resource_id(step_id, &shared)?;
        let fields: Value = shared.require(step_id, params::UPDATE_FIELDS)?;
        let resource = container.get_simple_resource(id).await?;

        self.services.hooks.pre_update(container, &resource, &fields).await?;
        if resource.state != ResourceState::Updating {
            container
                .update_resource_state(id, ResourceState::Updating, Some("update"))
                .await?;
        }
        Ok(StepOutput::params(shared))
    }
}

pub struct UpdateRemoteStep {
    services: Arc<WorkflowServices>,
}

impl UpdateRemoteStep {
    pub fn new(services: Arc<WorkflowServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for UpdateRemoteStep {
    fn name(&self) -> &str {
        steps::UPDATE_REMOTE_STEP
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        step_id: &str,
        mut shared: SharedParams,
        _args: &[Value],
    ) -> Result<StepOutput> {
        let id = resource_id(step_id, &shared)?;
        let fields: UpdateFields = shared.require(step_id, params::UPDATE_FIELDS)?;
        let resource = ctx.container().get_simple_resource(id).await?;
        let kind_profile = profile(resource.kind);

        let Some(ext_id) = resource.valid_ext_id().filter(|_| kind_profile.remote) else {
            return Ok(skipped("no remote entity", shared));
        };
        let remote_fields = fields.remote_fields();
        if remote_fields.is_empty() {
            return Ok(skipped("no remote fields changed", shared));
        }

        let cap = capability(&self.services, ctx, resource.kind, &shared).await?;
        cap.update_remote(ext_id, &Value::Object(remote_fields)).await?;

        let spec = PollSpec::from_config(
            format!("{} update", resource.kind),
            kind_profile.update_success,
            kind_profile.update_error,
            ctx.polling(),
        )
        .with_target(ext_id);
        let outcome = match wait_for(ctx, step_id, cap.as_ref(), ext_id, spec).await {
            Ok(outcome) => outcome,
            Err(e) => {
                mark_failed(ctx, id, &e).await;
                return Err(e);
            }
        };
        shared.set(params::REMOTE_STATUS, &outcome.status);
        Ok(StepOutput::new(json!({ "status": outcome.status }), shared))
    }
}

#[derive(Debug, Default)]
pub struct UpdateResourcePostStep;

#[async_trait]
impl Step for UpdateResourcePostStep {
    fn name(&self) -> &str {
        steps::UPDATE_RESOURCE_POST_STEP
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        step_id: &str,
        shared: SharedParams,
        _args: &[Value],
    ) -> Result<StepOutput> {
        let id = resource_id(step_id, &shared)?;
        let fields: UpdateFields = shared.require(step_id, params::UPDATE_FIELDS)?;
        let resource = ctx.container().get_simple_resource(id).await?;

        let mut attrib_patch = fields.attrib.clone();
        if let Some(status) = shared.get_str(params::REMOTE_STATUS) {
            let patch = attrib_patch.get_or_insert_with(|| json!({}));
            if let Some(map) = patch.as_object_mut() {
                map.insert(attrib::REMOTE_STATUS.to_string(), json!(status));
            }
        }
        let update = ResourceUpdate {
            name: fields.name,
            desc: fields.desc,
            attrib: attrib_patch,
            tags: fields.tags,
            state: (resource.state != ResourceState::Active).then_some(ResourceState::Active),
            ..Default::default()
        };
        let updated = ctx
            .container()
            .update_resource(id, update, Some("update complete"))
            .await?;
        Ok(StepOutput::new(json!({ "resource_id": id, "name": updated.name }), shared))
    }
}

pub struct ExpungeResourcePreStep {
    services: Arc<WorkflowServices>,
}

impl ExpungeResourcePreStep {
    pub fn new(services: Arc<WorkflowServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for ExpungeResourcePreStep {
    fn name(&self) -> &str {
        steps::EXPUNGE_RESOURCE_PRE_STEP
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        step_id: &str,
        mut shared: SharedParams,
        _args: &[Value],
    ) -> Result<StepOutput> {
        let container = ctx.container();
        let id = resource_id(step_id, &shared)?;
        let resource = container.get_simple_resource(id).await?;

        if resource.is_expunged() {
            shared.set(params::ALREADY_EXPUNGED, true);
            return Ok(skipped("already expunged", shared));
        }

        self.services.hooks.pre_delete(container, &resource, &shared).await?;
        if resource.state != ResourceState::Deleting {
            container
                .update_resource_state(id, ResourceState::Deleting, Some("delete"))
                .await?;
        }
        shared.set(params::KIND, resource.kind);
        if let Some(ext_id) = resource.valid_ext_id() {
            shared.set(params::EXT_ID, ext_id);
        }
        Ok(StepOutput::params(shared))
    }
}

/// Deletes the remote entity and waits for it to disappear.
///
/// An entity that is already gone is not an error: the step checks first and
/// skips the delete call.
pub struct DeleteRemoteStep {
    services: Arc<WorkflowServices>,
}

impl DeleteRemoteStep {
    pub fn new(services: Arc<WorkflowServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for DeleteRemoteStep {
    fn name(&self) -> &str {
        steps::DELETE_REMOTE_STEP
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        step_id: &str,
        mut shared: SharedParams,
        _args: &[Value],
    ) -> Result<StepOutput> {
        if shared.flag(params::ALREADY_EXPUNGED) {
            return Ok(skipped("already expunged", shared));
        }
        if shared.flag(params::CASCADE) {
            shared.set(params::REMOTE_GONE, true);
            return Ok(skipped("removed with parent", shared));
        }

        let id = resource_id(step_id, &shared)?;
        let resource = ctx.container().get_simple_resource(id).await?;
        let kind_profile = profile(resource.kind);
        let Some(ext_id) = resource.valid_ext_id().filter(|_| kind_profile.remote) else {
            shared.set(params::REMOTE_GONE, true);
            return Ok(skipped("no remote entity", shared));
        };

        let cap = capability(&self.services, ctx, resource.kind, &shared).await?;
        if cap.get_remote(ext_id).await?.is_none() {
            ctx.progress(step_id, format!("{} {ext_id} already gone", resource.kind));
            shared.set(params::REMOTE_GONE, true);
            return Ok(skipped("remote entity already gone", shared));
        }

        if cap.delete_remote(ext_id).await? == RemoteDeletion::AlreadyGone {
            shared.set(params::REMOTE_GONE, true);
            return Ok(skipped("remote entity already gone", shared));
        }

        let spec = PollSpec::from_config(
            format!("{} delete", resource.kind),
            kind_profile.delete_success,
            kind_profile.delete_error,
            ctx.polling(),
        )
        .with_target(ext_id)
        .gone_is_success();
        let outcome = match wait_for(ctx, step_id, cap.as_ref(), ext_id, spec).await {
            Ok(outcome) => outcome,
            Err(e) => {
                mark_failed(ctx, id, &e).await;
                return Err(e);
            }
        };

        shared.set(params::REMOTE_GONE, true);
        Ok(StepOutput::new(
            json!({ "ext_id": ext_id, "attempts": outcome.attempts }),
            shared,
        ))
    }
}

/// Expunges the live children of a resource, each through its own sub-task
#[derive(Debug, Default)]
pub struct ExpungeChildrenStep;

#[async_trait]
impl Step for ExpungeChildrenStep {
    fn name(&self) -> &str {
        steps::EXPUNGE_CHILDREN_STEP
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        step_id: &str,
        mut shared: SharedParams,
        _args: &[Value],
    ) -> Result<StepOutput> {
        if shared.flag(params::ALREADY_EXPUNGED) {
            return Ok(skipped("already expunged", shared));
        }
        let container = ctx.container();
        let id = resource_id(step_id, &shared)?;

        let mut expunged = Vec::new();
        for child in container.children(id).await? {
            let task_id = subtask_id(ctx, &mut shared, &format!("expunge:{}", child.id)).await?;
            let sub = SharedParams::new()
                .with(params::RESOURCE_ID, child.id)
                .with(params::CASCADE, true);
            ctx.progress(step_id, format!("expunging {} {}", child.kind, child.id));
            let definition = TaskDefinition::new(
                format!("{}.expunge", child.kind),
                Arc::clone(container),
                cascade_expunge_steps(),
                sub,
            )
            .with_task_id(task_id)
            .with_resource(child.id);
            ctx.run_subtask(definition).await?;
            expunged.push(child.id);
        }
        Ok(StepOutput::new(json!({ "expunged_children": expunged }), shared))
    }
}

#[derive(Debug, Default)]
pub struct UnlinkResourcesStep;

#[async_trait]
impl Step for UnlinkResourcesStep {
    fn name(&self) -> &str {
        steps::UNLINK_RESOURCES_STEP
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        step_id: &str,
        shared: SharedParams,
        _args: &[Value],
    ) -> Result<StepOutput> {
        if shared.flag(params::ALREADY_EXPUNGED) {
            return Ok(skipped("already expunged", shared));
        }
        let container = ctx.container();
        let id = resource_id(step_id, &shared)?;

        let mut removed = 0usize;
        for link in container.links(id).await? {
            if container
                .remove_link(link.link_type, link.start_resource_id, link.end_resource_id)
                .await?
            {
                removed += 1;
            }
        }
        Ok(StepOutput::new(json!({ "unlinked": removed }), shared))
    }
}

#[derive(Debug, Default)]
pub struct ExpungeResourcePostStep;

#[async_trait]
impl Step for ExpungeResourcePostStep {
    fn name(&self) -> &str {
        steps::EXPUNGE_RESOURCE_POST_STEP
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        step_id: &str,
        shared: SharedParams,
        _args: &[Value],
    ) -> Result<StepOutput> {
        let id = resource_id(step_id, &shared)?;
        if shared.flag(params::ALREADY_EXPUNGED) {
            return Ok(StepOutput::new(json!({ "resource_id": id, "state": ResourceState::Expunged }), shared));
        }
        let resource = ctx
            .container()
            .expunge_resource(id, Some("delete complete"))
            .await?;
        Ok(StepOutput::new(json!({ "resource_id": id, "state": resource.state }), shared))
    }
}

fn action_of(step_id: &str, shared: &SharedParams, args: &[Value]) -> Result<ResourceAction> {
    let name = match args.first().and_then(Value::as_str) {
        Some(name) => name.to_string(),
        None => shared.require::<String>(step_id, params::ACTION)?,
    };
    name.parse::<ResourceAction>()
        .map_err(OrchestratorError::validation)
}

pub struct ActionPreStep {
    services: Arc<WorkflowServices>,
}

impl ActionPreStep {
    pub fn new(services: Arc<WorkflowServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for ActionPreStep {
    fn name(&self) -> &str {
        steps::ACTION_PRE_STEP
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        step_id: &str,
        shared: SharedParams,
        args: &[Value],
    ) -> Result<StepOutput> {
        let container = ctx.container();
        let id = resource_id(step_id, &shared)?;
        let action = action_of(step_id, &shared, args)?;
        let action_params = shared.raw(params::ACTION_PARAMS).cloned().unwrap_or_else(|| json!({}));
        let resource = container.get_simple_resource(id).await?;

        self.services
            .hooks
            .pre_action(container, &resource, action, &action_params)
            .await?;
        if resource.state == ResourceState::Active {
            let reason = format!("action {action}");
            container
                .update_resource_state(id, ResourceState::Updating, Some(&reason))
                .await?;
        }
        Ok(StepOutput::params(shared))
    }
}

/// Fires a remote action and waits for its target status.
///
/// The invocation is recorded in the persisted params right after the
/// platform accepts it; a resumed task only polls.
pub struct RemoteActionStep {
    services: Arc<WorkflowServices>,
}

impl RemoteActionStep {
    pub fn new(services: Arc<WorkflowServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Step for RemoteActionStep {
    fn name(&self) -> &str {
        steps::REMOTE_ACTION_STEP
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        step_id: &str,
        mut shared: SharedParams,
        args: &[Value],
    ) -> Result<StepOutput> {
        let id = resource_id(step_id, &shared)?;
        let action = action_of(step_id, &shared, args)?;
        let resource = ctx.container().get_simple_resource(id).await?;
        let action_profile = profile(resource.kind).action(action).ok_or_else(|| {
            OrchestratorError::validation(format!("{} does not support {action}", resource.kind))
        })?;
        let ext_id = resource
            .valid_ext_id()
            .ok_or_else(|| OrchestratorError::validation(format!("resource {id} has no remote entity")))?;

        let cap = capability(&self.services, ctx, resource.kind, &shared).await?;
        if shared.flag(params::ACTION_INVOKED) {
            ctx.progress(step_id, format!("{action} already invoked on {ext_id}"));
        } else {
            let action_params = shared.raw(params::ACTION_PARAMS).cloned().unwrap_or_else(|| json!({}));
            cap.invoke_action(ext_id, action, &action_params).await?;
            shared.set(params::ACTION_INVOKED, true);
            ctx.set_shared_data(&shared).await?;
        }

        let spec = PollSpec::from_config(
            format!("{} {action}", resource.kind),
            action_profile.success,
            action_profile.error,
            ctx.polling(),
        )
        .with_target(ext_id);
        let outcome = match wait_for(ctx, step_id, cap.as_ref(), ext_id, spec).await {
            Ok(outcome) => outcome,
            Err(e) => {
                mark_failed(ctx, id, &e).await;
                return Err(e);
            }
        };
        shared.set(params::REMOTE_STATUS, &outcome.status);
        Ok(StepOutput::new(
            json!({ "action": action, "status": outcome.status }),
            shared,
        ))
    }
}

#[derive(Debug, Default)]
pub struct ActionPostStep;

#[async_trait]
impl Step for ActionPostStep {
    fn name(&self) -> &str {
        steps::ACTION_POST_STEP
    }

    async fn execute(
        &self,
        ctx: &TaskContext,
        step_id: &str,
        shared: SharedParams,
        args: &[Value],
    ) -> Result<StepOutput> {
        let id = resource_id(step_id, &shared)?;
        let action = action_of(step_id, &shared, args)?;
        let resource = ctx.container().get_simple_resource(id).await?;

        let mut patch = Map::new();
        if let Some(status) = shared.get_str(params::REMOTE_STATUS) {
            patch.insert(attrib::REMOTE_STATUS.to_string(), json!(status));
        }
        if action == ResourceAction::ExtendVolume {
            if let Some(size) = shared
                .raw(params::ACTION_PARAMS)
                .and_then(|p| p.get("size"))
                .cloned()
            {
                patch.insert("size".to_string(), size);
            }
        }

        let update = ResourceUpdate {
            attrib: (!patch.is_empty()).then_some(Value::Object(patch)),
            state: (resource.state != ResourceState::Active).then_some(ResourceState::Active),
            ..Default::default()
        };
        if !update.is_empty() {
            let reason = format!("action {action} complete");
            ctx.container().update_resource(id, update, Some(&reason)).await?;
        }
        Ok(StepOutput::new(json!({ "resource_id": id, "action": action }), shared))
    }
}
