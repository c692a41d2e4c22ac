//! # Resource Hooks
//!
//! Validation that runs in the pre-step of every workflow, before any remote
//! side effect. A hook failure fails the task with a validation error and
//! leaves the resource untouched.

use async_trait::async_trait;
use serde_json::Value;

use super::profiles::profile;
use super::table::ResourceAction;
use crate::constants::params;
use crate::container::Container;
use crate::engine::SharedParams;
use crate::error::{OrchestratorError, Result};
use crate::models::{NewResource, Resource, ResourceKind};
use crate::state_machine::ResourceState;

#[async_trait]
pub trait ResourceHooks: Send + Sync {
    async fn pre_create(&self, container: &Container, new: &NewResource) -> Result<()>;

    async fn pre_update(&self, container: &Container, resource: &Resource, fields: &Value) -> Result<()>;

    async fn pre_delete(&self, container: &Container, resource: &Resource, shared: &SharedParams) -> Result<()>;

    async fn pre_action(
        &self,
        container: &Container,
        resource: &Resource,
        action: ResourceAction,
        action_params: &Value,
    ) -> Result<()>;
}

/// Checks driven by the kind profiles
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

#[async_trait]
impl ResourceHooks for DefaultHooks {
    async fn pre_create(&self, container: &Container, new: &NewResource) -> Result<()> {
        // Adopted entities already exist remotely with whatever they have
        let adopting = new.ext_id.is_some();
        if !adopting {
            for key in profile(new.kind).required_attributes {
                if new.attrib.get(*key).map_or(true, Value::is_null) {
                    return Err(OrchestratorError::validation(format!(
                        "{} {} requires attribute {key}",
                        new.kind, new.name
                    )));
                }
            }
        }

        if let Some(size) = new.attrib.get("size").filter(|v| !v.is_null()) {
            if size.as_u64().map_or(true, |s| s == 0) {
                return Err(OrchestratorError::validation(format!(
                    "{} size must be a positive integer, got {size}",
                    new.kind
                )));
            }
        }

        if new.kind == ResourceKind::Server {
            let has_image = new.attrib.get("image").is_some_and(|v| !v.is_null());
            let has_boot_volume = new.attrib.get("boot_volume").is_some_and(|v| !v.is_null());
            if has_image && has_boot_volume {
                return Err(OrchestratorError::validation(
                    "server takes either image or boot_volume, not both",
                ));
            }
        }

        if let Some(parent_id) = new.parent_id {
            let parent = container.get_simple_resource(parent_id).await?;
            if parent.state == ResourceState::Deleting {
                return Err(OrchestratorError::validation(format!(
                    "parent {parent_id} is {}",
                    parent.state
                )));
            }
        }
        Ok(())
    }

    async fn pre_update(&self, _container: &Container, resource: &Resource, fields: &Value) -> Result<()> {
        if !matches!(
            resource.state,
            ResourceState::Active | ResourceState::Error | ResourceState::Updating
        ) {
            return Err(OrchestratorError::validation(format!(
                "resource {} is {} and cannot be updated",
                resource.id, resource.state
            )));
        }
        if !fields.is_object() {
            return Err(OrchestratorError::validation("update fields must be an object"));
        }
        if resource.kind == ResourceKind::Volume
            && fields
                .get(params::ATTRIB)
                .and_then(|a| a.get("size"))
                .is_some()
        {
            return Err(OrchestratorError::validation(
                "volume size changes through the extend_volume action",
            ));
        }
        Ok(())
    }

    async fn pre_delete(&self, container: &Container, resource: &Resource, shared: &SharedParams) -> Result<()> {
        if matches!(resource.state, ResourceState::Deleting) {
            return Ok(());
        }
        // The parent delete removes everything below it
        if shared.flag(params::CASCADE) {
            return Ok(());
        }

        let kind_profile = profile(resource.kind);
        if !kind_profile.owns_children {
            let children = container.children(resource.id).await?;
            if !children.is_empty() {
                return Err(OrchestratorError::validation(format!(
                    "resource {} still has {} live children",
                    resource.id,
                    children.len()
                )));
            }
        }

        for link in container.links(resource.id).await? {
            if link.end_resource_id != resource.id
                || !kind_profile.blocking_links.contains(&link.link_type)
            {
                continue;
            }
            let holder = container.get_simple_resource(link.start_resource_id).await?;
            if !holder.is_expunged() {
                return Err(OrchestratorError::validation(format!(
                    "resource {} is still used by {} {} through a {} link",
                    resource.id, holder.kind, holder.id, link.link_type
                )));
            }
        }
        Ok(())
    }

    async fn pre_action(
        &self,
        _container: &Container,
        resource: &Resource,
        action: ResourceAction,
        action_params: &Value,
    ) -> Result<()> {
        if !profile(resource.kind).supports(action) {
            return Err(OrchestratorError::validation(format!(
                "{} does not support {action}",
                resource.kind
            )));
        }
        if !matches!(resource.state, ResourceState::Active | ResourceState::Updating) {
            return Err(OrchestratorError::validation(format!(
                "{action} requires an ACTIVE resource, {} is {}",
                resource.id, resource.state
            )));
        }
        if resource.valid_ext_id().is_none() {
            return Err(OrchestratorError::validation(format!(
                "resource {} has no remote entity",
                resource.id
            )));
        }

        if action == ResourceAction::ExtendVolume {
            let current = resource.attr_u64("size").unwrap_or(0);
            let requested = action_params
                .get("size")
                .and_then(Value::as_u64)
                .ok_or_else(|| OrchestratorError::validation("extend_volume requires a size"))?;
            if requested <= current {
                return Err(OrchestratorError::validation(format!(
                    "new size {requested} must exceed current size {current}"
                )));
            }
        }
        Ok(())
    }
}
