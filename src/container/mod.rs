//! # Container
//!
//! One container per remote platform connection. It owns the session cache
//! for that platform and is the only path through which steps read and
//! write the resource model: every state change goes through
//! [`Container::update_resource`] or [`Container::update_resource_state`],
//! which check the transition table before the store's atomic write.

pub mod connection;
pub mod registry;

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::constants::events;
use crate::engine::events::EngineEventPublisher;
use crate::error::{OrchestratorError, Result};
use crate::models::{
    is_ext_id_valid, objid, Link, LinkType, NewLink, NewResource, Platform, Resource,
    ResourceFilter, ResourceKind, ResourceTransition, ResourceUpdate,
};
use crate::remote::{PlatformConnector, RemotePlatformClient};
use crate::state_machine::{validate_transition, ResourceState, StateMachineError};
use crate::store::ResourceStore;

pub use connection::ConnectionManager;
pub use registry::ContainerRegistry;

/// A resource with its links and live children resolved
#[derive(Debug, Clone, Serialize)]
pub struct ResourceDetail {
    pub resource: Resource,
    pub links: Vec<Link>,
    pub children: Vec<Resource>,
}

pub struct Container {
    id: i64,
    name: String,
    platform: Platform,
    store: Arc<dyn ResourceStore>,
    connections: ConnectionManager,
    events: Option<EngineEventPublisher>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("platform", &self.platform)
            .finish()
    }
}

impl Container {
    pub fn new(
        id: i64,
        name: impl Into<String>,
        store: Arc<dyn ResourceStore>,
        connector: Arc<dyn PlatformConnector>,
        config: ConnectionConfig,
    ) -> Self {
        let name = name.into();
        let platform = connector.platform();
        Self {
            id,
            connections: ConnectionManager::new(name.clone(), connector, config),
            name,
            platform,
            store,
            events: None,
        }
    }

    /// Publish `resource.state_changed` for every state write
    pub fn with_event_publisher(mut self, publisher: EngineEventPublisher) -> Self {
        self.events = Some(publisher);
        self
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.store
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    /// Ready-to-use remote client for `project` scope
    pub async fn get_connection(&self, project: Option<&str>) -> Result<Arc<dyn RemotePlatformClient>> {
        self.connections.get_connection(project).await
    }

    /// Resource with links and live children
    pub async fn get_resource(&self, id: i64) -> Result<ResourceDetail> {
        let resource = self.get_simple_resource(id).await?;
        let links = self.store.links_for(id).await?;
        let children = self.children(id).await?;
        Ok(ResourceDetail {
            resource,
            links,
            children,
        })
    }

    /// Bare resource record, scoped to this container
    pub async fn get_simple_resource(&self, id: i64) -> Result<Resource> {
        match self.store.find_resource(id).await? {
            Some(resource) if resource.container_id == self.id => Ok(resource),
            _ => Err(OrchestratorError::not_found("Resource", id)),
        }
    }

    pub async fn find_resource_by_extid(&self, ext_id: &str) -> Result<Option<Resource>> {
        if !is_ext_id_valid(Some(ext_id)) {
            return Ok(None);
        }
        Ok(self.store.find_by_ext_id(self.id, ext_id).await?)
    }

    /// Reverse lookup from a remote identifier
    pub async fn get_resource_by_extid(&self, ext_id: &str) -> Result<Resource> {
        self.find_resource_by_extid(ext_id)
            .await?
            .ok_or_else(|| OrchestratorError::not_found("Resource with ext_id", ext_id))
    }

    pub async fn find_resource_by_name(
        &self,
        kind: ResourceKind,
        name: &str,
        parent_id: Option<i64>,
    ) -> Result<Option<Resource>> {
        Ok(self.store.find_by_name(self.id, kind, name, parent_id).await?)
    }

    /// Resources of this container; the filter's container is overridden
    pub async fn list_resources(&self, filter: ResourceFilter) -> Result<Vec<Resource>> {
        let filter = ResourceFilter {
            container_id: Some(self.id),
            ..filter
        };
        Ok(self.store.list_resources(&filter).await?)
    }

    /// Non-expunged children of `id`
    pub async fn children(&self, id: i64) -> Result<Vec<Resource>> {
        self.list_resources(ResourceFilter::default().with_parent(id))
            .await
    }

    /// Record a new resource in `Pending`.
    ///
    /// The objid is derived from the parent's objid unless given. A valid
    /// ext_id must not already be used by a live resource of this container.
    pub async fn add_resource(&self, mut new: NewResource) -> Result<Resource> {
        if new.name.trim().is_empty() {
            return Err(OrchestratorError::validation("resource name must not be empty"));
        }

        let parent_objid = match new.parent_id {
            Some(parent_id) => {
                let parent = self.get_simple_resource(parent_id).await?;
                if parent.is_expunged() {
                    return Err(OrchestratorError::validation(format!(
                        "parent {parent_id} is expunged"
                    )));
                }
                Some(parent.objid)
            }
            None => None,
        };
        if new.objid.is_none() {
            new.objid = Some(objid::child_of(parent_objid.as_deref(), &objid::new_segment()));
        }

        if let Some(ext_id) = new.ext_id.as_deref().filter(|id| is_ext_id_valid(Some(id))) {
            if let Some(existing) = self.find_resource_by_extid(ext_id).await? {
                return Err(OrchestratorError::validation(format!(
                    "ext_id {ext_id} already belongs to resource {}",
                    existing.id
                )));
            }
        }

        let resource = self.store.insert_resource(self.id, &new).await?;
        info!(
            container = %self.name,
            resource_id = resource.id,
            kind = %resource.kind,
            objid = %resource.objid,
            "Resource recorded"
        );
        Ok(resource)
    }

    /// Atomic partial update; a state change is validated first
    pub async fn update_resource(
        &self,
        id: i64,
        update: ResourceUpdate,
        reason: Option<&str>,
    ) -> Result<Resource> {
        let current = self.get_simple_resource(id).await?;
        if current.is_expunged() {
            return Err(StateMachineError::Expunged {
                resource_id: id,
                to: update.state.unwrap_or(ResourceState::Expunged),
            }
            .into());
        }

        if let Some(ext_id) = update.ext_id.as_ref().and_then(|e| e.as_deref()) {
            if is_ext_id_valid(Some(ext_id)) {
                if let Some(other) = self.find_resource_by_extid(ext_id).await? {
                    if other.id != id {
                        return Err(OrchestratorError::validation(format!(
                            "ext_id {ext_id} already belongs to resource {}",
                            other.id
                        )));
                    }
                }
            }
        }

        let expected = match update.state {
            Some(to) => {
                validate_transition(id, current.state, to)?;
                Some(current.state)
            }
            None => None,
        };

        let updated = self
            .store
            .update_resource(id, &update, expected, reason)
            .await?;

        if updated.state != current.state {
            debug!(
                resource_id = id,
                from = %current.state,
                to = %updated.state,
                reason = reason,
                "Resource state changed"
            );
            if let Some(publisher) = &self.events {
                publisher.publish(
                    events::RESOURCE_STATE_CHANGED,
                    serde_json::json!({
                        "resource_id": id,
                        "from": current.state,
                        "to": updated.state,
                        "reason": reason,
                    }),
                );
            }
        }
        Ok(updated)
    }

    pub async fn update_resource_state(
        &self,
        id: i64,
        state: ResourceState,
        reason: Option<&str>,
    ) -> Result<Resource> {
        let update = ResourceUpdate {
            state: Some(state),
            ..Default::default()
        };
        self.update_resource(id, update, reason).await
    }

    pub async fn transitions(&self, id: i64) -> Result<Vec<ResourceTransition>> {
        self.get_simple_resource(id).await?;
        Ok(self.store.transitions(id).await?)
    }

    /// Create a link, or return the existing identical one
    pub async fn add_link(
        &self,
        link_type: LinkType,
        start_resource_id: i64,
        end_resource_id: i64,
        attrib: Value,
    ) -> Result<Link> {
        for endpoint in [start_resource_id, end_resource_id] {
            let resource = self.get_simple_resource(endpoint).await?;
            if resource.is_expunged() {
                return Err(OrchestratorError::validation(format!(
                    "resource {endpoint} is expunged and cannot be linked"
                )));
            }
        }

        if let Some(existing) = self
            .store
            .find_link(link_type, start_resource_id, end_resource_id)
            .await?
        {
            return Ok(existing);
        }

        let mut new = NewLink::new(link_type, start_resource_id, end_resource_id);
        if !attrib.is_null() {
            new.attrib = attrib;
        }
        Ok(self.store.insert_link(&new).await?)
    }

    /// Returns whether the link existed
    pub async fn remove_link(
        &self,
        link_type: LinkType,
        start_resource_id: i64,
        end_resource_id: i64,
    ) -> Result<bool> {
        match self
            .store
            .find_link(link_type, start_resource_id, end_resource_id)
            .await?
        {
            Some(link) => Ok(self.store.delete_link(link.id).await?),
            None => Ok(false),
        }
    }

    pub async fn links(&self, id: i64) -> Result<Vec<Link>> {
        Ok(self.store.links_for(id).await?)
    }

    /// Final removal of a resource from the live model.
    ///
    /// Refuses while live children remain. Every link touching the resource is
    /// removed, then the record moves to `Expunged` with `active=false` and no
    /// ext_id in one write. Expunging an already expunged resource is a no-op.
    pub async fn expunge_resource(&self, id: i64, reason: Option<&str>) -> Result<Resource> {
        let current = self.get_simple_resource(id).await?;
        if current.is_expunged() {
            return Ok(current);
        }

        let children = self.children(id).await?;
        if !children.is_empty() {
            let ids: Vec<String> = children.iter().map(|c| c.id.to_string()).collect();
            return Err(OrchestratorError::validation(format!(
                "resource {id} still has live children: {}",
                ids.join(", ")
            )));
        }
        validate_transition(id, current.state, ResourceState::Expunged)?;

        for link in self.store.links_for(id).await? {
            self.store.delete_link(link.id).await?;
        }

        let update = ResourceUpdate {
            state: Some(ResourceState::Expunged),
            active: Some(false),
            ext_id: Some(None),
            ..Default::default()
        };
        self.update_resource(id, update, reason).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{SimulatedConnector, SimulatedPlatform};
    use crate::store::InMemoryStore;
    use serde_json::json;

    fn container() -> Container {
        Container::new(
            1,
            "openstack-test",
            Arc::new(InMemoryStore::new()),
            Arc::new(SimulatedConnector::new(SimulatedPlatform::openstack())),
            ConnectionConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_objid_encodes_ancestry() {
        let c = container();
        let project = c
            .add_resource(NewResource::new("proj", ResourceKind::Project))
            .await
            .unwrap();
        let server = c
            .add_resource(NewResource::new("srv", ResourceKind::Server).with_parent(project.id))
            .await
            .unwrap();

        assert!(objid::is_ancestor(&project.objid, &server.objid));
        let detail = c.get_resource(project.id).await.unwrap();
        assert_eq!(detail.children.len(), 1);
    }

    #[tokio::test]
    async fn test_state_changes_are_validated() {
        let c = container();
        let vol = c
            .add_resource(NewResource::new("vol", ResourceKind::Volume))
            .await
            .unwrap();

        let err = c
            .update_resource_state(vol.id, ResourceState::Active, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "state_transition");

        c.update_resource_state(vol.id, ResourceState::Building, Some("create"))
            .await
            .unwrap();
        let active = c
            .update_resource_state(vol.id, ResourceState::Active, None)
            .await
            .unwrap();
        assert_eq!(active.state, ResourceState::Active);
        assert_eq!(c.transitions(vol.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ext_id_lookup_and_uniqueness() {
        let c = container();
        let vol = c
            .add_resource(NewResource::new("vol", ResourceKind::Volume).with_ext_id("V1"))
            .await
            .unwrap();
        assert_eq!(c.get_resource_by_extid("V1").await.unwrap().id, vol.id);
        assert!(c.get_resource_by_extid("V2").await.unwrap_err().is_not_found());

        let err = c
            .add_resource(NewResource::new("other", ResourceKind::Volume).with_ext_id("V1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_expunge_cascades_links_and_closes_state() {
        let c = container();
        let server = c
            .add_resource(NewResource::new("srv", ResourceKind::Server))
            .await
            .unwrap();
        let vol = c
            .add_resource(NewResource::new("vol", ResourceKind::Volume).with_ext_id("V1"))
            .await
            .unwrap();
        c.add_link(LinkType::Volume, server.id, vol.id, Value::Null)
            .await
            .unwrap();
        // Idempotent
        c.add_link(LinkType::Volume, server.id, vol.id, json!({"device": "/dev/vdb"}))
            .await
            .unwrap();
        assert_eq!(c.links(vol.id).await.unwrap().len(), 1);

        c.update_resource_state(vol.id, ResourceState::Deleting, None)
            .await
            .unwrap();
        let gone = c.expunge_resource(vol.id, Some("deleted")).await.unwrap();

        assert_eq!(gone.state, ResourceState::Expunged);
        assert!(!gone.active);
        assert!(gone.ext_id.is_none());
        assert!(c.links(server.id).await.unwrap().is_empty());

        let err = c
            .update_resource_state(vol.id, ResourceState::Active, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "state_transition");
        assert!(c
            .add_link(LinkType::Volume, server.id, vol.id, Value::Null)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_expunge_blocked_by_live_children() {
        let c = container();
        let project = c
            .add_resource(NewResource::new("proj", ResourceKind::Project))
            .await
            .unwrap();
        c.add_resource(NewResource::new("sg", ResourceKind::SecurityGroup).with_parent(project.id))
            .await
            .unwrap();

        let err = c.expunge_resource(project.id, None).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_other_container_resources_are_invisible() {
        let store: Arc<dyn ResourceStore> = Arc::new(InMemoryStore::new());
        let connector = Arc::new(SimulatedConnector::new(SimulatedPlatform::openstack()));
        let a = Container::new(1, "a", store.clone(), connector.clone(), ConnectionConfig::default());
        let b = Container::new(2, "b", store, connector, ConnectionConfig::default());

        let vol = a
            .add_resource(NewResource::new("vol", ResourceKind::Volume))
            .await
            .unwrap();
        assert!(b.get_simple_resource(vol.id).await.unwrap_err().is_not_found());
    }
}
