//! In-process store guarded by a single `RwLock`.
//!
//! Each trait method takes the lock once, so every write is atomic with
//! respect to every other call.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::{ResourceStore, StoreError, StoreResult};
use crate::engine::checkpoint::{CheckpointStore, TaskCheckpoint, TaskStatus};
use crate::models::{
    is_ext_id_valid, objid, Link, LinkType, NewLink, NewResource, Resource, ResourceFilter,
    ResourceKind, ResourceTransition, ResourceUpdate,
};
use crate::state_machine::ResourceState;

#[derive(Debug, Default)]
struct Inner {
    resources: BTreeMap<i64, Resource>,
    links: BTreeMap<i64, Link>,
    transitions: Vec<ResourceTransition>,
    checkpoints: HashMap<Uuid, TaskCheckpoint>,
    next_resource_id: i64,
    next_link_id: i64,
    next_transition_id: i64,
}

impl Inner {
    fn ext_id_taken(&self, container_id: i64, ext_id: Option<&str>, except: Option<i64>) -> bool {
        let Some(ext_id) = ext_id.filter(|id| is_ext_id_valid(Some(id))) else {
            return false;
        };
        self.resources.values().any(|r| {
            Some(r.id) != except
                && r.container_id == container_id
                && !r.is_expunged()
                && r.ext_id.as_deref() == Some(ext_id)
        })
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored resources, expunged included
    pub fn resource_count(&self) -> usize {
        self.inner.read().resources.len()
    }

    pub fn link_count(&self) -> usize {
        self.inner.read().links.len()
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn insert_resource(&self, container_id: i64, new: &NewResource) -> StoreResult<Resource> {
        let mut inner = self.inner.write();

        let objid = new.objid.clone().unwrap_or_else(objid::new_segment);
        if inner.resources.values().any(|r| r.objid == objid) {
            return Err(StoreError::duplicate("objid", objid));
        }
        if inner.ext_id_taken(container_id, new.ext_id.as_deref(), None) {
            return Err(StoreError::duplicate(
                "ext_id",
                new.ext_id.as_deref().unwrap_or_default(),
            ));
        }
        if let Some(parent_id) = new.parent_id {
            if !inner.resources.contains_key(&parent_id) {
                return Err(StoreError::not_found("Resource", parent_id));
            }
        }

        inner.next_resource_id += 1;
        let now = Utc::now();
        let resource = Resource {
            id: inner.next_resource_id,
            uuid: Uuid::new_v4(),
            objid,
            name: new.name.clone(),
            desc: new.desc.clone(),
            kind: new.kind,
            container_id,
            ext_id: new.ext_id.clone(),
            state: ResourceState::Pending,
            active: new.active,
            attrib: new.attrib.clone(),
            parent_id: new.parent_id,
            tags: new.tags.clone(),
            created_at: now,
            updated_at: now,
        };
        inner.resources.insert(resource.id, resource.clone());
        Ok(resource)
    }

    async fn find_resource(&self, id: i64) -> StoreResult<Option<Resource>> {
        Ok(self.inner.read().resources.get(&id).cloned())
    }

    async fn find_by_uuid(&self, uuid: Uuid) -> StoreResult<Option<Resource>> {
        Ok(self
            .inner
            .read()
            .resources
            .values()
            .find(|r| r.uuid == uuid)
            .cloned())
    }

    async fn find_by_objid(&self, objid: &str) -> StoreResult<Option<Resource>> {
        Ok(self
            .inner
            .read()
            .resources
            .values()
            .find(|r| r.objid == objid)
            .cloned())
    }

    async fn find_by_ext_id(&self, container_id: i64, ext_id: &str) -> StoreResult<Option<Resource>> {
        Ok(self
            .inner
            .read()
            .resources
            .values()
            .find(|r| {
                r.container_id == container_id
                    && !r.is_expunged()
                    && r.ext_id.as_deref() == Some(ext_id)
            })
            .cloned())
    }

    async fn find_by_name(
        &self,
        container_id: i64,
        kind: ResourceKind,
        name: &str,
        parent_id: Option<i64>,
    ) -> StoreResult<Option<Resource>> {
        Ok(self
            .inner
            .read()
            .resources
            .values()
            .find(|r| {
                r.container_id == container_id
                    && r.kind == kind
                    && r.name == name
                    && r.parent_id == parent_id
                    && !r.is_expunged()
            })
            .cloned())
    }

    async fn list_resources(&self, filter: &ResourceFilter) -> StoreResult<Vec<Resource>> {
        Ok(self
            .inner
            .read()
            .resources
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn update_resource(
        &self,
        id: i64,
        update: &ResourceUpdate,
        expected_state: Option<ResourceState>,
        reason: Option<&str>,
    ) -> StoreResult<Resource> {
        let mut inner = self.inner.write();

        let current = inner
            .resources
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Resource", id))?;

        if let (Some(to), Some(expected)) = (update.state, expected_state) {
            if current.state != expected {
                return Err(StoreError::Conflict(format!(
                    "resource {id} is {} not {expected} (wanted {to})",
                    current.state
                )));
            }
        }

        if let Some(ext_id) = &update.ext_id {
            if inner.ext_id_taken(current.container_id, ext_id.as_deref(), Some(id)) {
                return Err(StoreError::duplicate(
                    "ext_id",
                    ext_id.as_deref().unwrap_or_default(),
                ));
            }
        }

        let mut updated = current.clone();
        update.apply_to(&mut updated);

        if updated.state != current.state {
            let sort_key = inner
                .transitions
                .iter()
                .filter(|t| t.resource_id == id)
                .count() as i32
                + 1;
            inner.next_transition_id += 1;
            let transition = ResourceTransition {
                id: inner.next_transition_id,
                resource_id: id,
                from_state: current.state,
                to_state: updated.state,
                reason: reason.map(str::to_string),
                sort_key,
                created_at: updated.updated_at,
            };
            inner.transitions.push(transition);
        }

        inner.resources.insert(id, updated.clone());
        Ok(updated)
    }

    async fn transitions(&self, resource_id: i64) -> StoreResult<Vec<ResourceTransition>> {
        let mut transitions: Vec<_> = self
            .inner
            .read()
            .transitions
            .iter()
            .filter(|t| t.resource_id == resource_id)
            .cloned()
            .collect();
        transitions.sort_by_key(|t| t.sort_key);
        Ok(transitions)
    }

    async fn insert_link(&self, new: &NewLink) -> StoreResult<Link> {
        let mut inner = self.inner.write();

        for endpoint in [new.start_resource_id, new.end_resource_id] {
            match inner.resources.get(&endpoint) {
                None => return Err(StoreError::not_found("Resource", endpoint)),
                Some(r) if r.is_expunged() => {
                    return Err(StoreError::Conflict(format!(
                        "resource {endpoint} is expunged and cannot be linked"
                    )))
                }
                Some(_) => {}
            }
        }

        let exists = inner.links.values().any(|l| {
            l.link_type == new.link_type
                && l.start_resource_id == new.start_resource_id
                && l.end_resource_id == new.end_resource_id
        });
        if exists {
            return Err(StoreError::duplicate(
                "link",
                format!(
                    "{} {} -> {}",
                    new.link_type, new.start_resource_id, new.end_resource_id
                ),
            ));
        }

        inner.next_link_id += 1;
        let link = Link {
            id: inner.next_link_id,
            link_type: new.link_type,
            start_resource_id: new.start_resource_id,
            end_resource_id: new.end_resource_id,
            attrib: new.attrib.clone(),
            created_at: Utc::now(),
        };
        inner.links.insert(link.id, link.clone());
        Ok(link)
    }

    async fn find_link(
        &self,
        link_type: LinkType,
        start_resource_id: i64,
        end_resource_id: i64,
    ) -> StoreResult<Option<Link>> {
        Ok(self
            .inner
            .read()
            .links
            .values()
            .find(|l| {
                l.link_type == link_type
                    && l.start_resource_id == start_resource_id
                    && l.end_resource_id == end_resource_id
            })
            .cloned())
    }

    async fn links_for(&self, resource_id: i64) -> StoreResult<Vec<Link>> {
        Ok(self
            .inner
            .read()
            .links
            .values()
            .filter(|l| l.touches(resource_id))
            .cloned()
            .collect())
    }

    async fn delete_link(&self, link_id: i64) -> StoreResult<bool> {
        Ok(self.inner.write().links.remove(&link_id).is_some())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStore {
    async fn save_checkpoint(&self, checkpoint: &TaskCheckpoint) -> StoreResult<()> {
        let mut checkpoint = checkpoint.clone();
        checkpoint.updated_at = Utc::now();
        self.inner
            .write()
            .checkpoints
            .insert(checkpoint.task_id, checkpoint);
        Ok(())
    }

    async fn load_checkpoint(&self, task_id: Uuid) -> StoreResult<Option<TaskCheckpoint>> {
        Ok(self.inner.read().checkpoints.get(&task_id).cloned())
    }

    async fn delete_checkpoint(&self, task_id: Uuid) -> StoreResult<bool> {
        Ok(self.inner.write().checkpoints.remove(&task_id).is_some())
    }

    async fn running_checkpoints(&self) -> StoreResult<Vec<TaskCheckpoint>> {
        let mut running: Vec<_> = self
            .inner
            .read()
            .checkpoints
            .values()
            .filter(|c| c.status == TaskStatus::Running)
            .cloned()
            .collect();
        running.sort_by_key(|c| c.updated_at);
        Ok(running)
    }
}
