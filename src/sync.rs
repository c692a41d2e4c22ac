//! # Synchronize / Discover
//!
//! Batch reconciliation of one kind's local records against the live remote
//! inventory. [`Synchronizer::discover`] only reads; [`Synchronizer::synchronize`]
//! applies a report through the container, so every state write still goes
//! through the transition table.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::constants::attrib;
use crate::container::Container;
use crate::error::{OrchestratorError, Result};
use crate::models::{NewResource, Resource, ResourceFilter, ResourceKind, ResourceUpdate};
use crate::remote::{RemoteFilter, StatusRecord};
use crate::state_machine::ResourceState;

/// A local record whose remote counterpart no longer matches it
#[derive(Debug, Clone, Serialize)]
pub struct ChangedResource {
    pub resource_id: i64,
    pub record: StatusRecord,
}

/// Differences between the local model and the remote inventory for one kind
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// Remote entities with no local record
    pub new: Vec<StatusRecord>,
    /// Local resources whose remote entity is gone
    pub died: Vec<i64>,
    pub changed: Vec<ChangedResource>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.died.is_empty() && self.changed.is_empty()
    }
}

/// What [`Synchronizer::synchronize`] actually wrote
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub registered: Vec<i64>,
    pub marked_error: Vec<i64>,
    pub refreshed: Vec<i64>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Synchronizer;

impl Synchronizer {
    pub fn new() -> Self {
        Self
    }

    pub async fn discover(&self, container: &Container, kind: ResourceKind) -> Result<SyncReport> {
        let client = container.get_connection(None).await?;
        let remote = client
            .list(&RemoteFilter::kind(kind))
            .await
            .map_err(|e| OrchestratorError::remote(format!("{kind} list"), &e))?;
        let local = container
            .list_resources(ResourceFilter::default().with_kind(kind))
            .await?;

        let report = diff(&local, remote);
        info!(
            container = %container.name(),
            kind = %kind,
            new = report.new.len(),
            died = report.died.len(),
            changed = report.changed.len(),
            "Discovery completed"
        );
        Ok(report)
    }

    pub async fn synchronize(&self, container: &Container, report: &SyncReport) -> Result<SyncSummary> {
        let mut summary = SyncSummary::default();

        for record in &report.new {
            // Another pass may have registered it meanwhile
            if container.find_resource_by_extid(&record.id).await?.is_some() {
                continue;
            }
            let resource = register(container, record).await?;
            summary.registered.push(resource.id);
        }

        for &id in &report.died {
            let resource = container.get_simple_resource(id).await?;
            if resource.is_expunged() {
                continue;
            }
            let update = ResourceUpdate {
                state: Some(ResourceState::Error),
                active: Some(false),
                ..Default::default()
            };
            container
                .update_resource(id, update, Some("remote entity disappeared"))
                .await?;
            warn!(resource_id = id, ext_id = ?resource.ext_id, "Remote entity gone, resource marked ERROR");
            summary.marked_error.push(id);
        }

        for changed in &report.changed {
            let update = ResourceUpdate {
                name: changed.record.name.clone(),
                attrib: Some(observed_attrib(&changed.record)),
                ..Default::default()
            };
            container
                .update_resource(changed.resource_id, update, Some("synchronized"))
                .await?;
            debug!(resource_id = changed.resource_id, ext_id = %changed.record.id, "Resource refreshed");
            summary.refreshed.push(changed.resource_id);
        }

        Ok(summary)
    }

    /// Discover and apply in one go
    pub async fn run(&self, container: &Container, kind: ResourceKind) -> Result<SyncSummary> {
        let report = self.discover(container, kind).await?;
        self.synchronize(container, &report).await
    }
}

fn diff(local: &[Resource], remote: Vec<StatusRecord>) -> SyncReport {
    let mut remote: HashMap<String, StatusRecord> =
        remote.into_iter().map(|r| (r.id.clone(), r)).collect();
    let mut report = SyncReport::default();

    for resource in local {
        let Some(ext_id) = resource.valid_ext_id() else {
            continue;
        };
        match remote.remove(ext_id) {
            None => {
                // A running workflow owns the remote side of in-flight records
                let settled = !resource.state.is_transient() && resource.state != ResourceState::Pending;
                let already_dead = resource.state == ResourceState::Error && !resource.active;
                if settled && !already_dead {
                    report.died.push(resource.id);
                }
            }
            Some(record) if differs(resource, &record) => report.changed.push(ChangedResource {
                resource_id: resource.id,
                record,
            }),
            Some(_) => {}
        }
    }

    let mut new: Vec<StatusRecord> = remote.into_values().collect();
    new.sort_by(|a, b| a.id.cmp(&b.id));
    report.new = new;
    report
}

fn differs(resource: &Resource, record: &StatusRecord) -> bool {
    let renamed = record
        .name
        .as_deref()
        .is_some_and(|name| name != resource.name);
    let restatused = record
        .normalized_status()
        .is_some_and(|status| resource.attr_str(attrib::REMOTE_STATUS) != Some(status.as_str()));
    renamed || restatused
}

fn observed_attrib(record: &StatusRecord) -> Value {
    let mut patch = match &record.attributes {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Some(status) = record.normalized_status() {
        patch.insert(attrib::REMOTE_STATUS.to_string(), Value::String(status));
    }
    Value::Object(patch)
}

async fn register(container: &Container, record: &StatusRecord) -> Result<Resource> {
    let parent_id = match record.parent.as_deref() {
        Some(parent) => container.find_resource_by_extid(parent).await?.map(|p| p.id),
        None => None,
    };
    let name = record.name.clone().unwrap_or_else(|| record.id.clone());
    let mut new = NewResource::new(name, record.kind)
        .with_ext_id(&record.id)
        .with_attrib(observed_attrib(record));
    if let Some(parent_id) = parent_id {
        new = new.with_parent(parent_id);
    }

    let resource = container.add_resource(new).await?;
    container
        .update_resource_state(resource.id, ResourceState::Building, Some("discovered"))
        .await?;
    let update = ResourceUpdate {
        state: Some(ResourceState::Active),
        active: Some(true),
        ..Default::default()
    };
    let resource = container
        .update_resource(resource.id, update, Some("discovered"))
        .await?;
    info!(resource_id = resource.id, ext_id = %record.id, kind = %record.kind, "Registered discovered resource");
    Ok(resource)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::remote::{SimulatedConnector, SimulatedPlatform};
    use crate::store::InMemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (Arc<SimulatedPlatform>, Container) {
        let platform = SimulatedPlatform::openstack();
        let container = Container::new(
            1,
            "openstack-sync",
            Arc::new(InMemoryStore::new()),
            Arc::new(SimulatedConnector::new(Arc::clone(&platform))),
            ConnectionConfig::default(),
        );
        (platform, container)
    }

    async fn active_volume(c: &Container, name: &str, ext_id: &str) -> Resource {
        let r = c
            .add_resource(
                NewResource::new(name, ResourceKind::Volume)
                    .with_ext_id(ext_id)
                    .with_attrib(json!({"size": 10, "remote_status": "available"})),
            )
            .await
            .unwrap();
        c.update_resource_state(r.id, ResourceState::Building, None).await.unwrap();
        c.update_resource_state(r.id, ResourceState::Active, None).await.unwrap()
    }

    #[tokio::test]
    async fn test_discover_classifies_new_died_and_changed() {
        let (platform, c) = setup();
        let kept = active_volume(&c, "kept", "V1").await;
        let gone = active_volume(&c, "gone", "V2").await;
        let renamed = active_volume(&c, "old-name", "V3").await;

        platform.insert(StatusRecord::new("V1", ResourceKind::Volume).with_name("kept").with_status("available"));
        platform.insert(StatusRecord::new("V3", ResourceKind::Volume).with_name("new-name").with_status("available"));
        platform.insert(StatusRecord::new("V9", ResourceKind::Volume).with_name("stray").with_status("in-use"));

        let report = Synchronizer.discover(&c, ResourceKind::Volume).await.unwrap();

        assert_eq!(report.new.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["V9"]);
        assert_eq!(report.died, vec![gone.id]);
        assert_eq!(report.changed.len(), 1);
        assert_eq!(report.changed[0].resource_id, renamed.id);
        assert!(!report.died.contains(&kept.id));
    }

    #[tokio::test]
    async fn test_in_flight_resources_are_not_died() {
        let (_platform, c) = setup();
        let r = c
            .add_resource(NewResource::new("building", ResourceKind::Volume).with_ext_id("V5"))
            .await
            .unwrap();
        c.update_resource_state(r.id, ResourceState::Building, None).await.unwrap();
        c.add_resource(NewResource::new("intent", ResourceKind::Volume)).await.unwrap();

        let report = Synchronizer.discover(&c, ResourceKind::Volume).await.unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_synchronize_applies_report() {
        let (platform, c) = setup();
        let gone = active_volume(&c, "gone", "V2").await;
        let renamed = active_volume(&c, "old-name", "V3").await;
        platform.insert(StatusRecord::new("V3", ResourceKind::Volume).with_name("new-name").with_status("in-use"));
        platform.insert(StatusRecord::new("V9", ResourceKind::Volume).with_name("stray").with_status("available"));

        let summary = Synchronizer.run(&c, ResourceKind::Volume).await.unwrap();
        assert_eq!(summary.marked_error, vec![gone.id]);
        assert_eq!(summary.refreshed, vec![renamed.id]);
        assert_eq!(summary.registered.len(), 1);

        let stray = c.find_resource_by_extid("V9").await.unwrap().unwrap();
        assert_eq!(stray.state, ResourceState::Active);
        assert_eq!(stray.name, "stray");
        assert!(stray.active);

        let gone = c.get_simple_resource(gone.id).await.unwrap();
        assert_eq!(gone.state, ResourceState::Error);
        assert!(!gone.active);

        let renamed = c.get_simple_resource(renamed.id).await.unwrap();
        assert_eq!(renamed.name, "new-name");
        assert_eq!(renamed.attr_str(attrib::REMOTE_STATUS), Some("in-use"));

        // A second pass has nothing left to do
        let report = Synchronizer.discover(&c, ResourceKind::Volume).await.unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_registered_child_attaches_to_known_parent() {
        let (platform, c) = setup();
        let project = c
            .add_resource(NewResource::new("p", ResourceKind::Project).with_ext_id("P1"))
            .await
            .unwrap();
        platform.insert(
            StatusRecord::new("N1", ResourceKind::Network)
                .with_name("net")
                .with_parent("P1"),
        );

        Synchronizer.run(&c, ResourceKind::Network).await.unwrap();
        let network = c.find_resource_by_extid("N1").await.unwrap().unwrap();
        assert_eq!(network.parent_id, Some(project.id));
        assert!(network.objid.starts_with(&project.objid));
    }
}
