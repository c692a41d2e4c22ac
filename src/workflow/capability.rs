//! # Provisioning Capability
//!
//! The remote half of a workflow step: a per-kind view over the container's
//! platform client. Steps never talk to a [`RemotePlatformClient`] directly.
//!
//! A `401` from the platform drops the cached session for the scope and is
//! surfaced as a connection error; the next task re-authenticates.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use super::profiles::{profile, KindProfile};
use super::table::ResourceAction;
use crate::container::Container;
use crate::error::{OrchestratorError, RemoteError, Result};
use crate::logging::log_remote_operation;
use crate::models::ResourceKind;
use crate::polling::{observe, Observation};
use crate::remote::{RemoteFilter, RemotePlatformClient, RemoteSpec, StatusRecord};

/// Result of asking the platform to delete an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteDeletion {
    Requested,
    AlreadyGone,
}

#[async_trait]
pub trait ProvisioningCapability: Send + Sync {
    fn kind(&self) -> ResourceKind;

    fn profile(&self) -> &'static KindProfile {
        profile(self.kind())
    }

    /// Returns the new entity's ext_id
    async fn provision_remote(&self, spec: &RemoteSpec) -> Result<String>;

    async fn get_remote(&self, ext_id: &str) -> Result<Option<StatusRecord>>;

    /// One poll observation; raw errors are kept so the poller can tell
    /// "not found" and transient failures apart
    async fn fetch_remote_status(&self, ext_id: &str) -> std::result::Result<Observation, RemoteError>;

    async fn find_by_name(&self, name: &str, parent_ext_id: Option<&str>) -> Result<Option<StatusRecord>>;

    async fn update_remote(&self, ext_id: &str, fields: &Value) -> Result<()>;

    async fn delete_remote(&self, ext_id: &str) -> Result<RemoteDeletion>;

    async fn invoke_action(&self, ext_id: &str, action: ResourceAction, params: &Value) -> Result<()>;

    /// Entities whose remote parent is `parent_ext_id`
    async fn list_children(&self, parent_ext_id: &str) -> Result<Vec<StatusRecord>>;
}

/// Builds the capability a step needs for one kind and project scope
#[async_trait]
pub trait CapabilityFactory: Send + Sync {
    async fn capability(
        &self,
        container: &Arc<Container>,
        kind: ResourceKind,
        project: Option<&str>,
    ) -> Result<Arc<dyn ProvisioningCapability>>;
}

/// Capabilities backed by the container's cached platform sessions
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformCapabilityFactory;

#[async_trait]
impl CapabilityFactory for PlatformCapabilityFactory {
    async fn capability(
        &self,
        container: &Arc<Container>,
        kind: ResourceKind,
        project: Option<&str>,
    ) -> Result<Arc<dyn ProvisioningCapability>> {
        let client = container.get_connection(project).await?;
        Ok(Arc::new(PlatformCapability {
            kind,
            client,
            container: Arc::clone(container),
            scope: project.map(str::to_string),
        }))
    }
}

pub struct PlatformCapability {
    kind: ResourceKind,
    client: Arc<dyn RemotePlatformClient>,
    container: Arc<Container>,
    scope: Option<String>,
}

impl PlatformCapability {
    pub fn new(
        kind: ResourceKind,
        client: Arc<dyn RemotePlatformClient>,
        container: Arc<Container>,
        scope: Option<String>,
    ) -> Self {
        Self {
            kind,
            client,
            container,
            scope,
        }
    }

    fn platform(&self) -> String {
        self.client.platform().to_string()
    }

    /// Map a platform error, dropping the session on `401`
    async fn fail(&self, operation: &str, err: RemoteError) -> OrchestratorError {
        if err.is_unauthorized() {
            warn!(
                container = %self.container.name(),
                scope = ?self.scope,
                operation = %operation,
                "Session rejected by platform, invalidating"
            );
            self.container
                .connections()
                .invalidate(self.scope.as_deref())
                .await;
            return OrchestratorError::Connection {
                container: self.container.name().to_string(),
                reason: err.to_string(),
            };
        }
        OrchestratorError::remote(format!("{} {operation}", self.kind), &err)
    }
}

#[async_trait]
impl ProvisioningCapability for PlatformCapability {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn provision_remote(&self, spec: &RemoteSpec) -> Result<String> {
        match self.client.create(spec).await {
            Ok(ext_id) => {
                log_remote_operation(&self.platform(), "create", self.kind.as_str(), Some(&ext_id), "ok");
                Ok(ext_id)
            }
            Err(e) => {
                log_remote_operation(&self.platform(), "create", self.kind.as_str(), None, "error");
                Err(self.fail("create", e).await)
            }
        }
    }

    async fn get_remote(&self, ext_id: &str) -> Result<Option<StatusRecord>> {
        match self.client.get(self.kind, ext_id).await {
            Ok(record) => Ok(record),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(self.fail("get", e).await),
        }
    }

    async fn fetch_remote_status(&self, ext_id: &str) -> std::result::Result<Observation, RemoteError> {
        match self.client.get(self.kind, ext_id).await {
            Ok(record) => Ok(observe(record)),
            Err(e) => {
                if e.is_unauthorized() {
                    self.container
                        .connections()
                        .invalidate(self.scope.as_deref())
                        .await;
                }
                Err(e)
            }
        }
    }

    async fn find_by_name(&self, name: &str, parent_ext_id: Option<&str>) -> Result<Option<StatusRecord>> {
        let mut filter = RemoteFilter::kind(self.kind).with_name(name);
        if let Some(parent) = parent_ext_id {
            filter = filter.with_parent(parent);
        }
        match self.client.list(&filter).await {
            Ok(records) => Ok(records.into_iter().next()),
            Err(e) => Err(self.fail("list", e).await),
        }
    }

    async fn update_remote(&self, ext_id: &str, fields: &Value) -> Result<()> {
        let result = self.client.update(self.kind, ext_id, fields).await;
        log_remote_operation(
            &self.platform(),
            "update",
            self.kind.as_str(),
            Some(ext_id),
            if result.is_ok() { "ok" } else { "error" },
        );
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail("update", e).await),
        }
    }

    async fn delete_remote(&self, ext_id: &str) -> Result<RemoteDeletion> {
        match self.client.delete(self.kind, ext_id).await {
            Ok(()) => {
                log_remote_operation(&self.platform(), "delete", self.kind.as_str(), Some(ext_id), "ok");
                Ok(RemoteDeletion::Requested)
            }
            Err(e) if e.is_not_found() => {
                log_remote_operation(&self.platform(), "delete", self.kind.as_str(), Some(ext_id), "gone");
                Ok(RemoteDeletion::AlreadyGone)
            }
            Err(e) => Err(self.fail("delete", e).await),
        }
    }

    async fn invoke_action(&self, ext_id: &str, action: ResourceAction, params: &Value) -> Result<()> {
        let result = self
            .client
            .action(self.kind, ext_id, action.remote_name(), params)
            .await;
        log_remote_operation(
            &self.platform(),
            action.as_str(),
            self.kind.as_str(),
            Some(ext_id),
            if result.is_ok() { "ok" } else { "error" },
        );
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(action.as_str(), e).await),
        }
    }

    async fn list_children(&self, parent_ext_id: &str) -> Result<Vec<StatusRecord>> {
        let filter = RemoteFilter::default().with_parent(parent_ext_id);
        match self.client.list(&filter).await {
            Ok(records) => Ok(records),
            Err(e) => Err(self.fail("list", e).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::remote::{RemoteOp, SimulatedConnector, SimulatedPlatform};
    use crate::store::InMemoryStore;

    fn container(platform: Arc<SimulatedPlatform>) -> Arc<Container> {
        Arc::new(Container::new(
            1,
            "openstack-test",
            Arc::new(InMemoryStore::new()),
            Arc::new(SimulatedConnector::new(platform)),
            ConnectionConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_unauthorized_invalidates_session() {
        let platform = SimulatedPlatform::openstack();
        let c = container(Arc::clone(&platform));
        let cap = PlatformCapabilityFactory
            .capability(&c, ResourceKind::Volume, None)
            .await
            .unwrap();
        assert_eq!(c.connections().cached_sessions().await, 1);

        platform.fail_next(RemoteOp::Delete, None, 1, RemoteError::new("openstack", 401, "expired"));
        let err = cap.delete_remote("V1").await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Connection { .. }));
        assert_eq!(c.connections().cached_sessions().await, 0);
    }

    #[tokio::test]
    async fn test_delete_of_missing_entity_is_already_gone() {
        let platform = SimulatedPlatform::openstack();
        let c = container(Arc::clone(&platform));
        let cap = PlatformCapabilityFactory
            .capability(&c, ResourceKind::Volume, None)
            .await
            .unwrap();

        assert_eq!(cap.delete_remote("missing").await.unwrap(), RemoteDeletion::AlreadyGone);
        assert!(cap.get_remote("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_name_scopes_to_parent() {
        let platform = SimulatedPlatform::openstack();
        platform.insert(
            StatusRecord::new("S1", ResourceKind::Server)
                .with_name("web")
                .with_parent("P1")
                .with_status("ACTIVE"),
        );
        let c = container(Arc::clone(&platform));
        let cap = PlatformCapabilityFactory
            .capability(&c, ResourceKind::Server, None)
            .await
            .unwrap();

        assert_eq!(cap.find_by_name("web", Some("P1")).await.unwrap().map(|r| r.id), Some("S1".to_string()));
        assert!(cap.find_by_name("web", Some("P2")).await.unwrap().is_none());
        assert_eq!(cap.fetch_remote_status("S1").await.unwrap(), Observation::Status("active".to_string()));
    }
}
