//! # Remote Platform Client Contract
//!
//! The narrow capability every platform wrapper (OpenStack, vSphere, NSX)
//! offers the engine. The engine only ever reads `id` and `status` out of a
//! [`StatusRecord`]; everything else rides along in `attributes`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::RemoteError;
use crate::models::{Platform, ResourceKind};

/// What the remote platform reports about one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub id: String,
    pub kind: ResourceKind,
    pub name: Option<String>,
    /// `None` for kinds that have no status vocabulary
    pub status: Option<String>,
    /// ext_id of the remote parent (stack of a stack child, project of a server)
    pub parent: Option<String>,
    #[serde(default)]
    pub attributes: Value,
}

impl StatusRecord {
    pub fn new(id: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            id: id.into(),
            kind,
            name: None,
            status: None,
            parent: None,
            attributes: Value::Object(Default::default()),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Lowercased status, the form every status vocabulary is compared in
    pub fn normalized_status(&self) -> Option<String> {
        self.status.as_deref().map(str::to_ascii_lowercase)
    }
}

/// Parameters of a remote `create`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSpec {
    pub kind: ResourceKind,
    pub name: String,
    pub parent_ext_id: Option<String>,
    pub attributes: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteFilter {
    pub kind: Option<ResourceKind>,
    pub name: Option<String>,
    pub parent_ext_id: Option<String>,
}

impl RemoteFilter {
    pub fn kind(kind: ResourceKind) -> Self {
        Self {
            kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_parent(mut self, parent_ext_id: impl Into<String>) -> Self {
        self.parent_ext_id = Some(parent_ext_id.into());
        self
    }

    pub fn matches(&self, record: &StatusRecord) -> bool {
        self.kind.map_or(true, |kind| record.kind == kind)
            && self
                .name
                .as_deref()
                .map_or(true, |name| record.name.as_deref() == Some(name))
            && self
                .parent_ext_id
                .as_deref()
                .map_or(true, |parent| record.parent.as_deref() == Some(parent))
    }
}

/// One authenticated channel to a remote platform.
///
/// Errors carry an HTTP-like status code; `404` means "not found" and is the
/// only code callers may treat as a non-error.
#[async_trait]
pub trait RemotePlatformClient: Send + Sync {
    fn platform(&self) -> Platform;

    /// Returns the new entity's id
    async fn create(&self, spec: &RemoteSpec) -> Result<String, RemoteError>;

    /// `Ok(None)` when the entity does not exist
    async fn get(&self, kind: ResourceKind, ext_id: &str) -> Result<Option<StatusRecord>, RemoteError>;

    async fn update(&self, kind: ResourceKind, ext_id: &str, fields: &Value) -> Result<(), RemoteError>;

    async fn delete(&self, kind: ResourceKind, ext_id: &str) -> Result<(), RemoteError>;

    async fn list(&self, filter: &RemoteFilter) -> Result<Vec<StatusRecord>, RemoteError>;

    /// Fire a named action (`start`, `migrate`, `extend`, ...)
    async fn action(
        &self,
        kind: ResourceKind,
        ext_id: &str,
        action: &str,
        params: &Value,
    ) -> Result<(), RemoteError>;
}

/// Credential issued by a platform for one project scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionToken {
    pub value: String,
    /// Reported expiry; the configured TTL applies when absent
    pub expires_at: Option<DateTime<Utc>>,
    /// Service catalog returned alongside the token
    #[serde(default)]
    pub catalog: Value,
    pub scope: Option<String>,
}

/// Authenticates against a platform and builds clients from tokens.
///
/// Credential storage is opaque to the engine; the connector owns it.
#[async_trait]
pub trait PlatformConnector: Send + Sync {
    fn platform(&self) -> Platform;

    async fn authenticate(&self, scope: Option<&str>) -> Result<SessionToken, RemoteError>;

    fn connect(&self, token: &SessionToken) -> Arc<dyn RemotePlatformClient>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matching() {
        let record = StatusRecord::new("S1", ResourceKind::Server)
            .with_name("web")
            .with_parent("STACK1")
            .with_status("ACTIVE");

        assert!(RemoteFilter::default().matches(&record));
        assert!(RemoteFilter::kind(ResourceKind::Server).with_name("web").matches(&record));
        assert!(!RemoteFilter::kind(ResourceKind::Volume).matches(&record));
        assert!(RemoteFilter::default().with_parent("STACK1").matches(&record));
        assert!(!RemoteFilter::default().with_parent("STACK2").matches(&record));
        assert_eq!(record.normalized_status().as_deref(), Some("active"));
    }
}
