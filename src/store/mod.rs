//! # Resource Store
//!
//! Persistence for resources, links, state transitions and task checkpoints.
//! Every method is one atomic write or one consistent read; callers never see
//! a half-applied update.
//!
//! Two implementations ship with the crate: [`InMemoryStore`] for tests and
//! single-process use, and [`PgStore`] backed by Postgres.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Link, LinkType, NewLink, NewResource, Resource, ResourceFilter, ResourceKind,
    ResourceTransition, ResourceUpdate,
};
use crate::state_machine::ResourceState;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    /// Optimistic check failed; another writer got there first
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Duplicate {field}: {value}")]
    Duplicate { field: String, value: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn duplicate(field: &str, value: impl ToString) -> Self {
        Self::Duplicate {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(error: serde_json::Error) -> Self {
        StoreError::Serialization(error.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Insert a new `Pending` resource. `objid` must be set by the caller.
    async fn insert_resource(&self, container_id: i64, new: &NewResource) -> StoreResult<Resource>;

    async fn find_resource(&self, id: i64) -> StoreResult<Option<Resource>>;

    async fn get_resource(&self, id: i64) -> StoreResult<Resource> {
        self.find_resource(id)
            .await?
            .ok_or_else(|| StoreError::not_found("Resource", id))
    }

    async fn find_by_uuid(&self, uuid: Uuid) -> StoreResult<Option<Resource>>;

    async fn find_by_objid(&self, objid: &str) -> StoreResult<Option<Resource>>;

    /// Non-expunged resource of `container_id` whose ext_id is `ext_id`
    async fn find_by_ext_id(&self, container_id: i64, ext_id: &str) -> StoreResult<Option<Resource>>;

    /// Non-expunged resource with this name, kind and parent
    async fn find_by_name(
        &self,
        container_id: i64,
        kind: ResourceKind,
        name: &str,
        parent_id: Option<i64>,
    ) -> StoreResult<Option<Resource>>;

    /// Matching resources ordered by id
    async fn list_resources(&self, filter: &ResourceFilter) -> StoreResult<Vec<Resource>>;

    /// Apply `update` atomically.
    ///
    /// When `update.state` is set and `expected_state` is given, the write only
    /// happens if the stored state still equals `expected_state`; otherwise
    /// [`StoreError::Conflict`]. A state change also appends a transition record.
    /// Transition legality is the caller's concern.
    async fn update_resource(
        &self,
        id: i64,
        update: &ResourceUpdate,
        expected_state: Option<ResourceState>,
        reason: Option<&str>,
    ) -> StoreResult<Resource>;

    /// Compare-and-set on `state` alone
    async fn transition_resource(
        &self,
        id: i64,
        expected: ResourceState,
        to: ResourceState,
        reason: Option<&str>,
    ) -> StoreResult<Resource> {
        let update = ResourceUpdate {
            state: Some(to),
            ..Default::default()
        };
        self.update_resource(id, &update, Some(expected), reason).await
    }

    /// Transition history ordered by `sort_key`
    async fn transitions(&self, resource_id: i64) -> StoreResult<Vec<ResourceTransition>>;

    async fn insert_link(&self, new: &NewLink) -> StoreResult<Link>;

    async fn find_link(
        &self,
        link_type: LinkType,
        start_resource_id: i64,
        end_resource_id: i64,
    ) -> StoreResult<Option<Link>>;

    /// Links with `resource_id` at either end, ordered by id
    async fn links_for(&self, resource_id: i64) -> StoreResult<Vec<Link>>;

    /// Returns whether a link was removed
    async fn delete_link(&self, link_id: i64) -> StoreResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        assert_eq!(StoreError::not_found("Resource", 7).to_string(), "Resource 7 not found");
        assert_eq!(
            StoreError::duplicate("ext_id", "V1").to_string(),
            "Duplicate ext_id: V1"
        );
    }
}
