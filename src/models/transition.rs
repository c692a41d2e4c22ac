//! Audit trail of resource state transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state_machine::ResourceState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceTransition {
    pub id: i64,
    pub resource_id: i64,
    pub from_state: ResourceState,
    pub to_state: ResourceState,
    pub reason: Option<String>,
    /// Ordering key within one resource
    pub sort_key: i32,
    pub created_at: DateTime<Utc>,
}
