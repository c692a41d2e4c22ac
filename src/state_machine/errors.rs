use thiserror::Error;

use super::states::ResourceState;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateMachineError {
    #[error("Invalid state transition for resource {resource_id} from {from} to {to}")]
    InvalidTransition {
        resource_id: i64,
        from: ResourceState,
        to: ResourceState,
    },

    #[error("Resource {resource_id} is expunged and cannot transition to {to}")]
    Expunged { resource_id: i64, to: ResourceState },

    #[error("Resource {resource_id} changed state concurrently: expected {expected}, found {found}")]
    ConcurrentModification {
        resource_id: i64,
        expected: ResourceState,
        found: ResourceState,
    },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
