//! # Resource State Machine
//!
//! The transition table every resource kind shares. The container consults it
//! before any state write; nothing else in the crate writes `state`.

use super::{
    errors::{StateMachineError, StateMachineResult},
    events::ResourceEvent,
    states::ResourceState,
};

/// Whether `from -> to` is a legal move.
///
/// Same-state writes are accepted as no-ops so that re-running a step after a
/// crash converges instead of failing. Nothing leaves `Expunged`.
pub fn can_transition(from: ResourceState, to: ResourceState) -> bool {
    use ResourceState::*;

    if from == Expunged {
        return false;
    }
    if from == to {
        return true;
    }

    match (from, to) {
        (Pending, Building) => true,
        (Building, Active) => true,
        (Active, Updating) => true,
        (Updating, Active) => true,

        // Delete is reachable from every live state so a stuck build can be cleaned up
        (Pending | Building | Active | Updating | Error, Deleting) => true,
        (Deleting, Expunged) => true,

        // Records that never reached the remote side can be dropped directly
        (Pending, Expunged) => true,

        (_, Error) => true,

        // Operator re-runs after a failure
        (Error, Building | Updating | Active) => true,

        _ => false,
    }
}

pub fn validate_transition(
    resource_id: i64,
    from: ResourceState,
    to: ResourceState,
) -> StateMachineResult<()> {
    if from == ResourceState::Expunged {
        return Err(StateMachineError::Expunged { resource_id, to });
    }
    if !can_transition(from, to) {
        return Err(StateMachineError::InvalidTransition {
            resource_id,
            from,
            to,
        });
    }
    Ok(())
}

/// In-memory view of one resource's lifecycle, driven by [`ResourceEvent`]s
#[derive(Debug, Clone)]
pub struct ResourceStateMachine {
    resource_id: i64,
    current: ResourceState,
}

impl ResourceStateMachine {
    pub fn new(resource_id: i64, current: ResourceState) -> Self {
        Self {
            resource_id,
            current,
        }
    }

    pub fn resource_id(&self) -> i64 {
        self.resource_id
    }

    pub fn current_state(&self) -> ResourceState {
        self.current
    }

    /// Determine the target state for `event` without applying it
    pub fn determine_target_state(&self, event: &ResourceEvent) -> StateMachineResult<ResourceState> {
        let target = event.target_state();
        validate_transition(self.resource_id, self.current, target)?;
        Ok(target)
    }

    /// Apply `event`, returning `(from, to)`
    pub fn transition(
        &mut self,
        event: &ResourceEvent,
    ) -> StateMachineResult<(ResourceState, ResourceState)> {
        let target = self.determine_target_state(event)?;
        let from = self.current;
        self.current = target;
        Ok((from, target))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }
}
