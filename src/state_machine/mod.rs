//! Resource lifecycle states and the transition rules between them.

pub mod errors;
pub mod events;
pub mod resource_state_machine;
pub mod states;

pub use errors::{StateMachineError, StateMachineResult};
pub use events::ResourceEvent;
pub use resource_state_machine::{can_transition, validate_transition, ResourceStateMachine};
pub use states::ResourceState;
