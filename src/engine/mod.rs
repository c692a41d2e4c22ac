//! # Task Engine
//!
//! Runs a logical resource operation as an ordered list of idempotent steps,
//! threading [`SharedParams`] from one step to the next and persisting them
//! after each, so that an interrupted task resumes where it stopped.

pub mod checkpoint;
pub mod context;
pub mod dispatcher;
pub mod events;
pub mod params;
pub mod registry;
pub mod runner;
pub mod step;

pub use checkpoint::{CheckpointStore, TaskCheckpoint, TaskStatus};
pub use context::{ProgressMessage, TaskContext};
pub use dispatcher::TaskDispatcher;
pub use events::{EngineEvent, EngineEventPublisher};
pub use params::SharedParams;
pub use registry::StepRegistry;
pub use runner::{StepSnapshot, TaskDefinition, TaskEngine, TaskEngineBuilder, TaskOutcome};
pub use step::{Step, StepDescriptor, StepOutput};
