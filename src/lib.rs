#![allow(clippy::doc_markdown)] // Allow technical terms like OpenStack, PostgreSQL in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Resource Orchestrator
//!
//! Task orchestration and resource reconciliation engine for cloud
//! infrastructure entities.
//!
//! ## Overview
//!
//! Infrastructure entities (OpenStack projects, servers, volumes, networks,
//! heat stacks, vSphere VMs, NSX security groups and edges, provider-level
//! VPCs, gateways and compute zones) are modeled as a tree of persisted
//! resource records. A logical operation on a resource ("create server",
//! "delete stack", "extend volume") is decomposed into an ordered list of
//! idempotent steps. Each step performs one remote side effect, polls the
//! remote platform until the change settles, and updates the local model.
//!
//! ## Architecture
//!
//! Leaf-first:
//!
//! - [`remote`] - the narrow client contract every platform wrapper offers,
//!   plus a scripted in-memory platform
//! - [`models`] and [`store`] - resource records, links, and their persistence
//! - [`container`] - one per platform connection; the only writer of the model
//! - [`engine`] - step runner with checkpointed shared params and sub-tasks
//! - [`polling`] - bounded reconcile loop used by nearly every remote step
//! - [`workflow`] - the `(kind, operation) -> steps` table and generic steps
//!
//! ## Module Organization
//!
//! - [`config`] - Layered configuration (TOML files + environment)
//! - [`constants`] - Step names, param keys, event names and defaults
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup and helpers
//! - [`state_machine`] - Resource lifecycle transitions
//! - [`sync`] - Batch reconciliation against the remote inventory
//! - [`tree`] - Read-only hierarchical view of a container
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resource_orchestrator::config::{ConnectionConfig, OrchestratorConfig};
//! use resource_orchestrator::container::Container;
//! use resource_orchestrator::models::ResourceKind;
//! use resource_orchestrator::remote::{SimulatedConnector, SimulatedPlatform};
//! use resource_orchestrator::store::InMemoryStore;
//! use resource_orchestrator::workflow::{CreateRequest, Orchestrator};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let container = Arc::new(Container::new(
//!     1,
//!     "openstack-demo",
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(SimulatedConnector::new(SimulatedPlatform::openstack())),
//!     ConnectionConfig::default(),
//! ));
//! let orchestrator = Orchestrator::builder(OrchestratorConfig::default()).build();
//!
//! let request = CreateRequest::new(ResourceKind::Volume, "data").with_attrib(json!({"size": 20}));
//! let created = orchestrator.create_resource(&container, request).await?;
//! println!("volume {} is {}", created.resource.id, created.resource.state);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod container;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod polling;
pub mod remote;
pub mod state_machine;
pub mod store;
pub mod sync;
pub mod tree;
pub mod workflow;

pub use config::{ConfigManager, OrchestratorConfig, PollingConfig};
pub use container::{Container, ContainerRegistry};
pub use engine::{
    SharedParams, Step, StepDescriptor, StepOutput, StepRegistry, TaskContext, TaskDefinition,
    TaskEngine, TaskOutcome,
};
pub use error::{OrchestratorError, RemoteError, Result};
pub use models::{Link, LinkType, NewResource, Resource, ResourceKind};
pub use polling::{poll, PollSpec};
pub use state_machine::ResourceState;
pub use sync::{SyncReport, Synchronizer};
pub use tree::{ResourceTreeBuilder, TreeNode};
pub use workflow::{CreateRequest, Operation, Orchestrator, ResourceAction, UpdateFields};
