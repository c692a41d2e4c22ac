//! # Resource Workflows
//!
//! Create, update, delete and action workflows for every resource kind. A
//! workflow is a step list from the [`WorkflowTable`]; the steps are generic
//! and read per-kind behavior from [`profiles`], validation from
//! [`ResourceHooks`] and remote access from a [`CapabilityFactory`].

pub mod capability;
pub mod hooks;
pub mod orchestrator;
pub mod profiles;
pub mod request;
pub mod steps;
pub mod table;

use std::sync::Arc;

use crate::engine::StepRegistry;

pub use capability::{
    CapabilityFactory, PlatformCapability, PlatformCapabilityFactory, ProvisioningCapability,
    RemoteDeletion,
};
pub use hooks::{DefaultHooks, ResourceHooks};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, WorkflowResult};
pub use profiles::{profile, ActionProfile, KindProfile};
pub use request::{CreateRequest, LinkRequest, UpdateFields};
pub use table::{Operation, ResourceAction, WorkflowTable};

/// What the generic steps are wired to
pub struct WorkflowServices {
    pub hooks: Arc<dyn ResourceHooks>,
    pub capabilities: Arc<dyn CapabilityFactory>,
    pub table: Arc<WorkflowTable>,
}

impl WorkflowServices {
    pub fn new(table: WorkflowTable) -> Self {
        Self {
            hooks: Arc::new(DefaultHooks),
            capabilities: Arc::new(PlatformCapabilityFactory),
            table: Arc::new(table),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ResourceHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Arc<dyn CapabilityFactory>) -> Self {
        self.capabilities = capabilities;
        self
    }
}

impl Default for WorkflowServices {
    fn default() -> Self {
        Self::new(WorkflowTable::standard())
    }
}

impl std::fmt::Debug for WorkflowServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowServices")
            .field("table_entries", &self.table.len())
            .finish()
    }
}

/// Register every generic step under its identifier
pub fn register_default_steps(registry: &StepRegistry, services: Arc<WorkflowServices>) {
    use steps::*;

    registry.register(Arc::new(CreateResourcePreStep::new(Arc::clone(&services))));
    registry.register(Arc::new(ProvisionDependencyStep::new(Arc::clone(&services))));
    registry.register(Arc::new(ProvisionRemoteStep::new(Arc::clone(&services))));
    registry.register(Arc::new(LinkResourcesStep));
    registry.register(Arc::new(DiscoverStackChildrenStep::new(Arc::clone(&services))));
    registry.register(Arc::new(CreateResourcePostStep));

    registry.register(Arc::new(UpdateResourcePreStep::new(Arc::clone(&services))));
    registry.register(Arc::new(UpdateRemoteStep::new(Arc::clone(&services))));
    registry.register(Arc::new(UpdateResourcePostStep));

    registry.register(Arc::new(ExpungeResourcePreStep::new(Arc::clone(&services))));
    registry.register(Arc::new(DeleteRemoteStep::new(Arc::clone(&services))));
    registry.register(Arc::new(ExpungeChildrenStep));
    registry.register(Arc::new(UnlinkResourcesStep));
    registry.register(Arc::new(ExpungeResourcePostStep));

    registry.register(Arc::new(ActionPreStep::new(Arc::clone(&services))));
    registry.register(Arc::new(RemoteActionStep::new(Arc::clone(&services))));
    registry.register(Arc::new(ActionPostStep));
}
