//! Shared setup for integration tests: a simulated OpenStack platform, an
//! in-memory store doubling as checkpoint store, and fast polling.

#![allow(dead_code)]

use serde_json::json;
use std::sync::Arc;

use resource_orchestrator::config::{ConnectionConfig, OrchestratorConfig};
use resource_orchestrator::container::Container;
use resource_orchestrator::models::{NewResource, Resource, ResourceKind};
use resource_orchestrator::remote::{SimulatedConnector, SimulatedPlatform};
use resource_orchestrator::state_machine::ResourceState;
use resource_orchestrator::store::InMemoryStore;
use resource_orchestrator::workflow::{CreateRequest, Orchestrator};

pub struct TestHarness {
    pub platform: Arc<SimulatedPlatform>,
    pub store: Arc<InMemoryStore>,
    pub container: Arc<Container>,
    pub orchestrator: Orchestrator,
}

/// Polling that settles within milliseconds
pub fn fast_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.polling.interval_ms = 1;
    config.polling.max_interval_ms = 5;
    config.polling.max_attempts = 20;
    config
}

pub fn harness() -> TestHarness {
    harness_with(fast_config())
}

pub fn harness_with(config: OrchestratorConfig) -> TestHarness {
    let platform = SimulatedPlatform::openstack();
    let store = Arc::new(InMemoryStore::new());
    let container = Arc::new(Container::new(
        1,
        "openstack-it",
        store.clone(),
        Arc::new(SimulatedConnector::new(Arc::clone(&platform))),
        ConnectionConfig::default(),
    ));
    let orchestrator = Orchestrator::builder(config)
        .checkpoint_store(store.clone())
        .build();
    TestHarness {
        platform,
        store,
        container,
        orchestrator,
    }
}

impl TestHarness {
    pub async fn create_volume(&self, name: &str, size: u64) -> Resource {
        self.orchestrator
            .create_resource(
                &self.container,
                CreateRequest::new(ResourceKind::Volume, name).with_attrib(json!({ "size": size })),
            )
            .await
            .expect("volume create")
            .resource
    }

    pub async fn create_server(&self, name: &str) -> Resource {
        self.orchestrator
            .create_resource(
                &self.container,
                CreateRequest::new(ResourceKind::Server, name).with_attrib(json!({ "flavor": "m1.small" })),
            )
            .await
            .expect("server create")
            .resource
    }

    pub async fn reload(&self, id: i64) -> Resource {
        self.container.get_simple_resource(id).await.expect("resource")
    }
}

/// Record an ACTIVE resource directly, bypassing workflows
pub async fn seed_active(container: &Container, new: NewResource) -> Resource {
    let resource = container.add_resource(new).await.expect("add resource");
    container
        .update_resource_state(resource.id, ResourceState::Building, None)
        .await
        .expect("building");
    container
        .update_resource_state(resource.id, ResourceState::Active, None)
        .await
        .expect("active")
}
