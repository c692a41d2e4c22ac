//! Registry of live containers, addressed by id or name.
//!
//! Owned by whoever wires the orchestrator together and passed down
//! explicitly; there is no process-wide instance.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

use super::Container;
use crate::error::{OrchestratorError, Result};
use crate::models::Platform;

#[derive(Debug, Default)]
pub struct ContainerRegistry {
    by_id: DashMap<i64, Arc<Container>>,
    names: DashMap<String, i64>,
}

impl ContainerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a container; ids and names must be unique
    pub fn register(&self, container: Arc<Container>) -> Result<()> {
        if self.by_id.contains_key(&container.id()) {
            return Err(OrchestratorError::validation(format!(
                "container id {} is already registered",
                container.id()
            )));
        }
        if self.names.contains_key(container.name()) {
            return Err(OrchestratorError::validation(format!(
                "container name {} is already registered",
                container.name()
            )));
        }

        info!(
            container_id = container.id(),
            name = %container.name(),
            platform = %container.platform(),
            "Container registered"
        );
        self.names.insert(container.name().to_string(), container.id());
        self.by_id.insert(container.id(), container);
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Arc<Container>> {
        self.by_id
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| OrchestratorError::not_found("Container", id))
    }

    pub fn get_by_name(&self, name: &str) -> Result<Arc<Container>> {
        let id = self
            .names
            .get(name)
            .map(|entry| *entry.value())
            .ok_or_else(|| OrchestratorError::not_found("Container", name))?;
        self.get(id)
    }

    pub fn remove(&self, id: i64) -> Option<Arc<Container>> {
        let (_, container) = self.by_id.remove(&id)?;
        self.names.remove(container.name());
        Some(container)
    }

    /// Containers of one platform, ordered by id
    pub fn by_platform(&self, platform: Platform) -> Vec<Arc<Container>> {
        let mut containers: Vec<_> = self
            .by_id
            .iter()
            .filter(|entry| entry.value().platform() == platform)
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        containers.sort_by_key(|c| c.id());
        containers
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
