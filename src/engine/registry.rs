//! Step registry: step identifiers to implementations.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use super::step::{Step, StepDescriptor};
use crate::error::{OrchestratorError, Result};

#[derive(Default)]
pub struct StepRegistry {
    steps: DashMap<String, Arc<dyn Step>>,
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("steps", &self.names())
            .finish()
    }
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the step's own name, replacing any previous entry
    pub fn register(&self, step: Arc<dyn Step>) {
        let name = step.name().to_string();
        self.register_as(name, step);
    }

    pub fn register_as(&self, step_id: impl Into<String>, step: Arc<dyn Step>) {
        let step_id = step_id.into();
        debug!(step_id = %step_id, "Step registered");
        self.steps.insert(step_id, step);
    }

    pub fn get(&self, step_id: &str) -> Result<Arc<dyn Step>> {
        self.steps
            .get(step_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| OrchestratorError::StepNotRegistered(step_id.to_string()))
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.steps.contains_key(step_id)
    }

    /// Fails on the first descriptor whose step is unknown
    pub fn ensure_registered(&self, steps: &[StepDescriptor]) -> Result<()> {
        match steps.iter().find(|d| !self.contains(d.step_id())) {
            Some(missing) => Err(OrchestratorError::StepNotRegistered(
                missing.step_id().to_string(),
            )),
            None => Ok(()),
        }
    }

    /// Registered identifiers, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.steps.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
