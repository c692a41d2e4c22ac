//! Error types for the resource orchestrator.
//!
//! Steps propagate these upward unchanged. The one deliberate exception is a
//! [`RemoteError`] whose status code means "not found": delete paths check
//! [`RemoteError::is_not_found`] explicitly and treat it as already cleaned up.

use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigurationError;
use crate::state_machine::errors::StateMachineError;
use crate::store::StoreError;

/// Error raised by a remote platform client call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{platform} returned {status_code}: {message}")]
pub struct RemoteError {
    pub platform: String,
    pub status_code: u16,
    pub message: String,
}

impl RemoteError {
    pub fn new(platform: impl Into<String>, status_code: u16, message: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            status_code,
            message: message.into(),
        }
    }

    pub fn not_found(platform: impl Into<String>, what: impl Into<String>) -> Self {
        Self::new(platform, 404, format!("{} not found", what.into()))
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code == 404
    }

    /// 5xx, 408 and 429 are worth retrying inside a step; everything else is not.
    pub fn is_transient(&self) -> bool {
        matches!(self.status_code, 408 | 429) || self.status_code >= 500
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status_code == 401
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrchestratorError {
    /// The remote platform rejected an operation or reached a declared error state.
    #[error("Remote operation {operation} failed: {reason}")]
    RemoteOperation {
        operation: String,
        reason: String,
        status_code: Option<u16>,
    },

    /// A poll loop ran out of attempts before a terminal status was observed.
    #[error("Timed out waiting for {operation} after {attempts} attempts ({elapsed:?}), last status {last_status:?}")]
    Timeout {
        operation: String,
        attempts: u32,
        elapsed: Duration,
        last_status: Option<String>,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: String },

    /// Raised by pre-hooks before any remote side effect happens.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Connection error for container {container}: {reason}")]
    Connection { container: String, reason: String },

    #[error("State transition error: {0}")]
    StateTransition(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Step {0} is not registered")]
    StepNotRegistered(String),

    #[error("Missing shared parameter {name} in step {step_id}")]
    MissingParameter { step_id: String, name: String },

    #[error("Worker error: {0}")]
    Worker(String),
}

impl OrchestratorError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn remote(operation: impl Into<String>, err: &RemoteError) -> Self {
        Self::RemoteOperation {
            operation: operation.into(),
            reason: err.to_string(),
            status_code: Some(err.status_code),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::RemoteOperation { status_code, .. } => *status_code == Some(404),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Short machine-readable kind, used in task failure events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RemoteOperation { .. } => "remote_operation",
            Self::Timeout { .. } => "timeout",
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation",
            Self::Connection { .. } => "connection",
            Self::StateTransition(_) => "state_transition",
            Self::Persistence(_) => "persistence",
            Self::Configuration(_) => "configuration",
            Self::Serialization(_) => "serialization",
            Self::StepNotRegistered(_) => "step_not_registered",
            Self::MissingParameter { .. } => "missing_parameter",
            Self::Worker(_) => "worker",
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(error: serde_json::Error) -> Self {
        OrchestratorError::Serialization(error.to_string())
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { entity, id } => OrchestratorError::NotFound { entity, id },
            other => OrchestratorError::Persistence(other.to_string()),
        }
    }
}

impl From<StateMachineError> for OrchestratorError {
    fn from(error: StateMachineError) -> Self {
        OrchestratorError::StateTransition(error.to_string())
    }
}

impl From<ConfigurationError> for OrchestratorError {
    fn from(error: ConfigurationError) -> Self {
        OrchestratorError::Configuration(error.to_string())
    }
}

impl From<tokio::task::JoinError> for OrchestratorError {
    fn from(error: tokio::task::JoinError) -> Self {
        OrchestratorError::Worker(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
