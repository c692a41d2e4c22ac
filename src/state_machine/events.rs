use serde::{Deserialize, Serialize};

use super::states::ResourceState;

/// Events that drive resource state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ResourceEvent {
    /// Remote provisioning starts (or restarts after a failure)
    Build,
    /// Remote entity reached its ready status
    Activate,
    /// Remote update or action starts
    Update,
    /// Remote cleanup starts
    Delete,
    /// Remote cleanup finished or was unnecessary
    Expunge,
    /// Terminal remote failure
    Fail(String),
}

impl ResourceEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Activate => "activate",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Expunge => "expunge",
            Self::Fail(_) => "fail",
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) => Some(msg),
            _ => None,
        }
    }

    /// State this event targets regardless of the source state
    pub fn target_state(&self) -> ResourceState {
        match self {
            Self::Build => ResourceState::Building,
            Self::Activate => ResourceState::Active,
            Self::Update => ResourceState::Updating,
            Self::Delete => ResourceState::Deleting,
            Self::Expunge => ResourceState::Expunged,
            Self::Fail(_) => ResourceState::Error,
        }
    }

    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }
}
