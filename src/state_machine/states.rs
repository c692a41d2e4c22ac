use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states shared by every resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceState {
    /// Intent recorded, nothing provisioned remotely yet
    #[default]
    Pending,
    /// Remote provisioning in progress
    Building,
    /// Provisioned and usable
    Active,
    /// Remote update or action in progress
    Updating,
    /// Unrecoverable remote failure observed
    Error,
    /// Remote cleanup in progress
    Deleting,
    /// Gone; the record is retained for audit only
    Expunged,
}

impl ResourceState {
    pub const ALL: [ResourceState; 7] = [
        Self::Pending,
        Self::Building,
        Self::Active,
        Self::Updating,
        Self::Error,
        Self::Deleting,
        Self::Expunged,
    ];

    /// No further transitions allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expunged)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    /// A remote operation is in flight
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Building | Self::Updating | Self::Deleting)
    }

    /// Resource can be linked to and acted upon
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Building => "BUILDING",
            Self::Active => "ACTIVE",
            Self::Updating => "UPDATING",
            Self::Error => "ERROR",
            Self::Deleting => "DELETING",
            Self::Expunged => "EXPUNGED",
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("Invalid resource state: {s}"))
    }
}
