//! # Resource Kinds
//!
//! The closed set of entity types the orchestrator manages. Per-kind behavior
//! lives in [`crate::workflow::profiles`] as data keyed by this enum.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Remote platform family a kind belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    OpenStack,
    Vsphere,
    Nsx,
    /// Provider-level abstractions that only exist in the local model
    Provider,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenStack => write!(f, "openstack"),
            Self::Vsphere => write!(f, "vsphere"),
            Self::Nsx => write!(f, "nsx"),
            Self::Provider => write!(f, "provider"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Project,
    Server,
    Volume,
    VolumeSnapshot,
    Network,
    Subnet,
    Port,
    SecurityGroup,
    Stack,
    Share,
    VsphereVm,
    NsxSecurityGroup,
    NsxEdge,
    NsxIpSet,
    Vpc,
    Gateway,
    ComputeZone,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 17] = [
        Self::Project,
        Self::Server,
        Self::Volume,
        Self::VolumeSnapshot,
        Self::Network,
        Self::Subnet,
        Self::Port,
        Self::SecurityGroup,
        Self::Stack,
        Self::Share,
        Self::VsphereVm,
        Self::NsxSecurityGroup,
        Self::NsxEdge,
        Self::NsxIpSet,
        Self::Vpc,
        Self::Gateway,
        Self::ComputeZone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Server => "server",
            Self::Volume => "volume",
            Self::VolumeSnapshot => "volume_snapshot",
            Self::Network => "network",
            Self::Subnet => "subnet",
            Self::Port => "port",
            Self::SecurityGroup => "security_group",
            Self::Stack => "stack",
            Self::Share => "share",
            Self::VsphereVm => "vsphere_vm",
            Self::NsxSecurityGroup => "nsx_security_group",
            Self::NsxEdge => "nsx_edge",
            Self::NsxIpSet => "nsx_ip_set",
            Self::Vpc => "vpc",
            Self::Gateway => "gateway",
            Self::ComputeZone => "compute_zone",
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            Self::Project
            | Self::Server
            | Self::Volume
            | Self::VolumeSnapshot
            | Self::Network
            | Self::Subnet
            | Self::Port
            | Self::SecurityGroup
            | Self::Stack
            | Self::Share => Platform::OpenStack,
            Self::VsphereVm => Platform::Vsphere,
            Self::NsxSecurityGroup | Self::NsxEdge | Self::NsxIpSet => Platform::Nsx,
            Self::Vpc | Self::Gateway | Self::ComputeZone => Platform::Provider,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|kind| kind.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Invalid resource kind: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_string_round_trip() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
        assert!("heat_thing".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_kind_serde_matches_as_str() {
        let json = serde_json::to_string(&ResourceKind::NsxIpSet).unwrap();
        assert_eq!(json, "\"nsx_ip_set\"");
    }

    #[test]
    fn test_platform_assignment() {
        assert_eq!(ResourceKind::Stack.platform(), Platform::OpenStack);
        assert_eq!(ResourceKind::NsxEdge.platform(), Platform::Nsx);
        assert_eq!(ResourceKind::ComputeZone.platform(), Platform::Provider);
    }
}
