//! # Kind Profiles
//!
//! Per-kind behavior expressed as data: whether the kind exists remotely,
//! the status vocabularies its create, update, delete and actions settle on,
//! which inbound links block its deletion and which attributes it requires.
//! Status words are compared lowercase.

use super::table::ResourceAction;
use crate::models::{LinkType, ResourceKind};
use crate::polling::PRESENT_STATUS;

#[derive(Debug, Clone, PartialEq)]
pub struct ActionProfile {
    pub action: ResourceAction,
    pub success: &'static [&'static str],
    pub error: &'static [&'static str],
}

#[derive(Debug, Clone, PartialEq)]
pub struct KindProfile {
    pub kind: ResourceKind,
    /// Provisioned on a remote platform; local-only kinds skip remote steps
    pub remote: bool,
    pub create_success: &'static [&'static str],
    pub create_error: &'static [&'static str],
    pub update_success: &'static [&'static str],
    pub update_error: &'static [&'static str],
    /// Statuses meaning "deleted" besides the entity disappearing
    pub delete_success: &'static [&'static str],
    pub delete_error: &'static [&'static str],
    pub actions: &'static [ActionProfile],
    /// Inbound links from live resources that block deletion
    pub blocking_links: &'static [LinkType],
    /// Remote children are discovered on create and expunged with the parent
    pub owns_children: bool,
    pub required_attributes: &'static [&'static str],
}

impl KindProfile {
    pub fn action(&self, action: ResourceAction) -> Option<&ActionProfile> {
        self.actions.iter().find(|a| a.action == action)
    }

    pub fn supports(&self, action: ResourceAction) -> bool {
        self.action(action).is_some()
    }

    /// The kind reports no status; existing is the ready signal
    pub fn ready_on_presence(&self) -> bool {
        self.create_success == PRESENCE
    }
}

const PRESENCE: &[&str] = &[PRESENT_STATUS];
const NONE: &[&str] = &[];

const SERVER_ACTIONS: &[ActionProfile] = &[
    ActionProfile { action: ResourceAction::Start, success: &["active"], error: &["error"] },
    ActionProfile { action: ResourceAction::Stop, success: &["shutoff"], error: &["error"] },
    ActionProfile { action: ResourceAction::Pause, success: &["paused"], error: &["error"] },
    ActionProfile { action: ResourceAction::Unpause, success: &["active"], error: &["error"] },
    ActionProfile { action: ResourceAction::Reboot, success: &["active"], error: &["error"] },
    ActionProfile { action: ResourceAction::Migrate, success: &["active"], error: &["error"] },
];

const VOLUME_ACTIONS: &[ActionProfile] = &[ActionProfile {
    action: ResourceAction::ExtendVolume,
    success: &["available", "in-use"],
    error: &["error_extending", "error"],
}];

const VM_ACTIONS: &[ActionProfile] = &[
    ActionProfile { action: ResourceAction::Start, success: &["poweredon"], error: &["error"] },
    ActionProfile { action: ResourceAction::Stop, success: &["poweredoff"], error: &["error"] },
    ActionProfile { action: ResourceAction::Reboot, success: &["poweredon"], error: &["error"] },
];

const fn presence(kind: ResourceKind, blocking_links: &'static [LinkType]) -> KindProfile {
    KindProfile {
        kind,
        remote: true,
        create_success: PRESENCE,
        create_error: NONE,
        update_success: PRESENCE,
        update_error: NONE,
        delete_success: NONE,
        delete_error: NONE,
        actions: &[],
        blocking_links,
        owns_children: false,
        required_attributes: &[],
    }
}

const fn local(kind: ResourceKind, blocking_links: &'static [LinkType]) -> KindProfile {
    KindProfile {
        remote: false,
        ..presence(kind, blocking_links)
    }
}

static PROJECT: KindProfile = presence(ResourceKind::Project, &[LinkType::Relation]);

static SERVER: KindProfile = KindProfile {
    kind: ResourceKind::Server,
    remote: true,
    create_success: &["active"],
    create_error: &["error"],
    update_success: &["active", "shutoff"],
    update_error: &["error"],
    delete_success: &["deleted"],
    delete_error: &["error"],
    actions: SERVER_ACTIONS,
    blocking_links: &[],
    owns_children: false,
    required_attributes: &["flavor"],
};

static VOLUME: KindProfile = KindProfile {
    kind: ResourceKind::Volume,
    remote: true,
    create_success: &["available"],
    create_error: &["error"],
    update_success: &["available", "in-use"],
    update_error: &["error"],
    delete_success: &["deleted"],
    delete_error: &["error_deleting", "error"],
    actions: VOLUME_ACTIONS,
    blocking_links: &[LinkType::Volume, LinkType::Snapshot],
    owns_children: false,
    required_attributes: &["size"],
};

static VOLUME_SNAPSHOT: KindProfile = KindProfile {
    kind: ResourceKind::VolumeSnapshot,
    remote: true,
    create_success: &["available"],
    create_error: &["error"],
    update_success: &["available"],
    update_error: &["error"],
    delete_success: &["deleted"],
    delete_error: &["error_deleting", "error"],
    actions: &[],
    blocking_links: &[],
    owns_children: false,
    required_attributes: &[],
};

static NETWORK: KindProfile = KindProfile {
    kind: ResourceKind::Network,
    remote: true,
    create_success: &["active"],
    create_error: &["error"],
    update_success: &["active"],
    update_error: &["error"],
    delete_success: NONE,
    delete_error: NONE,
    actions: &[],
    blocking_links: &[LinkType::Network],
    owns_children: false,
    required_attributes: &[],
};

static SUBNET: KindProfile = presence(ResourceKind::Subnet, &[]);

static PORT: KindProfile = KindProfile {
    kind: ResourceKind::Port,
    remote: true,
    create_success: &["active", "down"],
    create_error: &["error"],
    update_success: &["active", "down"],
    update_error: &["error"],
    delete_success: NONE,
    delete_error: NONE,
    actions: &[],
    blocking_links: &[],
    owns_children: false,
    required_attributes: &[],
};

static SECURITY_GROUP: KindProfile = presence(ResourceKind::SecurityGroup, &[LinkType::SecurityGroup]);

static STACK: KindProfile = KindProfile {
    kind: ResourceKind::Stack,
    remote: true,
    create_success: &["create_complete"],
    create_error: &["create_failed"],
    update_success: &["update_complete"],
    update_error: &["update_failed"],
    delete_success: &["delete_complete"],
    delete_error: &["delete_failed"],
    actions: &[],
    blocking_links: &[],
    owns_children: true,
    required_attributes: &[],
};

static SHARE: KindProfile = KindProfile {
    kind: ResourceKind::Share,
    remote: true,
    create_success: &["available"],
    create_error: &["error"],
    update_success: &["available"],
    update_error: &["error"],
    delete_success: NONE,
    delete_error: &["error_deleting"],
    actions: &[],
    blocking_links: &[],
    owns_children: false,
    required_attributes: &["size"],
};

static VSPHERE_VM: KindProfile = KindProfile {
    kind: ResourceKind::VsphereVm,
    remote: true,
    create_success: &["poweredon"],
    create_error: &["error"],
    update_success: &["poweredon", "poweredoff"],
    update_error: &["error"],
    delete_success: NONE,
    delete_error: &["error"],
    actions: VM_ACTIONS,
    blocking_links: &[],
    owns_children: false,
    required_attributes: &[],
};

static NSX_SECURITY_GROUP: KindProfile =
    presence(ResourceKind::NsxSecurityGroup, &[LinkType::SecurityGroup]);

static NSX_EDGE: KindProfile = KindProfile {
    kind: ResourceKind::NsxEdge,
    remote: true,
    create_success: &["active", "deployed"],
    create_error: &["failed", "error"],
    update_success: &["active", "deployed"],
    update_error: &["failed", "error"],
    delete_success: NONE,
    delete_error: &["failed"],
    actions: &[ActionProfile { action: ResourceAction::Reboot, success: &["active", "deployed"], error: &["failed"] }],
    blocking_links: &[LinkType::Uplink],
    owns_children: false,
    required_attributes: &[],
};

static NSX_IP_SET: KindProfile = presence(ResourceKind::NsxIpSet, &[LinkType::Relation]);

static VPC: KindProfile = local(ResourceKind::Vpc, &[LinkType::Transport]);
static GATEWAY: KindProfile = local(ResourceKind::Gateway, &[]);
static COMPUTE_ZONE: KindProfile = local(ResourceKind::ComputeZone, &[LinkType::Relation]);

pub fn profile(kind: ResourceKind) -> &'static KindProfile {
    match kind {
        ResourceKind::Project => &PROJECT,
        ResourceKind::Server => &SERVER,
        ResourceKind::Volume => &VOLUME,
        ResourceKind::VolumeSnapshot => &VOLUME_SNAPSHOT,
        ResourceKind::Network => &NETWORK,
        ResourceKind::Subnet => &SUBNET,
        ResourceKind::Port => &PORT,
        ResourceKind::SecurityGroup => &SECURITY_GROUP,
        ResourceKind::Stack => &STACK,
        ResourceKind::Share => &SHARE,
        ResourceKind::VsphereVm => &VSPHERE_VM,
        ResourceKind::NsxSecurityGroup => &NSX_SECURITY_GROUP,
        ResourceKind::NsxEdge => &NSX_EDGE,
        ResourceKind::NsxIpSet => &NSX_IP_SET,
        ResourceKind::Vpc => &VPC,
        ResourceKind::Gateway => &GATEWAY,
        ResourceKind::ComputeZone => &COMPUTE_ZONE,
    }
}
