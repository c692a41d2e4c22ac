//! # System Constants
//!
//! Step identifiers, shared param keys, event names and the defaults that bound
//! polling and token caching.

/// Identifiers of the generic steps registered by [`crate::workflow::register_default_steps`].
pub mod steps {
    pub const CREATE_RESOURCE_PRE_STEP: &str = "create_resource_pre_step";
    pub const PROVISION_DEPENDENCY_STEP: &str = "provision_dependency_step";
    pub const PROVISION_REMOTE_STEP: &str = "provision_remote_step";
    pub const LINK_RESOURCES_STEP: &str = "link_resources_step";
    pub const DISCOVER_STACK_CHILDREN_STEP: &str = "discover_stack_children_step";
    pub const CREATE_RESOURCE_POST_STEP: &str = "create_resource_post_step";

    pub const UPDATE_RESOURCE_PRE_STEP: &str = "update_resource_pre_step";
    pub const UPDATE_REMOTE_STEP: &str = "update_remote_step";
    pub const UPDATE_RESOURCE_POST_STEP: &str = "update_resource_post_step";

    pub const EXPUNGE_RESOURCE_PRE_STEP: &str = "expunge_resource_pre_step";
    pub const DELETE_REMOTE_STEP: &str = "delete_remote_step";
    pub const EXPUNGE_CHILDREN_STEP: &str = "expunge_children_step";
    pub const UNLINK_RESOURCES_STEP: &str = "unlink_resources_step";
    pub const EXPUNGE_RESOURCE_POST_STEP: &str = "expunge_resource_post_step";

    pub const ACTION_PRE_STEP: &str = "action_pre_step";
    pub const REMOTE_ACTION_STEP: &str = "remote_action_step";
    pub const ACTION_POST_STEP: &str = "action_post_step";
}

/// Well-known keys of the shared params map.
pub mod params {
    pub const RESOURCE_ID: &str = "resource_id";
    pub const OBJID: &str = "objid";
    pub const EXT_ID: &str = "ext_id";
    pub const NAME: &str = "name";
    pub const KIND: &str = "kind";
    pub const ATTRIB: &str = "attrib";
    pub const LINKS: &str = "links";
    pub const ALREADY_PROVISIONED: &str = "already_provisioned";
    pub const REMOTE_STATUS: &str = "remote_status";
    pub const REMOTE_GONE: &str = "remote_gone";
    pub const UPDATE_FIELDS: &str = "update_fields";
    pub const ACTION_PARAMS: &str = "action_params";
    pub const CHILDREN: &str = "children";
    pub const DEPENDENCIES: &str = "dependencies";
    pub const ALREADY_EXPUNGED: &str = "already_expunged";
    pub const ACTION_INVOKED: &str = "action_invoked";
    pub const DESC: &str = "desc";
    pub const TAGS: &str = "tags";
    pub const PARENT_ID: &str = "parent_id";
    pub const PROJECT: &str = "project";
    pub const ACTION: &str = "action";
    /// Parent delete is removing this resource along with itself
    pub const CASCADE: &str = "cascade";
    /// Map of sub-task key to task id, persisted before the sub-task starts
    pub const SUBTASKS: &str = "subtasks";
}

/// Keys the engine writes into a resource's `attrib`.
pub mod attrib {
    /// Last remote status observed by a workflow
    pub const REMOTE_STATUS: &str = "remote_status";
}

/// Events published on the engine event bus.
pub mod events {
    pub const TASK_STARTED: &str = "task.started";
    pub const TASK_RESUMED: &str = "task.resumed";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
    pub const STEP_STARTED: &str = "step.started";
    pub const STEP_PROGRESS: &str = "step.progress";
    pub const STEP_COMPLETED: &str = "step.completed";
    pub const STEP_FAILED: &str = "step.failed";
    pub const RESOURCE_STATE_CHANGED: &str = "resource.state_changed";
}

/// Explicit "there is no remote entity" marker stored in `ext_id`.
pub const NO_REMOTE_ENTITY: &str = "__none__";

/// Separator between the segments of an objid.
pub const OBJID_SEPARATOR: &str = "//";

pub mod defaults {
    pub const POLL_INTERVAL_MS: u64 = 2_000;
    pub const POLL_MAX_ATTEMPTS: u32 = 180;
    pub const POLL_MAX_INTERVAL_MS: u64 = 30_000;
    pub const NOT_FOUND_GRACE_ATTEMPTS: u32 = 2;
    pub const POLL_TRANSIENT_ERROR_BUDGET: u32 = 3;
    /// Larger multipliers reach `max_interval` on the first backoff anyway
    pub const POLL_MAX_BACKOFF_MULTIPLIER: f64 = 10.0;
    pub const TOKEN_TTL_SECONDS: u64 = 1_800;
    pub const TOKEN_RENEWAL_MARGIN_SECONDS: u64 = 300;
    pub const MAX_CONCURRENT_TASKS: usize = 32;
    pub const EVENT_CHANNEL_CAPACITY: usize = 1_000;
}
