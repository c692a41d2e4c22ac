//! # Workflow Table
//!
//! Declarative map from (kind, operation) to the ordered step list a task
//! runs. Variation between kinds is data here, not code in the steps.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::profiles::profile;
use crate::constants::steps;
use crate::engine::StepDescriptor;
use crate::error::{OrchestratorError, Result};
use crate::models::ResourceKind;

/// Named imperative operation on an existing resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceAction {
    Start,
    Stop,
    Pause,
    Unpause,
    Reboot,
    Migrate,
    ExtendVolume,
}

impl ResourceAction {
    pub const ALL: [ResourceAction; 7] = [
        Self::Start,
        Self::Stop,
        Self::Pause,
        Self::Unpause,
        Self::Reboot,
        Self::Migrate,
        Self::ExtendVolume,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Pause => "pause",
            Self::Unpause => "unpause",
            Self::Reboot => "reboot",
            Self::Migrate => "migrate",
            Self::ExtendVolume => "extend_volume",
        }
    }

    /// Action name as the remote platform knows it
    pub fn remote_name(&self) -> &'static str {
        match self {
            Self::ExtendVolume => "extend",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for ResourceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|a| a.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Invalid resource action: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "operation", content = "action")]
pub enum Operation {
    Create,
    Update,
    Delete,
    Action(ResourceAction),
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::Update => f.write_str("update"),
            Self::Delete => f.write_str("delete"),
            Self::Action(action) => write!(f, "action.{action}"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowTable {
    entries: HashMap<(ResourceKind, Operation), Vec<StepDescriptor>>,
}

impl WorkflowTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Table for every kind and supported action, derived from the kind profiles
    pub fn standard() -> Self {
        let mut table = Self::empty();
        for kind in ResourceKind::ALL {
            table.insert(kind, Operation::Create, create_steps(kind));
            table.insert(kind, Operation::Update, update_steps(kind));
            table.insert(kind, Operation::Delete, delete_steps(kind));
            for action in profile(kind).actions {
                table.insert(kind, Operation::Action(action.action), action_steps(action.action));
            }
        }
        table
    }

    /// Replace or add the step list of one (kind, operation)
    pub fn insert(&mut self, kind: ResourceKind, operation: Operation, steps: Vec<StepDescriptor>) {
        self.entries.insert((kind, operation), steps);
    }

    pub fn steps(&self, kind: ResourceKind, operation: Operation) -> Result<Vec<StepDescriptor>> {
        self.entries
            .get(&(kind, operation))
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::validation(format!("{kind} does not support {operation}"))
            })
    }

    pub fn supports(&self, kind: ResourceKind, operation: Operation) -> bool {
        self.entries.contains_key(&(kind, operation))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn create_steps(kind: ResourceKind) -> Vec<StepDescriptor> {
    let mut list = vec![StepDescriptor::plain(steps::CREATE_RESOURCE_PRE_STEP)];
    if kind == ResourceKind::Server {
        list.push(StepDescriptor::with_args(
            steps::PROVISION_DEPENDENCY_STEP,
            vec![json!(ResourceKind::Volume.as_str()), json!("boot_volume")],
        ));
    }
    if profile(kind).remote {
        list.push(StepDescriptor::plain(steps::PROVISION_REMOTE_STEP));
    }
    list.push(StepDescriptor::plain(steps::LINK_RESOURCES_STEP));
    if profile(kind).owns_children {
        list.push(StepDescriptor::plain(steps::DISCOVER_STACK_CHILDREN_STEP));
    }
    list.push(StepDescriptor::plain(steps::CREATE_RESOURCE_POST_STEP));
    list
}

fn update_steps(kind: ResourceKind) -> Vec<StepDescriptor> {
    let mut list = vec![StepDescriptor::plain(steps::UPDATE_RESOURCE_PRE_STEP)];
    if profile(kind).remote {
        list.push(StepDescriptor::plain(steps::UPDATE_REMOTE_STEP));
    }
    list.push(StepDescriptor::plain(steps::UPDATE_RESOURCE_POST_STEP));
    list
}

fn delete_steps(kind: ResourceKind) -> Vec<StepDescriptor> {
    let mut list = vec![StepDescriptor::plain(steps::EXPUNGE_RESOURCE_PRE_STEP)];
    if profile(kind).remote {
        list.push(StepDescriptor::plain(steps::DELETE_REMOTE_STEP));
    }
    if profile(kind).owns_children {
        list.push(StepDescriptor::plain(steps::EXPUNGE_CHILDREN_STEP));
    }
    list.push(StepDescriptor::plain(steps::UNLINK_RESOURCES_STEP));
    list.push(StepDescriptor::plain(steps::EXPUNGE_RESOURCE_POST_STEP));
    list
}

fn action_steps(action: ResourceAction) -> Vec<StepDescriptor> {
    vec![
        StepDescriptor::plain(steps::ACTION_PRE_STEP),
        StepDescriptor::with_args(steps::REMOTE_ACTION_STEP, vec![json!(action.as_str())]),
        StepDescriptor::plain(steps::ACTION_POST_STEP),
    ]
}

/// Steps a stack child runs when adopted during stack discovery
pub(crate) fn adoption_steps() -> Vec<StepDescriptor> {
    vec![
        StepDescriptor::plain(steps::CREATE_RESOURCE_PRE_STEP),
        StepDescriptor::plain(steps::PROVISION_REMOTE_STEP),
        StepDescriptor::plain(steps::CREATE_RESOURCE_POST_STEP),
    ]
}

/// Steps a stack child runs when its stack is deleted; the remote side goes
/// with the stack, and nested children are expunged first
pub(crate) fn cascade_expunge_steps() -> Vec<StepDescriptor> {
    vec![
        StepDescriptor::plain(steps::EXPUNGE_RESOURCE_PRE_STEP),
        StepDescriptor::plain(steps::EXPUNGE_CHILDREN_STEP),
        StepDescriptor::plain(steps::UNLINK_RESOURCES_STEP),
        StepDescriptor::plain(steps::EXPUNGE_RESOURCE_POST_STEP),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[StepDescriptor]) -> Vec<&str> {
        list.iter().map(StepDescriptor::step_id).collect()
    }

    #[test]
    fn test_volume_create_steps() {
        let table = WorkflowTable::standard();
        let list = table.steps(ResourceKind::Volume, Operation::Create).unwrap();
        assert_eq!(
            ids(&list),
            vec![
                steps::CREATE_RESOURCE_PRE_STEP,
                steps::PROVISION_REMOTE_STEP,
                steps::LINK_RESOURCES_STEP,
                steps::CREATE_RESOURCE_POST_STEP,
            ]
        );
    }

    #[test]
    fn test_server_create_provisions_boot_volume_first() {
        let table = WorkflowTable::standard();
        let list = table.steps(ResourceKind::Server, Operation::Create).unwrap();
        assert_eq!(list[1].step_id(), steps::PROVISION_DEPENDENCY_STEP);
        assert_eq!(list[1].args(), &[json!("volume"), json!("boot_volume")]);
        assert_eq!(list[2].step_id(), steps::PROVISION_REMOTE_STEP);
    }

    #[test]
    fn test_local_kinds_skip_remote_steps() {
        let table = WorkflowTable::standard();
        let create = table.steps(ResourceKind::Vpc, Operation::Create).unwrap();
        assert!(!ids(&create).contains(&steps::PROVISION_REMOTE_STEP));
        let delete = table.steps(ResourceKind::Vpc, Operation::Delete).unwrap();
        assert!(!ids(&delete).contains(&steps::DELETE_REMOTE_STEP));
    }

    #[test]
    fn test_stack_delete_expunges_children() {
        let table = WorkflowTable::standard();
        let delete = table.steps(ResourceKind::Stack, Operation::Delete).unwrap();
        assert_eq!(
            ids(&delete),
            vec![
                steps::EXPUNGE_RESOURCE_PRE_STEP,
                steps::DELETE_REMOTE_STEP,
                steps::EXPUNGE_CHILDREN_STEP,
                steps::UNLINK_RESOURCES_STEP,
                steps::EXPUNGE_RESOURCE_POST_STEP,
            ]
        );
    }

    #[test]
    fn test_unsupported_action_is_rejected() {
        let table = WorkflowTable::standard();
        assert!(table.supports(ResourceKind::Server, Operation::Action(ResourceAction::Migrate)));
        let err = table
            .steps(ResourceKind::Network, Operation::Action(ResourceAction::Start))
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(_)));
    }

    #[test]
    fn test_overrides_replace_entries() {
        let mut table = WorkflowTable::standard();
        table.insert(
            ResourceKind::Share,
            Operation::Create,
            vec![StepDescriptor::plain("custom_share_step")],
        );
        let list = table.steps(ResourceKind::Share, Operation::Create).unwrap();
        assert_eq!(ids(&list), vec!["custom_share_step"]);
    }

    #[test]
    fn test_action_names() {
        assert_eq!(ResourceAction::ExtendVolume.remote_name(), "extend");
        assert_eq!("migrate".parse::<ResourceAction>().unwrap(), ResourceAction::Migrate);
        assert_eq!(Operation::Action(ResourceAction::Stop).to_string(), "action.stop");
    }
}
