//! # Step Contract
//!
//! A step is one idempotent unit of work: it receives the task context, its
//! own id, the current shared params and any positional args from its
//! descriptor, and hands back a result plus the params for the next step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::context::TaskContext;
use super::params::SharedParams;
use crate::error::Result;

/// Entry in a workflow's ordered step list.
///
/// Serialized either as a bare identifier or as `{"step": ..., "args": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepDescriptor {
    Plain(String),
    WithArgs {
        step: String,
        #[serde(default)]
        args: Vec<Value>,
    },
}

impl StepDescriptor {
    pub fn plain(step: impl Into<String>) -> Self {
        Self::Plain(step.into())
    }

    pub fn with_args(step: impl Into<String>, args: Vec<Value>) -> Self {
        Self::WithArgs {
            step: step.into(),
            args,
        }
    }

    pub fn step_id(&self) -> &str {
        match self {
            Self::Plain(step) => step,
            Self::WithArgs { step, .. } => step,
        }
    }

    pub fn args(&self) -> &[Value] {
        match self {
            Self::Plain(_) => &[],
            Self::WithArgs { args, .. } => args,
        }
    }
}

impl fmt::Display for StepDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.step_id())
    }
}

impl From<&str> for StepDescriptor {
    fn from(step: &str) -> Self {
        Self::plain(step)
    }
}

/// What a step hands back to the runner
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub result: Value,
    pub params: SharedParams,
}

impl StepOutput {
    pub fn new(result: Value, params: SharedParams) -> Self {
        Self { result, params }
    }

    /// Result-less completion
    pub fn params(params: SharedParams) -> Self {
        Self::new(Value::Bool(true), params)
    }
}

#[async_trait]
pub trait Step: Send + Sync {
    /// Identifier the step is registered under
    fn name(&self) -> &str;

    async fn execute(
        &self,
        ctx: &TaskContext,
        step_id: &str,
        params: SharedParams,
        args: &[Value],
    ) -> Result<StepOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_deserializes_both_shapes() {
        let steps: Vec<StepDescriptor> = serde_json::from_value(json!([
            "action_pre_step",
            {"step": "remote_action_step", "args": ["start"]},
            {"step": "action_post_step"}
        ]))
        .unwrap();

        assert_eq!(steps[0], StepDescriptor::plain("action_pre_step"));
        assert_eq!(steps[1].step_id(), "remote_action_step");
        assert_eq!(steps[1].args(), &[json!("start")]);
        assert!(steps[2].args().is_empty());
    }

    #[test]
    fn test_plain_serializes_as_string() {
        let json = serde_json::to_value(StepDescriptor::plain("x")).unwrap();
        assert_eq!(json, json!("x"));
    }
}
