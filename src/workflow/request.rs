//! Typed inputs of the orchestrator operations, and how they land in the
//! shared params map of a task.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::params;
use crate::engine::SharedParams;
use crate::models::{LinkType, ResourceKind};

/// Link to create from the new resource to an existing one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRequest {
    #[serde(rename = "type")]
    pub link_type: LinkType,
    pub target: i64,
    #[serde(default)]
    pub attrib: Value,
}

impl LinkRequest {
    pub fn new(link_type: LinkType, target: i64) -> Self {
        Self {
            link_type,
            target,
            attrib: Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub kind: ResourceKind,
    pub name: String,
    pub parent_id: Option<i64>,
    pub attrib: Value,
    pub desc: Option<String>,
    pub tags: Vec<String>,
    pub links: Vec<LinkRequest>,
    /// Adopt this existing remote entity instead of creating one
    pub ext_id: Option<String>,
    /// Remote project scope the resource lives in
    pub project: Option<String>,
}

impl CreateRequest {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            parent_id: None,
            attrib: Value::Object(Default::default()),
            desc: None,
            tags: Vec::new(),
            links: Vec::new(),
            ext_id: None,
            project: None,
        }
    }

    pub fn with_parent(mut self, parent_id: i64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_attrib(mut self, attrib: Value) -> Self {
        self.attrib = attrib;
        self
    }

    pub fn with_link(mut self, link: LinkRequest) -> Self {
        self.links.push(link);
        self
    }

    pub fn with_ext_id(mut self, ext_id: impl Into<String>) -> Self {
        self.ext_id = Some(ext_id.into());
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn to_params(&self) -> SharedParams {
        let mut shared = SharedParams::new()
            .with(params::KIND, self.kind)
            .with(params::NAME, &self.name)
            .with(params::ATTRIB, &self.attrib);
        if let Some(parent_id) = self.parent_id {
            shared.set(params::PARENT_ID, parent_id);
        }
        if let Some(desc) = &self.desc {
            shared.set(params::DESC, desc);
        }
        if !self.tags.is_empty() {
            shared.set(params::TAGS, &self.tags);
        }
        if !self.links.is_empty() {
            shared.set(params::LINKS, &self.links);
        }
        if let Some(ext_id) = &self.ext_id {
            shared.set(params::EXT_ID, ext_id);
        }
        if let Some(project) = &self.project {
            shared.set(params::PROJECT, project);
        }
        shared
    }
}

/// Fields an update changes; absent fields stay as they are
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    /// Shallow-merged into the resource attributes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrib: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

impl UpdateFields {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn attrib(attrib: Value) -> Self {
        Self {
            attrib: Some(attrib),
            ..Default::default()
        }
    }

    /// The part the remote platform is told about
    pub fn remote_fields(&self) -> serde_json::Map<String, Value> {
        let mut fields = serde_json::Map::new();
        if let Some(name) = &self.name {
            fields.insert("name".to_string(), Value::String(name.clone()));
        }
        if let Some(Value::Object(attrib)) = &self.attrib {
            fields.extend(attrib.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_request_params() {
        let request = CreateRequest::new(ResourceKind::Volume, "data")
            .with_parent(7)
            .with_attrib(json!({"size": 20}))
            .with_link(LinkRequest::new(LinkType::Relation, 3))
            .with_project("P1");
        let shared = request.to_params();

        assert_eq!(shared.get::<ResourceKind>(params::KIND), Some(ResourceKind::Volume));
        assert_eq!(shared.get_i64(params::PARENT_ID), Some(7));
        assert_eq!(shared.get_str(params::PROJECT), Some("P1"));
        assert_eq!(
            shared.get::<Vec<LinkRequest>>(params::LINKS),
            Some(vec![LinkRequest::new(LinkType::Relation, 3)])
        );
        assert!(!shared.contains(params::EXT_ID));
    }

    #[test]
    fn test_remote_fields_flatten_attrib() {
        let fields = UpdateFields {
            name: Some("renamed".to_string()),
            attrib: Some(json!({"flavor": "m2"})),
            ..Default::default()
        };
        let remote = fields.remote_fields();
        assert_eq!(remote.get("name"), Some(&json!("renamed")));
        assert_eq!(remote.get("flavor"), Some(&json!("m2")));
        assert!(UpdateFields::default().remote_fields().is_empty());
    }
}
