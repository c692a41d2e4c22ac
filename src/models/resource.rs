//! # Resource
//!
//! The persisted record of one infrastructure entity under orchestration.
//!
//! A resource with an empty `ext_id` in state `Pending` is "intent recorded,
//! not yet provisioned": the create workflow records it before the first
//! remote call so that a retry finds it by local id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::kind::ResourceKind;
use crate::constants::NO_REMOTE_ENTITY;
use crate::state_machine::ResourceState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: i64,
    pub uuid: Uuid,
    pub objid: String,
    pub name: String,
    pub desc: Option<String>,
    pub kind: ResourceKind,
    pub container_id: i64,
    pub ext_id: Option<String>,
    pub state: ResourceState,
    pub active: bool,
    pub attrib: Value,
    pub parent_id: Option<i64>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    /// True when `ext_id` points at a real remote entity
    pub fn is_ext_id_valid(&self) -> bool {
        is_ext_id_valid(self.ext_id.as_deref())
    }

    pub fn valid_ext_id(&self) -> Option<&str> {
        self.ext_id.as_deref().filter(|id| is_ext_id_valid(Some(id)))
    }

    pub fn is_expunged(&self) -> bool {
        self.state == ResourceState::Expunged
    }

    /// Read one attribute, `None` when absent or null
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attrib.get(key).filter(|v| !v.is_null())
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attr(key).and_then(Value::as_str)
    }

    pub fn attr_u64(&self, key: &str) -> Option<u64> {
        self.attr(key).and_then(Value::as_u64)
    }
}

pub fn is_ext_id_valid(ext_id: Option<&str>) -> bool {
    matches!(ext_id, Some(id) if !id.trim().is_empty() && id != NO_REMOTE_ENTITY)
}

/// New resource for creation; always starts in `Pending`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewResource {
    pub name: String,
    pub kind: ResourceKind,
    /// Computed from the parent's objid when absent
    pub objid: Option<String>,
    pub ext_id: Option<String>,
    pub active: bool,
    pub desc: Option<String>,
    pub attrib: Value,
    pub parent_id: Option<i64>,
    pub tags: Vec<String>,
}

impl NewResource {
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            objid: None,
            ext_id: None,
            active: false,
            desc: None,
            attrib: Value::Object(Default::default()),
            parent_id: None,
            tags: Vec::new(),
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

    pub fn with_ext_id(mut self, ext_id: impl Into<String>) -> Self {
        self.ext_id = Some(ext_id.into());
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
}

/// Partial update applied atomically by the store.
///
/// `state` is only honored through [`crate::container::Container`], which
/// validates the transition first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceUpdate {
    pub name: Option<String>,
    pub desc: Option<String>,
    /// `Some(None)` clears the ext_id
    pub ext_id: Option<Option<String>>,
    pub state: Option<ResourceState>,
    pub active: Option<bool>,
    /// Shallow-merged into the existing attributes
    pub attrib: Option<Value>,
    pub tags: Option<Vec<String>>,
}

impl ResourceUpdate {
    pub fn ext_id(ext_id: impl Into<String>) -> Self {
        Self {
            ext_id: Some(Some(ext_id.into())),
            ..Default::default()
        }
    }

    pub fn attrib(attrib: Value) -> Self {
        Self {
            attrib: Some(attrib),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.desc.is_none()
            && self.ext_id.is_none()
            && self.state.is_none()
            && self.active.is_none()
            && self.attrib.is_none()
            && self.tags.is_none()
    }

    /// Apply the update to an in-memory copy, the same way the stores do
    pub fn apply_to(&self, resource: &mut Resource) {
        if let Some(name) = &self.name {
            resource.name = name.clone();
        }
        if let Some(desc) = &self.desc {
            resource.desc = Some(desc.clone());
        }
        if let Some(ext_id) = &self.ext_id {
            resource.ext_id = ext_id.clone();
        }
        if let Some(state) = self.state {
            resource.state = state;
        }
        if let Some(active) = self.active {
            resource.active = active;
        }
        if let Some(attrib) = &self.attrib {
            merge_attrib(&mut resource.attrib, attrib);
        }
        if let Some(tags) = &self.tags {
            resource.tags = tags.clone();
        }
        resource.updated_at = Utc::now();
    }
}

/// Shallow merge; a null value removes the key
pub fn merge_attrib(target: &mut Value, patch: &Value) {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(target_map), Some(patch_map)) => {
            for (key, value) in patch_map {
                if value.is_null() {
                    target_map.remove(key);
                } else {
                    target_map.insert(key.clone(), value.clone());
                }
            }
        }
        _ => *target = patch.clone(),
    }
}

/// Query filter for listing resources
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    pub container_id: Option<i64>,
    pub kind: Option<ResourceKind>,
    pub parent_id: Option<i64>,
    pub include_expunged: bool,
}

impl ResourceFilter {
    pub fn container(container_id: i64) -> Self {
        Self {
            container_id: Some(container_id),
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: ResourceKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_parent(mut self, parent_id: i64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn matches(&self, resource: &Resource) -> bool {
        self.container_id.map_or(true, |id| resource.container_id == id)
            && self.kind.map_or(true, |kind| resource.kind == kind)
            && self.parent_id.map_or(true, |id| resource.parent_id == Some(id))
            && (self.include_expunged || !resource.is_expunged())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Resource {
        Resource {
            id: 1,
            uuid: Uuid::new_v4(),
            objid: "a//b".to_string(),
            name: "vol".to_string(),
            desc: None,
            kind: ResourceKind::Volume,
            container_id: 1,
            ext_id: None,
            state: ResourceState::Pending,
            active: false,
            attrib: json!({"size": 20, "type": "ssd"}),
            parent_id: None,
            tags: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_ext_id_validity() {
        assert!(!is_ext_id_valid(None));
        assert!(!is_ext_id_valid(Some("")));
        assert!(!is_ext_id_valid(Some("  ")));
        assert!(!is_ext_id_valid(Some(NO_REMOTE_ENTITY)));
        assert!(is_ext_id_valid(Some("V1")));
    }

    #[test]
    fn test_update_merges_attrib_and_clears_ext_id() {
        let mut resource = sample();
        resource.ext_id = Some("V1".to_string());

        let update = ResourceUpdate {
            ext_id: Some(None),
            attrib: Some(json!({"size": 40, "type": null})),
            ..Default::default()
        };
        update.apply_to(&mut resource);

        assert_eq!(resource.ext_id, None);
        assert_eq!(resource.attr_u64("size"), Some(40));
        assert!(resource.attr("type").is_none());
    }

    #[test]
    fn test_filter_hides_expunged_by_default() {
        let mut resource = sample();
        resource.state = ResourceState::Expunged;
        assert!(!ResourceFilter::container(1).matches(&resource));

        let filter = ResourceFilter {
            include_expunged: true,
            ..ResourceFilter::container(1)
        };
        assert!(filter.matches(&resource));
        assert!(!ResourceFilter::container(2).with_kind(ResourceKind::Volume).matches(&resource));
    }
}
