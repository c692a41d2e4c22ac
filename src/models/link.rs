//! # Link
//!
//! Typed directed edge between two resources, used for associations that are
//! not part of the parent/child tree (a server "has a" volume, a gateway "has
//! a" transport VPC).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Volume,
    Network,
    Relation,
    Stack,
    Transport,
    Uplink,
    SecurityGroup,
    Snapshot,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Network => "network",
            Self::Relation => "relation",
            Self::Stack => "stack",
            Self::Transport => "transport",
            Self::Uplink => "uplink",
            Self::SecurityGroup => "security_group",
            Self::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "volume" => Ok(Self::Volume),
            "network" => Ok(Self::Network),
            "relation" => Ok(Self::Relation),
            "stack" => Ok(Self::Stack),
            "transport" => Ok(Self::Transport),
            "uplink" => Ok(Self::Uplink),
            "security_group" => Ok(Self::SecurityGroup),
            "snapshot" => Ok(Self::Snapshot),
            _ => Err(format!("Invalid link type: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: i64,
    pub link_type: LinkType,
    pub start_resource_id: i64,
    pub end_resource_id: i64,
    pub attrib: Value,
    pub created_at: DateTime<Utc>,
}

impl Link {
    pub fn touches(&self, resource_id: i64) -> bool {
        self.start_resource_id == resource_id || self.end_resource_id == resource_id
    }

    /// The endpoint that is not `resource_id`
    pub fn other_end(&self, resource_id: i64) -> i64 {
        if self.start_resource_id == resource_id {
            self.end_resource_id
        } else {
            self.start_resource_id
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLink {
    pub link_type: LinkType,
    pub start_resource_id: i64,
    pub end_resource_id: i64,
    #[serde(default)]
    pub attrib: Value,
}

impl NewLink {
    pub fn new(link_type: LinkType, start_resource_id: i64, end_resource_id: i64) -> Self {
        Self {
            link_type,
            start_resource_id,
            end_resource_id,
            attrib: Value::Object(Default::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_type_parse() {
        assert_eq!("transport".parse::<LinkType>().unwrap(), LinkType::Transport);
        assert_eq!(LinkType::SecurityGroup.to_string(), "security_group");
        assert!("owner".parse::<LinkType>().is_err());
    }

    #[test]
    fn test_other_end() {
        let link = Link {
            id: 1,
            link_type: LinkType::Volume,
            start_resource_id: 10,
            end_resource_id: 20,
            attrib: Value::Null,
            created_at: Utc::now(),
        };
        assert!(link.touches(10));
        assert!(!link.touches(30));
        assert_eq!(link.other_end(10), 20);
        assert_eq!(link.other_end(20), 10);
    }
}
