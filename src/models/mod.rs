//! Data model: resources, links, kinds and state transition records.

pub mod kind;
pub mod link;
pub mod objid;
pub mod resource;
pub mod transition;

pub use kind::{Platform, ResourceKind};
pub use link::{Link, LinkType, NewLink};
pub use resource::{
    is_ext_id_valid, merge_attrib, NewResource, Resource, ResourceFilter, ResourceUpdate,
};
pub use transition::ResourceTransition;
