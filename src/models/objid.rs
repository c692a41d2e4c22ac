//! Hierarchical object ids.
//!
//! An objid is the parent's objid plus one segment, joined with `//`. Prefix
//! relationship on whole segments implies ancestry.

use uuid::Uuid;

use crate::constants::OBJID_SEPARATOR;

/// Fresh segment for a new resource
pub fn new_segment() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Objid of a child of `parent`
pub fn child_of(parent: Option<&str>, segment: &str) -> String {
    match parent {
        Some(parent) if !parent.is_empty() => format!("{parent}{OBJID_SEPARATOR}{segment}"),
        _ => segment.to_string(),
    }
}

pub fn segments(objid: &str) -> Vec<&str> {
    objid.split(OBJID_SEPARATOR).collect()
}

pub fn depth(objid: &str) -> usize {
    segments(objid).len()
}

/// True when `ancestor` is a strict ancestor of `objid`
pub fn is_ancestor(ancestor: &str, objid: &str) -> bool {
    objid.len() > ancestor.len()
        && objid.starts_with(ancestor)
        && objid[ancestor.len()..].starts_with(OBJID_SEPARATOR)
}

pub fn parent_of(objid: &str) -> Option<&str> {
    objid.rfind(OBJID_SEPARATOR).map(|pos| &objid[..pos])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_objid() {
        assert_eq!(child_of(None, "abc"), "abc");
        assert_eq!(child_of(Some("abc"), "def"), "abc//def");
        assert_eq!(child_of(Some("abc//def"), "ghi"), "abc//def//ghi");
    }

    #[test]
    fn test_ancestry_is_segment_aware() {
        assert!(is_ancestor("abc", "abc//def"));
        assert!(is_ancestor("abc", "abc//def//ghi"));
        assert!(!is_ancestor("abc", "abcd//ef"));
        assert!(!is_ancestor("abc", "abc"));
        assert!(!is_ancestor("abc//def", "abc"));
    }

    #[test]
    fn test_parent_and_depth() {
        assert_eq!(parent_of("a//b//c"), Some("a//b"));
        assert_eq!(parent_of("a"), None);
        assert_eq!(depth("a//b//c"), 3);
        assert_eq!(new_segment().len(), 12);
    }
}
