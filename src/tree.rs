//! Read-only hierarchical view of a container's resources, for presentation.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use crate::container::Container;
use crate::error::Result;
use crate::models::{Resource, ResourceFilter, ResourceKind};
use crate::state_machine::ResourceState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNode {
    pub id: i64,
    pub name: String,
    pub kind: ResourceKind,
    pub state: ResourceState,
    pub ext_id: Option<String>,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Number of nodes in this subtree, itself included
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TreeNode::size).sum::<usize>()
    }

    pub fn find(&self, id: i64) -> Option<&TreeNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResourceTreeBuilder {
    include_expunged: bool,
    kinds: Option<HashSet<ResourceKind>>,
}

impl ResourceTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include_expunged(mut self, include: bool) -> Self {
        self.include_expunged = include;
        self
    }

    /// Only keep these kinds; a dropped resource's children move up to its
    /// nearest kept ancestor
    pub fn kinds(mut self, kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub async fn build(&self, container: &Container) -> Result<Vec<TreeNode>> {
        let filter = ResourceFilter {
            include_expunged: self.include_expunged,
            ..Default::default()
        };
        let resources = container.list_resources(filter).await?;
        Ok(self.assemble(resources))
    }

    /// Arrange resources into trees; resources whose parent is absent become roots
    pub fn assemble(&self, resources: Vec<Resource>) -> Vec<TreeNode> {
        let by_id: HashMap<i64, &Resource> = resources.iter().map(|r| (r.id, r)).collect();
        let kept = |r: &Resource| self.kinds.as_ref().map_or(true, |k| k.contains(&r.kind));

        let mut children: HashMap<Option<i64>, Vec<&Resource>> = HashMap::new();
        for resource in resources.iter().filter(|r| kept(*r)) {
            let mut parent = resource.parent_id;
            // Walk up past parents that are filtered out or missing
            while let Some(id) = parent {
                match by_id.get(&id) {
                    Some(p) if kept(*p) => break,
                    Some(p) => parent = p.parent_id,
                    None => parent = None,
                }
            }
            children.entry(parent).or_default().push(resource);
        }
        for list in children.values_mut() {
            list.sort_by_key(|r| r.id);
        }

        fn node(resource: &Resource, children: &HashMap<Option<i64>, Vec<&Resource>>) -> TreeNode {
            TreeNode {
                id: resource.id,
                name: resource.name.clone(),
                kind: resource.kind,
                state: resource.state,
                ext_id: resource.ext_id.clone(),
                children: children
                    .get(&Some(resource.id))
                    .map(|list| list.iter().map(|c| node(c, children)).collect())
                    .unwrap_or_default(),
            }
        }

        children
            .get(&None)
            .map(|roots| roots.iter().map(|r| node(r, &children)).collect())
            .unwrap_or_default()
    }
}

/// Indented text rendering, one resource per line
pub fn render(roots: &[TreeNode]) -> String {
    fn line(out: &mut String, node: &TreeNode, depth: usize) {
        let _ = writeln!(
            out,
            "{}{} [{}] #{} {}{}",
            "  ".repeat(depth),
            node.name,
            node.kind,
            node.id,
            node.state,
            node.ext_id
                .as_deref()
                .map(|e| format!(" ({e})"))
                .unwrap_or_default()
        );
        for child in &node.children {
            line(out, child, depth + 1);
        }
    }

    let mut out = String::new();
    for root in roots {
        line(&mut out, root, 0);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::models::NewResource;
    use crate::remote::{SimulatedConnector, SimulatedPlatform};
    use crate::store::InMemoryStore;
    use std::sync::Arc;

    fn container() -> Container {
        Container::new(
            1,
            "openstack-tree",
            Arc::new(InMemoryStore::new()),
            Arc::new(SimulatedConnector::new(SimulatedPlatform::openstack())),
            ConnectionConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_tree_follows_parent_ids() {
        let c = container();
        let project = c.add_resource(NewResource::new("p", ResourceKind::Project)).await.unwrap();
        let net = c
            .add_resource(NewResource::new("net", ResourceKind::Network).with_parent(project.id))
            .await
            .unwrap();
        c.add_resource(NewResource::new("sub", ResourceKind::Subnet).with_parent(net.id))
            .await
            .unwrap();
        c.add_resource(NewResource::new("vol", ResourceKind::Volume).with_parent(project.id))
            .await
            .unwrap();
        c.add_resource(NewResource::new("loose", ResourceKind::Volume)).await.unwrap();

        let roots = ResourceTreeBuilder::new().build(&c).await.unwrap();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].id, project.id);
        assert_eq!(roots[0].size(), 4);
        assert_eq!(roots[0].find(net.id).map(|n| n.children.len()), Some(1));

        let text = render(&roots);
        assert!(text.starts_with("p [project]"));
        assert!(text.contains("\n    sub [subnet]"));
    }

    #[tokio::test]
    async fn test_kind_filter_lifts_children() {
        let c = container();
        let project = c.add_resource(NewResource::new("p", ResourceKind::Project)).await.unwrap();
        let net = c
            .add_resource(NewResource::new("net", ResourceKind::Network).with_parent(project.id))
            .await
            .unwrap();
        let sub = c
            .add_resource(NewResource::new("sub", ResourceKind::Subnet).with_parent(net.id))
            .await
            .unwrap();

        let roots = ResourceTreeBuilder::new()
            .kinds([ResourceKind::Project, ResourceKind::Subnet])
            .build(&c)
            .await
            .unwrap();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].children.iter().map(|n| n.id).collect::<Vec<_>>(), vec![sub.id]);
    }

    #[tokio::test]
    async fn test_expunged_resources_hidden_by_default() {
        let c = container();
        let vol = c.add_resource(NewResource::new("vol", ResourceKind::Volume)).await.unwrap();
        c.update_resource_state(vol.id, ResourceState::Deleting, None).await.unwrap();
        c.expunge_resource(vol.id, None).await.unwrap();

        assert!(ResourceTreeBuilder::new().build(&c).await.unwrap().is_empty());
        let all = ResourceTreeBuilder::new().include_expunged(true).build(&c).await.unwrap();
        assert_eq!(all[0].state, ResourceState::Expunged);
    }
}
