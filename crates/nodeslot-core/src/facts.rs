//! Discovered topology facts.
//!
//! Topology discovery runs outside this workspace and hands over a tree of
//! objects (machine, sockets, NUMA nodes, cores, processing units) with the
//! memory sizes and allowed-unit sets it found. The allocator copies what it
//! needs out of this tree once, at construction time.

use std::path::Path;

use anyhow::Context;

use serde::{Deserialize, Serialize};

use crate::device::PciDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Machine,
    Socket,
    NumaNode,
    /// Caches, groups and other levels the allocator does not model.
    Group,
    Core,
    Pu,
}

/// One object in the discovered topology tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyObject {
    pub kind: ObjectKind,
    #[serde(default)]
    pub logical_index: u32,
    #[serde(default)]
    pub os_index: u32,
    /// Memory local to this object in KiB (NUMA nodes).
    #[serde(default)]
    pub local_memory_kb: u64,
    /// Memory of this object and its children in KiB.
    #[serde(default)]
    pub total_memory_kb: u64,
    /// Allowed processing units, in range/list format.
    #[serde(default)]
    pub allowed_cpuset: String,
    /// Allowed NUMA nodes, in range/list format.
    #[serde(default)]
    pub allowed_nodeset: String,
    #[serde(default)]
    pub children: Vec<TopologyObject>,
}

/// Everything topology and device discovery reported for one machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyFacts {
    pub root: TopologyObject,
    #[serde(default)]
    pub accelerators: Vec<PciDevice>,
}

impl TopologyFacts {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let facts: TopologyFacts = serde_json::from_str(&content)
            .with_context(|| format!("parsing topology facts {}", path.display()))?;
        Ok(facts)
    }
}

impl TopologyObject {
    pub fn new(kind: ObjectKind, logical_index: u32) -> Self {
        Self {
            kind,
            logical_index,
            os_index: logical_index,
            local_memory_kb: 0,
            total_memory_kb: 0,
            allowed_cpuset: String::new(),
            allowed_nodeset: String::new(),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<TopologyObject>) -> Self {
        self.children = children;
        self
    }

    /// Depth of the first object of `kind` in depth-first order, with this
    /// object at depth 0.
    pub fn depth_of(&self, kind: ObjectKind) -> Option<usize> {
        self.walk()
            .into_iter()
            .find(|(_, obj)| obj.kind == kind)
            .map(|(depth, _)| depth)
    }

    /// All objects of `kind` in this subtree, in depth-first order.
    pub fn descendants(&self, kind: ObjectKind) -> Vec<&TopologyObject> {
        self.walk()
            .into_iter()
            .filter(|(_, obj)| obj.kind == kind)
            .map(|(_, obj)| obj)
            .collect()
    }

    pub fn count(&self, kind: ObjectKind) -> usize {
        self.descendants(kind).len()
    }

    /// The chain of objects from this one down to `target`, inclusive.
    ///
    /// Identity is by address, so `target` must be borrowed from this tree.
    pub fn path_to<'a>(&'a self, target: &TopologyObject) -> Option<Vec<&'a TopologyObject>> {
        if std::ptr::eq(self, target) {
            return Some(vec![self]);
        }
        for child in &self.children {
            if let Some(mut path) = child.path_to(target) {
                path.insert(0, self);
                return Some(path);
            }
        }
        None
    }

    /// OS indices of every processing unit under this object.
    pub fn pu_indices(&self) -> Vec<u32> {
        self.descendants(ObjectKind::Pu)
            .into_iter()
            .map(|pu| pu.os_index)
            .collect()
    }

    fn walk(&self) -> Vec<(usize, &TopologyObject)> {
        let mut out = Vec::new();
        let mut stack = vec![(0usize, self)];
        while let Some((depth, obj)) = stack.pop() {
            out.push((depth, obj));
            for child in obj.children.iter().rev() {
                stack.push((depth + 1, child));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core(index: u32, pus: &[u32]) -> TopologyObject {
        TopologyObject::new(ObjectKind::Core, index).with_children(
            pus.iter()
                .map(|&pu| TopologyObject::new(ObjectKind::Pu, pu))
                .collect(),
        )
    }

    fn sample() -> TopologyObject {
        TopologyObject::new(ObjectKind::Machine, 0).with_children(vec![
            TopologyObject::new(ObjectKind::Socket, 0).with_children(vec![
                TopologyObject::new(ObjectKind::NumaNode, 0)
                    .with_children(vec![core(0, &[0, 4]), core(1, &[1, 5])]),
            ]),
        ])
    }

    #[test]
    fn depth_and_counts() {
        let root = sample();
        assert_eq!(root.depth_of(ObjectKind::Machine), Some(0));
        assert_eq!(root.depth_of(ObjectKind::Socket), Some(1));
        assert_eq!(root.depth_of(ObjectKind::NumaNode), Some(2));
        assert_eq!(root.depth_of(ObjectKind::Group), None);
        assert_eq!(root.count(ObjectKind::Core), 2);
        assert_eq!(root.count(ObjectKind::Pu), 4);
    }

    #[test]
    fn pu_indices_follow_tree_order() {
        assert_eq!(sample().pu_indices(), vec![0, 4, 1, 5]);
    }

    #[test]
    fn path_to_finds_ancestors() {
        let root = sample();
        let cores = root.descendants(ObjectKind::Core);
        let path = root.path_to(cores[1]).unwrap();
        let kinds: Vec<_> = path.iter().map(|o| o.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ObjectKind::Machine,
                ObjectKind::Socket,
                ObjectKind::NumaNode,
                ObjectKind::Core
            ]
        );
    }

    #[test]
    fn parses_minimal_json() {
        let json = r#"{
            "root": { "kind": "machine", "total_memory_kb": 1024,
                      "children": [ { "kind": "socket" } ] },
            "accelerators": [ { "name": "gpu", "id": 0, "kind": "gpu", "nearest_chip": 0 } ]
        }"#;
        let facts: TopologyFacts = serde_json::from_str(json).unwrap();
        assert_eq!(facts.root.total_memory_kb, 1024);
        assert_eq!(facts.root.count(ObjectKind::Socket), 1);
        assert_eq!(facts.accelerators[0].nearest_chip, Some(0));
    }

    #[test]
    fn missing_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent");
        let err = TopologyFacts::from_file(&path).unwrap_err();
        assert!(err.to_string().contains(&path.display().to_string()));
    }
}
