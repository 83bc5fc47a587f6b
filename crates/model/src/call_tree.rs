use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::call_frame::ROOT_FRAME;

/// One call-tree node, identified by its (parent, frame) pair: a parent
/// has at most one child per distinct call frame, so the tree grows with
/// the number of distinct call paths rather than the number of samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallTreeNode {
    pub id: u32,
    /// Index into the frame table.
    pub frame: u32,
    pub parent: Option<u32>,
    pub children: Vec<u32>,
    /// Sum of time deltas of samples terminating exactly at this node.
    pub self_time: f64,
    /// `self_time` plus the total time of all children.
    pub total_time: f64,
    /// frame index → child node id, for O(1) child lookup during folding.
    #[serde(skip)]
    child_index: HashMap<u32, u32>,
}

/// A call tree folded from per-sample stacks, with the sample → node
/// attribution that ties each tick to its terminal node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallTree {
    pub nodes: Vec<CallTreeNode>,
    /// Terminal node id of each sample, in tick order.
    pub samples: Vec<u32>,
    /// Time delta attributed to each sample, parallel to `samples`.
    pub time_deltas: Vec<f64>,
}

/// Node id of the root sentinel.
pub const ROOT_NODE: u32 = 0;

impl CallTree {
    /// A tree holding only the root sentinel node.
    pub fn new() -> CallTree {
        CallTree {
            nodes: vec![CallTreeNode {
                id: ROOT_NODE,
                frame: ROOT_FRAME,
                parent: None,
                children: Vec::new(),
                self_time: 0.0,
                total_time: 0.0,
                child_index: HashMap::new(),
            }],
            samples: Vec::new(),
            time_deltas: Vec::new(),
        }
    }

    pub fn node(&self, id: u32) -> Option<&CallTreeNode> {
        self.nodes.get(id as usize)
    }

    pub fn root(&self) -> &CallTreeNode {
        &self.nodes[ROOT_NODE as usize]
    }

    /// The child of `parent` for `frame`, if one exists.
    pub fn child(&self, parent: u32, frame: u32) -> Option<u32> {
        self.nodes
            .get(parent as usize)
            .and_then(|n| n.child_index.get(&frame).copied())
    }

    /// The child of `parent` for `frame`, creating it if absent.
    pub fn child_or_insert(&mut self, parent: u32, frame: u32) -> u32 {
        if let Some(id) = self.child(parent, frame) {
            return id;
        }
        let id = self.nodes.len() as u32;
        self.nodes.push(CallTreeNode {
            id,
            frame,
            parent: Some(parent),
            children: Vec::new(),
            self_time: 0.0,
            total_time: 0.0,
            child_index: HashMap::new(),
        });
        let parent_node = &mut self.nodes[parent as usize];
        parent_node.children.push(id);
        parent_node.child_index.insert(frame, id);
        id
    }

    /// Record one sample terminating at `node` with the given time delta.
    pub fn record_sample(&mut self, node: u32, delta: f64) {
        self.samples.push(node);
        self.time_deltas.push(delta);
        if let Some(n) = self.nodes.get_mut(node as usize) {
            n.self_time += delta;
        }
    }

    /// Restore the per-node child indexes after deserialization.
    pub fn rebuild_index(&mut self) {
        let links: Vec<(u32, u32, u32)> = self
            .nodes
            .iter()
            .filter_map(|n| n.parent.map(|p| (p, n.frame, n.id)))
            .collect();
        for node in &mut self.nodes {
            node.child_index.clear();
        }
        for (parent, frame, id) in links {
            self.nodes[parent as usize].child_index.insert(frame, id);
        }
    }
}

impl Default for CallTree {
    fn default() -> Self {
        Self::new()
    }
}
