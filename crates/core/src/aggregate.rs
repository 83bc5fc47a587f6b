//! Timing rollups over the call tree: per-node totals, group-level
//! aggregation (module/package/category), and a flat ranked view.
//!
//! Grouping policy stays with the caller: a classifier maps call frames
//! to group keys and this module only folds the tree under it.

use std::collections::HashMap;
use std::hash::Hash;

use tickscope_model::{CallFrame, CallTree, CallTreeNode, FrameTable, SharedStr};

/// Fill in `total_time` for every node: self time plus the children's
/// totals, so the root's total equals the sum of all sample deltas.
pub fn compute_totals(tree: &mut CallTree) {
    // Children are always appended after their parent, so one reverse
    // pass sees every child before its parent.
    for id in (0..tree.nodes.len()).rev() {
        let children = tree.nodes[id].children.clone();
        let child_total: f64 = children
            .iter()
            .map(|&c| tree.nodes[c as usize].total_time)
            .sum();
        let node = &mut tree.nodes[id];
        node.total_time = node.self_time + child_total;
    }
}

/// One node of a re-aggregated (grouped) tree.
#[derive(Debug, Clone)]
pub struct GroupedNode<K> {
    pub key: K,
    pub self_time: f64,
    pub total_time: f64,
    /// How many call-tree nodes merged into this group node.
    pub nodes: u32,
    pub children: Vec<u32>,
}

/// The call tree re-aggregated by group key: siblings mapping to the
/// same key merge into one node, and a call re-entering a group it is
/// already inside merges into that open group node instead of nesting.
#[derive(Debug, Clone)]
pub struct GroupedTree<K> {
    pub nodes: Vec<GroupedNode<K>>,
    pub roots: Vec<u32>,
}

impl<K> GroupedTree<K> {
    pub fn node(&self, id: u32) -> Option<&GroupedNode<K>> {
        self.nodes.get(id as usize)
    }
}

/// Re-aggregate the tree by a frame classifier (module, package,
/// category…).
///
/// Only the outermost entry into a group contributes the node's total
/// time; recursive re-entries contribute self time only, which is what
/// keeps a group's total from double counting its own recursion.
pub fn grouped_tree<K, F>(tree: &CallTree, frames: &FrameTable, classify: F) -> GroupedTree<K>
where
    K: Eq + Hash + Clone,
    F: Fn(&CallFrame) -> K,
{
    let fallback = CallFrame::synthetic("(unknown)");
    fold_grouped(tree, |node| {
        classify(frames.get(node.frame).unwrap_or(&fallback))
    })
}

/// Flat rollup per group key, heaviest total first.
#[derive(Debug, Clone)]
pub struct GroupTotals<K> {
    pub key: K,
    pub self_time: f64,
    pub total_time: f64,
    pub nodes: u32,
}

pub fn group_totals<K, F>(tree: &CallTree, frames: &FrameTable, classify: F) -> Vec<GroupTotals<K>>
where
    K: Eq + Hash + Clone,
    F: Fn(&CallFrame) -> K,
{
    let grouped = grouped_tree(tree, frames, classify);
    rollup(&grouped)
}

/// A single row of the ranked per-frame view.
#[derive(Debug, Clone)]
pub struct RankedFrame {
    pub frame: u32,
    pub name: SharedStr,
    pub self_time: f64,
    pub total_time: f64,
    pub nodes: u32,
}

/// Aggregate the tree per call frame, heaviest self time first. Frames
/// appearing at several tree positions merge into one row; recursive
/// appearances follow the same outermost-entry rule as group rollups.
pub fn ranked_frames(tree: &CallTree, frames: &FrameTable) -> Vec<RankedFrame> {
    let grouped = fold_grouped(tree, |node| node.frame);
    let mut rows: Vec<RankedFrame> = rollup(&grouped)
        .into_iter()
        .map(|g| RankedFrame {
            frame: g.key,
            name: frames
                .get(g.key)
                .map(|f| f.name.clone())
                .unwrap_or_default(),
            self_time: g.self_time,
            total_time: g.total_time,
            nodes: g.nodes,
        })
        .collect();
    rows.sort_by(|a, b| b.self_time.total_cmp(&a.self_time));
    rows
}

fn rollup<K: Eq + Hash + Clone>(grouped: &GroupedTree<K>) -> Vec<GroupTotals<K>> {
    let mut by_key: HashMap<K, GroupTotals<K>> = HashMap::new();
    for node in &grouped.nodes {
        let entry = by_key
            .entry(node.key.clone())
            .or_insert_with(|| GroupTotals {
                key: node.key.clone(),
                self_time: 0.0,
                total_time: 0.0,
                nodes: 0,
            });
        entry.self_time += node.self_time;
        entry.total_time += node.total_time;
        entry.nodes += node.nodes;
    }
    let mut totals: Vec<GroupTotals<K>> = by_key.into_values().collect();
    totals.sort_by(|a, b| b.total_time.total_cmp(&a.total_time));
    totals
}

fn fold_grouped<K, F>(tree: &CallTree, key_of: F) -> GroupedTree<K>
where
    K: Eq + Hash + Clone,
    F: Fn(&CallTreeNode) -> K,
{
    let mut fold = Fold {
        tree,
        key_of,
        nodes: Vec::new(),
        roots: Vec::new(),
        active: HashMap::new(),
        child_index: HashMap::new(),
    };
    for &child in &tree.root().children {
        fold.visit(child, None);
    }
    GroupedTree {
        nodes: fold.nodes,
        roots: fold.roots,
    }
}

struct Fold<'a, K, F> {
    tree: &'a CallTree,
    key_of: F,
    nodes: Vec<GroupedNode<K>>,
    roots: Vec<u32>,
    /// Group node currently open for each key along the walk path; a
    /// node whose key is open is a recursive re-entry.
    active: HashMap<K, u32>,
    child_index: HashMap<(Option<u32>, K), u32>,
}

impl<K, F> Fold<'_, K, F>
where
    K: Eq + Hash + Clone,
    F: Fn(&CallTreeNode) -> K,
{
    fn visit(&mut self, node_id: u32, parent_group: Option<u32>) {
        let tree = self.tree;
        let Some(node) = tree.node(node_id) else {
            return;
        };
        let key = (self.key_of)(node);

        if let Some(&open) = self.active.get(&key) {
            // Re-entry into an open group: self time only, and the
            // subtree hangs off the open group node.
            let group = &mut self.nodes[open as usize];
            group.self_time += node.self_time;
            group.nodes += 1;
            for &child in &node.children {
                self.visit(child, Some(open));
            }
            return;
        }

        let group = self.group_for(parent_group, &key);
        {
            let g = &mut self.nodes[group as usize];
            g.self_time += node.self_time;
            g.total_time += node.total_time;
            g.nodes += 1;
        }
        self.active.insert(key.clone(), group);
        for &child in &node.children {
            self.visit(child, Some(group));
        }
        self.active.remove(&key);
    }

    fn group_for(&mut self, parent_group: Option<u32>, key: &K) -> u32 {
        if let Some(&id) = self.child_index.get(&(parent_group, key.clone())) {
            return id;
        }
        let id = self.nodes.len() as u32;
        self.nodes.push(GroupedNode {
            key: key.clone(),
            self_time: 0.0,
            total_time: 0.0,
            nodes: 0,
            children: Vec::new(),
        });
        match parent_group {
            Some(parent) => self.nodes[parent as usize].children.push(id),
            None => self.roots.push(id),
        }
        self.child_index.insert((parent_group, key.clone()), id);
        id
    }
}
