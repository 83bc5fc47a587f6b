//! Parser for the structured JSON call-tree snapshot format
//! (`nodes[]` / `samples[]` / `timeDeltas[]`).

use std::collections::HashMap;

use log::warn;
use serde::Deserialize;
use thiserror::Error;

use tickscope_model::{
    CallFrame, CallTree, FrameTable, Profile, ProfileMeta, ROOT_NODE, SourceFormat,
};

use crate::aggregate::compute_totals;

#[derive(Debug, Error)]
pub enum SnapshotParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("missing or empty nodes")]
    MissingNodes,
}

/// Snapshot node. Trees are encoded either with `children` id arrays or
/// with per-node `parent` pointers; both are accepted.
#[derive(Debug, Deserialize)]
struct SnapshotNode {
    id: u64,
    #[serde(rename = "callFrame")]
    call_frame: SnapshotCallFrame,
    #[serde(default)]
    children: Option<Vec<u64>>,
    #[serde(default)]
    parent: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SnapshotCallFrame {
    #[serde(default, rename = "functionName")]
    function_name: String,
    #[serde(default, rename = "scriptId")]
    script_id: Option<NumberOrString>,
    #[serde(default)]
    url: Option<String>,
    /// Already 0-based in this format; no conversion applied.
    #[serde(default = "minus_one", rename = "lineNumber")]
    line_number: i64,
    #[serde(default = "minus_one", rename = "columnNumber")]
    column_number: i64,
}

fn minus_one() -> i64 {
    -1
}

/// Some producers write script ids as strings, others as numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(i64),
    String(String),
}

impl NumberOrString {
    fn as_i32(&self) -> i32 {
        match self {
            NumberOrString::Number(n) => *n as i32,
            NumberOrString::String(s) => s.parse().unwrap_or(-1),
        }
    }
}

/// Samples are node ids, or size-tagged objects for allocation profiles.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SnapshotSample {
    NodeId(u64),
    Tagged {
        #[serde(alias = "id", rename = "nodeId")]
        node_id: u64,
        #[serde(default)]
        #[allow(dead_code)]
        size: Option<f64>,
    },
}

impl SnapshotSample {
    fn node_id(&self) -> u64 {
        match self {
            SnapshotSample::NodeId(id) | SnapshotSample::Tagged { node_id: id, .. } => *id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    nodes: Vec<SnapshotNode>,
    #[serde(default, rename = "startTime")]
    start_time: f64,
    #[serde(default, rename = "endTime")]
    end_time: f64,
    #[serde(default)]
    samples: Vec<SnapshotSample>,
    #[serde(default, rename = "timeDeltas")]
    time_deltas: Vec<f64>,
}

/// Parse a JSON call-tree snapshot into a [`Profile`].
pub fn parse_snapshot(data: &[u8]) -> Result<Profile, SnapshotParseError> {
    let snapshot: Snapshot = serde_json::from_slice(data)?;
    if snapshot.nodes.is_empty() {
        return Err(SnapshotParseError::MissingNodes);
    }

    // Normalize parent pointers into children arrays: some producers
    // write only `parent`, and tree construction needs children.
    let mut children_of: HashMap<u64, Vec<u64>> = HashMap::new();
    let needs_synthesis = snapshot.nodes.iter().any(|n| n.children.is_none());
    for node in &snapshot.nodes {
        if let Some(children) = &node.children {
            children_of.entry(node.id).or_default().extend(children);
        }
        if needs_synthesis && let Some(parent) = node.parent {
            let entry = children_of.entry(parent).or_default();
            if !entry.contains(&node.id) {
                entry.push(node.id);
            }
        }
    }

    let node_by_id: HashMap<u64, &SnapshotNode> =
        snapshot.nodes.iter().map(|n| (n.id, n)).collect();
    let mut has_parent: HashMap<u64, bool> = HashMap::new();
    for ids in children_of.values() {
        for &id in ids {
            has_parent.insert(id, true);
        }
    }

    let mut frames = FrameTable::new();
    let mut tree = CallTree::new();
    // Snapshot node id → call-tree node id.
    let mut tree_ids: HashMap<u64, u32> = HashMap::new();

    // Iterative DFS from each root, in document order.
    let roots: Vec<u64> = snapshot
        .nodes
        .iter()
        .filter(|n| !has_parent.get(&n.id).copied().unwrap_or(false))
        .map(|n| n.id)
        .collect();

    let mut stack: Vec<(u64, u32)> = Vec::new();
    for &root_id in roots.iter().rev() {
        stack.push((root_id, ROOT_NODE));
    }
    while let Some((id, parent)) = stack.pop() {
        let Some(node) = node_by_id.get(&id) else {
            warn!("snapshot child id {id} has no node record");
            continue;
        };
        // The snapshot's own "(root)" node maps onto the sentinel
        // instead of nesting under it.
        let tree_id = if parent == ROOT_NODE && node.call_frame.function_name == "(root)" {
            ROOT_NODE
        } else {
            let frame = frames.intern(frame_of(&node.call_frame));
            tree.child_or_insert(parent, frame)
        };
        tree_ids.insert(id, tree_id);
        if let Some(children) = children_of.get(&id) {
            for &child in children.iter().rev() {
                stack.push((child, tree_id));
            }
        }
    }

    // Fold samples. Each delta is the time since the previous sample.
    for (i, sample) in snapshot.samples.iter().enumerate() {
        let delta = snapshot.time_deltas.get(i).copied().unwrap_or(0.0);
        match tree_ids.get(&sample.node_id()) {
            Some(&node) => tree.record_sample(node, delta),
            None => warn!("sample references unknown node {}", sample.node_id()),
        }
    }
    compute_totals(&mut tree);

    Ok(Profile {
        meta: ProfileMeta {
            format: SourceFormat::Snapshot,
            start_time: snapshot.start_time,
            end_time: snapshot.end_time,
        },
        frames,
        tree,
    })
}

fn frame_of(cf: &SnapshotCallFrame) -> CallFrame {
    let name = if cf.function_name.is_empty() {
        "(anonymous)"
    } else {
        &cf.function_name
    };
    CallFrame {
        name: name.into(),
        url: cf.url.as_deref().unwrap_or("").into(),
        line: cf.line_number as i32,
        column: cf.column_number as i32,
        script_id: cf.script_id.as_ref().map_or(-1, NumberOrString::as_i32),
        function_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Profile {
        match parse_snapshot(json.as_bytes()) {
            Ok(profile) => profile,
            Err(err) => panic!("parse failed: {err}"),
        }
    }

    #[test]
    fn parse_basic_snapshot() {
        let profile = parse(
            r#"{
            "nodes": [
                {"id":1,"callFrame":{"functionName":"(root)"},"children":[2]},
                {"id":2,"callFrame":{"functionName":"main","url":"app.js","lineNumber":3,"columnNumber":1,"scriptId":"7"},"children":[3]},
                {"id":3,"callFrame":{"functionName":"work","url":"app.js"},"children":[]}
            ],
            "startTime": 0,
            "endTime": 300,
            "samples": [3, 3, 2],
            "timeDeltas": [100, 100, 100]
        }"#,
        );
        assert_eq!(profile.meta.format, SourceFormat::Snapshot);
        // (root) sentinel + main + work.
        assert_eq!(profile.tree.nodes.len(), 3);
        assert_eq!(profile.tree.samples.len(), 3);

        let main_frame = profile
            .frames
            .iter()
            .find(|f| f.name == "main")
            .map(|f| (f.script_id, f.line));
        assert_eq!(main_frame, Some((7, 3)));

        assert_eq!(profile.tree.root().total_time, 300.0);
        let work_node = match profile.tree.node(profile.tree.samples[0]) {
            Some(n) => n,
            None => panic!("missing node"),
        };
        assert_eq!(work_node.self_time, 200.0);
    }

    #[test]
    fn parent_pointers_are_normalized() {
        let profile = parse(
            r#"{
            "nodes": [
                {"id":1,"callFrame":{"functionName":"(root)"}},
                {"id":2,"callFrame":{"functionName":"main"},"parent":1},
                {"id":3,"callFrame":{"functionName":"leaf"},"parent":2}
            ],
            "startTime": 0,
            "endTime": 100,
            "samples": [3],
            "timeDeltas": [100]
        }"#,
        );
        assert_eq!(profile.tree.nodes.len(), 3);
        let leaf = match profile.tree.node(profile.tree.samples[0]) {
            Some(n) => n,
            None => panic!("missing node"),
        };
        let leaf_frame = profile.frames.get(leaf.frame).map(|f| f.name.clone());
        assert_eq!(leaf_frame.as_deref(), Some("leaf"));
    }

    #[test]
    fn identical_call_frames_are_interned_once() {
        let profile = parse(
            r#"{
            "nodes": [
                {"id":1,"callFrame":{"functionName":"(root)"},"children":[2,3]},
                {"id":2,"callFrame":{"functionName":"a","url":"x.js"},"children":[4]},
                {"id":3,"callFrame":{"functionName":"b","url":"x.js"},"children":[5]},
                {"id":4,"callFrame":{"functionName":"shared","url":"x.js"},"children":[]},
                {"id":5,"callFrame":{"functionName":"shared","url":"x.js"},"children":[]}
            ],
            "startTime": 0,
            "endTime": 0,
            "samples": [],
            "timeDeltas": []
        }"#,
        );
        // Frames: root, a, b, shared — the two "shared" nodes intern to
        // one frame but stay two tree nodes (different parents).
        assert_eq!(profile.frames.len(), 4);
        assert_eq!(profile.tree.nodes.len(), 5);
    }

    #[test]
    fn tagged_allocation_samples() {
        let profile = parse(
            r#"{
            "nodes": [
                {"id":1,"callFrame":{"functionName":"(root)"},"children":[2]},
                {"id":2,"callFrame":{"functionName":"alloc"},"children":[]}
            ],
            "startTime": 0,
            "endTime": 10,
            "samples": [{"nodeId":2,"size":1024}],
            "timeDeltas": [10]
        }"#,
        );
        assert_eq!(profile.tree.samples.len(), 1);
    }

    #[test]
    fn empty_nodes_errors() {
        let result = parse_snapshot(br#"{"nodes":[],"startTime":0,"endTime":0}"#);
        assert!(matches!(result, Err(SnapshotParseError::MissingNodes)));
    }
}
