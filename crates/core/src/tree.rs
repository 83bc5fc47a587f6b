//! Folds the tick stream into a call tree of (parent, call frame)
//! identified nodes.

use tickscope_model::{CallTree, EngineProfile, ROOT_NODE, Tick, VmState};

use crate::frames::ResolvedFrames;

/// Build the call tree for a decoded profile, attributing every tick to
/// its terminal node.
pub fn build_tree(profile: &EngineProfile, frames: &ResolvedFrames) -> CallTree {
    let mut tree = CallTree::new();
    let mut previous_timestamp: u64 = 0;

    for tick in &profile.ticks {
        let delta = tick.timestamp.saturating_sub(previous_timestamp) as f64;
        previous_timestamp = tick.timestamp;

        let node = insert_sample(&mut tree, frames, tick);
        tree.record_sample(node, delta);
    }
    tree
}

fn insert_sample(tree: &mut CallTree, frames: &ResolvedFrames, tick: &Tick) -> u32 {
    // No reliable stack exists during GC or idle phases; the state bucket
    // replaces the stack instead of supplementing it.
    if matches!(tick.vm_state, VmState::Gc | VmState::Idle) {
        if let Some(frame) = frames.state_frame(tick.vm_state) {
            return tree.child_or_insert(ROOT_NODE, frame);
        }
        return ROOT_NODE;
    }

    // Sampled stacks are leaf-first; walk outermost-in. Unresolved slots
    // and low-level code collapse into their caller.
    let mut node = ROOT_NODE;
    for slot in tick.stack.iter().rev() {
        if !slot.is_resolved() {
            continue;
        }
        if let Some(frame) = frames.frame_for_code(slot.code as u32) {
            node = tree.child_or_insert(node, frame);
        }
    }

    // Non-JS states descend one synthetic level below the stack.
    if let Some(frame) = frames.state_frame(tick.vm_state) {
        node = tree.child_or_insert(node, frame);
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::resolve_frames;
    use crate::parsers::logfile::processor::LogDecoder;

    fn decode(lines: &[&str]) -> EngineProfile {
        let mut decoder = LogDecoder::new();
        for line in lines {
            if let Err(err) = decoder.process_line(line) {
                panic!("decode error: {err}");
            }
        }
        match decoder.finish() {
            Ok(profile) => profile,
            Err(err) => panic!("finish error: {err}"),
        }
    }

    #[test]
    fn shared_prefixes_reuse_nodes() {
        let profile = decode(&[
            "code-creation,JS,0,1,0x1000,64,outer a.js:1:1,0x5000,~",
            "code-creation,JS,0,2,0x2000,64,inner a.js:5:1,0x6000,~",
            // Three samples: outer→inner, outer→inner, outer. The frame
            // delta -0x1000 walks from the pc to the outer code.
            "tick,0x2010,100,0,0,0,-0x1000",
            "tick,0x2010,200,0,0,0,-0x1000",
            "tick,0x1010,300,0,0,0",
        ]);
        let frames = resolve_frames(&profile);
        let tree = build_tree(&profile, &frames);

        // Nodes: root, outer, inner — not one path per sample.
        assert_eq!(tree.nodes.len(), 3);
        assert_eq!(tree.samples.len(), 3);
        assert_eq!(tree.samples[0], tree.samples[1]);
        assert_ne!(tree.samples[0], tree.samples[2]);
    }

    #[test]
    fn gc_samples_skip_the_stack() {
        let profile = decode(&[
            "code-creation,JS,0,1,0x1000,64,outer a.js:1:1,0x5000,~",
            // vm_state 1 = GC; the stale stack must not be walked.
            "tick,0x1010,100,0,0,1,+0x10",
        ]);
        let frames = resolve_frames(&profile);
        let tree = build_tree(&profile, &frames);

        let gc_frame = frames.state_frame(VmState::Gc);
        let sample_node = match tree.node(tree.samples[0]) {
            Some(n) => n,
            None => panic!("missing sample node"),
        };
        assert_eq!(Some(sample_node.frame), gc_frame);
        assert_eq!(sample_node.parent, Some(ROOT_NODE));
    }

    #[test]
    fn non_js_state_descends_below_stack() {
        let profile = decode(&[
            "code-creation,JS,0,1,0x1000,64,outer a.js:1:1,0x5000,~",
            // vm_state 4 = compiler, with a JS frame on the stack.
            "tick,0x1010,100,0,0,4",
        ]);
        let frames = resolve_frames(&profile);
        let tree = build_tree(&profile, &frames);

        let node = match tree.node(tree.samples[0]) {
            Some(n) => n,
            None => panic!("missing sample node"),
        };
        assert_eq!(Some(node.frame), frames.state_frame(VmState::Compiler));
        let parent = match node.parent.and_then(|p| tree.node(p)) {
            Some(p) => p,
            None => panic!("missing parent"),
        };
        let outer_frame = frames.frame_for_code(0);
        assert_eq!(Some(parent.frame), outer_frame);
    }

    #[test]
    fn time_deltas_accumulate_as_self_time() {
        let profile = decode(&[
            "code-creation,JS,0,1,0x1000,64,outer a.js:1:1,0x5000,~",
            "tick,0x1010,100,0,0,0",
            "tick,0x1010,250,0,0,0",
        ]);
        let frames = resolve_frames(&profile);
        let tree = build_tree(&profile, &frames);

        assert_eq!(tree.time_deltas, vec![100.0, 150.0]);
        let node = match tree.node(tree.samples[0]) {
            Some(n) => n,
            None => panic!("missing sample node"),
        };
        assert_eq!(node.self_time, 250.0);
    }

    #[test]
    fn unresolved_slots_collapse() {
        let profile = decode(&[
            "code-creation,JS,0,1,0x1000,64,outer a.js:1:1,0x5000,~",
            "tick,0x1010,100,0,0,0,0xdeadbeef",
        ]);
        let frames = resolve_frames(&profile);
        let tree = build_tree(&profile, &frames);

        // Only root → outer; the unknown address contributed no level.
        assert_eq!(tree.nodes.len(), 2);
    }
}
