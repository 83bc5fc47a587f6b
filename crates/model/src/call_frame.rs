use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::shared_str::SharedStr;

/// A deduplicated logical stack entry.
///
/// Two stack positions with identical fields resolve to the same frame
/// index in a [`FrameTable`]. Line and column are 0-based; −1 means
/// unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallFrame {
    pub name: SharedStr,
    pub url: SharedStr,
    pub line: i32,
    pub column: i32,
    pub script_id: i32,
    /// Index into the function list, for frames backed by a source-level
    /// function.
    pub function_id: Option<u32>,
}

impl CallFrame {
    /// A synthetic frame with no source location, e.g. `(root)` or
    /// `(garbage collector)`.
    pub fn synthetic(name: impl Into<SharedStr>) -> CallFrame {
        CallFrame {
            name: name.into(),
            url: SharedStr::default(),
            line: -1,
            column: -1,
            script_id: -1,
            function_id: None,
        }
    }
}

/// Interning table for call frames.
///
/// Index 0 is always the `(root)` sentinel. The reverse index is not
/// serialized; [`FrameTable::rebuild_index`] restores it after
/// deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameTable {
    frames: Vec<CallFrame>,
    #[serde(skip)]
    index: HashMap<CallFrame, u32>,
}

/// Frame index of the root sentinel.
pub const ROOT_FRAME: u32 = 0;

impl FrameTable {
    pub fn new() -> FrameTable {
        let mut table = FrameTable {
            frames: Vec::new(),
            index: HashMap::new(),
        };
        table.intern(CallFrame::synthetic("(root)"));
        table
    }

    /// Return the index for `frame`, inserting it if unseen.
    pub fn intern(&mut self, frame: CallFrame) -> u32 {
        if let Some(&idx) = self.index.get(&frame) {
            return idx;
        }
        let idx = self.frames.len() as u32;
        self.index.insert(frame.clone(), idx);
        self.frames.push(frame);
        idx
    }

    pub fn get(&self, idx: u32) -> Option<&CallFrame> {
        self.frames.get(idx as usize)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CallFrame> {
        self.frames.iter()
    }

    /// Restore the reverse index after deserialization.
    pub fn rebuild_index(&mut self) {
        self.index = self
            .frames
            .iter()
            .enumerate()
            .map(|(i, f)| (f.clone(), i as u32))
            .collect();
    }
}

impl Default for FrameTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_index_zero() {
        let table = FrameTable::new();
        assert_eq!(table.get(ROOT_FRAME).map(|f| f.name.as_str()), Some("(root)"));
    }

    #[test]
    fn interning_dedups() {
        let mut table = FrameTable::new();
        let frame = CallFrame {
            name: "foo".into(),
            url: "file.js".into(),
            line: 0,
            column: 0,
            script_id: 1,
            function_id: Some(0),
        };
        let a = table.intern(frame.clone());
        let b = table.intern(frame);
        assert_eq!(a, b);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn distinct_locations_are_distinct_frames() {
        let mut table = FrameTable::new();
        let a = table.intern(CallFrame {
            name: "foo".into(),
            url: "file.js".into(),
            line: 0,
            column: 0,
            script_id: 1,
            function_id: None,
        });
        let b = table.intern(CallFrame {
            name: "foo".into(),
            url: "file.js".into(),
            line: 3,
            column: 0,
            script_id: 1,
            function_id: None,
        });
        assert_ne!(a, b);
    }

    #[test]
    fn index_survives_roundtrip() {
        let mut table = FrameTable::new();
        table.intern(CallFrame::synthetic("(garbage collector)"));
        let json = serde_json::to_string(&table).unwrap_or_default();
        let mut back: FrameTable = match serde_json::from_str(&json) {
            Ok(t) => t,
            Err(_) => FrameTable::new(),
        };
        back.rebuild_index();
        assert_eq!(back.len(), 2);
        assert_eq!(back.intern(CallFrame::synthetic("(garbage collector)")), 1);
    }
}
