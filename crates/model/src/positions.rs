use serde::{Deserialize, Serialize};

/// One decoded source-position entry: a machine-code offset mapped back to
/// a source offset, plus the inline-tree entry it belongs to (−1 = the
/// position is not inlined).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionEntry {
    pub code_offset: u32,
    pub source_offset: i32,
    pub inline_index: i32,
}

/// Decoded source-position table for one JS code object.
///
/// Entries are monotonically non-decreasing by `code_offset` by
/// construction from the encoder, which is what makes the floor lookup a
/// plain binary search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionTable {
    pub entries: Vec<PositionEntry>,
}

impl PositionTable {
    /// The entry with the greatest `code_offset` ≤ `code_offset` (floor
    /// semantics). Targets before the first entry return the first entry;
    /// targets past the last return the last. `None` only when empty.
    pub fn floor_entry(&self, code_offset: u32) -> Option<&PositionEntry> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = self
            .entries
            .partition_point(|e| e.code_offset <= code_offset);
        // partition_point == 0 means the target precedes all entries.
        Some(&self.entries[idx.saturating_sub(1)])
    }
}

/// One decoded inline-tree entry: which function was inlined, at what
/// source offset, under which parent entry (−1 = inlined directly into
/// the outer function).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineEntry {
    /// Index into the code object's inlined-function id list.
    pub function_index: i32,
    pub source_offset: i32,
    /// Index of the parent inline entry; strictly less than this entry's
    /// own index, so the entries form a forest.
    pub parent_index: i32,
}

/// Decoded inline tree for one JS code object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineTable {
    pub entries: Vec<InlineEntry>,
    /// Function ids referenced by `InlineEntry::function_index`.
    pub functions: Vec<u32>,
}
