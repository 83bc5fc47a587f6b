//! Codec for the compact source-position and inline-tree tables attached
//! to JS code objects by `code-source-info` records.
//!
//! The encoding is a token string: `C<int>` (or `F<int>` for inline
//! tables) starts a new entry, `O<int>` supplies the paired offset, and
//! an optional trailing `I<int>` supplies the inline/parent index.
//! Absence of `I` before the next starter or end of string means "not
//! inlined" (−1).

use log::warn;

use tickscope_model::{InlineEntry, InlineTable, PositionEntry, PositionTable};

/// Decode a `C`/`O`/`I` position table.
pub fn decode_position_table(encoded: &str) -> PositionTable {
    let mut entries: Vec<PositionEntry> = Vec::new();
    for (marker, value) in Tokens::new(encoded) {
        match marker {
            'C' => entries.push(PositionEntry {
                code_offset: value.max(0) as u32,
                source_offset: 0,
                inline_index: -1,
            }),
            'O' => {
                if let Some(last) = entries.last_mut() {
                    last.source_offset = value as i32;
                }
            }
            'I' => {
                if let Some(last) = entries.last_mut() {
                    last.inline_index = value as i32;
                }
            }
            other => {
                warn!("unknown position-table token {other:?} in {encoded:?}");
            }
        }
    }
    PositionTable { entries }
}

/// Re-encode a position table. Inverse of [`decode_position_table`];
/// producers and round-trip tests use it.
pub fn encode_position_table(table: &PositionTable) -> String {
    let mut out = String::new();
    for entry in &table.entries {
        out.push('C');
        out.push_str(&entry.code_offset.to_string());
        out.push('O');
        out.push_str(&entry.source_offset.to_string());
        if entry.inline_index >= 0 {
            out.push('I');
            out.push_str(&entry.inline_index.to_string());
        }
    }
    out
}

/// Decode an `F`/`O`/`I` inline tree.
///
/// `functions` are the resolved function ids the entries index into. An
/// entry with a negative function index is dropped with a warning;
/// decoding continues.
pub fn decode_inline_table(encoded: &str, functions: Vec<u32>) -> InlineTable {
    let mut entries: Vec<InlineEntry> = Vec::new();
    let mut dropped = false;
    for (marker, value) in Tokens::new(encoded) {
        match marker {
            'F' => {
                dropped = value < 0;
                if dropped {
                    warn!("inline entry with negative function index in {encoded:?}, dropped");
                    continue;
                }
                entries.push(InlineEntry {
                    function_index: value as i32,
                    source_offset: 0,
                    parent_index: -1,
                });
            }
            'O' if !dropped => {
                if let Some(last) = entries.last_mut() {
                    last.source_offset = value as i32;
                }
            }
            'I' if !dropped => {
                if let Some(last) = entries.last_mut() {
                    last.parent_index = value as i32;
                }
            }
            'O' | 'I' => {}
            other => {
                warn!("unknown inline-table token {other:?} in {encoded:?}");
            }
        }
    }
    InlineTable { entries, functions }
}

/// Scanner over `<marker><int>` tokens. Integers may be negative.
struct Tokens<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn new(encoded: &'a str) -> Tokens<'a> {
        Tokens {
            bytes: encoded.as_bytes(),
            pos: 0,
        }
    }
}

impl Iterator for Tokens<'_> {
    type Item = (char, i64);

    fn next(&mut self) -> Option<(char, i64)> {
        let marker = *self.bytes.get(self.pos)? as char;
        self.pos += 1;

        let negative = self.bytes.get(self.pos) == Some(&b'-');
        if negative {
            self.pos += 1;
        }
        let start = self.pos;
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_digit())
        {
            self.pos += 1;
        }
        let digits = &self.bytes[start..self.pos];
        let mut value: i64 = 0;
        for &b in digits {
            value = value * 10 + i64::from(b - b'0');
        }
        if negative {
            value = -value;
        }
        Some((marker, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_spec_example() {
        let table = decode_position_table("C0O5C10O20I0");
        let triples: Vec<(u32, i32, i32)> = table
            .entries
            .iter()
            .map(|e| (e.code_offset, e.source_offset, e.inline_index))
            .collect();
        assert_eq!(triples, vec![(0, 5, -1), (10, 20, 0)]);
    }

    #[test]
    fn round_trip() {
        let encoded = "C0O5C10O20I0";
        let table = decode_position_table(encoded);
        assert_eq!(encode_position_table(&table), encoded);
    }

    #[test]
    fn floor_search_on_decoded_table() {
        let table = decode_position_table("C0O5C10O20I0");
        assert_eq!(table.floor_entry(7).map(|e| e.code_offset), Some(0));
        assert_eq!(table.floor_entry(10).map(|e| e.code_offset), Some(10));
        // Before all entries: first. Past the end: last.
        assert_eq!(table.floor_entry(0).map(|e| e.source_offset), Some(5));
        assert_eq!(table.floor_entry(u32::MAX).map(|e| e.code_offset), Some(10));
    }

    #[test]
    fn decode_inline_forest() {
        let table = decode_inline_table("F0O10F1O20I0", vec![3, 7]);
        assert_eq!(table.entries.len(), 2);
        assert_eq!(table.entries[0].function_index, 0);
        assert_eq!(table.entries[0].parent_index, -1);
        assert_eq!(table.entries[1].function_index, 1);
        assert_eq!(table.entries[1].parent_index, 0);
        assert_eq!(table.functions, vec![3, 7]);
    }

    #[test]
    fn negative_function_index_is_dropped() {
        let table = decode_inline_table("F-1O10F1O20", vec![3, 7]);
        assert_eq!(table.entries.len(), 1);
        assert_eq!(table.entries[0].function_index, 1);
        assert_eq!(table.entries[0].source_offset, 20);
    }

    #[test]
    fn negative_source_offsets_decode() {
        let table = decode_position_table("C4O-1");
        assert_eq!(table.entries[0].source_offset, -1);
    }

    #[test]
    fn empty_string_decodes_empty() {
        assert!(decode_position_table("").entries.is_empty());
    }
}
