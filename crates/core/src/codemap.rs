//! Address-to-code resolution under a live stream of code creation, move
//! and delete events.
//!
//! The map owns the append-only code list while decoding; every lookup is
//! a floor search over a sorted index, since `find_by_address` runs once
//! per stack frame per sample and profiles contain millions of samples.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use log::warn;

use tickscope_model::{Code, CodeEntry, StackSlot};

use crate::parsers::logfile::tokenizer::parse_int;

const PAGE_BITS: u32 = 12;

/// Mutable index of which logical code object currently owns which
/// address range. Owned by exactly one decode session.
#[derive(Debug, Default)]
pub struct CodeMap {
    /// Append-only; index = logical code id. Entries are never removed,
    /// only superseded in the address index.
    codes: Vec<CodeEntry>,
    /// Dynamic (JIT) code, keyed by current start address.
    dynamic: BTreeMap<u64, u32>,
    /// Statically-known ranges: shared libraries and their C++ symbols.
    statics: BTreeMap<u64, u32>,
    /// Pages covered by static code, to tell "inside a library" apart
    /// from "truly unknown" for unresolved addresses.
    library_pages: BTreeSet<u64>,
}

impl CodeMap {
    pub fn new() -> CodeMap {
        CodeMap::default()
    }

    /// Register dynamic code at `start`, superseding whatever the index
    /// held at that exact address. Stale entries partially covered by the
    /// new range keep their keys until those addresses are reused; only
    /// the floor lookup decides ownership.
    pub fn add_code(&mut self, start: u64, size: u64, code: Code) -> u32 {
        let id = self.push_entry(start, size, code);
        self.dynamic.insert(start, id);
        id
    }

    /// Register a static range (a shared library or a C++ symbol inside
    /// one). Library ranges also mark their pages as covered.
    pub fn add_static(&mut self, start: u64, size: u64, code: Code) -> u32 {
        let is_library = matches!(code, Code::SharedLib { .. });
        let id = self.push_entry(start, size, code);
        self.statics.insert(start, id);
        if is_library && size > 0 {
            let last = start.saturating_add(size - 1);
            for page in (start >> PAGE_BITS)..=(last >> PAGE_BITS) {
                self.library_pages.insert(page);
            }
        }
        id
    }

    fn push_entry(&mut self, start: u64, size: u64, code: Code) -> u32 {
        let id = self.codes.len() as u32;
        self.codes.push(CodeEntry {
            id,
            start,
            size,
            code,
        });
        id
    }

    /// Re-key a dynamic entry from `from` to `to`. The entry keeps its
    /// logical id and payload. A missing source is a non-fatal diagnostic.
    pub fn move_code(&mut self, from: u64, to: u64) {
        match self.dynamic.remove(&from) {
            Some(id) => {
                self.codes[id as usize].start = to;
                self.dynamic.insert(to, id);
            }
            None => warn!("code-move from {from:#x}: no code at source address"),
        }
    }

    /// The entry owning `address`, with the offset within it.
    pub fn find_by_address(&self, address: u64) -> Option<(u32, u64)> {
        self.find_in(&self.dynamic, address)
            .or_else(|| self.find_in(&self.statics, address))
    }

    fn find_in(&self, index: &BTreeMap<u64, u32>, address: u64) -> Option<(u32, u64)> {
        let (_, &id) = index.range(..=address).next_back()?;
        let entry = &self.codes[id as usize];
        entry.contains(address).then(|| (id, address - entry.start))
    }

    /// Whether an address falls on a page covered by static library code.
    /// Unresolved addresses on covered pages are library-internal rather
    /// than truly unknown.
    pub fn is_library_address(&self, address: u64) -> bool {
        self.library_pages.contains(&(address >> PAGE_BITS))
    }

    pub fn code(&self, id: u32) -> Option<&CodeEntry> {
        self.codes.get(id as usize)
    }

    pub fn code_mut(&mut self, id: u32) -> Option<&mut CodeEntry> {
        self.codes.get_mut(id as usize)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Surrender the code list at the end of a decode.
    pub fn into_codes(self) -> Vec<CodeEntry> {
        self.codes
    }

    /// Resolve one sampled stack into (code id, offset) slots.
    ///
    /// `pc` is the innermost frame. `tos` is the top-of-stack hint; it
    /// joins the stack only when it points inside JS code, otherwise it
    /// is discarded. Raw frames encode either a `+`/`-` delta from the
    /// previous frame's address, an absolute address, or the literal
    /// overflow marker `o` (skipped).
    pub fn resolve_stack(&self, pc: u64, tos: Option<u64>, raw_frames: &[&str]) -> Vec<StackSlot> {
        let mut stack = Vec::with_capacity(raw_frames.len() + 2);
        stack.push(self.resolve(pc));

        if let Some(tos) = tos {
            let is_js = self
                .find_by_address(tos)
                .and_then(|(id, _)| self.code(id))
                .is_some_and(|entry| entry.code.is_js());
            if is_js {
                stack.push(self.resolve(tos));
            }
        }

        let mut prev = pc;
        for raw in raw_frames {
            if *raw == "o" {
                // Sample buffer overflow marker; nothing to resolve.
                continue;
            }
            let address = if raw.starts_with('+') || raw.starts_with('-') {
                match parse_int(raw) {
                    Some(delta) => prev.wrapping_add_signed(delta),
                    None => {
                        warn!("unparseable stack frame delta {raw:?}");
                        continue;
                    }
                }
            } else {
                match crate::parsers::logfile::tokenizer::parse_address(raw) {
                    Some(addr) => addr,
                    None => {
                        warn!("unparseable stack frame address {raw:?}");
                        continue;
                    }
                }
            };
            prev = address;
            stack.push(self.resolve(address));
        }
        stack
    }

    fn resolve(&self, address: u64) -> StackSlot {
        match self.find_by_address(address) {
            Some((id, offset)) => StackSlot::resolved(id, offset),
            None => StackSlot::unresolved(address),
        }
    }
}
