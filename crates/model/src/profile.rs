use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::call_frame::FrameTable;
use crate::call_tree::CallTree;
use crate::code::{CodeEntry, FunctionInfo, UnattributedIc};
use crate::shared_str::SharedStr;

/// VM state sampled with each tick, decoded from the numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmState {
    Js,
    Gc,
    Parser,
    BytecodeCompiler,
    Compiler,
    Other,
    External,
    AtomicsWait,
    Idle,
    Logging,
}

impl VmState {
    pub fn from_code(code: u64) -> VmState {
        match code {
            0 => VmState::Js,
            1 => VmState::Gc,
            2 => VmState::Parser,
            3 => VmState::BytecodeCompiler,
            4 => VmState::Compiler,
            5 => VmState::Other,
            6 => VmState::External,
            7 => VmState::AtomicsWait,
            8 => VmState::Idle,
            9 => VmState::Logging,
            _ => VmState::Other,
        }
    }
}

/// One resolved stack slot: the owning code id and the offset within it,
/// or the raw address with a −1 sentinel when no code owned the address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSlot {
    /// Logical code id, or −1 when unresolved.
    pub code: i32,
    /// Offset within the code object, or the raw address when unresolved.
    pub offset: u64,
}

impl StackSlot {
    pub fn resolved(code: u32, offset: u64) -> StackSlot {
        StackSlot {
            code: code as i32,
            offset,
        }
    }

    pub fn unresolved(address: u64) -> StackSlot {
        StackSlot {
            code: -1,
            offset: address,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.code >= 0
    }
}

/// One timestamped stack snapshot. The stack is leaf-first: index 0 is
/// the sampled program counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: u64,
    pub vm_state: VmState,
    pub stack: Vec<StackSlot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeapEventKind {
    New,
    Delete,
}

/// A memory-chunk allocation or free. Timestamps start at 0 and are
/// back-filled from the next timestamp-bearing log event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeapEvent {
    pub kind: HeapEventKind,
    pub timestamp: u64,
    pub address: u64,
    pub size: u64,
}

/// A source file identity. The source text may be empty when the log
/// carried no `script-source` record for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub id: i32,
    pub url: SharedStr,
    pub source: String,
}

/// Engine and session metadata accumulated from header records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineMeta {
    pub version: Option<String>,
    pub platform: Option<String>,
    /// Sampling interval in microseconds, from `profiler,begin`.
    pub sampling_interval: Option<u64>,
    pub heap_capacity: Option<u64>,
    pub heap_available: Option<u64>,
}

/// Non-fatal decode diagnostics. A consumer can summarize these ("N lines
/// ignored") without wiring up a logger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Opcodes seen but not understood.
    pub ignored_ops: BTreeSet<String>,
    /// Raw lines carrying those opcodes.
    pub ignored_lines: Vec<String>,
}

/// Terminal output of the log event processor: every structured record
/// reconstructed from one engine log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineProfile {
    pub meta: EngineMeta,
    /// Append-only; index = logical code id.
    pub codes: Vec<CodeEntry>,
    pub functions: Vec<FunctionInfo>,
    /// Dense by script id; `None` for ids never seen.
    pub scripts: Vec<Option<Script>>,
    pub ticks: Vec<Tick>,
    pub heap_events: Vec<HeapEvent>,
    pub unattributed_ics: Vec<UnattributedIc>,
    pub diagnostics: Diagnostics,
}

impl EngineProfile {
    pub fn code(&self, id: u32) -> Option<&CodeEntry> {
        self.codes.get(id as usize)
    }

    pub fn function(&self, id: u32) -> Option<&FunctionInfo> {
        self.functions.get(id as usize)
    }

    pub fn script(&self, id: i32) -> Option<&Script> {
        if id < 0 {
            return None;
        }
        self.scripts.get(id as usize).and_then(Option::as_ref)
    }
}

/// The original trace format — informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceFormat {
    /// Line-oriented engine execution log.
    EngineLog,
    /// Structured JSON call-tree snapshot.
    Snapshot,
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EngineLog => write!(f, "engine log"),
            Self::Snapshot => write!(f, "snapshot"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileMeta {
    pub format: SourceFormat,
    /// Timestamp of the first sample-bearing event, microseconds.
    pub start_time: f64,
    /// Timestamp of the last sample, microseconds.
    pub end_time: f64,
}

/// The unified queryable output both trace formats produce: interned call
/// frames plus the folded call tree with per-sample attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub meta: ProfileMeta,
    pub frames: FrameTable,
    pub tree: CallTree,
}

impl Profile {
    pub fn duration(&self) -> f64 {
        self.meta.end_time - self.meta.start_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vm_state_codes() {
        assert_eq!(VmState::from_code(0), VmState::Js);
        assert_eq!(VmState::from_code(1), VmState::Gc);
        assert_eq!(VmState::from_code(8), VmState::Idle);
        assert_eq!(VmState::from_code(99), VmState::Other);
    }

    #[test]
    fn stack_slot_sentinel() {
        let hit = StackSlot::resolved(3, 5);
        assert!(hit.is_resolved());
        let miss = StackSlot::unresolved(0xdead);
        assert!(!miss.is_resolved());
        assert_eq!(miss.code, -1);
        assert_eq!(miss.offset, 0xdead);
    }

    #[test]
    fn script_lookup_is_none_for_gaps() {
        let profile = EngineProfile {
            scripts: vec![
                None,
                Some(Script {
                    id: 1,
                    url: "a.js".into(),
                    source: String::new(),
                }),
            ],
            ..EngineProfile::default()
        };
        assert!(profile.script(0).is_none());
        assert!(profile.script(-1).is_none());
        assert_eq!(profile.script(1).map(|s| s.id), Some(1));
        assert!(profile.script(7).is_none());
    }
}
