use serde::{Deserialize, Serialize};

use crate::positions::{InlineTable, PositionTable};
use crate::shared_str::SharedStr;

/// JIT tier a JS code object was compiled at.
///
/// Decoded once from the trailing kind marker of a `code-creation` record
/// and never re-parsed from strings downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    /// `~` — bytecode running in the interpreter.
    Interpreter,
    /// `^` — baseline compiler output.
    Baseline,
    /// `+` — mid-tier optimizing compiler output.
    MidTier,
    /// `*` — top-tier optimizing compiler output.
    OptimizingTier,
    /// Empty marker — builtins and code compiled outside the tiering
    /// pipeline.
    Unknown,
}

impl Tier {
    /// Decode a kind marker into a tier plus the context-specialization
    /// flag (a trailing `'`).
    pub fn from_marker(marker: &str) -> (Tier, bool) {
        let specialized = marker.ends_with('\'');
        let tier = match marker.trim_end_matches('\'') {
            "~" => Tier::Interpreter,
            "^" => Tier::Baseline,
            "+" => Tier::MidTier,
            "*" => Tier::OptimizingTier,
            _ => Tier::Unknown,
        };
        (tier, specialized)
    }
}

/// Inline-cache state, decoded from the engine's single-character codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IcState {
    /// `X` — no feedback collected.
    NoFeedback,
    /// `0` — uninitialized.
    Uninitialized,
    /// `1` — monomorphic.
    Monomorphic,
    /// `^` — recompute handler.
    RecomputeHandler,
    /// `P` — polymorphic.
    Polymorphic,
    /// `N` — megamorphic.
    Megamorphic,
    /// `D` — megadom.
    Megadom,
    /// `G` — generic.
    Generic,
    /// Anything else.
    Unknown,
}

impl IcState {
    pub fn from_code(code: &str) -> IcState {
        match code {
            "X" => IcState::NoFeedback,
            "0" => IcState::Uninitialized,
            "1" => IcState::Monomorphic,
            "^" => IcState::RecomputeHandler,
            "P" => IcState::Polymorphic,
            "N" => IcState::Megamorphic,
            "D" => IcState::Megadom,
            "G" => IcState::Generic,
            _ => IcState::Unknown,
        }
    }
}

/// Which inline-cache site produced an [`IcEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IcKind {
    LoadIc,
    StoreIc,
    KeyedLoadIc,
    KeyedStoreIc,
    LoadGlobalIc,
    StoreGlobalIc,
    StoreInArrayLiteralIc,
}

/// One inline-cache state transition observed at an offset within a JS
/// code object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcEntry {
    pub kind: IcKind,
    pub timestamp: u64,
    /// Offset of the IC site within the owning code object.
    pub offset: u64,
    pub old_state: IcState,
    pub new_state: IcState,
    /// Raw map address the IC observed.
    pub map: u64,
    pub key: SharedStr,
    pub modifier: SharedStr,
    pub slow_reason: SharedStr,
}

/// An IC event whose program counter matched no known code object.
///
/// Kept for diagnostics instead of being discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnattributedIc {
    pub address: u64,
    pub entry: IcEntry,
}

/// Why a code object was deoptimized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeoptKind {
    Eager,
    Lazy,
    Soft,
    Unknown,
}

impl DeoptKind {
    pub fn from_label(label: &str) -> DeoptKind {
        match label {
            "deopt-eager" => DeoptKind::Eager,
            "deopt-lazy" => DeoptKind::Lazy,
            "deopt-soft" => DeoptKind::Soft,
            _ => DeoptKind::Unknown,
        }
    }
}

/// The first deoptimization recorded for a code object.
///
/// Later deopts on the same code are lazy deopts of other on-stack
/// activations and are not recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeoptInfo {
    pub timestamp: u64,
    pub kind: DeoptKind,
    pub reason: SharedStr,
    /// Source location string as logged, e.g. `<file.js:3:12>`.
    pub location: SharedStr,
    pub script_offset: i64,
    pub inlining_id: i64,
}

/// Sub-kind of a non-JS dynamic ("CODE") code object, parsed from the
/// `code-creation` type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DynamicKind {
    LoadIc,
    StoreIc,
    KeyedLoadIc,
    KeyedStoreIc,
    LoadGlobalIc,
    StoreGlobalIc,
    Handler,
    BytecodeHandler,
    Stub,
    Builtin,
    RegExp,
    Other,
}

impl DynamicKind {
    pub fn from_type(ty: &str) -> DynamicKind {
        match ty {
            "LoadIC" => DynamicKind::LoadIc,
            "StoreIC" => DynamicKind::StoreIc,
            "KeyedLoadIC" => DynamicKind::KeyedLoadIc,
            "KeyedStoreIC" => DynamicKind::KeyedStoreIc,
            "LoadGlobalIC" => DynamicKind::LoadGlobalIc,
            "StoreGlobalIC" => DynamicKind::StoreGlobalIc,
            "Handler" => DynamicKind::Handler,
            "BytecodeHandler" => DynamicKind::BytecodeHandler,
            "Stub" => DynamicKind::Stub,
            "Builtin" => DynamicKind::Builtin,
            "RegExp" => DynamicKind::RegExp,
            _ => DynamicKind::Other,
        }
    }

    /// Low-level kinds never materialize a call frame; samples landing in
    /// them collapse into their caller.
    pub fn is_low_level(self) -> bool {
        matches!(
            self,
            DynamicKind::LoadIc
                | DynamicKind::StoreIc
                | DynamicKind::KeyedLoadIc
                | DynamicKind::KeyedStoreIc
                | DynamicKind::LoadGlobalIc
                | DynamicKind::StoreGlobalIc
                | DynamicKind::Handler
                | DynamicKind::BytecodeHandler
                | DynamicKind::Stub
                | DynamicKind::Builtin
        )
    }
}

/// Payload of a code object.
///
/// Only the `Js` variant may carry position tables, inline data, IC
/// entries, or a deopt record; `Js` and `Dynamic` may carry disassembly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Code {
    /// Compiled JavaScript, owned by a source-level function.
    Js {
        name: SharedStr,
        tier: Tier,
        /// Context-specialized compilation (trailing `'` on the marker).
        specialized: bool,
        /// Index into the function list.
        function: u32,
        /// Owning script id, −1 until a source-info record names it.
        script: i32,
        timestamp: u64,
        positions: Option<PositionTable>,
        inlined: Option<InlineTable>,
        ics: Vec<IcEntry>,
        deopt: Option<DeoptInfo>,
        disassembly: Option<String>,
    },
    /// Engine-internal dynamic code: builtins, stubs, handlers, ICs.
    Dynamic {
        name: SharedStr,
        kind: DynamicKind,
        timestamp: u64,
        disassembly: Option<String>,
    },
    /// A mapped shared library range.
    SharedLib { name: SharedStr },
    /// A C++ symbol inside a shared library.
    Cpp { name: SharedStr },
}

impl Code {
    pub fn name(&self) -> &SharedStr {
        match self {
            Code::Js { name, .. }
            | Code::Dynamic { name, .. }
            | Code::SharedLib { name }
            | Code::Cpp { name } => name,
        }
    }

    pub fn is_js(&self) -> bool {
        matches!(self, Code::Js { .. })
    }
}

/// One compiled code object at one point in time.
///
/// Entries are append-only; the logical id doubles as the index into the
/// code list. A `code-move` re-keys the address index but the entry keeps
/// its id and payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeEntry {
    pub id: u32,
    pub start: u64,
    pub size: u64,
    pub code: Code,
}

impl CodeEntry {
    /// Whether `address` falls inside this entry's current range.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.start + self.size
    }
}

/// A source-level function identity, decoupled from any particular
/// compiled code (the engine's "SharedFunctionInfo" concept).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: SharedStr,
    /// Ids of every code object ever compiled for this function, in
    /// creation order. Tier transitions read directly off this list.
    pub codes: Vec<u32>,
}
