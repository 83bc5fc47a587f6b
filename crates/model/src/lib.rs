//! Decoded profiling-trace data model.
//!
//! The serializable output surface of the tickscope decoder, consumed by
//! report writers and visualization layers. All processing lives in
//! `tickscope-core`; this crate is data plus the small data-structure
//! operations that belong with it (interning, floor lookup, tree links).

pub mod call_frame;
pub mod call_tree;
pub mod code;
pub mod positions;
pub mod profile;
pub mod shared_str;

pub use call_frame::{CallFrame, FrameTable, ROOT_FRAME};
pub use call_tree::{CallTree, CallTreeNode, ROOT_NODE};
pub use code::{
    Code, CodeEntry, DeoptInfo, DeoptKind, DynamicKind, FunctionInfo, IcEntry, IcKind, IcState,
    Tier, UnattributedIc,
};
pub use positions::{InlineEntry, InlineTable, PositionEntry, PositionTable};
pub use profile::{
    Diagnostics, EngineMeta, EngineProfile, HeapEvent, HeapEventKind, Profile, ProfileMeta, Script,
    SourceFormat, StackSlot, Tick, VmState,
};
pub use shared_str::SharedStr;
