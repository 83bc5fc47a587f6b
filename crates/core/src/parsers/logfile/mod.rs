//! Decoder for the line-oriented engine execution log: one event per
//! line, `opcode,arg1,arg2,...`, streamed in arbitrary chunks.

pub mod lines;
pub mod processor;
pub mod tokenizer;

pub use lines::LineSplitter;
pub use processor::{LogDecodeError, LogDecoder, decode_chunks, decode_log};

use tickscope_model::{EngineProfile, Profile, ProfileMeta, SourceFormat};

use crate::aggregate::compute_totals;
use crate::frames::resolve_frames;
use crate::tree::build_tree;

/// Decode a complete in-memory log and derive the unified profile.
pub fn parse_log(data: &[u8]) -> Result<Profile, LogDecodeError> {
    let engine = decode_log(data)?;
    Ok(profile_from_engine(&engine))
}

/// Derive the unified call-frame/call-tree profile from a decoded
/// engine log.
pub fn profile_from_engine(engine: &EngineProfile) -> Profile {
    let resolved = resolve_frames(engine);
    let mut tree = build_tree(engine, &resolved);
    compute_totals(&mut tree);

    // Sample deltas are measured from 0, so the sampling window runs
    // from 0 to the last tick and the root total equals the duration.
    let end_time = engine.ticks.last().map_or(0.0, |t| t.timestamp as f64);
    Profile {
        meta: ProfileMeta {
            format: SourceFormat::EngineLog,
            start_time: 0.0,
            end_time,
        },
        frames: resolved.table,
        tree,
    }
}
