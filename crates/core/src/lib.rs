//! Engine profiling trace decoders and call-tree reconstruction.
//!
//! Two input formats produce the same queryable [`Profile`]: the
//! line-oriented engine execution log (decoded incrementally, tolerant of
//! arbitrary chunk boundaries) and the structured JSON call-tree
//! snapshot. The log pipeline additionally exposes the full
//! [`EngineProfile`] model: codes, functions, scripts, ticks, heap
//! events, inline-cache transitions and deoptimizations.
//!
//! ```no_run
//! use tickscope_core::parsers::parse_auto;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = std::fs::read("isolate.log")?;
//! let profile = parse_auto(&data)?;
//! println!("{} samples", profile.tree.samples.len());
//! # Ok(())
//! # }
//! ```
//!
//! Every decode owns its mutable state (code map, interning tables, tree
//! indexes); concurrent decodes never share instances.

pub mod aggregate;
pub mod codemap;
pub mod frames;
pub mod parsers;
pub mod positions;
pub mod tree;

pub use parsers::{ParseError, parse_auto};
pub use tickscope_model as model;
pub use tickscope_model::{EngineProfile, Profile};
