use std::collections::HashMap;

use log::warn;
use thiserror::Error;

use tickscope_model::{
    Code, DeoptInfo, DeoptKind, Diagnostics, DynamicKind, EngineMeta, EngineProfile, FunctionInfo,
    HeapEvent, HeapEventKind, IcEntry, IcKind, IcState, Script, Tick, Tier, UnattributedIc,
    VmState,
};

use crate::codemap::CodeMap;
use crate::parsers::logfile::lines::LineSplitter;
use crate::parsers::logfile::tokenizer::{FieldReader, is_address_shaped};
use crate::positions::{decode_inline_table, decode_position_table};

#[derive(Debug, Error)]
pub enum LogDecodeError {
    #[error("no recognizable log records in input")]
    NotALog,
    #[error("inline table references function address {address:#x} that resolves to no function")]
    UnresolvableInlineFunction { address: u64 },
    #[error("read: {0}")]
    Io(#[from] std::io::Error),
}

/// Every log record kind the decoder understands.
///
/// Dispatch is a match over this closed set; opcodes outside it land in
/// the diagnostics instead of a runtime dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Opcode {
    Version,
    Platform,
    Profiler,
    HeapCapacity,
    HeapAvailable,
    NewChunk,
    DeleteChunk,
    CodeCreation,
    CodeSourceInfo,
    ScriptSource,
    Ic(IcKind),
    CodeDeopt,
    CodeMove,
    SfiMove,
    CodeDelete,
    SharedLibrary,
    SharedLibraryEnd,
    CodeDisassemble,
    Tick,
}

impl Opcode {
    fn from_name(name: &str) -> Option<Opcode> {
        Some(match name {
            "v8-version" => Opcode::Version,
            "v8-platform" => Opcode::Platform,
            "profiler" => Opcode::Profiler,
            "heap-capacity" => Opcode::HeapCapacity,
            "heap-available" => Opcode::HeapAvailable,
            "new" => Opcode::NewChunk,
            "delete" => Opcode::DeleteChunk,
            "code-creation" => Opcode::CodeCreation,
            "code-source-info" => Opcode::CodeSourceInfo,
            "script-source" => Opcode::ScriptSource,
            "LoadIC" => Opcode::Ic(IcKind::LoadIc),
            "StoreIC" => Opcode::Ic(IcKind::StoreIc),
            "KeyedLoadIC" => Opcode::Ic(IcKind::KeyedLoadIc),
            "KeyedStoreIC" => Opcode::Ic(IcKind::KeyedStoreIc),
            "LoadGlobalIC" => Opcode::Ic(IcKind::LoadGlobalIc),
            "StoreGlobalIC" => Opcode::Ic(IcKind::StoreGlobalIc),
            "StoreInArrayLiteralIC" => Opcode::Ic(IcKind::StoreInArrayLiteralIc),
            "code-deopt" => Opcode::CodeDeopt,
            "code-move" => Opcode::CodeMove,
            "sfi-move" => Opcode::SfiMove,
            "code-delete" => Opcode::CodeDelete,
            "shared-library" => Opcode::SharedLibrary,
            "shared-library-end" => Opcode::SharedLibraryEnd,
            "code-disassemble" => Opcode::CodeDisassemble,
            "tick" => Opcode::Tick,
            _ => return None,
        })
    }
}

/// Size sentinel marking a memory chunk as already deleted, so duplicate
/// deletes are tolerated without a warning storm.
const CHUNK_DELETED: i64 = -1;

/// One decode session for one line-oriented engine log.
///
/// All mutable indexes (the code map, the SFI-by-address index, the
/// script table) are owned by the session; concurrent decodes each own
/// an independent instance.
pub struct LogDecoder {
    splitter: LineSplitter,
    map: CodeMap,
    meta: EngineMeta,
    functions: Vec<FunctionInfo>,
    sfi_by_address: HashMap<u64, u32>,
    scripts: HashMap<i32, Script>,
    max_script_id: i32,
    chunk_sizes: HashMap<u64, i64>,
    ticks: Vec<Tick>,
    heap_events: Vec<HeapEvent>,
    unattributed_ics: Vec<UnattributedIc>,
    diagnostics: Diagnostics,
    recognized: u64,
}

impl LogDecoder {
    pub fn new() -> LogDecoder {
        LogDecoder {
            splitter: LineSplitter::new(),
            map: CodeMap::new(),
            meta: EngineMeta::default(),
            functions: Vec::new(),
            sfi_by_address: HashMap::new(),
            scripts: HashMap::new(),
            max_script_id: -1,
            chunk_sizes: HashMap::new(),
            ticks: Vec::new(),
            heap_events: Vec::new(),
            unattributed_ics: Vec::new(),
            diagnostics: Diagnostics::default(),
            recognized: 0,
        }
    }

    /// Register a C++ symbol from an external symbol source (the host
    /// side resolves shared-library symbols and feeds them in before or
    /// during the decode). Sampled addresses inside the range resolve to
    /// a frame with the cleaned-up symbol name.
    pub fn add_cpp_symbol(&mut self, address: u64, size: u64, name: &str) {
        self.map
            .add_static(address, size, Code::Cpp { name: name.into() });
    }

    /// Feed one input chunk. Chunk boundaries may fall anywhere.
    pub fn process_chunk(&mut self, chunk: &[u8]) -> Result<(), LogDecodeError> {
        let mut lines = Vec::new();
        self.splitter.push_chunk(chunk, &mut lines);
        for line in &lines {
            self.process_line(line)?;
        }
        Ok(())
    }

    /// Decode one complete log line.
    pub fn process_line(&mut self, line: &str) -> Result<(), LogDecodeError> {
        if line.is_empty() {
            return Ok(());
        }
        let mut reader = FieldReader::new(line);
        let Some(op_name) = reader.next_raw() else {
            return Ok(());
        };
        let Some(op) = Opcode::from_name(op_name) else {
            self.diagnostics.ignored_ops.insert(op_name.to_string());
            self.diagnostics.ignored_lines.push(line.to_string());
            return Ok(());
        };
        self.recognized += 1;

        match op {
            Opcode::Version => {
                let parts = reader.rest();
                self.meta.version = Some(parts.join("."));
            }
            Opcode::Platform => {
                let parts = reader.rest();
                self.meta.platform = Some(parts.join(","));
            }
            Opcode::Profiler => self.op_profiler(&mut reader),
            Opcode::HeapCapacity => {
                self.meta.heap_capacity = reader.next_int().map(|v| v.max(0) as u64);
            }
            Opcode::HeapAvailable => {
                self.meta.heap_available = reader.next_int().map(|v| v.max(0) as u64);
            }
            Opcode::NewChunk => self.op_new_chunk(&mut reader),
            Opcode::DeleteChunk => self.op_delete_chunk(&mut reader),
            Opcode::CodeCreation => self.op_code_creation(&mut reader),
            Opcode::CodeSourceInfo => return self.op_code_source_info(&mut reader),
            Opcode::ScriptSource => self.op_script_source(&mut reader),
            Opcode::Ic(kind) => self.op_ic(kind, &mut reader),
            Opcode::CodeDeopt => self.op_code_deopt(&mut reader),
            Opcode::CodeMove => self.op_code_move(&mut reader),
            Opcode::SfiMove => self.op_sfi_move(&mut reader),
            // Address reuse handles eviction implicitly; nothing to do.
            Opcode::CodeDelete | Opcode::SharedLibraryEnd => {}
            Opcode::SharedLibrary => self.op_shared_library(&mut reader),
            Opcode::CodeDisassemble => self.op_code_disassemble(&mut reader),
            Opcode::Tick => self.op_tick(&mut reader),
        }
        Ok(())
    }

    /// Flush pending input and produce the terminal model.
    pub fn finish(mut self) -> Result<EngineProfile, LogDecodeError> {
        let mut lines = Vec::new();
        self.splitter.finish(&mut lines);
        for line in &lines {
            self.process_line(line)?;
        }

        if self.recognized == 0 {
            return Err(LogDecodeError::NotALog);
        }

        self.synthesize_scripts();

        // Dense, gap-filled script array: index = script id.
        let mut scripts: Vec<Option<Script>> = Vec::new();
        if self.max_script_id >= 0 {
            scripts.resize_with(self.max_script_id as usize + 1, || None);
            for (id, script) in self.scripts.drain() {
                scripts[id as usize] = Some(script);
            }
        }

        Ok(EngineProfile {
            meta: self.meta,
            codes: self.map.into_codes(),
            functions: self.functions,
            scripts,
            ticks: self.ticks,
            heap_events: self.heap_events,
            unattributed_ics: self.unattributed_ics,
            diagnostics: self.diagnostics,
        })
    }

    /// Scripts the log never named in a `script-source` record still
    /// have an identity: synthesize one per URL found in function names.
    fn synthesize_scripts(&mut self) {
        let mut unseen: Vec<String> = Vec::new();
        for function in &self.functions {
            let Some(url) = crate::frames::script_url(function.name.as_str()) else {
                continue;
            };
            let known = self.scripts.values().any(|s| s.url == url)
                || unseen.iter().any(|u| u == url);
            if !known {
                unseen.push(url.to_string());
            }
        }
        for url in unseen {
            let id = self.max_script_id + 1;
            self.max_script_id = id;
            self.scripts.insert(
                id,
                Script {
                    id,
                    url: url.into(),
                    source: String::new(),
                },
            );
        }
    }

    // --- per-opcode handlers ---

    fn op_profiler(&mut self, reader: &mut FieldReader<'_>) {
        match reader.next_raw() {
            Some("begin") | Some("start") => {
                self.meta.sampling_interval = reader.next_int().map(|v| v.max(0) as u64);
            }
            _ => {}
        }
    }

    fn op_new_chunk(&mut self, reader: &mut FieldReader<'_>) {
        let _ty = reader.next_raw();
        let (Some(address), Some(size)) = (reader.next_address(), reader.next_int()) else {
            warn!("malformed chunk allocation record");
            return;
        };
        self.chunk_sizes.insert(address, size);
        // Timestamp 0 until the next timestamp-bearing event back-fills it.
        self.heap_events.push(HeapEvent {
            kind: HeapEventKind::New,
            timestamp: 0,
            address,
            size: size.max(0) as u64,
        });
    }

    fn op_delete_chunk(&mut self, reader: &mut FieldReader<'_>) {
        let _ty = reader.next_raw();
        let Some(address) = reader.next_address() else {
            warn!("malformed chunk free record");
            return;
        };
        match self.chunk_sizes.get(&address).copied() {
            None => warn!("delete of unknown memory chunk {address:#x}"),
            Some(CHUNK_DELETED) => {
                // Duplicate delete; the engine logs these, tolerate them.
            }
            Some(size) => {
                self.heap_events.push(HeapEvent {
                    kind: HeapEventKind::Delete,
                    timestamp: 0,
                    address,
                    size: size.max(0) as u64,
                });
                self.chunk_sizes.insert(address, CHUNK_DELETED);
            }
        }
    }

    /// Every event carrying a real timestamp retroactively fills the
    /// zero-timestamp heap events immediately preceding it.
    fn backfill_heap_timestamps(&mut self, timestamp: u64) {
        for event in self.heap_events.iter_mut().rev() {
            if event.timestamp != 0 {
                break;
            }
            event.timestamp = timestamp;
        }
    }

    fn op_code_creation(&mut self, reader: &mut FieldReader<'_>) {
        let ty = reader.next_raw().unwrap_or("");
        let _kind_num = reader.next_int();
        let (Some(timestamp), Some(address), Some(size)) = (
            reader.next_int(),
            reader.next_address(),
            reader.next_int(),
        ) else {
            warn!("malformed code-creation record");
            return;
        };
        let timestamp = timestamp.max(0) as u64;
        let size = size.max(0) as u64;
        let name = reader.next_name_field();
        let sfi = match reader.peek_raw() {
            Some(field) if is_address_shaped(field) => reader.next_address(),
            _ => None,
        };
        let marker = reader.next_raw().unwrap_or("");

        self.backfill_heap_timestamps(timestamp);

        if ty == "JS" {
            let function = self.function_for(sfi, &name);
            let (tier, specialized) = Tier::from_marker(marker);
            let id = self.map.add_code(
                address,
                size,
                Code::Js {
                    name: name.into(),
                    tier,
                    specialized,
                    function,
                    script: -1,
                    timestamp,
                    positions: None,
                    inlined: None,
                    ics: Vec::new(),
                    deopt: None,
                    disassembly: None,
                },
            );
            self.functions[function as usize].codes.push(id);
        } else {
            self.map.add_code(
                address,
                size,
                Code::Dynamic {
                    name: name.into(),
                    kind: DynamicKind::from_type(ty),
                    timestamp,
                    disassembly: None,
                },
            );
        }
    }

    /// Create or reuse a function identity for an SFI address.
    ///
    /// The engine's allocator reuses addresses: the same address with a
    /// different name is a different function, so reuse requires an
    /// identical name.
    fn function_for(&mut self, sfi: Option<u64>, name: &str) -> u32 {
        if let Some(address) = sfi {
            if let Some(&id) = self.sfi_by_address.get(&address) {
                if self.functions[id as usize].name == name {
                    return id;
                }
            }
            let id = self.push_function(name);
            self.sfi_by_address.insert(address, id);
            id
        } else {
            self.push_function(name)
        }
    }

    fn push_function(&mut self, name: &str) -> u32 {
        let id = self.functions.len() as u32;
        self.functions.push(FunctionInfo {
            name: name.into(),
            codes: Vec::new(),
        });
        id
    }

    fn op_code_source_info(&mut self, reader: &mut FieldReader<'_>) -> Result<(), LogDecodeError> {
        let (Some(address), Some(script_id), Some(_start), Some(_end)) = (
            reader.next_address(),
            reader.next_int(),
            reader.next_int(),
            reader.next_int(),
        ) else {
            warn!("malformed code-source-info record");
            return Ok(());
        };
        let position_str = reader.next_raw().unwrap_or("");
        let inline_str = reader.next_raw().unwrap_or("");
        let fns_str = reader.next_raw().unwrap_or("");

        // Resolve the inlined-function address list first: an address
        // that resolves to no function is a defect in the resolution
        // pass, not bad input, and fails the decode.
        let mut inline_fns = Vec::new();
        for part in fns_str.split('S').filter(|p| !p.is_empty()) {
            let Some(fn_address) = crate::parsers::logfile::tokenizer::parse_address(part) else {
                warn!("unparseable inlined-function reference {part:?}");
                continue;
            };
            match self.sfi_by_address.get(&fn_address) {
                Some(&id) => inline_fns.push(id),
                None => {
                    return Err(LogDecodeError::UnresolvableInlineFunction {
                        address: fn_address,
                    });
                }
            }
        }

        let Some((id, _)) = self.map.find_by_address(address) else {
            warn!("code-source-info for unknown code at {address:#x}");
            return Ok(());
        };
        let Some(entry) = self.map.code_mut(id) else {
            return Ok(());
        };
        match &mut entry.code {
            Code::Js {
                script,
                positions,
                inlined,
                ..
            } => {
                *script = script_id as i32;
                *positions = Some(decode_position_table(position_str));
                *inlined = Some(decode_inline_table(inline_str, inline_fns));
            }
            _ => warn!("code-source-info for non-JS code at {address:#x}"),
        }
        Ok(())
    }

    fn op_script_source(&mut self, reader: &mut FieldReader<'_>) {
        let Some(id) = reader.next_int().filter(|&id| id >= 0) else {
            warn!("malformed script-source record");
            return;
        };
        let id = id as i32;
        let url = reader.next_string().unwrap_or_default();
        let source = reader.next_string().unwrap_or_default();
        self.max_script_id = self.max_script_id.max(id);
        self.scripts.insert(
            id,
            Script {
                id,
                url: url.into(),
                source,
            },
        );
    }

    fn op_ic(&mut self, kind: IcKind, reader: &mut FieldReader<'_>) {
        let (Some(pc), Some(timestamp)) = (reader.next_address(), reader.next_int()) else {
            warn!("malformed inline-cache record");
            return;
        };
        let timestamp = timestamp.max(0) as u64;
        let _line = reader.next_int();
        let _column = reader.next_int();
        let old_state = IcState::from_code(reader.next_raw().unwrap_or(""));
        let new_state = IcState::from_code(reader.next_raw().unwrap_or(""));
        let map = reader.next_address().unwrap_or(0);
        let key = reader.next_string().unwrap_or_default();
        let modifier = reader.next_string().unwrap_or_default();
        let slow_reason = reader.next_string().unwrap_or_default();

        self.backfill_heap_timestamps(timestamp);

        let make_entry = |offset: u64| IcEntry {
            kind,
            timestamp,
            offset,
            old_state,
            new_state,
            map,
            key: key.clone().into(),
            modifier: modifier.clone().into(),
            slow_reason: slow_reason.clone().into(),
        };

        match self.map.find_by_address(pc) {
            Some((id, offset)) => {
                let Some(entry) = self.map.code_mut(id) else {
                    return;
                };
                match &mut entry.code {
                    Code::Js { ics, .. } => ics.push(make_entry(offset)),
                    _ => warn!("inline-cache event on non-JS code at {pc:#x}"),
                }
            }
            None => self.unattributed_ics.push(UnattributedIc {
                address: pc,
                entry: make_entry(0),
            }),
        }
    }

    fn op_code_deopt(&mut self, reader: &mut FieldReader<'_>) {
        let (Some(timestamp), Some(_size), Some(address)) = (
            reader.next_int(),
            reader.next_int(),
            reader.next_address(),
        ) else {
            warn!("malformed code-deopt record");
            return;
        };
        let timestamp = timestamp.max(0) as u64;
        let inlining_id = reader.next_int().unwrap_or(-1);
        let script_offset = reader.next_int().unwrap_or(-1);
        let kind = DeoptKind::from_label(reader.next_raw().unwrap_or(""));
        let location = reader.next_string().unwrap_or_default();
        let reason = reader.next_string().unwrap_or_default();

        self.backfill_heap_timestamps(timestamp);

        let Some((id, _)) = self.map.find_by_address(address) else {
            warn!("code-deopt for unknown code at {address:#x}");
            return;
        };
        let Some(entry) = self.map.code_mut(id) else {
            return;
        };
        match &mut entry.code {
            Code::Js { deopt, .. } => {
                // First deopt wins; later ones are lazy deopts of other
                // on-stack activations of the same code.
                if deopt.is_none() {
                    *deopt = Some(DeoptInfo {
                        timestamp,
                        kind,
                        reason: reason.into(),
                        location: location.into(),
                        script_offset,
                        inlining_id,
                    });
                }
            }
            _ => warn!("code-deopt for non-JS code at {address:#x}"),
        }
    }

    fn op_code_move(&mut self, reader: &mut FieldReader<'_>) {
        let (Some(from), Some(to)) = (reader.next_address(), reader.next_address()) else {
            warn!("malformed code-move record");
            return;
        };
        self.map.move_code(from, to);
    }

    fn op_sfi_move(&mut self, reader: &mut FieldReader<'_>) {
        let (Some(from), Some(to)) = (reader.next_address(), reader.next_address()) else {
            warn!("malformed sfi-move record");
            return;
        };
        match self.sfi_by_address.remove(&from) {
            Some(id) => {
                self.sfi_by_address.insert(to, id);
            }
            None => warn!("sfi-move from {from:#x}: no function at source address"),
        }
    }

    fn op_shared_library(&mut self, reader: &mut FieldReader<'_>) {
        let Some(name) = reader.next_string() else {
            warn!("malformed shared-library record");
            return;
        };
        let (Some(start), Some(end)) = (reader.next_address(), reader.next_address()) else {
            warn!("malformed shared-library record");
            return;
        };
        let _aslr_slide = reader.next_int();
        self.map.add_static(
            start,
            end.saturating_sub(start),
            Code::SharedLib { name: name.into() },
        );
    }

    fn op_code_disassemble(&mut self, reader: &mut FieldReader<'_>) {
        let Some(address) = reader.next_address() else {
            warn!("malformed code-disassemble record");
            return;
        };
        let _kind = reader.next_raw();
        let text = reader.next_string().unwrap_or_default();

        let Some((id, _)) = self.map.find_by_address(address) else {
            warn!("code-disassemble for unknown code at {address:#x}");
            return;
        };
        let Some(entry) = self.map.code_mut(id) else {
            return;
        };
        match &mut entry.code {
            Code::Js { disassembly, .. } | Code::Dynamic { disassembly, .. } => {
                *disassembly = Some(text);
            }
            _ => warn!("code-disassemble for library code at {address:#x}"),
        }
    }

    fn op_tick(&mut self, reader: &mut FieldReader<'_>) {
        let (Some(pc), Some(timestamp), Some(is_external), Some(tos), Some(state)) = (
            reader.next_address(),
            reader.next_int(),
            reader.next_int(),
            reader.next_address(),
            reader.next_int(),
        ) else {
            warn!("malformed tick record");
            return;
        };
        let timestamp = timestamp.max(0) as u64;
        let raw_frames = reader.rest();

        // During an external callback the sampled pc is unreliable (it
        // can point inside the callback itself and fake self-recursion);
        // the tos field holds the callback address and becomes the
        // effective pc.
        let (pc, tos) = if is_external != 0 {
            (tos, None)
        } else if tos != 0 {
            (pc, Some(tos))
        } else {
            (pc, None)
        };

        let stack = self.map.resolve_stack(pc, tos, &raw_frames);
        self.backfill_heap_timestamps(timestamp);
        self.ticks.push(Tick {
            timestamp,
            vm_state: VmState::from_code(state.max(0) as u64),
            stack,
        });
    }
}

impl Default for LogDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a complete in-memory log.
pub fn decode_log(data: &[u8]) -> Result<EngineProfile, LogDecodeError> {
    let mut decoder = LogDecoder::new();
    decoder.process_chunk(data)?;
    decoder.finish()
}

/// Decode a log from a fallible chunk source, pulling one chunk at a
/// time. The source is not asked for the next chunk until the current
/// one is fully processed, so backpressure is implicit.
pub fn decode_chunks<I>(chunks: I) -> Result<EngineProfile, LogDecodeError>
where
    I: IntoIterator<Item = std::io::Result<Vec<u8>>>,
{
    let mut decoder = LogDecoder::new();
    for chunk in chunks {
        decoder.process_chunk(&chunk?)?;
    }
    decoder.finish()
}
