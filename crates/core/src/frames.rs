//! Call-frame resolution: turns the low-level code and function records
//! of an [`EngineProfile`] into deduplicated logical call frames.

use std::collections::HashMap;

use tickscope_model::{
    CallFrame, Code, DynamicKind, EngineProfile, FrameTable, SharedStr, VmState,
};

/// Resolved call frames for one engine profile: the interned frame table,
/// a code-id → frame map, and the synthetic per-VM-state frames.
#[derive(Debug)]
pub struct ResolvedFrames {
    pub table: FrameTable,
    /// Frame index per code id; `None` for low-level code that collapses
    /// into its caller.
    pub code_frames: Vec<Option<u32>>,
    state_frames: HashMap<VmState, u32>,
}

impl ResolvedFrames {
    /// The synthetic frame for a non-JS VM state. `None` for [`VmState::Js`].
    pub fn state_frame(&self, state: VmState) -> Option<u32> {
        self.state_frames.get(&state).copied()
    }

    pub fn frame_for_code(&self, code_id: u32) -> Option<u32> {
        self.code_frames.get(code_id as usize).copied().flatten()
    }
}

/// Build the deduplicated frame table for a decoded profile.
pub fn resolve_frames(profile: &EngineProfile) -> ResolvedFrames {
    let mut table = FrameTable::new();

    // One synthetic frame per non-JS VM state; Other, External and
    // Logging collapse into the shared "(program)" bucket.
    let mut state_frames = HashMap::new();
    for state in [
        VmState::Gc,
        VmState::Parser,
        VmState::BytecodeCompiler,
        VmState::Compiler,
        VmState::Other,
        VmState::External,
        VmState::AtomicsWait,
        VmState::Idle,
        VmState::Logging,
    ] {
        let idx = table.intern(CallFrame::synthetic(state_frame_name(state)));
        state_frames.insert(state, idx);
    }

    // Scripts by URL, for JS codes that never got a source-info record.
    let script_by_url: HashMap<&str, i32> = profile
        .scripts
        .iter()
        .flatten()
        .map(|s| (s.url.as_str(), s.id))
        .collect();

    // All codes compiled for the same function resolve to the same frame.
    let mut function_frames: HashMap<u32, u32> = HashMap::new();

    let mut code_frames = Vec::with_capacity(profile.codes.len());
    for entry in &profile.codes {
        let frame = match &entry.code {
            Code::Js {
                name,
                function,
                script,
                ..
            } => Some(match function_frames.get(function) {
                Some(&idx) => idx,
                None => {
                    let url_hint = profile.script(*script).map(|s| s.url.as_str());
                    let mut frame = parse_js_frame(name, url_hint);
                    frame.function_id = Some(*function);
                    frame.script_id = if *script >= 0 {
                        *script
                    } else {
                        script_by_url.get(frame.url.as_str()).copied().unwrap_or(-1)
                    };
                    let idx = table.intern(frame);
                    function_frames.insert(*function, idx);
                    idx
                }
            }),
            Code::Dynamic { name, kind, .. } => {
                if kind.is_low_level() {
                    None
                } else if *kind == DynamicKind::RegExp {
                    Some(table.intern(CallFrame::synthetic(format!("RegExp: {name}"))))
                } else {
                    Some(table.intern(CallFrame::synthetic(format!("Code: {name}"))))
                }
            }
            // No real representation yet; samples landing here fall into
            // the "(program)" bucket at attribution time.
            Code::SharedLib { .. } => None,
            Code::Cpp { name } => {
                Some(table.intern(CallFrame::synthetic(clean_cpp_name(name))))
            }
        };
        code_frames.push(frame);
    }

    ResolvedFrames {
        table,
        code_frames,
        state_frames,
    }
}

fn state_frame_name(state: VmState) -> &'static str {
    match state {
        VmState::Gc => "(garbage collector)",
        VmState::Parser => "(parser)",
        VmState::BytecodeCompiler => "(bytecode compiler)",
        VmState::Compiler => "(compiler)",
        VmState::AtomicsWait => "(atomics wait)",
        VmState::Idle => "(idle)",
        // States without a meaningful engine-side attribution share one
        // bucket.
        VmState::Js | VmState::Other | VmState::External | VmState::Logging => "(program)",
    }
}

/// Split a logged JS code name of the form `functionName url:line:column`.
///
/// Function names may contain spaces and the log writes no delimiter, so
/// when the owning script's URL is known it anchors the split; otherwise
/// the location is taken after the last space and parsed from the right.
fn parse_js_frame(full: &str, url_hint: Option<&str>) -> CallFrame {
    if let Some(url) = url_hint.filter(|u| !u.is_empty()) {
        let anchor = format!(" {url}:");
        if let Some(pos) = full.rfind(&anchor) {
            let name = &full[..pos];
            let location = &full[pos + 1..];
            if let Some((line, column)) = parse_location(location, url.len()) {
                return CallFrame {
                    name: name_or_anonymous(name),
                    url: url.into(),
                    line,
                    column,
                    script_id: -1,
                    function_id: None,
                };
            }
        }
    }

    // No URL anchor: the location candidate follows the last space.
    if let Some(pos) = full.rfind(' ') {
        let candidate = &full[pos + 1..];
        if let Some((url, line, column)) = split_location(candidate) {
            return CallFrame {
                name: name_or_anonymous(&full[..pos]),
                url: url.into(),
                line,
                column,
                script_id: -1,
                function_id: None,
            };
        }
    }
    // A bare location with no name at all, e.g. `file.js:2:1`.
    if let Some((url, line, column)) = split_location(full) {
        if !url.is_empty() && !url.contains(' ') {
            return CallFrame {
                name: "(anonymous)".into(),
                url: url.into(),
                line,
                column,
                script_id: -1,
                function_id: None,
            };
        }
    }
    CallFrame {
        name: name_or_anonymous(full),
        url: SharedStr::default(),
        line: -1,
        column: -1,
        script_id: -1,
        function_id: None,
    }
}

fn name_or_anonymous(name: &str) -> SharedStr {
    let name = name.trim();
    if name.is_empty() {
        "(anonymous)".into()
    } else {
        name.into()
    }
}

/// Parse `url:line:column` given the known URL length.
fn parse_location(location: &str, url_len: usize) -> Option<(i32, i32)> {
    let rest = location.get(url_len..)?.strip_prefix(':')?;
    let (line, column) = rest.split_once(':')?;
    Some((
        to_zero_based(line.parse().ok()?),
        to_zero_based(column.parse().ok()?),
    ))
}

/// Extract the script URL from a logged `name url:line:column` string,
/// if it carries one.
pub(crate) fn script_url(full: &str) -> Option<&str> {
    let candidate = match full.rfind(' ') {
        Some(pos) => &full[pos + 1..],
        None => full,
    };
    let (url, _, _) = split_location(candidate)?;
    (!url.is_empty() && !url.contains(' ')).then_some(url)
}

/// Split a bare `url:line:column` candidate from the right.
fn split_location(candidate: &str) -> Option<(&str, i32, i32)> {
    let (rest, column) = candidate.rsplit_once(':')?;
    let (url, line) = rest.rsplit_once(':')?;
    Some((
        url,
        to_zero_based(line.parse().ok()?),
        to_zero_based(column.parse().ok()?),
    ))
}

/// Engine line/column numbers are 1-based, except some locations are
/// already emitted 0-based and must not be decremented again.
fn to_zero_based(n: i32) -> i32 {
    if n <= 0 { n } else { n - 1 }
}

/// Clean a C++ symbol name: strip the 2-character symbol-type marker,
/// drop `::(anonymous namespace)` segments, remove bracketed argument
/// and template groups, then drop any return-type prefix before the
/// last remaining space.
pub fn clean_cpp_name(raw: &str) -> String {
    let mut name = raw;
    let bytes = name.as_bytes();
    if bytes.len() > 2 && bytes[1] == b' ' && bytes[0].is_ascii_alphanumeric() {
        name = &name[2..];
    }
    let name = name.replace("::(anonymous namespace)", "");
    let stripped = strip_bracketed(&name);
    let trimmed = stripped.trim();
    match trimmed.rfind(' ') {
        Some(pos) => trimmed[pos + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

/// Remove balanced `<>`, `()` and `[]` groups, tracking nesting with an
/// explicit bracket stack.
fn strip_bracketed(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut stack: Vec<char> = Vec::new();
    for c in name.chars() {
        match c {
            '<' | '(' | '[' => stack.push(c),
            '>' | ')' | ']' => {
                if stack.last().copied() == Some(opening_of(c)) {
                    stack.pop();
                } else if stack.is_empty() {
                    // Unbalanced closer, e.g. `operator>`; keep it.
                    out.push(c);
                }
            }
            _ if stack.is_empty() => out.push(c),
            _ => {}
        }
    }
    out
}

fn opening_of(closer: char) -> char {
    match closer {
        '>' => '<',
        ')' => '(',
        _ => '[',
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickscope_model::{CodeEntry, FunctionInfo, Script, Tier};

    fn js_code(id: u32, name: &str, function: u32, script: i32) -> CodeEntry {
        CodeEntry {
            id,
            start: 0x1000 + u64::from(id) * 0x100,
            size: 0x100,
            code: Code::Js {
                name: name.into(),
                tier: Tier::Interpreter,
                specialized: false,
                function,
                script,
                timestamp: 0,
                positions: None,
                inlined: None,
                ics: Vec::new(),
                deopt: None,
                disassembly: None,
            },
        }
    }

    #[test]
    fn js_frame_parses_name_and_location() {
        let frame = parse_js_frame("foo file.js:1:1", None);
        assert_eq!(frame.name, "foo");
        assert_eq!(frame.url, "file.js");
        assert_eq!(frame.line, 0);
        assert_eq!(frame.column, 0);
    }

    #[test]
    fn js_frame_name_with_spaces_needs_url_anchor() {
        let frame = parse_js_frame("get foo bar /app/a b.js:3:7", Some("/app/a b.js"));
        assert_eq!(frame.name, "get foo bar");
        assert_eq!(frame.url, "/app/a b.js");
        assert_eq!(frame.line, 2);
        assert_eq!(frame.column, 6);
    }

    #[test]
    fn already_zero_based_line_is_kept() {
        let frame = parse_js_frame("foo file.js:0:4", None);
        assert_eq!(frame.line, 0);
        assert_eq!(frame.column, 3);
    }

    #[test]
    fn nameless_code_is_anonymous() {
        let frame = parse_js_frame(" file.js:2:1", None);
        assert_eq!(frame.name, "(anonymous)");
        assert_eq!(frame.url, "file.js");
    }

    #[test]
    fn bare_name_without_location() {
        let frame = parse_js_frame("nativeFn", None);
        assert_eq!(frame.name, "nativeFn");
        assert_eq!(frame.url, "");
        assert_eq!(frame.line, -1);
    }

    #[test]
    fn script_url_extraction() {
        assert_eq!(script_url("foo file.js:1:1"), Some("file.js"));
        assert_eq!(script_url("file.js:2:1"), Some("file.js"));
        assert_eq!(script_url("nativeFn"), None);
        assert_eq!(script_url(""), None);
    }

    #[test]
    fn cpp_name_cleanup() {
        assert_eq!(
            clean_cpp_name("t v8::internal::Heap::CollectGarbage(int, char const*)"),
            "v8::internal::Heap::CollectGarbage"
        );
        assert_eq!(
            clean_cpp_name("T std::vector<int, std::allocator<int>>::push_back(int&&)"),
            "std::vector::push_back"
        );
        assert_eq!(
            clean_cpp_name("W v8::(anonymous namespace)::Invoke(v8::Isolate*)"),
            "v8::Invoke"
        );
        // Return type before the function name is dropped.
        assert_eq!(clean_cpp_name("t int node::Start(int)"), "node::Start");
        assert_eq!(clean_cpp_name("write"), "write");
    }

    #[test]
    fn state_frames_collapse_into_program() {
        let profile = EngineProfile::default();
        let resolved = resolve_frames(&profile);
        let program = resolved.state_frame(VmState::Other);
        assert_eq!(resolved.state_frame(VmState::External), program);
        assert_eq!(resolved.state_frame(VmState::Logging), program);
        assert_ne!(resolved.state_frame(VmState::Gc), program);
        assert_eq!(resolved.state_frame(VmState::Js), None);
    }

    #[test]
    fn function_variants_share_one_frame() {
        let mut profile = EngineProfile::default();
        profile.functions.push(FunctionInfo {
            name: "foo file.js:1:1".into(),
            codes: vec![0, 1],
        });
        profile.codes.push(js_code(0, "foo file.js:1:1", 0, 1));
        profile.codes.push(js_code(1, "foo file.js:1:1", 0, 1));
        profile.scripts = vec![
            None,
            Some(Script {
                id: 1,
                url: "file.js".into(),
                source: String::new(),
            }),
        ];
        let resolved = resolve_frames(&profile);
        assert_eq!(resolved.frame_for_code(0), resolved.frame_for_code(1));
        let frame_idx = match resolved.frame_for_code(0) {
            Some(idx) => idx,
            None => panic!("JS code should have a frame"),
        };
        let frame = match resolved.table.get(frame_idx) {
            Some(f) => f,
            None => panic!("missing frame"),
        };
        assert_eq!(frame.name, "foo");
        assert_eq!(frame.script_id, 1);
        assert_eq!(frame.function_id, Some(0));
    }

    #[test]
    fn low_level_code_has_no_frame() {
        let mut profile = EngineProfile::default();
        profile.codes.push(CodeEntry {
            id: 0,
            start: 0x1000,
            size: 16,
            code: Code::Dynamic {
                name: "LoadIC-Miss".into(),
                kind: DynamicKind::LoadIc,
                timestamp: 0,
                disassembly: None,
            },
        });
        profile.codes.push(CodeEntry {
            id: 1,
            start: 0x2000,
            size: 16,
            code: Code::Dynamic {
                name: "a*b".into(),
                kind: DynamicKind::RegExp,
                timestamp: 0,
                disassembly: None,
            },
        });
        let resolved = resolve_frames(&profile);
        assert_eq!(resolved.frame_for_code(0), None);
        let regexp_idx = match resolved.frame_for_code(1) {
            Some(idx) => idx,
            None => panic!("RegExp code should have a frame"),
        };
        let regexp = match resolved.table.get(regexp_idx) {
            Some(f) => f,
            None => panic!("missing frame"),
        };
        assert_eq!(regexp.name, "RegExp: a*b");
    }
}
