/// Splits a stream of byte chunks into logical log lines.
///
/// Chunk boundaries may fall anywhere, including between the `\r` and
/// `\n` of a CRLF terminator; the produced line sequence is identical no
/// matter how the input is chunked. Both `\n` and `\r`/`\r\n` terminate a
/// line, and a final unterminated line is still emitted.
///
/// The splitter assumes `\n`-only input on its fast path and switches to
/// a per-byte scan once the first carriage return is observed; both paths
/// produce the same lines.
pub struct LineSplitter {
    pending: Vec<u8>,
    saw_carriage_return: bool,
    /// A chunk ended right after `\r`; a leading `\n` in the next chunk
    /// belongs to that terminator.
    skip_newline: bool,
}

impl LineSplitter {
    pub fn new() -> LineSplitter {
        LineSplitter {
            pending: Vec::new(),
            saw_carriage_return: false,
            skip_newline: false,
        }
    }

    /// Feed one chunk, appending each completed line to `out`.
    ///
    /// Lines are decoded lossily: invalid UTF-8 becomes replacement
    /// characters rather than failing the stream.
    pub fn push_chunk(&mut self, chunk: &[u8], out: &mut Vec<String>) {
        let mut chunk = chunk;
        if self.skip_newline {
            self.skip_newline = false;
            if chunk.first() == Some(&b'\n') {
                chunk = &chunk[1..];
            }
        }
        if !self.saw_carriage_return && chunk.contains(&b'\r') {
            self.saw_carriage_return = true;
        }

        if self.saw_carriage_return {
            self.push_chunk_slow(chunk, out);
        } else {
            self.push_chunk_fast(chunk, out);
        }
    }

    /// `\n`-only fast path: split on newline, no per-byte state.
    fn push_chunk_fast(&mut self, mut chunk: &[u8], out: &mut Vec<String>) {
        while let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
            self.pending.extend_from_slice(&chunk[..pos]);
            out.push(take_line(&mut self.pending));
            chunk = &chunk[pos + 1..];
        }
        self.pending.extend_from_slice(chunk);
    }

    /// Per-byte scan handling `\n`, `\r` and `\r\n`.
    fn push_chunk_slow(&mut self, chunk: &[u8], out: &mut Vec<String>) {
        let mut i = 0;
        while i < chunk.len() {
            match chunk[i] {
                b'\n' => out.push(take_line(&mut self.pending)),
                b'\r' => {
                    out.push(take_line(&mut self.pending));
                    if i + 1 < chunk.len() {
                        if chunk[i + 1] == b'\n' {
                            i += 1;
                        }
                    } else {
                        self.skip_newline = true;
                    }
                }
                b => self.pending.push(b),
            }
            i += 1;
        }
    }

    /// Flush the final unterminated line, if any.
    pub fn finish(&mut self, out: &mut Vec<String>) {
        if !self.pending.is_empty() {
            out.push(take_line(&mut self.pending));
        }
    }

    /// Split a complete in-memory input, chunk iteration included.
    pub fn split_all<'a, I>(chunks: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut splitter = LineSplitter::new();
        let mut out = Vec::new();
        for chunk in chunks {
            splitter.push_chunk(chunk, &mut out);
        }
        splitter.finish(&mut out);
        out
    }
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::new()
    }
}

fn take_line(pending: &mut Vec<u8>) -> String {
    let bytes = std::mem::take(pending);
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(chunks: &[&[u8]]) -> Vec<String> {
        LineSplitter::split_all(chunks.iter().copied())
    }

    #[test]
    fn chunk_boundaries_do_not_matter() {
        let whole = split(&[b"a,1\nb,2\n"]);
        let two = split(&[b"a,1\n", b"b,2\n"]);
        let mid_line = split(&[b"a,1", b"\nb,2\n"]);
        assert_eq!(whole, vec!["a,1", "b,2"]);
        assert_eq!(two, whole);
        assert_eq!(mid_line, whole);
    }

    #[test]
    fn crlf_and_bare_cr() {
        assert_eq!(split(&[b"a\r\nb\rc\n"]), vec!["a", "b", "c"]);
    }

    #[test]
    fn crlf_split_between_chunks() {
        assert_eq!(split(&[b"a\r", b"\nb\n"]), vec!["a", "b"]);
    }

    #[test]
    fn cr_at_chunk_end_without_lf() {
        assert_eq!(split(&[b"a\r", b"b\n"]), vec!["a", "b"]);
    }

    #[test]
    fn final_unterminated_line_is_emitted() {
        assert_eq!(split(&[b"a\nb"]), vec!["a", "b"]);
    }

    #[test]
    fn cr_observed_mid_stream_switches_paths() {
        // First chunk takes the fast path, second forces the slow path;
        // results must agree with a single-chunk run.
        let staged = split(&[b"a\nb\n", b"c\r\nd\n"]);
        let whole = split(&[b"a\nb\nc\r\nd\n"]);
        assert_eq!(staged, whole);
        assert_eq!(staged, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let lines = split(&[b"ok\nbad\xff\n"]);
        assert_eq!(lines[0], "ok");
        assert!(lines[1].starts_with("bad"));
        assert!(lines[1].contains('\u{fffd}'));
    }

    #[test]
    fn empty_input_yields_no_lines() {
        assert!(split(&[b""]).is_empty());
    }
}
