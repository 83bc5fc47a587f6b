use log::warn;

/// Cursor over the comma-delimited fields of one log line.
///
/// Splitting is on bare `,` with no quoting layer; escaping is
/// field-content-specific and applied by the typed accessors. Ops with
/// variable trailing argument counts (`tick` stack frames) drain the
/// remainder with [`FieldReader::rest`].
pub struct FieldReader<'a> {
    rest: Option<&'a str>,
}

impl<'a> FieldReader<'a> {
    pub fn new(line: &'a str) -> FieldReader<'a> {
        FieldReader { rest: Some(line) }
    }

    /// The next raw field, comma-trimmed, unmodified.
    pub fn next_raw(&mut self) -> Option<&'a str> {
        let rest = self.rest?;
        match rest.find(',') {
            Some(pos) => {
                self.rest = Some(&rest[pos + 1..]);
                Some(&rest[..pos])
            }
            None => {
                self.rest = None;
                Some(rest)
            }
        }
    }

    /// Peek at the next raw field without consuming it.
    pub fn peek_raw(&self) -> Option<&'a str> {
        let rest = self.rest?;
        Some(match rest.find(',') {
            Some(pos) => &rest[..pos],
            None => rest,
        })
    }

    /// The next field parsed as a signed integer (decimal or `0x` hex).
    pub fn next_int(&mut self) -> Option<i64> {
        parse_int(self.next_raw()?)
    }

    /// The next field parsed as an unsigned address (decimal or `0x` hex).
    pub fn next_address(&mut self) -> Option<u64> {
        parse_address(self.next_raw()?)
    }

    /// The next field with backslash escapes decoded.
    pub fn next_string(&mut self) -> Option<String> {
        self.next_raw().map(unescape)
    }

    /// All remaining raw fields.
    pub fn rest(&mut self) -> Vec<&'a str> {
        let mut out = Vec::new();
        while let Some(field) = self.next_raw() {
            out.push(field);
        }
        out
    }

    /// Read a name field that may itself contain unescaped commas.
    ///
    /// Fields are re-joined until the next address-shaped field (the
    /// start of the fixed trailing arguments) or end of line. Returns the
    /// joined, unescaped name; the address-shaped field is left
    /// unconsumed.
    pub fn next_name_field(&mut self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        loop {
            match self.peek_raw() {
                Some(field) if parts.is_empty() || !is_address_shaped(field) => {
                    parts.push(field);
                    self.next_raw();
                }
                _ => break,
            }
        }
        unescape(&parts.join(","))
    }
}

/// Parse a signed integer field. Accepts decimal and `0x`-prefixed hex,
/// with an optional leading `-` or `+` (tick stack frames encode deltas
/// with an explicit sign).
pub fn parse_int(field: &str) -> Option<i64> {
    let field = field.trim();
    let (negative, digits) = match field.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, field.strip_prefix('+').unwrap_or(field)),
    };
    let value = parse_address(digits)? as i64;
    Some(if negative { -value } else { value })
}

/// Parse an unsigned address field. Accepts decimal and `0x`-prefixed
/// hex.
pub fn parse_address(field: &str) -> Option<u64> {
    let field = field.trim();
    match field.strip_prefix("0x").or_else(|| field.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => field.parse().ok(),
    }
}

/// Whether a field looks like a logged address (`0x` + hex digits).
///
/// Used by the `code-creation` name re-join to find where a
/// comma-containing name ends and the fixed trailing arguments begin.
pub fn is_address_shaped(field: &str) -> bool {
    field
        .strip_prefix("0x")
        .is_some_and(|hex| !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// Decode backslash escapes in a string field.
///
/// Handles `\n \r \t \0 \b \f \v`, `\xHH`, `\uHHHH` and escaped
/// backslash/comma. A malformed escape truncates the string at the point
/// of the error rather than failing the whole line.
pub fn unescape(field: &str) -> String {
    if !field.contains('\\') {
        return field.to_string();
    }
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let decoded = match chars.next() {
            Some('n') => Some('\n'),
            Some('r') => Some('\r'),
            Some('t') => Some('\t'),
            Some('0') => Some('\0'),
            Some('b') => Some('\u{8}'),
            Some('f') => Some('\u{c}'),
            Some('v') => Some('\u{b}'),
            Some('x') => hex_escape(&mut chars, 2),
            Some('u') => hex_escape(&mut chars, 4),
            Some(other) => Some(other),
            None => None,
        };
        match decoded {
            Some(ch) => out.push(ch),
            None => {
                warn!("malformed escape in field {field:?}, truncating");
                break;
            }
        }
    }
    out
}

fn hex_escape(chars: &mut std::str::Chars<'_>, len: usize) -> Option<char> {
    let mut value: u32 = 0;
    for _ in 0..len {
        value = value * 16 + chars.next()?.to_digit(16)?;
    }
    char::from_u32(value)
}
