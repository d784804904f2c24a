//! Line-splitting pipeline and on-demand argument parsing (`spec.md` §4.4).

use crate::error::AssembleError;
use crate::expr::{self, ParsedExpr};
use crate::line::{Argument, Instr, Line, LineInfo, ParsedArg};
use asm8085::{Directive, Opcode, Register, RegisterPair};
use util::EnumFromStr;

/// Split a whole source file into its `Line`s, carrying `scope_anchor`
/// forward per `spec.md` §3's monotonicity invariant.
pub fn parse_source(source: &str, filename: &str) -> Result<Vec<Line>, AssembleError> {
    let mut lines = Vec::new();
    let mut anchor = String::new();
    for (i, raw) in source.lines().enumerate() {
        let line = parse_line(raw, filename, (i + 1) as u32, &anchor)?;
        anchor = line.scope_anchor.clone();
        lines.push(line);
    }
    Ok(lines)
}

pub fn parse_line(
    raw: &str,
    filename: &str,
    lineno: u32,
    prior_anchor: &str,
) -> Result<Line, AssembleError> {
    let stripped = strip_comment(raw);
    let (label, after_label) = split_label(stripped);
    let (word, rest) = next_word(after_label);
    let instr = classify(word);
    let args_text =
        split_args(rest).map_err(|e| AssembleError::new(filename, lineno, e))?;
    let args = args_text.into_iter().map(Argument::new).collect();

    let scope_anchor = match &label {
        Some(l) if !l.starts_with('.') => l.clone(),
        _ => prior_anchor.to_string(),
    };

    Ok(Line {
        raw_text: stripped.trim_end().to_string(),
        info: LineInfo {
            filename: filename.to_string(),
            lineno,
        },
        label,
        instr,
        args,
        scope_anchor,
        visited: false,
        location: 0,
        bytes: Vec::new(),
        needs_second_pass: false,
    })
}

/// First unquoted `;` starts a comment running to end-of-line (`spec.md`
/// §4.4 step 1). Quotes nest none of `'`, `"`, `` ` ``; a backslash inside
/// one escapes the following character.
fn strip_comment(s: &str) -> &str {
    let bytes = s.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = quote {
            if c == b'\\' && i + 1 < bytes.len() {
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            b'\'' | b'"' | b'`' => {
                quote = Some(c);
                i += 1;
            }
            b';' => return &s[..i],
            _ => i += 1,
        }
    }
    s
}

/// Step 2: if column 0 is non-whitespace, read until whitespace or `:`.
fn split_label(line: &str) -> (Option<String>, &str) {
    if line.is_empty() || line.as_bytes()[0].is_ascii_whitespace() {
        return (None, line);
    }
    let end = util::scan_ahead(line, |c| c.is_ascii_whitespace() || c == b':', true);
    let label = line[..end].to_string();
    let rest = if line.as_bytes().get(end) == Some(&b':') {
        &line[end + 1..]
    } else {
        &line[end..]
    };
    (Some(label), rest)
}

fn next_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    let end = util::scan_ahead(s, |c| c.is_ascii_whitespace(), true);
    (&s[..end], &s[end..])
}

fn classify(word: &str) -> Instr {
    if word.is_empty() {
        Instr::None
    } else if word == "=" {
        Instr::Directive(Directive::Equ)
    } else if let Ok(op) = Opcode::from_str(word) {
        Instr::Opcode(op)
    } else if let Ok(d) = Directive::from_str(word) {
        Instr::Directive(d)
    } else {
        Instr::Macro(word.to_string())
    }
}

/// Step 4: split on commas outside `(...)` nesting and outside string
/// literals (`'...'`, `"..."`, `` `...` ``, with backslash-escape inside).
fn split_args(s: &str) -> Result<Vec<String>, String> {
    let bytes = s.as_bytes();
    let mut args = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut start = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = quote {
            if c == b'\\' && i + 1 < bytes.len() {
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            b'\'' | b'"' | b'`' => {
                quote = Some(c);
                i += 1;
            }
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                depth -= 1;
                if depth < 0 {
                    return Err("unmatched ')' in argument list".to_string());
                }
                i += 1;
            }
            b',' if depth == 0 => {
                args.push(s[start..i].trim().to_string());
                i += 1;
                start = i;
            }
            _ => i += 1,
        }
    }

    if quote.is_some() {
        return Err("unterminated string literal".to_string());
    }
    if depth != 0 {
        return Err("unmatched '(' in argument list".to_string());
    }

    let last = s[start..].trim();
    if !last.is_empty() || !args.is_empty() {
        args.push(last.to_string());
    }
    Ok(args)
}

fn decode_escape(rest: &[u8]) -> Result<(u8, usize), String> {
    if rest.is_empty() {
        return Err("dangling backslash in string literal".to_string());
    }
    match rest[0] {
        b'a' => Ok((0x07, 1)),
        b'b' => Ok((0x08, 1)),
        b'e' => Ok((0x1b, 1)),
        b'f' => Ok((0x0c, 1)),
        b'n' => Ok((b'\n', 1)),
        b'r' => Ok((b'\r', 1)),
        b't' => Ok((b'\t', 1)),
        b'v' => Ok((0x0b, 1)),
        b'\\' => Ok((b'\\', 1)),
        b'\'' => Ok((b'\'', 1)),
        b'"' => Ok((b'"', 1)),
        b'x' => {
            let hex_len = rest[1..]
                .iter()
                .take(2)
                .take_while(|c| c.is_ascii_hexdigit())
                .count();
            if hex_len == 0 {
                return Err("invalid \\x escape".to_string());
            }
            let digits = std::str::from_utf8(&rest[1..1 + hex_len]).unwrap();
            let value = u8::from_str_radix(digits, 16)
                .map_err(|_| "invalid \\x escape".to_string())?;
            Ok((value, 1 + hex_len))
        }
        c if (b'0'..=b'7').contains(&c) => {
            let oct_len = rest
                .iter()
                .take(3)
                .take_while(|c| (b'0'..=b'7').contains(c))
                .count();
            let digits = std::str::from_utf8(&rest[..oct_len]).unwrap();
            let value = u16::from_str_radix(digits, 8)
                .map_err(|_| "invalid octal escape".to_string())?;
            if value > 0xFF {
                return Err("octal escape out of byte range".to_string());
            }
            Ok((value as u8, oct_len))
        }
        c => Err(format!("unknown string escape \\{}", c as char)),
    }
}

/// `spec.md` §4.4: surrounded by matching `'` or `"`; anything after the
/// closing delimiter that is not whitespace is an error.
fn parse_string_literal(raw: &str) -> Result<Vec<u8>, String> {
    let s = raw.trim();
    let bytes = s.as_bytes();
    if bytes.is_empty() || (bytes[0] != b'\'' && bytes[0] != b'"') {
        return Err("expected a string literal".to_string());
    }
    let quote = bytes[0];
    let mut out = Vec::new();
    let mut i = 1;
    let mut closed = false;

    while i < bytes.len() {
        let c = bytes[i];
        if c == quote {
            closed = true;
            i += 1;
            break;
        }
        if c == b'\\' {
            let (byte, consumed) = decode_escape(&bytes[i + 1..])?;
            out.push(byte);
            i += 1 + consumed;
            continue;
        }
        out.push(c);
        i += 1;
    }

    if !closed {
        return Err("unterminated string literal".to_string());
    }
    if !s[i..].trim().is_empty() {
        return Err("unexpected text after string literal".to_string());
    }
    Ok(out)
}

impl Argument {
    pub fn as_register(&mut self) -> Result<Register, String> {
        let r = Register::from_str(self.raw_text.trim()).map_err(|e| e.to_string())?;
        self.parsed = Some(ParsedArg::Register(r));
        Ok(r)
    }

    pub fn as_register_pair(&mut self) -> Result<RegisterPair, String> {
        let rp = RegisterPair::from_str(self.raw_text.trim()).map_err(|e| e.to_string())?;
        self.parsed = Some(ParsedArg::RegisterPair(rp));
        Ok(rp)
    }

    pub fn as_string(&mut self) -> Result<Vec<u8>, String> {
        let bytes = parse_string_literal(&self.raw_text)?;
        self.parsed = Some(ParsedArg::String(bytes.clone()));
        Ok(bytes)
    }

    pub fn as_expression(&mut self, scope_anchor: &str) -> Result<ParsedExpr, String> {
        let expr = expr::parse(&self.raw_text, scope_anchor).map_err(|e| e.to_string())?;
        self.parsed = Some(ParsedArg::Expression(expr.clone()));
        Ok(expr)
    }

    /// Union `STRING | EXPRESSION`: try string first; on failure fall
    /// through to expression without re-raising the string error.
    pub fn as_string_or_expression(&mut self, scope_anchor: &str) -> Result<ParsedArg, String> {
        if let Ok(bytes) = parse_string_literal(&self.raw_text) {
            self.parsed = Some(ParsedArg::String(bytes.clone()));
            return Ok(ParsedArg::String(bytes));
        }
        let expr = self.as_expression(scope_anchor)?;
        Ok(ParsedArg::Expression(expr))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn label_and_opcode_and_args() {
        let line = parse_line("foo: mvi a, 5 ; comment", "t.asm", 1, "").unwrap();
        assert_eq!(line.label.as_deref(), Some("foo"));
        assert!(matches!(&line.instr, Instr::Opcode(Opcode::Mvi)));
        assert_eq!(line.args.len(), 2);
        assert_eq!(line.args[0].raw_text, "a");
        assert_eq!(line.args[1].raw_text, "5");
        assert_eq!(line.raw_text, "foo: mvi a, 5");
    }

    #[test]
    fn directive_and_macro_classification() {
        let line = parse_line("   org 0x100", "t.asm", 2, "").unwrap();
        assert!(matches!(&line.instr, Instr::Directive(Directive::Org)));

        let line = parse_line("delay 10", "t.asm", 3, "").unwrap();
        assert!(matches!(&line.instr, Instr::Macro(name) if name == "delay"));
    }

    #[test]
    fn equ_alias_via_equals_sign() {
        let line = parse_line("foo = 5", "t.asm", 1, "").unwrap();
        assert!(matches!(&line.instr, Instr::Directive(Directive::Equ)));
        assert_eq!(line.args[0].raw_text, "5");
    }

    #[test]
    fn scope_anchor_carries_forward_and_updates_on_top_level_label() {
        let mut anchor = String::new();
        let l1 = parse_line("main: nop", "t.asm", 1, &anchor).unwrap();
        anchor = l1.scope_anchor.clone();
        let l2 = parse_line(".loop: nop", "t.asm", 2, &anchor).unwrap();
        assert_eq!(l2.scope_anchor, "main");
        anchor = l2.scope_anchor.clone();
        let l3 = parse_line("other: nop", "t.asm", 3, &anchor).unwrap();
        assert_eq!(l3.scope_anchor, "other");
    }

    #[test]
    fn comma_inside_parens_and_quotes_is_not_a_split_point() {
        let args = split_args(" (1,2), \"a,b\" ").unwrap();
        assert_eq!(args, vec!["(1,2)", "\"a,b\""]);
    }

    #[test]
    fn empty_argument_list_is_empty() {
        assert_eq!(split_args("   ").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn string_escapes_decode() {
        let mut arg = Argument::new("\"a\\nb\\x41\\101\"");
        let bytes = arg.as_string().unwrap();
        assert_eq!(bytes, b"a\nbAA");
    }

    #[test]
    fn string_or_expression_falls_through() {
        let mut arg = Argument::new("1 + 2");
        let parsed = arg.as_string_or_expression("").unwrap();
        assert!(matches!(parsed, ParsedArg::Expression(_)));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = parse_line("db \"abc", "t.asm", 1, "");
        assert!(err.is_err());
    }
}
