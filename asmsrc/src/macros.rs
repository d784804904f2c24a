//! Macro definitions and expansion (`spec.md` §3/§4.5.5): a parameterized
//! body is substituted textually (never at the AST level — a parenthesized
//! actual must survive intact into expression context, per `spec.md` §9)
//! and hygienic `@`-labels are renamed per expansion via a global counter.

use crate::line::LineInfo;
use std::cmp::Reverse;
use util::{string_replace, Replacement};

#[derive(Clone, Debug)]
pub struct MacroBodyLine {
    pub raw_text: String,
    pub info: LineInfo,
}

#[derive(Clone, Debug)]
pub struct Macro {
    pub name: String,
    pub formals: Vec<String>,
    pub body: Vec<MacroBodyLine>,
}

/// Strip one `(...)` pair that wraps the *entire* string, so a
/// parenthesized actual argument survives intact into expression context.
fn strip_wrapping_parens(s: &str) -> &str {
    let t = s.trim();
    if !t.starts_with('(') || !t.ends_with(')') {
        return s;
    }
    let mut depth = 0i32;
    for (i, c) in t.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && i != t.len() - 1 {
                    return s;
                }
            }
            _ => {}
        }
    }
    &t[1..t.len() - 1]
}

impl Macro {
    pub fn new(name: impl Into<String>, formals: Vec<String>) -> Self {
        Macro {
            name: name.into(),
            formals,
            body: Vec::new(),
        }
    }

    /// Expand one invocation. `expansion_count` is the assembler-wide
    /// counter (`spec.md` §4.5.1's `macro_expansion_count`), already
    /// incremented by the caller, used to build the hygiene tag.
    pub fn expand(
        &self,
        actuals: &[String],
        expansion_count: u32,
    ) -> Result<Vec<(String, LineInfo)>, String> {
        if actuals.len() != self.formals.len() {
            return Err(format!(
                "macro \"{}\" expects {} argument(s), got {}",
                self.name,
                self.formals.len(),
                actuals.len()
            ));
        }

        let tag = format!("_{}_{}_", self.name, expansion_count);

        let mut slot_strings: Vec<(String, String)> = self
            .formals
            .iter()
            .zip(actuals.iter())
            .map(|(formal, actual)| {
                (
                    format!("!{}", formal.trim()),
                    strip_wrapping_parens(actual).to_string(),
                )
            })
            .collect();
        slot_strings.sort_by_key(|(old, _)| Reverse(old.len()));

        let mut replacements = vec![Replacement { old: "@", new: &tag }];
        for (old, new) in &slot_strings {
            replacements.push(Replacement { old, new });
        }

        Ok(self
            .body
            .iter()
            .map(|line| (string_replace(&line.raw_text, &replacements), line.info.clone()))
            .collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn info() -> LineInfo {
        LineInfo {
            filename: "test".to_string(),
            lineno: 0,
        }
    }

    #[test]
    fn expands_formal_and_hygiene_tag() {
        let mut m = Macro::new("m", vec!["x".to_string()]);
        m.body.push(MacroBodyLine {
            raw_text: "@loop: mvi a, !x".to_string(),
            info: info(),
        });
        m.body.push(MacroBodyLine {
            raw_text: "jmp @loop".to_string(),
            info: info(),
        });

        let first = m.expand(&["5".to_string()], 1).unwrap();
        assert_eq!(first[0].0, "_m_1_loop: mvi a, 5");
        assert_eq!(first[1].0, "jmp _m_1_loop");

        let second = m.expand(&["5".to_string()], 2).unwrap();
        assert_ne!(first[0].0, second[0].0);
    }

    #[test]
    fn arity_mismatch_is_an_error() {
        let m = Macro::new("m", vec!["x".to_string(), "y".to_string()]);
        assert!(m.expand(&["1".to_string()], 1).is_err());
    }

    #[test]
    fn wrapping_parens_are_stripped_from_actual() {
        let mut m = Macro::new("m", vec!["x".to_string()]);
        m.body.push(MacroBodyLine {
            raw_text: "db !x".to_string(),
            info: info(),
        });
        let out = m.expand(&["(1 + 2)".to_string()], 1).unwrap();
        assert_eq!(out[0].0, "db 1 + 2");
    }

    #[test]
    fn longer_formal_name_wins_over_shorter_prefix() {
        let mut m = Macro::new("m", vec!["foo".to_string(), "foobar".to_string()]);
        m.body.push(MacroBodyLine {
            raw_text: "db !foobar, !foo".to_string(),
            info: info(),
        });
        let out = m.expand(&["1".to_string(), "2".to_string()], 1).unwrap();
        assert_eq!(out[0].0, "db 2, 1");
    }
}
