//! The line model (`spec.md` §3) and its container. The historical
//! implementation threads an intrusive linked list through each line;
//! `spec.md` §9 asks for an index-addressable container plus a small edit
//! API instead, so `LineList` keeps lines in an arena (stable `LineId`s, so
//! `unknowns` can hold a back-pointer to an `equ` line even after other
//! lines are spliced around it) and a separate order vector that `remove`,
//! `splice_at`, and `replace` mutate directly.

use crate::expr::ParsedExpr;
use asm8085::{Directive, Opcode, Register, RegisterPair};
use std::ops::Range;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LineId(usize);

#[derive(Clone, Debug)]
pub enum Instr {
    None,
    Opcode(Opcode),
    Directive(Directive),
    /// An invocation of a user-defined macro, by name.
    Macro(String),
}

#[derive(Clone, Debug)]
pub enum ParsedArg {
    Register(Register),
    RegisterPair(RegisterPair),
    String(Vec<u8>),
    Expression(ParsedExpr),
}

/// Raw argument text plus its on-demand parse, per `spec.md` §3.
#[derive(Clone, Debug)]
pub struct Argument {
    pub raw_text: String,
    pub parsed: Option<ParsedArg>,
}

impl Argument {
    pub fn new(raw_text: impl Into<String>) -> Self {
        Argument {
            raw_text: raw_text.into(),
            parsed: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LineInfo {
    pub filename: String,
    /// 1-based; 0 marks a synthetic line with no source position (listing
    /// leaves its line-number column blank, per `spec.md` §6).
    pub lineno: u32,
}

#[derive(Clone, Debug)]
pub struct Line {
    pub raw_text: String,
    pub info: LineInfo,
    pub label: Option<String>,
    pub instr: Instr,
    pub args: Vec<Argument>,
    /// Most recent non-dotted label at this point in the file (`spec.md` §3).
    pub scope_anchor: String,

    pub visited: bool,
    pub location: u32,
    pub bytes: Vec<u8>,
    pub needs_second_pass: bool,
}

impl Line {
    pub fn synthetic(raw_text: impl Into<String>, filename: impl Into<String>) -> Self {
        Line {
            raw_text: raw_text.into(),
            info: LineInfo {
                filename: filename.into(),
                lineno: 0,
            },
            label: None,
            instr: Instr::None,
            args: Vec::new(),
            scope_anchor: String::new(),
            visited: false,
            location: 0,
            bytes: Vec::new(),
            needs_second_pass: false,
        }
    }
}

#[derive(Debug)]
struct Arena {
    slots: Vec<Option<Line>>,
}

impl Arena {
    fn new() -> Self {
        Arena { slots: Vec::new() }
    }

    fn alloc(&mut self, line: Line) -> LineId {
        let id = LineId(self.slots.len());
        self.slots.push(Some(line));
        id
    }

    fn get(&self, id: LineId) -> &Line {
        self.slots[id.0].as_ref().expect("LineId refers to a freed line")
    }

    fn get_mut(&mut self, id: LineId) -> &mut Line {
        self.slots[id.0].as_mut().expect("LineId refers to a freed line")
    }
}

/// The full program as an ordered, index-addressable sequence of lines.
#[derive(Debug)]
pub struct LineList {
    arena: Arena,
    order: Vec<LineId>,
}

impl LineList {
    pub fn new() -> Self {
        LineList {
            arena: Arena::new(),
            order: Vec::new(),
        }
    }

    pub fn from_lines(lines: Vec<Line>) -> Self {
        let mut list = LineList::new();
        list.splice_at(0, lines);
        list
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn id_at(&self, pos: usize) -> LineId {
        self.order[pos]
    }

    pub fn get(&self, pos: usize) -> &Line {
        self.arena.get(self.order[pos])
    }

    pub fn get_mut(&mut self, pos: usize) -> &mut Line {
        self.arena.get_mut(self.order[pos])
    }

    pub fn line(&self, id: LineId) -> &Line {
        self.arena.get(id)
    }

    pub fn line_mut(&mut self, id: LineId) -> &mut Line {
        self.arena.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Line> {
        self.order.iter().map(move |&id| self.arena.get(id))
    }

    /// Remove a contiguous range of positions from the active sequence. The
    /// underlying lines stay in the arena (any `LineId` captured before the
    /// removal, e.g. by `unknowns`, remains valid to read — it is simply no
    /// longer part of the assembled sequence).
    pub fn remove(&mut self, range: Range<usize>) {
        self.order.drain(range);
    }

    /// Insert a fresh list of lines at `pos`, shifting everything at or
    /// after `pos` forward. Returns the freshly allocated ids in order.
    pub fn splice_at(&mut self, pos: usize, lines: Vec<Line>) -> Vec<LineId> {
        let ids: Vec<LineId> = lines.into_iter().map(|l| self.arena.alloc(l)).collect();
        self.order.splice(pos..pos, ids.iter().copied());
        ids
    }

    /// Remove `range` and insert `lines` in its place.
    pub fn replace(&mut self, range: Range<usize>, lines: Vec<Line>) -> Vec<LineId> {
        let start = range.start;
        self.order.drain(range);
        self.splice_at(start, lines)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn line(text: &str) -> Line {
        Line::synthetic(text, "test")
    }

    #[test]
    fn splice_at_inserts_in_order() {
        let mut list = LineList::from_lines(vec![line("a"), line("c")]);
        list.splice_at(1, vec![line("b")]);
        let texts: Vec<&str> = list.iter().map(|l| l.raw_text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn remove_shrinks_order_but_keeps_ids_readable() {
        let mut list = LineList::from_lines(vec![line("a"), line("b"), line("c")]);
        let removed_id = list.id_at(1);
        list.remove(1..2);
        assert_eq!(list.len(), 2);
        assert_eq!(list.line(removed_id).raw_text, "b");
    }

    #[test]
    fn replace_swaps_a_range_for_new_lines() {
        let mut list = LineList::from_lines(vec![line("a"), line("invocation"), line("c")]);
        list.replace(1..2, vec![line("body1"), line("body2")]);
        let texts: Vec<&str> = list.iter().map(|l| l.raw_text.as_str()).collect();
        assert_eq!(texts, vec!["a", "body1", "body2", "c"]);
    }
}
