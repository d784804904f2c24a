//! The pass driver: pre-scan sanity checks, the first-pass per-line state
//! machine, the directive catalog, conditional/`repeat` excision, macro
//! expansion integration, the forward-reference resolver, and the second
//! pass that fills deferred bytes (`spec.md` §4.5, `SPEC_FULL.md` §4.5.4).

use crate::dirstack::DirStack;
use crate::error::AssembleError;
use crate::expr::{self, BacktickEncoder, ParsedExpr};
use crate::fatal;
use crate::line::{Instr, Line, LineId, LineInfo, LineList, ParsedArg};
use crate::macros::Macro;
use crate::orgstack::OrgStack;
use crate::varspace::VarSpace;
use asm8085::constants::{MAX_INCLUDE_DEPTH, MAX_MACRO_EXPANSIONS};
use asm8085::{ArgShape, CpuMode, Directive, Opcode};
use std::collections::HashMap;
use std::fmt;
use util::EnumFromStr;

pub use crate::error::Warning;

/// Holds the `knowns`/`unknowns` stores, macro table, and the bookkeeping
/// `spec.md` §4.5.1 assigns to one assembly job.
pub struct AssemblerState {
    pub macros: HashMap<String, Macro>,
    pub knowns: VarSpace<i64>,
    pub unknowns: VarSpace<LineId>,
    pub org_stack: OrgStack,
    pub dirs: DirStack,
    pub include_count: u32,
    pub macro_expansion_count: u32,
    pub cpu_mode: CpuMode,
    pub warnings: Vec<Warning>,
}

impl AssemblerState {
    pub fn new() -> Self {
        AssemblerState {
            macros: HashMap::new(),
            knowns: VarSpace::new(),
            unknowns: VarSpace::new(),
            org_stack: OrgStack::new(),
            dirs: DirStack::new("."),
            include_count: 0,
            macro_expansion_count: 0,
            cpu_mode: CpuMode::default(),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct Assembled {
    pub list: LineList,
    pub knowns: VarSpace<i64>,
    pub warnings: Vec<Warning>,
}

/// First-pass aborts immediately on error; second-pass accumulates so every
/// failed `assert` is reported before the job exits (`spec.md` §7).
#[derive(Debug)]
pub enum AssembleFailure {
    FirstPass(AssembleError),
    SecondPass(Vec<AssembleError>),
}

impl fmt::Display for AssembleFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AssembleFailure::FirstPass(e) => write!(f, "{}", e),
            AssembleFailure::SecondPass(errs) => {
                for (i, e) in errs.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}", e)?;
                }
                Ok(())
            }
        }
    }
}

pub fn assemble(source: &str, filename: &str) -> Result<Assembled, AssembleFailure> {
    assemble_with_cpu(source, filename, CpuMode::default())
}

/// Like [`assemble`], but starts in the given cpu mode instead of the
/// default (a `cpu` directive partway through the source can still switch
/// it again, per its usual semantics).
pub fn assemble_with_cpu(
    source: &str,
    filename: &str,
    cpu_mode: CpuMode,
) -> Result<Assembled, AssembleFailure> {
    let lines = crate::parser::parse_source(source, filename).map_err(AssembleFailure::FirstPass)?;
    sanity_checks(&lines).map_err(AssembleFailure::FirstPass)?;

    let mut list = LineList::from_lines(lines);
    let mut state = AssemblerState::new();
    state.cpu_mode = cpu_mode;
    first_pass(&mut list, &mut state).map_err(AssembleFailure::FirstPass)?;
    resolve_all(&list, &mut state);

    let (mut warnings, errors) = complete(&mut list, &state);
    if !errors.is_empty() {
        return Err(AssembleFailure::SecondPass(errors));
    }
    warnings.extend(state.warnings.clone());

    Ok(Assembled {
        list,
        knowns: state.knowns,
        warnings,
    })
}

fn make_backtick(cpu_mode: CpuMode) -> impl Fn(&str) -> Result<Vec<u8>, String> {
    move |text: &str| {
        let trimmed = text.trim();
        let end = trimmed
            .find(|c: char| c.is_whitespace() || c == ',')
            .unwrap_or(trimmed.len());
        let word = &trimmed[..end];
        let op = Opcode::from_str(word).map_err(|e| e.to_string())?;
        if !op.available_in(cpu_mode) {
            return Err(format!("opcode \"{}\" not available for the selected cpu", word));
        }
        Ok(vec![op.def().base])
    }
}

fn arity_error(info: &LineInfo, what: &str) -> AssembleError {
    AssembleError::new(&info.filename, info.lineno, what.to_string())
}

// ---------------------------------------------------------------------
// §4.5.2 Pre-scan
// ---------------------------------------------------------------------

fn validate_label(label: &str, inside_macro: bool, info: &LineInfo) -> Result<(), AssembleError> {
    let mut chars = label.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return Err(AssembleError::new(&info.filename, info.lineno, "empty label")),
    };
    let ok_first = first == '_' || first == '.' || first.is_ascii_alphabetic() || (first == '@' && inside_macro);
    if !ok_first {
        if first == '@' {
            return Err(AssembleError::new(
                &info.filename,
                info.lineno,
                format!("macro-local label \"{}\" used outside a macro body", label),
            ));
        }
        return Err(AssembleError::new(&info.filename, info.lineno, format!("invalid label \"{}\"", label)));
    }
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if !rest_ok {
        return Err(AssembleError::new(&info.filename, info.lineno, format!("invalid label \"{}\"", label)));
    }
    Ok(())
}

/// `spec.md` §4.5.2: catches macro/equ without a name, labeled closing
/// directives, unmatched `endm`/`endif`/`endr`, stray `@`-labels, and
/// illegal label characters, before a single byte is assembled.
pub fn sanity_checks(lines: &[Line]) -> Result<(), AssembleError> {
    let mut inside_macro = false;
    let mut cond_depth = 0i32;
    let mut repeat_depth = 0i32;

    for line in lines {
        if let Some(label) = &line.label {
            validate_label(label, inside_macro, &line.info)?;
        }

        match &line.instr {
            Instr::Directive(Directive::Macro) => {
                if inside_macro {
                    return Err(AssembleError::new(
                        &line.info.filename,
                        line.info.lineno,
                        "nested macro definitions are not allowed",
                    ));
                }
                if line.label.is_none() {
                    return Err(AssembleError::new(&line.info.filename, line.info.lineno, "'macro' requires a label naming it"));
                }
                inside_macro = true;
            }
            Instr::Directive(Directive::Endm) => {
                if !inside_macro {
                    return Err(AssembleError::new(&line.info.filename, line.info.lineno, "'endm' without matching 'macro'"));
                }
                if line.label.is_some() {
                    return Err(AssembleError::new(&line.info.filename, line.info.lineno, "'endm' must not be labeled"));
                }
                inside_macro = false;
            }
            Instr::Directive(Directive::Equ) => {
                if line.label.is_none() {
                    return Err(AssembleError::new(&line.info.filename, line.info.lineno, "'equ' requires a label naming it"));
                }
            }
            Instr::Directive(Directive::If) | Instr::Directive(Directive::Ifdef) | Instr::Directive(Directive::Ifndef) => {
                if line.label.is_some() {
                    return Err(AssembleError::new(&line.info.filename, line.info.lineno, "conditional directives must not be labeled"));
                }
                cond_depth += 1;
            }
            Instr::Directive(Directive::Endif) => {
                if line.label.is_some() {
                    return Err(AssembleError::new(&line.info.filename, line.info.lineno, "'endif' must not be labeled"));
                }
                cond_depth -= 1;
                if cond_depth < 0 {
                    return Err(AssembleError::new(&line.info.filename, line.info.lineno, "'endif' without matching 'if'"));
                }
            }
            Instr::Directive(Directive::Repeat) => repeat_depth += 1,
            Instr::Directive(Directive::Endr) => {
                repeat_depth -= 1;
                if repeat_depth < 0 {
                    return Err(AssembleError::new(&line.info.filename, line.info.lineno, "'endr' without matching 'repeat'"));
                }
            }
            _ => {}
        }
    }

    if inside_macro {
        let last = &lines[lines.len() - 1];
        return Err(AssembleError::new(&last.info.filename, last.info.lineno, "macro without matching 'endm'"));
    }
    if cond_depth != 0 {
        let last = &lines[lines.len() - 1];
        return Err(AssembleError::new(&last.info.filename, last.info.lineno, "'if' without matching 'endif'"));
    }
    if repeat_depth != 0 {
        let last = &lines[lines.len() - 1];
        return Err(AssembleError::new(&last.info.filename, last.info.lineno, "'repeat' without matching 'endr'"));
    }

    Ok(())
}

// ---------------------------------------------------------------------
// §4.5.3 First pass
// ---------------------------------------------------------------------

enum DirectiveOutcome {
    Advance,
    JumpTo(usize),
    Stop,
}

/// Whether a directive (or macro-call classification) binds its own label
/// meaning instead of going through the generic "label = current location"
/// binding that happens before dispatch.
fn is_self_naming(instr: &Instr) -> bool {
    matches!(
        instr,
        Instr::Directive(Directive::Equ) | Instr::Directive(Directive::Org) | Instr::Directive(Directive::Macro) | Instr::Macro(_)
    )
}

fn first_pass(list: &mut LineList, state: &mut AssemblerState) -> Result<(), AssembleError> {
    let mut pos = 0usize;

    while pos < list.len() {
        let location = if pos == 0 {
            0u32
        } else {
            let prev = list.get(pos - 1);
            prev.location + prev.bytes.len() as u32
        };
        if location > 0xFFFF {
            let l = list.get(pos);
            fatal!("{}:{}: location overflowed the 64k address space", l.info.filename, l.info.lineno);
        }
        list.get_mut(pos).location = location;

        let scope_anchor = list.get(pos).scope_anchor.clone();
        state.knowns.set_base(&scope_anchor);
        state.unknowns.set_base(&scope_anchor);

        let label = list.get(pos).label.clone();
        let instr = list.get(pos).instr.clone();

        if !is_self_naming(&instr) {
            if let Some(lbl) = &label {
                if state.knowns.contains(lbl) || state.unknowns.contains(lbl) {
                    let info = list.get(pos).info.clone();
                    return Err(AssembleError::new(
                        &info.filename,
                        info.lineno,
                        format!("label \"{}\" is already defined", lbl),
                    ));
                }
                state.knowns.set(lbl, location as i64);
            }
        }

        let outcome = match instr {
            Instr::None => {
                list.get_mut(pos).bytes = Vec::new();
                DirectiveOutcome::Advance
            }
            Instr::Opcode(op) => {
                encode_opcode(op, list, pos, state)?;
                DirectiveOutcome::Advance
            }
            Instr::Directive(d) => {
                let outcome = dispatch_directive(d, list, pos, state)?;
                resolve_all(list, state);
                outcome
            }
            Instr::Macro(name) => {
                let outcome = expand_macro_invocation(&name, list, pos, state)?;
                resolve_all(list, state);
                outcome
            }
        };

        pos = match outcome {
            DirectiveOutcome::Advance => pos + 1,
            DirectiveOutcome::JumpTo(p) => p,
            DirectiveOutcome::Stop => break,
        };
    }

    Ok(())
}

fn dispatch_directive(
    d: Directive,
    list: &mut LineList,
    pos: usize,
    state: &mut AssemblerState,
) -> Result<DirectiveOutcome, AssembleError> {
    match d {
        Directive::Org => dir_org(list, pos, state),
        Directive::Db => dir_db(list, pos, state),
        Directive::Dw => dir_dw(list, pos, state),
        Directive::Ds => dir_ds(list, pos, state),
        Directive::Equ => dir_equ(list, pos, state),
        Directive::Include => dir_include(list, pos, state),
        Directive::Incbin => dir_incbin(list, pos, state),
        Directive::Macro => dir_macro(list, pos, state),
        Directive::Endm => {
            let info = list.get(pos).info.clone();
            fatal!("{}:{}: reached 'endm' outside of macro collection", info.filename, info.lineno);
        }
        Directive::If | Directive::Ifdef | Directive::Ifndef => dir_if_family(d, list, pos, state),
        Directive::Endif => {
            let info = list.get(pos).info.clone();
            fatal!("{}:{}: reached 'endif' outside of conditional excision", info.filename, info.lineno);
        }
        Directive::Pushd => dir_pushd(list, pos, state),
        Directive::Popd => dir_popd(list, pos, state),
        Directive::Align => dir_align(list, pos, state),
        Directive::Assert => dir_assert(list, pos),
        Directive::Pushorg => dir_pushorg(list, pos, state),
        Directive::Poporg => dir_poporg(list, pos, state),
        Directive::Repeat => dir_repeat(list, pos, state),
        Directive::Endr => {
            let info = list.get(pos).info.clone();
            fatal!("{}:{}: reached 'endr' outside of repeat collection", info.filename, info.lineno);
        }
        Directive::End => Ok(dir_end(list, pos)),
        Directive::Cpu => dir_cpu(list, pos, state),
    }
}

// ---------------------------------------------------------------------
// Opcode byte synthesis
// ---------------------------------------------------------------------

fn encode_opcode(op: Opcode, list: &mut LineList, pos: usize, state: &AssemblerState) -> Result<(), AssembleError> {
    let info = list.get(pos).info.clone();
    if !op.available_in(state.cpu_mode) {
        return Err(AssembleError::new(
            &info.filename,
            info.lineno,
            "opcode is not available for the currently selected cpu",
        ));
    }

    let def = op.def();
    let scope_anchor = list.get(pos).scope_anchor.clone();
    let nargs = list.get(pos).args.len();
    let backtick_fn = make_backtick(state.cpu_mode);
    let backtick: &BacktickEncoder = &backtick_fn;

    let (bytes, needs_second_pass) = match def.shape {
        ArgShape::None => {
            if nargs != 0 {
                return Err(arity_error(&info, "this opcode takes no arguments"));
            }
            (vec![def.base], false)
        }
        ArgShape::Register => {
            if nargs != 1 {
                return Err(arity_error(&info, "this opcode takes one register argument"));
            }
            let r = list.get_mut(pos).args[0].as_register().map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
            (vec![def.base | r.encoding()], false)
        }
        ArgShape::RegisterShift3 => {
            if nargs != 1 {
                return Err(arity_error(&info, "this opcode takes one register argument"));
            }
            let r = list.get_mut(pos).args[0].as_register().map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
            (vec![def.base | (r.encoding() << 3)], false)
        }
        ArgShape::RegisterPair => {
            if nargs != 1 {
                return Err(arity_error(&info, "this opcode takes one register pair argument"));
            }
            let rp = list.get_mut(pos)
                .args[0]
                .as_register_pair()
                .map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
            (vec![def.base | (rp.encoding() << 4)], false)
        }
        ArgShape::TwoRegisters => {
            if nargs != 2 {
                return Err(arity_error(&info, "this opcode takes a destination and a source register"));
            }
            let d = list.get_mut(pos).args[0].as_register().map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
            let s = list.get_mut(pos).args[1].as_register().map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
            (vec![def.base | (d.encoding() << 3) | s.encoding()], false)
        }
        ArgShape::ThreeConst => {
            if nargs != 1 {
                return Err(arity_error(&info, "this opcode takes one restart-number argument"));
            }
            let expr_ = list.get_mut(pos)
                .args[0]
                .as_expression(&scope_anchor)
                .map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
            if expr_.contains_undefined_names(&state.knowns) {
                return Err(AssembleError::new(&info.filename, info.lineno, "restart number must not contain undefined names"));
            }
            let v = expr::eval(&expr_, &state.knowns, list.get(pos).location as i64, backtick)
                .map_err(|e| AssembleError::new(&info.filename, info.lineno, e.to_string()))?;
            if !(0..=7).contains(&v) {
                return Err(AssembleError::new(&info.filename, info.lineno, "restart number must be in 0..=7"));
            }
            (vec![def.base | ((v as u8) << 3)], false)
        }
        ArgShape::Immediate(len) => {
            if nargs != 1 {
                return Err(arity_error(&info, "this opcode takes one expression argument"));
            }
            list.get_mut(pos)
                .args[0]
                .as_expression(&scope_anchor)
                .map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
            let mut b = vec![def.base];
            b.extend(std::iter::repeat(0u8).take(len as usize));
            (b, true)
        }
        ArgShape::RegImmediate8 => {
            if nargs != 2 {
                return Err(arity_error(&info, "this opcode takes a register and an immediate"));
            }
            let r = list.get_mut(pos).args[0].as_register().map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
            list.get_mut(pos)
                .args[1]
                .as_expression(&scope_anchor)
                .map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
            (vec![def.base | (r.encoding() << 3), 0], true)
        }
        ArgShape::RegPairImmediate16 => {
            if nargs != 2 {
                return Err(arity_error(&info, "this opcode takes a register pair and an immediate"));
            }
            let rp = list.get_mut(pos)
                .args[0]
                .as_register_pair()
                .map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
            list.get_mut(pos)
                .args[1]
                .as_expression(&scope_anchor)
                .map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
            (vec![def.base | (rp.encoding() << 4), 0, 0], true)
        }
    };

    let l = list.get_mut(pos);
    l.bytes = bytes;
    l.needs_second_pass = needs_second_pass;
    Ok(())
}

// ---------------------------------------------------------------------
// §4.5.4 Directive catalog
// ---------------------------------------------------------------------

fn dir_org(list: &mut LineList, pos: usize, state: &mut AssemblerState) -> Result<DirectiveOutcome, AssembleError> {
    let info = list.get(pos).info.clone();
    if list.get(pos).args.len() != 1 {
        return Err(arity_error(&info, "'org' needs one expression argument"));
    }
    let scope_anchor = list.get(pos).scope_anchor.clone();
    let backtick_fn = make_backtick(state.cpu_mode);
    let backtick: &BacktickEncoder = &backtick_fn;

    let expr_ = list.get_mut(pos).args[0].as_expression(&scope_anchor).map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
    if expr_.contains_undefined_names(&state.knowns) {
        return Err(AssembleError::new(&info.filename, info.lineno, "'org' target must not contain undefined names"));
    }
    let value = expr::eval(&expr_, &state.knowns, list.get(pos).location as i64, backtick)
        .map_err(|e| AssembleError::new(&info.filename, info.lineno, e.to_string()))?;
    if !(0..=0xFFFF).contains(&value) {
        return Err(AssembleError::new(&info.filename, info.lineno, "'org' target is outside the address space"));
    }

    let l = list.get_mut(pos);
    l.location = value as u32;
    l.bytes = Vec::new();
    if let Some(label) = list.get(pos).label.clone() {
        state.knowns.set(&label, value);
    }
    Ok(DirectiveOutcome::Advance)
}

fn dir_db(list: &mut LineList, pos: usize, _state: &mut AssemblerState) -> Result<DirectiveOutcome, AssembleError> {
    let info = list.get(pos).info.clone();
    let n = list.get(pos).args.len();
    if n == 0 {
        return Err(arity_error(&info, "'db' needs at least one argument"));
    }
    let scope_anchor = list.get(pos).scope_anchor.clone();

    let mut bytes = Vec::new();
    let mut needs_second_pass = false;
    for i in 0..n {
        let parsed = list.get_mut(pos)
            .args[i]
            .as_string_or_expression(&scope_anchor)
            .map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
        match parsed {
            ParsedArg::String(s) => bytes.extend_from_slice(&s),
            ParsedArg::Expression(_) => {
                bytes.push(0);
                needs_second_pass = true;
            }
            _ => unreachable!(),
        }
    }

    let l = list.get_mut(pos);
    l.bytes = bytes;
    l.needs_second_pass = needs_second_pass;
    Ok(DirectiveOutcome::Advance)
}

fn dir_dw(list: &mut LineList, pos: usize, _state: &mut AssemblerState) -> Result<DirectiveOutcome, AssembleError> {
    let info = list.get(pos).info.clone();
    let n = list.get(pos).args.len();
    if n == 0 {
        return Err(arity_error(&info, "'dw' needs at least one argument"));
    }
    let scope_anchor = list.get(pos).scope_anchor.clone();
    for i in 0..n {
        list.get_mut(pos)
            .args[i]
            .as_expression(&scope_anchor)
            .map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
    }

    let l = list.get_mut(pos);
    l.bytes = vec![0u8; n * 2];
    l.needs_second_pass = true;
    Ok(DirectiveOutcome::Advance)
}

fn dir_ds(list: &mut LineList, pos: usize, state: &mut AssemblerState) -> Result<DirectiveOutcome, AssembleError> {
    let info = list.get(pos).info.clone();
    if list.get(pos).args.len() != 1 {
        return Err(arity_error(&info, "'ds' needs one expression argument"));
    }
    let scope_anchor = list.get(pos).scope_anchor.clone();
    let backtick_fn = make_backtick(state.cpu_mode);
    let backtick: &BacktickEncoder = &backtick_fn;

    let expr_ = list.get_mut(pos).args[0].as_expression(&scope_anchor).map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
    if expr_.contains_undefined_names(&state.knowns) {
        return Err(AssembleError::new(&info.filename, info.lineno, "'ds' size must not contain undefined names"));
    }
    let value = expr::eval(&expr_, &state.knowns, list.get(pos).location as i64, backtick)
        .map_err(|e| AssembleError::new(&info.filename, info.lineno, e.to_string()))?;
    if value < 0 {
        return Err(AssembleError::new(&info.filename, info.lineno, "'ds' size must not be negative"));
    }

    let l = list.get_mut(pos);
    l.bytes = vec![0u8; value as usize];
    l.needs_second_pass = false;
    Ok(DirectiveOutcome::Advance)
}

fn dir_equ(list: &mut LineList, pos: usize, state: &mut AssemblerState) -> Result<DirectiveOutcome, AssembleError> {
    let info = list.get(pos).info.clone();
    let label = list.get(pos)
        .label
        .clone()
        .ok_or_else(|| arity_error(&info, "'equ' requires a label naming it"))?;
    if list.get(pos).args.len() != 1 {
        return Err(arity_error(&info, "'equ' needs one expression argument"));
    }
    if state.knowns.contains(&label) || state.unknowns.contains(&label) {
        return Err(AssembleError::new(&info.filename, info.lineno, format!("label \"{}\" is already defined", label)));
    }

    let scope_anchor = list.get(pos).scope_anchor.clone();
    let backtick_fn = make_backtick(state.cpu_mode);
    let backtick: &BacktickEncoder = &backtick_fn;
    let expr_ = list.get_mut(pos).args[0].as_expression(&scope_anchor).map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;

    let l = list.get_mut(pos);
    l.bytes = Vec::new();
    l.needs_second_pass = false;

    if expr_.contains_undefined_names(&state.knowns) {
        state.unknowns.set(&label, list.id_at(pos));
    } else {
        let value = expr::eval(&expr_, &state.knowns, list.get(pos).location as i64, backtick)
            .map_err(|e| AssembleError::new(&info.filename, info.lineno, e.to_string()))?;
        state.knowns.set(&label, value);
    }
    Ok(DirectiveOutcome::Advance)
}

fn dir_include(list: &mut LineList, pos: usize, state: &mut AssemblerState) -> Result<DirectiveOutcome, AssembleError> {
    let info = list.get(pos).info.clone();
    if list.get(pos).args.len() != 1 {
        return Err(arity_error(&info, "'include' needs one string argument"));
    }
    state.include_count += 1;
    if state.include_count > MAX_INCLUDE_DEPTH {
        return Err(AssembleError::new(&info.filename, info.lineno, "maximum include depth exceeded"));
    }

    let fname_bytes = list.get_mut(pos).args[0].as_string().map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
    let fname = String::from_utf8_lossy(&fname_bytes).into_owned();

    let full_path = state.dirs.current().join(&fname);
    let contents = std::fs::read_to_string(&full_path)
        .map_err(|e| AssembleError::new(&info.filename, info.lineno, format!("include: failed to read \"{}\": {}", fname, e)))?;

    let sub_lines = crate::parser::parse_source(&contents, &full_path.display().to_string()).map_err(|e| {
        AssembleError::new(&info.filename, info.lineno, format!("include: {}", e))
    })?;
    sanity_checks(&sub_lines).map_err(|e| AssembleError::new(&info.filename, info.lineno, format!("include: {}", e)))?;

    let dirname = std::path::Path::new(&fname)
        .parent()
        .map(|p| p.display().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| ".".to_string());

    let scope_anchor = list.get(pos).scope_anchor.clone();
    let pushd_line = crate::parser::parse_line(&format!("pushd \"{}\"", dirname), &info.filename, info.lineno, &scope_anchor)?;
    let popd_line = crate::parser::parse_line("popd", &info.filename, info.lineno, &scope_anchor)?;

    let mut spliced = Vec::with_capacity(sub_lines.len() + 2);
    spliced.push(pushd_line);
    spliced.extend(sub_lines);
    spliced.push(popd_line);

    list.replace(pos..pos + 1, spliced);
    Ok(DirectiveOutcome::JumpTo(pos))
}

fn dir_incbin(list: &mut LineList, pos: usize, state: &mut AssemblerState) -> Result<DirectiveOutcome, AssembleError> {
    let info = list.get(pos).info.clone();
    if list.get(pos).args.len() != 1 {
        return Err(arity_error(&info, "'incbin' needs one string argument"));
    }
    let fname_bytes = list.get_mut(pos).args[0].as_string().map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
    let fname = String::from_utf8_lossy(&fname_bytes).into_owned();
    let full_path = state.dirs.current().join(&fname);
    let data = std::fs::read(&full_path)
        .map_err(|e| AssembleError::new(&info.filename, info.lineno, format!("incbin: failed to read \"{}\": {}", fname, e)))?;

    let location = list.get(pos).location as u64;
    if location + data.len() as u64 > asm8085::constants::ADDRESS_SPACE as u64 {
        return Err(AssembleError::new(&info.filename, info.lineno, "incbin contents do not fit in the address space"));
    }

    let l = list.get_mut(pos);
    l.bytes = data;
    l.needs_second_pass = false;
    Ok(DirectiveOutcome::Advance)
}

fn dir_macro(list: &mut LineList, pos: usize, state: &mut AssemblerState) -> Result<DirectiveOutcome, AssembleError> {
    let info = list.get(pos).info.clone();
    let name = list.get(pos)
        .label
        .clone()
        .ok_or_else(|| arity_error(&info, "'macro' requires a label naming it"))?;
    let formals: Vec<String> = list.get(pos).args.iter().map(|a| a.raw_text.trim().to_string()).collect();

    let mut end = pos + 1;
    loop {
        if end >= list.len() {
            return Err(AssembleError::new(&info.filename, info.lineno, "macro without matching 'endm'"));
        }
        match &list.get(end).instr {
            Instr::Directive(Directive::Macro) => {
                let bad = list.get(end).info.clone();
                return Err(AssembleError::new(&bad.filename, bad.lineno, "nested macro definitions are not allowed"));
            }
            Instr::Directive(Directive::Endm) => break,
            _ => end += 1,
        }
    }

    let mut m = Macro::new(name.clone(), formals);
    for i in pos + 1..end {
        let l = list.get(i);
        m.body.push(crate::macros::MacroBodyLine {
            raw_text: l.raw_text.clone(),
            info: l.info.clone(),
        });
    }
    state.macros.insert(name, m);

    list.remove(pos..end + 1);
    Ok(DirectiveOutcome::JumpTo(pos))
}

fn dir_if_family(
    d: Directive,
    list: &mut LineList,
    pos: usize,
    state: &mut AssemblerState,
) -> Result<DirectiveOutcome, AssembleError> {
    let info = list.get(pos).info.clone();
    if list.get(pos).args.len() != 1 {
        return Err(arity_error(&info, "conditional directives need one expression argument"));
    }
    let scope_anchor = list.get(pos).scope_anchor.clone();

    let accept = match d {
        Directive::If => {
            let backtick_fn = make_backtick(state.cpu_mode);
            let backtick: &BacktickEncoder = &backtick_fn;
            let expr_ = list.get_mut(pos).args[0].as_expression(&scope_anchor).map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
            if expr_.contains_undefined_names(&state.knowns) {
                return Err(AssembleError::new(&info.filename, info.lineno, "'if' condition must not contain undefined names"));
            }
            expr::eval(&expr_, &state.knowns, list.get(pos).location as i64, backtick)
                .map_err(|e| AssembleError::new(&info.filename, info.lineno, e.to_string()))?
                != 0
        }
        Directive::Ifdef | Directive::Ifndef => {
            let expr_ = list.get_mut(pos).args[0].as_expression(&scope_anchor).map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
            let defined = !expr_.contains_undefined_names(&state.knowns);
            if d == Directive::Ifdef {
                defined
            } else {
                !defined
            }
        }
        _ => unreachable!(),
    };

    let endif_pos = find_matching(list, pos, Directive::If, Directive::Endif, "'if' without matching 'endif'")?;
    let l = list.get_mut(pos);
    l.bytes = Vec::new();

    if accept {
        list.remove(endif_pos..endif_pos + 1);
        list.remove(pos..pos + 1);
    } else {
        list.remove(pos..endif_pos + 1);
    }
    Ok(DirectiveOutcome::JumpTo(pos))
}

/// Shared depth-tracking scan for `if`/`endif` and `repeat`/`endr` pairing,
/// per `spec.md` §4.5.6's `find_endif`. `opener_family` only needs to be one
/// of the opener variants for `if`-style triples; callers pass the "parent"
/// variant and this function treats any `If`/`Ifdef`/`Ifndef` as an opener
/// when `opener_family == Directive::If`, or `Repeat` alone otherwise.
fn find_matching(
    list: &LineList,
    pos: usize,
    opener_family: Directive,
    closer: Directive,
    error_message: &str,
) -> Result<usize, AssembleError> {
    let mut depth = 1i32;
    let mut i = pos + 1;
    while i < list.len() {
        let is_opener = match (&list.get(i).instr, opener_family) {
            (Instr::Directive(Directive::If), Directive::If)
            | (Instr::Directive(Directive::Ifdef), Directive::If)
            | (Instr::Directive(Directive::Ifndef), Directive::If) => true,
            (Instr::Directive(d), other) if *d == other => true,
            _ => false,
        };
        if is_opener {
            depth += 1;
        } else if matches!(&list.get(i).instr, Instr::Directive(d) if *d == closer) {
            depth -= 1;
            if depth == 0 {
                return Ok(i);
            }
        }
        i += 1;
    }
    let info = list.get(pos).info.clone();
    Err(AssembleError::new(&info.filename, info.lineno, error_message))
}

fn dir_pushd(list: &mut LineList, pos: usize, state: &mut AssemblerState) -> Result<DirectiveOutcome, AssembleError> {
    let info = list.get(pos).info.clone();
    if list.get(pos).args.len() != 1 {
        return Err(arity_error(&info, "'pushd' needs one string argument"));
    }
    let dir_bytes = list.get_mut(pos).args[0].as_string().map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
    let dir = String::from_utf8_lossy(&dir_bytes).into_owned();
    state.dirs.push(&dir);
    list.get_mut(pos).bytes = Vec::new();
    Ok(DirectiveOutcome::Advance)
}

fn dir_popd(list: &mut LineList, pos: usize, state: &mut AssemblerState) -> Result<DirectiveOutcome, AssembleError> {
    let info = list.get(pos).info.clone();
    if !list.get(pos).args.is_empty() {
        return Err(arity_error(&info, "'popd' takes no arguments"));
    }
    state.dirs.pop();
    list.get_mut(pos).bytes = Vec::new();
    Ok(DirectiveOutcome::Advance)
}

fn dir_align(list: &mut LineList, pos: usize, state: &mut AssemblerState) -> Result<DirectiveOutcome, AssembleError> {
    let info = list.get(pos).info.clone();
    let n = list.get(pos).args.len();
    if n < 1 || n > 2 {
        return Err(arity_error(&info, "'align' takes one or two expression arguments"));
    }
    let scope_anchor = list.get(pos).scope_anchor.clone();
    let location = list.get(pos).location as i64;
    let backtick_fn = make_backtick(state.cpu_mode);
    let backtick: &BacktickEncoder = &backtick_fn;

    let e_expr = list.get_mut(pos).args[0].as_expression(&scope_anchor).map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
    if e_expr.contains_undefined_names(&state.knowns) {
        return Err(AssembleError::new(&info.filename, info.lineno, "'align' boundary must not contain undefined names"));
    }
    let e = expr::eval(&e_expr, &state.knowns, location, backtick).map_err(|e| AssembleError::new(&info.filename, info.lineno, e.to_string()))?;
    if e <= 0 {
        return Err(AssembleError::new(&info.filename, info.lineno, "'align' boundary must be positive"));
    }

    let fill_value = if n == 2 {
        let f_expr = list.get_mut(pos).args[1].as_expression(&scope_anchor).map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
        if f_expr.contains_undefined_names(&state.knowns) {
            return Err(AssembleError::new(&info.filename, info.lineno, "'align' fill value must not contain undefined names"));
        }
        expr::eval(&f_expr, &state.knowns, location, backtick).map_err(|e| AssembleError::new(&info.filename, info.lineno, e.to_string()))?
    } else {
        0
    };

    let rem = location % e;
    let pad = if rem == 0 { 0 } else { (e - rem) as usize };

    if !(-128..=255).contains(&fill_value) {
        state.warnings.push(Warning {
            file: info.filename.clone(),
            line: info.lineno,
            message: format!("align fill value {} is out of byte range", fill_value),
        });
    }
    let byte = (fill_value & 0xFF) as u8;

    let l = list.get_mut(pos);
    l.bytes = vec![byte; pad];
    l.needs_second_pass = false;
    Ok(DirectiveOutcome::Advance)
}

fn dir_assert(list: &mut LineList, pos: usize) -> Result<DirectiveOutcome, AssembleError> {
    let info = list.get(pos).info.clone();
    let n = list.get(pos).args.len();
    if n < 1 || n > 2 {
        return Err(arity_error(&info, "'assert' takes one or two arguments"));
    }
    if n == 2 {
        list.get_mut(pos).args[1].as_string().map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
    }
    let l = list.get_mut(pos);
    l.bytes = Vec::new();
    l.needs_second_pass = true;
    Ok(DirectiveOutcome::Advance)
}

fn dir_pushorg(list: &mut LineList, pos: usize, state: &mut AssemblerState) -> Result<DirectiveOutcome, AssembleError> {
    let info = list.get(pos).info.clone();
    if list.get(pos).args.len() != 1 {
        return Err(arity_error(&info, "'pushorg' needs one expression argument"));
    }
    let scope_anchor = list.get(pos).scope_anchor.clone();
    let backtick_fn = make_backtick(state.cpu_mode);
    let backtick: &BacktickEncoder = &backtick_fn;

    let expr_ = list.get_mut(pos).args[0].as_expression(&scope_anchor).map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
    if expr_.contains_undefined_names(&state.knowns) {
        return Err(AssembleError::new(&info.filename, info.lineno, "'pushorg' target must not contain undefined names"));
    }
    let value = expr::eval(&expr_, &state.knowns, list.get(pos).location as i64, backtick)
        .map_err(|e| AssembleError::new(&info.filename, info.lineno, e.to_string()))?;
    if !(0..=0xFFFF).contains(&value) {
        return Err(AssembleError::new(&info.filename, info.lineno, "'pushorg' target is outside the address space"));
    }

    let saved = list.get(pos).location;
    state.org_stack.push(saved, value as u32);

    let l = list.get_mut(pos);
    l.location = value as u32;
    l.bytes = Vec::new();
    Ok(DirectiveOutcome::Advance)
}

fn dir_poporg(list: &mut LineList, pos: usize, state: &mut AssemblerState) -> Result<DirectiveOutcome, AssembleError> {
    let info = list.get(pos).info.clone();
    if !list.get(pos).args.is_empty() {
        return Err(arity_error(&info, "'poporg' takes no arguments"));
    }
    let current_location = list.get(pos).location;
    let resumed = state.org_stack.pop(current_location).map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;

    let l = list.get_mut(pos);
    l.location = resumed;
    l.bytes = Vec::new();
    Ok(DirectiveOutcome::Advance)
}

fn dir_repeat(list: &mut LineList, pos: usize, state: &mut AssemblerState) -> Result<DirectiveOutcome, AssembleError> {
    let info = list.get(pos).info.clone();
    if list.get(pos).args.len() != 1 {
        return Err(arity_error(&info, "'repeat' needs one expression argument"));
    }
    let scope_anchor = list.get(pos).scope_anchor.clone();
    let backtick_fn = make_backtick(state.cpu_mode);
    let backtick: &BacktickEncoder = &backtick_fn;

    let expr_ = list.get_mut(pos).args[0].as_expression(&scope_anchor).map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;
    if expr_.contains_undefined_names(&state.knowns) {
        return Err(AssembleError::new(&info.filename, info.lineno, "'repeat' count must not contain undefined names"));
    }
    let count = expr::eval(&expr_, &state.knowns, list.get(pos).location as i64, backtick)
        .map_err(|e| AssembleError::new(&info.filename, info.lineno, e.to_string()))?;
    if count < 0 {
        return Err(AssembleError::new(&info.filename, info.lineno, "'repeat' count must not be negative"));
    }

    let endr_pos = find_matching(list, pos, Directive::Repeat, Directive::Endr, "'repeat' without matching 'endr'")?;
    let body: Vec<Line> = (pos + 1..endr_pos).map(|i| list.get(i).clone()).collect();

    state.macro_expansion_count += count as u32;
    if state.macro_expansion_count > MAX_MACRO_EXPANSIONS {
        return Err(AssembleError::new(&info.filename, info.lineno, "maximum macro expansions exceeded"));
    }

    let mut replacement = Vec::with_capacity(body.len() * count as usize);
    for _ in 0..count {
        for l in &body {
            replacement.push(crate::parser::parse_line(&l.raw_text, &l.info.filename, l.info.lineno, &l.scope_anchor)?);
        }
    }

    list.replace(pos..endr_pos + 1, replacement);
    Ok(DirectiveOutcome::JumpTo(pos))
}

/// `end` stops processing the rest of the *current file*: everything after
/// it up to (but not including) the enclosing `popd` — if any — is excised.
/// With no enclosing include, it stops the whole job.
fn dir_end(list: &mut LineList, pos: usize) -> DirectiveOutcome {
    list.get_mut(pos).bytes = Vec::new();
    let mut depth = 0i32;
    let mut i = pos + 1;
    while i < list.len() {
        match &list.get(i).instr {
            Instr::Directive(Directive::Pushd) => depth += 1,
            Instr::Directive(Directive::Popd) => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            _ => {}
        }
        i += 1;
    }
    list.remove(pos + 1..i);
    if pos + 1 >= list.len() {
        DirectiveOutcome::Stop
    } else {
        DirectiveOutcome::JumpTo(pos + 1)
    }
}

fn dir_cpu(list: &mut LineList, pos: usize, state: &mut AssemblerState) -> Result<DirectiveOutcome, AssembleError> {
    let info = list.get(pos).info.clone();
    if list.get(pos).args.len() != 1 {
        return Err(arity_error(&info, "'cpu' needs one argument"));
    }
    let text = list.get(pos).args[0].raw_text.trim().to_string();
    state.cpu_mode = match text.as_str() {
        "8080" => CpuMode::Intel8080,
        "8085" => CpuMode::Intel8085,
        _ => return Err(AssembleError::new(&info.filename, info.lineno, format!("'cpu' expects 8080 or 8085, got \"{}\"", text))),
    };
    list.get_mut(pos).bytes = Vec::new();
    Ok(DirectiveOutcome::Advance)
}

// ---------------------------------------------------------------------
// §4.5.5 Macro expansion (invocation side; collection is `dir_macro`)
// ---------------------------------------------------------------------

fn expand_macro_invocation(
    name: &str,
    list: &mut LineList,
    pos: usize,
    state: &mut AssemblerState,
) -> Result<DirectiveOutcome, AssembleError> {
    let info = list.get(pos).info.clone();
    state.macro_expansion_count += 1;
    if state.macro_expansion_count > MAX_MACRO_EXPANSIONS {
        return Err(AssembleError::new(&info.filename, info.lineno, "maximum macro expansions exceeded"));
    }

    let macro_def = state
        .macros
        .get(name)
        .cloned()
        .ok_or_else(|| AssembleError::new(&info.filename, info.lineno, format!("undefined macro \"{}\"", name)))?;
    let actuals: Vec<String> = list.get(pos).args.iter().map(|a| a.raw_text.clone()).collect();
    let expanded = macro_def
        .expand(&actuals, state.macro_expansion_count)
        .map_err(|e| AssembleError::new(&info.filename, info.lineno, e))?;

    let mut anchor = list.get(pos).scope_anchor.clone();
    let mut new_lines = Vec::with_capacity(expanded.len());
    for (text, _) in expanded {
        let l = crate::parser::parse_line(&text, &info.filename, info.lineno, &anchor)?;
        anchor = l.scope_anchor.clone();
        new_lines.push(l);
    }

    list.replace(pos..pos + 1, new_lines);
    Ok(DirectiveOutcome::JumpTo(pos))
}

// ---------------------------------------------------------------------
// §4.5.8 Forward-reference resolver
// ---------------------------------------------------------------------

pub fn resolve_all(list: &LineList, state: &mut AssemblerState) {
    loop {
        let pending: Vec<(String, LineId)> = state
            .unknowns
            .iter_most_recent_first()
            .map(|(n, id)| (n.to_string(), *id))
            .collect();
        let mut progressed = false;

        for (name, line_id) in pending {
            let line = list.line(line_id);
            let expr = match line.args.get(0).and_then(|a| a.parsed.as_ref()) {
                Some(ParsedArg::Expression(e)) => e.clone(),
                _ => continue,
            };
            if expr.contains_undefined_names(&state.knowns) {
                continue;
            }
            let backtick_fn = make_backtick(state.cpu_mode);
            let backtick: &BacktickEncoder = &backtick_fn;
            if let Ok(value) = expr::eval(&expr, &state.knowns, line.location as i64, backtick) {
                state.knowns.set(&name, value);
                state.unknowns.delete(&name);
                progressed = true;
            }
        }

        if !progressed {
            break;
        }
    }
}

// ---------------------------------------------------------------------
// §4.5.7 Second pass
// ---------------------------------------------------------------------

fn cached_expr<'a>(line: &'a Line, idx: usize) -> Option<&'a ParsedExpr> {
    line.args.get(idx).and_then(|a| match &a.parsed {
        Some(ParsedArg::Expression(e)) => Some(e),
        _ => None,
    })
}

fn eval_line_expr(
    list: &LineList,
    pos: usize,
    idx: usize,
    state: &AssemblerState,
    backtick: &BacktickEncoder,
) -> Result<i64, AssembleError> {
    let line = list.get(pos);
    let info = &line.info;
    let expr = cached_expr(line, idx)
        .ok_or_else(|| AssembleError::new(&info.filename, info.lineno, "internal: missing deferred expression"))?;
    expr::eval(expr, &state.knowns, line.location as i64, backtick).map_err(|e| AssembleError::new(&info.filename, info.lineno, e.to_string()))
}

fn warn_if_out_of_range(value: i64, range: std::ops::RangeInclusive<i64>, info: &LineInfo, what: &str, warnings: &mut Vec<Warning>) {
    if !range.contains(&value) {
        warnings.push(Warning {
            file: info.filename.clone(),
            line: info.lineno,
            message: format!("{} value {} is out of range", what, value),
        });
    }
}

/// `spec.md` §4.5.7: fills every deferred byte, accumulating errors (so
/// every failed `assert` is reported) rather than stopping at the first one.
fn complete(list: &mut LineList, state: &AssemblerState) -> (Vec<Warning>, Vec<AssembleError>) {
    let mut warnings = Vec::new();
    let mut errors = Vec::new();
    let backtick_fn = make_backtick(state.cpu_mode);
    let backtick: &BacktickEncoder = &backtick_fn;

    for pos in 0..list.len() {
        if !list.get(pos).needs_second_pass {
            continue;
        }
        let info = list.get(pos).info.clone();
        let instr = list.get(pos).instr.clone();

        match instr {
            Instr::Opcode(op) => match op.def().shape {
                ArgShape::Immediate(len) => match eval_line_expr(list, pos, 0, state, backtick) {
                    Ok(value) => {
                        if len == 1 {
                            warn_if_out_of_range(value, -128..=255, &info, "immediate operand", &mut warnings);
                            list.get_mut(pos).bytes[1] = (value & 0xFF) as u8;
                        } else {
                            warn_if_out_of_range(value, -32768..=65535, &info, "immediate operand", &mut warnings);
                            let l = list.get_mut(pos);
                            l.bytes[1] = (value & 0xFF) as u8;
                            l.bytes[2] = ((value >> 8) & 0xFF) as u8;
                        }
                    }
                    Err(e) => errors.push(e),
                },
                ArgShape::RegImmediate8 => match eval_line_expr(list, pos, 1, state, backtick) {
                    Ok(value) => {
                        warn_if_out_of_range(value, -128..=255, &info, "immediate operand", &mut warnings);
                        list.get_mut(pos).bytes[1] = (value & 0xFF) as u8;
                    }
                    Err(e) => errors.push(e),
                },
                ArgShape::RegPairImmediate16 => match eval_line_expr(list, pos, 1, state, backtick) {
                    Ok(value) => {
                        warn_if_out_of_range(value, -32768..=65535, &info, "immediate operand", &mut warnings);
                        let l = list.get_mut(pos);
                        l.bytes[1] = (value & 0xFF) as u8;
                        l.bytes[2] = ((value >> 8) & 0xFF) as u8;
                    }
                    Err(e) => errors.push(e),
                },
                _ => {}
            },
            Instr::Directive(Directive::Db) => {
                let n = list.get(pos).args.len();
                let mut offset = 0usize;
                for i in 0..n {
                    let line = list.get(pos);
                    match &line.args[i].parsed {
                        Some(ParsedArg::String(s)) => offset += s.len(),
                        Some(ParsedArg::Expression(_)) => {
                            match eval_line_expr(list, pos, i, state, backtick) {
                                Ok(value) => {
                                    warn_if_out_of_range(value, -128..=255, &info, "db operand", &mut warnings);
                                    list.get_mut(pos).bytes[offset] = (value & 0xFF) as u8;
                                }
                                Err(e) => errors.push(e),
                            }
                            offset += 1;
                        }
                        _ => offset += 1,
                    }
                }
            }
            Instr::Directive(Directive::Dw) => {
                let n = list.get(pos).args.len();
                for i in 0..n {
                    match eval_line_expr(list, pos, i, state, backtick) {
                        Ok(value) => {
                            warn_if_out_of_range(value, -32768..=65535, &info, "dw operand", &mut warnings);
                            let l = list.get_mut(pos);
                            l.bytes[i * 2] = (value & 0xFF) as u8;
                            l.bytes[i * 2 + 1] = ((value >> 8) & 0xFF) as u8;
                        }
                        Err(e) => errors.push(e),
                    }
                }
            }
            Instr::Directive(Directive::Assert) => match eval_line_expr(list, pos, 0, state, backtick) {
                Ok(value) => {
                    if value == 0 {
                        let line = list.get(pos);
                        let message = match line.args.get(1).and_then(|a| a.parsed.clone()) {
                            Some(ParsedArg::String(s)) => String::from_utf8_lossy(&s).into_owned(),
                            _ => line.args[0].raw_text.clone(),
                        };
                        errors.push(AssembleError::new(&info.filename, info.lineno, format!("assertion failed: {}", message)));
                    }
                }
                Err(e) => errors.push(e),
            },
            _ => {}
        }
    }

    (warnings, errors)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn equ_forward_reference_resolves() {
        let asm = assemble("foo  equ bar + 1\nbar  equ 41\n", "t.asm").unwrap();
        assert_eq!(asm.knowns.get("foo"), Some(&42));
        assert_eq!(asm.knowns.get("bar"), Some(&41));
    }

    #[test]
    fn conditional_excision_keeps_only_the_true_branch() {
        let asm = assemble(
            "     if 0\nfoo  equ 1\n     endif\n     if 1\nbar  equ 2\n     endif\n",
            "t.asm",
        )
        .unwrap();
        assert_eq!(asm.knowns.get("bar"), Some(&2));
        assert_eq!(asm.knowns.get("foo"), None);
    }

    #[test]
    fn org_repositions_subsequent_lines() {
        let asm = assemble("org 0x0100\nnop\nnop\n", "t.asm").unwrap();
        assert_eq!(asm.list.get(1).location, 0x0100);
        assert_eq!(asm.list.get(2).location, 0x0101);
    }

    #[test]
    fn pushorg_poporg_round_trip() {
        let asm = assemble("nop\npushorg 0x8000\ndb 1,2,3\npoporg\nnop\n", "t.asm").unwrap();
        let last = asm.list.get(asm.list.len() - 1);
        assert_eq!(last.location, 4);
    }

    #[test]
    fn macro_expansion_is_hygienic() {
        let asm = assemble(
            "m macro x\n@loop: mvi a, !x\njmp @loop\nendm\nm 5\nm 5\n",
            "t.asm",
        )
        .unwrap();
        // Two expansions produce two distinct `_m_N_loop` labels.
        let loop_labels: Vec<&str> = asm
            .list
            .iter()
            .filter_map(|l| l.label.as_deref())
            .filter(|l| l.ends_with("loop"))
            .collect();
        assert_eq!(loop_labels.len(), 2);
        assert_ne!(loop_labels[0], loop_labels[1]);
    }

    #[test]
    fn cpu_directive_rejects_8085_only_opcode_in_8080_mode() {
        let err = assemble("cpu 8080\nrim\n", "t.asm");
        assert!(err.is_err());
    }

    #[test]
    fn repeat_endr_emits_n_copies() {
        let asm = assemble("repeat 3\nnop\nendr\n", "t.asm").unwrap();
        assert_eq!(asm.list.len(), 3);
        assert_eq!(asm.list.get(2).location, 2);
    }

    #[test]
    fn end_directive_stops_the_rest_of_the_file() {
        let asm = assemble("nop\nend\nnop\n", "t.asm").unwrap();
        assert_eq!(asm.list.len(), 1);
    }

    #[test]
    fn db_with_mixed_string_and_expression_bytes() {
        let asm = assemble("db \"hi\", 1+1\n", "t.asm").unwrap();
        assert_eq!(asm.list.get(0).bytes, vec![b'h', b'i', 2]);
    }

    #[test]
    fn assert_failure_is_reported_as_a_second_pass_error() {
        let result = assemble("assert 0, \"boom\"\n", "t.asm");
        match result {
            Err(AssembleFailure::SecondPass(errs)) => {
                assert_eq!(errs.len(), 1);
                assert!(errs[0].message.contains("boom"));
            }
            other => panic!("expected a second-pass failure, got {:?}", other.map(|_| ())),
        }
    }
}
