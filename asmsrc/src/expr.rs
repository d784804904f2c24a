//! Tokenizer, shunting-yard parser, and RPN evaluator for `spec.md` §4.3's
//! expression language. Deliberately knows nothing about the opcode table —
//! the backtick-literal lexical class (`` `nop` ``) is resolved through an
//! injected callback (`BacktickEncoder`) per the design note in `spec.md`
//! §9, so this module is unit-testable on its own.

use crate::varspace::VarSpace;
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinOp {
    Or,
    And,
    BitAnd,
    BitXor,
    BitOr,
    Ne,
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinOp {
    fn precedence(self) -> u8 {
        use BinOp::*;
        match self {
            Or | And => 2,
            BitAnd | BitXor | BitOr => 3,
            Ne | Eq => 4,
            Lt | Le | Gt | Ge => 5,
            Shl | Shr => 6,
            Add | Sub => 7,
            Mul | Div | Mod => 8,
        }
    }

    fn apply(self, a: i64, b: i64) -> Result<i64, String> {
        use BinOp::*;
        Ok(match self {
            Or => ((a != 0) || (b != 0)) as i64,
            And => ((a != 0) && (b != 0)) as i64,
            BitAnd => a & b,
            BitXor => a ^ b,
            BitOr => a | b,
            Ne => (a != b) as i64,
            Eq => (a == b) as i64,
            Lt => (a < b) as i64,
            Le => (a <= b) as i64,
            Gt => (a > b) as i64,
            Ge => (a >= b) as i64,
            Shl => a.wrapping_shl(b as u32 & 63),
            Shr => a.wrapping_shr(b as u32 & 63),
            Add => a.wrapping_add(b),
            Sub => a.wrapping_sub(b),
            Mul => a.wrapping_mul(b),
            Div => {
                if b == 0 {
                    return Err("division by zero".to_string());
                }
                a.wrapping_div(b)
            }
            Mod => {
                if b == 0 {
                    return Err("division by zero".to_string());
                }
                a.wrapping_rem(b)
            }
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnOp {
    Not,
    BitNot,
    Neg,
}

impl UnOp {
    fn apply(self, a: i64) -> i64 {
        match self {
            UnOp::Not => (a == 0) as i64,
            UnOp::BitNot => !a,
            UnOp::Neg => a.wrapping_neg(),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Keyword {
    High,
    Low,
}

impl Keyword {
    fn apply(self, a: i64) -> i64 {
        match self {
            Keyword::High => (a >> 8) & 0xFF,
            Keyword::Low => a & 0xFF,
        }
    }
}

#[derive(Clone, Debug)]
pub enum RpnNode {
    Value(i64),
    Location,
    Name(String),
    Backtick(String),
    Un(UnOp),
    Bin(BinOp),
    Kwd(Keyword),
}

/// A fully tokenized and shunting-yard-ordered expression, together with the
/// `scope_anchor` that was active when it was parsed (`spec.md` §3).
#[derive(Clone, Debug)]
pub struct ParsedExpr {
    pub rpn: Vec<RpnNode>,
    pub scope_anchor: String,
}

impl ParsedExpr {
    /// Deep copy, named to match the historical `copy_parsed_expr` — plain
    /// `Clone` already performs a deep copy since every node owns its data.
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }

    pub fn contains_undefined_names(&self, knowns: &VarSpace<i64>) -> bool {
        self.rpn.iter().any(|node| match node {
            RpnNode::Name(n) => !knowns.get_in(&self.scope_anchor, n).is_some(),
            _ => false,
        })
    }
}

/// Resolves a backtick-quoted instruction literal (`` `nop` ``) to its
/// encoded bytes; injected so the expression engine has no compile-time
/// dependency on the opcode table.
pub type BacktickEncoder<'a> = dyn Fn(&str) -> Result<Vec<u8>, String> + 'a;

#[derive(Debug)]
pub struct ExprError(pub String);

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug)]
enum Token {
    Num(i64),
    Name(String),
    Backtick(String),
    Kwd(Keyword),
    Un(UnOp),
    Bin(BinOp),
    LParen,
    RParen,
}

const BIN_SYMBOLS: &[(&str, BinOp)] = &[
    ("!=", BinOp::Ne),
    ("==", BinOp::Eq),
    ("<=", BinOp::Le),
    (">=", BinOp::Ge),
    ("<<", BinOp::Shl),
    (">>", BinOp::Shr),
    ("&&", BinOp::And),
    ("||", BinOp::Or),
    ("<", BinOp::Lt),
    (">", BinOp::Gt),
    ("+", BinOp::Add),
    ("-", BinOp::Sub),
    ("*", BinOp::Mul),
    ("/", BinOp::Div),
    ("%", BinOp::Mod),
    ("&", BinOp::BitAnd),
    ("^", BinOp::BitXor),
    ("|", BinOp::BitOr),
];

fn is_name_start(c: u8) -> bool {
    c == b'_' || c == b'.' || c.is_ascii_alphabetic()
}

fn is_name_continue(c: u8) -> bool {
    c == b'_' || c == b'.' || c.is_ascii_alphanumeric()
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let bytes = input.as_bytes();
    let mut i = 0usize;
    let mut tokens = Vec::new();
    let mut operator_allowed = false;

    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }

        let rest = &input[i..];

        if operator_allowed {
            if let Some(&(sym, op)) = BIN_SYMBOLS.iter().find(|(sym, _)| rest.starts_with(sym)) {
                tokens.push(Token::Bin(op));
                i += sym.len();
                operator_allowed = false;
                continue;
            }
        } else {
            let unary = match bytes[i] {
                b'!' => Some(UnOp::Not),
                b'~' => Some(UnOp::BitNot),
                b'-' => Some(UnOp::Neg),
                _ => None,
            };
            if let Some(op) = unary {
                tokens.push(Token::Un(op));
                i += 1;
                operator_allowed = false;
                continue;
            }
        }

        if bytes[i] == b'(' {
            tokens.push(Token::LParen);
            i += 1;
            operator_allowed = false;
            continue;
        }
        if bytes[i] == b')' {
            tokens.push(Token::RParen);
            i += 1;
            operator_allowed = true;
            continue;
        }

        if bytes[i] == b'`' {
            let close = rest[1..].find('`').ok_or_else(|| {
                ExprError("unterminated backtick literal".to_string())
            })?;
            let text = &rest[1..1 + close];
            tokens.push(Token::Backtick(text.to_string()));
            i += 2 + close;
            operator_allowed = true;
            continue;
        }

        if bytes[i] == b'$' && !bytes.get(i + 1).map_or(false, |c| c.is_ascii_hexdigit()) {
            tokens.push(Token::Name("$".to_string()));
            i += 1;
            operator_allowed = true;
            continue;
        }

        if bytes[i].is_ascii_digit() || bytes[i] == b'$' {
            let (value, len) = scan_number(&input[i..])?;
            tokens.push(Token::Num(value));
            i += len;
            operator_allowed = true;
            continue;
        }

        if is_name_start(bytes[i]) {
            let start = i;
            while i < bytes.len() && is_name_continue(bytes[i]) {
                i += 1;
            }
            let word = &input[start..i];
            if word.eq_ignore_ascii_case("high") {
                tokens.push(Token::Kwd(Keyword::High));
                operator_allowed = false;
            } else if word.eq_ignore_ascii_case("low") {
                tokens.push(Token::Kwd(Keyword::Low));
                operator_allowed = false;
            } else {
                tokens.push(Token::Name(word.to_string()));
                operator_allowed = true;
            }
            continue;
        }

        return Err(ExprError(format!("unexpected character '{}'", bytes[i] as char)));
    }

    Ok(tokens)
}

/// Scans one numeric literal starting at `s[0]`. Handles `0x`/`0X`/`$` hex,
/// `0o`/`0O` octal, `0b`/`0B` binary, a leading `0` + octal digit as octal,
/// and otherwise a run of alphanumerics disambiguated by a trailing
/// `h`/`H`/`o`/`O`/`b`/`B` radix suffix (falling back to decimal). Maximum
/// ten digits, matching `spec.md` §4.3.
fn scan_number(s: &str) -> Result<(i64, usize), ExprError> {
    let bytes = s.as_bytes();

    let (radix, prefix_len) = if s.starts_with("0x") || s.starts_with("0X") {
        (16, 2)
    } else if s.starts_with('$') {
        (16, 1)
    } else if s.starts_with("0o") || s.starts_with("0O") {
        (8, 2)
    } else if s.starts_with("0b") || s.starts_with("0B") {
        (2, 2)
    } else if bytes.len() >= 2 && bytes[0] == b'0' && (b'0'..=b'7').contains(&bytes[1]) {
        (8, 1)
    } else {
        (0, 0)
    };

    if radix != 0 {
        let digit_pred: fn(u8) -> bool = match radix {
            16 => |c| c.is_ascii_hexdigit(),
            8 => |c| (b'0'..=b'7').contains(&c),
            2 => |c| c == b'0' || c == b'1',
            _ => unreachable!(),
        };
        let mut end = prefix_len;
        while end < bytes.len() && digit_pred(bytes[end]) {
            end += 1;
        }
        let digits = &s[prefix_len..end];
        if digits.is_empty() || digits.len() > 10 {
            return Err(ExprError("invalid numeric literal".to_string()));
        }
        let value = i64::from_str_radix(digits, radix).map_err(|_| {
            ExprError(format!("invalid base-{} literal \"{}\"", radix, digits))
        })?;
        return Ok((value, end));
    }

    let mut end = 0;
    while end < bytes.len() && bytes[end].is_ascii_alphanumeric() {
        end += 1;
    }
    let run = &s[..end];

    let (radix, digits, consumed) = if run.len() > 1 && (run.ends_with('h') || run.ends_with('H')) {
        (16, &run[..run.len() - 1], end)
    } else if run.len() > 1 && (run.ends_with('o') || run.ends_with('O')) {
        (8, &run[..run.len() - 1], end)
    } else if run.len() > 1
        && (run.ends_with('b') || run.ends_with('B'))
        && run[..run.len() - 1].bytes().all(|c| c == b'0' || c == b'1')
    {
        (2, &run[..run.len() - 1], end)
    } else {
        let mut dec_end = 0;
        while dec_end < bytes.len() && bytes[dec_end].is_ascii_digit() {
            dec_end += 1;
        }
        (10, &s[..dec_end], dec_end)
    };

    if digits.is_empty() || digits.len() > 10 {
        return Err(ExprError("invalid numeric literal".to_string()));
    }
    let value = i64::from_str_radix(digits, radix)
        .map_err(|_| ExprError(format!("invalid base-{} literal \"{}\"", radix, digits)))?;
    Ok((value, consumed))
}

#[derive(Clone, Copy)]
enum Pending {
    Un(UnOp),
    Bin(BinOp),
    Kwd(Keyword),
}

impl Pending {
    fn precedence(self) -> u8 {
        match self {
            Pending::Bin(b) => b.precedence(),
            Pending::Un(_) => 9,
            Pending::Kwd(_) => 10,
        }
    }

    fn is_left_assoc(self) -> bool {
        matches!(self, Pending::Bin(_))
    }

    fn into_node(self) -> RpnNode {
        match self {
            Pending::Un(u) => RpnNode::Un(u),
            Pending::Bin(b) => RpnNode::Bin(b),
            Pending::Kwd(k) => RpnNode::Kwd(k),
        }
    }
}

enum StackEntry {
    LParen,
    Op(Pending),
}

/// Classical shunting-yard, per `spec.md` §4.3.
fn shunt(tokens: Vec<Token>) -> Result<Vec<RpnNode>, ExprError> {
    let mut output = Vec::new();
    let mut stack: Vec<StackEntry> = Vec::new();

    let push_op = |output: &mut Vec<RpnNode>, stack: &mut Vec<StackEntry>, op: Pending| {
        let prec = op.precedence();
        let left_assoc = op.is_left_assoc();
        while let Some(StackEntry::Op(top)) = stack.last() {
            let top_prec = top.precedence();
            if top_prec > prec || (top_prec == prec && left_assoc) {
                if let Some(StackEntry::Op(top)) = stack.pop() {
                    output.push(top.into_node());
                }
            } else {
                break;
            }
        }
        stack.push(StackEntry::Op(op));
    };

    for token in tokens {
        match token {
            Token::Num(v) => output.push(RpnNode::Value(v)),
            Token::Name(n) if n == "$" => output.push(RpnNode::Location),
            Token::Name(n) => output.push(RpnNode::Name(n)),
            Token::Backtick(t) => output.push(RpnNode::Backtick(t)),
            Token::Un(u) => push_op(&mut output, &mut stack, Pending::Un(u)),
            Token::Bin(b) => push_op(&mut output, &mut stack, Pending::Bin(b)),
            Token::Kwd(k) => push_op(&mut output, &mut stack, Pending::Kwd(k)),
            Token::LParen => stack.push(StackEntry::LParen),
            Token::RParen => {
                loop {
                    match stack.pop() {
                        Some(StackEntry::LParen) => break,
                        Some(StackEntry::Op(op)) => output.push(op.into_node()),
                        None => return Err(ExprError("unmatched ')'".to_string())),
                    }
                }
            }
        }
    }

    while let Some(entry) = stack.pop() {
        match entry {
            StackEntry::Op(op) => output.push(op.into_node()),
            StackEntry::LParen => return Err(ExprError("unmatched '('".to_string())),
        }
    }

    Ok(output)
}

pub fn parse(input: &str, scope_anchor: &str) -> Result<ParsedExpr, ExprError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ExprError("empty expression".to_string()));
    }
    let rpn = shunt(tokens)?;
    Ok(ParsedExpr {
        rpn,
        scope_anchor: scope_anchor.to_string(),
    })
}

use asm8085::constants::EVAL_STACK_DEPTH;

/// Evaluates a parsed expression against `knowns`, `$` bound to `location`.
pub fn eval(
    expr: &ParsedExpr,
    knowns: &VarSpace<i64>,
    location: i64,
    backtick: &BacktickEncoder,
) -> Result<i64, ExprError> {
    let mut stack: Vec<i64> = Vec::new();

    for node in &expr.rpn {
        let value = match node {
            RpnNode::Value(v) => *v,
            RpnNode::Location => location,
            RpnNode::Name(n) => *knowns
                .get_in(&expr.scope_anchor, n)
                .ok_or_else(|| ExprError(format!("undefined name \"{}\"", n)))?,
            RpnNode::Backtick(text) => {
                let bytes = backtick(text).map_err(ExprError)?;
                *bytes.first().ok_or_else(|| {
                    ExprError("backtick literal produced no bytes".to_string())
                })? as i64
            }
            RpnNode::Un(op) => {
                let a = stack.pop().ok_or_else(stack_underflow)?;
                op.apply(a)
            }
            RpnNode::Bin(op) => {
                let b = stack.pop().ok_or_else(stack_underflow)?;
                let a = stack.pop().ok_or_else(stack_underflow)?;
                op.apply(a, b).map_err(ExprError)?
            }
            RpnNode::Kwd(k) => {
                let a = stack.pop().ok_or_else(stack_underflow)?;
                k.apply(a)
            }
        };
        if stack.len() >= EVAL_STACK_DEPTH {
            return Err(ExprError("expression evaluation stack overflow".to_string()));
        }
        stack.push(value);
    }

    match stack.len() {
        1 => Ok(stack[0]),
        0 => Err(ExprError("expression produced no value".to_string())),
        _ => Err(ExprError("expression left extra values on the stack".to_string())),
    }
}

fn stack_underflow() -> ExprError {
    ExprError("expression evaluation stack underflow".to_string())
}

#[cfg(test)]
mod test {
    use super::*;

    fn eval_str(s: &str, loc: i64) -> i64 {
        let expr = parse(s, "").unwrap();
        let knowns: VarSpace<i64> = VarSpace::new();
        let backtick: &BacktickEncoder = &|_| Err("no backtick support in test".to_string());
        eval(&expr, &knowns, loc, backtick).unwrap()
    }

    #[test]
    fn high_and_low_of_hex_literal() {
        assert_eq!(eval_str("high $FACE", 0), 0xFA);
        assert_eq!(eval_str("low $FACE", 0), 0xCE);
    }

    #[test]
    fn chained_unary_minus() {
        assert_eq!(eval_str("-5--6-7--8", 0), 2);
    }

    #[test]
    fn location_token() {
        assert_eq!(eval_str("$", 1234), 1234);
    }

    #[test]
    fn compound_boolean_expression() {
        assert_eq!(eval_str("high $ == $ >> 8 && low $ == $ % 256", 0xBEEF), 1);
    }

    #[test]
    fn backtick_literal_sums_opcode_bytes() {
        let expr = parse("`nop` + `nop` + 1", "").unwrap();
        let knowns: VarSpace<i64> = VarSpace::new();
        let backtick: &BacktickEncoder = &|text| {
            if text == "nop" {
                Ok(vec![0x00])
            } else {
                Err("unknown".to_string())
            }
        };
        assert_eq!(eval(&expr, &knowns, 0, backtick).unwrap(), 1);
    }

    #[test]
    fn undefined_name_is_an_error() {
        let expr = parse("foo + 1", "").unwrap();
        let knowns: VarSpace<i64> = VarSpace::new();
        assert!(expr.contains_undefined_names(&knowns));
    }

    #[test]
    fn deep_copy_evaluates_identically() {
        let expr = parse("(1 + 2) * 3", "").unwrap();
        let copy = expr.deep_copy();
        let knowns: VarSpace<i64> = VarSpace::new();
        let backtick: &BacktickEncoder = &|_| Err("n/a".to_string());
        assert_eq!(
            eval(&expr, &knowns, 0, backtick).unwrap(),
            eval(&copy, &knowns, 0, backtick).unwrap()
        );
    }

    #[test]
    fn unmatched_paren_is_an_error() {
        assert!(parse("(1 + 2", "").is_err());
        assert!(parse("1 + 2)", "").is_err());
    }
}
