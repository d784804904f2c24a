//! Binary image emission and listing formatting (`spec.md` §6).
//!
//! Assembly produces a [`asmsrc::line::LineList`] plus a resolved symbol
//! table; this crate turns those into the two artifacts the CLI writes out:
//! a flat binary image (bytes in emit order, no sparse placement by
//! `location`) and a human-readable listing with a trailing symbol table,
//! modeled on the historical `write_listing`.

use asm8085::constants::ADDRESS_SPACE;
use asm8085::Directive;
use asmsrc::line::{Instr, Line, LineList};
use asmsrc::varspace::VarSpace;

/// Concatenate every line's bytes in line-list order.
///
/// `org`/`pushorg`/`poporg` only ever affect `Line::location`, used for
/// symbol resolution and the listing's location column — the byte stream
/// itself is simply everything the assembler emitted, back to back, with no
/// padding and no relocation to absolute addresses.
pub fn emit_binary(list: &LineList) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    for line in list.iter() {
        out.extend_from_slice(&line.bytes);
    }
    if out.len() as u32 > ADDRESS_SPACE {
        return Err(format!(
            "assembled image is {} bytes, exceeding the {}-byte address space",
            out.len(),
            ADDRESS_SPACE
        ));
    }
    Ok(out)
}

/// Up to four bytes of one row, right-padded to align the source text that follows.
fn bytes_row(bytes: &[u8]) -> String {
    match bytes.len() {
        0 => "           ".to_string(),
        1 => format!("{:02X}         ", bytes[0]),
        2 => format!("{:02X} {:02X}      ", bytes[0], bytes[1]),
        3 => format!("{:02X} {:02X} {:02X}   ", bytes[0], bytes[1], bytes[2]),
        _ => format!("{:02X} {:02X} {:02X} {:02X}", bytes[0], bytes[1], bytes[2], bytes[3]),
    }
}

fn location_field(line: &Line, knowns: &VarSpace<i64>) -> String {
    if !line.bytes.is_empty() {
        format!("{:04X}: ", line.location)
    } else if matches!(line.instr, Instr::Directive(Directive::Equ)) {
        match line.label.as_deref().and_then(|label| knowns.get_in(&line.scope_anchor, label)) {
            Some(value) => format!("{:04X} =", *value as u16),
            None => "???? =".to_string(),
        }
    } else {
        "      ".to_string()
    }
}

/// Render a listing: per-line lineno/location/bytes/source text, followed by
/// a symbol table in reverse order of definition (`write_listing`).
pub fn format_listing(list: &LineList, knowns: &VarSpace<i64>) -> String {
    let mut out = String::new();

    for line in list.iter() {
        if line.info.lineno == 0 {
            out.push_str("      ");
        } else {
            out.push_str(&format!("{:5} ", line.info.lineno));
        }

        out.push_str(&location_field(line, knowns));

        if matches!(line.instr, Instr::Directive(Directive::Incbin)) {
            out.push_str(&format!("[.........] {}\n", line.raw_text));
            continue;
        }

        out.push_str(&bytes_row(&line.bytes[..line.bytes.len().min(4)]));
        out.push_str(&format!(" {}\n", line.raw_text));

        let mut offset = 4;
        while offset < line.bytes.len() {
            let end = (offset + 4).min(line.bytes.len());
            out.push_str("            ");
            out.push_str(&bytes_row(&line.bytes[offset..end]));
            out.push('\n');
            offset += 4;
        }
    }

    if knowns.is_empty() {
        return out;
    }

    out.push_str("\n\n");
    out.push_str("************************************************************\n");
    out.push_str("                        Symbol table                        \n");
    out.push_str("************************************************************\n");
    out.push_str("\n\n");
    out.push_str("Name                    = Value\n");
    out.push_str("-----------------------   ----------------------------------\n");

    for (name, value) in knowns.iter_most_recent_first() {
        out.push_str(&format!("{:<23} = {:04X}h\n", name, *value as u16));
    }

    out
}

#[cfg(test)]
mod test;
