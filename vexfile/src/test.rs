use super::*;
use asmsrc::assemble;

#[test]
fn emit_binary_concatenates_bytes_in_line_order() {
    let asm = assemble("mvi a, 5\nmvi b, 6\n", "t.asm").unwrap();
    let image = emit_binary(&asm.list).unwrap();
    assert_eq!(image, vec![0x3e, 5, 0x06, 6]);
}

#[test]
fn emit_binary_ignores_location_and_just_concatenates() {
    let asm = assemble("org 100h\nnop\norg 200h\nnop\n", "t.asm").unwrap();
    let image = emit_binary(&asm.list).unwrap();
    assert_eq!(image, vec![0x00, 0x00]);
}

#[test]
fn format_listing_shows_hex_bytes_and_source_text() {
    let asm = assemble("start: mvi a, 5\n", "t.asm").unwrap();
    let listing = format_listing(&asm.list, &asm.knowns);
    assert!(listing.contains("0000: 3E 05"));
    assert!(listing.contains("start: mvi a, 5"));
    assert!(listing.contains("Symbol table"));
    assert!(listing.contains("start"));
}

#[test]
fn format_listing_shows_equ_value_instead_of_location() {
    let asm = assemble("width equ 10\n", "t.asm").unwrap();
    let listing = format_listing(&asm.list, &asm.knowns);
    assert!(listing.contains("000A ="));
}

#[test]
fn format_listing_omits_symbol_table_when_nothing_is_known() {
    let asm = assemble("nop\n", "t.asm").unwrap();
    let listing = format_listing(&asm.list, &asm.knowns);
    assert!(!listing.contains("Symbol table"));
}
