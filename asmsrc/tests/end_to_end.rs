//! Whole-source scenarios, mirroring how the teacher's own `src/test.rs`
//! exercised complete parsed programs rather than single tokens or
//! directives in isolation. Covers the six `spec.md` §8 end-to-end
//! scenarios plus the three supplemented directives.

use asmsrc::{assemble, AssembleFailure};

fn assemble_ok(source: &str) -> asmsrc::Assembled {
    match assemble(source, "t.asm") {
        Ok(a) => a,
        Err(e) => panic!("expected assembly to succeed, got: {}", e),
    }
}

#[test]
fn equ_forward_reference_resolves_across_the_whole_file() {
    let asm = assemble_ok("mvi a, width\nwidth equ 10\n");
    assert_eq!(asm.knowns.get("width"), Some(&10));
}

#[test]
fn conditional_excision_keeps_only_the_taken_branch() {
    let source = "flag equ 1\nifdef flag\nmvi a, 9\nendif\nifndef flag\nmvi b, 9\nendif\n";
    let asm = assemble_ok(source);
    let image = vexfile::emit_binary(&asm.list).unwrap();
    assert_eq!(image, vec![0x3e, 9]);
}

#[test]
fn macro_label_is_hygienic_across_two_invocations() {
    let source = concat!(
        "bump: macro reg\n",
        "@loop: inr reg\n",
        "jmp @loop\n",
        "endm\n",
        "bump b\n",
        "bump c\n",
    );
    let asm = assemble_ok(source);
    // Each invocation's `@loop` is renamed to its own globally unique name;
    // a collision here would have failed assembly with a redefinition error.
    let loop_labels = asm
        .knowns
        .iter_most_recent_first()
        .filter(|(name, _)| name.contains("loop"))
        .count();
    assert_eq!(loop_labels, 2);
}

#[test]
fn org_repositions_subsequent_lines_and_symbols() {
    let asm = assemble_ok("org 100h\nhere: nop\n");
    assert_eq!(asm.knowns.get("here"), Some(&0x100));
}

#[test]
fn pushorg_poporg_round_trip_resumes_the_saved_location() {
    let asm = assemble_ok("nop\npushorg 0x200\nnop\npoporg\nhere: nop\n");
    assert_eq!(asm.knowns.get("here"), Some(&2));
}

#[test]
fn include_resolves_relative_to_the_including_files_directory() {
    let source = "include \"tests/fixtures/sub/included.asm\"\n";
    let asm = assemble_ok(source);
    assert_eq!(asm.knowns.get("included_label").is_some(), true);
    assert_eq!(asm.knowns.get("deep_label").is_some(), true);
}

#[test]
fn cpu_directive_switches_opcode_availability_mid_file() {
    let err = assemble("cpu 8080\nrim\n", "t.asm").unwrap_err();
    match err {
        AssembleFailure::FirstPass(e) => assert!(e.message.contains("not available")),
        other => panic!("expected a first-pass availability error, got {:?}", other),
    }

    let asm = assemble_ok("cpu 8085\nrim\n");
    assert_eq!(asm.list.len(), 1);
}

#[test]
fn repeat_endr_emits_n_independent_copies() {
    let asm = assemble_ok("repeat 3\nnop\nendr\n");
    let image = vexfile::emit_binary(&asm.list).unwrap();
    assert_eq!(image, vec![0x00, 0x00, 0x00]);
}

#[test]
fn end_directive_stops_the_rest_of_the_current_file() {
    let asm = assemble_ok("nop\nend\nnop\n");
    let image = vexfile::emit_binary(&asm.list).unwrap();
    assert_eq!(image, vec![0x00]);
}

#[test]
fn end_inside_an_include_only_stops_that_file() {
    let source = "\
        nop\n\
        include \"tests/fixtures/sub/included.asm\"\n\
        nop\n";
    let asm = assemble_ok(source);
    let image = vexfile::emit_binary(&asm.list).unwrap();
    // nop, included_label:mvi b,7 (2 bytes), deep_label:mvi d,9 (2 bytes), nop
    assert_eq!(image, vec![0x00, 0x06, 7, 0x16, 9, 0x00]);
}
