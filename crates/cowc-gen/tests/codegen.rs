//! Code generator tests: label mangling, overlay layout, and the
//! byte-count inlining rule, driven through the front half of the
//! pipeline.

use cowc_gen::{generate, layout::Layout};
use cowc_lex::Lexer;
use cowc_par::Parser;
use cowc_sem::hir::Program;
use cowc_sem::analyze;
use cowc_util::{FileId, Handler, Interner};

fn front(src: &str) -> (Program, Interner) {
    let mut interner = Interner::new();
    let mut handler = Handler::new();
    let tokens = Lexer::new(src, FileId(0), &mut interner, &mut handler).tokenize();
    let ast = Parser::new(tokens, &interner, &mut handler).parse();
    assert!(!handler.has_errors(), "{:?}", handler.diagnostics());
    let program = analyze(&ast, &mut interner, &mut handler).expect("analysis succeeds");
    (program, interner)
}

fn asm_for(src: &str) -> String {
    let (mut program, interner) = front(src);
    cowc_opt::optimize(&mut program);
    generate(&program, &interner).expect("generation succeeds")
}

#[test]
fn test_mnemonic_subroutine_names_get_prefixed() {
    // A subroutine named like a register mnemonic would collide with the
    // assembler's operand syntax.
    let asm = asm_for(
        "var x: uint8;\n\
         sub b(n: uint8) is x := n; end sub;\n\
         b(1);\n\
         b(2);\n",
    );
    assert!(asm.contains("s_b:"), "{}", asm);
    assert!(asm.contains("\tCALL s_b"), "{}", asm);
}

#[test]
fn test_variables_get_v_prefix() {
    let asm = asm_for("var h: uint16 := 1;\nh := h + h;\n");
    // `h` alone would read as the register; the data label is mangled.
    assert!(asm.contains("v_h:"), "{}", asm);
    assert!(asm.contains("\tLHLD v_h"), "{}", asm);
}

#[test]
fn test_overlay_bases_follow_the_call_graph() {
    let (program, interner) = front(
        "sub leaf(a: uint16): (r: uint16) is r := a; end sub;\n\
         sub mid(a: uint16): (r: uint16) is (r) := leaf(a); end sub;\n\
         sub peer(a: uint16): (r: uint16) is r := a; end sub;\n\
         var x: uint16;\n\
         (x) := mid(1);\n\
         (x) := peer(2);\n",
    );
    let layout = Layout::build(&program, &interner);
    // mid and peer are both called only from the top level, so they
    // overlay each other at the workspace base; leaf stacks past mid.
    let offset_of = |label: &str| {
        program
            .syms
            .iter()
            .find(|(sym, _)| layout.var_labels.get(sym).map(String::as_str) == Some(label))
            .map(|(sym, _)| layout.frame_offsets[&sym])
            .expect("labelled frame variable exists")
    };
    assert_eq!(offset_of("v_mid_a"), 0);
    assert_eq!(offset_of("v_peer_a"), 0);
    assert_eq!(offset_of("v_leaf_a"), 4);
}

#[test]
fn test_inlining_follows_the_byte_budget() {
    // A five-byte body called twice: 2*5 < 5 + 2*3 + 1, so both sites
    // splice the body and the label disappears.
    let small = asm_for(
        "var x: uint8;\n\
         sub bump is x := 1; end sub;\n\
         bump(); bump();\n",
    );
    assert!(!small.contains("\tCALL bump"), "{}", small);

    // A fat body called three times stays a subroutine.
    let large = asm_for(
        "var a: uint16; var b: uint16; var c: uint16; var d: uint16;\n\
         sub churn is\n\
         a := a + b; b := b + c; c := c + d; d := d + a;\n\
         a := a ^ d; b := b | c; c := c & a; d := d + b;\n\
         end sub;\n\
         churn(); churn(); churn();\n",
    );
    assert!(large.contains("\tCALL churn"), "{}", large);
    assert!(large.contains("churn:"), "{}", large);
}

#[test]
fn test_uncalled_subroutine_is_still_emitted() {
    let asm = asm_for(
        "var x: uint8;\n\
         sub spare(n: uint8) is x := n; end sub;\n\
         x := 0;\n",
    );
    assert!(asm.contains("spare:"), "{}", asm);
}
