//! End-to-end compilation scenarios, asserting on the emitted assembly.
//! The external assembler, linker and emulator are out of scope; these
//! tests pin down the text the downstream tools consume.

use std::path::{Path, PathBuf};

use cowc_drv::{Config, Session};
use tempfile::TempDir;

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// The runtime interface header used by the scenarios.
const RUNTIME_HEADER: &str = "\
@decl sub print(s: [uint8]) @extern(\"f_print\");\n\
@decl sub print_i16(n: int16) @extern(\"f_printi16\");\n\
@decl sub print_nl() @extern(\"f_printnl\");\n";

fn compile_with(dir: &TempDir, source: &str, optimize: bool) -> Result<String, String> {
    write(dir.path(), "cowgol.coh", RUNTIME_HEADER);
    let input = write(dir.path(), "main.cow", source);
    let mut config = Config::new(input);
    config.optimize = optimize;
    let mut session = Session::new(config);
    session
        .compile()
        .map_err(|e| format!("{}\n{}", e, session.render_diagnostics()))
}

fn compile(source: &str) -> String {
    let dir = TempDir::new().unwrap();
    compile_with(&dir, source, true).expect("compilation succeeds")
}

#[test]
fn test_hello_world_shape() {
    let asm = compile(
        "include \"cowgol.coh\";\n\
         print(\"Hello\\n\");\n",
    );
    // Entry jump, the call into the runtime, the pooled string with its
    // NUL, and the terminating directive.
    assert!(asm.starts_with("; generated by cowc\n\tJMP "), "{}", asm);
    assert!(asm.contains("\tCALL f_print"), "{}", asm);
    assert!(asm.contains("str_0:"), "{}", asm);
    assert!(asm.contains("\tDB 72,101,108,108,111,10,0"), "{}", asm);
    assert!(asm.contains("\tJMP f_exit"), "{}", asm);
    assert!(asm.trim_end().ends_with("\tEND"), "{}", asm);
}

#[test]
fn test_arithmetic_folds_to_constants() {
    let asm = compile(
        "include \"cowgol.coh\";\n\
         print_i16(10 + 3);\n\
         print_i16(10 - 3);\n\
         print_i16(10 * 3);\n\
         print_i16(10 / 3);\n\
         print_i16(10 % 3);\n",
    );
    for expected in ["\tLXI H,13", "\tLXI H,7", "\tLXI H,30", "\tLXI H,3", "\tLXI H,1"] {
        assert!(asm.contains(expected), "missing {} in:\n{}", expected, asm);
    }
    // Folded completely: no runtime multiply or divide remains.
    assert!(!asm.contains("f_mul16"), "{}", asm);
    assert!(!asm.contains("f_div16"), "{}", asm);
}

#[test]
fn test_counting_loop_with_body_use_keeps_direction() {
    // The body reads i, so loop reversal must not fire; the loop
    // compares against the limit and counts up.
    let asm = compile(
        "include \"cowgol.coh\";\n\
         var sum: uint16 := 0;\n\
         var i: uint8 := 0;\n\
         while i < 10 loop\n\
         sum := sum + (i as uint16);\n\
         i := i + 1;\n\
         end loop;\n\
         print_i16(sum as int16);\n",
    );
    assert!(asm.contains("\tCPI 10"), "{}", asm);
    assert!(!asm.contains("\tDCR"), "{}", asm);
}

#[test]
fn test_counting_loop_without_body_use_reverses_to_dcr() {
    // The body only moves a pointer; reversal rewrites the counter to
    // count down, and the peephole turns the decrement into DCR.
    let asm = compile(
        "include \"cowgol.coh\";\n\
         record Buf is first: uint8; rest: uint8[9]; end record;\n\
         var buf: Buf;\n\
         sub fill(p: [uint8]) is\n\
         var q: [uint8];\n\
         q := p;\n\
         var i: uint8 := 0;\n\
         while i < 10 loop\n\
         [q] := 0;\n\
         q := q + 1;\n\
         i := i + 1;\n\
         end loop;\n\
         end sub;\n\
         fill(&buf.first);\n",
    );
    assert!(asm.contains("\tDCR M"), "{}", asm);
    assert!(!asm.contains("\tCPI 10"), "{}", asm);
}

#[test]
fn test_record_inheritance_offsets() {
    let asm = compile(
        "include \"cowgol.coh\";\n\
         record Point is x: int16; y: int16; end record;\n\
         record Point3D: Point is z: int16; end record;\n\
         var p: Point3D;\n\
         p.z := 7;\n\
         p.x := 1;\n\
         print_i16(p.x);\n",
    );
    // z sits at offset 4 past the base record; x at offset 0 needs no
    // displacement arithmetic at all.
    assert!(asm.contains("\tLXI D,4"), "{}", asm);
    // The variable reserves the full derived size.
    assert!(asm.contains("v_p:"), "{}", asm);
    assert!(asm.contains("\tDS 6"), "{}", asm);
}

#[test]
fn test_forward_declaration_resolves() {
    let asm = compile(
        "include \"cowgol.coh\";\n\
         @decl sub emit(n: int16);\n\
         sub twice is\n\
         emit(1);\n\
         emit(2);\n\
         end sub;\n\
         @impl sub emit is\n\
         print_i16(n);\n\
         end sub;\n\
         twice();\n",
    );
    // emit has a parameter, so it is not an inline candidate; both call
    // sites go through its label.
    assert_eq!(asm.matches("\tCALL emit").count(), 2, "{}", asm);
}

#[test]
fn test_mutual_recursion_is_a_compile_error() {
    let dir = TempDir::new().unwrap();
    let err = compile_with(
        &dir,
        "@decl sub b();\n\
         sub a is b(); end sub;\n\
         @impl sub b is a(); end sub;\n",
        true,
    )
    .unwrap_err();
    assert!(err.contains("recursion"), "{}", err);
}

#[test]
fn test_single_call_subroutine_is_inlined() {
    let asm = compile(
        "include \"cowgol.coh\";\n\
         var flag: uint8;\n\
         sub mark is\n\
         flag := 1;\n\
         end sub;\n\
         mark();\n",
    );
    // Called exactly once: the body is spliced at the call site and no
    // standalone copy remains.
    assert!(!asm.contains("\tCALL mark"), "{}", asm);
    assert!(!asm.contains("mark:"), "{}", asm);
    assert!(asm.contains("v_flag"), "{}", asm);
}

#[test]
fn test_interface_call_goes_through_pchl() {
    let asm = compile(
        "include \"cowgol.coh\";\n\
         interface Handler(code: uint8): (ok: uint8);\n\
         sub accept implements Handler is\n\
         ok := code;\n\
         end sub;\n\
         var h: Handler;\n\
         var r: uint8;\n\
         h := accept;\n\
         (r) := h(3);\n",
    );
    assert!(asm.contains("\tPCHL"), "{}", asm);
    // The interface's parameter slot is shared storage.
    assert!(asm.contains("v_code"), "{}", asm);
}

#[test]
fn test_asm_passthrough_substitutes_variables() {
    let asm = compile(
        "var counter: uint8;\n\
         @asm \"LDA \", counter;\n",
    );
    assert!(asm.contains("LDA v_counter"), "{}", asm);
}

#[test]
fn test_optimizer_toggle_changes_code_not_outcome() {
    let src = "include \"cowgol.coh\";\n\
               var a: int16;\n\
               a := 6;\n\
               print_i16(a * 7);\n";
    let dir = TempDir::new().unwrap();
    let optimized = compile_with(&dir, src, true).unwrap();
    let dir2 = TempDir::new().unwrap();
    let plain = compile_with(&dir2, src, false).unwrap();
    // Both forms compile and call the same runtime routine; the
    // optimized form folds 6 * 7 while the plain one multiplies.
    assert!(optimized.contains("\tLXI H,42"), "{}", optimized);
    assert!(plain.contains("f_mul16"), "{}", plain);
    assert!(optimized.contains("\tCALL f_printi16"));
    assert!(plain.contains("\tCALL f_printi16"));
}

#[test]
fn test_static_initializers_in_data_section() {
    let asm = compile(
        "var table: uint8[] := {1, 2, 3};\n\
         var word: uint16 := 513;\n\
         var raw: uint8[6] := \"hello\";\n",
    );
    assert!(asm.contains("v_table:"), "{}", asm);
    assert!(asm.contains("\tDB 1,2,3"), "{}", asm);
    assert!(asm.contains("v_word:"), "{}", asm);
    assert!(asm.contains("\tDW 513"), "{}", asm);
    assert!(asm.contains("\tDB 104,101,108,108,111,0"), "{}", asm);
}

#[test]
fn test_workspace_overlays_and_equ_map() {
    let asm = compile(
        "sub deep(n: uint16): (r: uint16) is\n\
         r := n + 1;\n\
         end sub;\n\
         sub shallow(n: uint16): (r: uint16) is\n\
         var t: uint16;\n\
         (t) := deep(n);\n\
         r := t;\n\
         end sub;\n\
         var out: uint16;\n\
         (out) := shallow(5);\n",
    );
    assert!(asm.contains("workspace:"), "{}", asm);
    assert!(asm.contains("EQU workspace+"), "{}", asm);
    // deep's frame sits past shallow's (params+ret+local = 6 bytes).
    assert!(asm.contains("v_deep_n EQU workspace+6"), "{}", asm);
}

#[test]
fn test_peephole_output_is_a_fixpoint() {
    // Compiling twice yields identical text; the peephole left nothing
    // for a second pass (and generation is deterministic).
    let src = "include \"cowgol.coh\";\n\
               var a: uint16 := 2;\n\
               var b: uint16 := 3;\n\
               print_i16((a + b) as int16);\n";
    let dir = TempDir::new().unwrap();
    let first = compile_with(&dir, src, true).unwrap();
    let dir2 = TempDir::new().unwrap();
    let second = compile_with(&dir2, src, true).unwrap();
    assert_eq!(first, second);
}
