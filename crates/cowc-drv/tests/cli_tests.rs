//! Command-line interface tests for the cowc binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn cowc() -> Command {
    Command::cargo_bin("cowc").unwrap()
}

#[test]
fn test_compile_writes_default_output() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("prog.cow");
    std::fs::write(&input, "var x: uint8 := 1;\n").unwrap();

    cowc().arg(&input).assert().success();

    let output = dir.path().join("prog.asm");
    let asm = std::fs::read_to_string(output).unwrap();
    assert!(asm.contains("JMP"));
    assert!(asm.trim_end().ends_with("END"));
}

#[test]
fn test_explicit_output_path() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("prog.cow");
    let output = dir.path().join("out.s");
    std::fs::write(&input, "var x: uint16 := 2;\n").unwrap();

    cowc()
        .arg(&input)
        .arg("-o")
        .arg(&output)
        .assert()
        .success();
    assert!(output.is_file());
}

#[test]
fn test_include_search_path() {
    let dir = TempDir::new().unwrap();
    let libs = dir.path().join("libs");
    std::fs::create_dir(&libs).unwrap();
    std::fs::write(libs.join("defs.coh"), "const LIMIT := 10;\n").unwrap();
    let input = dir.path().join("prog.cow");
    std::fs::write(&input, "include \"defs.coh\";\nvar x: uint8 := LIMIT;\n").unwrap();

    cowc()
        .arg(&input)
        .arg("-I")
        .arg(&libs)
        .assert()
        .success();
}

#[test]
fn test_missing_include_fails_with_diagnostic() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("prog.cow");
    std::fs::write(&input, "include \"nowhere.coh\";\n").unwrap();

    cowc()
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_type_error_reports_position() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("prog.cow");
    std::fs::write(
        &input,
        "var a: uint8 := 1;\nvar b: uint16 := 2;\nb := b + a;\n",
    )
    .unwrap();

    cowc()
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("prog.cow:3:"))
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_no_opt_flag() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("prog.cow");
    std::fs::write(&input, "var x: uint16 := 4;\nx := x * 100;\n").unwrap();

    cowc().arg(&input).arg("--no-opt").assert().success();
    let asm = std::fs::read_to_string(dir.path().join("prog.asm")).unwrap();
    // A large odd multiplier costs less through the runtime multiply.
    assert!(asm.contains("f_mul16"), "{}", asm);
}

#[test]
fn test_recursion_is_rejected() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("prog.cow");
    std::fs::write(&input, "sub f is f(); end sub;\nf();\n").unwrap();

    cowc()
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("recursion"));
}
