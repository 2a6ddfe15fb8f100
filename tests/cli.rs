mod common;

use assert_cmd::Command;
use common::{int, Asm, Fixture, MethodSpec};
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

fn fixture_file(dir: &TempDir) -> PathBuf {
    let mut fixture = Fixture::new();
    let mut asm = Asm::new();
    asm.ldarg(0).switch(&["c0", "c1"]);
    asm.br("default");
    asm.label("c0").ldc(10).ret();
    asm.label("c1").ldc(20).ret();
    asm.label("default").ldc(0).ret();
    fixture.method(MethodSpec {
        name: "Classify",
        params: vec![("x", int())],
        returns: Some(int()),
        il: asm.finish(),
        ..MethodSpec::default()
    });

    let path = dir.path().join("fixture.json");
    let json = fixture.metadata.to_json().expect("serialize fixture");
    std::fs::write(&path, json).expect("write fixture");
    path
}

#[test]
fn test_decompile_prints_every_method() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = fixture_file(&dir);

    Command::cargo_bin("cil-dec")
        .expect("binary")
        .arg("decompile")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("// Sample::Classify(x)"))
        .stdout(predicate::str::contains("switch (x)"))
        .stdout(predicate::str::contains("return 20;"));
}

#[test]
fn test_decompile_writes_output_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = fixture_file(&dir);
    let output = dir.path().join("out.cs");

    Command::cargo_bin("cil-dec")
        .expect("binary")
        .args(["decompile", "--method", "0x06000001", "--always-braces", "-o"])
        .arg(&output)
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("written to"));
    let text = std::fs::read_to_string(&output).expect("output file");
    assert!(text.contains("switch (x)"), "{}", text);
}

#[test]
fn test_cfg_reports_blocks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = fixture_file(&dir);
    let dot = dir.path().join("cfg.dot");

    Command::cargo_bin("cil-dec")
        .expect("binary")
        .args(["cfg", "--method", "0x06000001", "--dot"])
        .arg(&dot)
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("Basic blocks: 5"))
        .stdout(predicate::str::contains("Switch(1)"));
    let text = std::fs::read_to_string(&dot).expect("dot file");
    assert!(text.starts_with("digraph"));
}

#[test]
fn test_unknown_method_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = fixture_file(&dir);

    Command::cargo_bin("cil-dec")
        .expect("binary")
        .args(["cfg", "--method", "0x06000042"])
        .arg(&input)
        .assert()
        .failure();
}

#[test]
fn test_missing_input_fails() {
    Command::cargo_bin("cil-dec")
        .expect("binary")
        .args(["decompile", "/nonexistent/fixture.json"])
        .assert()
        .failure();
}
