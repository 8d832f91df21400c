//! End-to-end tests for the `lumen` binary

use assert_cmd::Command;
use predicates::prelude::*;

fn lumen() -> Command {
    Command::cargo_bin("lumen").expect("binary builds")
}

#[test]
fn test_eval_prints_value() {
    lumen()
        .args(["--eval", "return 6 * 7;"])
        .assert()
        .success()
        .stdout(predicate::str::contains("42"));
}

#[test]
fn test_run_script_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hello.lum");
    std::fs::write(&path, "console.log('hello from lumen');").unwrap();
    lumen()
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("hello from lumen"));
}

#[test]
fn test_disassemble_lists_instructions() {
    lumen()
        .args(["--eval", "let a = 1;", "--disassemble"])
        .assert()
        .success()
        .stdout(predicate::str::contains("CONSTANT"))
        .stdout(predicate::str::contains("DEFINE_GLOBAL"));
}

#[test]
fn test_compile_error_exit_code() {
    lumen()
        .args(["--eval", "break;"])
        .assert()
        .code(65)
        .stderr(predicate::str::contains("break"));
}

#[test]
fn test_runtime_error_exit_code() {
    lumen()
        .args(["--eval", "undefinedThing();"])
        .assert()
        .code(70)
        .stderr(predicate::str::contains("Undefined variable"));
}
