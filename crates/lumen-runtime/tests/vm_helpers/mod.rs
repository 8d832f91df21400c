//! Common utilities for VM tests

pub mod async_generators;
pub mod closures;
pub mod control_flow;
pub mod objects;
pub mod opcodes;

use lumen_runtime::natives::capture_writer;
use lumen_runtime::value::Value;
use lumen_runtime::vm::{Interpretation, InterpretOutcome};
use lumen_runtime::Runtime;

/// Run source through the full pipeline
pub fn eval(source: &str) -> Interpretation {
    Runtime::new()
        .eval_source(source)
        .expect("source should compile")
}

/// Run and return the script's value, asserting success
pub fn eval_value(source: &str) -> Value {
    let interpretation = eval(source);
    assert_eq!(
        interpretation.result,
        InterpretOutcome::Ok,
        "unexpected runtime error for: {source}"
    );
    interpretation.value
}

/// Run and render the script's value
pub fn eval_display(source: &str) -> String {
    eval_value(source).to_display_string()
}

/// Run and capture everything the script logged to stdout
pub fn eval_logs(source: &str) -> Vec<String> {
    let mut runtime = Runtime::new();
    let (writer, buffer) = capture_writer();
    runtime.set_stdout(writer);
    let interpretation = runtime.eval_source(source).expect("source should compile");
    assert_eq!(interpretation.result, InterpretOutcome::Ok);
    let bytes = buffer.borrow().clone();
    String::from_utf8(bytes)
        .expect("utf8 output")
        .lines()
        .map(str::to_string)
        .collect()
}

/// Run expecting a runtime error; returns the stderr text
pub fn eval_runtime_error(source: &str) -> String {
    let mut runtime = Runtime::new();
    let (writer, buffer) = capture_writer();
    runtime.set_stderr(writer);
    let interpretation = runtime.eval_source(source).expect("source should compile");
    assert_eq!(
        interpretation.result,
        InterpretOutcome::RuntimeError,
        "expected a runtime error for: {source}"
    );
    let bytes = buffer.borrow().clone();
    String::from_utf8(bytes).expect("utf8 output")
}
