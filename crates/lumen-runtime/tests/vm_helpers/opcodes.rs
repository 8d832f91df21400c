//! Operator and opcode semantics

use super::{eval_display, eval_runtime_error, eval_value};
use lumen_runtime::value::Value;
use pretty_assertions::assert_eq;
use rstest::rstest;

#[rstest]
#[case("return 1 + 2;", "3")]
#[case("return 7 - 10;", "-3")]
#[case("return 6 * 7;", "42")]
#[case("return 9 / 2;", "4.5")]
#[case("return 9 % 4;", "1")]
#[case("return 2 ** 10;", "1024")]
#[case("return -(3 + 4);", "-7")]
#[case("return 1 + 2 * 3;", "7")]
#[case("return (1 + 2) * 3;", "9")]
fn test_arithmetic(#[case] source: &str, #[case] expected: &str) {
    assert_eq!(eval_display(source), expected);
}

#[rstest]
#[case("return 1 < 2;", "true")]
#[case("return 2 <= 2;", "true")]
#[case("return 1 > 2;", "false")]
#[case("return 3 >= 4;", "false")]
#[case("return 1 == 1;", "true")]
#[case("return 1 != 1;", "false")]
#[case("return 'a' == 'a';", "true")]
#[case("return 'a' === 'b';", "false")]
#[case("return null == null;", "true")]
#[case("return 1 == '1';", "false")]
fn test_comparisons(#[case] source: &str, #[case] expected: &str) {
    assert_eq!(eval_display(source), expected);
}

#[test]
fn test_reference_equality_for_heap_values() {
    assert_eq!(eval_display("return [1] == [1];"), "false");
    assert_eq!(eval_display("let a = [1]; let b = a; return a == b;"), "true");
    assert_eq!(eval_display("let o = {}; return o == o;"), "true");
}

#[rstest]
#[case("return !null;", "true")]
#[case("return !false;", "true")]
#[case("return !0;", "true")]
#[case("return !'';", "true")]
#[case("return ![];", "true")]
#[case("return ![0];", "false")]
#[case("return !'x';", "false")]
#[case("return !42;", "false")]
fn test_truthiness(#[case] source: &str, #[case] expected: &str) {
    assert_eq!(eval_display(source), expected);
}

#[test]
fn test_string_concatenation_coerces() {
    assert_eq!(eval_display("return 'a' + 1;"), "a1");
    assert_eq!(eval_display("return 1 + 'a';"), "1a");
    assert_eq!(eval_display("return 'n: ' + null;"), "n: null");
    assert_eq!(eval_display("return '' + [1, 2];"), "[1, 2]");
}

#[test]
fn test_template_literals() {
    assert_eq!(eval_display("let x = 3; return `a${x + 1}b`;"), "a4b");
    assert_eq!(eval_display("return `${1}${2}`;"), "12");
    assert_eq!(eval_display("return `plain`;"), "plain");
}

#[test]
fn test_division_and_modulo_by_zero_fail() {
    let err = eval_runtime_error("return 1 / 0;");
    assert!(err.contains("Division by zero"), "{err}");
    let err = eval_runtime_error("return 1 % 0;");
    assert!(err.contains("Division by zero"), "{err}");
}

#[test]
fn test_arithmetic_type_errors() {
    let err = eval_runtime_error("return 1 - 'x';");
    assert!(err.contains("Type error"), "{err}");
    let err = eval_runtime_error("return [] * 2;");
    assert!(err.contains("Type error"), "{err}");
}

#[test]
fn test_ieee_754_overflow_does_not_fail() {
    assert!(eval_value("return 2 ** 4096;").equals(&Value::Number(f64::INFINITY)));
}

#[test]
fn test_logical_short_circuit() {
    assert_eq!(eval_display("return 0 || 'fallback';"), "fallback");
    assert_eq!(eval_display("return 1 && 2;"), "2");
    assert_eq!(eval_display("return null && neverCalled();"), "null");
    assert_eq!(eval_display("return 'x' || neverCalled();"), "x");
}

#[test]
fn test_identifier_updates() {
    assert_eq!(eval_display("let n = 5; n++; return n;"), "6");
    assert_eq!(eval_display("let n = 5; return n++;"), "5");
    assert_eq!(eval_display("let n = 5; return ++n;"), "6");
    assert_eq!(eval_display("let n = 5; return --n + n;"), "8");
    assert_eq!(
        eval_display("function f() { let n = 1; n--; return n; } return f();"),
        "0"
    );
}

#[test]
fn test_indexing() {
    assert_eq!(eval_display("let a = [1, 2, 3]; return a[1];"), "2");
    assert_eq!(eval_display("let a = [1]; return a[5];"), "null");
    assert_eq!(eval_display("let a = [1, 2]; a[0] = 9; return a[0];"), "9");
    assert_eq!(eval_display("let a = [1]; a[1] = 2; return a.length;"), "2");
    assert_eq!(eval_display("let o = {}; o['k'] = 7; return o['k'];"), "7");
    assert_eq!(eval_display("return 'abc'[1];"), "b");
    assert_eq!(eval_display("return 'abc'[9];"), "null");
}

#[test]
fn test_array_index_out_of_range_write_fails() {
    let err = eval_runtime_error("let a = [1]; a[10] = 1;");
    assert!(err.contains("out of range"), "{err}");
}

#[test]
fn test_lengths() {
    assert_eq!(eval_display("return [1, 2, 3].length;"), "3");
    assert_eq!(eval_display("return 'hello'.length;"), "5");
    assert_eq!(eval_display("return [].length;"), "0");
}

#[test]
fn test_undefined_global_read_and_write_fail() {
    let err = eval_runtime_error("return missing;");
    assert!(err.contains("Undefined variable: missing"), "{err}");
    let err = eval_runtime_error("missing = 1;");
    assert!(err.contains("Undefined variable: missing"), "{err}");
}

#[test]
fn test_calling_non_callable_fails() {
    let err = eval_runtime_error("let x = 5; x();");
    assert!(err.contains("Not callable"), "{err}");
}

#[test]
fn test_array_methods() {
    assert_eq!(
        eval_display("let a = [1, 2]; a.push(3); return a.length;"),
        "3"
    );
    assert_eq!(eval_display("let a = [1, 2]; return a.pop();"), "2");
    assert_eq!(eval_display("return [4, 5, 6].indexOf(5);"), "1");
    assert_eq!(eval_display("return [4, 5].indexOf(9);"), "-1");
    assert_eq!(eval_display("return [1, 2, 3].join('-');"), "1-2-3");
    assert_eq!(
        eval_display("return [1, 2, 3].map(x => x * 2).join(',');"),
        "2,4,6"
    );
}

#[test]
fn test_math_native() {
    assert_eq!(eval_display("return Math.floor(3.7);"), "3");
    assert_eq!(eval_display("return Math.max(1, 9, 4);"), "9");
    assert_eq!(eval_display("return Math.min(5, 2, 8);"), "2");
    assert_eq!(eval_display("return Math.abs(0 - 4);"), "4");
    assert_eq!(eval_display("return Math.pow(2, 8);"), "256");
    assert_eq!(
        eval_display("let r = Math.random(); return r >= 0 && r < 1;"),
        "true"
    );
    assert_eq!(eval_display("return Math.PI > 3.14 && Math.PI < 3.15;"), "true");
}

#[test]
fn test_clock_natives() {
    assert_eq!(eval_display("return Date.now() > 0;"), "true");
    assert_eq!(eval_display("return performance.now() >= 0;"), "true");
}
