//! Closures and upvalue semantics

use super::{eval_display, eval_runtime_error};
use pretty_assertions::assert_eq;

#[test]
fn test_closures_preserve_bindings_per_activation() {
    // Each call of outer gets its own x; f1 and f2 advance independently.
    let source = "\
        function outer() { let x = 0; return function() { return ++x; }; } \
        let f1 = outer(); \
        let f2 = outer(); \
        return [f1(), f1(), f2(), f1(), f2()];";
    assert_eq!(eval_display(source), "[1, 2, 1, 3, 2]");
}

#[test]
fn test_two_closures_share_one_upvalue() {
    let source = "\
        function make() { \
            let x = 0; \
            let inc = () => { x = x + 1; return x; }; \
            let get = () => x; \
            return [inc, get]; \
        } \
        let pair = make(); \
        let inc = pair[0]; \
        let get = pair[1]; \
        inc(); \
        inc(); \
        return get();";
    assert_eq!(eval_display(source), "2");
}

#[test]
fn test_upvalue_closed_after_scope_exit() {
    let source = "\
        function capture() { \
            let f = null; \
            { let local = 'kept'; f = () => local; } \
            return f; \
        } \
        return capture()();";
    assert_eq!(eval_display(source), "kept");
}

#[test]
fn test_transitive_upvalue_chain() {
    // The innermost arrow reaches two scopes up.
    let source = "\
        function a() { \
            let v = 10; \
            function b() { \
                function c() { return v + 1; } \
                return c; \
            } \
            return b()(); \
        } \
        return a();";
    assert_eq!(eval_display(source), "11");
}

#[test]
fn test_named_recursion_through_callee_slot() {
    let source = "\
        function fib(n) { if (n <= 1) { return n; } return fib(n - 1) + fib(n - 2); } \
        return fib(10);";
    assert_eq!(eval_display(source), "55");
}

#[test]
fn test_local_function_declaration_recurses() {
    let source = "\
        function outer() { \
            function fact(n) { if (n <= 1) { return 1; } return n * fact(n - 1); } \
            return fact(5); \
        } \
        return outer();";
    assert_eq!(eval_display(source), "120");
}

#[test]
fn test_arrow_expression_body() {
    assert_eq!(eval_display("let double = x => x * 2; return double(21);"), "42");
}

#[test]
fn test_function_expression_value() {
    assert_eq!(
        eval_display("let f = function(a, b) { return a + b; }; return f(2, 3);"),
        "5"
    );
}

#[test]
fn test_arity_mismatch_is_runtime_error() {
    let err = eval_runtime_error("function f(a) { return a; } f();");
    assert!(err.contains("expects 1 arguments, got 0"), "{err}");
    let err = eval_runtime_error("function g() { return 1; } g(2);");
    assert!(err.contains("expects 0 arguments, got 1"), "{err}");
}

#[test]
fn test_deep_recursion_overflows() {
    let err = eval_runtime_error("function f() { return f(); } f();");
    assert!(err.contains("Stack overflow."), "{err}");
}

#[test]
fn test_counter_pair_shares_state() {
    let source = "\
        function counter() { \
            let n = 0; \
            return { \
                bump() { n++; return n; }, \
                read() { return n; } \
            }; \
        } \
        let c = counter(); \
        c.bump(); \
        c.bump(); \
        c.bump(); \
        return c.read();";
    assert_eq!(eval_display(source), "3");
}
