//! Branches, loops, and exceptions

use super::{eval_display, eval_logs, eval_runtime_error};
use pretty_assertions::assert_eq;

#[test]
fn test_if_else() {
    assert_eq!(eval_display("if (1 < 2) { return 'a'; } else { return 'b'; }"), "a");
    assert_eq!(eval_display("if (1 > 2) { return 'a'; } else { return 'b'; }"), "b");
    assert_eq!(eval_display("let r = 'x'; if ([]) { r = 'y'; } return r;"), "x");
}

#[test]
fn test_while_loop() {
    assert_eq!(
        eval_display("let n = 0; let sum = 0; while (n < 5) { n++; sum += n; } return sum;"),
        "15"
    );
}

#[test]
fn test_for_loop() {
    assert_eq!(
        eval_display("let sum = 0; for (let i = 1; i <= 4; i++) { sum += i; } return sum;"),
        "10"
    );
}

#[test]
fn test_for_loop_without_clauses() {
    assert_eq!(
        eval_display("let i = 0; for (;;) { i++; if (i >= 3) { break; } } return i;"),
        "3"
    );
}

#[test]
fn test_break_and_continue() {
    let source = "\
        let sum = 0; \
        for (let i = 0; i < 10; i++) { \
            if (i % 2 == 0) { continue; } \
            if (i > 7) { break; } \
            sum += i; \
        } \
        return sum;";
    assert_eq!(eval_display(source), "16");
}

#[test]
fn test_continue_in_while_reevaluates_condition() {
    let source = "\
        let n = 0; \
        let visits = 0; \
        while (n < 5) { \
            n++; \
            if (n == 3) { continue; } \
            visits++; \
        } \
        return [n, visits];";
    assert_eq!(eval_display(source), "[5, 4]");
}

#[test]
fn test_nested_loops_break_inner_only() {
    let source = "\
        let count = 0; \
        for (let i = 0; i < 3; i++) { \
            for (let j = 0; j < 10; j++) { \
                if (j == 2) { break; } \
                count++; \
            } \
        } \
        return count;";
    assert_eq!(eval_display(source), "6");
}

#[test]
fn test_exception_through_call_chain() {
    let source = "\
        function a() { throw 'e'; } \
        function b() { a(); } \
        try { b(); } catch (e) { console.log(e); }";
    assert_eq!(eval_logs(source), vec!["e"]);
}

#[test]
fn test_try_without_throw_skips_catch() {
    let source = "\
        let out = []; \
        try { out.push('try'); } catch (e) { out.push('catch'); } \
        out.push('after'); \
        return out;";
    assert_eq!(eval_display(source), "['try', 'after']");
}

#[test]
fn test_thrown_values_keep_their_type() {
    let source = "\
        try { throw {code: 42}; } catch (e) { return e.code; }";
    assert_eq!(eval_display(source), "42");
}

#[test]
fn test_rethrow_to_outer_handler() {
    let source = "\
        let out = []; \
        try { \
            try { throw 'inner'; } catch (e) { out.push('first ' + e); throw 'outer'; } \
        } catch (e) { out.push('second ' + e); } \
        return out;";
    assert_eq!(eval_display(source), "['first inner', 'second outer']");
}

#[test]
fn test_runtime_errors_are_catchable() {
    let source = "\
        try { let x = 1 / 0; return 'no'; } catch (e) { return 'caught'; }";
    assert_eq!(eval_display(source), "caught");
}

#[test]
fn test_uncaught_throw_fails_interpretation() {
    let err = eval_runtime_error("throw 'loose';");
    assert!(err.contains("loose"), "{err}");
}

#[test]
fn test_catch_without_parameter() {
    assert_eq!(
        eval_display("try { throw 'x'; } catch { return 'dropped'; }"),
        "dropped"
    );
}

#[test]
fn test_return_inside_try_pops_handler() {
    // The function returns from inside the try; a later throw must not land
    // in its stale handler.
    let source = "\
        function early() { try { return 'early'; } catch (e) { return 'no'; } } \
        let r = early(); \
        try { throw 'later'; } catch (e) { return [r, e]; }";
    assert_eq!(eval_display(source), "['early', 'later']");
}

#[test]
fn test_loop_locals_pop_on_break() {
    // Break inside a block with locals must leave the stack balanced.
    let source = "\
        let result = 0; \
        for (let i = 0; i < 5; i++) { \
            let doubled = i * 2; \
            if (doubled >= 4) { result = doubled; break; } \
        } \
        return result;";
    assert_eq!(eval_display(source), "4");
}
