//! Property-based checks for the quantified invariants

use lumen_runtime::value::Value;
use lumen_runtime::vm::InterpretOutcome;
use lumen_runtime::Runtime;
use proptest::prelude::*;

fn eval_value(source: &str) -> Value {
    let interpretation = Runtime::new()
        .eval_source(source)
        .expect("source should compile");
    assert_eq!(interpretation.result, InterpretOutcome::Ok);
    interpretation.value
}

proptest! {
    // Arithmetic opcodes agree with IEEE-754 host arithmetic and leave
    // exactly one result behind (the script value proves the stack was
    // balanced).
    #[test]
    fn prop_addition_matches_host(a in -10_000i32..10_000, b in -10_000i32..10_000) {
        let value = eval_value(&format!("return {a} + {b};"));
        prop_assert!(value.equals(&Value::Number((a as f64) + (b as f64))));
    }

    #[test]
    fn prop_subtraction_and_multiplication_match_host(
        a in -1_000i32..1_000,
        b in -1_000i32..1_000,
    ) {
        let difference = eval_value(&format!("return {a} - {b};"));
        prop_assert!(difference.equals(&Value::Number((a as f64) - (b as f64))));
        let product = eval_value(&format!("return {a} * {b};"));
        prop_assert!(product.equals(&Value::Number((a as f64) * (b as f64))));
    }

    // Truthiness: a number is falsy iff it is zero.
    #[test]
    fn prop_number_truthiness(n in -10_000i32..10_000) {
        let value = eval_value(&format!("return !!{n};"));
        prop_assert!(value.equals(&Value::Bool(n != 0)));
    }

    // String concatenation preserves content.
    #[test]
    fn prop_string_concat(a in "[a-z]{0,8}", b in "[a-z]{0,8}") {
        let value = eval_value(&format!("return '{a}' + '{b}';"));
        prop_assert_eq!(value.to_display_string(), format!("{a}{b}"));
    }

    // Comparison opcodes agree with host ordering.
    #[test]
    fn prop_ordering(a in -1_000i32..1_000, b in -1_000i32..1_000) {
        let value = eval_value(&format!("return {a} < {b};"));
        prop_assert!(value.equals(&Value::Bool(a < b)));
        let value = eval_value(&format!("return {a} >= {b};"));
        prop_assert!(value.equals(&Value::Bool(a >= b)));
    }

    // Closure sharing: writes through one closure are visible through the
    // other, for any number of bumps.
    #[test]
    fn prop_closure_sharing(bumps in 1usize..20) {
        let calls = "inc();".repeat(bumps);
        let source = format!(
            "function make() {{ \
                let x = 0; \
                return [() => {{ x = x + 1; return x; }}, () => x]; \
             }} \
             let pair = make(); let inc = pair[0]; let get = pair[1]; \
             {calls} \
             return get();"
        );
        let value = eval_value(&source);
        prop_assert!(value.equals(&Value::Number(bumps as f64)));
    }

    // Prototype lookup returns the nearest ancestor's property.
    #[test]
    fn prop_prototype_nearest_wins(own in any::<bool>()) {
        let shadow = if own { "mid.v = 'mid';" } else { "" };
        let source = format!(
            "let root = {{v: 'root'}}; \
             let mid = Object.create(root); \
             {shadow} \
             let leaf = Object.create(mid); \
             return leaf.v;"
        );
        let expected = if own { "mid" } else { "root" };
        prop_assert_eq!(eval_value(&source).to_display_string(), expected);
    }
}
