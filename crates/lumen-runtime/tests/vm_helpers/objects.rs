//! Objects, prototypes, classes, and destructuring

use super::{eval_display, eval_runtime_error};
use pretty_assertions::assert_eq;

#[test]
fn test_object_literals() {
    assert_eq!(eval_display("let o = {a: 1, b: 2}; return o.a + o.b;"), "3");
    assert_eq!(eval_display("let x = 5; let o = {x}; return o.x;"), "5");
    assert_eq!(eval_display("let o = {'key with space': 1}; return o['key with space'];"), "1");
}

#[test]
fn test_property_miss_is_null() {
    assert_eq!(eval_display("let o = {a: 1}; return o.missing;"), "null");
    assert_eq!(eval_display("let o = {}; return o.missing == null;"), "true");
}

#[test]
fn test_member_assignment() {
    assert_eq!(eval_display("let o = {}; o.a = 7; return o.a;"), "7");
    assert_eq!(eval_display("let o = {n: 1}; return o.n = 9;"), "9");
}

#[test]
fn test_compound_member_assignment_and_increment() {
    let source = "let o = {n: 10}; o.n += 5; o.n++; return o.n;";
    assert_eq!(eval_display(source), "16");
}

#[test]
fn test_member_update_expression_values() {
    let source = "\
        let o = {n: 5}; \
        let post = o.n++; \
        let pre = ++o.n; \
        return [post, pre, o.n];";
    assert_eq!(eval_display(source), "[5, 7, 7]");
}

#[test]
fn test_increment_of_missing_property_fails() {
    let err = eval_runtime_error("let o = {}; o.n++;");
    assert!(err.contains("no numeric property"), "{err}");
}

#[test]
fn test_prototype_method_dispatch() {
    let source = "\
        class P { greet() { return 'hi'; } } \
        let p = new P(); \
        return p.greet();";
    assert_eq!(eval_display(source), "hi");
}

#[test]
fn test_class_constructor_and_this() {
    let source = "\
        class Counter { \
            constructor(start) { this.n = start; } \
            bump() { this.n++; return this.n; } \
        } \
        let c = new Counter(5); \
        c.bump(); \
        return c.bump();";
    assert_eq!(eval_display(source), "7");
}

#[test]
fn test_instances_do_not_share_state() {
    let source = "\
        class Box { constructor(v) { this.v = v; } get() { return this.v; } } \
        let a = new Box(1); \
        let b = new Box(2); \
        return [a.get(), b.get()];";
    assert_eq!(eval_display(source), "[1, 2]");
}

#[test]
fn test_methods_live_on_the_prototype() {
    let source = "\
        class P { m() { return 1; } } \
        let a = new P(); \
        return P.prototype.m == Object.getPrototypeOf(a).m;";
    assert_eq!(eval_display(source), "true");
}

#[test]
fn test_this_captured_by_arrow() {
    let source = "\
        class T { \
            constructor() { this.v = 40; } \
            get() { let f = () => this.v + 2; return f(); } \
        } \
        return new T().get();";
    assert_eq!(eval_display(source), "42");
}

#[test]
fn test_object_create_and_prototype_chain() {
    let source = "\
        let proto = {greet: 'hi', deep: 1}; \
        let mid = Object.create(proto); \
        mid.deep = 2; \
        let leaf = Object.create(mid); \
        return [leaf.greet, leaf.deep, leaf.missing];";
    assert_eq!(eval_display(source), "['hi', 2, null]");
}

#[test]
fn test_object_create_null_prototype() {
    assert_eq!(
        eval_display("let o = Object.create(null); return o.anything;"),
        "null"
    );
}

#[test]
fn test_object_create_rejects_non_object() {
    let err = eval_runtime_error("Object.create(5);");
    assert!(err.contains("prototype must be object or null"), "{err}");
}

#[test]
fn test_object_keys_in_insertion_order() {
    assert_eq!(
        eval_display("return Object.keys({b: 1, a: 2, c: 3}).join(',');"),
        "b,a,c"
    );
}

#[test]
fn test_proto_key_links_prototype() {
    let source = "\
        let base = {kind: 'base'}; \
        let o = {own: 1, __proto__: base}; \
        return [o.own, o.kind];";
    assert_eq!(eval_display(source), "[1, 'base']");
}

#[test]
fn test_object_literal_methods() {
    let source = "\
        let obj = {value: 10, double() { return this.value * 2; }}; \
        return obj.double();";
    assert_eq!(eval_display(source), "20");
}

#[test]
fn test_array_destructuring() {
    assert_eq!(
        eval_display("let [a, b] = [1, 2]; return a + b;"),
        "3"
    );
    assert_eq!(
        eval_display("function f() { let [a, b] = [5, 6]; return a + b; } return f();"),
        "11"
    );
}

#[test]
fn test_object_destructuring() {
    assert_eq!(
        eval_display("let {x, y} = {x: 3, y: 4}; return x * y;"),
        "12"
    );
    assert_eq!(
        eval_display("function f(p) { let {x, y} = p; return x - y; } return f({x: 9, y: 2});"),
        "7"
    );
}

#[test]
fn test_destructuring_missing_elements_bind_null() {
    assert_eq!(eval_display("let [a, b] = [1]; return [a, b];"), "[1, null]");
    assert_eq!(eval_display("let {q} = {}; return q;"), "null");
}

#[test]
fn test_method_on_null_fails() {
    let err = eval_runtime_error("let o = null; o.m();");
    assert!(err.contains("null"), "{err}");
}

#[test]
fn test_property_read_on_null_fails() {
    let err = eval_runtime_error("let o = null; return o.p;");
    assert!(err.contains("null"), "{err}");
}

#[test]
fn test_undefined_method_fails() {
    let err = eval_runtime_error("let o = {}; o.nope();");
    assert!(err.contains("undefined method 'nope'"), "{err}");
}

#[test]
fn test_writing_through_instance_shadows_prototype() {
    let source = "\
        let proto = {v: 'proto'}; \
        let o = Object.create(proto); \
        o.v = 'own'; \
        return [o.v, proto.v];";
    assert_eq!(eval_display(source), "['own', 'proto']");
}
