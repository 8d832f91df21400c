//! Generators, promises, async/await, and the event loop

use super::{eval_display, eval_logs, eval_value};
use pretty_assertions::assert_eq;

#[test]
fn test_generators_yield_in_order() {
    let source = "\
        function* g() { yield 1; yield 2; yield 3; } \
        let it = g(); \
        return [it.next().value, it.next().value, it.next().value, it.next().done];";
    assert_eq!(eval_display(source), "[1, 2, 3, true]");
}

#[test]
fn test_exhausted_generator_keeps_reporting_done() {
    let source = "\
        function* g() { yield 1; } \
        let it = g(); \
        it.next(); \
        it.next(); \
        let last = it.next(); \
        return [last.value, last.done];";
    assert_eq!(eval_display(source), "[null, true]");
}

#[test]
fn test_generator_two_way_communication() {
    let source = "\
        function* g(a) { let b = yield a + 1; yield b * 2; } \
        let it = g(10); \
        let first = it.next().value; \
        let second = it.next(4).value; \
        return [first, second, it.next().done];";
    assert_eq!(eval_display(source), "[11, 8, true]");
}

#[test]
fn test_generator_return_abandons_frames() {
    let source = "\
        function* g() { yield 1; yield 2; } \
        let it = g(); \
        it.next(); \
        let r = it.return('stopped'); \
        return [r.value, r.done, it.next().done];";
    assert_eq!(eval_display(source), "['stopped', true, true]");
}

#[test]
fn test_generator_throw_caught_inside() {
    let source = "\
        function* g() { \
            try { yield 1; } catch (e) { yield 'caught ' + e; } \
        } \
        let it = g(); \
        it.next(); \
        return it.throw('bang').value;";
    assert_eq!(eval_display(source), "caught bang");
}

#[test]
fn test_generator_throw_uncaught_reaches_caller() {
    let source = "\
        function* g() { yield 1; } \
        let it = g(); \
        it.next(); \
        try { it.throw('loose'); } catch (e) { return 'outer ' + e; }";
    assert_eq!(eval_display(source), "outer loose");
}

#[test]
fn test_generator_methods_with_receiver() {
    let source = "\
        class Range { \
            constructor(n) { this.n = n; } \
            *each() { let i = 0; while (i < this.n) { yield i; i++; } } \
        } \
        let it = new Range(3).each(); \
        return [it.next().value, it.next().value, it.next().value, it.next().done];";
    assert_eq!(eval_display(source), "[0, 1, 2, true]");
}

#[test]
fn test_promise_then_chain_runs_in_fifo_order() {
    let source = "\
        let out = []; \
        Promise.resolve(1) \
            .then(v => { out.push(v); return v + 1; }) \
            .then(v => { out.push(v); }); \
        out.push('sync'); \
        return out;";
    assert_eq!(eval_display(source), "['sync', 1, 2]");
}

#[test]
fn test_promise_rejection_flows_to_catch() {
    let source = "\
        let out = []; \
        Promise.reject('why').catch(e => out.push('caught ' + e)); \
        return out;";
    assert_eq!(eval_display(source), "['caught why']");
}

#[test]
fn test_promise_settlement_is_one_shot() {
    let source = "\
        let out = []; \
        let p = new Promise((resolve, reject) => { resolve('first'); resolve('second'); reject('third'); }); \
        p.then(v => out.push(v)); \
        p.then(v => out.push(v + ' again')); \
        return out;";
    assert_eq!(eval_display(source), "['first', 'first again']");
}

#[test]
fn test_async_function_returns_promise_immediately() {
    let source = "\
        let out = []; \
        async function f() { out.push('body'); return 1; } \
        let p = f(); \
        out.push('after call'); \
        p.then(v => out.push(v)); \
        return out;";
    // The body is scheduled as a microtask: call returns before it runs.
    assert_eq!(eval_display(source), "['after call', 'body', 1]");
}

#[test]
fn test_await_non_promise_passes_through() {
    let source = "\
        let out = []; \
        async function f() { let v = await 5; out.push(v); } \
        f(); \
        return out;";
    assert_eq!(eval_display(source), "[5]");
}

#[test]
fn test_async_ordering_with_timers() {
    let source = "\
        async function h() { \
            await new Promise(r => setTimeout(r, 10)); \
            console.log('B'); \
        } \
        h(); \
        console.log('A');";
    assert_eq!(eval_logs(source), vec!["A", "B"]);
}

#[test]
fn test_await_chains_between_async_functions() {
    let source = "\
        let out = []; \
        async function inner() { await new Promise(r => setTimeout(r, 5)); return 'inner done'; } \
        async function outer() { let v = await inner(); out.push(v); out.push('outer done'); } \
        outer(); \
        return out;";
    assert_eq!(eval_display(source), "['inner done', 'outer done']");
}

#[test]
fn test_interleaved_async_activations_settle_out_of_order() {
    let source = "\
        let out = []; \
        async function task(name, ms) { \
            await new Promise(r => setTimeout(r, ms)); \
            out.push(name); \
        } \
        task('slow', 30); \
        task('fast', 5); \
        return out;";
    assert_eq!(eval_display(source), "['fast', 'slow']");
}

#[test]
fn test_async_rejection_reaches_catch() {
    let source = "\
        let out = []; \
        async function boom() { throw 'bad'; } \
        boom().catch(e => out.push('caught ' + e)); \
        return out;";
    assert_eq!(eval_display(source), "['caught bad']");
}

#[test]
fn test_try_catch_inside_async_wins_over_rejection() {
    let source = "\
        let out = []; \
        async function safe() { \
            try { throw 'x'; } catch (e) { out.push('inner ' + e); } \
            return 'ok'; \
        } \
        safe().then(v => out.push(v)); \
        return out;";
    assert_eq!(eval_display(source), "['inner x', 'ok']");
}

#[test]
fn test_async_runtime_error_rejects_instead_of_fatal() {
    let source = "\
        let out = []; \
        async function broken() { return 1 / 0; } \
        broken().catch(e => out.push(e)); \
        return out;";
    let value = eval_value(source);
    assert!(value.to_display_string().contains("Division by zero"));
}

#[test]
fn test_promise_adoption_through_then() {
    let source = "\
        let out = []; \
        Promise.resolve('seed') \
            .then(v => Promise.resolve(v + ' grown')) \
            .then(v => out.push(v)); \
        return out;";
    assert_eq!(eval_display(source), "['seed grown']");
}

#[test]
fn test_promise_all_collects_in_input_order() {
    let source = "\
        let out = []; \
        let slow = new Promise(r => setTimeout(r, 20)).then(() => 'slow'); \
        let fast = new Promise(r => setTimeout(r, 2)).then(() => 'fast'); \
        Promise.all([slow, fast, 'ready']).then(vs => out.push(vs.join(','))); \
        return out;";
    assert_eq!(eval_display(source), "['slow,fast,ready']");
}

#[test]
fn test_timer_handles_clear() {
    let source = "\
        let out = []; \
        let h = setTimeout(() => out.push('nope'), 5); \
        h.clear(); \
        let h2 = setTimeout(() => out.push('yes'), 5); \
        clearTimeout(null); \
        out.push('sync'); \
        return out;";
    assert_eq!(eval_display(source), "['sync', 'yes']");
}

#[test]
fn test_interval_ticks_until_cleared() {
    // Ticks already queued when clear() runs are dropped by the guard.
    let source = "\
        let out = []; \
        let n = 0; \
        let h = setInterval(() => { \
            if (n >= 3) { return; } \
            n++; \
            out.push(n); \
            if (n >= 3) { h.clear(); } \
        }, 2); \
        return out;";
    assert_eq!(eval_display(source), "[1, 2, 3]");
}

#[test]
fn test_clear_interval_global() {
    let source = "\
        let n = 0; \
        let h = setInterval(() => { n++; if (n >= 2) { clearInterval(h); } }, 2); \
        return 'armed';";
    assert_eq!(eval_display(source), "armed");
}

#[test]
fn test_microtasks_complete_in_fifo_order() {
    let source = "\
        let out = []; \
        Promise.resolve('t1').then(v => out.push(v)); \
        Promise.resolve('t2').then(v => out.push(v)); \
        Promise.resolve('t3').then(v => out.push(v)); \
        return out;";
    assert_eq!(eval_display(source), "['t1', 't2', 't3']");
}

#[cfg(feature = "http")]
#[test]
fn test_fetch_invalid_url_rejects() {
    let source = "\
        let out = []; \
        fetch('definitely not a url').catch(e => out.push('failed')); \
        return out;";
    assert_eq!(eval_display(source), "['failed']");
}
