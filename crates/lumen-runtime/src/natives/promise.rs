//! The `Promise` native
//!
//! `new Promise(executor)` is special-cased by the VM's NEW handler, which
//! recognizes this native by name and runs the executor synchronously with
//! host resolve/reject functions. The statics live here.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use super::{any_arg, NativeObject};
use crate::async_runtime::Promise;
use crate::span::Span;
use crate::value::{RuntimeError, Value};
use crate::vm::Vm;

/// `Promise.resolve` / `Promise.reject` / `Promise.all` plus the NEW-special
/// constructor
pub struct PromiseNative;

impl NativeObject for PromiseNative {
    fn type_name(&self) -> &str {
        "Promise"
    }

    fn call(&self, _vm: &mut Vm, _args: Vec<Value>, span: Span) -> Result<Value, RuntimeError> {
        Err(RuntimeError::NotCallable {
            msg: "Promise constructor requires 'new'".to_string(),
            span,
        })
    }

    fn call_method(
        &self,
        vm: &mut Vm,
        name: &str,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        match name {
            "resolve" => {
                let value = args.first().cloned().unwrap_or(Value::Null);
                let promise = Promise::pending();
                vm.resolve_promise(promise.clone(), value);
                Ok(Value::Promise(promise))
            }
            "reject" => {
                let reason = args.first().cloned().unwrap_or(Value::Null);
                let promise = Promise::pending();
                vm.reject_promise(promise.clone(), reason);
                Ok(Value::Promise(promise))
            }
            "all" => promise_all(vm, any_arg(&args, 0, "Promise.all", span)?, span),
            other => Err(RuntimeError::TypeError {
                msg: format!("Promise has no method '{other}'"),
                span,
            }),
        }
    }
}

/// Resolve with an array of results once every input settles; reject with
/// the first rejection.
fn promise_all(vm: &mut Vm, input: Value, span: Span) -> Result<Value, RuntimeError> {
    let items = match input {
        Value::Array(items) => items.borrow().clone(),
        other => {
            return Err(RuntimeError::TypeError {
                msg: format!("Promise.all expects an array, got {}", other.type_name()),
                span,
            })
        }
    };

    let combined = Promise::pending();
    let results = Rc::new(RefCell::new(vec![Value::Null; items.len()]));
    let remaining = Rc::new(Cell::new(items.len()));

    for (index, item) in items.into_iter().enumerate() {
        match item {
            Value::Promise(promise) => {
                let combined = combined.clone();
                let results = results.clone();
                let remaining = remaining.clone();
                vm.promise_then_native(
                    promise,
                    Box::new(move |vm, outcome| match outcome {
                        Ok(value) => {
                            results.borrow_mut()[index] = value;
                            remaining.set(remaining.get() - 1);
                            if remaining.get() == 0 {
                                let values = results.borrow().clone();
                                vm.resolve_promise(combined, Value::array(values));
                            }
                        }
                        Err(reason) => vm.reject_promise(combined, reason),
                    }),
                );
            }
            ready => {
                results.borrow_mut()[index] = ready;
                remaining.set(remaining.get() - 1);
            }
        }
    }

    if remaining.get() == 0 {
        let values = results.borrow().clone();
        vm.resolve_promise(combined.clone(), Value::array(values));
    }
    Ok(Value::Promise(combined))
}
