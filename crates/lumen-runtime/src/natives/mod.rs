//! Host interop boundary
//!
//! Everything the host injects into scripts goes through one seam: a value
//! of type [`Value::Native`] holding a [`NativeObject`]. The VM consults the
//! trait's hooks for property reads/writes, calls, and method calls; natives
//! get the VM back as context so they can schedule microtasks, settle
//! promises, and re-enter closures synchronously.

mod console;
#[cfg(feature = "http")]
mod fetch;
mod math;
mod object;
mod promise;
mod timers;

pub use console::Console;
#[cfg(feature = "http")]
pub use fetch::{Fetch, Response};
pub use math::{DateNative, MathNative, Performance};
pub use object::ObjectNative;
pub use promise::PromiseNative;
pub use timers::{ClearTimer, SetTimer, TimerHandle, TimerKind};

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use crate::span::Span;
use crate::value::{RuntimeError, Value};
use crate::vm::Vm;

/// Host-provided object exposed to scripts
pub trait NativeObject {
    /// Name used in error messages and value rendering
    fn type_name(&self) -> &str;

    /// Property read hook; `None` surfaces as `null`
    fn get_property(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Property write hook; `false` means the native rejects writes
    fn set_property(&self, _name: &str, _value: Value) -> bool {
        false
    }

    /// Invocation hook for callable natives
    fn call(&self, _vm: &mut Vm, _args: Vec<Value>, span: Span) -> Result<Value, RuntimeError> {
        Err(RuntimeError::NotCallable {
            msg: format!("native {} is not callable", self.type_name()),
            span,
        })
    }

    /// Method invocation hook
    fn call_method(
        &self,
        _vm: &mut Vm,
        name: &str,
        _args: Vec<Value>,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        Err(RuntimeError::TypeError {
            msg: format!("{} has no method '{name}'", self.type_name()),
            span,
        })
    }
}

/// A bare host function exposed as a callable native
pub struct NativeFunction {
    name: String,
    #[allow(clippy::type_complexity)]
    func: Box<dyn Fn(&mut Vm, Vec<Value>, Span) -> Result<Value, RuntimeError>>,
}

impl NativeFunction {
    /// Wrap a host function into a `Value`
    pub fn value(
        name: impl Into<String>,
        func: impl Fn(&mut Vm, Vec<Value>, Span) -> Result<Value, RuntimeError> + 'static,
    ) -> Value {
        Value::Native(Rc::new(Self {
            name: name.into(),
            func: Box::new(func),
        }))
    }
}

impl NativeObject for NativeFunction {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn call(&self, vm: &mut Vm, args: Vec<Value>, span: Span) -> Result<Value, RuntimeError> {
        (self.func)(vm, args, span)
    }
}

/// Injectable output sink for script-observable writes
pub type OutputWriter = Rc<RefCell<dyn Write>>;

/// Standard output writer
pub fn stdout_writer() -> OutputWriter {
    Rc::new(RefCell::new(std::io::stdout()))
}

/// Standard error writer
pub fn stderr_writer() -> OutputWriter {
    Rc::new(RefCell::new(std::io::stderr()))
}

/// In-memory writer for tests; read the captured bytes through the returned
/// buffer handle
pub fn capture_writer() -> (OutputWriter, Rc<RefCell<Vec<u8>>>) {
    let buffer: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let writer: OutputWriter = buffer.clone();
    (writer, buffer)
}

/// Bind the default native surface required by the runtime: console, Math,
/// performance, Date, Object, Promise, timers, and (with the `http`
/// feature) fetch.
pub fn register_defaults(vm: &mut Vm) {
    vm.bind_native("console", Value::Native(Rc::new(Console)));
    vm.bind_native("Math", Value::Native(Rc::new(MathNative)));
    vm.bind_native("performance", Value::Native(Rc::new(Performance::new())));
    vm.bind_native("Date", Value::Native(Rc::new(DateNative)));
    vm.bind_native("Object", Value::Native(Rc::new(ObjectNative)));
    vm.bind_native("Promise", Value::Native(Rc::new(PromiseNative)));
    vm.bind_native(
        "setTimeout",
        Value::Native(Rc::new(SetTimer::new(TimerKind::Timeout))),
    );
    vm.bind_native(
        "clearTimeout",
        Value::Native(Rc::new(ClearTimer::new(TimerKind::Timeout))),
    );
    vm.bind_native(
        "setInterval",
        Value::Native(Rc::new(SetTimer::new(TimerKind::Interval))),
    );
    vm.bind_native(
        "clearInterval",
        Value::Native(Rc::new(ClearTimer::new(TimerKind::Interval))),
    );
    #[cfg(feature = "http")]
    vm.bind_native("fetch", Value::Native(Rc::new(Fetch)));
}

/// Argument helper: required numeric argument
pub(crate) fn number_arg(
    args: &[Value],
    index: usize,
    who: &str,
    span: Span,
) -> Result<f64, RuntimeError> {
    match args.get(index) {
        Some(Value::Number(n)) => Ok(*n),
        other => Err(RuntimeError::TypeError {
            msg: format!(
                "{who} expects a number for argument {}, got {}",
                index + 1,
                other.map(Value::type_name).unwrap_or("nothing")
            ),
            span,
        }),
    }
}

/// Argument helper: required argument of any type
pub(crate) fn any_arg(
    args: &[Value],
    index: usize,
    who: &str,
    span: Span,
) -> Result<Value, RuntimeError> {
    args.get(index).cloned().ok_or_else(|| RuntimeError::TypeError {
        msg: format!("{who} expects at least {} argument(s)", index + 1),
        span,
    })
}
