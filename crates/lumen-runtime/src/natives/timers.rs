//! Timer natives: setTimeout/clearTimeout, setInterval/clearInterval
//!
//! Arming a timer increments the VM's pending host-op counter so the event
//! loop keeps waiting; a timeout releases its op when it fires or is
//! cleared, an interval holds its op until cleared.

use std::rc::Rc;

use super::{any_arg, NativeObject};
use crate::span::Span;
use crate::value::{RuntimeError, Value};
use crate::vm::Vm;

/// Which timer family a native works on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Timeout,
    Interval,
}

/// `setTimeout(cb, ms)` / `setInterval(cb, ms)`
pub struct SetTimer {
    kind: TimerKind,
}

impl SetTimer {
    pub fn new(kind: TimerKind) -> Self {
        Self { kind }
    }
}

impl NativeObject for SetTimer {
    fn type_name(&self) -> &str {
        match self.kind {
            TimerKind::Timeout => "setTimeout",
            TimerKind::Interval => "setInterval",
        }
    }

    fn call(&self, vm: &mut Vm, args: Vec<Value>, span: Span) -> Result<Value, RuntimeError> {
        let callback = any_arg(&args, 0, self.type_name(), span)?;
        match callback {
            Value::Closure(_) | Value::Native(_) => {}
            other => {
                return Err(RuntimeError::TypeError {
                    msg: format!(
                        "{} expects a callable, got {}",
                        self.type_name(),
                        other.type_name()
                    ),
                    span,
                })
            }
        }
        let ms = match args.get(1) {
            Some(Value::Number(n)) if *n >= 0.0 => *n as u64,
            Some(Value::Number(_)) | None => 0,
            Some(other) => {
                return Err(RuntimeError::TypeError {
                    msg: format!(
                        "{} expects a number of milliseconds, got {}",
                        self.type_name(),
                        other.type_name()
                    ),
                    span,
                })
            }
        };
        let id = match self.kind {
            TimerKind::Timeout => vm.arm_timeout(callback, ms),
            TimerKind::Interval => vm.arm_interval(callback, ms),
        };
        Ok(Value::Native(Rc::new(TimerHandle {
            kind: self.kind,
            id,
        })))
    }
}

/// `clearTimeout(handle)` / `clearInterval(handle)`
pub struct ClearTimer {
    kind: TimerKind,
}

impl ClearTimer {
    pub fn new(kind: TimerKind) -> Self {
        Self { kind }
    }
}

impl NativeObject for ClearTimer {
    fn type_name(&self) -> &str {
        match self.kind {
            TimerKind::Timeout => "clearTimeout",
            TimerKind::Interval => "clearInterval",
        }
    }

    fn call(&self, vm: &mut Vm, args: Vec<Value>, span: Span) -> Result<Value, RuntimeError> {
        match any_arg(&args, 0, self.type_name(), span)? {
            Value::Native(handle) => handle.call_method(vm, "clear", Vec::new(), span),
            Value::Null => Ok(Value::Null),
            other => Err(RuntimeError::TypeError {
                msg: format!(
                    "{} expects a timer handle, got {}",
                    self.type_name(),
                    other.type_name()
                ),
                span,
            }),
        }
    }
}

/// Opaque handle returned by the timer constructors; exposes `clear()`
pub struct TimerHandle {
    kind: TimerKind,
    id: u64,
}

impl NativeObject for TimerHandle {
    fn type_name(&self) -> &str {
        "TimerHandle"
    }

    fn get_property(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::Number(self.id as f64)),
            _ => None,
        }
    }

    fn call_method(
        &self,
        vm: &mut Vm,
        name: &str,
        _args: Vec<Value>,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        match name {
            "clear" => {
                match self.kind {
                    TimerKind::Timeout => vm.clear_timeout(self.id),
                    TimerKind::Interval => vm.clear_interval(self.id),
                }
                Ok(Value::Null)
            }
            other => Err(RuntimeError::TypeError {
                msg: format!("TimerHandle has no method '{other}'"),
                span,
            }),
        }
    }
}
