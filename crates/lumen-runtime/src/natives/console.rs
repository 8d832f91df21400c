//! The `console` native

use std::io::Write;

use super::NativeObject;
use crate::span::Span;
use crate::value::{RuntimeError, Value};
use crate::vm::Vm;

/// `console.log` / `console.error` / `console.warn`
pub struct Console;

impl Console {
    fn render(args: &[Value]) -> String {
        args.iter()
            .map(Value::to_display_string)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl NativeObject for Console {
    fn type_name(&self) -> &str {
        "console"
    }

    fn call_method(
        &self,
        vm: &mut Vm,
        name: &str,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        let line = Self::render(&args);
        let writer = match name {
            "log" => vm.stdout(),
            "error" | "warn" => vm.stderr(),
            other => {
                return Err(RuntimeError::TypeError {
                    msg: format!("console has no method '{other}'"),
                    span,
                })
            }
        };
        let _ = writeln!(writer.borrow_mut(), "{line}");
        Ok(Value::Null)
    }
}
