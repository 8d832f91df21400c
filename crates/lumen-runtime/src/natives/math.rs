//! `Math`, `Date`, and `performance` natives

use std::time::Instant;

use super::{number_arg, NativeObject};
use crate::span::Span;
use crate::value::{RuntimeError, Value};
use crate::vm::Vm;

/// The `Math` namespace
pub struct MathNative;

impl NativeObject for MathNative {
    fn type_name(&self) -> &str {
        "Math"
    }

    fn get_property(&self, name: &str) -> Option<Value> {
        match name {
            "PI" => Some(Value::Number(std::f64::consts::PI)),
            "E" => Some(Value::Number(std::f64::consts::E)),
            _ => None,
        }
    }

    fn call_method(
        &self,
        _vm: &mut Vm,
        name: &str,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        let result = match name {
            "abs" => number_arg(&args, 0, "Math.abs", span)?.abs(),
            "floor" => number_arg(&args, 0, "Math.floor", span)?.floor(),
            "ceil" => number_arg(&args, 0, "Math.ceil", span)?.ceil(),
            "round" => number_arg(&args, 0, "Math.round", span)?.round(),
            "sqrt" => number_arg(&args, 0, "Math.sqrt", span)?.sqrt(),
            "pow" => {
                let base = number_arg(&args, 0, "Math.pow", span)?;
                let exponent = number_arg(&args, 1, "Math.pow", span)?;
                base.powf(exponent)
            }
            "min" | "max" => {
                let mut acc = if name == "min" {
                    f64::INFINITY
                } else {
                    f64::NEG_INFINITY
                };
                for index in 0..args.len() {
                    let n = number_arg(&args, index, "Math.min/max", span)?;
                    acc = if name == "min" { acc.min(n) } else { acc.max(n) };
                }
                acc
            }
            "random" => rand::random::<f64>(),
            other => {
                return Err(RuntimeError::TypeError {
                    msg: format!("Math has no method '{other}'"),
                    span,
                })
            }
        };
        Ok(Value::Number(result))
    }
}

/// The `Date` namespace (wall-clock time)
pub struct DateNative;

impl NativeObject for DateNative {
    fn type_name(&self) -> &str {
        "Date"
    }

    fn call_method(
        &self,
        _vm: &mut Vm,
        name: &str,
        _args: Vec<Value>,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        match name {
            "now" => Ok(Value::Number(chrono::Utc::now().timestamp_millis() as f64)),
            other => Err(RuntimeError::TypeError {
                msg: format!("Date has no method '{other}'"),
                span,
            }),
        }
    }
}

/// The `performance` namespace (monotonic time since startup)
pub struct Performance {
    origin: Instant,
}

impl Performance {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for Performance {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeObject for Performance {
    fn type_name(&self) -> &str {
        "performance"
    }

    fn call_method(
        &self,
        _vm: &mut Vm,
        name: &str,
        _args: Vec<Value>,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        match name {
            "now" => Ok(Value::Number(
                self.origin.elapsed().as_secs_f64() * 1000.0,
            )),
            other => Err(RuntimeError::TypeError {
                msg: format!("performance has no method '{other}'"),
                span,
            }),
        }
    }
}
