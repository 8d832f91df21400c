//! The `Object` native

use std::cell::RefCell;
use std::rc::Rc;

use super::{any_arg, NativeObject};
use crate::span::Span;
use crate::value::{Object, RuntimeError, Value};
use crate::vm::Vm;

/// `Object.create` / `Object.keys` / `Object.getPrototypeOf`
pub struct ObjectNative;

impl NativeObject for ObjectNative {
    fn type_name(&self) -> &str {
        "Object"
    }

    fn call_method(
        &self,
        _vm: &mut Vm,
        name: &str,
        args: Vec<Value>,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        match name {
            "create" => {
                let prototype = match any_arg(&args, 0, "Object.create", span)? {
                    Value::Object(proto) => Some(proto),
                    Value::Null => None,
                    other => {
                        return Err(RuntimeError::TypeError {
                            msg: format!(
                                "prototype must be object or null, got {}",
                                other.type_name()
                            ),
                            span,
                        })
                    }
                };
                Ok(Value::Object(Rc::new(RefCell::new(
                    Object::with_prototype(prototype),
                ))))
            }
            "keys" => match any_arg(&args, 0, "Object.keys", span)? {
                Value::Object(obj) => {
                    let keys = obj
                        .borrow()
                        .keys()
                        .into_iter()
                        .map(Value::string)
                        .collect();
                    Ok(Value::array(keys))
                }
                other => Err(RuntimeError::TypeError {
                    msg: format!("Object.keys expects an object, got {}", other.type_name()),
                    span,
                }),
            },
            "getPrototypeOf" => match any_arg(&args, 0, "Object.getPrototypeOf", span)? {
                Value::Object(obj) => Ok(match obj.borrow().prototype.clone() {
                    Some(proto) => Value::Object(proto),
                    None => Value::Null,
                }),
                other => Err(RuntimeError::TypeError {
                    msg: format!(
                        "Object.getPrototypeOf expects an object, got {}",
                        other.type_name()
                    ),
                    span,
                }),
            },
            other => Err(RuntimeError::TypeError {
                msg: format!("Object has no method '{other}'"),
                span,
            }),
        }
    }
}
