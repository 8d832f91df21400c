//! The `fetch` native (feature `http`)
//!
//! `fetch(url)` spawns a reqwest request on the host runtime and returns a
//! pending promise; the response arrives as a plain `HostEvent` and is
//! converted into a `Response` native on the VM thread.

use super::{any_arg, NativeObject};
use crate::span::Span;
use crate::value::{RuntimeError, Value};
use crate::vm::Vm;

/// `fetch(url) -> Promise<Response>`
pub struct Fetch;

impl NativeObject for Fetch {
    fn type_name(&self) -> &str {
        "fetch"
    }

    fn call(&self, vm: &mut Vm, args: Vec<Value>, span: Span) -> Result<Value, RuntimeError> {
        let url = match any_arg(&args, 0, "fetch", span)? {
            Value::String(url) => url.as_ref().clone(),
            other => {
                return Err(RuntimeError::TypeError {
                    msg: format!("fetch expects a URL string, got {}", other.type_name()),
                    span,
                })
            }
        };
        Ok(Value::Promise(vm.start_fetch(url)))
    }
}

/// Response native exposed to scripts: status fields as properties, body
/// accessors as promise-returning methods.
pub struct Response {
    pub status: u16,
    pub url: String,
    pub body: String,
}

impl NativeObject for Response {
    fn type_name(&self) -> &str {
        "Response"
    }

    fn get_property(&self, name: &str) -> Option<Value> {
        match name {
            "status" => Some(Value::Number(self.status as f64)),
            "ok" => Some(Value::Bool((200..300).contains(&self.status))),
            "url" => Some(Value::string(self.url.clone())),
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
            "text" => {
                let promise = crate::async_runtime::Promise::pending();
                vm.resolve_promise(promise.clone(), Value::string(self.body.clone()));
                Ok(Value::Promise(promise))
            }
            "json" => {
                let promise = crate::async_runtime::Promise::pending();
                match serde_json::from_str::<serde_json::Value>(&self.body) {
                    Ok(json) => {
                        let value = json_to_value(&json);
                        vm.resolve_promise(promise.clone(), value);
                    }
                    Err(err) => {
                        vm.reject_promise(
                            promise.clone(),
                            Value::string(format!("invalid JSON body: {err}")),
                        );
                    }
                }
                Ok(Value::Promise(promise))
            }
            other => Err(RuntimeError::TypeError {
                msg: format!("Response has no method '{other}'"),
                span,
            }),
        }
    }
}

/// Convert parsed JSON into VM values
pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::string(s.clone()),
        serde_json::Value::Array(items) => {
            Value::array(items.iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(map) => {
            let mut object = crate::value::Object::new();
            for (key, value) in map {
                object.set(key, json_to_value(value));
            }
            Value::object(object)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_conversion() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"a": [1, true, null], "b": "x"}"#).unwrap();
        let value = json_to_value(&json);
        let Value::Object(obj) = value else {
            panic!("expected object");
        };
        let a = obj.borrow().get("a").unwrap();
        let Value::Array(items) = a else {
            panic!("expected array");
        };
        assert_eq!(items.borrow().len(), 3);
    }
}
