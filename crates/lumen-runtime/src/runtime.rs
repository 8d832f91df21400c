//! Runtime orchestration
//!
//! Ties the pipeline together: lex → parse → compile → interpret, with the
//! default native surface bound. Embedders that bring their own parser can
//! hand in a `Program` directly or as Babel-style JSON.

use std::rc::Rc;

use crate::ast::Program;
use crate::bytecode::FunctionObject;
use crate::compiler::Compiler;
use crate::diagnostic::{error_codes, Diagnostic};
use crate::natives::{self, OutputWriter};
use crate::span::Span;
use crate::vm::{Interpretation, Vm, VmConfig};

/// The embedding facade: a VM with the default natives bound
pub struct Runtime {
    vm: Vm,
}

impl Runtime {
    /// Create a runtime with default configuration and natives
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    /// Create a runtime with a custom VM configuration
    pub fn with_config(config: VmConfig) -> Self {
        let mut vm = Vm::new(config);
        natives::register_defaults(&mut vm);
        Self { vm }
    }

    /// Access the underlying VM (native bindings, globals)
    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut Vm {
        &mut self.vm
    }

    /// Redirect script-observable output
    pub fn set_stdout(&mut self, writer: OutputWriter) {
        self.vm.set_stdout(writer);
    }

    pub fn set_stderr(&mut self, writer: OutputWriter) {
        self.vm.set_stderr(writer);
    }

    /// Compile source text to its main function without running it
    pub fn compile(source: &str) -> Result<Rc<FunctionObject>, Vec<Diagnostic>> {
        Compiler::compile_source(source)
    }

    /// Run source text through the full pipeline
    pub fn eval_source(&mut self, source: &str) -> Result<Interpretation, Vec<Diagnostic>> {
        let main = Compiler::compile_source(source)?;
        Ok(self.vm.interpret(main))
    }

    /// Run an externally produced AST
    pub fn eval_program(&mut self, program: &Program) -> Result<Interpretation, Vec<Diagnostic>> {
        let main = Compiler::new().compile(program)?;
        Ok(self.vm.interpret(main))
    }

    /// Run a Babel-style JSON AST (the external-parser interop path)
    pub fn eval_ast_json(&mut self, json: &str) -> Result<Interpretation, Vec<Diagnostic>> {
        let program: Program = serde_json::from_str(json).map_err(|err| {
            vec![Diagnostic::error_with_code(
                error_codes::PARSE,
                format!("invalid AST JSON: {err}"),
                Span::dummy(),
            )]
        })?;
        self.eval_program(&program)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::InterpretOutcome;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_eval_source_returns_script_value() {
        let mut runtime = Runtime::new();
        let interpretation = runtime.eval_source("return 1 + 2;").unwrap();
        assert_eq!(interpretation.result, InterpretOutcome::Ok);
        assert_eq!(interpretation.value.to_display_string(), "3");
    }

    #[test]
    fn test_eval_ast_json() {
        let mut runtime = Runtime::new();
        let json = r#"{
            "body": [
                {
                    "type": "ReturnStatement",
                    "argument": {
                        "type": "BinaryExpression",
                        "operator": "*",
                        "left": {"type": "NumericLiteral", "value": 6},
                        "right": {"type": "NumericLiteral", "value": 7}
                    }
                }
            ]
        }"#;
        let interpretation = runtime.eval_ast_json(json).unwrap();
        assert_eq!(interpretation.value.to_display_string(), "42");
    }

    #[test]
    fn test_compile_error_surfaces_diagnostics() {
        let mut runtime = Runtime::new();
        let err = runtime.eval_source("break;").unwrap_err();
        assert!(!err.is_empty());
    }
}
