//! AST to bytecode compiler
//!
//! Single-pass lowering from the AST to stack bytecode.
//! - Expressions leave their result on the stack
//! - Statements leave the stack depth unchanged
//! - Locals are stack slots resolved at compile time; slot 0 of every
//!   function is reserved for the callee (or `this` inside methods)
//! - Globals are resolved by name at runtime
//!
//! Functions nest: each function body is compiled in its own
//! [`FunctionState`], linked to the enclosing one by position in the state
//! stack, which is what upvalue resolution walks.

mod expr;
mod stmt;

use std::rc::Rc;

use crate::ast::Program;
use crate::bytecode::{Chunk, FunctionObject, Opcode, UpvalueDescriptor};
use crate::diagnostic::{error_codes, Diagnostic};
use crate::span::Span;
use crate::value::Value;

/// Names that resolve to GET_NATIVE before falling back to globals
pub(crate) const NATIVE_GLOBALS: &[&str] =
    &["console", "Math", "performance", "Date", "Object", "Promise"];

/// Maximum locals/upvalues addressable by a one-byte operand
const MAX_SLOTS: usize = 256;

/// Internal sentinel: the error was already recorded as a diagnostic.
pub(super) type CompileResult<T> = Result<T, ()>;

/// Local variable information
#[derive(Debug, Clone)]
pub(super) struct Local {
    pub(super) name: String,
    /// Scope depth of this local (for shadowing and block exit)
    pub(super) depth: usize,
    /// Whether a nested function captured this local
    pub(super) captured: bool,
}

/// Loop context for break/continue
#[derive(Debug, Clone)]
pub(super) struct LoopContext {
    /// Bytecode position of the loop header (LOOP target)
    pub(super) start: usize,
    /// Scope depth at the loop header; break/continue pop locals deeper
    /// than this before jumping
    pub(super) scope_depth: usize,
    /// Number of enclosing try blocks at the loop header
    pub(super) try_depth: usize,
    /// Forward jumps to patch at the loop exit
    pub(super) break_jumps: Vec<usize>,
    /// Forward jumps to patch at the update section (for-loops)
    pub(super) continue_jumps: Vec<usize>,
    /// When true, continue loops straight back to `start` instead of
    /// patching forward
    pub(super) continue_to_start: bool,
}

/// What kind of function a state compiles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FunctionKind {
    /// Top-level script
    Script,
    /// Plain function or arrow
    Function,
    /// Class method (slot 0 is `this`)
    Method,
    /// Class constructor (slot 0 is `this`, implicit `return this`)
    Initializer,
}

/// Per-function compiler state
pub(super) struct FunctionState {
    pub(super) function: FunctionObject,
    pub(super) kind: FunctionKind,
    pub(super) locals: Vec<Local>,
    pub(super) scope_depth: usize,
    pub(super) loops: Vec<LoopContext>,
    /// Active SETUP_TRY count; return/break/continue emit POP_CATCH for
    /// each handler they jump out of
    pub(super) try_depth: usize,
}

impl FunctionState {
    fn new(name: &str, arity: usize, kind: FunctionKind) -> Self {
        // Slot 0 holds the callee (enables named recursion) or `this`.
        let slot_zero = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "this".to_string(),
            FunctionKind::Script => String::new(),
            FunctionKind::Function => name.to_string(),
        };
        Self {
            function: FunctionObject::new(name, arity),
            kind,
            locals: vec![Local {
                name: slot_zero,
                depth: 0,
                captured: false,
            }],
            scope_depth: 1,
            loops: Vec::new(),
            try_depth: 0,
        }
    }
}

/// Where an identifier resolved
pub(super) enum Resolution {
    Local(u8),
    Upvalue(u8),
    Native(u8),
    Global(u8),
}

/// Compiler state
pub struct Compiler {
    pub(super) states: Vec<FunctionState>,
    pub(super) diagnostics: Vec<Diagnostic>,
    /// Names declared at script depth, for duplicate detection
    pub(super) declared_globals: std::collections::HashSet<String>,
}

impl Compiler {
    /// Create a new compiler
    pub fn new() -> Self {
        Self {
            states: Vec::new(),
            diagnostics: Vec::new(),
            declared_globals: std::collections::HashSet::new(),
        }
    }

    /// Compile a program into its main function object
    pub fn compile(mut self, program: &Program) -> Result<Rc<FunctionObject>, Vec<Diagnostic>> {
        self.states
            .push(FunctionState::new("<script>", 0, FunctionKind::Script));

        for stmt in &program.body {
            // Keep compiling after an error to collect further diagnostics.
            let _ = self.statement(stmt);
        }

        self.emit_implicit_return(program.span);
        let state = self.states.pop().expect("script state");

        if self.diagnostics.is_empty() {
            Ok(Rc::new(state.function))
        } else {
            Err(self.diagnostics)
        }
    }

    /// Convenience: compile source text in one step
    pub fn compile_source(source: &str) -> Result<Rc<FunctionObject>, Vec<Diagnostic>> {
        let (program, diagnostics) = crate::parser::Parser::parse_source(source);
        if !diagnostics.is_empty() {
            return Err(diagnostics);
        }
        Compiler::new().compile(&program)
    }

    // ── State access ──────────────────────────────────────────────────────

    pub(super) fn state(&mut self) -> &mut FunctionState {
        self.states.last_mut().expect("active function state")
    }

    pub(super) fn chunk(&mut self) -> &mut Chunk {
        &mut self.states.last_mut().expect("active function state").function.chunk
    }

    pub(super) fn at_script_top_level(&self) -> bool {
        let state = self.states.last().expect("active function state");
        state.kind == FunctionKind::Script && state.scope_depth == 1
    }

    // ── Emission helpers ──────────────────────────────────────────────────

    pub(super) fn emit(&mut self, opcode: Opcode, span: Span) {
        self.chunk().emit(opcode, span);
    }

    pub(super) fn emit_byte(&mut self, byte: u8) {
        self.chunk().emit_byte(byte);
    }

    /// Emit a jump with a placeholder offset; returns the operand position
    pub(super) fn emit_jump(&mut self, opcode: Opcode, span: Span) -> usize {
        self.emit(opcode, span);
        let at = self.chunk().len();
        self.chunk().emit_u16(0xFFFF);
        at
    }

    pub(super) fn patch_jump(&mut self, operand_at: usize, span: Span) {
        if !self.chunk().patch_jump(operand_at) {
            self.diagnostics.push(Diagnostic::error_with_code(
                error_codes::JUMP_TOO_FAR,
                "too much code to jump over",
                span,
            ));
        }
    }

    /// Emit a backward LOOP to `start`
    pub(super) fn emit_loop(&mut self, start: usize, span: Span) {
        self.emit(Opcode::Loop, span);
        let distance = self.chunk().len() + 2 - start;
        if distance > u16::MAX as usize {
            self.diagnostics.push(Diagnostic::error_with_code(
                error_codes::JUMP_TOO_FAR,
                "loop body too large",
                span,
            ));
            self.chunk().emit_u16(0);
        } else {
            self.chunk().emit_u16(distance as u16);
        }
    }

    /// Add a constant to the current pool, diagnosing overflow
    pub(super) fn make_constant(&mut self, value: Value, span: Span) -> CompileResult<u8> {
        match self.chunk().add_constant(value) {
            Some(index) => Ok(index),
            None => {
                self.diagnostics.push(Diagnostic::error_with_code(
                    error_codes::CONSTANT_OVERFLOW,
                    "too many constants in one function (max 256)",
                    span,
                ));
                Err(())
            }
        }
    }

    pub(super) fn emit_constant(&mut self, value: Value, span: Span) -> CompileResult<()> {
        let index = self.make_constant(value, span)?;
        self.emit(Opcode::Constant, span);
        self.emit_byte(index);
        Ok(())
    }

    /// Intern an identifier in the constant pool
    pub(super) fn identifier_constant(&mut self, name: &str, span: Span) -> CompileResult<u8> {
        self.make_constant(Value::string(name), span)
    }

    pub(super) fn error(&mut self, code: &str, message: impl Into<String>, span: Span) {
        self.diagnostics
            .push(Diagnostic::error_with_code(code, message, span));
    }

    // ── Scopes and locals ─────────────────────────────────────────────────

    pub(super) fn begin_scope(&mut self) {
        self.state().scope_depth += 1;
    }

    /// Exit a scope: pop every local declared in it, closing captured ones
    pub(super) fn end_scope(&mut self, span: Span) {
        self.state().scope_depth -= 1;
        loop {
            let (should_pop, captured) = {
                let state = self.states.last().expect("active function state");
                match state.locals.last() {
                    Some(local) if local.depth > state.scope_depth => (true, local.captured),
                    _ => (false, false),
                }
            };
            if !should_pop {
                break;
            }
            self.state().locals.pop();
            if captured {
                self.emit(Opcode::CloseUpvalue, span);
            } else {
                self.emit(Opcode::Pop, span);
            }
        }
    }

    /// Declare a local in the current scope. Duplicates at the same depth
    /// are a compile error.
    pub(super) fn declare_local(&mut self, name: &str, span: Span) -> CompileResult<u8> {
        let (depth, duplicate, full) = {
            let state = self.states.last().expect("active function state");
            let depth = state.scope_depth;
            let duplicate = !name.is_empty()
                && state
                    .locals
                    .iter()
                    .rev()
                    .take_while(|local| local.depth >= depth)
                    .any(|local| local.name == name);
            (depth, duplicate, state.locals.len() >= MAX_SLOTS)
        };
        if duplicate {
            self.error(
                error_codes::DUPLICATE_BINDING,
                format!("variable '{name}' already declared in this scope"),
                span,
            );
            return Err(());
        }
        if full {
            self.error(
                error_codes::TOO_MANY_LOCALS,
                "too many local variables in one function (max 256)",
                span,
            );
            return Err(());
        }
        let state = self.state();
        let slot = state.locals.len() as u8;
        state.locals.push(Local {
            name: name.to_string(),
            depth,
            captured: false,
        });
        Ok(slot)
    }

    /// Resolve a name against one state's locals, innermost first
    fn resolve_local(&self, state_index: usize, name: &str) -> Option<u8> {
        if name.is_empty() {
            return None;
        }
        self.states[state_index]
            .locals
            .iter()
            .rposition(|local| local.name == name)
            .map(|slot| slot as u8)
    }

    /// Resolve a name as an upvalue of the given state, chaining through
    /// enclosing functions and marking source locals captured.
    fn resolve_upvalue(&mut self, state_index: usize, name: &str) -> CompileResult<Option<u8>> {
        if state_index == 0 {
            return Ok(None);
        }
        let parent = state_index - 1;
        if let Some(slot) = self.resolve_local(parent, name) {
            self.states[parent].locals[slot as usize].captured = true;
            return self
                .add_upvalue(state_index, true, slot, name)
                .map(Some);
        }
        if let Some(index) = self.resolve_upvalue(parent, name)? {
            return self
                .add_upvalue(state_index, false, index, name)
                .map(Some);
        }
        Ok(None)
    }

    /// Register an upvalue descriptor, reusing an existing identical one so
    /// closures over the same source variable share a handle.
    fn add_upvalue(
        &mut self,
        state_index: usize,
        is_local: bool,
        index: u8,
        name: &str,
    ) -> CompileResult<u8> {
        let existing = self.states[state_index]
            .function
            .upvalues
            .iter()
            .position(|up| up.is_local == is_local && up.index == index);
        if let Some(existing) = existing {
            return Ok(existing as u8);
        }
        if self.states[state_index].function.upvalues.len() >= MAX_SLOTS {
            self.error(
                error_codes::TOO_MANY_UPVALUES,
                format!("too many captured variables in one function ('{name}')"),
                Span::dummy(),
            );
            return Err(());
        }
        let upvalues = &mut self.states[state_index].function.upvalues;
        upvalues.push(UpvalueDescriptor { is_local, index });
        Ok((upvalues.len() - 1) as u8)
    }

    /// Emit DEFINE_GLOBAL for the value on the stack, rejecting duplicate
    /// script-depth declarations.
    pub(super) fn define_global(&mut self, name: &str, span: Span) -> CompileResult<()> {
        if !self.declared_globals.insert(name.to_string()) {
            self.error(
                error_codes::DUPLICATE_BINDING,
                format!("variable '{name}' already declared in this scope"),
                span,
            );
            return Err(());
        }
        let index = self.identifier_constant(name, span)?;
        self.emit(Opcode::DefineGlobal, span);
        self.emit_byte(index);
        Ok(())
    }

    /// Resolve an identifier read/write target: locals, then the upvalue
    /// chain, then the fixed native set, then globals.
    pub(super) fn resolve(&mut self, name: &str, span: Span) -> CompileResult<Resolution> {
        let current = self.states.len() - 1;
        if let Some(slot) = self.resolve_local(current, name) {
            return Ok(Resolution::Local(slot));
        }
        if let Some(index) = self.resolve_upvalue(current, name)? {
            return Ok(Resolution::Upvalue(index));
        }
        if NATIVE_GLOBALS.contains(&name) {
            let index = self.identifier_constant(name, span)?;
            return Ok(Resolution::Native(index));
        }
        let index = self.identifier_constant(name, span)?;
        Ok(Resolution::Global(index))
    }

    // ── Function framing ──────────────────────────────────────────────────

    pub(super) fn begin_function(&mut self, name: &str, arity: usize, kind: FunctionKind) {
        self.states.push(FunctionState::new(name, arity, kind));
    }

    /// Finish the current function: ensure a terminating return, pop the
    /// state, and emit CLOSURE (plus capture metadata) in the enclosing
    /// function.
    pub(super) fn end_function(&mut self, span: Span) -> CompileResult<()> {
        self.emit_implicit_return(span);
        let state = self.states.pop().expect("nested function state");
        let upvalues = state.function.upvalues.clone();
        let index = self.make_constant(Value::Function(Rc::new(state.function)), span)?;
        self.emit(Opcode::Closure, span);
        self.emit_byte(index);
        for descriptor in upvalues {
            self.emit_byte(descriptor.is_local as u8);
            self.emit_byte(descriptor.index);
        }
        Ok(())
    }

    /// Terminate the body: constructors return `this`, everything else
    /// returns null. Emitted unconditionally so that jumps patched to the
    /// end of the body always land on an instruction, even when every
    /// explicit path already returned.
    fn emit_implicit_return(&mut self, span: Span) {
        if self.state().kind == FunctionKind::Initializer {
            self.emit(Opcode::GetLocal, span);
            self.emit_byte(0);
        } else {
            self.emit(Opcode::Null, span);
        }
        self.emit(Opcode::Return, span);
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::disassemble;
    use pretty_assertions::assert_eq;

    fn compile(source: &str) -> Rc<FunctionObject> {
        Compiler::compile_source(source).expect("compiles")
    }

    fn compile_err(source: &str) -> Vec<Diagnostic> {
        Compiler::compile_source(source).expect_err("should fail")
    }

    #[test]
    fn test_script_constant_and_global() {
        let main = compile("let answer = 42;");
        let listing = disassemble(&main.name, &main.chunk);
        assert!(listing.contains("CONSTANT"), "{listing}");
        assert!(listing.contains("DEFINE_GLOBAL"), "{listing}");
        assert!(listing.contains("RETURN"), "{listing}");
    }

    #[test]
    fn test_locals_inside_function_not_globals() {
        let main = compile("function f() { let x = 1; return x; }");
        let func = main
            .chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Value::Function(f) => Some(f.clone()),
                _ => None,
            })
            .expect("nested function");
        let listing = disassemble(&func.name, &func.chunk);
        assert!(listing.contains("GET_LOCAL"), "{listing}");
        assert!(!listing.contains("DEFINE_GLOBAL"), "{listing}");
    }

    #[test]
    fn test_duplicate_local_is_error() {
        let diagnostics = compile_err("function f() { let a = 1; let a = 2; }");
        assert_eq!(diagnostics[0].code, error_codes::DUPLICATE_BINDING);
    }

    #[test]
    fn test_break_outside_loop_is_error() {
        let diagnostics = compile_err("break;");
        assert_eq!(diagnostics[0].code, error_codes::LOOP_CONTROL_OUTSIDE_LOOP);
    }

    #[test]
    fn test_upvalue_descriptors_shared() {
        // Both inner closures capture the same `x`; the outer function must
        // carry exactly one upvalue for it in each closure's list.
        let main = compile(
            "function outer() { let x = 0; \
             let a = () => x; let b = () => x; return [a, b]; }",
        );
        let outer = main
            .chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Value::Function(f) if f.name == "outer" => Some(f.clone()),
                _ => None,
            })
            .expect("outer function");
        let arrows: Vec<_> = outer
            .chunk
            .constants
            .iter()
            .filter_map(|c| match c {
                Value::Function(f) => Some(f.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(arrows.len(), 2);
        for arrow in arrows {
            assert_eq!(arrow.upvalues.len(), 1);
            assert!(arrow.upvalues[0].is_local);
        }
    }

    #[test]
    fn test_computed_update_is_error() {
        let diagnostics = compile_err("let o = [1]; o[0]++;");
        assert_eq!(diagnostics[0].code, error_codes::COMPUTED_UPDATE);
    }

    #[test]
    fn test_await_outside_async_is_error() {
        let diagnostics = compile_err("function f() { await 1; }");
        assert_eq!(diagnostics[0].code, error_codes::UNSUPPORTED);
    }

    #[test]
    fn test_generator_flag_set() {
        let main = compile("function* g() { yield 1; }");
        let func = main
            .chunk
            .constants
            .iter()
            .find_map(|c| match c {
                Value::Function(f) => Some(f.clone()),
                _ => None,
            })
            .expect("generator function");
        assert!(func.is_generator);
        assert!(!func.is_async);
    }
}
