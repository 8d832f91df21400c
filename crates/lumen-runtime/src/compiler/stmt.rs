//! Statement lowering

use super::{Compiler, CompileResult, FunctionKind, LoopContext};
use crate::ast::*;
use crate::bytecode::Opcode;
use crate::diagnostic::error_codes;
use crate::span::Span;
use crate::value::Value;

impl Compiler {
    pub(super) fn statement(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match stmt {
            Stmt::VariableDeclaration(decl) => self.variable_declaration(decl),
            Stmt::FunctionDeclaration(func) => self.function_declaration(func),
            Stmt::ClassDeclaration(class) => self.class_declaration(class),
            Stmt::IfStatement(stmt) => self.if_statement(stmt),
            Stmt::WhileStatement(stmt) => self.while_statement(stmt),
            Stmt::ForStatement(stmt) => self.for_statement(stmt),
            Stmt::BreakStatement { span } => self.break_statement(*span),
            Stmt::ContinueStatement { span } => self.continue_statement(*span),
            Stmt::ReturnStatement { argument, span } => {
                self.return_statement(argument.as_deref(), *span)
            }
            Stmt::TryStatement(stmt) => self.try_statement(stmt),
            Stmt::ThrowStatement { argument, span } => {
                self.expression(argument)?;
                self.emit(Opcode::Throw, *span);
                Ok(())
            }
            Stmt::ExpressionStatement { expression, span } => {
                self.expression_statement(expression, *span)
            }
            Stmt::BlockStatement(block) => {
                self.begin_scope();
                self.block_body(block);
                self.end_scope(block.span);
                Ok(())
            }
        }
    }

    /// Compile a block's statements, continuing past per-statement errors so
    /// later diagnostics still surface.
    pub(super) fn block_body(&mut self, block: &BlockStatement) {
        for stmt in &block.body {
            let _ = self.statement(stmt);
        }
    }

    // ── Declarations ──────────────────────────────────────────────────────

    fn variable_declaration(&mut self, decl: &VariableDeclaration) -> CompileResult<()> {
        for declarator in &decl.declarations {
            match &declarator.id {
                Pattern::Identifier(ident) => {
                    match &declarator.init {
                        Some(init) => self.expression(init)?,
                        None => self.emit(Opcode::Null, declarator.span),
                    }
                    self.define_variable(&ident.name, ident.span)?;
                }
                Pattern::ArrayPattern { elements, span } => {
                    let Some(init) = &declarator.init else {
                        self.error(
                            error_codes::UNSUPPORTED,
                            "destructuring declaration requires an initializer",
                            *span,
                        );
                        return Err(());
                    };
                    self.destructure(init, *span, elements, true)?;
                }
                Pattern::ObjectPattern { properties, span } => {
                    let Some(init) = &declarator.init else {
                        self.error(
                            error_codes::UNSUPPORTED,
                            "destructuring declaration requires an initializer",
                            *span,
                        );
                        return Err(());
                    };
                    self.destructure(init, *span, properties, false)?;
                }
            }
        }
        Ok(())
    }

    /// Lower `let [a, b] = rhs` / `let {a, b} = rhs`.
    ///
    /// At script depth the source stays on the stack and is re-DUPed per
    /// binding, with one trailing POP. Inside functions the source is bound
    /// to a hidden local first: new locals stack above it, so a bare DUP
    /// chain would bury the source reference. The hidden slot is popped by
    /// the enclosing scope like any other local.
    fn destructure(
        &mut self,
        init: &Expr,
        span: Span,
        targets: &[Identifier],
        by_index: bool,
    ) -> CompileResult<()> {
        self.expression(init)?;
        if self.at_script_top_level() {
            for (position, target) in targets.iter().enumerate() {
                self.emit(Opcode::Dup, span);
                self.emit_element_load(position, target, by_index)?;
                self.define_global(&target.name, target.span)?;
            }
            self.emit(Opcode::Pop, span);
        } else {
            let source_slot = self.declare_local("", span)?;
            for (position, target) in targets.iter().enumerate() {
                self.emit(Opcode::GetLocal, target.span);
                self.emit_byte(source_slot);
                self.emit_element_load(position, target, by_index)?;
                self.declare_local(&target.name, target.span)?;
            }
        }
        Ok(())
    }

    fn emit_element_load(
        &mut self,
        position: usize,
        target: &Identifier,
        by_index: bool,
    ) -> CompileResult<()> {
        if by_index {
            self.emit_constant(Value::Number(position as f64), target.span)?;
            self.emit(Opcode::GetIndex, target.span);
        } else {
            let name_index = self.identifier_constant(&target.name, target.span)?;
            self.emit(Opcode::GetProp, target.span);
            self.emit_byte(name_index);
        }
        Ok(())
    }

    /// Bind the value on top of the stack: DEFINE_GLOBAL at script depth,
    /// a new local slot otherwise.
    pub(super) fn define_variable(&mut self, name: &str, span: Span) -> CompileResult<()> {
        if self.at_script_top_level() {
            self.define_global(name, span)?;
        } else {
            self.declare_local(name, span)?;
        }
        Ok(())
    }

    fn function_declaration(&mut self, func: &FunctionDeclaration) -> CompileResult<()> {
        if !self.at_script_top_level() {
            // Declare before compiling so the body can resolve the name for
            // recursion; the CLOSURE lands in exactly this slot.
            self.declare_local(&func.id.name, func.id.span)?;
            self.compile_function(
                &func.id.name,
                &func.params,
                |compiler| compiler.block_body(&func.body),
                FunctionKind::Function,
                func.is_async,
                func.generator,
                func.span,
            )?;
        } else {
            self.compile_function(
                &func.id.name,
                &func.params,
                |compiler| compiler.block_body(&func.body),
                FunctionKind::Function,
                func.is_async,
                func.generator,
                func.span,
            )?;
            self.define_global(&func.id.name, func.id.span)?;
        }
        Ok(())
    }

    fn class_declaration(&mut self, class: &ClassDeclaration) -> CompileResult<()> {
        let name = &class.id.name;

        // 1. Constructor closure (synthesized when absent) ends up on the
        //    stack as the class value.
        match class.body.iter().find(|method| method.kind == "constructor") {
            Some(ctor) => self.compile_function(
                name,
                &ctor.params,
                |compiler| compiler.block_body(&ctor.body),
                FunctionKind::Initializer,
                false,
                false,
                ctor.span,
            )?,
            None => self.compile_function(
                name,
                &[],
                |_| {},
                FunctionKind::Initializer,
                false,
                false,
                class.span,
            )?,
        }

        // 2. Bind the class name.
        self.define_variable(name, class.id.span)?;

        // 3. Install methods on the class prototype.
        for method in &class.body {
            if method.kind == "constructor" {
                continue;
            }
            self.emit_variable_get(name, method.span)?;
            self.emit(Opcode::GetPrototype, method.span);
            self.compile_function(
                &method.key.name,
                &method.params,
                |compiler| compiler.block_body(&method.body),
                FunctionKind::Method,
                method.is_async,
                method.generator,
                method.span,
            )?;
            let name_index = self.identifier_constant(&method.key.name, method.key.span)?;
            self.emit(Opcode::SetProp, method.key.span);
            self.emit_byte(name_index);
            self.emit(Opcode::Pop, method.span);
        }
        Ok(())
    }

    /// Compile a nested function body and emit its CLOSURE in the current
    /// function.
    pub(super) fn compile_function(
        &mut self,
        name: &str,
        params: &[Identifier],
        body: impl FnOnce(&mut Compiler),
        kind: FunctionKind,
        is_async: bool,
        is_generator: bool,
        span: Span,
    ) -> CompileResult<()> {
        self.begin_function(name, params.len(), kind);
        {
            let state = self.state();
            state.function.is_async = is_async;
            state.function.is_generator = is_generator;
        }
        for param in params {
            let _ = self.declare_local(&param.name, param.span);
        }
        body(self);
        self.end_function(span)
    }

    // ── Control flow ──────────────────────────────────────────────────────

    fn if_statement(&mut self, stmt: &IfStatement) -> CompileResult<()> {
        self.expression(&stmt.test)?;
        let else_jump = self.emit_jump(Opcode::JumpIfFalse, stmt.span);
        self.emit(Opcode::Pop, stmt.span);
        self.statement(&stmt.consequent)?;
        let end_jump = self.emit_jump(Opcode::Jump, stmt.span);
        self.patch_jump(else_jump, stmt.span);
        self.emit(Opcode::Pop, stmt.span);
        if let Some(alternate) = &stmt.alternate {
            self.statement(alternate)?;
        }
        self.patch_jump(end_jump, stmt.span);
        Ok(())
    }

    fn while_statement(&mut self, stmt: &WhileStatement) -> CompileResult<()> {
        let start = self.chunk().len();
        self.expression(&stmt.test)?;
        let exit_jump = self.emit_jump(Opcode::JumpIfFalse, stmt.span);
        self.emit(Opcode::Pop, stmt.span);

        let context = LoopContext {
            start,
            scope_depth: self.state().scope_depth,
            try_depth: self.state().try_depth,
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
            continue_to_start: true,
        };
        self.state().loops.push(context);

        self.statement(&stmt.body)?;

        let context = self.state().loops.pop().expect("loop context");
        self.emit_loop(start, stmt.span);
        self.patch_jump(exit_jump, stmt.span);
        self.emit(Opcode::Pop, stmt.span);
        for jump in context.break_jumps {
            self.patch_jump(jump, stmt.span);
        }
        Ok(())
    }

    fn for_statement(&mut self, stmt: &ForStatement) -> CompileResult<()> {
        self.begin_scope();

        match stmt.init.as_deref() {
            Some(ForInit::VariableDeclaration(decl)) => self.variable_declaration(decl)?,
            Some(ForInit::Expr(expr)) => {
                self.expression(expr)?;
                self.emit(Opcode::Pop, expr.span());
            }
            None => {}
        }

        let start = self.chunk().len();
        let exit_jump = match &stmt.test {
            Some(test) => {
                self.expression(test)?;
                let jump = self.emit_jump(Opcode::JumpIfFalse, stmt.span);
                self.emit(Opcode::Pop, stmt.span);
                Some(jump)
            }
            None => None,
        };

        let context = LoopContext {
            start,
            scope_depth: self.state().scope_depth,
            try_depth: self.state().try_depth,
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
            continue_to_start: stmt.update.is_none(),
        };
        self.state().loops.push(context);

        self.statement(&stmt.body)?;

        let context = self.state().loops.pop().expect("loop context");
        for jump in context.continue_jumps {
            self.patch_jump(jump, stmt.span);
        }
        if let Some(update) = &stmt.update {
            self.expression(update)?;
            self.emit(Opcode::Pop, update.span());
        }
        self.emit_loop(start, stmt.span);
        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump, stmt.span);
            self.emit(Opcode::Pop, stmt.span);
        }
        for jump in context.break_jumps {
            self.patch_jump(jump, stmt.span);
        }

        self.end_scope(stmt.span);
        Ok(())
    }

    fn break_statement(&mut self, span: Span) -> CompileResult<()> {
        if self.state().loops.is_empty() {
            self.error(
                error_codes::LOOP_CONTROL_OUTSIDE_LOOP,
                "'break' outside of a loop",
                span,
            );
            return Err(());
        }
        self.unwind_to_loop(span);
        let jump = self.emit_jump(Opcode::Jump, span);
        self.state()
            .loops
            .last_mut()
            .expect("loop context")
            .break_jumps
            .push(jump);
        Ok(())
    }

    fn continue_statement(&mut self, span: Span) -> CompileResult<()> {
        if self.state().loops.is_empty() {
            self.error(
                error_codes::LOOP_CONTROL_OUTSIDE_LOOP,
                "'continue' outside of a loop",
                span,
            );
            return Err(());
        }
        self.unwind_to_loop(span);
        let (start, to_start) = {
            let context = self.state().loops.last().expect("loop context");
            (context.start, context.continue_to_start)
        };
        if to_start {
            self.emit_loop(start, span);
        } else {
            let jump = self.emit_jump(Opcode::Jump, span);
            self.state()
                .loops
                .last_mut()
                .expect("loop context")
                .continue_jumps
                .push(jump);
        }
        Ok(())
    }

    /// Emit the pops that leave the innermost loop's scope without touching
    /// the compile-time local list (execution continues past the jump).
    fn unwind_to_loop(&mut self, span: Span) {
        let (loop_depth, loop_try_depth) = {
            let context = self.state().loops.last().expect("loop context");
            (context.scope_depth, context.try_depth)
        };
        let catch_pops = self.state().try_depth - loop_try_depth;
        for _ in 0..catch_pops {
            self.emit(Opcode::PopCatch, span);
        }
        let captured_flags: Vec<bool> = {
            let state = self.states.last().expect("active function state");
            state
                .locals
                .iter()
                .rev()
                .take_while(|local| local.depth > loop_depth)
                .map(|local| local.captured)
                .collect()
        };
        for captured in captured_flags {
            if captured {
                self.emit(Opcode::CloseUpvalue, span);
            } else {
                self.emit(Opcode::Pop, span);
            }
        }
    }

    fn return_statement(&mut self, argument: Option<&Expr>, span: Span) -> CompileResult<()> {
        // Leaving try blocks behind: their handlers come off with us.
        let catch_pops = self.state().try_depth;
        for _ in 0..catch_pops {
            self.emit(Opcode::PopCatch, span);
        }
        if self.state().kind == FunctionKind::Initializer {
            if argument.is_some() {
                self.error(
                    error_codes::UNSUPPORTED,
                    "cannot return a value from a constructor",
                    span,
                );
                return Err(());
            }
            self.emit(Opcode::GetLocal, span);
            self.emit_byte(0);
        } else {
            match argument {
                Some(expr) => self.expression(expr)?,
                None => self.emit(Opcode::Null, span),
            }
        }
        self.emit(Opcode::Return, span);
        Ok(())
    }

    fn try_statement(&mut self, stmt: &TryStatement) -> CompileResult<()> {
        let setup = self.emit_jump(Opcode::SetupTry, stmt.span);

        self.state().try_depth += 1;
        self.begin_scope();
        self.block_body(&stmt.block);
        self.end_scope(stmt.block.span);
        self.state().try_depth -= 1;

        self.emit(Opcode::PopCatch, stmt.span);
        let end_jump = self.emit_jump(Opcode::Jump, stmt.span);

        // Catch entry: the unwinder has pushed the thrown value.
        self.patch_jump(setup, stmt.span);
        match &stmt.handler {
            Some(handler) => {
                match &handler.param {
                    Some(param) => {
                        self.begin_scope();
                        self.declare_local(&param.name, param.span)?;
                        self.begin_scope();
                        self.block_body(&handler.body);
                        self.end_scope(handler.body.span);
                        self.end_scope(handler.span);
                    }
                    None => {
                        self.emit(Opcode::Pop, handler.span);
                        self.begin_scope();
                        self.block_body(&handler.body);
                        self.end_scope(handler.body.span);
                    }
                }
            }
            None => self.emit(Opcode::Pop, stmt.span),
        }
        self.patch_jump(end_jump, stmt.span);
        Ok(())
    }

    fn expression_statement(&mut self, expression: &Expr, span: Span) -> CompileResult<()> {
        // Statement-position member updates use the discard mode, keeping
        // only the object on the stack.
        if let Expr::UpdateExpression {
            operator,
            argument,
            ..
        } = expression
        {
            if let Expr::MemberExpression {
                object,
                property,
                computed: false,
                ..
            } = argument.as_ref()
            {
                let Expr::Identifier(name) = property.as_ref() else {
                    self.error(error_codes::UNSUPPORTED, "unsupported member property", span);
                    return Err(());
                };
                self.expression(object)?;
                let name_index = self.identifier_constant(&name.name, name.span)?;
                let opcode = if operator == "++" {
                    Opcode::IncProp
                } else {
                    Opcode::DecProp
                };
                self.emit(opcode, span);
                self.emit_byte(name_index);
                self.emit_byte(crate::bytecode::update_mode::DISCARD);
                self.emit(Opcode::Pop, span);
                return Ok(());
            }
        }
        self.expression(expression)?;
        self.emit(Opcode::Pop, span);
        Ok(())
    }
}
