//! Expression lowering

use super::{Compiler, CompileResult, FunctionKind, Resolution};
use crate::ast::*;
use crate::bytecode::{update_mode, Opcode};
use crate::diagnostic::error_codes;
use crate::span::Span;
use crate::value::Value;

impl Compiler {
    pub(super) fn expression(&mut self, expr: &Expr) -> CompileResult<()> {
        match expr {
            Expr::NumericLiteral { value, span } => self.emit_constant(Value::Number(*value), *span),
            Expr::StringLiteral { value, span } => {
                self.emit_constant(Value::string(value.clone()), *span)
            }
            Expr::BooleanLiteral { value, span } => {
                self.emit(if *value { Opcode::True } else { Opcode::False }, *span);
                Ok(())
            }
            Expr::NullLiteral { span } => {
                self.emit(Opcode::Null, *span);
                Ok(())
            }
            Expr::Identifier(ident) => self.emit_variable_get(&ident.name, ident.span),
            Expr::ThisExpression { span } => self.this_expression(*span),
            Expr::TemplateLiteral {
                quasis,
                expressions,
                span,
            } => self.template_literal(quasis, expressions, *span),
            Expr::ArrayExpression { elements, span } => self.array_literal(elements, *span),
            Expr::ObjectExpression { properties, span } => self.object_literal(properties, *span),
            Expr::FunctionExpression(func) => {
                let name = func
                    .id
                    .as_ref()
                    .map(|id| id.name.as_str())
                    .unwrap_or("<anonymous>");
                self.compile_function(
                    name,
                    &func.params,
                    |compiler| compiler.block_body(&func.body),
                    FunctionKind::Function,
                    func.is_async,
                    func.generator,
                    func.span,
                )
            }
            Expr::ArrowFunctionExpression(arrow) => self.arrow_function(arrow),
            Expr::UnaryExpression {
                operator,
                argument,
                span,
            } => {
                self.expression(argument)?;
                match operator.as_str() {
                    "-" => self.emit(Opcode::Negate, *span),
                    "!" => self.emit(Opcode::Not, *span),
                    other => {
                        self.error(
                            error_codes::UNSUPPORTED,
                            format!("unsupported unary operator '{other}'"),
                            *span,
                        );
                        return Err(());
                    }
                }
                Ok(())
            }
            Expr::UpdateExpression {
                operator,
                prefix,
                argument,
                span,
            } => self.update_expression(operator, *prefix, argument, *span),
            Expr::BinaryExpression {
                operator,
                left,
                right,
                span,
            } => {
                self.expression(left)?;
                self.expression(right)?;
                self.emit_binary_op(operator, *span)
            }
            Expr::LogicalExpression {
                operator,
                left,
                right,
                span,
            } => self.logical_expression(operator, left, right, *span),
            Expr::AssignmentExpression {
                operator,
                left,
                right,
                span,
            } => self.assignment(operator, left, right, *span),
            Expr::CallExpression {
                callee,
                arguments,
                span,
            } => self.call_expression(callee, arguments, *span),
            Expr::NewExpression {
                callee,
                arguments,
                span,
            } => {
                self.expression(callee)?;
                let argc = self.argument_list(arguments, *span)?;
                self.emit(Opcode::New, *span);
                self.emit_byte(argc);
                Ok(())
            }
            Expr::MemberExpression {
                object,
                property,
                computed,
                span,
            } => self.member_read(object, property, *computed, *span),
            Expr::AwaitExpression { argument, span } => {
                if !self.state().function.is_async {
                    self.error(
                        error_codes::UNSUPPORTED,
                        "'await' outside an async function",
                        *span,
                    );
                    return Err(());
                }
                self.expression(argument)?;
                self.emit(Opcode::Await, *span);
                Ok(())
            }
            Expr::YieldExpression { argument, span } => {
                if !self.state().function.is_generator {
                    self.error(
                        error_codes::UNSUPPORTED,
                        "'yield' outside a generator function",
                        *span,
                    );
                    return Err(());
                }
                match argument {
                    Some(expr) => self.expression(expr)?,
                    None => self.emit(Opcode::Null, *span),
                }
                self.emit(Opcode::Yield, *span);
                Ok(())
            }
        }
    }

    // ── Variables ─────────────────────────────────────────────────────────

    pub(super) fn emit_variable_get(&mut self, name: &str, span: Span) -> CompileResult<()> {
        match self.resolve(name, span)? {
            Resolution::Local(slot) => {
                self.emit(Opcode::GetLocal, span);
                self.emit_byte(slot);
            }
            Resolution::Upvalue(index) => {
                self.emit(Opcode::GetUpvalue, span);
                self.emit_byte(index);
            }
            Resolution::Native(index) => {
                self.emit(Opcode::GetNative, span);
                self.emit_byte(index);
            }
            Resolution::Global(index) => {
                self.emit(Opcode::GetGlobal, span);
                self.emit_byte(index);
            }
        }
        Ok(())
    }

    fn emit_variable_set(&mut self, name: &str, span: Span) -> CompileResult<()> {
        match self.resolve(name, span)? {
            Resolution::Local(slot) => {
                self.emit(Opcode::SetLocal, span);
                self.emit_byte(slot);
            }
            Resolution::Upvalue(index) => {
                self.emit(Opcode::SetUpvalue, span);
                self.emit_byte(index);
            }
            // There is no SET_NATIVE; writes to native names target the
            // global of the same name.
            Resolution::Native(index) | Resolution::Global(index) => {
                self.emit(Opcode::SetGlobal, span);
                self.emit_byte(index);
            }
        }
        Ok(())
    }

    fn this_expression(&mut self, span: Span) -> CompileResult<()> {
        match self.resolve("this", span)? {
            Resolution::Local(slot) => {
                self.emit(Opcode::GetLocal, span);
                self.emit_byte(slot);
                Ok(())
            }
            Resolution::Upvalue(index) => {
                self.emit(Opcode::GetUpvalue, span);
                self.emit_byte(index);
                Ok(())
            }
            _ => {
                self.error(
                    error_codes::UNSUPPORTED,
                    "'this' can only be used inside methods",
                    span,
                );
                Err(())
            }
        }
    }

    // ── Operators ─────────────────────────────────────────────────────────

    fn emit_binary_op(&mut self, operator: &str, span: Span) -> CompileResult<()> {
        let opcode = match operator {
            "+" => Opcode::Add,
            "-" => Opcode::Subtract,
            "*" => Opcode::Multiply,
            "/" => Opcode::Divide,
            "%" => Opcode::Modulo,
            "**" => Opcode::Power,
            "==" | "===" => Opcode::Equal,
            "!=" | "!==" => Opcode::NotEqual,
            "<" => Opcode::Less,
            "<=" => Opcode::LessEqual,
            ">" => Opcode::Greater,
            ">=" => Opcode::GreaterEqual,
            other => {
                self.error(
                    error_codes::UNSUPPORTED,
                    format!("unsupported binary operator '{other}'"),
                    span,
                );
                return Err(());
            }
        };
        self.emit(opcode, span);
        Ok(())
    }

    /// Short-circuit lowering; there are no AND/OR opcodes.
    fn logical_expression(
        &mut self,
        operator: &str,
        left: &Expr,
        right: &Expr,
        span: Span,
    ) -> CompileResult<()> {
        match operator {
            "&&" => {
                self.expression(left)?;
                let end_jump = self.emit_jump(Opcode::JumpIfFalse, span);
                self.emit(Opcode::Pop, span);
                self.expression(right)?;
                self.patch_jump(end_jump, span);
            }
            "||" => {
                self.expression(left)?;
                let else_jump = self.emit_jump(Opcode::JumpIfFalse, span);
                let end_jump = self.emit_jump(Opcode::Jump, span);
                self.patch_jump(else_jump, span);
                self.emit(Opcode::Pop, span);
                self.expression(right)?;
                self.patch_jump(end_jump, span);
            }
            other => {
                self.error(
                    error_codes::UNSUPPORTED,
                    format!("unsupported logical operator '{other}'"),
                    span,
                );
                return Err(());
            }
        }
        Ok(())
    }

    fn assignment(
        &mut self,
        operator: &str,
        left: &Expr,
        right: &Expr,
        span: Span,
    ) -> CompileResult<()> {
        let compound_op = match operator {
            "=" => None,
            "+=" => Some(Opcode::Add),
            "-=" => Some(Opcode::Subtract),
            "*=" => Some(Opcode::Multiply),
            "/=" => Some(Opcode::Divide),
            "%=" => Some(Opcode::Modulo),
            other => {
                self.error(
                    error_codes::UNSUPPORTED,
                    format!("unsupported assignment operator '{other}'"),
                    span,
                );
                return Err(());
            }
        };

        match left {
            Expr::Identifier(ident) => {
                if let Some(op) = compound_op {
                    self.emit_variable_get(&ident.name, ident.span)?;
                    self.expression(right)?;
                    self.emit(op, span);
                } else {
                    self.expression(right)?;
                }
                self.emit_variable_set(&ident.name, ident.span)
            }
            Expr::MemberExpression {
                object,
                property,
                computed: false,
                ..
            } => {
                let Expr::Identifier(name) = property.as_ref() else {
                    self.error(error_codes::UNSUPPORTED, "unsupported member property", span);
                    return Err(());
                };
                let name_index = self.identifier_constant(&name.name, name.span)?;
                self.expression(object)?;
                if let Some(op) = compound_op {
                    self.emit(Opcode::Dup, span);
                    self.emit(Opcode::GetProp, span);
                    self.emit_byte(name_index);
                    self.expression(right)?;
                    self.emit(op, span);
                } else {
                    self.expression(right)?;
                }
                self.emit(Opcode::SetProp, span);
                self.emit_byte(name_index);
                Ok(())
            }
            Expr::MemberExpression {
                object,
                property,
                computed: true,
                ..
            } => {
                if compound_op.is_some() {
                    self.error(
                        error_codes::UNSUPPORTED,
                        "compound assignment to computed members is not supported",
                        span,
                    );
                    return Err(());
                }
                self.expression(object)?;
                self.expression(property)?;
                self.expression(right)?;
                self.emit(Opcode::SetIndex, span);
                Ok(())
            }
            _ => {
                self.error(error_codes::UNSUPPORTED, "invalid assignment target", span);
                Err(())
            }
        }
    }

    fn update_expression(
        &mut self,
        operator: &str,
        prefix: bool,
        argument: &Expr,
        span: Span,
    ) -> CompileResult<()> {
        let increment = operator == "++";
        match argument {
            Expr::Identifier(ident) => {
                if !prefix {
                    // Postfix: old value first, then bump, then drop the new.
                    self.emit_variable_get(&ident.name, ident.span)?;
                }
                self.emit_variable_update(&ident.name, increment, ident.span)?;
                if !prefix {
                    self.emit(Opcode::Pop, span);
                }
                Ok(())
            }
            Expr::MemberExpression {
                object,
                property,
                computed: false,
                ..
            } => {
                let Expr::Identifier(name) = property.as_ref() else {
                    self.error(error_codes::UNSUPPORTED, "unsupported member property", span);
                    return Err(());
                };
                self.expression(object)?;
                let name_index = self.identifier_constant(&name.name, name.span)?;
                let opcode = if increment {
                    Opcode::IncProp
                } else {
                    Opcode::DecProp
                };
                self.emit(opcode, span);
                self.emit_byte(name_index);
                self.emit_byte(if prefix {
                    update_mode::PREFIX
                } else {
                    update_mode::POSTFIX
                });
                Ok(())
            }
            Expr::MemberExpression { computed: true, .. } => {
                self.error(
                    error_codes::COMPUTED_UPDATE,
                    "'++'/'--' on computed members is not supported",
                    span,
                );
                Err(())
            }
            _ => {
                self.error(error_codes::UNSUPPORTED, "invalid update target", span);
                Err(())
            }
        }
    }

    fn emit_variable_update(
        &mut self,
        name: &str,
        increment: bool,
        span: Span,
    ) -> CompileResult<()> {
        match self.resolve(name, span)? {
            Resolution::Local(slot) => {
                self.emit(
                    if increment {
                        Opcode::IncLocal
                    } else {
                        Opcode::DecLocal
                    },
                    span,
                );
                self.emit_byte(slot);
            }
            Resolution::Upvalue(index) => {
                self.emit(
                    if increment {
                        Opcode::IncUpvalue
                    } else {
                        Opcode::DecUpvalue
                    },
                    span,
                );
                self.emit_byte(index);
            }
            Resolution::Native(index) | Resolution::Global(index) => {
                self.emit(
                    if increment {
                        Opcode::IncGlobal
                    } else {
                        Opcode::DecGlobal
                    },
                    span,
                );
                self.emit_byte(index);
            }
        }
        Ok(())
    }

    // ── Calls ─────────────────────────────────────────────────────────────

    fn call_expression(
        &mut self,
        callee: &Expr,
        arguments: &[Expr],
        span: Span,
    ) -> CompileResult<()> {
        if let Expr::MemberExpression {
            object,
            property,
            computed: false,
            ..
        } = callee
        {
            let Expr::Identifier(method) = property.as_ref() else {
                self.error(error_codes::UNSUPPORTED, "unsupported member property", span);
                return Err(());
            };

            // `Object.create(p)` lowers straight to OBJECT_CREATE when
            // `Object` still resolves to the native.
            if method.name == "create" && arguments.len() == 1 {
                if let Expr::Identifier(base) = object.as_ref() {
                    if base.name == "Object"
                        && matches!(self.resolve("Object", span)?, Resolution::Native(_))
                    {
                        self.expression(&arguments[0])?;
                        self.emit(Opcode::ObjectCreate, span);
                        return Ok(());
                    }
                }
            }

            self.expression(object)?;
            let name_index = self.identifier_constant(&method.name, method.span)?;
            let argc = self.argument_list(arguments, span)?;
            self.emit(Opcode::CallMethod, span);
            self.emit_byte(name_index);
            self.emit_byte(argc);
            return Ok(());
        }

        self.expression(callee)?;
        let argc = self.argument_list(arguments, span)?;
        self.emit(Opcode::Call, span);
        self.emit_byte(argc);
        Ok(())
    }

    fn argument_list(&mut self, arguments: &[Expr], span: Span) -> CompileResult<u8> {
        if arguments.len() > u8::MAX as usize {
            self.error(
                error_codes::UNSUPPORTED,
                "too many call arguments (max 255)",
                span,
            );
            return Err(());
        }
        for argument in arguments {
            self.expression(argument)?;
        }
        Ok(arguments.len() as u8)
    }

    fn member_read(
        &mut self,
        object: &Expr,
        property: &Expr,
        computed: bool,
        span: Span,
    ) -> CompileResult<()> {
        self.expression(object)?;
        if computed {
            self.expression(property)?;
            self.emit(Opcode::GetIndex, span);
        } else {
            let Expr::Identifier(name) = property else {
                self.error(error_codes::UNSUPPORTED, "unsupported member property", span);
                return Err(());
            };
            let name_index = self.identifier_constant(&name.name, name.span)?;
            self.emit(Opcode::GetProp, span);
            self.emit_byte(name_index);
        }
        Ok(())
    }

    // ── Literals ──────────────────────────────────────────────────────────

    fn template_literal(
        &mut self,
        quasis: &[TemplateElement],
        expressions: &[Expr],
        span: Span,
    ) -> CompileResult<()> {
        let first = quasis
            .first()
            .map(|q| q.cooked.clone())
            .unwrap_or_default();
        self.emit_constant(Value::string(first), span)?;
        for (index, expr) in expressions.iter().enumerate() {
            self.expression(expr)?;
            self.emit(Opcode::Add, span);
            if let Some(quasi) = quasis.get(index + 1) {
                if !quasi.cooked.is_empty() {
                    self.emit_constant(Value::string(quasi.cooked.clone()), quasi.span)?;
                    self.emit(Opcode::Add, span);
                }
            }
        }
        Ok(())
    }

    fn array_literal(&mut self, elements: &[Expr], span: Span) -> CompileResult<()> {
        if elements.len() > u8::MAX as usize {
            self.error(
                error_codes::UNSUPPORTED,
                "too many array literal elements (max 255)",
                span,
            );
            return Err(());
        }
        for element in elements {
            self.expression(element)?;
        }
        self.emit(Opcode::NewArray, span);
        self.emit_byte(elements.len() as u8);
        Ok(())
    }

    fn object_literal(&mut self, properties: &[ObjectMember], span: Span) -> CompileResult<()> {
        let mut prototype_value: Option<&Expr> = None;
        let mut pairs: usize = 0;

        for member in properties {
            match member {
                ObjectMember::ObjectProperty { key, value, span } => {
                    let name = self.property_key_name(key, *span)?;
                    if name == "__proto__" {
                        prototype_value = Some(value.as_ref());
                        continue;
                    }
                    self.emit_constant(Value::string(name), *span)?;
                    self.expression(value)?;
                    pairs += 1;
                }
                ObjectMember::ObjectMethod {
                    key,
                    params,
                    body,
                    generator,
                    is_async,
                    span,
                } => {
                    self.emit_constant(Value::string(key.name.clone()), *span)?;
                    self.compile_function(
                        &key.name,
                        params,
                        |compiler| compiler.block_body(body),
                        FunctionKind::Method,
                        *is_async,
                        *generator,
                        *span,
                    )?;
                    pairs += 1;
                }
            }
        }

        if pairs > u8::MAX as usize {
            self.error(
                error_codes::UNSUPPORTED,
                "too many object literal properties (max 255)",
                span,
            );
            return Err(());
        }
        self.emit(Opcode::NewObject, span);
        self.emit_byte(pairs as u8);

        if let Some(proto) = prototype_value {
            self.expression(proto)?;
            self.emit(Opcode::SetPrototype, span);
        }
        Ok(())
    }

    fn property_key_name(&mut self, key: &Expr, span: Span) -> CompileResult<String> {
        match key {
            Expr::StringLiteral { value, .. } => Ok(value.clone()),
            Expr::Identifier(ident) => Ok(ident.name.clone()),
            Expr::NumericLiteral { value, .. } => Ok(crate::value::format_number(*value)),
            _ => {
                self.error(
                    error_codes::UNSUPPORTED,
                    "unsupported object property key",
                    span,
                );
                Err(())
            }
        }
    }

    fn arrow_function(&mut self, arrow: &ArrowFunctionExpression) -> CompileResult<()> {
        match arrow.body.as_ref() {
            ArrowBody::Block(block) => self.compile_function(
                "<anonymous>",
                &arrow.params,
                |compiler| compiler.block_body(block),
                FunctionKind::Function,
                arrow.is_async,
                false,
                arrow.span,
            ),
            ArrowBody::Expr(expr) => {
                let span = arrow.span;
                self.compile_function(
                    "<anonymous>",
                    &arrow.params,
                    |compiler| {
                        if compiler.expression(expr).is_ok() {
                            compiler.emit(Opcode::Return, span);
                        }
                    },
                    FunctionKind::Function,
                    arrow.is_async,
                    false,
                    arrow.span,
                )
            }
        }
    }
}
