//! Syntactic analysis
//!
//! Recursive-descent parser with precedence climbing for expressions.
//! Errors are collected as diagnostics; the parser synchronizes at statement
//! boundaries instead of panicking, so one bad statement does not hide the
//! rest of the file.

use crate::ast::*;
use crate::diagnostic::{error_codes, Diagnostic};
use crate::lexer::Lexer;
use crate::span::Span;
use crate::token::{Token, TokenKind};

/// Parser state
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    diagnostics: Vec<Diagnostic>,
}

/// Internal sentinel: the error was already recorded as a diagnostic.
type ParseResult<T> = Result<T, ()>;

impl Parser {
    /// Create a new parser from a token stream
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            diagnostics: Vec::new(),
        }
    }

    /// Convenience: lex and parse a source string in one step
    pub fn parse_source(source: &str) -> (Program, Vec<Diagnostic>) {
        let (tokens, mut diagnostics) = Lexer::new(source).tokenize();
        let mut parser = Parser::new(tokens);
        let (program, mut parse_diagnostics) = parser.parse();
        diagnostics.append(&mut parse_diagnostics);
        (program, diagnostics)
    }

    /// Parse a complete program, returning the AST and any diagnostics
    pub fn parse(&mut self) -> (Program, Vec<Diagnostic>) {
        let mut body = Vec::new();
        while !self.check(&TokenKind::Eof) {
            match self.statement() {
                Ok(stmt) => body.push(stmt),
                Err(()) => self.synchronize(),
            }
        }
        let span = Span::new(0, self.previous_span().end, 1);
        (Program { body, span }, std::mem::take(&mut self.diagnostics))
    }

    // ── Statements ────────────────────────────────────────────────────────

    fn statement(&mut self) -> ParseResult<Stmt> {
        match self.peek_kind().clone() {
            TokenKind::Let | TokenKind::Var | TokenKind::Const => {
                let decl = self.variable_declaration()?;
                self.consume_semicolon()?;
                Ok(Stmt::VariableDeclaration(decl))
            }
            TokenKind::Function => self.function_declaration(false),
            TokenKind::Async if self.peek_next_is(&TokenKind::Function) => {
                self.advance(); // async
                self.function_declaration(true)
            }
            TokenKind::Class => self.class_declaration(),
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Break => {
                let span = self.advance().span;
                self.consume_semicolon()?;
                Ok(Stmt::BreakStatement { span })
            }
            TokenKind::Continue => {
                let span = self.advance().span;
                self.consume_semicolon()?;
                Ok(Stmt::ContinueStatement { span })
            }
            TokenKind::Return => {
                let span = self.advance().span;
                let argument = if self.check(&TokenKind::Semicolon)
                    || self.check(&TokenKind::RightBrace)
                    || self.check(&TokenKind::Eof)
                {
                    None
                } else {
                    Some(Box::new(self.expression()?))
                };
                self.consume_semicolon()?;
                Ok(Stmt::ReturnStatement { argument, span })
            }
            TokenKind::Try => self.try_statement(),
            TokenKind::Throw => {
                let span = self.advance().span;
                let argument = Box::new(self.expression()?);
                self.consume_semicolon()?;
                Ok(Stmt::ThrowStatement { argument, span })
            }
            TokenKind::LeftBrace => Ok(Stmt::BlockStatement(self.block()?)),
            _ => {
                let expression = Box::new(self.expression()?);
                let span = expression.span();
                self.consume_semicolon()?;
                Ok(Stmt::ExpressionStatement { expression, span })
            }
        }
    }

    fn variable_declaration(&mut self) -> ParseResult<VariableDeclaration> {
        let kind_token = self.advance();
        let span = kind_token.span;
        let kind = match kind_token.kind {
            TokenKind::Let => "let",
            TokenKind::Var => "var",
            TokenKind::Const => "const",
            _ => unreachable!("caller checked declaration keyword"),
        }
        .to_string();

        let mut declarations = Vec::new();
        loop {
            let id = self.binding_pattern()?;
            let init = if self.match_token(&TokenKind::Equal) {
                Some(Box::new(self.assignment_expression()?))
            } else {
                None
            };
            let decl_span = match &id {
                Pattern::Identifier(ident) => ident.span,
                Pattern::ArrayPattern { span, .. } | Pattern::ObjectPattern { span, .. } => *span,
            };
            declarations.push(VariableDeclarator {
                id,
                init,
                span: decl_span,
            });
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        Ok(VariableDeclaration {
            kind,
            declarations,
            span,
        })
    }

    fn binding_pattern(&mut self) -> ParseResult<Pattern> {
        match self.peek_kind().clone() {
            TokenKind::LeftBracket => {
                let span = self.advance().span;
                let mut elements = Vec::new();
                while !self.check(&TokenKind::RightBracket) {
                    elements.push(self.identifier()?);
                    if !self.match_token(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RightBracket, "expected ']' after array pattern")?;
                Ok(Pattern::ArrayPattern { elements, span })
            }
            TokenKind::LeftBrace => {
                let span = self.advance().span;
                let mut properties = Vec::new();
                while !self.check(&TokenKind::RightBrace) {
                    properties.push(self.identifier()?);
                    if !self.match_token(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RightBrace, "expected '}' after object pattern")?;
                Ok(Pattern::ObjectPattern { properties, span })
            }
            _ => Ok(Pattern::Identifier(self.identifier()?)),
        }
    }

    fn function_declaration(&mut self, is_async: bool) -> ParseResult<Stmt> {
        let span = self.expect(&TokenKind::Function, "expected 'function'")?.span;
        let generator = self.match_token(&TokenKind::Star);
        if is_async && generator {
            return self.error(span, "async generators are not supported");
        }
        let id = self.identifier()?;
        let params = self.parameter_list()?;
        let body = self.block()?;
        Ok(Stmt::FunctionDeclaration(FunctionDeclaration {
            id,
            params,
            body,
            generator,
            is_async,
            span,
        }))
    }

    fn class_declaration(&mut self) -> ParseResult<Stmt> {
        let span = self.advance().span; // class
        let id = self.identifier()?;
        self.expect(&TokenKind::LeftBrace, "expected '{' before class body")?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.check(&TokenKind::Eof) {
            body.push(self.class_method()?);
        }
        self.expect(&TokenKind::RightBrace, "expected '}' after class body")?;
        Ok(Stmt::ClassDeclaration(ClassDeclaration { id, body, span }))
    }

    fn class_method(&mut self) -> ParseResult<ClassMethod> {
        let is_async = self.peek_kind() == &TokenKind::Async
            && !self.peek_next_is(&TokenKind::LeftParen)
            && self.match_token(&TokenKind::Async);
        let generator = self.match_token(&TokenKind::Star);
        if is_async && generator {
            let span = self.peek_span();
            return self.error(span, "async generators are not supported");
        }
        let key = self.identifier()?;
        let span = key.span;
        let params = self.parameter_list()?;
        let body = self.block()?;
        let kind = if key.name == "constructor" {
            "constructor"
        } else {
            "method"
        }
        .to_string();
        Ok(ClassMethod {
            kind,
            key,
            params,
            body,
            generator,
            is_async,
            span,
        })
    }

    fn if_statement(&mut self) -> ParseResult<Stmt> {
        let span = self.advance().span; // if
        self.expect(&TokenKind::LeftParen, "expected '(' after 'if'")?;
        let test = Box::new(self.expression()?);
        self.expect(&TokenKind::RightParen, "expected ')' after condition")?;
        let consequent = Box::new(self.statement()?);
        let alternate = if self.match_token(&TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::IfStatement(IfStatement {
            test,
            consequent,
            alternate,
            span,
        }))
    }

    fn while_statement(&mut self) -> ParseResult<Stmt> {
        let span = self.advance().span; // while
        self.expect(&TokenKind::LeftParen, "expected '(' after 'while'")?;
        let test = Box::new(self.expression()?);
        self.expect(&TokenKind::RightParen, "expected ')' after condition")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::WhileStatement(WhileStatement { test, body, span }))
    }

    fn for_statement(&mut self) -> ParseResult<Stmt> {
        let span = self.advance().span; // for
        self.expect(&TokenKind::LeftParen, "expected '(' after 'for'")?;

        let init = if self.match_token(&TokenKind::Semicolon) {
            None
        } else if matches!(
            self.peek_kind(),
            TokenKind::Let | TokenKind::Var | TokenKind::Const
        ) {
            let decl = self.variable_declaration()?;
            self.expect(&TokenKind::Semicolon, "expected ';' after loop initializer")?;
            Some(Box::new(ForInit::VariableDeclaration(decl)))
        } else {
            let expr = self.expression()?;
            self.expect(&TokenKind::Semicolon, "expected ';' after loop initializer")?;
            Some(Box::new(ForInit::Expr(expr)))
        };

        let test = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        self.expect(&TokenKind::Semicolon, "expected ';' after loop condition")?;

        let update = if self.check(&TokenKind::RightParen) {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        self.expect(&TokenKind::RightParen, "expected ')' after loop clauses")?;

        let body = Box::new(self.statement()?);
        Ok(Stmt::ForStatement(ForStatement {
            init,
            test,
            update,
            body,
            span,
        }))
    }

    fn try_statement(&mut self) -> ParseResult<Stmt> {
        let span = self.advance().span; // try
        let block = self.block()?;
        if !self.check(&TokenKind::Catch) {
            return self.error(span, "expected 'catch' after try block");
        }
        self.advance(); // catch
        let param = if self.match_token(&TokenKind::LeftParen) {
            let ident = self.identifier()?;
            self.expect(&TokenKind::RightParen, "expected ')' after catch parameter")?;
            Some(ident)
        } else {
            None
        };
        let catch_span = self.peek_span();
        let body = self.block()?;
        Ok(Stmt::TryStatement(TryStatement {
            block,
            handler: Some(CatchClause {
                param,
                body,
                span: catch_span,
            }),
            span,
        }))
    }

    fn block(&mut self) -> ParseResult<BlockStatement> {
        let span = self
            .expect(&TokenKind::LeftBrace, "expected '{' to open block")?
            .span;
        let mut body = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.check(&TokenKind::Eof) {
            body.push(self.statement()?);
        }
        self.expect(&TokenKind::RightBrace, "expected '}' to close block")?;
        Ok(BlockStatement { body, span })
    }

    fn parameter_list(&mut self) -> ParseResult<Vec<Identifier>> {
        self.expect(&TokenKind::LeftParen, "expected '(' before parameters")?;
        let mut params = Vec::new();
        while !self.check(&TokenKind::RightParen) {
            params.push(self.identifier()?);
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RightParen, "expected ')' after parameters")?;
        Ok(params)
    }

    // ── Expressions ───────────────────────────────────────────────────────

    fn expression(&mut self) -> ParseResult<Expr> {
        self.assignment_expression()
    }

    fn assignment_expression(&mut self) -> ParseResult<Expr> {
        if self.check(&TokenKind::Yield) {
            let span = self.advance().span;
            let argument = if self.expression_can_start() {
                Some(Box::new(self.assignment_expression()?))
            } else {
                None
            };
            return Ok(Expr::YieldExpression { argument, span });
        }

        if let Some(arrow) = self.try_arrow_function()? {
            return Ok(arrow);
        }

        let left = self.logical_or()?;
        let operator = match self.peek_kind() {
            TokenKind::Equal => "=",
            TokenKind::PlusEqual => "+=",
            TokenKind::MinusEqual => "-=",
            TokenKind::StarEqual => "*=",
            TokenKind::SlashEqual => "/=",
            TokenKind::PercentEqual => "%=",
            _ => return Ok(left),
        }
        .to_string();
        let span = self.advance().span;
        if !matches!(
            left,
            Expr::Identifier(_) | Expr::MemberExpression { .. }
        ) {
            return self.error(span, "invalid assignment target");
        }
        let right = Box::new(self.assignment_expression()?);
        Ok(Expr::AssignmentExpression {
            operator,
            left: Box::new(left),
            right,
            span,
        })
    }

    /// Detect and parse `x => …`, `(a, b) => …`, and their `async` forms.
    fn try_arrow_function(&mut self) -> ParseResult<Option<Expr>> {
        let start = self.current;
        let is_async = if self.check(&TokenKind::Async)
            && !self.peek_next_is(&TokenKind::Function)
        {
            self.advance();
            true
        } else {
            false
        };

        let params = match self.peek_kind().clone() {
            TokenKind::Ident(_) if self.peek_next_is(&TokenKind::Arrow) => {
                vec![self.identifier()?]
            }
            TokenKind::LeftParen if self.paren_group_precedes_arrow() => {
                self.parameter_list()?
            }
            _ => {
                self.current = start;
                return Ok(None);
            }
        };
        let span = self
            .expect(&TokenKind::Arrow, "expected '=>' in arrow function")?
            .span;
        let body = if self.check(&TokenKind::LeftBrace) {
            ArrowBody::Block(self.block()?)
        } else {
            ArrowBody::Expr(self.assignment_expression()?)
        };
        Ok(Some(Expr::ArrowFunctionExpression(ArrowFunctionExpression {
            params,
            body: Box::new(body),
            is_async,
            span,
        })))
    }

    /// Lookahead: does the parenthesized group starting at the current token
    /// close with a ')' that is immediately followed by '=>'?
    fn paren_group_precedes_arrow(&self) -> bool {
        let mut depth = 0usize;
        let mut idx = self.current;
        while let Some(token) = self.tokens.get(idx) {
            match token.kind {
                TokenKind::LeftParen => depth += 1,
                TokenKind::RightParen => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(
                            self.tokens.get(idx + 1).map(|t| &t.kind),
                            Some(TokenKind::Arrow)
                        );
                    }
                }
                TokenKind::Eof => return false,
                _ => {}
            }
            idx += 1;
        }
        false
    }

    fn logical_or(&mut self) -> ParseResult<Expr> {
        let mut left = self.logical_and()?;
        while self.check(&TokenKind::PipePipe) {
            let span = self.advance().span;
            let right = self.logical_and()?;
            left = Expr::LogicalExpression {
                operator: "||".to_string(),
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.equality()?;
        while self.check(&TokenKind::AmpAmp) {
            let span = self.advance().span;
            let right = self.equality()?;
            left = Expr::LogicalExpression {
                operator: "&&".to_string(),
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        let mut left = self.comparison()?;
        loop {
            let operator = match self.peek_kind() {
                TokenKind::EqualEqual => "==",
                TokenKind::EqualEqualEqual => "===",
                TokenKind::BangEqual => "!=",
                TokenKind::BangEqualEqual => "!==",
                _ => break,
            }
            .to_string();
            let span = self.advance().span;
            let right = self.comparison()?;
            left = Expr::BinaryExpression {
                operator,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let mut left = self.additive()?;
        loop {
            let operator = match self.peek_kind() {
                TokenKind::Less => "<",
                TokenKind::LessEqual => "<=",
                TokenKind::Greater => ">",
                TokenKind::GreaterEqual => ">=",
                _ => break,
            }
            .to_string();
            let span = self.advance().span;
            let right = self.additive()?;
            left = Expr::BinaryExpression {
                operator,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn additive(&mut self) -> ParseResult<Expr> {
        let mut left = self.multiplicative()?;
        loop {
            let operator = match self.peek_kind() {
                TokenKind::Plus => "+",
                TokenKind::Minus => "-",
                _ => break,
            }
            .to_string();
            let span = self.advance().span;
            let right = self.multiplicative()?;
            left = Expr::BinaryExpression {
                operator,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn multiplicative(&mut self) -> ParseResult<Expr> {
        let mut left = self.exponent()?;
        loop {
            let operator = match self.peek_kind() {
                TokenKind::Star => "*",
                TokenKind::Slash => "/",
                TokenKind::Percent => "%",
                _ => break,
            }
            .to_string();
            let span = self.advance().span;
            let right = self.exponent()?;
            left = Expr::BinaryExpression {
                operator,
                left: Box::new(left),
                right: Box::new(right),
                span,
            };
        }
        Ok(left)
    }

    fn exponent(&mut self) -> ParseResult<Expr> {
        let left = self.unary()?;
        if self.check(&TokenKind::StarStar) {
            let span = self.advance().span;
            // Right-associative
            let right = self.exponent()?;
            return Ok(Expr::BinaryExpression {
                operator: "**".to_string(),
                left: Box::new(left),
                right: Box::new(right),
                span,
            });
        }
        Ok(left)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        match self.peek_kind() {
            TokenKind::Bang | TokenKind::Minus => {
                let token = self.advance();
                let operator = if token.kind == TokenKind::Bang { "!" } else { "-" }.to_string();
                let argument = Box::new(self.unary()?);
                Ok(Expr::UnaryExpression {
                    operator,
                    argument,
                    span: token.span,
                })
            }
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let token = self.advance();
                let operator = if token.kind == TokenKind::PlusPlus {
                    "++"
                } else {
                    "--"
                }
                .to_string();
                let argument = Box::new(self.unary()?);
                Ok(Expr::UpdateExpression {
                    operator,
                    prefix: true,
                    argument,
                    span: token.span,
                })
            }
            TokenKind::Await => {
                let span = self.advance().span;
                let argument = Box::new(self.unary()?);
                Ok(Expr::AwaitExpression { argument, span })
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let expr = self.call_or_member()?;
        match self.peek_kind() {
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let token = self.advance();
                let operator = if token.kind == TokenKind::PlusPlus {
                    "++"
                } else {
                    "--"
                }
                .to_string();
                Ok(Expr::UpdateExpression {
                    operator,
                    prefix: false,
                    argument: Box::new(expr),
                    span: token.span,
                })
            }
            _ => Ok(expr),
        }
    }

    fn call_or_member(&mut self) -> ParseResult<Expr> {
        let mut expr = if self.check(&TokenKind::New) {
            let span = self.advance().span;
            let callee = Box::new(self.member_only()?);
            let arguments = if self.check(&TokenKind::LeftParen) {
                self.argument_list()?
            } else {
                Vec::new()
            };
            Expr::NewExpression {
                callee,
                arguments,
                span,
            }
        } else {
            self.primary()?
        };

        loop {
            match self.peek_kind() {
                TokenKind::LeftParen => {
                    let span = self.peek_span();
                    let arguments = self.argument_list()?;
                    expr = Expr::CallExpression {
                        callee: Box::new(expr),
                        arguments,
                        span,
                    };
                }
                TokenKind::Dot => {
                    self.advance();
                    let property = self.property_name()?;
                    let span = property.span;
                    expr = Expr::MemberExpression {
                        object: Box::new(expr),
                        property: Box::new(Expr::Identifier(property)),
                        computed: false,
                        span,
                    };
                }
                TokenKind::LeftBracket => {
                    let span = self.advance().span;
                    let property = Box::new(self.expression()?);
                    self.expect(&TokenKind::RightBracket, "expected ']' after index")?;
                    expr = Expr::MemberExpression {
                        object: Box::new(expr),
                        property,
                        computed: true,
                        span,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Member chain without call arguments, for `new` callees.
    fn member_only(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary()?;
        while self.check(&TokenKind::Dot) {
            self.advance();
            let property = self.property_name()?;
            let span = property.span;
            expr = Expr::MemberExpression {
                object: Box::new(expr),
                property: Box::new(Expr::Identifier(property)),
                computed: false,
                span,
            };
        }
        Ok(expr)
    }

    fn argument_list(&mut self) -> ParseResult<Vec<Expr>> {
        self.expect(&TokenKind::LeftParen, "expected '('")?;
        let mut arguments = Vec::new();
        while !self.check(&TokenKind::RightParen) {
            arguments.push(self.assignment_expression()?);
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RightParen, "expected ')' after arguments")?;
        Ok(arguments)
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let token = self.advance();
        let span = token.span;
        match token.kind {
            TokenKind::Number(value) => Ok(Expr::NumericLiteral { value, span }),
            TokenKind::String(value) => Ok(Expr::StringLiteral { value, span }),
            TokenKind::True => Ok(Expr::BooleanLiteral { value: true, span }),
            TokenKind::False => Ok(Expr::BooleanLiteral { value: false, span }),
            TokenKind::Null => Ok(Expr::NullLiteral { span }),
            TokenKind::This => Ok(Expr::ThisExpression { span }),
            TokenKind::Ident(name) => Ok(Expr::Identifier(Identifier { name, span })),
            TokenKind::Template { cooked, exprs } => self.template_literal(cooked, exprs, span),
            TokenKind::LeftBracket => {
                let mut elements = Vec::new();
                while !self.check(&TokenKind::RightBracket) {
                    elements.push(self.assignment_expression()?);
                    if !self.match_token(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RightBracket, "expected ']' after array literal")?;
                Ok(Expr::ArrayExpression { elements, span })
            }
            TokenKind::LeftBrace => self.object_literal(span),
            TokenKind::Function => {
                let generator = self.match_token(&TokenKind::Star);
                let id = if matches!(self.peek_kind(), TokenKind::Ident(_)) {
                    Some(self.identifier()?)
                } else {
                    None
                };
                let params = self.parameter_list()?;
                let body = self.block()?;
                Ok(Expr::FunctionExpression(FunctionExpression {
                    id,
                    params,
                    body,
                    generator,
                    is_async: false,
                    span,
                }))
            }
            TokenKind::Async if self.check(&TokenKind::Function) => {
                self.advance(); // function
                let generator = self.match_token(&TokenKind::Star);
                if generator {
                    return self.error(span, "async generators are not supported");
                }
                let id = if matches!(self.peek_kind(), TokenKind::Ident(_)) {
                    Some(self.identifier()?)
                } else {
                    None
                };
                let params = self.parameter_list()?;
                let body = self.block()?;
                Ok(Expr::FunctionExpression(FunctionExpression {
                    id,
                    params,
                    body,
                    generator: false,
                    is_async: true,
                    span,
                }))
            }
            TokenKind::LeftParen => {
                let expr = self.expression()?;
                self.expect(&TokenKind::RightParen, "expected ')' after expression")?;
                Ok(expr)
            }
            other => self.error(span, &format!("unexpected token {other:?} in expression")),
        }
    }

    fn template_literal(
        &mut self,
        cooked: Vec<String>,
        exprs: Vec<String>,
        span: Span,
    ) -> ParseResult<Expr> {
        let quasis = cooked
            .into_iter()
            .map(|cooked| TemplateElement { cooked, span })
            .collect();
        let mut expressions = Vec::new();
        for raw in exprs {
            let (tokens, lex_diagnostics) = Lexer::new(raw.as_str()).tokenize();
            if !lex_diagnostics.is_empty() {
                self.diagnostics.extend(lex_diagnostics);
                return Err(());
            }
            let mut inner = Parser::new(tokens);
            let expr = inner.expression();
            self.diagnostics.append(&mut inner.diagnostics);
            expressions.push(expr?);
        }
        Ok(Expr::TemplateLiteral {
            quasis,
            expressions,
            span,
        })
    }

    fn object_literal(&mut self, span: Span) -> ParseResult<Expr> {
        let mut properties = Vec::new();
        while !self.check(&TokenKind::RightBrace) {
            let is_async = self.peek_kind() == &TokenKind::Async
                && !self.peek_next_is(&TokenKind::Colon)
                && !self.peek_next_is(&TokenKind::Comma)
                && !self.peek_next_is(&TokenKind::RightBrace)
                && !self.peek_next_is(&TokenKind::LeftParen)
                && self.match_token(&TokenKind::Async);
            let generator = self.match_token(&TokenKind::Star);

            let key_token = self.advance();
            let key_span = key_token.span;
            let key_name = match key_token.kind {
                TokenKind::Ident(name) => name,
                TokenKind::String(value) => value,
                TokenKind::Number(value) => crate::value::format_number(value),
                other => {
                    return self
                        .error(key_span, &format!("unexpected token {other:?} as property key"))
                }
            };

            if generator || is_async || self.check(&TokenKind::LeftParen) {
                // Method shorthand
                let key = Identifier {
                    name: key_name,
                    span: key_span,
                };
                let params = self.parameter_list()?;
                let body = self.block()?;
                properties.push(ObjectMember::ObjectMethod {
                    key,
                    params,
                    body,
                    generator,
                    is_async,
                    span: key_span,
                });
            } else if self.match_token(&TokenKind::Colon) {
                let value = Box::new(self.assignment_expression()?);
                properties.push(ObjectMember::ObjectProperty {
                    key: Box::new(Expr::StringLiteral {
                        value: key_name,
                        span: key_span,
                    }),
                    value,
                    span: key_span,
                });
            } else {
                // Shorthand `{a}` binds the property to the variable `a`
                properties.push(ObjectMember::ObjectProperty {
                    key: Box::new(Expr::StringLiteral {
                        value: key_name.clone(),
                        span: key_span,
                    }),
                    value: Box::new(Expr::Identifier(Identifier {
                        name: key_name,
                        span: key_span,
                    })),
                    span: key_span,
                });
            }

            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RightBrace, "expected '}' after object literal")?;
        Ok(Expr::ObjectExpression { properties, span })
    }

    // ── Token helpers ─────────────────────────────────────────────────────

    fn identifier(&mut self) -> ParseResult<Identifier> {
        let token = self.advance();
        match token.kind {
            TokenKind::Ident(name) => Ok(Identifier {
                name,
                span: token.span,
            }),
            other => self.error(token.span, &format!("expected identifier, found {other:?}")),
        }
    }

    /// Property names after '.' admit keywords (`p.catch`, `o.new`).
    fn property_name(&mut self) -> ParseResult<Identifier> {
        let token = self.advance();
        let name = match token.kind {
            TokenKind::Ident(name) => name,
            TokenKind::Catch => "catch".to_string(),
            TokenKind::New => "new".to_string(),
            TokenKind::Return => "return".to_string(),
            TokenKind::Throw => "throw".to_string(),
            other => {
                return self.error(
                    token.span,
                    &format!("expected property name, found {other:?}"),
                )
            }
        };
        Ok(Identifier {
            name,
            span: token.span,
        })
    }

    fn expression_can_start(&self) -> bool {
        !matches!(
            self.peek_kind(),
            TokenKind::Semicolon
                | TokenKind::RightBrace
                | TokenKind::RightParen
                | TokenKind::RightBracket
                | TokenKind::Comma
                | TokenKind::Eof
        )
    }

    fn consume_semicolon(&mut self) -> ParseResult<()> {
        if self.match_token(&TokenKind::Semicolon) {
            return Ok(());
        }
        if self.check(&TokenKind::RightBrace) || self.check(&TokenKind::Eof) {
            return Ok(());
        }
        let span = self.peek_span();
        self.error(span, "expected ';' after statement")
    }

    fn synchronize(&mut self) {
        while !self.check(&TokenKind::Eof) {
            if self.match_token(&TokenKind::Semicolon) {
                return;
            }
            match self.peek_kind() {
                TokenKind::Let
                | TokenKind::Var
                | TokenKind::Const
                | TokenKind::Function
                | TokenKind::Class
                | TokenKind::If
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Return
                | TokenKind::Try
                | TokenKind::Throw
                | TokenKind::RightBrace => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn error<T>(&mut self, span: Span, message: &str) -> ParseResult<T> {
        self.diagnostics
            .push(Diagnostic::error_with_code(error_codes::PARSE, message, span));
        Err(())
    }

    fn expect(&mut self, kind: &TokenKind, message: &str) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let span = self.peek_span();
            self.error(span, message)
        }
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn peek_kind(&self) -> &TokenKind {
        self.tokens
            .get(self.current)
            .map(|t| &t.kind)
            .unwrap_or(&TokenKind::Eof)
    }

    fn peek_next_is(&self, kind: &TokenKind) -> bool {
        self.tokens
            .get(self.current + 1)
            .map(|t| &t.kind == kind)
            .unwrap_or(false)
    }

    fn peek_span(&self) -> Span {
        self.tokens
            .get(self.current)
            .map(|t| t.span)
            .unwrap_or_else(Span::dummy)
    }

    fn previous_span(&self) -> Span {
        if self.current == 0 {
            Span::dummy()
        } else {
            self.tokens
                .get(self.current - 1)
                .map(|t| t.span)
                .unwrap_or_else(Span::dummy)
        }
    }

    fn advance(&mut self) -> Token {
        let token = self
            .tokens
            .get(self.current)
            .cloned()
            .unwrap_or(Token {
                kind: TokenKind::Eof,
                span: Span::dummy(),
            });
        if self.current < self.tokens.len() {
            self.current += 1;
        }
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_ok(source: &str) -> Program {
        let (program, diagnostics) = Parser::parse_source(source);
        assert!(diagnostics.is_empty(), "diagnostics: {diagnostics:?}");
        program
    }

    #[test]
    fn test_precedence() {
        let program = parse_ok("1 + 2 * 3;");
        match &program.body[0] {
            Stmt::ExpressionStatement { expression, .. } => match expression.as_ref() {
                Expr::BinaryExpression { operator, right, .. } => {
                    assert_eq!(operator, "+");
                    assert!(matches!(
                        right.as_ref(),
                        Expr::BinaryExpression { operator, .. } if operator == "*"
                    ));
                }
                other => panic!("unexpected expr: {other:?}"),
            },
            other => panic!("unexpected stmt: {other:?}"),
        }
    }

    #[test]
    fn test_arrow_function_forms() {
        let program = parse_ok("let f = x => x + 1; let g = (a, b) => { return a; };");
        assert_eq!(program.body.len(), 2);
        for stmt in &program.body {
            let Stmt::VariableDeclaration(decl) = stmt else {
                panic!("expected declaration");
            };
            assert!(matches!(
                decl.declarations[0].init.as_deref(),
                Some(Expr::ArrowFunctionExpression(_))
            ));
        }
    }

    #[test]
    fn test_generator_and_async_functions() {
        let program = parse_ok("function* g() { yield 1; } async function h() { await 1; }");
        match (&program.body[0], &program.body[1]) {
            (Stmt::FunctionDeclaration(g), Stmt::FunctionDeclaration(h)) => {
                assert!(g.generator && !g.is_async);
                assert!(h.is_async && !h.generator);
            }
            other => panic!("unexpected statements: {other:?}"),
        }
    }

    #[test]
    fn test_class_with_methods() {
        let program = parse_ok("class P { constructor(n) { this.n = n; } greet() { return 1; } }");
        let Stmt::ClassDeclaration(class) = &program.body[0] else {
            panic!("expected class");
        };
        assert_eq!(class.body.len(), 2);
        assert_eq!(class.body[0].kind, "constructor");
        assert_eq!(class.body[1].kind, "method");
    }

    #[test]
    fn test_destructuring_declarations() {
        let program = parse_ok("let [a, b] = pair; let {x, y} = point;");
        let Stmt::VariableDeclaration(first) = &program.body[0] else {
            panic!("expected declaration");
        };
        assert!(matches!(
            first.declarations[0].id,
            Pattern::ArrayPattern { .. }
        ));
        let Stmt::VariableDeclaration(second) = &program.body[1] else {
            panic!("expected declaration");
        };
        assert!(matches!(
            second.declarations[0].id,
            Pattern::ObjectPattern { .. }
        ));
    }

    #[test]
    fn test_member_and_calls() {
        let program = parse_ok("o.p.q(1)[2];");
        let Stmt::ExpressionStatement { expression, .. } = &program.body[0] else {
            panic!("expected expression statement");
        };
        assert!(matches!(
            expression.as_ref(),
            Expr::MemberExpression { computed: true, .. }
        ));
    }

    #[test]
    fn test_new_expression() {
        let program = parse_ok("let p = new Point(1, 2);");
        let Stmt::VariableDeclaration(decl) = &program.body[0] else {
            panic!("expected declaration");
        };
        assert!(matches!(
            decl.declarations[0].init.as_deref(),
            Some(Expr::NewExpression { .. })
        ));
    }

    #[test]
    fn test_template_literal() {
        let program = parse_ok("let s = `a${x}b`;");
        let Stmt::VariableDeclaration(decl) = &program.body[0] else {
            panic!("expected declaration");
        };
        match decl.declarations[0].init.as_deref() {
            Some(Expr::TemplateLiteral {
                quasis,
                expressions,
                ..
            }) => {
                assert_eq!(quasis.len(), 2);
                assert_eq!(expressions.len(), 1);
            }
            other => panic!("unexpected init: {other:?}"),
        }
    }

    #[test]
    fn test_missing_semicolon_reports() {
        let (_, diagnostics) = Parser::parse_source("let a = 1 let b = 2;");
        assert!(!diagnostics.is_empty());
        assert!(diagnostics[0].message.contains("';'"));
    }

    #[test]
    fn test_try_catch() {
        let program = parse_ok("try { risky(); } catch (e) { console.log(e); }");
        let Stmt::TryStatement(try_stmt) = &program.body[0] else {
            panic!("expected try statement");
        };
        assert!(try_stmt.handler.as_ref().unwrap().param.is_some());
    }
}
