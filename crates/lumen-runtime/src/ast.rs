//! Abstract syntax tree
//!
//! The node set is the ECMAScript subset the compiler understands, using the
//! conventional (Babel-style) node names. Every node derives `Deserialize`
//! with `#[serde(tag = "type")]`, so a JSON tree produced by an external
//! parser deserializes directly; `span` fields default to a dummy span when
//! the JSON does not carry them.

use crate::span::Span;
use serde::Deserialize;

/// A complete script
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Program {
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub span: Span,
}

/// Statement nodes
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum Stmt {
    VariableDeclaration(VariableDeclaration),
    FunctionDeclaration(FunctionDeclaration),
    ClassDeclaration(ClassDeclaration),
    IfStatement(IfStatement),
    WhileStatement(WhileStatement),
    ForStatement(ForStatement),
    BreakStatement {
        #[serde(default)]
        span: Span,
    },
    ContinueStatement {
        #[serde(default)]
        span: Span,
    },
    ReturnStatement {
        argument: Option<Box<Expr>>,
        #[serde(default)]
        span: Span,
    },
    TryStatement(TryStatement),
    ThrowStatement {
        argument: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
    ExpressionStatement {
        expression: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
    BlockStatement(BlockStatement),
}

/// `let`/`var`/`const` declaration with one or more declarators
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VariableDeclaration {
    /// "let", "var", or "const" (all share runtime semantics)
    pub kind: String,
    pub declarations: Vec<VariableDeclarator>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VariableDeclarator {
    pub id: Pattern,
    pub init: Option<Box<Expr>>,
    #[serde(default)]
    pub span: Span,
}

/// Binding target of a declaration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum Pattern {
    Identifier(Identifier),
    /// `[a, b]` — element targets must be plain identifiers
    ArrayPattern {
        elements: Vec<Identifier>,
        #[serde(default)]
        span: Span,
    },
    /// `{a, b}` — shorthand properties only
    ObjectPattern {
        properties: Vec<Identifier>,
        #[serde(default)]
        span: Span,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Identifier {
    pub name: String,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionDeclaration {
    pub id: Identifier,
    pub params: Vec<Identifier>,
    pub body: BlockStatement,
    #[serde(default)]
    pub generator: bool,
    #[serde(default, rename = "async")]
    pub is_async: bool,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FunctionExpression {
    pub id: Option<Identifier>,
    pub params: Vec<Identifier>,
    pub body: BlockStatement,
    #[serde(default)]
    pub generator: bool,
    #[serde(default, rename = "async")]
    pub is_async: bool,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ArrowFunctionExpression {
    pub params: Vec<Identifier>,
    pub body: Box<ArrowBody>,
    #[serde(default, rename = "async")]
    pub is_async: bool,
    #[serde(default)]
    pub span: Span,
}

/// Arrow function body: a block, or a bare expression (implicit return)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ArrowBody {
    Expr(Expr),
    Block(BlockStatement),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClassDeclaration {
    pub id: Identifier,
    pub body: Vec<ClassMethod>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClassMethod {
    /// "constructor" or "method"
    pub kind: String,
    pub key: Identifier,
    pub params: Vec<Identifier>,
    pub body: BlockStatement,
    #[serde(default)]
    pub generator: bool,
    #[serde(default, rename = "async")]
    pub is_async: bool,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IfStatement {
    pub test: Box<Expr>,
    pub consequent: Box<Stmt>,
    pub alternate: Option<Box<Stmt>>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WhileStatement {
    pub test: Box<Expr>,
    pub body: Box<Stmt>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ForStatement {
    pub init: Option<Box<ForInit>>,
    pub test: Option<Box<Expr>>,
    pub update: Option<Box<Expr>>,
    pub body: Box<Stmt>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ForInit {
    VariableDeclaration(VariableDeclaration),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TryStatement {
    pub block: BlockStatement,
    pub handler: Option<CatchClause>,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CatchClause {
    pub param: Option<Identifier>,
    pub body: BlockStatement,
    #[serde(default)]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BlockStatement {
    pub body: Vec<Stmt>,
    #[serde(default)]
    pub span: Span,
}

/// Expression nodes
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum Expr {
    NumericLiteral {
        value: f64,
        #[serde(default)]
        span: Span,
    },
    StringLiteral {
        value: String,
        #[serde(default)]
        span: Span,
    },
    BooleanLiteral {
        value: bool,
        #[serde(default)]
        span: Span,
    },
    NullLiteral {
        #[serde(default)]
        span: Span,
    },
    Identifier(Identifier),
    ThisExpression {
        #[serde(default)]
        span: Span,
    },
    TemplateLiteral {
        quasis: Vec<TemplateElement>,
        expressions: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    ArrayExpression {
        elements: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    ObjectExpression {
        properties: Vec<ObjectMember>,
        #[serde(default)]
        span: Span,
    },
    FunctionExpression(FunctionExpression),
    ArrowFunctionExpression(ArrowFunctionExpression),
    UnaryExpression {
        /// "-" or "!"
        operator: String,
        argument: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
    UpdateExpression {
        /// "++" or "--"
        operator: String,
        prefix: bool,
        argument: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
    BinaryExpression {
        operator: String,
        left: Box<Expr>,
        right: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
    LogicalExpression {
        /// "&&" or "||"
        operator: String,
        left: Box<Expr>,
        right: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
    AssignmentExpression {
        /// "=", "+=", "-=", "*=", "/=", "%="
        operator: String,
        left: Box<Expr>,
        right: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
    CallExpression {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    NewExpression {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
        #[serde(default)]
        span: Span,
    },
    MemberExpression {
        object: Box<Expr>,
        property: Box<Expr>,
        #[serde(default)]
        computed: bool,
        #[serde(default)]
        span: Span,
    },
    AwaitExpression {
        argument: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
    YieldExpression {
        argument: Option<Box<Expr>>,
        #[serde(default)]
        span: Span,
    },
}

/// One literal chunk of a template literal
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TemplateElement {
    pub cooked: String,
    #[serde(default)]
    pub span: Span,
}

/// Object literal member
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ObjectMember {
    ObjectProperty {
        key: Box<Expr>,
        value: Box<Expr>,
        #[serde(default)]
        span: Span,
    },
    ObjectMethod {
        key: Identifier,
        params: Vec<Identifier>,
        body: BlockStatement,
        #[serde(default)]
        generator: bool,
        #[serde(default, rename = "async")]
        is_async: bool,
        #[serde(default)]
        span: Span,
    },
}

impl Expr {
    /// The source span of this expression
    pub fn span(&self) -> Span {
        match self {
            Expr::NumericLiteral { span, .. }
            | Expr::StringLiteral { span, .. }
            | Expr::BooleanLiteral { span, .. }
            | Expr::NullLiteral { span }
            | Expr::ThisExpression { span }
            | Expr::TemplateLiteral { span, .. }
            | Expr::ArrayExpression { span, .. }
            | Expr::ObjectExpression { span, .. }
            | Expr::UnaryExpression { span, .. }
            | Expr::UpdateExpression { span, .. }
            | Expr::BinaryExpression { span, .. }
            | Expr::LogicalExpression { span, .. }
            | Expr::AssignmentExpression { span, .. }
            | Expr::CallExpression { span, .. }
            | Expr::NewExpression { span, .. }
            | Expr::MemberExpression { span, .. }
            | Expr::AwaitExpression { span, .. }
            | Expr::YieldExpression { span, .. } => *span,
            Expr::Identifier(ident) => ident.span,
            Expr::FunctionExpression(func) => func.span,
            Expr::ArrowFunctionExpression(arrow) => arrow.span,
        }
    }
}

impl Stmt {
    /// The source span of this statement
    pub fn span(&self) -> Span {
        match self {
            Stmt::VariableDeclaration(decl) => decl.span,
            Stmt::FunctionDeclaration(func) => func.span,
            Stmt::ClassDeclaration(class) => class.span,
            Stmt::IfStatement(stmt) => stmt.span,
            Stmt::WhileStatement(stmt) => stmt.span,
            Stmt::ForStatement(stmt) => stmt.span,
            Stmt::TryStatement(stmt) => stmt.span,
            Stmt::BlockStatement(block) => block.span,
            Stmt::BreakStatement { span }
            | Stmt::ContinueStatement { span }
            | Stmt::ReturnStatement { span, .. }
            | Stmt::ThrowStatement { span, .. }
            | Stmt::ExpressionStatement { span, .. } => *span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_deserialize_external_ast() {
        let json = r#"{
            "body": [
                {
                    "type": "ExpressionStatement",
                    "expression": {
                        "type": "BinaryExpression",
                        "operator": "+",
                        "left": {"type": "NumericLiteral", "value": 1},
                        "right": {"type": "NumericLiteral", "value": 2}
                    }
                }
            ]
        }"#;
        let program: Program = serde_json::from_str(json).unwrap();
        assert_eq!(program.body.len(), 1);
        match &program.body[0] {
            Stmt::ExpressionStatement { expression, .. } => match expression.as_ref() {
                Expr::BinaryExpression { operator, .. } => assert_eq!(operator, "+"),
                other => panic!("unexpected expression: {other:?}"),
            },
            other => panic!("unexpected statement: {other:?}"),
        }
    }

    #[test]
    fn test_deserialize_async_flag_rename() {
        let json = r#"{
            "type": "FunctionDeclaration",
            "id": {"name": "f"},
            "params": [],
            "body": {"body": []},
            "async": true
        }"#;
        let stmt: Stmt = serde_json::from_str(json).unwrap();
        match stmt {
            Stmt::FunctionDeclaration(func) => {
                assert!(func.is_async);
                assert!(!func.generator);
            }
            other => panic!("unexpected statement: {other:?}"),
        }
    }
}
