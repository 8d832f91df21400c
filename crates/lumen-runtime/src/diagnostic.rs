//! Diagnostic system for compile-time errors
//!
//! All lexer, parser, and compiler errors flow through the unified
//! Diagnostic type, ensuring consistent formatting across the pipeline.

use crate::span::Span;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use termcolor::{Color, ColorSpec, StandardStream, WriteColor};

/// Severity level of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    /// Fatal error that prevents compilation
    Error,
    /// Warning that doesn't prevent compilation
    Warning,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticLevel::Error => write!(f, "error"),
            DiagnosticLevel::Warning => write!(f, "warning"),
        }
    }
}

/// A diagnostic message (error or warning)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Severity level
    pub level: DiagnosticLevel,
    /// Error code (e.g., "LM0001")
    pub code: String,
    /// Main diagnostic message
    pub message: String,
    /// Source span
    pub span: Span,
}

impl Diagnostic {
    /// Create a new error diagnostic
    pub fn error(message: impl Into<String>, span: Span) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            code: error_codes::GENERIC.to_string(),
            message: message.into(),
            span,
        }
    }

    /// Create a new error diagnostic with an explicit code
    pub fn error_with_code(code: &str, message: impl Into<String>, span: Span) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            code: code.to_string(),
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.span.line > 0 {
            write!(
                f,
                "{}[{}]: {} (line {})",
                self.level, self.code, self.message, self.span.line
            )
        } else {
            write!(f, "{}[{}]: {}", self.level, self.code, self.message)
        }
    }
}

/// Stable error codes, grouped by pipeline stage
pub mod error_codes {
    /// Uncategorized error
    pub const GENERIC: &str = "LM0000";
    /// Lexical error (bad character, unterminated string, bad escape)
    pub const LEX: &str = "LM0101";
    /// Parse error (unexpected token, malformed construct)
    pub const PARSE: &str = "LM0201";
    /// Duplicate declaration in the same scope
    pub const DUPLICATE_BINDING: &str = "LM0301";
    /// Too many locals in one function (> 255)
    pub const TOO_MANY_LOCALS: &str = "LM0302";
    /// Too many upvalues in one function (> 255)
    pub const TOO_MANY_UPVALUES: &str = "LM0303";
    /// Constant pool overflow (> 255 entries)
    pub const CONSTANT_OVERFLOW: &str = "LM0304";
    /// Jump offset overflow (> 65535 bytes)
    pub const JUMP_TOO_FAR: &str = "LM0305";
    /// break/continue outside a loop
    pub const LOOP_CONTROL_OUTSIDE_LOOP: &str = "LM0306";
    /// Unsupported operator or AST node
    pub const UNSUPPORTED: &str = "LM0307";
    /// ++/-- on a computed member expression
    pub const COMPUTED_UPDATE: &str = "LM0308";
}

/// Write diagnostics to a stream, colorized when the stream supports it.
pub fn emit_diagnostics(stream: &mut StandardStream, diagnostics: &[Diagnostic]) {
    for diag in diagnostics {
        let color = match diag.level {
            DiagnosticLevel::Error => Color::Red,
            DiagnosticLevel::Warning => Color::Yellow,
        };
        let _ = stream.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true));
        let _ = write!(stream, "{}[{}]", diag.level, diag.code);
        let _ = stream.reset();
        if diag.span.line > 0 {
            let _ = writeln!(stream, ": {} (line {})", diag.message, diag.span.line);
        } else {
            let _ = writeln!(stream, ": {}", diag.message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_display_includes_code_and_line() {
        let diag = Diagnostic::error_with_code(
            error_codes::DUPLICATE_BINDING,
            "variable 'x' already declared in this scope",
            Span::new(4, 5, 3),
        );
        assert_eq!(
            diag.to_string(),
            "error[LM0301]: variable 'x' already declared in this scope (line 3)"
        );
    }

    #[test]
    fn test_serializes_level_lowercase() {
        let diag = Diagnostic::error("boom", Span::dummy());
        let json = serde_json::to_value(&diag).unwrap();
        assert_eq!(json["level"], "error");
    }
}
