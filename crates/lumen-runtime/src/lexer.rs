//! Lexical analysis (tokenization)
//!
//! The lexer converts Lumen source code into a stream of tokens with span
//! information. Template literals are scanned as a unit: the literal chunks
//! are cooked here and the `${…}` expression substrings are handed to the
//! parser raw, which re-lexes them recursively.

use crate::diagnostic::{error_codes, Diagnostic};
use crate::span::Span;
use crate::token::{Token, TokenKind};

/// Lexer state for tokenizing source code
pub struct Lexer {
    /// Characters of source code
    chars: Vec<char>,
    /// Current position in chars
    current: usize,
    /// Current line number (1-indexed)
    line: usize,
    /// Start position of current token
    start: usize,
    /// Start line of current token
    start_line: usize,
    /// Collected diagnostics
    diagnostics: Vec<Diagnostic>,
}

impl Lexer {
    /// Create a new lexer for the given source code
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            chars: source.chars().collect(),
            current: 0,
            line: 1,
            start: 0,
            start_line: 1,
            diagnostics: Vec::new(),
        }
    }

    /// Tokenize the source code, returning tokens and any diagnostics
    pub fn tokenize(&mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        (tokens, std::mem::take(&mut self.diagnostics))
    }

    fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();
        self.start = self.current;
        self.start_line = self.line;

        if self.is_at_end() {
            return self.make_token(TokenKind::Eof);
        }

        let c = self.advance();
        match c {
            '(' => self.make_token(TokenKind::LeftParen),
            ')' => self.make_token(TokenKind::RightParen),
            '{' => self.make_token(TokenKind::LeftBrace),
            '}' => self.make_token(TokenKind::RightBrace),
            '[' => self.make_token(TokenKind::LeftBracket),
            ']' => self.make_token(TokenKind::RightBracket),
            ',' => self.make_token(TokenKind::Comma),
            '.' => self.make_token(TokenKind::Dot),
            ':' => self.make_token(TokenKind::Colon),
            ';' => self.make_token(TokenKind::Semicolon),
            '+' => {
                if self.match_char('+') {
                    self.make_token(TokenKind::PlusPlus)
                } else if self.match_char('=') {
                    self.make_token(TokenKind::PlusEqual)
                } else {
                    self.make_token(TokenKind::Plus)
                }
            }
            '-' => {
                if self.match_char('-') {
                    self.make_token(TokenKind::MinusMinus)
                } else if self.match_char('=') {
                    self.make_token(TokenKind::MinusEqual)
                } else {
                    self.make_token(TokenKind::Minus)
                }
            }
            '*' => {
                if self.match_char('*') {
                    self.make_token(TokenKind::StarStar)
                } else if self.match_char('=') {
                    self.make_token(TokenKind::StarEqual)
                } else {
                    self.make_token(TokenKind::Star)
                }
            }
            '/' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::SlashEqual)
                } else {
                    self.make_token(TokenKind::Slash)
                }
            }
            '%' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::PercentEqual)
                } else {
                    self.make_token(TokenKind::Percent)
                }
            }
            '!' => {
                if self.match_char('=') {
                    if self.match_char('=') {
                        self.make_token(TokenKind::BangEqualEqual)
                    } else {
                        self.make_token(TokenKind::BangEqual)
                    }
                } else {
                    self.make_token(TokenKind::Bang)
                }
            }
            '=' => {
                if self.match_char('=') {
                    if self.match_char('=') {
                        self.make_token(TokenKind::EqualEqualEqual)
                    } else {
                        self.make_token(TokenKind::EqualEqual)
                    }
                } else if self.match_char('>') {
                    self.make_token(TokenKind::Arrow)
                } else {
                    self.make_token(TokenKind::Equal)
                }
            }
            '<' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::LessEqual)
                } else {
                    self.make_token(TokenKind::Less)
                }
            }
            '>' => {
                if self.match_char('=') {
                    self.make_token(TokenKind::GreaterEqual)
                } else {
                    self.make_token(TokenKind::Greater)
                }
            }
            '&' => {
                if self.match_char('&') {
                    self.make_token(TokenKind::AmpAmp)
                } else {
                    self.error_token("unexpected character '&'")
                }
            }
            '|' => {
                if self.match_char('|') {
                    self.make_token(TokenKind::PipePipe)
                } else {
                    self.error_token("unexpected character '|'")
                }
            }
            '"' | '\'' => self.string(c),
            '`' => self.template(),
            c if c.is_ascii_digit() => self.number(),
            c if c.is_alphabetic() || c == '_' || c == '$' => self.identifier(),
            c => self.error_token(&format!("unexpected character '{c}'")),
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                ' ' | '\r' | '\t' => {
                    self.advance();
                }
                '\n' => {
                    self.line += 1;
                    self.advance();
                }
                '/' => match self.peek_next() {
                    Some('/') => {
                        while self.peek() != '\n' && !self.is_at_end() {
                            self.advance();
                        }
                    }
                    Some('*') => {
                        self.advance();
                        self.advance();
                        while !self.is_at_end() {
                            if self.peek() == '*' && self.peek_next() == Some('/') {
                                self.advance();
                                self.advance();
                                break;
                            }
                            if self.peek() == '\n' {
                                self.line += 1;
                            }
                            self.advance();
                        }
                    }
                    _ => return,
                },
                _ => return,
            }
        }
    }

    fn string(&mut self, quote: char) -> Token {
        let mut value = String::new();
        while self.peek() != quote && !self.is_at_end() {
            let c = self.advance();
            if c == '\n' {
                self.line += 1;
                value.push(c);
            } else if c == '\\' {
                match self.escape_char() {
                    Some(escaped) => value.push(escaped),
                    None => return self.error_token("invalid escape sequence"),
                }
            } else {
                value.push(c);
            }
        }
        if self.is_at_end() {
            return self.error_token("unterminated string literal");
        }
        self.advance(); // closing quote
        self.make_token(TokenKind::String(value))
    }

    fn escape_char(&mut self) -> Option<char> {
        let c = self.advance();
        Some(match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            '0' => '\0',
            '\\' => '\\',
            '\'' => '\'',
            '"' => '"',
            '`' => '`',
            '$' => '$',
            _ => return None,
        })
    }

    /// Scan a template literal: cooked quasi chunks plus raw `${…}` bodies.
    fn template(&mut self) -> Token {
        let mut cooked = vec![String::new()];
        let mut exprs = Vec::new();
        loop {
            if self.is_at_end() {
                return self.error_token("unterminated template literal");
            }
            let c = self.advance();
            match c {
                '`' => break,
                '\\' => match self.escape_char() {
                    Some(escaped) => cooked.last_mut().unwrap().push(escaped),
                    None => return self.error_token("invalid escape sequence"),
                },
                '$' if self.peek() == '{' => {
                    self.advance(); // '{'
                    let mut depth = 1usize;
                    let mut raw = String::new();
                    loop {
                        if self.is_at_end() {
                            return self.error_token("unterminated template expression");
                        }
                        let e = self.advance();
                        match e {
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            '\n' => self.line += 1,
                            _ => {}
                        }
                        if depth > 0 {
                            raw.push(e);
                        }
                    }
                    exprs.push(raw);
                    cooked.push(String::new());
                }
                '\n' => {
                    self.line += 1;
                    cooked.last_mut().unwrap().push(c);
                }
                _ => cooked.last_mut().unwrap().push(c),
            }
        }
        self.make_token(TokenKind::Template { cooked, exprs })
    }

    fn number(&mut self) -> Token {
        while self.peek().is_ascii_digit() {
            self.advance();
        }
        if self.peek() == '.' && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }
        let text: String = self.chars[self.start..self.current].iter().collect();
        match text.parse::<f64>() {
            Ok(n) => self.make_token(TokenKind::Number(n)),
            Err(_) => self.error_token(&format!("invalid number literal '{text}'")),
        }
    }

    fn identifier(&mut self) -> Token {
        loop {
            let c = self.peek();
            if c.is_alphanumeric() || c == '_' || c == '$' {
                self.advance();
            } else {
                break;
            }
        }
        let text: String = self.chars[self.start..self.current].iter().collect();
        match TokenKind::keyword(&text) {
            Some(kind) => self.make_token(kind),
            None => self.make_token(TokenKind::Ident(text)),
        }
    }

    fn advance(&mut self) -> char {
        let c = self.chars[self.current];
        self.current += 1;
        c
    }

    fn peek(&self) -> char {
        self.chars.get(self.current).copied().unwrap_or('\0')
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.current + 1).copied()
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == expected {
            self.current += 1;
            true
        } else {
            false
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.chars.len()
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token {
            kind,
            span: Span::new(self.start, self.current, self.start_line),
        }
    }

    fn error_token(&mut self, message: &str) -> Token {
        let span = Span::new(self.start, self.current, self.start_line);
        self.diagnostics
            .push(Diagnostic::error_with_code(error_codes::LEX, message, span));
        // Produce an EOF-shaped token so the parser stops cleanly.
        Token {
            kind: TokenKind::Eof,
            span,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let (tokens, diagnostics) = Lexer::new(source).tokenize();
        assert!(diagnostics.is_empty(), "diagnostics: {diagnostics:?}");
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a += 1 ** 2 === 3;"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::PlusEqual,
                TokenKind::Number(1.0),
                TokenKind::StarStar,
                TokenKind::Number(2.0),
                TokenKind::EqualEqualEqual,
                TokenKind::Number(3.0),
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#"'a\nb'"#),
            vec![TokenKind::String("a\nb".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_keywords_vs_identifiers() {
        assert_eq!(
            kinds("async awaits"),
            vec![
                TokenKind::Async,
                TokenKind::Ident("awaits".into()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_template_literal_split() {
        let toks = kinds("`a${x + 1}b`");
        assert_eq!(
            toks[0],
            TokenKind::Template {
                cooked: vec!["a".into(), "b".into()],
                exprs: vec!["x + 1".into()],
            }
        );
    }

    #[test]
    fn test_comments_and_lines() {
        let (tokens, diagnostics) = Lexer::new("// c\n/* d */ x").tokenize();
        assert!(diagnostics.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::Ident("x".into()));
        assert_eq!(tokens[0].span.line, 2);
    }

    #[test]
    fn test_unterminated_string_reports() {
        let (_, diagnostics) = Lexer::new("'oops").tokenize();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("unterminated"));
    }
}
