//! Tokenizer for the restricted sandbox language.
//!
//! Handles Python-style significant indentation (INDENT/DEDENT/NEWLINE),
//! bracket-aware line continuation, and the literal forms the grammar
//! allows (names, numbers, strings, f-strings).

use crate::error::WorkerError;

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Name(String),
    Int(i64),
    Float(f64),
    /// `(text, is_fstring)`; `text` has escapes already resolved and is
    /// not yet split into f-string parts.
    Str(String, bool),
    Newline,
    Indent,
    Dedent,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Colon,
    Comma,
    Dot,
    Assign,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Eof,
}

/// A token paired with its 1-based source line, for error messages.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

/// Tokenizes `source` into a flat token stream terminated by [`Token::Eof`].
///
/// # Errors
///
/// Returns [`WorkerError::SandboxViolation`] on unterminated strings,
/// inconsistent indentation, or unrecognized characters.
pub fn lex(source: &str) -> Result<Vec<Spanned>, WorkerError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    indents: Vec<usize>,
    bracket_depth: i32,
    at_line_start: bool,
    tokens: Vec<Spanned>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            indents: vec![0],
            bracket_depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek();
        if ch == Some('\n') {
            self.line += 1;
        }
        self.pos += 1;
        ch
    }

    fn push(&mut self, token: Token) {
        self.tokens.push(Spanned {
            token,
            line: self.line,
        });
    }

    fn run(mut self) -> Result<Vec<Spanned>, WorkerError> {
        loop {
            if self.at_line_start && self.bracket_depth == 0 {
                if self.handle_line_start()? {
                    continue;
                }
            }

            let Some(ch) = self.peek() else { break };

            if ch == '#' {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.advance();
                }
                continue;
            }

            if ch == '\n' {
                self.advance();
                if self.bracket_depth == 0 {
                    if !matches!(
                        self.tokens.last().map(|s| &s.token),
                        Some(Token::Newline) | None
                    ) {
                        self.push(Token::Newline);
                    }
                    self.at_line_start = true;
                }
                continue;
            }

            if ch == ' ' || ch == '\t' || ch == '\r' {
                self.advance();
                continue;
            }

            if ch == '\\' && self.peek_at(1) == Some('\n') {
                self.advance();
                self.advance();
                continue;
            }

            if ch.is_ascii_digit() {
                self.lex_number();
                continue;
            }

            if ch == '_' || ch.is_alphabetic() {
                self.lex_name_or_string_prefix()?;
                continue;
            }

            if ch == '"' || ch == '\'' {
                self.lex_string(false)?;
                continue;
            }

            self.lex_operator()?;
        }

        if !matches!(self.tokens.last().map(|s| &s.token), Some(Token::Newline)) {
            self.push(Token::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Token::Dedent);
        }
        self.push(Token::Eof);

        Ok(self.tokens)
    }

    /// Consumes indentation at the start of a logical line. Returns
    /// `true` if the line was blank/comment-only and should be skipped
    /// entirely (no INDENT/DEDENT emitted).
    fn handle_line_start(&mut self) -> Result<bool, WorkerError> {
        let mut width = 0usize;
        while let Some(ch) = self.peek() {
            match ch {
                ' ' => {
                    width += 1;
                    self.advance();
                }
                '\t' => {
                    width += 8 - (width % 8);
                    self.advance();
                }
                _ => break,
            }
        }

        match self.peek() {
            None => return Ok(false),
            Some('\n') | Some('#') => {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.advance();
                }
                if self.peek() == Some('\n') {
                    self.advance();
                }
                return Ok(true);
            }
            _ => {}
        }

        self.at_line_start = false;

        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            self.push(Token::Indent);
        } else {
            while width < *self.indents.last().unwrap_or(&0) {
                self.indents.pop();
                self.push(Token::Dedent);
            }
            if *self.indents.last().unwrap_or(&0) != width {
                return Err(WorkerError::sandbox(format!(
                    "inconsistent indentation at line {}",
                    self.line
                )));
            }
        }

        Ok(false)
    }

    fn lex_number(&mut self) {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if is_float {
            self.push(Token::Float(text.parse().unwrap_or(0.0)));
        } else {
            self.push(Token::Int(text.parse().unwrap_or(0)));
        }
    }

    fn lex_name_or_string_prefix(&mut self) -> Result<(), WorkerError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c == '_' || c.is_alphanumeric()) {
            self.advance();
        }
        let text: String = self.chars[start..self.pos].iter().collect();

        if (text == "f" || text == "F") && matches!(self.peek(), Some('"') | Some('\'')) {
            return self.lex_string(true);
        }

        self.push(Token::Name(text));
        Ok(())
    }

    fn lex_string(&mut self, is_fstring: bool) -> Result<(), WorkerError> {
        let quote = self.advance().unwrap_or('"');
        let mut value = String::new();
        loop {
            match self.advance() {
                None => {
                    return Err(WorkerError::sandbox(format!(
                        "unterminated string literal at line {}",
                        self.line
                    )));
                }
                Some(ch) if ch == quote => break,
                Some('\\') => {
                    let escaped = self.advance().unwrap_or('\\');
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '\\' => '\\',
                        '\'' => '\'',
                        '"' => '"',
                        other => other,
                    });
                }
                Some(ch) => value.push(ch),
            }
        }
        self.push(Token::Str(value, is_fstring));
        Ok(())
    }

    fn lex_operator(&mut self) -> Result<(), WorkerError> {
        let ch = self.advance().unwrap_or('\0');
        let next = self.peek();

        let token = match (ch, next) {
            ('(', _) => {
                self.bracket_depth += 1;
                Token::LParen
            }
            (')', _) => {
                self.bracket_depth -= 1;
                Token::RParen
            }
            ('[', _) => {
                self.bracket_depth += 1;
                Token::LBracket
            }
            (']', _) => {
                self.bracket_depth -= 1;
                Token::RBracket
            }
            ('{', _) => {
                self.bracket_depth += 1;
                Token::LBrace
            }
            ('}', _) => {
                self.bracket_depth -= 1;
                Token::RBrace
            }
            (':', _) => Token::Colon,
            (',', _) => Token::Comma,
            ('.', _) => Token::Dot,
            ('+', Some('=')) => {
                self.advance();
                Token::PlusEq
            }
            ('+', _) => Token::Plus,
            ('-', Some('=')) => {
                self.advance();
                Token::MinusEq
            }
            ('-', _) => Token::Minus,
            ('*', Some('*')) => {
                self.advance();
                Token::DoubleStar
            }
            ('*', Some('=')) => {
                self.advance();
                Token::StarEq
            }
            ('*', _) => Token::Star,
            ('/', Some('/')) => {
                self.advance();
                Token::DoubleSlash
            }
            ('/', Some('=')) => {
                self.advance();
                Token::SlashEq
            }
            ('/', _) => Token::Slash,
            ('%', Some('=')) => {
                self.advance();
                Token::PercentEq
            }
            ('%', _) => Token::Percent,
            ('=', Some('=')) => {
                self.advance();
                Token::Eq
            }
            ('=', _) => Token::Assign,
            ('!', Some('=')) => {
                self.advance();
                Token::NotEq
            }
            ('<', Some('=')) => {
                self.advance();
                Token::LtEq
            }
            ('<', _) => Token::Lt,
            ('>', Some('=')) => {
                self.advance();
                Token::GtEq
            }
            ('>', _) => Token::Gt,
            (other, _) => {
                return Err(WorkerError::sandbox(format!(
                    "unrecognized character '{other}' at line {}",
                    self.line
                )));
            }
        };

        self.push(token);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        lex(source)
            .unwrap_or_else(|e| panic!("lex failed: {e}"))
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_lex_simple_assignment() {
        let toks = tokens("x = 1\n");
        assert_eq!(
            toks,
            vec![
                Token::Name("x".to_string()),
                Token::Assign,
                Token::Int(1),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_indent_dedent() {
        let toks = tokens("if True:\n    pass\npass\n");
        assert!(toks.contains(&Token::Indent));
        assert!(toks.contains(&Token::Dedent));
    }

    #[test]
    fn test_lex_fstring_prefix() {
        let toks = tokens("f\"hi {x}\"\n");
        assert_eq!(toks[0], Token::Str("hi {x}".to_string(), true));
    }

    #[test]
    fn test_lex_unterminated_string_is_violation() {
        let result = lex("x = \"abc\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_lex_brackets_suppress_newline() {
        let toks = tokens("x = [\n1,\n2,\n]\n");
        let newline_count = toks.iter().filter(|t| **t == Token::Newline).count();
        assert_eq!(newline_count, 1);
    }
}
