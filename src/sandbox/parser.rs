//! Recursive-descent parser for the restricted sandbox language.
//!
//! The grammar productions correspond one-to-one with the AST node kinds
//! in [`super::ast`]; anything the grammar does not name (`import`,
//! `with`, `class`, `lambda`, `try`/`raise`/`assert`, `global`/`nonlocal`,
//! `async`/`await`, `yield`, pattern `match`) is rejected explicitly as a
//! [`WorkerError::SandboxViolation`] the moment its keyword is seen,
//! rather than silently mis-parsed.

use super::ast::{
    BinOp, BoolOp, CmpOp, Comprehension, Constant, Expr, FStringPart, Keyword, SliceOrIndex, Stmt,
    Target, UnaryOp,
};
use super::lexer::{Spanned, Token, lex};
use crate::error::WorkerError;

const DISALLOWED_KEYWORDS: &[&str] = &[
    "import", "from", "with", "class", "lambda", "global", "nonlocal", "del", "try", "raise",
    "assert", "async", "await", "yield", "match",
];

/// Parses `source` into a [`super::ast::Module`].
///
/// # Errors
///
/// Returns [`WorkerError::SandboxViolation`] on any lexical or syntactic
/// error, or when a disallowed keyword is encountered.
pub fn parse(source: &str) -> Result<Vec<Stmt>, WorkerError> {
    let tokens = lex(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_module()
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map_or(&Token::Eof, |s| &s.token)
    }

    fn line(&self) -> usize {
        self.tokens.get(self.pos).map_or(0, |s| s.line)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), WorkerError> {
        if self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(WorkerError::sandbox(format!(
                "expected {expected:?} at line {}, found {:?}",
                self.line(),
                self.peek()
            )))
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Token::Newline) {
            self.advance();
        }
    }

    fn at_name(&self, name: &str) -> bool {
        matches!(self.peek(), Token::Name(n) if n == name)
    }

    fn reject_if_disallowed_keyword(&self) -> Result<(), WorkerError> {
        if let Token::Name(n) = self.peek() {
            if DISALLOWED_KEYWORDS.contains(&n.as_str()) {
                return Err(WorkerError::sandbox(format!(
                    "node type not allowed: {n} (line {})",
                    self.line()
                )));
            }
        }
        Ok(())
    }

    // ---- statements --------------------------------------------------

    fn parse_module(&mut self) -> Result<Vec<Stmt>, WorkerError> {
        let mut stmts = Vec::new();
        self.skip_newlines();
        while !matches!(self.peek(), Token::Eof) {
            stmts.push(self.parse_statement()?);
            self.skip_newlines();
        }
        Ok(stmts)
    }

    /// Parses an indented `:`-block: `:` NEWLINE INDENT stmt+ DEDENT.
    fn parse_block(&mut self) -> Result<Vec<Stmt>, WorkerError> {
        self.expect(&Token::Colon)?;
        self.expect(&Token::Newline)?;
        self.skip_newlines();
        self.expect(&Token::Indent)?;
        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            if matches!(self.peek(), Token::Dedent) {
                self.advance();
                break;
            }
            if matches!(self.peek(), Token::Eof) {
                break;
            }
            stmts.push(self.parse_statement()?);
        }
        Ok(stmts)
    }

    fn parse_statement(&mut self) -> Result<Stmt, WorkerError> {
        self.reject_if_disallowed_keyword()?;

        if self.at_name("if") {
            return self.parse_if();
        }
        if self.at_name("for") {
            return self.parse_for();
        }
        if self.at_name("while") {
            return self.parse_while();
        }
        if self.at_name("def") {
            return self.parse_function_def();
        }
        if self.at_name("return") {
            self.advance();
            if matches!(self.peek(), Token::Newline) {
                self.advance();
                return Ok(Stmt::Return(None));
            }
            let value = self.parse_expr()?;
            self.expect(&Token::Newline)?;
            return Ok(Stmt::Return(Some(value)));
        }
        if self.at_name("break") {
            self.advance();
            self.expect(&Token::Newline)?;
            return Ok(Stmt::Break);
        }
        if self.at_name("continue") {
            self.advance();
            self.expect(&Token::Newline)?;
            return Ok(Stmt::Continue);
        }
        if self.at_name("pass") {
            self.advance();
            self.expect(&Token::Newline)?;
            return Ok(Stmt::Pass);
        }

        self.parse_expr_or_assign_statement()
    }

    fn parse_if(&mut self) -> Result<Stmt, WorkerError> {
        self.advance();
        let test = self.parse_expr()?;
        let body = self.parse_block()?;

        let orelse = if self.at_name("elif") {
            // Treat `elif` as nested `if` inside an `else` block.
            let nested = self.parse_if_as_elif()?;
            vec![nested]
        } else if self.at_name("else") {
            self.advance();
            self.parse_block()?
        } else {
            Vec::new()
        };

        Ok(Stmt::If { test, body, orelse })
    }

    fn parse_if_as_elif(&mut self) -> Result<Stmt, WorkerError> {
        self.advance(); // consume 'elif'
        let test = self.parse_expr()?;
        let body = self.parse_block()?;
        let orelse = if self.at_name("elif") {
            vec![self.parse_if_as_elif()?]
        } else if self.at_name("else") {
            self.advance();
            self.parse_block()?
        } else {
            Vec::new()
        };
        Ok(Stmt::If { test, body, orelse })
    }

    fn parse_for(&mut self) -> Result<Stmt, WorkerError> {
        self.advance();
        let target = self.parse_target_list()?;
        if !self.at_name("in") {
            return Err(WorkerError::sandbox(format!(
                "expected 'in' in for-loop at line {}",
                self.line()
            )));
        }
        self.advance();
        let iter = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(Stmt::For { target, iter, body })
    }

    fn parse_while(&mut self) -> Result<Stmt, WorkerError> {
        self.advance();
        let test = self.parse_expr()?;
        let body = self.parse_block()?;
        Ok(Stmt::While { test, body })
    }

    fn parse_function_def(&mut self) -> Result<Stmt, WorkerError> {
        self.advance();
        let name = self.parse_ident()?;
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        while !matches!(self.peek(), Token::RParen) {
            params.push(self.parse_ident()?);
            if matches!(self.peek(), Token::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        let body = self.parse_block()?;
        Ok(Stmt::FunctionDef { name, params, body })
    }

    fn parse_target_list(&mut self) -> Result<Target, WorkerError> {
        let first = self.parse_target_atom()?;
        if matches!(self.peek(), Token::Comma) {
            let mut items = vec![first];
            while matches!(self.peek(), Token::Comma) {
                self.advance();
                if self.at_name("in") || matches!(self.peek(), Token::Assign) {
                    break;
                }
                items.push(self.parse_target_atom()?);
            }
            Ok(Target::Tuple(items))
        } else {
            Ok(first)
        }
    }

    fn parse_target_atom(&mut self) -> Result<Target, WorkerError> {
        self.reject_if_disallowed_keyword()?;
        let name = self.parse_ident()?;
        let mut expr = Expr::Name(name.clone());
        let mut is_subscript = false;
        let mut last_index = None;

        while matches!(self.peek(), Token::LBracket) {
            self.advance();
            let index = self.parse_expr()?;
            self.expect(&Token::RBracket)?;
            expr = Expr::Subscript {
                value: Box::new(expr),
                slice: Box::new(SliceOrIndex::Index(Box::new(index.clone()))),
            };
            is_subscript = true;
            last_index = Some(index);
        }

        if is_subscript {
            if let Expr::Subscript { value, .. } = expr {
                return Ok(Target::Subscript {
                    value,
                    index: Box::new(last_index.unwrap_or(Expr::Constant(Constant::None))),
                });
            }
        }

        Ok(Target::Name(name))
    }

    fn parse_ident(&mut self) -> Result<String, WorkerError> {
        self.reject_if_disallowed_keyword()?;
        match self.advance() {
            Token::Name(n) => Ok(n),
            other => Err(WorkerError::sandbox(format!(
                "expected identifier at line {}, found {other:?}",
                self.line()
            ))),
        }
    }

    fn parse_expr_or_assign_statement(&mut self) -> Result<Stmt, WorkerError> {
        let expr = self.parse_expr()?;

        let aug_op = match self.peek() {
            Token::PlusEq => Some(BinOp::Add),
            Token::MinusEq => Some(BinOp::Sub),
            Token::StarEq => Some(BinOp::Mul),
            Token::SlashEq => Some(BinOp::Div),
            Token::PercentEq => Some(BinOp::Mod),
            _ => None,
        };

        if let Some(op) = aug_op {
            self.advance();
            let target = expr_to_target(&expr)?;
            let value = self.parse_expr()?;
            self.expect(&Token::Newline)?;
            return Ok(Stmt::AugAssign { target, op, value });
        }

        if matches!(self.peek(), Token::Assign) {
            self.advance();
            let target = expr_to_target(&expr)?;
            let value = self.parse_expr()?;
            self.expect(&Token::Newline)?;
            return Ok(Stmt::Assign { target, value });
        }

        self.expect(&Token::Newline)?;
        Ok(Stmt::ExprStmt(expr))
    }

    // ---- expressions ---------------------------------------------------
    //
    // Precedence, lowest to highest:
    //   if-else  <  or  <  and  <  not  <  comparisons  <  +/-  <  *,/,//,%
    //   <  unary +/-  <  **  <  postfix (call/subscript)  <  atom

    fn parse_expr(&mut self) -> Result<Expr, WorkerError> {
        self.parse_if_exp()
    }

    fn parse_if_exp(&mut self) -> Result<Expr, WorkerError> {
        let body = self.parse_or()?;
        if self.at_name("if") {
            self.advance();
            let test = self.parse_or()?;
            if !self.at_name("else") {
                return Err(WorkerError::sandbox(format!(
                    "expected 'else' in conditional expression at line {}",
                    self.line()
                )));
            }
            self.advance();
            let orelse = self.parse_if_exp()?;
            return Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    fn parse_or(&mut self) -> Result<Expr, WorkerError> {
        let mut values = vec![self.parse_and()?];
        while self.at_name("or") {
            self.advance();
            values.push(self.parse_and()?);
        }
        Ok(if values.len() == 1 {
            values.remove(0)
        } else {
            Expr::BoolOp {
                op: BoolOp::Or,
                values,
            }
        })
    }

    fn parse_and(&mut self) -> Result<Expr, WorkerError> {
        let mut values = vec![self.parse_not()?];
        while self.at_name("and") {
            self.advance();
            values.push(self.parse_not()?);
        }
        Ok(if values.len() == 1 {
            values.remove(0)
        } else {
            Expr::BoolOp {
                op: BoolOp::And,
                values,
            }
        })
    }

    fn parse_not(&mut self) -> Result<Expr, WorkerError> {
        if self.at_name("not") {
            self.advance();
            let operand = self.parse_not()?;
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, WorkerError> {
        let left = self.parse_additive()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();

        loop {
            let op = if matches!(self.peek(), Token::Eq) {
                self.advance();
                CmpOp::Eq
            } else if matches!(self.peek(), Token::NotEq) {
                self.advance();
                CmpOp::NotEq
            } else if matches!(self.peek(), Token::Lt) {
                self.advance();
                CmpOp::Lt
            } else if matches!(self.peek(), Token::LtEq) {
                self.advance();
                CmpOp::LtE
            } else if matches!(self.peek(), Token::Gt) {
                self.advance();
                CmpOp::Gt
            } else if matches!(self.peek(), Token::GtEq) {
                self.advance();
                CmpOp::GtE
            } else if self.at_name("in") {
                self.advance();
                CmpOp::In
            } else if self.at_name("not") {
                self.advance();
                if !self.at_name("in") {
                    return Err(WorkerError::sandbox(format!(
                        "expected 'in' after 'not' at line {}",
                        self.line()
                    )));
                }
                self.advance();
                CmpOp::NotIn
            } else if self.at_name("is") {
                self.advance();
                if self.at_name("not") {
                    self.advance();
                    CmpOp::IsNot
                } else {
                    CmpOp::Is
                }
            } else {
                break;
            };

            ops.push(op);
            comparators.push(self.parse_additive()?);
        }

        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                ops,
                comparators,
            })
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, WorkerError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::BinOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, WorkerError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::DoubleSlash => BinOp::FloorDiv,
                Token::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::BinOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, WorkerError> {
        match self.peek() {
            Token::Minus => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::UnaryOp {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                })
            }
            Token::Plus => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::UnaryOp {
                    op: UnaryOp::Pos,
                    operand: Box::new(operand),
                })
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr, WorkerError> {
        let base = self.parse_postfix()?;
        if matches!(self.peek(), Token::DoubleStar) {
            self.advance();
            let exponent = self.parse_unary()?;
            return Ok(Expr::BinOp {
                left: Box::new(base),
                op: BinOp::Pow,
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, WorkerError> {
        let mut expr = self.parse_atom()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let attr = self.parse_ident()?;
                    expr = Expr::Attribute {
                        value: Box::new(expr),
                        attr,
                    };
                }
                Token::LParen => {
                    self.advance();
                    let (args, keywords) = self.parse_call_args()?;
                    self.expect(&Token::RParen)?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        keywords,
                    };
                }
                Token::LBracket => {
                    self.advance();
                    let slice = self.parse_subscript_slice()?;
                    self.expect(&Token::RBracket)?;
                    expr = Expr::Subscript {
                        value: Box::new(expr),
                        slice: Box::new(slice),
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_subscript_slice(&mut self) -> Result<SliceOrIndex, WorkerError> {
        let start = if matches!(self.peek(), Token::Colon) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };

        if !matches!(self.peek(), Token::Colon) {
            let Some(start) = start else {
                return Err(WorkerError::sandbox(format!(
                    "empty subscript at line {}",
                    self.line()
                )));
            };
            return Ok(SliceOrIndex::Index(start));
        }

        self.advance();
        let stop = if matches!(self.peek(), Token::Colon | Token::RBracket) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };

        let step = if matches!(self.peek(), Token::Colon) {
            self.advance();
            if matches!(self.peek(), Token::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expr()?))
            }
        } else {
            None
        };

        Ok(SliceOrIndex::Slice { start, stop, step })
    }

    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<Keyword>), WorkerError> {
        let mut args = Vec::new();
        let mut keywords = Vec::new();

        while !matches!(self.peek(), Token::RParen) {
            if let Token::Name(name) = self.peek().clone() {
                if self.tokens.get(self.pos + 1).map(|s| &s.token) == Some(&Token::Assign) {
                    self.advance();
                    self.advance();
                    let value = self.parse_expr()?;
                    keywords.push(Keyword { name, value });
                    if matches!(self.peek(), Token::Comma) {
                        self.advance();
                        continue;
                    }
                    break;
                }
            }
            args.push(self.parse_expr()?);
            if matches!(self.peek(), Token::Comma) {
                self.advance();
                continue;
            }
            break;
        }

        Ok((args, keywords))
    }

    fn parse_comprehension_clauses(&mut self) -> Result<Vec<Comprehension>, WorkerError> {
        let mut generators = Vec::new();
        while self.at_name("for") {
            self.advance();
            let target = self.parse_target_list()?;
            if !self.at_name("in") {
                return Err(WorkerError::sandbox(format!(
                    "expected 'in' in comprehension at line {}",
                    self.line()
                )));
            }
            self.advance();
            let iter = self.parse_or()?;
            let mut ifs = Vec::new();
            while self.at_name("if") {
                self.advance();
                ifs.push(self.parse_or()?);
            }
            generators.push(Comprehension { target, iter, ifs });
        }
        Ok(generators)
    }

    fn parse_atom(&mut self) -> Result<Expr, WorkerError> {
        self.reject_if_disallowed_keyword()?;

        match self.peek().clone() {
            Token::Int(n) => {
                self.advance();
                Ok(Expr::Constant(Constant::Int(n)))
            }
            Token::Float(f) => {
                self.advance();
                Ok(Expr::Constant(Constant::Float(f)))
            }
            Token::Str(text, is_fstring) => {
                self.advance();
                if is_fstring {
                    Ok(Expr::JoinedStr(parse_fstring_parts(&text)?))
                } else {
                    Ok(Expr::Constant(Constant::Str(text)))
                }
            }
            Token::Name(name) => self.parse_name_atom(&name),
            Token::LParen => self.parse_paren_atom(),
            Token::LBracket => self.parse_bracket_atom(),
            Token::LBrace => self.parse_brace_atom(),
            other => Err(WorkerError::sandbox(format!(
                "unexpected token {other:?} at line {}",
                self.line()
            ))),
        }
    }

    fn parse_name_atom(&mut self, name: &str) -> Result<Expr, WorkerError> {
        match name {
            "True" => {
                self.advance();
                Ok(Expr::Constant(Constant::Bool(true)))
            }
            "False" => {
                self.advance();
                Ok(Expr::Constant(Constant::Bool(false)))
            }
            "None" => {
                self.advance();
                Ok(Expr::Constant(Constant::None))
            }
            _ => {
                self.advance();
                Ok(Expr::Name(name.to_string()))
            }
        }
    }

    fn parse_paren_atom(&mut self) -> Result<Expr, WorkerError> {
        self.advance();
        if matches!(self.peek(), Token::RParen) {
            self.advance();
            return Ok(Expr::Tuple(Vec::new()));
        }

        let first = self.parse_expr()?;

        if self.at_name("for") {
            let element = first;
            let generators = self.parse_comprehension_clauses()?;
            self.expect(&Token::RParen)?;
            return Ok(Expr::GeneratorExp {
                element: Box::new(element),
                generators,
            });
        }

        if matches!(self.peek(), Token::Comma) {
            let mut items = vec![first];
            while matches!(self.peek(), Token::Comma) {
                self.advance();
                if matches!(self.peek(), Token::RParen) {
                    break;
                }
                items.push(self.parse_expr()?);
            }
            self.expect(&Token::RParen)?;
            return Ok(Expr::Tuple(items));
        }

        self.expect(&Token::RParen)?;
        Ok(first)
    }

    fn parse_bracket_atom(&mut self) -> Result<Expr, WorkerError> {
        self.advance();
        if matches!(self.peek(), Token::RBracket) {
            self.advance();
            return Ok(Expr::List(Vec::new()));
        }

        let first = self.parse_expr()?;

        if self.at_name("for") {
            let generators = self.parse_comprehension_clauses()?;
            self.expect(&Token::RBracket)?;
            return Ok(Expr::ListComp {
                element: Box::new(first),
                generators,
            });
        }

        let mut items = vec![first];
        while matches!(self.peek(), Token::Comma) {
            self.advance();
            if matches!(self.peek(), Token::RBracket) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        self.expect(&Token::RBracket)?;
        Ok(Expr::List(items))
    }

    fn parse_brace_atom(&mut self) -> Result<Expr, WorkerError> {
        self.advance();
        if matches!(self.peek(), Token::RBrace) {
            self.advance();
            return Ok(Expr::Dict(Vec::new()));
        }

        let first = self.parse_expr()?;

        if matches!(self.peek(), Token::Colon) {
            self.advance();
            let first_value = self.parse_expr()?;

            if self.at_name("for") {
                let generators = self.parse_comprehension_clauses()?;
                self.expect(&Token::RBrace)?;
                return Ok(Expr::DictComp {
                    key: Box::new(first),
                    value: Box::new(first_value),
                    generators,
                });
            }

            let mut pairs = vec![(first, first_value)];
            while matches!(self.peek(), Token::Comma) {
                self.advance();
                if matches!(self.peek(), Token::RBrace) {
                    break;
                }
                let key = self.parse_expr()?;
                self.expect(&Token::Colon)?;
                let value = self.parse_expr()?;
                pairs.push((key, value));
            }
            self.expect(&Token::RBrace)?;
            return Ok(Expr::Dict(pairs));
        }

        if self.at_name("for") {
            let generators = self.parse_comprehension_clauses()?;
            self.expect(&Token::RBrace)?;
            return Ok(Expr::SetComp {
                element: Box::new(first),
                generators,
            });
        }

        let mut items = vec![first];
        while matches!(self.peek(), Token::Comma) {
            self.advance();
            if matches!(self.peek(), Token::RBrace) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        self.expect(&Token::RBrace)?;
        Ok(Expr::Set(items))
    }
}

/// Splits f-string source into literal and `{expr}` parts, recursively
/// parsing each embedded expression with a fresh [`Parser`].
fn parse_fstring_parts(text: &str) -> Result<Vec<FStringPart>, WorkerError> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                literal.push('{');
                i += 2;
            }
            '}' if chars.get(i + 1) == Some(&'}') => {
                literal.push('}');
                i += 2;
            }
            '{' => {
                if !literal.is_empty() {
                    parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
                }
                let mut depth = 1;
                let start = i + 1;
                i += 1;
                while i < chars.len() && depth > 0 {
                    match chars[i] {
                        '{' => depth += 1,
                        '}' => depth -= 1,
                        _ => {}
                    }
                    if depth > 0 {
                        i += 1;
                    }
                }
                let expr_src: String = chars[start..i].iter().collect();
                i += 1; // consume closing '}'
                let expr = parse_single_expr(&expr_src)?;
                parts.push(FStringPart::Expr(Box::new(expr)));
            }
            ch => {
                literal.push(ch);
                i += 1;
            }
        }
    }

    if !literal.is_empty() {
        parts.push(FStringPart::Literal(literal));
    }

    Ok(parts)
}

fn parse_single_expr(source: &str) -> Result<Expr, WorkerError> {
    let tokens = lex(&format!("{source}\n"))?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.parse_expr()
}

fn expr_to_target(expr: &Expr) -> Result<Target, WorkerError> {
    match expr {
        Expr::Name(name) => Ok(Target::Name(name.clone())),
        Expr::Tuple(items) => {
            let targets: Result<Vec<Target>, WorkerError> =
                items.iter().map(expr_to_target).collect();
            Ok(Target::Tuple(targets?))
        }
        Expr::Subscript { value, slice } => match slice.as_ref() {
            SliceOrIndex::Index(index) => Ok(Target::Subscript {
                value: value.clone(),
                index: index.clone(),
            }),
            SliceOrIndex::Slice { .. } => Err(WorkerError::sandbox(
                "slice assignment is not allowed".to_string(),
            )),
        },
        _ => Err(WorkerError::sandbox(
            "invalid assignment target".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_assignment() {
        let module = parse("x = 1\n").unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert_eq!(module.len(), 1);
        assert!(matches!(module[0], Stmt::Assign { .. }));
    }

    #[test]
    fn test_parse_import_is_rejected() {
        let result = parse("import os\n");
        assert!(matches!(result, Err(WorkerError::SandboxViolation { .. })));
    }

    #[test]
    fn test_parse_lambda_is_rejected() {
        let result = parse("f = lambda x: x\n");
        assert!(matches!(result, Err(WorkerError::SandboxViolation { .. })));
    }

    #[test]
    fn test_parse_dunder_attribute_access() {
        let module = parse("x = (1).__class__\n").unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert!(matches!(module[0], Stmt::Assign { .. }));
        if let Stmt::Assign { value, .. } = &module[0] {
            assert!(matches!(value, Expr::Attribute { attr, .. } if attr == "__class__"));
        }
    }

    #[test]
    fn test_parse_is_and_is_not() {
        let module = parse("x = a is None\ny = a is not None\n").unwrap_or_else(|e| panic!("parse failed: {e}"));
        let Stmt::Assign { value, .. } = &module[0] else {
            panic!("expected assignment");
        };
        assert!(matches!(value, Expr::Compare { ops, .. } if ops == &[CmpOp::Is]));
        let Stmt::Assign { value, .. } = &module[1] else {
            panic!("expected assignment");
        };
        assert!(matches!(value, Expr::Compare { ops, .. } if ops == &[CmpOp::IsNot]));
    }

    #[test]
    fn test_parse_if_elif_else() {
        let module = parse("if x:\n    pass\nelif y:\n    pass\nelse:\n    pass\n")
            .unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert_eq!(module.len(), 1);
    }

    #[test]
    fn test_parse_for_with_tuple_target() {
        let module =
            parse("for k, v in d.items():\n    pass\n").unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert!(matches!(
            module[0],
            Stmt::For {
                target: Target::Tuple(_),
                ..
            }
        ));
    }

    #[test]
    fn test_parse_list_comprehension() {
        let module =
            parse("y = [x for x in items if x > 0]\n").unwrap_or_else(|e| panic!("parse failed: {e}"));
        if let Stmt::Assign { value, .. } = &module[0] {
            assert!(matches!(value, Expr::ListComp { .. }));
        } else {
            panic!("expected assignment");
        }
    }

    #[test]
    fn test_parse_fstring() {
        let module = parse("y = f\"count={n}\"\n").unwrap_or_else(|e| panic!("parse failed: {e}"));
        if let Stmt::Assign { value, .. } = &module[0] {
            assert!(matches!(value, Expr::JoinedStr(_)));
        } else {
            panic!("expected assignment");
        }
    }

    #[test]
    fn test_parse_function_def_and_call() {
        let module = parse("def f(a, b):\n    return a + b\nf(1, 2)\n")
            .unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert_eq!(module.len(), 2);
        assert!(matches!(module[0], Stmt::FunctionDef { .. }));
        assert!(matches!(module[1], Stmt::ExprStmt(Expr::Call { .. })));
    }
}
