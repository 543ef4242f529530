//! Recursive descent parser over logical lines.

use super::{
    ast::{BinaryOp, Expr, FunctionDef, LogicalOp, Program, Stmt, StmtKind, UnaryOp},
    lexer::{LogicalLine, Punct, Token, logical_lines, tokenize},
};
use crate::error::SyntaxError;
use waypoint_engine::Value;

const KEYWORDS: &[&str] = &[
    "def", "lambda", "return", "assert", "pass", "and", "or", "not", "True", "False", "None",
];

/// Parses a whole source file.
///
/// # Errors
///
/// The source is not a valid program.
pub fn parse_program(source: &str) -> Result<Program, SyntaxError> {
    let lines = logical_lines(source)?;
    let mut parser = Parser {
        lines: &lines,
        pos: 0,
    };
    let body = parser.block(0)?;
    Ok(Program { body })
}

/// Parses a standalone expression, as used by conditions.
///
/// # Errors
///
/// The text is not a single valid expression.
pub fn parse_expression(text: &str) -> Result<Expr, SyntaxError> {
    let tokens = tokenize(text, 1)?;
    if tokens.is_empty() {
        return Err(SyntaxError::new(1, "expected an expression"));
    }
    let mut cursor = Cursor::new(&tokens, 1);
    let expr = cursor.expression()?;
    cursor.finish()?;
    Ok(expr)
}

/// Parses statements executed inside a running frame.
///
/// Definitions and `return` are refused: injected code runs in the frame's
/// namespace but is not itself a routine.
///
/// # Errors
///
/// The text does not parse or contains a refused statement.
pub fn parse_snippet(text: &str) -> Result<Vec<Stmt>, SyntaxError> {
    let lines = logical_lines(text)?;
    let indent = lines.iter().map(|line| line.indent).min().unwrap_or(0);
    let mut parser = Parser {
        lines: &lines,
        pos: 0,
    };
    let body = parser.block(indent)?;
    for stmt in &body {
        let refused = match stmt.kind {
            StmtKind::Def(_) => "`def`",
            StmtKind::Lambda { .. } => "`lambda`",
            StmtKind::Return(_) => "`return`",
            _ => continue,
        };
        return Err(SyntaxError::new(
            stmt.line,
            format!("{refused} is not allowed in injected code"),
        ));
    }
    Ok(body)
}

fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

struct Parser<'a> {
    lines: &'a [LogicalLine],
    pos: usize,
}

impl Parser<'_> {
    fn block(&mut self, indent: usize) -> Result<Vec<Stmt>, SyntaxError> {
        let lines = self.lines;
        let mut body = Vec::new();
        while let Some(line) = lines.get(self.pos) {
            if line.indent < indent {
                break;
            }
            if line.indent > indent {
                return Err(SyntaxError::new(line.number, "unexpected indent"));
            }
            if matches!(line.tokens[0], Token::Punct(Punct::At)) || line.tokens[0].is_word("def") {
                body.push(self.definition(indent)?);
                continue;
            }

            self.pos += 1;
            for simple in line
                .tokens
                .split(|token| matches!(token, Token::Punct(Punct::Semicolon)))
                .filter(|tokens| !tokens.is_empty())
            {
                body.push(simple_statement(simple, line.number)?);
            }
        }
        Ok(body)
    }

    fn definition(&mut self, indent: usize) -> Result<Stmt, SyntaxError> {
        let lines = self.lines;
        let mut decorators = Vec::new();
        let mut first_line = None;
        let mut last_seen = 0;

        while let Some(line) = lines.get(self.pos) {
            if !matches!(line.tokens[0], Token::Punct(Punct::At)) {
                break;
            }
            if line.indent != indent {
                return Err(SyntaxError::new(line.number, "unexpected indent"));
            }
            if line.tokens.len() == 1 {
                return Err(SyntaxError::new(line.number, "expected a decorator after `@`"));
            }
            let text: Vec<String> = line.tokens[1..].iter().map(Token::to_string).collect();
            decorators.push(text.join(" "));
            first_line.get_or_insert(line.number);
            last_seen = line.number;
            self.pos += 1;
        }

        let header = match lines.get(self.pos) {
            Some(line) if line.indent == indent && line.tokens[0].is_word("def") => line,
            Some(line) => {
                return Err(SyntaxError::new(line.number, "expected `def` after decorators"));
            }
            None => return Err(SyntaxError::new(last_seen, "expected `def` after decorators")),
        };
        self.pos += 1;

        let mut cursor = Cursor::new(&header.tokens[1..], header.number);
        let name = cursor.name()?;
        cursor.expect(Punct::LParen)?;
        let params = cursor.params(Punct::RParen)?;
        cursor.expect(Punct::Colon)?;
        cursor.finish()?;

        let body_indent = match lines.get(self.pos) {
            Some(line) if line.indent > indent => line.indent,
            _ => {
                return Err(SyntaxError::new(
                    header.number,
                    format!("expected an indented body for `{name}`"),
                ));
            }
        };
        let body = self.block(body_indent)?;
        let last_line = body.last().map_or(header.number, Stmt::last_line);

        Ok(Stmt {
            line: header.number,
            kind: StmtKind::Def(Box::new(FunctionDef {
                name,
                params,
                decorators,
                first_line: first_line.unwrap_or(header.number),
                header_line: header.number,
                last_line,
                body,
            })),
        })
    }
}

fn simple_statement(tokens: &[Token], line: u32) -> Result<Stmt, SyntaxError> {
    let mut cursor = Cursor::new(tokens, line);
    let kind = match tokens {
        [first, rest @ ..] if first.is_word("return") => {
            cursor.next();
            let value = if rest.is_empty() {
                None
            } else {
                Some(cursor.expression()?)
            };
            StmtKind::Return(value)
        }
        [first, ..] if first.is_word("assert") => {
            cursor.next();
            StmtKind::Assert(cursor.expression()?)
        }
        [first, ..] if first.is_word("pass") => {
            cursor.next();
            StmtKind::Pass
        }
        [first, ..] if first.is_word("def") => {
            return Err(SyntaxError::new(line, "`def` must start its own line"));
        }
        [Token::Name(target), Token::Punct(Punct::Assign), rest @ ..] => {
            if is_keyword(target) {
                return Err(SyntaxError::new(line, format!("cannot assign to `{target}`")));
            }
            cursor.next();
            cursor.next();
            if rest.first().is_some_and(|token| token.is_word("lambda")) {
                cursor.next();
                let params = cursor.params(Punct::Colon)?;
                StmtKind::Lambda {
                    target: target.clone(),
                    params,
                    body: cursor.expression()?,
                }
            } else {
                StmtKind::Assign {
                    target: target.clone(),
                    value: cursor.expression()?,
                }
            }
        }
        _ => StmtKind::Expr(cursor.expression()?),
    };
    cursor.finish()?;
    Ok(Stmt { line, kind })
}

struct Cursor<'t> {
    tokens: &'t [Token],
    pos: usize,
    line: u32,
}

impl<'t> Cursor<'t> {
    fn new(tokens: &'t [Token], line: u32) -> Self {
        Self {
            tokens,
            pos: 0,
            line,
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.line, message)
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    fn eat(&mut self, punct: Punct) -> bool {
        if self.peek() == Some(&Token::Punct(punct)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.peek().is_some_and(|token| token.is_word(word)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: Punct) -> Result<(), SyntaxError> {
        if self.eat(punct) {
            return Ok(());
        }
        let expected = Token::Punct(punct);
        Err(match self.peek() {
            Some(found) => self.error(format!("expected `{expected}`, found `{found}`")),
            None => self.error(format!("expected `{expected}` at end of line")),
        })
    }

    fn finish(&self) -> Result<(), SyntaxError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(self.error(format!("unexpected `{token}`"))),
        }
    }

    fn name(&mut self) -> Result<String, SyntaxError> {
        match self.next() {
            Some(Token::Name(name)) if !is_keyword(name) => Ok(name.clone()),
            Some(token) => Err(self.error(format!("expected a name, found `{token}`"))),
            None => Err(self.error("expected a name")),
        }
    }

    /// Comma separated names up to and including `close`.
    fn params(&mut self, close: Punct) -> Result<Vec<String>, SyntaxError> {
        let mut params: Vec<String> = Vec::new();
        while !self.eat(close) {
            let name = self.name()?;
            if params.contains(&name) {
                return Err(self.error(format!("duplicate parameter `{name}`")));
            }
            params.push(name);
            if !self.eat(Punct::Comma) {
                self.expect(close)?;
                break;
            }
        }
        Ok(params)
    }

    fn expression(&mut self) -> Result<Expr, SyntaxError> {
        self.or()
    }

    fn or(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.and()?;
        while self.eat_word("or") {
            let rhs = self.and()?;
            lhs = logical(LogicalOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.not()?;
        while self.eat_word("and") {
            let rhs = self.not()?;
            lhs = logical(LogicalOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn not(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_word("not") {
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(self.not()?),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.additive()?;
        while let Some(op) = self.binary_op(&[
            (Punct::Eq, BinaryOp::Eq),
            (Punct::NotEq, BinaryOp::NotEq),
            (Punct::Lt, BinaryOp::Lt),
            (Punct::LtEq, BinaryOp::LtEq),
            (Punct::Gt, BinaryOp::Gt),
            (Punct::GtEq, BinaryOp::GtEq),
        ]) {
            let rhs = self.additive()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.multiplicative()?;
        while let Some(op) = self.binary_op(&[(Punct::Plus, BinaryOp::Add), (Punct::Minus, BinaryOp::Sub)])
        {
            let rhs = self.multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.binary_op(&[
            (Punct::Star, BinaryOp::Mul),
            (Punct::Slash, BinaryOp::Div),
            (Punct::Percent, BinaryOp::Rem),
        ]) {
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn binary_op(&mut self, table: &[(Punct, BinaryOp)]) -> Option<BinaryOp> {
        let Some(Token::Punct(found)) = self.peek() else {
            return None;
        };
        let (_, op) = table.iter().find(|(punct, _)| punct == found)?;
        self.pos += 1;
        Some(*op)
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat(Punct::Minus) {
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(self.unary()?),
            });
        }
        if self.eat(Punct::Plus) {
            return self.unary();
        }
        let expr = self.primary()?;
        if self.peek() == Some(&Token::Punct(Punct::LParen)) {
            return Err(self.error("only named routines can be called"));
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        let Some(token) = self.next() else {
            return Err(self.error("expected an expression"));
        };
        let expr = match token {
            Token::Int(i) => Expr::Literal(Value::Int(*i)),
            Token::Float(x) => Expr::Literal(Value::Float(*x)),
            Token::Str(s) => Expr::Literal(Value::from(s.as_str())),
            Token::Name(name) => match name.as_str() {
                "True" => Expr::Literal(Value::Bool(true)),
                "False" => Expr::Literal(Value::Bool(false)),
                "None" => Expr::Literal(Value::None),
                keyword if is_keyword(keyword) => {
                    return Err(self.error(format!("unexpected `{keyword}`")));
                }
                _ if self.eat(Punct::LParen) => Expr::Call {
                    callee: name.clone(),
                    args: self.items(Punct::RParen)?,
                },
                _ => Expr::Name(name.clone()),
            },
            Token::Punct(Punct::LParen) => {
                let inner = self.expression()?;
                self.expect(Punct::RParen)?;
                inner
            }
            Token::Punct(Punct::LBracket) => Expr::List(self.items(Punct::RBracket)?),
            Token::Punct(_) => return Err(self.error(format!("unexpected `{token}`"))),
        };
        Ok(expr)
    }

    /// Comma separated expressions up to and including `close`.
    fn items(&mut self, close: Punct) -> Result<Vec<Expr>, SyntaxError> {
        let mut items = Vec::new();
        while !self.eat(close) {
            items.push(self.expression()?);
            if !self.eat(Punct::Comma) {
                self.expect(close)?;
                break;
            }
        }
        Ok(items)
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn logical(op: LogicalOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Logical {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}
