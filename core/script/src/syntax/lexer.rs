//! Splits source text into indented logical lines of tokens.

use crate::error::SyntaxError;
use std::{fmt, iter::Peekable, str::CharIndices};

/// Punctuation and operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `,`
    Comma,
    /// `:`
    Colon,
    /// `;`
    Semicolon,
    /// `=`
    Assign,
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `%`
    Percent,
    /// `@`
    At,
}

impl Punct {
    const fn as_str(self) -> &'static str {
        match self {
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::Comma => ",",
            Self::Colon => ":",
            Self::Semicolon => ";",
            Self::Assign => "=",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::At => "@",
        }
    }
}

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A name or keyword.
    Name(String),
    /// An integer literal.
    Int(i64),
    /// A float literal.
    Float(f64),
    /// A string literal, escapes resolved.
    Str(String),
    /// Punctuation.
    Punct(Punct),
}

impl Token {
    /// Returns `true` if the token is the keyword or name `word`.
    pub(crate) fn is_word(&self, word: &str) -> bool {
        matches!(self, Self::Name(name) if name == word)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Punct(p) => f.write_str(p.as_str()),
        }
    }
}

/// One non-blank source line.
#[derive(Debug, Clone)]
pub struct LogicalLine {
    /// 1-based line number.
    pub number: u32,
    /// Count of leading spaces.
    pub indent: usize,
    /// The line's tokens, never empty.
    pub tokens: Vec<Token>,
}

/// Tokenizes every non-blank, non-comment line of `source`.
pub(crate) fn logical_lines(source: &str) -> Result<Vec<LogicalLine>, SyntaxError> {
    let mut lines = Vec::new();
    for (number, text) in (1..).zip(source.lines()) {
        let body = text.trim_start_matches(' ');
        if body.starts_with('\t') {
            return Err(SyntaxError::new(number, "indent with spaces, not tabs"));
        }
        let tokens = tokenize(body, number)?;
        if tokens.is_empty() {
            continue;
        }
        lines.push(LogicalLine {
            number,
            indent: text.len() - body.len(),
            tokens,
        });
    }
    Ok(lines)
}

/// Tokenizes a single line of text.
pub(crate) fn tokenize(text: &str, line: u32) -> Result<Vec<Token>, SyntaxError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            '#' => break,
            c if c.is_whitespace() => {
                chars.next();
            }
            c if c.is_ascii_digit() => tokens.push(number(text, &mut chars, start, line)?),
            c if c.is_alphabetic() || c == '_' => {
                let mut end = start;
                while let Some(&(i, c)) = chars.peek() {
                    if !(c.is_alphanumeric() || c == '_') {
                        break;
                    }
                    end = i + c.len_utf8();
                    chars.next();
                }
                tokens.push(Token::Name(text[start..end].to_owned()));
            }
            '"' | '\'' => tokens.push(Token::Str(string(&mut chars, line)?)),
            _ => {
                chars.next();
                let next = chars.peek().map(|&(_, c)| c);
                let (punct, wide) = match (c, next) {
                    ('=', Some('=')) => (Punct::Eq, true),
                    ('!', Some('=')) => (Punct::NotEq, true),
                    ('<', Some('=')) => (Punct::LtEq, true),
                    ('>', Some('=')) => (Punct::GtEq, true),
                    ('(', _) => (Punct::LParen, false),
                    (')', _) => (Punct::RParen, false),
                    ('[', _) => (Punct::LBracket, false),
                    (']', _) => (Punct::RBracket, false),
                    (',', _) => (Punct::Comma, false),
                    (':', _) => (Punct::Colon, false),
                    (';', _) => (Punct::Semicolon, false),
                    ('=', _) => (Punct::Assign, false),
                    ('<', _) => (Punct::Lt, false),
                    ('>', _) => (Punct::Gt, false),
                    ('+', _) => (Punct::Plus, false),
                    ('-', _) => (Punct::Minus, false),
                    ('*', _) => (Punct::Star, false),
                    ('/', _) => (Punct::Slash, false),
                    ('%', _) => (Punct::Percent, false),
                    ('@', _) => (Punct::At, false),
                    _ => {
                        return Err(SyntaxError::new(line, format!("unexpected character `{c}`")));
                    }
                };
                if wide {
                    chars.next();
                }
                tokens.push(Token::Punct(punct));
            }
        }
    }

    Ok(tokens)
}

fn number(
    text: &str,
    chars: &mut Peekable<CharIndices<'_>>,
    start: usize,
    line: u32,
) -> Result<Token, SyntaxError> {
    let mut end = start;
    let mut float = false;
    while let Some(&(i, c)) = chars.peek() {
        if c == '.' && !float {
            float = true;
        } else if !(c.is_ascii_digit() || c == '_') {
            break;
        }
        end = i + 1;
        chars.next();
    }

    let literal: String = text[start..end].chars().filter(|&c| c != '_').collect();
    if float {
        literal
            .parse()
            .map(Token::Float)
            .map_err(|_| SyntaxError::new(line, format!("invalid float literal `{literal}`")))
    } else {
        literal
            .parse()
            .map(Token::Int)
            .map_err(|_| SyntaxError::new(line, format!("integer literal `{literal}` is too large")))
    }
}

fn string(chars: &mut Peekable<CharIndices<'_>>, line: u32) -> Result<String, SyntaxError> {
    let Some((_, quote)) = chars.next() else {
        return Err(SyntaxError::new(line, "expected a string"));
    };
    let mut value = String::new();
    loop {
        match chars.next() {
            None => return Err(SyntaxError::new(line, "unterminated string literal")),
            Some((_, c)) if c == quote => return Ok(value),
            Some((_, '\\')) => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, c @ ('\\' | '\'' | '"'))) => value.push(c),
                Some((_, c)) => {
                    value.push('\\');
                    value.push(c);
                }
                None => return Err(SyntaxError::new(line, "unterminated string literal")),
            },
            Some((_, c)) => value.push(c),
        }
    }
}
