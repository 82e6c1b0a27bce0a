//! Predicate queries over objects of one type.
//!
//! Grammar:
//!
//! ```text
//! expr    := and ("or" and)*
//! and     := primary ("and" primary)*
//! primary := TRUEPREDICATE | FALSEPREDICATE | "(" expr ")" | field op literal
//! op      := == | = | != | < | <= | > | >=
//! literal := integer | "string" | true | false | null
//! ```
//!
//! `&&` and `||` are accepted for `and` and `or`.
//!
//! Every query also has a canonical description: tokens joined by single
//! spaces with one trailing space, `=` spelled `==`, keywords in lower case
//! and the two constant predicates in upper case. Two queries are the same
//! subscription exactly when object type and description match.

use crate::error::{CoreError, CoreResult};
use crate::object::{Object, Value};
use crate::schema::Schema;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Int(i64),
    Str(String),
    Op(CmpOp),
    And,
    Or,
    LParen,
    RParen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn as_str(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    fn holds(self, ord: Option<Ordering>) -> bool {
        match (self, ord) {
            (CmpOp::Eq, Some(o)) => o == Ordering::Equal,
            (CmpOp::Ne, o) => o != Some(Ordering::Equal),
            (CmpOp::Lt, Some(o)) => o == Ordering::Less,
            (CmpOp::Le, Some(o)) => o != Ordering::Greater,
            (CmpOp::Gt, Some(o)) => o == Ordering::Greater,
            (CmpOp::Ge, Some(o)) => o != Ordering::Less,
            (_, None) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Const(bool),
    Compare {
        field: String,
        op: CmpOp,
        value: Value,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self, object: &Object) -> bool {
        match self {
            Expr::Const(b) => *b,
            Expr::Compare { field, op, value } => op.holds(object.field(field).compare(value)),
            Expr::And(a, b) => a.eval(object) && b.eval(object),
            Expr::Or(a, b) => a.eval(object) || b.eval(object),
        }
    }
}

/// A validated query against one object type.
#[derive(Debug, Clone)]
pub struct Query {
    object_type: String,
    description: String,
    expr: Expr,
}

impl Query {
    /// Parses `predicate` as a query over `object_type`.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownObjectType`] if the type is not in `schema`,
    /// [`CoreError::InvalidQuery`] if the predicate does not parse.
    pub fn new(schema: &Schema, object_type: &str, predicate: &str) -> CoreResult<Self> {
        schema.ensure_contains(object_type)?;
        let tokens = tokenize(predicate)?;
        if tokens.is_empty() {
            return Err(CoreError::invalid_query(predicate, "empty predicate"));
        }

        let mut parser = Parser {
            source: predicate,
            tokens: &tokens,
            pos: 0,
        };
        let expr = parser.parse_or()?;
        if parser.pos != tokens.len() {
            return Err(CoreError::invalid_query(
                predicate,
                format!("unexpected token at position {}", parser.pos),
            ));
        }

        Ok(Self {
            object_type: object_type.to_string(),
            description: describe(&tokens),
            expr,
        })
    }

    /// Matches every object of `object_type`.
    pub fn all(schema: &Schema, object_type: &str) -> CoreResult<Self> {
        Self::new(schema, object_type, "TRUEPREDICATE")
    }

    /// Returns the object type.
    #[must_use]
    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    /// Returns the canonical query text.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Evaluates the query against one object.
    #[must_use]
    pub fn matches(&self, object: &Object) -> bool {
        object.object_type == self.object_type && self.expr.eval(object)
    }
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        self.object_type == other.object_type && self.description == other.description
    }
}

impl Eq for Query {}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.object_type, self.description)
    }
}

fn tokenize(input: &str) -> CoreResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' | '!' | '<' | '>' | '&' | '|' => {
                chars.next();
                let doubled = chars.peek().map(|&(_, n)| n);
                let token = match (c, doubled) {
                    ('=', Some('=')) => Some(Token::Op(CmpOp::Eq)),
                    ('!', Some('=')) => Some(Token::Op(CmpOp::Ne)),
                    ('<', Some('=')) => Some(Token::Op(CmpOp::Le)),
                    ('>', Some('=')) => Some(Token::Op(CmpOp::Ge)),
                    ('&', Some('&')) => Some(Token::And),
                    ('|', Some('|')) => Some(Token::Or),
                    _ => None,
                };
                match token {
                    Some(token) => {
                        chars.next();
                        tokens.push(token);
                    }
                    None => match c {
                        '=' => tokens.push(Token::Op(CmpOp::Eq)),
                        '<' => tokens.push(Token::Op(CmpOp::Lt)),
                        '>' => tokens.push(Token::Op(CmpOp::Gt)),
                        _ => {
                            return Err(CoreError::invalid_query(
                                input,
                                format!("unexpected '{c}' at {start}"),
                            ))
                        }
                    },
                }
            }
            '"' | '\'' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    match ch {
                        '\\' => {
                            if let Some((_, escaped)) = chars.next() {
                                text.push(escaped);
                            }
                        }
                        ch if ch == c => {
                            closed = true;
                            break;
                        }
                        ch => text.push(ch),
                    }
                }
                if !closed {
                    return Err(CoreError::invalid_query(input, "unterminated string"));
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut text = String::new();
                text.push(c);
                chars.next();
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_ascii_digit() {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = text.parse::<i64>().map_err(|_| {
                    CoreError::invalid_query(input, format!("invalid number '{text}'"))
                })?;
                tokens.push(Token::Int(value));
            }
            c if c.is_alphanumeric() || c == '_' => {
                let mut word = String::new();
                while let Some(&(_, w)) = chars.peek() {
                    if w.is_alphanumeric() || w == '_' || w == '.' {
                        word.push(w);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if word.eq_ignore_ascii_case("and") {
                    tokens.push(Token::And);
                } else if word.eq_ignore_ascii_case("or") {
                    tokens.push(Token::Or);
                } else {
                    tokens.push(Token::Ident(word));
                }
            }
            other => {
                return Err(CoreError::invalid_query(
                    input,
                    format!("unexpected '{other}' at {start}"),
                ))
            }
        }
    }

    Ok(tokens)
}

fn canonical_word(word: &str) -> String {
    for keyword in ["TRUEPREDICATE", "FALSEPREDICATE"] {
        if word.eq_ignore_ascii_case(keyword) {
            return keyword.to_string();
        }
    }
    for keyword in ["true", "false", "null"] {
        if word.eq_ignore_ascii_case(keyword) {
            return keyword.to_string();
        }
    }
    word.to_string()
}

fn describe(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        match token {
            Token::Ident(word) => out.push_str(&canonical_word(word)),
            Token::Int(i) => out.push_str(&i.to_string()),
            Token::Str(s) => {
                out.push('"');
                for ch in s.chars() {
                    if ch == '"' || ch == '\\' {
                        out.push('\\');
                    }
                    out.push(ch);
                }
                out.push('"');
            }
            Token::Op(op) => out.push_str(op.as_str()),
            Token::And => out.push_str("and"),
            Token::Or => out.push_str("or"),
            Token::LParen => out.push('('),
            Token::RParen => out.push(')'),
        }
        out.push(' ');
    }
    out
}

struct Parser<'a> {
    source: &'a str,
    tokens: &'a [Token],
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, message: impl Into<String>) -> CoreError {
        CoreError::invalid_query(self.source, message)
    }

    fn next(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn parse_or(&mut self) -> CoreResult<Expr> {
        let mut left = self.parse_and()?;
        while self.tokens.get(self.pos) == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> CoreResult<Expr> {
        let mut left = self.parse_primary()?;
        while self.tokens.get(self.pos) == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_primary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> CoreResult<Expr> {
        match self.next().cloned() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.error("expected ')'")),
                }
            }
            Some(Token::Ident(word)) => match canonical_word(&word).as_str() {
                "TRUEPREDICATE" => Ok(Expr::Const(true)),
                "FALSEPREDICATE" => Ok(Expr::Const(false)),
                _ => {
                    let op = match self.next() {
                        Some(Token::Op(op)) => *op,
                        _ => return Err(self.error(format!("expected operator after '{word}'"))),
                    };
                    let value = self.parse_literal()?;
                    Ok(Expr::Compare {
                        field: word,
                        op,
                        value,
                    })
                }
            },
            Some(other) => Err(self.error(format!("unexpected token {other:?}"))),
            None => Err(self.error("unexpected end of query")),
        }
    }

    fn parse_literal(&mut self) -> CoreResult<Value> {
        match self.next().cloned() {
            Some(Token::Int(i)) => Ok(Value::Int(i)),
            Some(Token::Str(s)) => Ok(Value::String(s)),
            Some(Token::Ident(word)) => match canonical_word(&word).as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                "null" => Ok(Value::Null),
                _ => Err(self.error(format!("expected literal, found '{word}'"))),
            },
            _ => Err(self.error("expected literal")),
        }
    }
}
