//! Built-in attribute-path language.
//!
//! ```text
//! expr       := or
//! or         := and (("||" | "or") and)*
//! and        := unary (("&&" | "and") unary)*
//! unary      := ("!" | "not") unary | comparison
//! comparison := postfix (("==" | "!=" | "<" | "<=" | ">" | ">=") postfix
//!                       | "matches" STRING)?
//! postfix    := primary ("." IDENT | "[" expr "]")*
//! primary    := STRING | NUMBER | "true" | "false" | "null" | IDENT | "(" expr ")"
//! ```
//!
//! Root identifiers: `method`, `uri`, `path`, `query`, `headers`/`header`,
//! `body`, `json`, `statusCode`, `properties`/`property`, `flow`,
//! `destinations`. Any other identifier reads the exchange property of that
//! name, so loop variables are addressed directly (`it.name`).

use std::cmp::Ordering;
use std::collections::BTreeMap;

use regex::Regex;

use super::{CompiledExpression, ExpectedType, ExpressionError, Language};
use crate::exchange::Exchange;
use crate::message::HttpMessage;
use crate::outcome::Flow;
use crate::value::Value;

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Not,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".into()),
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&'\\') => {
                            let escaped = chars.get(i + 1).ok_or("dangling escape")?;
                            text.push(match *escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            });
                            i += 2;
                        }
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            '=' | '!' | '<' | '>' => {
                let next_is_eq = chars.get(i + 1) == Some(&'=');
                let token = match (c, next_is_eq) {
                    ('=', true) => Token::Eq,
                    ('!', true) => Token::Ne,
                    ('<', true) => Token::Le,
                    ('>', true) => Token::Ge,
                    ('!', false) => Token::Not,
                    ('<', false) => Token::Lt,
                    ('>', false) => Token::Gt,
                    _ => return Err(format!("unexpected '=' at offset {i}")),
                };
                i += if next_is_eq { 2 } else { 1 };
                tokens.push(token);
            }
            '&' | '|' => {
                if chars.get(i + 1) != Some(&c) {
                    return Err(format!("expected '{c}{c}' at offset {i}"));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
                i += 2;
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) =>
            {
                let start = i;
                i += 1;
                while chars
                    .get(i)
                    .is_some_and(|ch| ch.is_ascii_digit() || *ch == '.')
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if text.contains('.') {
                    tokens.push(Token::Float(
                        text.parse().map_err(|_| format!("invalid number '{text}'"))?,
                    ));
                } else {
                    tokens.push(Token::Int(
                        text.parse().map_err(|_| format!("invalid number '{text}'"))?,
                    ));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|ch| ch.is_alphanumeric() || *ch == '_' || *ch == '-')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(format!("unexpected character '{other}' at offset {i}")),
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Root {
    Method,
    Uri,
    Path,
    Query,
    Headers,
    Body,
    Json,
    StatusCode,
    Properties,
    Flow,
    Destinations,
    Property(String),
}

impl Root {
    fn from_ident(ident: &str) -> Self {
        match ident {
            "method" => Self::Method,
            "uri" => Self::Uri,
            "path" => Self::Path,
            "query" => Self::Query,
            "headers" | "header" => Self::Headers,
            "body" => Self::Body,
            "json" => Self::Json,
            "statusCode" => Self::StatusCode,
            "properties" | "property" => Self::Properties,
            "flow" => Self::Flow,
            "destinations" => Self::Destinations,
            other => Self::Property(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Root(Root),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    Matches(Box<Expr>, Regex),
}

impl Expr {
    fn is_headers(&self) -> bool {
        matches!(self, Self::Root(Root::Headers))
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), String> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(format!("expected {token:?}, found {:?}", self.peek()))
        }
    }

    fn parse(mut self) -> Result<Expr, String> {
        let expr = self.or()?;
        match self.peek() {
            None => Ok(expr),
            Some(token) => Err(format!("unexpected trailing token {token:?}")),
        }
    }

    fn or(&mut self) -> Result<Expr, String> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            left = Expr::Or(Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut left = self.unary()?;
        while self.eat(&Token::And) {
            left = Expr::And(Box::new(left), Box::new(self.unary()?));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, String> {
        let left = self.postfix()?;
        if matches!(self.peek(), Some(Token::Ident(word)) if word == "matches") {
            self.pos += 1;
            let Some(Token::Str(pattern)) = self.next() else {
                return Err("'matches' requires a string literal pattern".into());
            };
            let regex = Regex::new(&pattern).map_err(|e| format!("invalid regex: {e}"))?;
            return Ok(Expr::Matches(Box::new(left), regex));
        }
        let op = match self.peek() {
            Some(Token::Eq) => CompareOp::Eq,
            Some(Token::Ne) => CompareOp::Ne,
            Some(Token::Lt) => CompareOp::Lt,
            Some(Token::Le) => CompareOp::Le,
            Some(Token::Gt) => CompareOp::Gt,
            Some(Token::Ge) => CompareOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.postfix()?;
        Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
    }

    fn postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let Some(Token::Ident(name)) = self.next() else {
                    return Err("expected identifier after '.'".into());
                };
                let name = if expr.is_headers() {
                    name.to_ascii_lowercase()
                } else {
                    name
                };
                expr = Expr::Field(Box::new(expr), name);
            } else if self.eat(&Token::LBracket) {
                let index = self.or()?;
                self.expect(&Token::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Int(i)) => Ok(Expr::Literal(Value::Int(i))),
            Some(Token::Float(f)) => Ok(Expr::Literal(Value::Float(f))),
            Some(Token::Ident(word)) => Ok(match word.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" => Expr::Literal(Value::Null),
                _ => Expr::Root(Root::from_ident(&word)),
            }),
            Some(Token::LParen) => {
                let inner = self.or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(token) => Err(format!("unexpected token {token:?}")),
            None => Err("unexpected end of expression".into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

struct Context<'a> {
    exchange: &'a Exchange,
    flow: Flow,
}

impl Context<'_> {
    fn message(&self) -> &dyn HttpMessage {
        self.exchange.message(self.flow)
    }

    fn root(&self, root: &Root) -> Value {
        let request = self.exchange.request();
        match root {
            Root::Method => Value::from(request.method.as_str()),
            Root::Uri => Value::from(request.uri.as_str()),
            Root::Path => Value::from(request.path()),
            Root::Query => Value::Map(
                request
                    .query()
                    .unwrap_or_default()
                    .split('&')
                    .filter(|pair| !pair.is_empty())
                    .map(|pair| {
                        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                        (k.to_string(), Value::from(v))
                    })
                    .collect(),
            ),
            Root::Headers => {
                let mut map = BTreeMap::new();
                for (name, value) in self.message().headers() {
                    if let Ok(text) = value.to_str() {
                        map.entry(name.as_str().to_string())
                            .or_insert_with(|| Value::from(text));
                    }
                }
                Value::Map(map)
            }
            Root::Body => Value::String(self.message().body_text()),
            Root::Json => serde_json::from_slice::<serde_json::Value>(self.message().body())
                .map_or(Value::Null, Value::from),
            Root::StatusCode => self
                .exchange
                .response()
                .map_or(Value::Null, |r| Value::Int(i64::from(r.status.as_u16()))),
            Root::Properties => Value::Map(
                self.exchange
                    .properties()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            Root::Flow => Value::from(self.flow.as_str()),
            Root::Destinations => Value::Array(
                self.exchange
                    .destinations()
                    .iter()
                    .map(|d| Value::from(d.as_str()))
                    .collect(),
            ),
            Root::Property(name) => self.exchange.property(name).cloned().unwrap_or(Value::Null),
        }
    }

    fn eval(&self, expr: &Expr) -> Result<Value, ExpressionError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Root(root) => Ok(self.root(root)),
            Expr::Field(base, name) => {
                if let Expr::Root(Root::Properties) = base.as_ref() {
                    return Ok(self.exchange.property(name).cloned().unwrap_or(Value::Null));
                }
                access(&self.eval(base)?, &Value::from(name.as_str()))
            }
            Expr::Index(base, index) => {
                let mut key = self.eval(index)?;
                if base.is_headers() {
                    if let Value::String(s) = &mut key {
                        *s = s.to_ascii_lowercase();
                    }
                }
                access(&self.eval(base)?, &key)
            }
            Expr::Not(inner) => Ok(Value::Bool(!truthy(&self.eval(inner)?)?)),
            Expr::And(left, right) => {
                if !truthy(&self.eval(left)?)? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(truthy(&self.eval(right)?)?))
            }
            Expr::Or(left, right) => {
                if truthy(&self.eval(left)?)? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(truthy(&self.eval(right)?)?))
            }
            Expr::Compare(op, left, right) => {
                compare(*op, &self.eval(left)?, &self.eval(right)?).map(Value::Bool)
            }
            Expr::Matches(subject, regex) => Ok(Value::Bool(match self.eval(subject)? {
                Value::Null => false,
                other => regex.is_match(&other.to_string()),
            })),
        }
    }
}

fn access(base: &Value, key: &Value) -> Result<Value, ExpressionError> {
    match (base, key) {
        (Value::Null, _) => Err(ExpressionError::NullDereference {
            message: format!("cannot read '{key}' of null"),
        }),
        (Value::Map(map), Value::String(k)) => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
        (Value::Array(items), Value::Int(i)) => Ok(usize::try_from(*i)
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null)),
        (other, _) => Err(ExpressionError::evaluation(format!(
            "cannot read '{key}' of {}",
            other.type_name()
        ))),
    }
}

fn truthy(value: &Value) -> Result<bool, ExpressionError> {
    match value {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(*b),
        other => Err(ExpressionError::TypeMismatch {
            expected: "boolean",
            found: other.type_name(),
        }),
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, ExpressionError> {
    let ordering = match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            // numbers compared against their textual form, e.g. header values
            (Some(x), None) => b.as_str().and_then(|s| s.parse::<f64>().ok()).and_then(|y| x.partial_cmp(&y)),
            (None, Some(y)) => a.as_str().and_then(|s| s.parse::<f64>().ok()).and_then(|x| x.partial_cmp(&y)),
            (None, None) => {
                if matches!(op, CompareOp::Eq | CompareOp::Ne) {
                    return Ok((left == right) == (op == CompareOp::Eq));
                }
                return Err(ExpressionError::TypeMismatch {
                    expected: left.type_name(),
                    found: right.type_name(),
                });
            }
        },
    };

    Ok(match op {
        CompareOp::Eq => ordering == Some(Ordering::Equal),
        CompareOp::Ne => ordering != Some(Ordering::Equal),
        CompareOp::Lt => ordering == Some(Ordering::Less),
        CompareOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Gt => ordering == Some(Ordering::Greater),
        CompareOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
    })
}

// ---------------------------------------------------------------------------
// CompiledExpression
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(super) struct AttributeExpression {
    source: String,
    ast: Expr,
}

impl AttributeExpression {
    pub(super) fn compile(source: &str) -> Result<Self, ExpressionError> {
        let tokens =
            tokenize(source).map_err(|m| ExpressionError::compile(Language::Attribute, source, m))?;
        let ast = Parser { tokens, pos: 0 }
            .parse()
            .map_err(|m| ExpressionError::compile(Language::Attribute, source, m))?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }
}

impl CompiledExpression for AttributeExpression {
    fn language(&self) -> Language {
        Language::Attribute
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn evaluate(
        &self,
        exchange: &Exchange,
        flow: Flow,
        expected: ExpectedType,
    ) -> Result<Value, ExpressionError> {
        let value = Context { exchange, flow }.eval(&self.ast)?;
        Ok(match (expected, value) {
            (ExpectedType::String, Value::Null) => Value::Null,
            (ExpectedType::String, v @ Value::String(_)) => v,
            (ExpectedType::String, other) => Value::String(other.to_string()),
            (_, v) => v,
        })
    }
}
