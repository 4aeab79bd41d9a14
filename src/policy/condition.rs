//! Execution conditions.
//!
//! # Responsibilities
//! - Parse a policy's `execution_condition` once, at chain build time
//! - Evaluate it per request against the request (and response) context
//!
//! # Grammar
//! ```text
//! expr     := and ( "||" and )*
//! and      := unary ( "&&" unary )*
//! unary    := "!" unary | primary
//! primary  := "(" expr ")" | "true" | "false" | operand tail
//! tail     := ( "==" | "!=" ) operand
//!           | "." ( "startsWith" | "endsWith" | "contains" ) "(" operand ")"
//! operand  := string | field
//! field    := "request.method" | "request.path" | "request.authority"
//!           | "request.scheme" | "request.route_key"
//!           | "request.headers[" string "]" | "request.metadata[" string "]"
//!           | "response.status" | "response.headers[" string "]"
//! ```
//!
//! # Design Decisions
//! - No regex and no user-defined functions: evaluation is O(expression size)
//! - An absent field never equals a literal, and `!=` against it is true
//! - Header names compare case-insensitively; values compare exactly

use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

use crate::policy::context::ConditionContext;

/// Errors produced while parsing a condition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConditionError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),

    #[error("unexpected token {found}, expected {expected}")]
    UnexpectedToken { found: String, expected: &'static str },

    #[error("unexpected end of expression, expected {0}")]
    UnexpectedEnd(&'static str),

    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("unknown method '{0}'")]
    UnknownMethod(String),

    #[error("expression is empty")]
    Empty,
}

/// A compiled execution condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    /// Compile a condition expression.
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ConditionError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(ConditionError::UnexpectedToken {
                found: token.to_string(),
                expected: "end of expression",
            });
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// Evaluate against a request or response context.
    pub fn evaluate(&self, ctx: &dyn ConditionContext) -> bool {
        self.expr.eval(ctx)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Bool(bool),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        lhs: Operand,
        negate: bool,
        rhs: Operand,
    },
    Call {
        target: Operand,
        method: StrMethod,
        arg: Operand,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrMethod {
    StartsWith,
    EndsWith,
    Contains,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operand {
    Literal(String),
    Field(Field),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Field {
    Method,
    Path,
    Authority,
    Scheme,
    RouteKey,
    Header(String),
    Metadata(String),
    ResponseStatus,
    ResponseHeader(String),
}

impl Operand {
    fn resolve<'a>(&'a self, ctx: &'a dyn ConditionContext) -> Option<Cow<'a, str>> {
        let field = match self {
            Operand::Literal(s) => return Some(Cow::Borrowed(s.as_str())),
            Operand::Field(field) => field,
        };
        let request = ctx.request();
        match field {
            Field::Method => Some(Cow::Borrowed(request.method.as_str())),
            Field::Path => Some(Cow::Borrowed(request.path.as_str())),
            Field::Authority => Some(Cow::Borrowed(request.authority.as_str())),
            Field::Scheme => Some(Cow::Borrowed(request.scheme.as_str())),
            Field::RouteKey => Some(Cow::Borrowed(request.route_key.as_str())),
            Field::Header(name) => request.headers.get(name).map(Cow::Borrowed),
            Field::Metadata(key) => ctx.metadata_value(key),
            Field::ResponseStatus => ctx.response_status().map(|s| Cow::Owned(s.to_string())),
            Field::ResponseHeader(name) => ctx.response_header(name).map(Cow::Borrowed),
        }
    }
}

impl Expr {
    fn eval(&self, ctx: &dyn ConditionContext) -> bool {
        match self {
            Expr::Bool(b) => *b,
            Expr::Not(inner) => !inner.eval(ctx),
            Expr::And(a, b) => a.eval(ctx) && b.eval(ctx),
            Expr::Or(a, b) => a.eval(ctx) || b.eval(ctx),
            Expr::Compare { lhs, negate, rhs } => {
                let equal = match (lhs.resolve(ctx), rhs.resolve(ctx)) {
                    (Some(l), Some(r)) => l == r,
                    _ => false,
                };
                equal != *negate
            }
            Expr::Call { target, method, arg } => {
                let (Some(target), Some(arg)) = (target.resolve(ctx), arg.resolve(ctx)) else {
                    return false;
                };
                match method {
                    StrMethod::StartsWith => target.starts_with(arg.as_ref()),
                    StrMethod::EndsWith => target.ends_with(arg.as_ref()),
                    StrMethod::Contains => target.contains(arg.as_ref()),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Not,
    Eq,
    Ne,
    And,
    Or,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "'{}'", s),
            Token::Str(s) => write!(f, "string \"{}\"", s),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::LBracket => f.write_str("'['"),
            Token::RBracket => f.write_str("']'"),
            Token::Dot => f.write_str("'.'"),
            Token::Not => f.write_str("'!'"),
            Token::Eq => f.write_str("'=='"),
            Token::Ne => f.write_str("'!='"),
            Token::And => f.write_str("'&&'"),
            Token::Or => f.write_str("'||'"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ConditionError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, ch) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);
        match ch {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
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
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '"' | '\'' => {
                let quote = ch;
                let mut value = String::new();
                let mut j = i + 1;
                let mut closed = false;
                while j < chars.len() {
                    let c = chars[j].1;
                    if c == '\\' {
                        if let Some((_, escaped)) = chars.get(j + 1) {
                            value.push(*escaped);
                            j += 2;
                            continue;
                        }
                    }
                    if c == quote {
                        closed = true;
                        break;
                    }
                    value.push(c);
                    j += 1;
                }
                if !closed {
                    return Err(ConditionError::UnterminatedString(offset));
                }
                tokens.push(Token::Str(value));
                i = j + 1;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some((_, c)) = chars.get(i) {
                    if c.is_ascii_alphanumeric() || *c == '_' || *c == '-' {
                        ident.push(*c);
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            // Bare numbers are accepted as literals so `response.status == 503`
            // reads naturally.
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some((_, c)) = chars.get(i) {
                    if c.is_ascii_digit() {
                        digits.push(*c);
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Str(digits));
            }
            _ => return Err(ConditionError::UnexpectedChar { ch, offset }),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self, expected: &'static str) -> Result<Token, ConditionError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(ConditionError::UnexpectedEnd(expected))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, want: Token, expected: &'static str) -> Result<(), ConditionError> {
        let token = self.next(expected)?;
        if token == want {
            Ok(())
        } else {
            Err(ConditionError::UnexpectedToken {
                found: token.to_string(),
                expected,
            })
        }
    }

    fn expect_ident(&mut self, expected: &'static str) -> Result<String, ConditionError> {
        match self.next(expected)? {
            Token::Ident(name) => Ok(name),
            other => Err(ConditionError::UnexpectedToken {
                found: other.to_string(),
                expected,
            }),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                let expr = self.parse_or()?;
                self.expect(Token::RParen, "')'")?;
                return Ok(expr);
            }
            Some(Token::Ident(name)) if name == "true" || name == "false" => {
                let value = name == "true";
                self.pos += 1;
                return Ok(Expr::Bool(value));
            }
            _ => {}
        }

        let lhs = self.parse_operand()?;
        match self.next("comparison or method call")? {
            Token::Eq => Ok(Expr::Compare {
                lhs,
                negate: false,
                rhs: self.parse_operand()?,
            }),
            Token::Ne => Ok(Expr::Compare {
                lhs,
                negate: true,
                rhs: self.parse_operand()?,
            }),
            Token::Dot => {
                let name = self.expect_ident("method name")?;
                let method = match name.as_str() {
                    "startsWith" => StrMethod::StartsWith,
                    "endsWith" => StrMethod::EndsWith,
                    "contains" => StrMethod::Contains,
                    _ => return Err(ConditionError::UnknownMethod(name)),
                };
                self.expect(Token::LParen, "'('")?;
                let arg = self.parse_operand()?;
                self.expect(Token::RParen, "')'")?;
                Ok(Expr::Call {
                    target: lhs,
                    method,
                    arg,
                })
            }
            other => Err(ConditionError::UnexpectedToken {
                found: other.to_string(),
                expected: "comparison or method call",
            }),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, ConditionError> {
        match self.next("operand")? {
            Token::Str(s) => Ok(Operand::Literal(s)),
            Token::Ident(root) => self.parse_field(root).map(Operand::Field),
            other => Err(ConditionError::UnexpectedToken {
                found: other.to_string(),
                expected: "operand",
            }),
        }
    }

    fn parse_field(&mut self, root: String) -> Result<Field, ConditionError> {
        if root != "request" && root != "response" {
            return Err(ConditionError::UnknownField(root));
        }
        self.expect(Token::Dot, "'.'")?;
        let name = self.expect_ident("field name")?;
        let path = format!("{}.{}", root, name);

        let field = match path.as_str() {
            "request.method" => Field::Method,
            "request.path" => Field::Path,
            "request.authority" => Field::Authority,
            "request.scheme" => Field::Scheme,
            "request.route_key" => Field::RouteKey,
            "response.status" => Field::ResponseStatus,
            "request.headers" => Field::Header(self.parse_index()?),
            "request.metadata" => Field::Metadata(self.parse_index()?),
            "response.headers" => Field::ResponseHeader(self.parse_index()?),
            _ => return Err(ConditionError::UnknownField(path)),
        };
        Ok(field)
    }

    fn parse_index(&mut self) -> Result<String, ConditionError> {
        self.expect(Token::LBracket, "'['")?;
        let key = match self.next("string index")? {
            Token::Str(s) => s,
            other => {
                return Err(ConditionError::UnexpectedToken {
                    found: other.to_string(),
                    expected: "string index",
                })
            }
        };
        self.expect(Token::RBracket, "']'")?;
        Ok(key)
    }
}
