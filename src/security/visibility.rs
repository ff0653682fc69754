use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Authorizations, SecurityError};

/// Boolean expression over authorization tokens gating read access to one fact.
///
/// Equality and ordering compare the raw expression string; `a&b` and `b&a`
/// are different visibilities even though they admit the same readers.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Visibility(String);

impl Visibility {
    /// Wraps an expression without validating it.
    pub fn new(expression: impl Into<String>) -> Self {
        Self(expression.into())
    }

    /// The empty visibility, readable by everyone.
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Raw expression text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for the everyone-readable visibility.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses the expression into an evaluable tree.
    pub fn parse(&self) -> Result<VisibilityExpr, SecurityError> {
        Parser::new(&self.0).parse()
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Visibility {
    fn from(value: &str) -> Self {
        Visibility::new(value)
    }
}

impl From<String> for Visibility {
    fn from(value: String) -> Self {
        Visibility(value)
    }
}

/// Parsed visibility expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VisibilityExpr {
    /// Empty expression; always readable.
    Always,
    /// Satisfied when the token is held.
    Token(Box<str>),
    /// Every child must hold.
    And(Vec<VisibilityExpr>),
    /// At least one child must hold.
    Or(Vec<VisibilityExpr>),
}

impl VisibilityExpr {
    /// Evaluates the expression against a token set. Never allocates.
    pub fn evaluate(&self, auths: &Authorizations) -> bool {
        match self {
            VisibilityExpr::Always => true,
            VisibilityExpr::Token(token) => auths.contains(token),
            VisibilityExpr::And(children) => children.iter().all(|c| c.evaluate(auths)),
            VisibilityExpr::Or(children) => children.iter().any(|c| c.evaluate(auths)),
        }
    }
}

/// Uncached read check. Hot paths go through
/// [`super::VisibilityEvaluator::can_read`] instead.
pub fn can_read(visibility: &Visibility, auths: &Authorizations) -> Result<bool, SecurityError> {
    if visibility.is_empty() {
        return Ok(true);
    }
    Ok(visibility.parse()?.evaluate(auths))
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b':' | b'.' | b'/')
}

/// Deepest parenthesis nesting accepted by the parser.
pub const MAX_NESTING_DEPTH: usize = 64;

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            depth: 0,
        }
    }

    fn parse(mut self) -> Result<VisibilityExpr, SecurityError> {
        if self.bytes.is_empty() {
            return Ok(VisibilityExpr::Always);
        }
        let expr = self.parse_group()?;
        if self.pos != self.bytes.len() {
            return Err(self.error("unbalanced closing parenthesis"));
        }
        Ok(expr)
    }

    fn error(&self, reason: &'static str) -> SecurityError {
        SecurityError::MalformedVisibility {
            expression: self.src.to_owned(),
            position: self.pos,
            reason,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    // Operators may not be mixed within one nesting level: `a&b|c` is rejected.
    fn parse_group(&mut self) -> Result<VisibilityExpr, SecurityError> {
        let mut terms = Vec::new();
        let mut op: Option<u8> = None;
        loop {
            terms.push(self.parse_term()?);
            match self.peek() {
                None | Some(b')') => break,
                Some(c @ (b'&' | b'|')) => {
                    if op.is_some_and(|prev| prev != c) {
                        return Err(self.error("cannot mix & and | without parentheses"));
                    }
                    op = Some(c);
                    self.pos += 1;
                }
                Some(_) => return Err(self.error("expected & or |")),
            }
        }
        if terms.len() == 1 {
            return Ok(terms.pop().unwrap_or(VisibilityExpr::Always));
        }
        Ok(match op {
            Some(b'|') => VisibilityExpr::Or(terms),
            _ => VisibilityExpr::And(terms),
        })
    }

    fn parse_term(&mut self) -> Result<VisibilityExpr, SecurityError> {
        match self.peek() {
            None => Err(self.error("expected term")),
            Some(b'(') => {
                self.pos += 1;
                if self.peek() == Some(b')') {
                    return Err(self.error("empty parentheses"));
                }
                if self.depth == MAX_NESTING_DEPTH {
                    return Err(self.error("nesting too deep"));
                }
                self.depth += 1;
                let inner = self.parse_group()?;
                self.depth -= 1;
                if self.peek() != Some(b')') {
                    return Err(self.error("unclosed parenthesis"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(b'"') => self.parse_quoted(),
            Some(b) if is_token_byte(b) => {
                let start = self.pos;
                while self.peek().is_some_and(is_token_byte) {
                    self.pos += 1;
                }
                Ok(VisibilityExpr::Token(self.src[start..self.pos].into()))
            }
            Some(_) => Err(self.error("unexpected character")),
        }
    }

    fn parse_quoted(&mut self) -> Result<VisibilityExpr, SecurityError> {
        self.pos += 1;
        let mut token = String::new();
        loop {
            let Some(b) = self.peek() else {
                return Err(self.error("unterminated quoted token"));
            };
            match b {
                b'"' => {
                    self.pos += 1;
                    break;
                }
                b'\\' => {
                    self.pos += 1;
                    match self.peek() {
                        Some(escaped @ (b'"' | b'\\')) => {
                            token.push(escaped as char);
                            self.pos += 1;
                        }
                        _ => return Err(self.error("invalid escape in quoted token")),
                    }
                }
                _ => {
                    // Copy the full UTF-8 scalar, not just one byte.
                    let rest = &self.src[self.pos..];
                    let ch = rest.chars().next().unwrap_or('\u{fffd}');
                    token.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
        if token.is_empty() {
            return Err(self.error("empty quoted token"));
        }
        Ok(VisibilityExpr::Token(token.into_boxed_str()))
    }
}
