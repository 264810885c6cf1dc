//! View and search expression parser.
//!
//! Expressions are s-expressions in the style of mail client search
//! grammars:
//!
//! ```text
//! (match-all (flagged))
//! (match-all (and (not (seen)) (user-flag "work")))
//! (or (header-contains "subject" "invoice" "receipt")
//!     (user-tag "label" "billing"))
//! (and (sent-after "2024-01-01") (size-greater "1mb"))
//! ```
//!
//! # Supported forms
//!
//! - `#t`, `#f`
//! - `(match-all EXPR)`, `(and EXPR…)`, `(or EXPR…)`, `(not EXPR)`
//! - `(system-flag "name")` and the shorthands `(seen)`, `(flagged)`,
//!   `(deleted)`, `(junk)`, `(draft)`, `(answered)`
//! - `(user-flag "name")`
//! - `(user-tag "name")` (tag is set) / `(user-tag "name" "value")`
//! - `(header-contains HEADER "text"…)`, `(header-matches HEADER "text")`,
//!   `(header-starts-with HEADER "text")`, `(header-exists HEADER)`
//!   where HEADER is `subject`, `from`, `to`, `cc` or `mailing-list`
//! - `(sent-before "YYYY-MM-DD")`, `(sent-after "YYYY-MM-DD")`
//! - `(size-greater "1mb")`, `(size-less "100kb")`

use chrono::NaiveDate;

use crate::error::{Result, SummaryError};
use crate::model::flags::MessageFlags;

/// Header fields an expression can inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderField {
    Subject,
    From,
    To,
    Cc,
    MailingList,
}

impl HeaderField {
    fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "subject" => Some(Self::Subject),
            "from" => Some(Self::From),
            "to" => Some(Self::To),
            "cc" => Some(Self::Cc),
            "mailing-list" | "x-camel-mlist" | "list" => Some(Self::MailingList),
            _ => None,
        }
    }
}

/// How header text is compared. Needles are stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextMatch {
    Contains(Vec<String>),
    Equals(String),
    StartsWith(String),
    Exists,
}

/// A parsed boolean predicate over one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Const(bool),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    SystemFlag(MessageFlags),
    UserFlag(String),
    UserTag { name: String, value: Option<String> },
    Header { field: HeaderField, test: TextMatch },
    SentBefore(NaiveDate),
    SentAfter(NaiveDate),
    SizeGreater(u64),
    SizeLess(u64),
}

impl Predicate {
    /// Parse an expression string.
    pub fn parse(input: &str) -> Result<Predicate> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let predicate = parser.parse_expr()?;
        if let Some(tok) = parser.tokens.get(parser.pos) {
            return Err(SummaryError::expression(tok.offset, "trailing input"));
        }
        Ok(predicate)
    }

    /// Whether the predicate reads only header-derived fields.
    ///
    /// Membership of a record in a static view is fixed once the record is
    /// indexed; flag and tag changes cannot move it in or out.
    pub fn is_static(&self) -> bool {
        match self {
            Predicate::Const(_)
            | Predicate::Header { .. }
            | Predicate::SentBefore(_)
            | Predicate::SentAfter(_)
            | Predicate::SizeGreater(_)
            | Predicate::SizeLess(_) => true,
            Predicate::SystemFlag(_) | Predicate::UserFlag(_) | Predicate::UserTag { .. } => false,
            Predicate::And(items) | Predicate::Or(items) => items.iter().all(Predicate::is_static),
            Predicate::Not(inner) => inner.is_static(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Open,
    Close,
    Str(String),
    Symbol(String),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

/// Split input into parens, quoted strings and bare symbols.
fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(offset, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token { kind: TokenKind::Open, offset });
            }
            ')' => {
                chars.next();
                tokens.push(Token { kind: TokenKind::Close, offset });
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => {
                            if let Some((_, escaped)) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        c => value.push(c),
                    }
                }
                if !closed {
                    return Err(SummaryError::expression(offset, "unterminated string"));
                }
                tokens.push(Token {
                    kind: TokenKind::Str(value),
                    offset,
                });
            }
            _ => {
                let mut symbol = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' || c == '"' {
                        break;
                    }
                    symbol.push(c);
                    chars.next();
                }
                tokens.push(Token {
                    kind: TokenKind::Symbol(symbol),
                    offset,
                });
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn end_offset(&self) -> usize {
        self.tokens.last().map_or(0, |t| t.offset + 1)
    }

    fn next(&mut self) -> Result<Token> {
        let tok = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| SummaryError::expression(self.end_offset(), "unexpected end of input"))?;
        self.pos += 1;
        Ok(tok)
    }

    fn peek_close(&self) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token { kind: TokenKind::Close, .. }))
    }

    fn parse_expr(&mut self) -> Result<Predicate> {
        let tok = self.next()?;
        match tok.kind {
            TokenKind::Symbol(s) if s == "#t" => Ok(Predicate::Const(true)),
            TokenKind::Symbol(s) if s == "#f" => Ok(Predicate::Const(false)),
            TokenKind::Open => self.parse_form(),
            TokenKind::Close => Err(SummaryError::expression(tok.offset, "unexpected ')'")),
            TokenKind::Str(_) | TokenKind::Symbol(_) => Err(SummaryError::expression(
                tok.offset,
                "expected '(' or a boolean constant",
            )),
        }
    }

    /// Parse everything after an opening paren, including the closing one.
    fn parse_form(&mut self) -> Result<Predicate> {
        let head = self.next()?;
        let name = match head.kind {
            TokenKind::Symbol(s) => s,
            _ => return Err(SummaryError::expression(head.offset, "expected a form name")),
        };

        let predicate = match name.as_str() {
            "match-all" => {
                if self.peek_close() {
                    Predicate::Const(true)
                } else {
                    self.parse_expr()?
                }
            }
            "and" => Predicate::And(self.parse_list()?),
            "or" => Predicate::Or(self.parse_list()?),
            "not" => Predicate::Not(Box::new(self.parse_expr()?)),
            "system-flag" => {
                let flag_name = self.string_arg()?;
                let flag = MessageFlags::from_flag_name(&flag_name).ok_or_else(|| {
                    SummaryError::expression(head.offset, format!("unknown system flag '{flag_name}'"))
                })?;
                Predicate::SystemFlag(flag)
            }
            "user-flag" => Predicate::UserFlag(self.string_arg()?),
            "user-tag" => {
                let tag = self.string_arg()?;
                let value = if self.peek_close() {
                    None
                } else {
                    Some(self.string_arg()?)
                };
                Predicate::UserTag { name: tag, value }
            }
            "header-contains" => {
                let field = self.header_arg()?;
                let mut needles = vec![self.string_arg()?.to_lowercase()];
                while !self.peek_close() {
                    needles.push(self.string_arg()?.to_lowercase());
                }
                Predicate::Header {
                    field,
                    test: TextMatch::Contains(needles),
                }
            }
            "header-matches" => {
                let field = self.header_arg()?;
                Predicate::Header {
                    field,
                    test: TextMatch::Equals(self.string_arg()?.to_lowercase()),
                }
            }
            "header-starts-with" => {
                let field = self.header_arg()?;
                Predicate::Header {
                    field,
                    test: TextMatch::StartsWith(self.string_arg()?.to_lowercase()),
                }
            }
            "header-exists" => Predicate::Header {
                field: self.header_arg()?,
                test: TextMatch::Exists,
            },
            "sent-before" => Predicate::SentBefore(self.date_arg()?),
            "sent-after" => Predicate::SentAfter(self.date_arg()?),
            "size-greater" => Predicate::SizeGreater(self.size_arg()?),
            "size-less" => Predicate::SizeLess(self.size_arg()?),
            other => match MessageFlags::from_flag_name(other) {
                Some(flag) => Predicate::SystemFlag(flag),
                None => {
                    return Err(SummaryError::expression(
                        head.offset,
                        format!("unknown form '{other}'"),
                    ))
                }
            },
        };

        let close = self.next()?;
        if close.kind != TokenKind::Close {
            return Err(SummaryError::expression(close.offset, "expected ')'"));
        }
        Ok(predicate)
    }

    fn parse_list(&mut self) -> Result<Vec<Predicate>> {
        let mut items = Vec::new();
        while !self.peek_close() {
            items.push(self.parse_expr()?);
        }
        Ok(items)
    }

    fn string_arg(&mut self) -> Result<String> {
        let tok = self.next()?;
        match tok.kind {
            TokenKind::Str(s) => Ok(s),
            _ => Err(SummaryError::expression(tok.offset, "expected a string")),
        }
    }

    fn header_arg(&mut self) -> Result<HeaderField> {
        let tok = self.next()?;
        let name = match tok.kind {
            TokenKind::Str(s) | TokenKind::Symbol(s) => s,
            _ => return Err(SummaryError::expression(tok.offset, "expected a header name")),
        };
        HeaderField::from_name(&name)
            .ok_or_else(|| SummaryError::expression(tok.offset, format!("unsupported header '{name}'")))
    }

    fn date_arg(&mut self) -> Result<NaiveDate> {
        let offset = self.tokens.get(self.pos).map_or(0, |t| t.offset);
        let value = self.string_arg()?;
        NaiveDate::parse_from_str(&value, "%Y-%m-%d")
            .map_err(|_| SummaryError::expression(offset, format!("invalid date '{value}'")))
    }

    fn size_arg(&mut self) -> Result<u64> {
        let offset = self.tokens.get(self.pos).map_or(0, |t| t.offset);
        let value = self.string_arg()?;
        parse_size(&value)
            .ok_or_else(|| SummaryError::expression(offset, format!("invalid size '{value}'")))
    }
}

/// Parse a size like `1mb`, `100kb`, `512b` or `2048`.
fn parse_size(value: &str) -> Option<u64> {
    let lower = value.trim().to_lowercase();
    let (num_str, multiplier) = if let Some(n) = lower.strip_suffix("gb") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("mb") {
        (n, 1024 * 1024)
    } else if let Some(n) = lower.strip_suffix("kb") {
        (n, 1024)
    } else if let Some(n) = lower.strip_suffix('b') {
        (n, 1u64)
    } else {
        (lower.as_str(), 1u64)
    };
    let num: u64 = num_str.trim().parse().ok()?;
    num.checked_mul(multiplier)
}
