use std::fmt;

use super::names::NameId;

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
    pub column: u32,
}

/// The three bracket families. They carry no meaning beyond having to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paren {
    Round,
    Square,
    Curly,
}

impl Paren {
    pub fn open(self) -> char {
        match self {
            Paren::Round => '(',
            Paren::Square => '[',
            Paren::Curly => '{',
        }
    }

    pub fn close(self) -> char {
        match self {
            Paren::Round => ')',
            Paren::Square => ']',
            Paren::Curly => '}',
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Delimiters
    Open(Paren),
    Close(Paren),
    Dot,

    // Prefix operators
    Quote,      // '
    Quasiquote, // `
    Unquote,    // ,
    Splice,     // @
    Record,     // #r

    // Literals
    Integer(i64),
    Boolean(bool),
    String(String),
    Void,

    Name(NameId),

    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Open(p) => write!(f, "{}", p.open()),
            TokenKind::Close(p) => write!(f, "{}", p.close()),
            TokenKind::Dot => write!(f, "."),
            TokenKind::Quote => write!(f, "'"),
            TokenKind::Quasiquote => write!(f, "`"),
            TokenKind::Unquote => write!(f, ","),
            TokenKind::Splice => write!(f, "@"),
            TokenKind::Record => write!(f, "#r"),
            TokenKind::Integer(n) => write!(f, "{n}"),
            TokenKind::Boolean(true) => write!(f, "#t"),
            TokenKind::Boolean(false) => write!(f, "#f"),
            TokenKind::String(s) => write!(f, "\"{s}\""),
            TokenKind::Void => write!(f, "#void"),
            TokenKind::Name(id) => write!(f, "name#{id}"),
            TokenKind::Eof => write!(f, "end of input"),
        }
    }
}
