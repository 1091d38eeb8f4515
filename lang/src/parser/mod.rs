pub mod ast;

#[cfg(test)]
mod tests;

pub use ast::*;

use std::rc::Rc;

use crate::expander::quote::quote;
use crate::lexer::names::{self, NameId};
use crate::lexer::{Paren, Span, Token, TokenKind};

pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
    /// The input ended while a datum was still open; more text could fix it.
    pub incomplete: bool,
}

impl ParseError {
    fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            incomplete: false,
        }
    }

    fn incomplete(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            incomplete: true,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.span.line, self.message)
    }
}

impl std::error::Error for ParseError {}

const END: Span = Span {
    start: 0,
    end: 0,
    line: 1,
    column: 1,
};

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
        }
    }

    pub fn parse_program(&mut self) -> Result<Vec<Syntax>, ParseError> {
        let mut forms = Vec::new();

        while !self.is_at_end() {
            forms.push(self.parse_datum()?);
        }

        Ok(forms)
    }

    /// Reads exactly one datum. Prefix tokens (`'`, `` ` ``, `,`, `@`)
    /// become explicit forms headed by the corresponding macro name.
    pub fn parse_datum(&mut self) -> Result<Syntax, ParseError> {
        let Some(token) = self.advance() else {
            let span = self.peek().map(|t| t.span).unwrap_or(END);
            return Err(ParseError::incomplete("Unexpected end of input", span));
        };

        match token.kind {
            TokenKind::Open(paren) => self.parse_form(paren, token.span),
            TokenKind::Close(paren) => Err(ParseError::new(
                format!(
                    "parens '{}' at line {} does not match any open paren",
                    paren.close(),
                    token.span.line
                ),
                token.span,
            )),
            TokenKind::Quote => self.parse_prefixed(names::QUOTE, "quote", token.span),
            TokenKind::Quasiquote => {
                self.parse_prefixed(names::QUASIQUOTE, "quasiquote", token.span)
            }
            TokenKind::Unquote => self.parse_prefixed(names::UNQUOTE, "unquote", token.span),
            TokenKind::Splice => self.parse_prefixed(names::SPLICE, "splice", token.span),
            TokenKind::Record => self.parse_record(token.span),
            TokenKind::Integer(n) => Ok(Syntax::Integer(n)),
            TokenKind::Boolean(b) => Ok(Syntax::Boolean(b)),
            TokenKind::String(s) => Ok(Syntax::Str(Rc::from(s))),
            TokenKind::Void => Ok(Syntax::Void),
            TokenKind::Dot => Ok(Syntax::Dot),
            TokenKind::Name(id) => Ok(Syntax::Name(id, token.span.line)),
            TokenKind::Eof => Err(ParseError::incomplete("Unexpected end of input", token.span)),
        }
    }

    fn parse_form(&mut self, open: Paren, open_span: Span) -> Result<Syntax, ParseError> {
        let mut items = Vec::new();

        loop {
            match self.peek().map(|t| (t.kind.clone(), t.span)) {
                Some((TokenKind::Close(close), span)) => {
                    self.advance();
                    if close != open {
                        return Err(ParseError::new(
                            format!(
                                "parens '{}' at line {} does not match '{}' at line {}",
                                close.close(),
                                span.line,
                                open.open(),
                                open_span.line
                            ),
                            span,
                        ));
                    }
                    return Ok(Syntax::Form(items));
                }
                Some((TokenKind::Eof, _)) | None => {
                    return Err(ParseError::incomplete(
                        format!("parens '{}' at line {} not closed", open.open(), open_span.line),
                        open_span,
                    ));
                }
                Some(_) => items.push(self.parse_datum()?),
            }
        }
    }

    fn parse_prefixed(&mut self, head: NameId, what: &str, span: Span) -> Result<Syntax, ParseError> {
        match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Eof) | None => Err(ParseError::incomplete(
                format!("{what} must be followed by a datum"),
                span,
            )),
            Some(TokenKind::Close(_)) => Err(ParseError::new(
                format!("{what} must be followed by a datum"),
                span,
            )),
            Some(_) => {
                let datum = self.parse_datum()?;
                Ok(Syntax::Form(vec![Syntax::Name(head, span.line), datum]))
            }
        }
    }

    /// `#r(name field...)` holds quoted data, never expressions.
    fn parse_record(&mut self, span: Span) -> Result<Syntax, ParseError> {
        let open = match self.peek().map(|t| (t.kind.clone(), t.span)) {
            Some((TokenKind::Open(paren), open_span)) => {
                self.advance();
                (paren, open_span)
            }
            Some((TokenKind::Eof, _)) | None => {
                return Err(ParseError::incomplete("#r takes a form", span));
            }
            Some(_) => return Err(ParseError::new("#r takes a form", span)),
        };

        let Syntax::Form(items) = self.parse_form(open.0, open.1)? else {
            return Err(ParseError::new("#r takes a form", span));
        };
        if !matches!(items.first(), Some(Syntax::Name(..))) {
            return Err(ParseError::new("#r expects a record name", span));
        }

        let fields = items
            .into_iter()
            .map(|item| quote(item, false))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ParseError::new(e.message, span))?;

        Ok(Syntax::Record(fields))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        if self.is_at_end() {
            None
        } else {
            let token = self.tokens[self.position].clone();
            self.position += 1;
            Some(token)
        }
    }

    pub fn is_at_end(&self) -> bool {
        self.peek()
            .map(|t| t.kind == TokenKind::Eof)
            .unwrap_or(true)
    }
}
