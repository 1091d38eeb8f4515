pub mod names;
mod token;

#[cfg(test)]
mod tests;

pub use names::{NameId, Names};
pub use token::{Paren, Span, Token, TokenKind};

use std::str::Chars;

pub struct Lexer<'a> {
    source: &'a str,
    chars: Chars<'a>,
    position: usize,
    line: u32,
    column: u32,
    names: &'a mut Names,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, column {}: {}", self.line, self.column, self.message)
    }
}

impl std::error::Error for LexError {}

const CHARACTER_NAMES: [(&str, i64); 8] = [
    ("alarm", 7),
    ("backspace", 8),
    ("tab", 9),
    ("newline", 10),
    ("return", 13),
    ("escape", 27),
    ("space", 32),
    ("delete", 127),
];

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || "!$%&*+-./:<=>?@^_~".contains(c)
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, names: &'a mut Names) -> Self {
        Self {
            source,
            chars: source.chars(),
            position: 0,
            line: 1,
            column: 1,
            names,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexError> {
        if self.source.starts_with("#!") {
            while let Some(c) = self.peek() {
                if c == '\n' {
                    break;
                }
                self.advance();
            }
        }

        let mut tokens = Vec::new();

        loop {
            let token = self.next_token()?;
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }

        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_trivia()?;

        let start_position = self.position;
        let start_line = self.line;
        let start_column = self.column;

        let kind = match self.peek() {
            None => TokenKind::Eof,
            Some(c) => match c {
                '(' | '[' | '{' => {
                    self.advance();
                    TokenKind::Open(paren_of(c))
                }
                ')' | ']' | '}' => {
                    self.advance();
                    TokenKind::Close(paren_of(c))
                }
                '\'' => {
                    self.advance();
                    TokenKind::Quote
                }
                '`' => {
                    self.advance();
                    TokenKind::Quasiquote
                }
                ',' => {
                    self.advance();
                    TokenKind::Unquote
                }
                '@' => {
                    self.advance();
                    TokenKind::Splice
                }

                '#' => self.hash()?,

                '"' => self.string()?,

                c if is_name_char(c) => self.atom()?,

                c => {
                    return Err(LexError {
                        message: format!("Unexpected character '{c}'"),
                        line: start_line,
                        column: start_column,
                    });
                }
            },
        };

        let span = Span {
            start: start_position,
            end: self.position,
            line: start_line,
            column: start_column,
        };

        Ok(Token { kind, span })
    }

    fn peek(&self) -> Option<char> {
        self.chars.clone().next()
    }

    fn peek_next(&self) -> Option<char> {
        let mut chars = self.chars.clone();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.position += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>, line: u32, column: u32) -> LexError {
        LexError {
            message: message.into(),
            line,
            column,
        }
    }

    /// Skips whitespace, `;` line comments and `#| ... |#` block comments.
    /// Block comments do not nest: the first `|#` closes them.
    fn skip_trivia(&mut self) -> Result<(), LexError> {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else if c == ';' {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else if c == '#' && self.peek_next() == Some('|') {
                let (line, column) = (self.line, self.column);
                self.advance();
                self.advance();
                let mut previous = None;
                loop {
                    match self.advance() {
                        None => return Err(self.error("Unterminated '#|' comment", line, column)),
                        Some('#') if previous == Some('|') => break,
                        current => previous = current,
                    }
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    fn word(&mut self, accept: impl Fn(char) -> bool) -> &'a str {
        let start = self.position;
        while let Some(c) = self.peek() {
            if !accept(c) {
                break;
            }
            self.advance();
        }
        &self.source[start..self.position]
    }

    fn atom(&mut self) -> Result<TokenKind, LexError> {
        let (line, column) = (self.line, self.column);
        let text = self.word(is_name_char);

        if text == "." {
            return Ok(TokenKind::Dot);
        }
        if text.starts_with('.') {
            return Err(self.error(format!("Name '{text}' cannot begin with '.'"), line, column));
        }

        let mut chars = text.chars();
        let first = chars.next();
        let second = chars.next();
        let numeric = match first {
            Some(c) if c.is_ascii_digit() => true,
            Some('+' | '-') => second.is_some_and(|c| c.is_ascii_digit()),
            _ => false,
        };

        if numeric {
            return parse_integer(text)
                .map(TokenKind::Integer)
                .ok_or_else(|| self.error(format!("Invalid integer literal: {text}"), line, column));
        }

        Ok(TokenKind::Name(self.names.intern(text)))
    }

    fn hash(&mut self) -> Result<TokenKind, LexError> {
        let (line, column) = (self.line, self.column);
        self.advance();

        match self.peek() {
            None => Err(self.error("Input ends at '#'", line, column)),
            Some('\\') => {
                self.advance();
                self.character(line, column)
            }
            Some(c) if c.is_whitespace() => Err(self.error("'#' followed by space", line, column)),
            Some(c) if !c.is_alphanumeric() => {
                Err(self.error(format!("Unknown '#{c}' syntax"), line, column))
            }
            Some(_) => {
                let word = self.word(char::is_alphanumeric);
                match word {
                    "t" | "true" => Ok(TokenKind::Boolean(true)),
                    "f" | "false" => Ok(TokenKind::Boolean(false)),
                    "void" => Ok(TokenKind::Void),
                    "r" => Ok(TokenKind::Record),
                    _ if word.starts_with(['t', 'f']) => {
                        Err(self.error(format!("Expected #t or #f, got '#{word}'"), line, column))
                    }
                    _ if word.starts_with(['b', 'o', 'd', 'x']) => {
                        let radix = match &word[..1] {
                            "b" => 2,
                            "o" => 8,
                            "d" => 10,
                            _ => 16,
                        };
                        i64::from_str_radix(&word[1..], radix)
                            .map(TokenKind::Integer)
                            .map_err(|_| {
                                self.error(format!("Invalid numeric literal '#{word}'"), line, column)
                            })
                    }
                    _ => Err(self.error(format!("Unknown '#{word}' syntax"), line, column)),
                }
            }
        }
    }

    /// Character literals denote their code point; there is no character type.
    fn character(&mut self, line: u32, column: u32) -> Result<TokenKind, LexError> {
        match self.peek() {
            None => Err(self.error("Input ends at '#\\'", line, column)),
            Some(c) if c.is_whitespace() => {
                Err(self.error("'#\\' followed by space", line, column))
            }
            Some(c) if !c.is_alphanumeric() => {
                self.advance();
                Ok(TokenKind::Integer(c as i64))
            }
            Some(_) => {
                let word = self.word(char::is_alphanumeric);
                let mut chars = word.chars();
                if let (Some(c), None) = (chars.next(), chars.next()) {
                    return Ok(TokenKind::Integer(c as i64));
                }
                CHARACTER_NAMES
                    .iter()
                    .find(|(name, _)| *name == word)
                    .map(|(_, code)| TokenKind::Integer(*code))
                    .ok_or_else(|| {
                        self.error(format!("Unknown character name '#\\{word}'"), line, column)
                    })
            }
        }
    }

    fn string(&mut self) -> Result<TokenKind, LexError> {
        let start_line = self.line;
        let start_column = self.column;

        self.advance();

        let mut value = String::new();

        loop {
            match self.peek() {
                None => {
                    return Err(self.error("Unterminated string literal", start_line, start_column));
                }
                Some('"') => {
                    self.advance();
                    break;
                }
                Some('\\') => {
                    self.advance();
                    let (line, column) = (self.line, self.column);
                    match self.advance() {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('r') => value.push('\r'),
                        Some('"') => value.push('"'),
                        Some('\\') => value.push('\\'),
                        Some(c) if c.is_digit(8) => {
                            let mut code = c.to_digit(8).unwrap_or(0);
                            while let Some(d) = self.peek().and_then(|c| c.to_digit(8)) {
                                self.advance();
                                code = code * 8 + d;
                                if code > 255 {
                                    return Err(self.error("Octal escape overflows a byte", line, column));
                                }
                            }
                            value.push(char::from(code as u8));
                        }
                        Some(c) => {
                            return Err(self.error(format!("Invalid escape sequence: \\{c}"), line, column));
                        }
                        None => {
                            return Err(self.error("Unterminated string literal", start_line, start_column));
                        }
                    }
                }
                Some(c) => {
                    self.advance();
                    value.push(c);
                }
            }
        }

        Ok(TokenKind::String(value))
    }
}

fn paren_of(c: char) -> Paren {
    match c {
        '(' | ')' => Paren::Round,
        '[' | ']' => Paren::Square,
        _ => Paren::Curly,
    }
}

/// Decimal with optional sign, `_` separators and `0x`/`0o`/`0b` prefixes.
fn parse_integer(text: &str) -> Option<i64> {
    let cleaned: String = text.chars().filter(|&c| c != '_').collect();
    let (negative, digits) = match cleaned.as_bytes().first() {
        Some(b'-') => (true, &cleaned[1..]),
        Some(b'+') => (false, &cleaned[1..]),
        _ => (false, cleaned.as_str()),
    };
    let (radix, digits) = match digits.get(..2) {
        Some("0x" | "0X") => (16, &digits[2..]),
        Some("0o" | "0O") => (8, &digits[2..]),
        Some("0b" | "0B") => (2, &digits[2..]),
        _ => (10, digits),
    };
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    let magnitude = i128::from_str_radix(digits, radix).ok()?;
    let value = if negative { -magnitude } else { magnitude };
    i64::try_from(value).ok()
}
