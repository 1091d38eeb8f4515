use crate::expander::ExpandError;
use crate::lexer::LexError;
use crate::parser::ParseError;
use crate::vm::runtime::{RunError, RunErrorKind};
use std::fmt;

/// Unified error type for every stage of a session
#[derive(Debug)]
pub enum HumbleError {
    Lex(LexError),
    Parse(ParseError),
    Expand(ExpandError),
    Run(RunError),
}

impl From<LexError> for HumbleError {
    fn from(err: LexError) -> Self {
        HumbleError::Lex(err)
    }
}

impl From<ParseError> for HumbleError {
    fn from(err: ParseError) -> Self {
        HumbleError::Parse(err)
    }
}

impl From<ExpandError> for HumbleError {
    fn from(err: ExpandError) -> Self {
        HumbleError::Expand(err)
    }
}

impl From<RunError> for HumbleError {
    fn from(err: RunError) -> Self {
        HumbleError::Run(err)
    }
}

impl fmt::Display for HumbleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, line, column, message) = self.parts();
        write!(f, "{kind} at line {line}")?;
        if column > 0 {
            write!(f, ", column {column}")?;
        }
        write!(f, ": {message}")
    }
}

impl std::error::Error for HumbleError {}

impl HumbleError {
    /// Lexical, parse and expansion errors: the unit never started running.
    pub fn is_source_error(&self) -> bool {
        !matches!(self, HumbleError::Run(_))
    }

    /// The source ended inside an open datum.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, HumbleError::Parse(err) if err.incomplete)
    }

    /// The internal invariant check failed; the session must not continue.
    pub fn is_broken(&self) -> bool {
        matches!(self, HumbleError::Run(err) if err.kind == RunErrorKind::Broken)
    }

    /// Exit code requested by `(exit n)`, if that is what unwound.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            HumbleError::Run(RunError {
                kind: RunErrorKind::Exit(code),
                ..
            }) => Some(*code),
            _ => None,
        }
    }

    fn parts(&self) -> (&'static str, u32, u32, &str) {
        match self {
            HumbleError::Lex(err) => ("Source error", err.line, err.column, err.message.as_str()),
            HumbleError::Parse(err) => ("Source error", err.span.line, err.span.column, err.message.as_str()),
            HumbleError::Expand(err) => ("Source error", err.line, 0, err.message.as_str()),
            HumbleError::Run(err) if err.kind == RunErrorKind::Broken => {
                ("Broken", err.line, 0, err.message.as_str())
            }
            HumbleError::Run(err) => ("Runtime error", err.line, 0, err.message.as_str()),
        }
    }

    /// Format error with source context
    pub fn format_with_source(&self, source: &str) -> String {
        let (kind, line, column, message) = self.parts();

        let mut output = String::new();

        output.push_str(&format!("\n{} at line {}", kind, line));
        if column > 0 {
            output.push_str(&format!(", column {}", column));
        }
        output.push_str(&format!(": {}\n", message));
        if line == 0 {
            return output;
        }
        output.push('\n');

        // Source context (5 lines around error)
        let lines: Vec<&str> = source.lines().collect();
        let error_line_idx = (line as usize).saturating_sub(1);

        let start = error_line_idx.saturating_sub(2);
        let end = (error_line_idx + 3).min(lines.len());

        for (idx, line_content) in lines.iter().enumerate().take(end).skip(start) {
            let line_num = idx + 1;

            if idx == error_line_idx {
                output.push_str(&format!(" → {:4} | {}\n", line_num, line_content));
                if column > 0 {
                    output.push_str("        | ");
                    output.push_str(&" ".repeat(column as usize - 1));
                    output.push_str("^\n");
                }
            } else {
                output.push_str(&format!("   {:4} | {}\n", line_num, line_content));
            }
        }

        output
    }

    /// Format error with source context and colored output
    #[cfg(feature = "colored")]
    pub fn format_colored(&self, source: &str) -> String {
        use colored::Colorize;

        let (kind, line, column, message) = self.parts();

        let mut output = String::new();

        output.push('\n');
        output.push_str(&format!("{} at line {}", kind, line).red().bold().to_string());
        if column > 0 {
            output.push_str(&format!(", column {}", column).red().bold().to_string());
        }
        output.push_str(&format!(": {}\n", message.red()));
        if line == 0 {
            return output;
        }
        output.push('\n');

        let lines: Vec<&str> = source.lines().collect();
        let error_line_idx = (line as usize).saturating_sub(1);

        let start = error_line_idx.saturating_sub(2);
        let end = (error_line_idx + 3).min(lines.len());

        for (idx, line_content) in lines.iter().enumerate().take(end).skip(start) {
            let line_num = idx + 1;

            if idx == error_line_idx {
                output.push_str(
                    &format!(" → {:4} | {}\n", line_num, line_content)
                        .red()
                        .to_string(),
                );
                if column > 0 {
                    output.push_str(&"        | ".red().to_string());
                    output.push_str(&" ".repeat(column as usize - 1));
                    output.push_str(&"^".red().bold().to_string());
                    output.push('\n');
                }
            } else {
                output.push_str(
                    &format!("   {:4} | {}\n", line_num, line_content)
                        .dimmed()
                        .to_string(),
                );
            }
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Span;

    #[test]
    fn lex_error_display() {
        let err = HumbleError::Lex(LexError {
            message: "unexpected character '|'".to_string(),
            line: 5,
            column: 10,
        });

        let display = err.to_string();
        assert!(display.contains("Source error"));
        assert!(display.contains("line 5"));
        assert!(display.contains("column 10"));
        assert!(display.contains("unexpected character '|'"));
        assert!(err.is_source_error());
    }

    #[test]
    fn parse_error_is_incomplete_only_at_end_of_input() {
        let span = Span {
            start: 0,
            end: 1,
            line: 3,
            column: 15,
        };
        let open = HumbleError::Parse(ParseError {
            message: "parens '(' at line 3 not closed".to_string(),
            span,
            incomplete: true,
        });
        let stray = HumbleError::Parse(ParseError {
            message: "unexpected ')'".to_string(),
            span,
            incomplete: false,
        });

        assert!(open.is_incomplete());
        assert!(!stray.is_incomplete());
        assert!(open.to_string().contains("column 15"));
    }

    #[test]
    fn run_error_kinds() {
        let err = HumbleError::Run(RunError::new("car of empty", 10));
        assert_eq!(err.to_string(), "Runtime error at line 10: car of empty");
        assert!(!err.is_source_error());
        assert!(!err.is_broken());

        let err = HumbleError::Run(RunError::broken("empty form"));
        assert!(err.is_broken());

        let err = HumbleError::Run(RunError::exit(3));
        assert_eq!(err.exit_code(), Some(3));
    }

    #[test]
    fn error_with_source_context() {
        let source = "(define a 1)\n(define b 2)\n(define c 3)\n(car '())\n(define d 4)";

        let err = HumbleError::Run(RunError::new("car of empty", 4));
        let formatted = err.format_with_source(source);

        assert!(formatted.contains("line 4"));
        assert!(formatted.contains("(define b 2)"));
        assert!(formatted.contains(" →    4 | (car '())"));
        assert!(formatted.contains("(define d 4)"));
        assert!(!formatted.contains("(define a 1)"));
    }

    #[test]
    fn error_with_caret_position() {
        let source = "(list 1 |)";

        let err = HumbleError::Lex(LexError {
            message: "unexpected character '|'".to_string(),
            line: 1,
            column: 9,
        });
        let formatted = err.format_with_source(source);

        assert!(formatted.contains("        |         ^"));
    }

    #[test]
    fn error_without_line_has_no_context() {
        let err = HumbleError::Expand(ExpandError::new("unbound,\nfoo"));
        let formatted = err.format_with_source("(foo)");
        assert!(formatted.contains("Source error at line 0"));
        assert!(!formatted.contains("| (foo)"));
    }
}
