//! Humble Scheme: lexer, reader, macro expander, scope resolver and a
//! tail-calling evaluator over shared, mutable storage cells.
//!
//! [`runner::Session`] ties the stages together:
//!
//! ```no_run
//! use humble::runner::Session;
//!
//! let mut session = Session::new().expect("prelude compiles");
//! let values = session.eval_to_strings("(+ 1 2 3)").expect("runs");
//! assert_eq!(values, vec!["6"]);
//! ```

pub mod error;
pub mod expander;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod runner;
pub mod vm;

pub use error::HumbleError;
pub use runner::{Session, SessionBuilder};
