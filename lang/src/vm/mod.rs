pub mod builtins;
pub mod env;
pub mod list;
pub mod port;
pub mod printer;
pub mod runtime;
pub mod value;

// Re-export commonly used types
pub use env::{Environment, GlobalMap, Globals, Overlay};
pub use port::Port;
pub use runtime::{RunError, RunErrorKind, Vm};
pub use value::{NativeFn, Value, Var, var};

#[cfg(test)]
mod tests;
