//! Macro expansion
//!
//! Expansion runs bottom-up: the arguments of a form are expanded before
//! the macro at its head sees them. Two things narrow what expands inside
//! a form:
//!
//! - the arguments of a user macro only expand the quotation macros, so
//!   the macro body receives its input as written;
//! - inside `quote` only `quasiquote`/`unquote` expand, and a macro runs
//!   only when the quasiquote nesting level is zero.

pub mod builtins;
pub mod free;
pub mod quote;

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::io;
use std::rc::Rc;

use crate::lexer::Lexer;
use crate::lexer::names::{self, NameId};
use crate::parser::{CoreOp, Parser, Syntax};
use crate::vm::{Environment, Overlay, RunError, Vm, var};
use crate::vm::value::Value;

pub use builtins::BuiltinMacro;
pub use free::{report_unbound, unbound};

/// Error raised while expanding, checking or resolving source.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandError {
    pub message: String,
    pub line: u32,
}

impl ExpandError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: 0,
        }
    }

    pub fn at(mut self, line: u32) -> Self {
        if self.line == 0 {
            self.line = line;
        }
        self
    }
}

impl From<RunError> for ExpandError {
    fn from(error: RunError) -> Self {
        Self {
            message: error.message,
            line: error.line,
        }
    }
}

impl std::fmt::Display for ExpandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Expand error at line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ExpandError {}

pub type HostMacro = Rc<dyn Fn(Vec<Syntax>, &mut Vm) -> Result<Syntax, ExpandError>>;

/// A macro defined in the language with `(macro name params body...)`.
/// The body is expanded and resolved at definition time.
#[derive(Debug)]
pub struct UserMacro {
    pub name: NameId,
    pub params: Vec<NameId>,
    pub variadic: bool,
    pub body: Vec<Syntax>,
}

#[derive(Clone)]
pub enum Macro {
    Builtin(BuiltinMacro),
    User(Rc<UserMacro>),
    Host(HostMacro),
}

/// Macro table keyed by interned name. Persistent so that an import can
/// start from the prelude's table without copying it.
pub type Macros = im_rc::HashMap<NameId, Macro>;

/// Reads the text of imported units. The current file is tracked only
/// for diagnostics.
pub trait SourceOpener {
    fn open(&mut self, path: &str) -> io::Result<String>;

    fn current_file(&self) -> Option<String>;

    fn set_current_file(&mut self, file: Option<String>);
}

/// Which macros are live inside the arguments of the form being expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    All,
    /// Arguments of a user macro.
    Quoting,
    /// Arguments of `quote`.
    Quasi,
}

pub struct Expander<'a> {
    pub vm: &'a mut Vm,
    macros: &'a mut Macros,
    opener: &'a mut dyn SourceOpener,
    /// Macro table every imported unit starts from.
    prelude: &'a Macros,
    /// Global names an imported unit may refer to.
    base_keys: &'a HashSet<NameId>,
}

impl<'a> Expander<'a> {
    pub fn new(
        vm: &'a mut Vm,
        macros: &'a mut Macros,
        opener: &'a mut dyn SourceOpener,
        prelude: &'a Macros,
        base_keys: &'a HashSet<NameId>,
    ) -> Self {
        Self {
            vm,
            macros,
            opener,
            prelude,
            base_keys,
        }
    }

    pub fn expand_program(&mut self, forms: Vec<Syntax>) -> Result<Vec<Syntax>, ExpandError> {
        forms.into_iter().map(|form| self.expand(form)).collect()
    }

    pub fn expand(&mut self, node: Syntax) -> Result<Syntax, ExpandError> {
        self.walk(node, Mode::All, 0)
    }

    /// Expands and checks for unbound names against `defined`. Names are
    /// still interned ids, so the result renders readably.
    pub fn check(
        &mut self,
        forms: Vec<Syntax>,
        defined: impl IntoIterator<Item = NameId>,
    ) -> Result<Vec<Syntax>, ExpandError> {
        let forms = self.expand_program(forms)?;
        let mut defs = defined.into_iter().collect();
        let free = unbound(&forms, &mut defs, true)?;
        report_unbound(&free, &forms, &self.vm.names)?;
        Ok(forms)
    }

    /// Everything a unit of source needs before it can run: `check`, then
    /// scope resolution.
    pub fn compile(
        &mut self,
        forms: Vec<Syntax>,
        defined: impl IntoIterator<Item = NameId>,
    ) -> Result<Vec<Syntax>, ExpandError> {
        let mut forms = self.check(forms, defined)?;
        crate::resolver::resolve_top(&mut forms);
        Ok(forms)
    }

    fn live(&self, mode: Mode, id: NameId) -> bool {
        let allowed = match mode {
            Mode::All => true,
            Mode::Quoting => matches!(id, names::QUOTE | names::QUASIQUOTE | names::UNQUOTE),
            Mode::Quasi => matches!(id, names::QUASIQUOTE | names::UNQUOTE),
        };
        allowed && self.macros.contains_key(&id)
    }

    fn walk(&mut self, node: Syntax, mode: Mode, qq: i32) -> Result<Syntax, ExpandError> {
        let Syntax::Form(items) = node else {
            return Ok(node);
        };
        let head = items
            .first()
            .and_then(Syntax::as_name)
            .filter(|&id| self.live(mode, id));

        let mut qq = qq;
        let mut current = false;
        let mut is_user = false;
        let mut inner = mode;
        if let Some(id) = head {
            is_user = matches!(self.macros.get(&id), Some(Macro::User(_)));
            current = qq == 0;
            match id {
                names::QUOTE => inner = Mode::Quasi,
                names::QUASIQUOTE => qq += 1,
                names::UNQUOTE => {
                    qq -= 1;
                    current = current || qq == 0;
                }
                _ => {}
            }
            if is_user {
                inner = Mode::Quoting;
            }
        }

        let line = items.first().map_or(0, Syntax::line);
        let items = items
            .into_iter()
            .map(|item| self.walk(item, inner, qq))
            .collect::<Result<Vec<_>, _>>()?;

        let Some(id) = head.filter(|_| current) else {
            return Ok(Syntax::Form(items));
        };
        let result = self.invoke(id, items).map_err(|e| e.at(line))?.at_line(line);
        if is_user {
            self.walk(result, mode, qq)
        } else {
            Ok(result)
        }
    }

    fn invoke(&mut self, id: NameId, items: Vec<Syntax>) -> Result<Syntax, ExpandError> {
        match self.macros.get(&id).cloned() {
            Some(Macro::Builtin(which)) => builtins::apply(which, items, self),
            Some(Macro::User(user)) => self.run_user(&user, items),
            Some(Macro::Host(host)) => host(items, self.vm),
            None => Err(ExpandError::new(format!(
                "{} unbound in macro-expand",
                self.vm.name(id)
            ))),
        }
    }

    /// Runs a user macro: arguments become data, the body runs in an
    /// overlay over the globals and its value becomes syntax again.
    fn run_user(&mut self, user: &UserMacro, items: Vec<Syntax>) -> Result<Syntax, ExpandError> {
        let args = items[1..]
            .iter()
            .map(|item| quote::from_syntax(item, self.vm))
            .collect::<Result<Vec<_>, _>>()?;

        let name = self.vm.name(user.name).to_string();
        let n_params = user.params.len();
        let mut env = Overlay::new(self.vm.globals.snapshot());
        if user.variadic {
            let fixed = n_params.saturating_sub(1);
            if args.len() < fixed {
                return Err(ExpandError::new(format!(
                    "{name} requires {fixed} args but got {}",
                    args.len()
                )));
            }
            let mut args = args;
            let rest = args.split_off(fixed);
            for (&param, arg) in user.params.iter().zip(args) {
                env.bind(param, arg);
            }
            env.bind(user.params[fixed], var(Value::list(rest)));
        } else {
            if args.len() != n_params {
                return Err(ExpandError::new(format!(
                    "{name} requires {n_params} args but got {}",
                    args.len()
                )));
            }
            for (&param, arg) in user.params.iter().zip(args) {
                env.bind(param, arg);
            }
        }

        let mut result = var(Value::Void);
        for form in &user.body {
            result = self.vm.run(form, &mut env)?;
        }
        quote::to_syntax(&result)
    }

    pub fn define_macro(&mut self, id: NameId, mac: Macro) {
        self.macros.insert(id, mac);
    }

    /// Compiles an imported unit against the prelude and lowers its export
    /// list. Exported macros are installed here directly; exported names
    /// become the `Import` bindings, renamed with `prefix` if given. A
    /// symbol prefix also renames macros.
    fn import_unit(&mut self, path: &str, prefix: Option<(String, bool)>) -> Result<Syntax, ExpandError> {
        let previous = self.opener.current_file();
        let text = self
            .opener
            .open(path)
            .map_err(|_| ExpandError::new("no such file"))?;
        self.opener.set_current_file(Some(path.to_string()));
        let compiled = self.compile_unit(&text);
        self.opener.set_current_file(previous);
        let (forms, table) = compiled?;

        let mut forms = forms.into_iter();
        let Some(Syntax::Op(CoreOp::Export(items))) = forms.next() else {
            return Err(ExpandError::new("missing export"));
        };

        let mut exports = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Syntax::Name(id, _) => {
                    let dest = match &prefix {
                        Some((text, _)) => self.prefixed(text, id),
                        None => id,
                    };
                    exports.push((dest, id));
                }
                Syntax::Symbol(id) => {
                    let mac = table.get(&id).cloned().ok_or_else(|| {
                        ExpandError::new(format!("no macro {}", self.vm.name(id)))
                    })?;
                    let dest = match &prefix {
                        Some((text, true)) => self.prefixed(text, id),
                        _ => id,
                    };
                    self.macros.insert(dest, mac);
                }
                _ => return Err(ExpandError::new("export of non-name")),
            }
        }

        Ok(Syntax::Op(CoreOp::Import {
            exports,
            body: forms.collect(),
        }))
    }

    fn prefixed(&mut self, prefix: &str, id: NameId) -> NameId {
        let text = format!("{prefix}{}", self.vm.name(id));
        self.vm.names.intern(&text)
    }

    /// Lexes, parses and compiles `text` with a fresh copy of the prelude
    /// macro table, which is returned alongside the forms.
    fn compile_unit(&mut self, text: &str) -> Result<(Vec<Syntax>, Macros), ExpandError> {
        let tokens = Lexer::new(text, &mut self.vm.names)
            .tokenize()
            .map_err(|e| ExpandError::new(e.message).at(e.line))?;
        let forms = Parser::new(tokens)
            .parse_program()
            .map_err(|e| ExpandError::new(e.message).at(e.span.line))?;

        let mut table = self.prelude.clone();
        let base_keys = self.base_keys;
        let mut inner = Expander::new(&mut *self.vm, &mut table, &mut *self.opener, self.prelude, base_keys);
        let forms = inner.compile(forms, base_keys.iter().copied())?;
        Ok((forms, table))
    }
}
