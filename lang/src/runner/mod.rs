//! Sessions: the name table, global environment and macro table that
//! live across units of source, plus the pipeline that takes a unit from
//! text to values.

use std::collections::{HashMap, HashSet};
use std::io;
use std::rc::Rc;

use crate::error::HumbleError;
use crate::expander::builtins::BUILTIN_MACROS;
use crate::expander::{Expander, HostMacro, Macro, Macros, SourceOpener};
use crate::lexer::{Lexer, NameId};
use crate::parser::{Parser, Syntax};
use crate::resolver::resolve_top;
use crate::vm::printer;
use crate::vm::value::Value;
use crate::vm::{NativeFn, Port, RunError, Var, Vm, builtins};

pub mod prelude;

#[cfg(test)]
mod tests;

/// Opens imported units from the file system, relative to the working
/// directory.
#[derive(Debug, Default)]
pub struct FileOpener {
    current: Option<String>,
}

impl FileOpener {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SourceOpener for FileOpener {
    fn open(&mut self, path: &str) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn current_file(&self) -> Option<String> {
        self.current.clone()
    }

    fn set_current_file(&mut self, file: Option<String>) {
        self.current = file;
    }
}

/// Serves imported units from a fixed set of in-memory texts.
#[derive(Debug, Default)]
pub struct MemoryOpener {
    files: HashMap<String, String>,
    current: Option<String>,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, text: &str) -> Self {
        self.files.insert(path.to_string(), text.to_string());
        self
    }
}

impl SourceOpener for MemoryOpener {
    fn open(&mut self, path: &str) -> io::Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }

    fn current_file(&self) -> Option<String> {
        self.current.clone()
    }

    fn set_current_file(&mut self, file: Option<String>) {
        self.current = file;
    }
}

/// Host additions installed before the prelude, so that prelude code and
/// imported units can see them.
pub struct SessionBuilder {
    opener: Box<dyn SourceOpener>,
    output: Option<Port>,
    natives: Vec<(String, NativeFn)>,
    macros: Vec<(String, HostMacro)>,
    max_depth: Option<usize>,
}

impl SessionBuilder {
    pub fn opener(mut self, opener: impl SourceOpener + 'static) -> Self {
        self.opener = Box::new(opener);
        self
    }

    /// Port that `display` and `write` use when no port is given.
    pub fn output(mut self, port: Port) -> Self {
        self.output = Some(port);
        self
    }

    pub fn native(mut self, name: &str, func: NativeFn) -> Self {
        self.natives.push((name.to_string(), func));
        self
    }

    /// Registers a whole batch of natives, such as a host extension module.
    pub fn natives<'n>(mut self, batch: impl IntoIterator<Item = (&'n str, NativeFn)>) -> Self {
        self.natives
            .extend(batch.into_iter().map(|(name, func)| (name.to_string(), func)));
        self
    }

    pub fn host_macro(mut self, name: &str, func: HostMacro) -> Self {
        self.macros.push((name.to_string(), func));
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn build(self) -> Result<Session, HumbleError> {
        let mut vm = Vm::new();
        if let Some(port) = self.output {
            vm.set_output(port);
        }
        if let Some(depth) = self.max_depth {
            vm.set_max_depth(depth);
        }
        builtins::install(&mut vm);
        for (name, func) in self.natives {
            vm.define_native(&name, func);
        }

        let mut macros = Macros::new();
        for &(name, which) in BUILTIN_MACROS {
            macros.insert(vm.names.intern(name), Macro::Builtin(which));
        }
        for (name, func) in self.macros {
            macros.insert(vm.names.intern(&name), Macro::Host(func));
        }

        let mut session = Session {
            vm,
            macros,
            prelude: Macros::new(),
            base_keys: HashSet::new(),
            opener: self.opener,
        };

        session.opener.set_current_file(Some("inc-functions".to_string()));
        session.eval_source(&prelude::cxr_source())?;
        session.base_keys = session.vm.globals.keys().into_iter().collect();

        session.opener.set_current_file(Some("inc-macros".to_string()));
        session.eval_source(prelude::MACROS)?;
        session.prelude = session.macros.clone();

        session.opener.set_current_file(None);
        Ok(session)
    }
}

/// Owns everything that persists between units of source. An error in one
/// unit leaves the bindings made by earlier units in place.
pub struct Session {
    vm: Vm,
    macros: Macros,
    /// Macro table after the prelude; imported units start from it.
    prelude: Macros,
    /// Global names after the builtins and `c[ad]r` functions.
    base_keys: HashSet<NameId>,
    opener: Box<dyn SourceOpener>,
}

impl Session {
    pub fn new() -> Result<Self, HumbleError> {
        Self::builder().build()
    }

    pub fn builder() -> SessionBuilder {
        SessionBuilder {
            opener: Box::new(FileOpener::new()),
            output: None,
            natives: Vec::new(),
            macros: Vec::new(),
            max_depth: None,
        }
    }

    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    pub fn vm_mut(&mut self) -> &mut Vm {
        &mut self.vm
    }

    pub fn set_current_file(&mut self, file: Option<String>) {
        self.opener.set_current_file(file);
    }

    pub fn current_file(&self) -> Option<String> {
        self.opener.current_file()
    }

    pub fn register_native(&mut self, name: &str, func: NativeFn) -> NameId {
        self.vm.define_native(name, func)
    }

    pub fn register_macro(&mut self, name: &str, func: HostMacro) -> NameId {
        let id = self.vm.names.intern(name);
        self.macros.insert(id, Macro::Host(func));
        id
    }

    /// Reserves a tag for a host extension's opaque values.
    pub fn register_extra(&mut self) -> Option<u8> {
        self.vm.allocate_extra_tag()
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        self.vm.take_warnings()
    }

    /// Printed form of a value, as the REPL echoes it.
    pub fn repr(&self, value: &Var) -> String {
        printer::repr(value, &self.vm.names)
    }

    /// Lexes, parses, expands and checks a whole unit without resolving
    /// scopes. Macros the unit defines are installed.
    pub fn expand(&mut self, source: &str) -> Result<Vec<Syntax>, HumbleError> {
        let tokens = Lexer::new(source, &mut self.vm.names).tokenize()?;
        let forms = Parser::new(tokens).parse_program()?;
        let defined = self.vm.globals.keys();
        let mut expander = Expander::new(
            &mut self.vm,
            &mut self.macros,
            &mut *self.opener,
            &self.prelude,
            &self.base_keys,
        );
        Ok(expander.check(forms, defined)?)
    }

    /// `expand`, then scope resolution: the unit is ready to `run`.
    pub fn compile(&mut self, source: &str) -> Result<Vec<Syntax>, HumbleError> {
        let mut forms = self.expand(source)?;
        resolve_top(&mut forms);
        Ok(forms)
    }

    /// Renders an expanded, unresolved form.
    pub fn render(&self, form: &Syntax) -> String {
        form.render(&self.vm.names)
    }

    /// Runs compiled forms at the top level and collects every result
    /// that is not `#void`.
    pub fn run(&mut self, forms: &[Syntax]) -> Result<Vec<Var>, HumbleError> {
        let mut results = Vec::new();
        self.run_each(forms, |_, value| {
            results.push(value);
            Ok(())
        })?;
        Ok(results)
    }

    pub fn eval_source(&mut self, source: &str) -> Result<Vec<Var>, HumbleError> {
        let forms = self.compile(source)?;
        self.run(&forms)
    }

    /// Like `eval_source`, but writes each result to the output port as
    /// soon as its form finishes, interleaved with what the program prints.
    pub fn echo_source(&mut self, source: &str) -> Result<(), HumbleError> {
        let forms = self.compile(source)?;
        self.echo(&forms)
    }

    /// Runs compiled forms, echoing each non-void result.
    pub fn echo(&mut self, forms: &[Syntax]) -> Result<(), HumbleError> {
        self.run_each(forms, |vm, value| {
            let text = format!("{}\n", printer::repr(&value, &vm.names));
            vm.output()
                .borrow_mut()
                .write_string(&text)
                .map_err(|e| RunError::new(format!("write: {e}"), 0))
        })
    }

    /// Evaluates a unit and returns the printed form of each result.
    pub fn eval_to_strings(&mut self, source: &str) -> Result<Vec<String>, HumbleError> {
        let results = self.eval_source(source)?;
        Ok(results.iter().map(|value| self.repr(value)).collect())
    }

    fn run_each(
        &mut self,
        forms: &[Syntax],
        mut emit: impl FnMut(&mut Vm, Var) -> Result<(), RunError>,
    ) -> Result<(), HumbleError> {
        let mut globals = self.vm.globals.clone();
        let outcome: Result<(), RunError> = forms.iter().try_for_each(|form| {
            let value = self.vm.run(form, &mut globals)?;
            if !matches!(&*value.borrow(), Value::Void) {
                emit(&mut self.vm, value)?;
            }
            Ok(())
        });
        if outcome.is_err() {
            globals.discard_pending();
        }
        Ok(outcome?)
    }

    pub fn has_macro(&self, name: &str) -> bool {
        self.vm
            .names
            .lookup(name)
            .is_some_and(|id| self.macros.contains_key(&id))
    }

    pub fn has_global(&self, name: &str) -> bool {
        self.vm
            .names
            .lookup(name)
            .is_some_and(|id| self.vm.globals.contains(id))
    }
}

/// Shorthand for wrapping a plain function as a native.
pub fn native(func: fn(&[Var], &mut Vm) -> Result<Var, RunError>) -> NativeFn {
    Rc::new(func)
}
