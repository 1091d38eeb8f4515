use std::cell::RefCell;
use std::rc::Rc;

use crate::lexer::{NameId, Names};
use crate::parser::{CoreOp, Syntax};

use super::env::{Environment, Frame, Globals, Overlay};
use super::list;
use super::port::Port;
use super::value::{
    Closure, EXTRA_MAX, EXTRA_MIN, Native, NativeFn, Procedure, Record, Tail, Value, Var, var,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunErrorKind {
    Error,
    /// An internal invariant does not hold; the session cannot continue.
    Broken,
    /// Unwinding from `(exit n)`.
    Exit(i32),
}

/// Evaluation-time error with the source line of the failing form
#[derive(Debug, Clone)]
pub struct RunError {
    pub message: String,
    pub line: u32,
    pub kind: RunErrorKind,
}

impl RunError {
    pub fn new(message: impl Into<String>, line: u32) -> Self {
        Self {
            message: message.into(),
            line,
            kind: RunErrorKind::Error,
        }
    }

    pub fn broken(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: 0,
            kind: RunErrorKind::Broken,
        }
    }

    pub fn exit(code: i32) -> Self {
        Self {
            message: format!("exit {code}"),
            line: 0,
            kind: RunErrorKind::Exit(code),
        }
    }

    /// Stamps `line` unless a more precise line is already known.
    pub fn at(mut self, line: u32) -> Self {
        if self.line == 0 {
            self.line = line;
        }
        self
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            RunErrorKind::Broken => write!(f, "Broken at line {}: {}", self.line, self.message),
            _ => write!(f, "Runtime error at line {}: {}", self.line, self.message),
        }
    }
}

impl std::error::Error for RunError {}

/// Result of evaluating one node: a value, or a closure call in tail
/// position that the caller runs without growing the host stack.
enum Flow {
    Value(Var),
    Tail(Rc<Closure>, Vec<Var>, u32),
}

/// Non-tail call nesting that fits an 8 MiB host stack in debug builds.
pub const DEFAULT_MAX_DEPTH: usize = 1_000;

/// Evaluator state shared by every stage that runs code: the name table,
/// the global environment and the port `display` writes to.
pub struct Vm {
    pub names: Names,
    pub globals: Globals,
    output: Rc<RefCell<Port>>,
    warnings: Vec<String>,
    depth: usize,
    max_depth: usize,
    next_extra: u8,
}

impl Vm {
    pub fn new() -> Self {
        Self {
            names: Names::new(),
            globals: Globals::new(),
            output: Rc::new(RefCell::new(Port::output(std::io::stdout()))),
            warnings: Vec::new(),
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            next_extra: EXTRA_MIN,
        }
    }

    pub fn output(&self) -> Rc<RefCell<Port>> {
        self.output.clone()
    }

    pub fn set_output(&mut self, port: Port) {
        self.output = Rc::new(RefCell::new(port));
    }

    /// Nesting limit for non-tail calls. Callers running on a larger
    /// host stack may raise it.
    pub fn set_max_depth(&mut self, depth: usize) {
        self.max_depth = depth;
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    /// Reserves a tag for a host extension's opaque values.
    pub fn allocate_extra_tag(&mut self) -> Option<u8> {
        if self.next_extra > EXTRA_MAX {
            return None;
        }
        let tag = self.next_extra;
        self.next_extra += 1;
        Some(tag)
    }

    pub fn define_native(&mut self, name: &str, func: NativeFn) -> NameId {
        let key = self.names.intern(name);
        let native = Native {
            name: Rc::from(name),
            func,
        };
        let cell = var(Value::Procedure(Procedure::Native(Rc::new(native))));
        self.globals.bind(key, cell);
        key
    }

    pub fn name(&self, id: NameId) -> &str {
        self.names.text(id)
    }

    /// Evaluates `node` to a value, running any pending tail call.
    pub fn run(&mut self, node: &Syntax, env: &mut dyn Environment) -> Result<Var, RunError> {
        match self.eval(node, env)? {
            Flow::Value(value) => Ok(value),
            Flow::Tail(closure, args, line) => self.tco(closure, args, line),
        }
    }

    /// Calls a procedure from native code.
    pub fn call(&mut self, procedure: &Var, args: Vec<Var>) -> Result<Var, RunError> {
        match self.apply(procedure.clone(), args, 0)? {
            Flow::Value(value) => Ok(value),
            Flow::Tail(closure, args, line) => self.tco(closure, args, line),
        }
    }

    fn tco(&mut self, closure: Rc<Closure>, args: Vec<Var>, line: u32) -> Result<Var, RunError> {
        if self.depth >= self.max_depth {
            return Err(RunError::new("recursion too deep", line));
        }
        self.depth += 1;
        let result = self.tco_loop(closure, args, line);
        self.depth -= 1;
        result
    }

    fn tco_loop(
        &mut self,
        mut closure: Rc<Closure>,
        mut args: Vec<Var>,
        mut line: u32,
    ) -> Result<Var, RunError> {
        'call: loop {
            let mut frame = activate(&closure, args).map_err(|e| e.at(line))?;
            let lambda = closure.lambda.clone();
            let last = lambda.body.len().saturating_sub(1);

            for (i, form) in lambda.body.iter().enumerate() {
                match self.eval(form, &mut frame)? {
                    Flow::Value(value) if i == last => return Ok(value),
                    Flow::Value(_) => {}
                    Flow::Tail(next, next_args, next_line) if i == last => {
                        closure = next;
                        args = next_args;
                        line = next_line;
                        continue 'call;
                    }
                    Flow::Tail(next, next_args, next_line) => {
                        self.tco(next, next_args, next_line)?;
                    }
                }
            }
            return Ok(var(Value::Void));
        }
    }

    fn apply(&mut self, head: Var, args: Vec<Var>, line: u32) -> Result<Flow, RunError> {
        let mut head = head;
        let mut args = args;
        loop {
            let procedure = match &*head.borrow() {
                Value::Procedure(procedure) => procedure.clone(),
                other => {
                    return Err(RunError::new(format!("apply {}", other.type_name()), line));
                }
            };
            match procedure {
                Procedure::Closure(closure) => return Ok(Flow::Tail(closure, args, line)),
                Procedure::Native(native) => {
                    let result = (native.func)(&args, self).map_err(|e| e.at(line))?;
                    let deferred = match &*result.borrow() {
                        Value::Apply(apply) => Some(apply.clone()),
                        _ => None,
                    };
                    match deferred {
                        Some(apply) => {
                            head = apply.target.clone();
                            args = apply.args.clone();
                        }
                        None => return Ok(Flow::Value(result)),
                    }
                }
            }
        }
    }

    fn eval(&mut self, node: &Syntax, env: &mut dyn Environment) -> Result<Flow, RunError> {
        let value = match node {
            Syntax::Name(key, line) => {
                return env.lookup(*key).map(Flow::Value).ok_or_else(|| {
                    RunError::new(format!("no entry {}", self.name(env.name_of(*key))), *line)
                });
            }
            Syntax::Symbol(id) => Value::Symbol(*id),
            Syntax::Integer(n) => Value::Integer(*n),
            Syntax::Boolean(b) => Value::Boolean(*b),
            Syntax::Str(s) => Value::String(s.clone()),
            Syntax::Void => Value::Void,
            Syntax::Dot => return Err(RunError::new("invalid use of dot", 0)),
            Syntax::Unquote(inner) => {
                return Err(RunError::new("unquote outside quasiquote", inner.line()));
            }
            Syntax::List(items) => Value::list(self.run_each(items, env)?),
            Syntax::NonList(items) => nonlist(self.run_each(items, env)?),
            Syntax::Record(items) => {
                let mut fields = self.run_each(items, env)?;
                if fields.is_empty() {
                    return Err(RunError::broken("record without name"));
                }
                let name = match &*fields.remove(0).borrow() {
                    Value::Symbol(id) => *id,
                    _ => return Err(RunError::broken("record-id not symbol")),
                };
                Value::Record(Rc::new(Record {
                    name,
                    fields: RefCell::new(fields),
                }))
            }
            Syntax::Form(items) => {
                if items.is_empty() {
                    return Err(RunError::broken("empty form"));
                }
                let line = node.line();
                let mut args = self.run_each(items, env).map_err(|e| e.at(line))?;
                if args.is_empty() {
                    return Err(RunError::new("apply of empty splice", line));
                }
                let head = args.remove(0);
                return self.apply(head, args, line);
            }
            Syntax::Op(op) => return self.eval_op(op, env),
        };
        Ok(Flow::Value(var(value)))
    }

    fn eval_op(&mut self, op: &CoreOp, env: &mut dyn Environment) -> Result<Flow, RunError> {
        match op {
            CoreOp::Bind { key, value } => {
                let value = self.run(value, env)?;
                env.bind(*key, value);
            }
            CoreOp::Lambda(lambda) => {
                let captured = lambda.captures.iter().map(|&key| env.capture(key)).collect();
                let closure = Closure {
                    lambda: lambda.clone(),
                    captured,
                };
                return Ok(Flow::Value(var(Value::Procedure(Procedure::Closure(
                    Rc::new(closure),
                )))));
            }
            CoreOp::Cond { arms, .. } => {
                for (test, consequent) in arms {
                    let taken = !self.run(test, env)?.borrow().is_false();
                    if taken {
                        return self.eval(consequent, env);
                    }
                }
                return Err(RunError::new("all cond #f", op.line()));
            }
            CoreOp::Seq(items) => {
                let Some((last, init)) = items.split_last() else {
                    return Ok(Flow::Value(var(Value::Void)));
                };
                for item in init {
                    self.run(item, env)?;
                }
                return self.eval(last, env);
            }
            CoreOp::Import { exports, body } => {
                let mut overlay = Overlay::new(self.globals.snapshot());
                for form in body {
                    self.run(form, &mut overlay)?;
                }
                for &(dest, source) in exports {
                    let cell = overlay.lookup(source).ok_or_else(|| {
                        RunError::new(format!("no {} for export", self.name(source)), 0)
                    })?;
                    env.bind(dest, cell);
                }
            }
            CoreOp::Export(_) => {}
        }
        Ok(Flow::Value(var(Value::Void)))
    }

    /// Evaluates each node, flattening splices into the result.
    fn run_each(&mut self, items: &[Syntax], env: &mut dyn Environment) -> Result<Vec<Var>, RunError> {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            let value = self.run(item, env)?;
            let spliced = match &*value.borrow() {
                Value::Splice(items) => Some(items.clone()),
                _ => None,
            };
            match spliced {
                Some(items) => values.extend(items),
                None => values.push(value),
            }
        }
        Ok(values)
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

/// Binds call arguments into a fresh frame for `closure`.
fn activate(closure: &Closure, args: Vec<Var>) -> Result<Frame, RunError> {
    let lambda = &closure.lambda;
    let n_params = lambda.params.len();
    let mut frame = Frame::new(lambda.clone());

    if lambda.variadic {
        let fixed = n_params.saturating_sub(1);
        if args.len() < fixed {
            return Err(RunError::new(
                format!("fun-dot expected {} args got {}", n_params, args.len()),
                0,
            ));
        }
        let mut args = args;
        let rest = args.split_off(fixed);
        for (slot, arg) in args.into_iter().enumerate() {
            frame.set(slot, arg);
        }
        frame.set(fixed, var(Value::list(rest)));
    } else {
        if args.len() != n_params {
            return Err(RunError::new(
                format!("fun expected {} args got {}", n_params, args.len()),
                0,
            ));
        }
        for (slot, arg) in args.into_iter().enumerate() {
            frame.set(slot, arg);
        }
    }

    for (i, cell) in closure.captured.iter().enumerate() {
        frame.set(n_params + i, cell.clone());
    }
    Ok(frame)
}

/// A dotted datum whose tail turned out to be a list joins that list.
fn nonlist(mut items: Vec<Var>) -> Value {
    let Some(last) = items.pop() else {
        return Value::empty_list();
    };
    if items.is_empty() {
        return last.borrow().clone();
    }
    let tail = match &*last.borrow() {
        Value::List(rest) => {
            items.extend(rest.iter().cloned());
            return Value::List(items);
        }
        Value::Cons(chain) => Tail::from_chain(chain.clone()),
        _ => Tail::Improper(last.clone()),
    };
    if let Tail::Improper(_) = tail {
        items.push(last);
        return Value::NonList(items);
    }
    match list::build(&items, tail) {
        Tail::Pair(pair) => Value::Cons(Some(pair)),
        _ => Value::empty_list(),
    }
}
