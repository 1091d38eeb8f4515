use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::lexer::NameId;
use crate::parser::Lambda;

use super::port::Port;
use super::runtime::{RunError, Vm};

/// A storage cell: the unit of aliasing and mutation.
///
/// Passing a variable to a procedure passes the cell itself, so `alias?`
/// is pointer identity and the strong count tells `dup` whether anyone
/// else holds it.
pub type Var = Rc<RefCell<Value>>;

pub fn var(value: Value) -> Var {
    Rc::new(RefCell::new(value))
}

/// Lowest and highest tag a host extension may use for its opaque values.
pub const EXTRA_MIN: u8 = 32;
pub const EXTRA_MAX: u8 = 127;

#[derive(Clone, Debug)]
pub enum Value {
    Void,
    Integer(i64),
    Boolean(bool),
    String(Rc<str>),
    Symbol(NameId),

    /// A cons chain. `None` is the empty list, the only representation it has.
    Cons(Option<Rc<Pair>>),
    /// A proper list in contiguous form, private to its cell. Never empty.
    List(Vec<Var>),
    /// An improper list in contiguous form: the last slot is the tail.
    NonList(Vec<Var>),

    Dict(Rc<RefCell<Dict>>),
    Record(Rc<Record>),
    Port(Rc<RefCell<Port>>),
    Procedure(Procedure),

    /// A deferred call returned by natives that invoke a procedure in tail position.
    Apply(Rc<Apply>),
    /// Elements to be spliced into the enclosing argument list.
    Splice(Vec<Var>),
    Eof,
    Extra(Extra),
}

impl Value {
    /// Type name as used in argument-check messages.
    pub fn type_name(&self) -> String {
        match self {
            Value::Void => "void".into(),
            Value::Integer(_) => "number".into(),
            Value::Boolean(_) => "boolean".into(),
            Value::String(_) => "string".into(),
            Value::Symbol(_) => "name".into(),
            Value::Cons(_) => "cons".into(),
            Value::List(_) => "list".into(),
            Value::NonList(_) => "nonlist".into(),
            Value::Dict(_) => "dict".into(),
            Value::Record(_) => "record".into(),
            Value::Port(_) => "port".into(),
            Value::Procedure(Procedure::Closure(_)) => "fun".into(),
            Value::Procedure(Procedure::Native(_)) => "fun-host".into(),
            Value::Apply(_) => "apply".into(),
            Value::Splice(_) => "splice".into(),
            Value::Eof => "eof-object".into(),
            Value::Extra(extra) => format!("extra-{:x}", extra.tag),
        }
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Value::Boolean(false))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Cons(None))
    }

    /// Any of the three list representations, including the empty list.
    pub fn is_list_family(&self) -> bool {
        matches!(self, Value::Cons(_) | Value::List(_) | Value::NonList(_))
    }

    pub fn is_procedure(&self) -> bool {
        matches!(self, Value::Procedure(_))
    }

    pub fn empty_list() -> Self {
        Value::Cons(None)
    }

    /// Builds a proper list, keeping the empty list canonical.
    pub fn list(items: Vec<Var>) -> Self {
        if items.is_empty() {
            Value::Cons(None)
        } else {
            Value::List(items)
        }
    }

    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Rc::from(s.as_ref()))
    }
}

/// One cons cell. The car holds a variable; the cdr continues the chain.
#[derive(Debug)]
pub struct Pair {
    pub car: RefCell<Var>,
    pub cdr: RefCell<Tail>,
}

#[derive(Clone, Debug)]
pub enum Tail {
    Nil,
    Pair(Rc<Pair>),
    /// The final cdr of an improper chain.
    Improper(Var),
}

impl Pair {
    pub fn new(car: Var, cdr: Tail) -> Rc<Pair> {
        Rc::new(Pair {
            car: RefCell::new(car),
            cdr: RefCell::new(cdr),
        })
    }

    pub fn car(&self) -> Var {
        self.car.borrow().clone()
    }

    pub fn cdr(&self) -> Tail {
        self.cdr.borrow().clone()
    }
}

impl Tail {
    pub fn from_chain(chain: Option<Rc<Pair>>) -> Self {
        match chain {
            Some(pair) => Tail::Pair(pair),
            None => Tail::Nil,
        }
    }
}

// Long chains would otherwise be freed by one recursive drop per pair.
impl Drop for Pair {
    fn drop(&mut self) {
        let mut next = std::mem::replace(self.cdr.get_mut(), Tail::Nil);
        while let Tail::Pair(pair) = next {
            match Rc::try_unwrap(pair) {
                Ok(mut pair) => next = std::mem::replace(pair.cdr.get_mut(), Tail::Nil),
                Err(_) => break,
            }
        }
    }
}

#[derive(Clone)]
pub enum Procedure {
    Native(Rc<Native>),
    Closure(Rc<Closure>),
}

impl Procedure {
    pub fn ptr_eq(&self, other: &Procedure) -> bool {
        match (self, other) {
            (Procedure::Native(a), Procedure::Native(b)) => Rc::ptr_eq(a, b),
            (Procedure::Closure(a), Procedure::Closure(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Procedure::Native(native) => write!(f, "Native({})", native.name),
            Procedure::Closure(closure) => write!(f, "Closure({:?})", closure.lambda.params),
        }
    }
}

pub type NativeFn = Rc<dyn Fn(&[Var], &mut Vm) -> Result<Var, RunError>>;

pub struct Native {
    pub name: Rc<str>,
    pub func: NativeFn,
}

/// A lambda paired with the cells it captured when it was created.
#[derive(Debug)]
pub struct Closure {
    pub lambda: Rc<Lambda>,
    pub captured: Vec<Var>,
}

#[derive(Debug)]
pub struct Apply {
    pub target: Var,
    pub args: Vec<Var>,
}

/// A record: a descriptive type name plus field cells. Only `record?`
/// looks at the name.
#[derive(Debug)]
pub struct Record {
    pub name: NameId,
    pub fields: RefCell<Vec<Var>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DictKey {
    Integer(i64),
    String(Rc<str>),
}

impl DictKey {
    pub fn from_value(value: &Value) -> Option<DictKey> {
        match value {
            Value::Integer(n) => Some(DictKey::Integer(*n)),
            Value::String(s) => Some(DictKey::String(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            DictKey::Integer(n) => Value::Integer(*n),
            DictKey::String(s) => Value::String(s.clone()),
        }
    }

    fn same_kind(&self, other: &DictKey) -> bool {
        matches!(
            (self, other),
            (DictKey::Integer(_), DictKey::Integer(_)) | (DictKey::String(_), DictKey::String(_))
        )
    }
}

/// Insertion-ordered table whose keys are all numbers or all strings.
/// The first insertion fixes the key type.
#[derive(Debug, Default)]
pub struct Dict {
    entries: Vec<(DictKey, Var)>,
    index: HashMap<DictKey, usize>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Type name of the keys once fixed.
    pub fn key_type(&self) -> Option<&'static str> {
        self.entries.first().map(|(k, _)| match k {
            DictKey::Integer(_) => "number",
            DictKey::String(_) => "string",
        })
    }

    pub fn accepts(&self, key: &DictKey) -> bool {
        self.entries.first().is_none_or(|(k, _)| k.same_kind(key))
    }

    pub fn get(&self, key: &DictKey) -> Option<Var> {
        self.index.get(key).map(|&i| self.entries[i].1.clone())
    }

    /// Inserts or replaces. Callers check `accepts` first.
    pub fn insert(&mut self, key: DictKey, value: Var) {
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 = value,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, value));
            }
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &(DictKey, Var)> {
        self.entries.iter()
    }
}

/// Opaque value owned by a host extension, tagged within `EXTRA_MIN..=EXTRA_MAX`.
#[derive(Clone)]
pub struct Extra {
    pub tag: u8,
    pub payload: Rc<dyn Any>,
}

impl fmt::Debug for Extra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Extra({})", self.tag)
    }
}
