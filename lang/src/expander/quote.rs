//! Conversions between syntax and data.
//!
//! `quote` turns a datum into syntax that evaluates to it. `from_syntax`
//! and `to_syntax` carry source forms across the boundary into and out of
//! user macro bodies (and back out of `read`).

use std::cell::RefCell;
use std::rc::Rc;

use crate::lexer::names;
use crate::parser::{Syntax, is_dotform, with_dot, without_dot};
use crate::vm::value::{Record, Value, Var, var};
use crate::vm::{GlobalMap, Overlay, Vm, list};

use super::ExpandError;

/// Quoted form of `node`. With `quasi`, an `Unquote` hole is replaced by
/// the expression inside it.
pub fn quote(node: Syntax, quasi: bool) -> Result<Syntax, ExpandError> {
    match node {
        Syntax::Form(items) if is_dotform(&items) => {
            let mut quoted = without_dot(items)
                .into_iter()
                .map(|item| quote(item, quasi))
                .collect::<Result<Vec<_>, _>>()?;
            match quoted.pop() {
                Some(Syntax::List(rest)) => {
                    quoted.extend(rest);
                    Ok(Syntax::List(quoted))
                }
                Some(Syntax::NonList(rest)) => {
                    quoted.extend(rest);
                    Ok(Syntax::NonList(quoted))
                }
                Some(last) => {
                    quoted.push(last);
                    Ok(Syntax::NonList(quoted))
                }
                None => Err(ExpandError::new("invalid use of dot")),
            }
        }
        Syntax::Form(items) => Ok(Syntax::List(
            items
                .into_iter()
                .map(|item| quote(item, quasi))
                .collect::<Result<_, _>>()?,
        )),
        Syntax::Name(id, _) => Ok(Syntax::Symbol(id)),
        node @ (Syntax::Symbol(_) | Syntax::List(_) | Syntax::NonList(_)) => {
            Ok(Syntax::List(vec![Syntax::Symbol(names::QUOTE), node]))
        }
        Syntax::Unquote(inner) if quasi => Ok(*inner),
        node => Ok(node),
    }
}

/// Marks an expression as a hole in the surrounding quasiquote. Quoted
/// data unquotes back into the form it was quoted from.
pub fn unquote(node: Syntax) -> Syntax {
    match node {
        Syntax::Form(_) | Syntax::Name(..) | Syntax::Unquote(_) => Syntax::Unquote(Box::new(node)),
        Syntax::List(items) => Syntax::Form(items),
        Syntax::NonList(items) => Syntax::Form(with_dot(items)),
        Syntax::Symbol(id) => Syntax::name(id),
        node => node,
    }
}

/// The datum a piece of source denotes, as handed to a user macro.
pub fn from_syntax(node: &Syntax, vm: &mut Vm) -> Result<Var, ExpandError> {
    let value = match node {
        Syntax::Form(items) if is_dotform(items) => {
            let items = without_dot(items.clone());
            Value::NonList(
                items
                    .iter()
                    .map(|item| from_syntax(item, vm))
                    .collect::<Result<_, _>>()?,
            )
        }
        Syntax::Form(items) => Value::list(
            items
                .iter()
                .map(|item| from_syntax(item, vm))
                .collect::<Result<_, _>>()?,
        ),
        Syntax::List(items) => {
            return from_syntax(&headed(names::LIST, items), vm);
        }
        Syntax::NonList(items) => {
            return from_syntax(&headed(names::NONLIST, items), vm);
        }
        Syntax::Symbol(id) => {
            let quoted = Syntax::Form(vec![Syntax::name(names::QUOTE), Syntax::name(*id)]);
            return from_syntax(&quoted, vm);
        }
        Syntax::Name(id, _) => Value::Symbol(*id),
        Syntax::Integer(n) => Value::Integer(*n),
        Syntax::Boolean(b) => Value::Boolean(*b),
        Syntax::Str(s) => Value::String(s.clone()),
        Syntax::Void => Value::Void,
        Syntax::Record(items) => {
            let mut env = Overlay::new(GlobalMap::new());
            let mut fields = items
                .iter()
                .map(|item| vm.run(item, &mut env))
                .collect::<Result<Vec<_>, _>>()?;
            if fields.is_empty() {
                return Err(ExpandError::new("record-id not name"));
            }
            let name = match &*fields.remove(0).borrow() {
                Value::Symbol(id) => *id,
                _ => return Err(ExpandError::new("record-id not name")),
            };
            Value::Record(Rc::new(Record {
                name,
                fields: RefCell::new(fields),
            }))
        }
        Syntax::Dot => return Err(ExpandError::new("invalid use of dot")),
        Syntax::Unquote(_) => return Err(ExpandError::new("unquote outside quasiquote")),
        Syntax::Op(_) => return Err(ExpandError::new("from syntax: core form")),
    };
    Ok(var(value))
}

fn headed(head: u32, items: &[Syntax]) -> Syntax {
    let mut form = Vec::with_capacity(items.len() + 1);
    form.push(Syntax::name(head));
    form.extend(items.iter().cloned());
    Syntax::Form(form)
}

/// The source form a user macro's result stands for.
pub fn to_syntax(value: &Var) -> Result<Syntax, ExpandError> {
    let value = value.borrow();
    let node = match &*value {
        Value::Cons(None) => Syntax::Form(Vec::new()),
        Value::Cons(chain) => return to_syntax(&var(list::from_chain(chain))),
        Value::List(items) => Syntax::Form(
            items
                .iter()
                .map(to_syntax)
                .collect::<Result<_, _>>()?,
        ),
        Value::NonList(items) => Syntax::Form(with_dot(
            items
                .iter()
                .map(to_syntax)
                .collect::<Result<_, _>>()?,
        )),
        Value::Record(record) => {
            let mut items = vec![Syntax::Symbol(record.name)];
            for field in record.fields.borrow().iter() {
                items.push(quote(to_syntax(field)?, false)?);
            }
            Syntax::Record(items)
        }
        Value::Symbol(id) => Syntax::name(*id),
        Value::Integer(n) => Syntax::Integer(*n),
        Value::Boolean(b) => Syntax::Boolean(*b),
        Value::String(s) => Syntax::Str(s.clone()),
        Value::Void => Syntax::Void,
        other => {
            return Err(ExpandError::new(format!("to syntax {}", other.type_name())));
        }
    };
    Ok(node)
}
