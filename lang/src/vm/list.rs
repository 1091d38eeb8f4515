//! The two list representations and the conversions between them.
//!
//! A fresh list lives in a `List`/`NonList` cell as a private vector. Any
//! operation that hands out a reference into its structure (`cdr`, `dup`
//! of a shared cell, `set-cdr!`, a non-final `append` argument) first
//! converts the cell to a cons chain in place; the vector is then gone.

use std::rc::Rc;

use super::runtime::RunError;
use super::value::{Pair, Tail, Value, Var};

/// Links `items` into pairs in front of `tail`.
pub fn build(items: &[Var], tail: Tail) -> Tail {
    let mut tail = tail;
    for item in items.iter().rev() {
        tail = Tail::Pair(Pair::new(item.clone(), tail));
    }
    tail
}

fn chain_of(tail: Tail) -> Option<Rc<Pair>> {
    match tail {
        Tail::Pair(pair) => Some(pair),
        Tail::Nil | Tail::Improper(_) => None,
    }
}

/// The cons chain equivalent of a list-family value, without touching any cell.
pub fn to_chain(value: &Value) -> Option<Option<Rc<Pair>>> {
    match value {
        Value::Cons(chain) => Some(chain.clone()),
        Value::List(items) => Some(chain_of(build(items, Tail::Nil))),
        Value::NonList(items) => {
            let (last, init) = items.split_last()?;
            Some(chain_of(build(init, Tail::Improper(last.clone()))))
        }
        _ => None,
    }
}

/// Converts the cell to cons form in place and returns its chain.
/// Returns `None` when the cell does not hold a list.
pub fn ensure_cons(cell: &Var) -> Option<Option<Rc<Pair>>> {
    let chain = {
        let value = cell.borrow();
        match &*value {
            Value::Cons(chain) => return Some(chain.clone()),
            Value::List(_) | Value::NonList(_) => to_chain(&value)?,
            _ => return None,
        }
    };
    *cell.borrow_mut() = Value::Cons(chain.clone());
    Some(chain)
}

/// Replaces the payload of `target` with that of `source`. A contiguous
/// list is converted first so both cells share one chain.
pub fn assign(target: &Var, source: &Var) {
    if Rc::ptr_eq(target, source) {
        return;
    }
    ensure_cons(source);
    let value = source.borrow().clone();
    *target.borrow_mut() = value;
}

/// Elements of a list-family value plus the improper tail, if any.
pub fn elements(value: &Value) -> Option<(Vec<Var>, Option<Var>)> {
    match value {
        Value::List(items) => Some((items.clone(), None)),
        Value::NonList(items) => {
            let (last, init) = items.split_last()?;
            Some((init.to_vec(), Some(last.clone())))
        }
        Value::Cons(chain) => {
            let mut items = Vec::new();
            let mut next = chain.clone();
            while let Some(pair) = next {
                items.push(pair.car());
                match pair.cdr() {
                    Tail::Nil => next = None,
                    Tail::Pair(p) => next = Some(p),
                    Tail::Improper(last) => return Some((items, Some(last))),
                }
            }
            Some((items, None))
        }
        _ => None,
    }
}

/// Elements of a proper list; `who` names the operation in the error.
pub fn proper_elements(value: &Value, who: &str) -> Result<Vec<Var>, RunError> {
    match elements(value) {
        Some((items, None)) => Ok(items),
        Some((_, Some(_))) => Err(RunError::new(format!("{who}: nonlist for list-use"), 0)),
        None => Err(RunError::new(
            format!("{who} expected a list got {}", value.type_name()),
            0,
        )),
    }
}

/// Rebuilds the contiguous view of a chain for printing and comparison.
pub fn from_chain(chain: &Option<Rc<Pair>>) -> Value {
    match elements(&Value::Cons(chain.clone())) {
        Some((items, None)) => Value::list(items),
        Some((mut items, Some(last))) => {
            items.push(last);
            Value::NonList(items)
        }
        None => Value::Cons(None),
    }
}

pub fn length(value: &Value) -> Option<usize> {
    match value {
        Value::List(items) => Some(items.len()),
        Value::Cons(chain) => {
            let mut n = 0;
            let mut next = chain.clone();
            while let Some(pair) = next {
                n += 1;
                next = match pair.cdr() {
                    Tail::Pair(p) => Some(p),
                    Tail::Nil | Tail::Improper(_) => None,
                };
            }
            Some(n)
        }
        _ => None,
    }
}

/// Identity for aggregates and procedures, value for atoms.
pub fn is_eqv(a: &Var, b: &Var) -> bool {
    if Rc::ptr_eq(a, b) {
        return true;
    }
    let (x, y) = (a.borrow(), b.borrow());
    match (&*x, &*y) {
        (Value::Void, Value::Void) | (Value::Eof, Value::Eof) => true,
        (Value::Integer(p), Value::Integer(q)) => p == q,
        (Value::Boolean(p), Value::Boolean(q)) => p == q,
        (Value::String(p), Value::String(q)) => p == q,
        (Value::Symbol(p), Value::Symbol(q)) => p == q,
        (Value::Cons(p), Value::Cons(q)) => match (p, q) {
            (None, None) => true,
            (Some(p), Some(q)) => Rc::ptr_eq(p, q),
            _ => false,
        },
        (Value::Dict(p), Value::Dict(q)) => Rc::ptr_eq(p, q),
        (Value::Record(p), Value::Record(q)) => Rc::ptr_eq(p, q),
        (Value::Port(p), Value::Port(q)) => Rc::ptr_eq(p, q),
        (Value::Procedure(p), Value::Procedure(q)) => p.ptr_eq(q),
        (Value::Extra(p), Value::Extra(q)) => Rc::ptr_eq(&p.payload, &q.payload),
        _ => false,
    }
}

/// Structural equality across list representations. Dicts are never
/// equal, not even to themselves.
pub fn is_equal(a: &Var, b: &Var) -> bool {
    let (x, y) = (a.borrow(), b.borrow());
    if matches!(&*x, Value::Dict(_)) || matches!(&*y, Value::Dict(_)) {
        return false;
    }
    if !x.is_list_family() || !y.is_list_family() {
        drop((x, y));
        return is_eqv(a, b);
    }
    let (Some((xs, x_tail)), Some((ys, y_tail))) = (elements(&x), elements(&y)) else {
        return false;
    };
    drop((x, y));

    xs.len() == ys.len()
        && xs.iter().zip(&ys).all(|(p, q)| is_equal(p, q))
        && match (x_tail, y_tail) {
            (None, None) => true,
            (Some(p), Some(q)) => is_equal(&p, &q),
            _ => false,
        }
}
