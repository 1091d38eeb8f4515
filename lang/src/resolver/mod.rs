//! Lexical address resolution.
//!
//! Rewrites every name inside a lambda body from an interned id to the
//! index of its frame slot. A frame holds the parameters, then the
//! captured free names in sorted order, then any name the body defines.
//! Top-level names keep their interned ids and are looked up by name.


use std::rc::Rc;

use crate::lexer::NameId;
use crate::parser::{CoreOp, Syntax};

/// Slot layout of the frame being resolved.
struct Scope {
    names: Vec<NameId>,
}

impl Scope {
    /// Slot of `id`, allocating one for a name first defined in the body.
    fn slot(&mut self, id: NameId) -> u32 {
        match self.names.iter().position(|&n| n == id) {
            Some(i) => i as u32,
            None => {
                self.names.push(id);
                (self.names.len() - 1) as u32
            }
        }
    }
}

/// Resolves a top-level unit in place.
pub fn resolve_top(forms: &mut [Syntax]) {
    for form in forms {
        resolve(form, None);
    }
}

fn resolve(node: &mut Syntax, mut scope: Option<&mut Scope>) {
    match node {
        Syntax::Name(key, _) => {
            if let Some(scope) = scope {
                *key = scope.slot(*key);
            }
        }
        Syntax::Form(items) | Syntax::List(items) | Syntax::NonList(items) | Syntax::Record(items) => {
            for item in items {
                resolve(item, scope.as_deref_mut());
            }
        }
        Syntax::Unquote(inner) => resolve(inner, scope),
        Syntax::Op(op) => resolve_op(op, scope),
        Syntax::Symbol(_) | Syntax::Integer(_) | Syntax::Boolean(_) | Syntax::Str(_) | Syntax::Void | Syntax::Dot => {}
    }
}

fn resolve_op(op: &mut CoreOp, mut scope: Option<&mut Scope>) {
    match op {
        CoreOp::Bind { key, value } => {
            resolve(value, scope.as_deref_mut());
            if let Some(scope) = scope {
                *key = scope.slot(*key);
            }
        }
        CoreOp::Lambda(lambda) => {
            let lambda = Rc::make_mut(lambda);
            let mut inner = Scope {
                names: lambda.params.iter().chain(lambda.free.iter()).copied().collect(),
            };
            for form in &mut lambda.body {
                resolve(form, Some(&mut inner));
            }
            lambda.captures = match scope {
                Some(outer) => lambda.free.iter().map(|&id| outer.slot(id)).collect(),
                None => lambda.free.iter().copied().collect(),
            };
            lambda.slots = inner.names;
        }
        CoreOp::Cond { arms, .. } => {
            for (test, consequent) in arms {
                resolve(test, scope.as_deref_mut());
                resolve(consequent, scope.as_deref_mut());
            }
        }
        CoreOp::Seq(items) => {
            for item in items {
                resolve(item, scope.as_deref_mut());
            }
        }
        CoreOp::Import { exports, .. } => {
            if let Some(scope) = scope {
                for (dest, _) in exports {
                    *dest = scope.slot(*dest);
                }
            }
        }
        CoreOp::Export(_) => {}
    }
}
