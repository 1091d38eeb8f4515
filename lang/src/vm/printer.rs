use crate::lexer::Names;

use super::list;
use super::value::{Procedure, Value, Var};

/// External representation of a value. Strings are quoted; `display`
/// prints a top-level string raw instead.
pub fn repr(value: &Var, names: &Names) -> String {
    let mut out = String::new();
    write_value(&mut out, &value.borrow(), names);
    out
}

pub fn display(value: &Var, names: &Names) -> String {
    match &*value.borrow() {
        Value::String(s) => s.to_string(),
        other => {
            let mut out = String::new();
            write_value(&mut out, other, names);
            out
        }
    }
}

fn write_items(out: &mut String, items: &[Var], tail: Option<&Var>, names: &Names) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        write_value(out, &item.borrow(), names);
    }
    if let Some(tail) = tail {
        out.push_str(" . ");
        write_value(out, &tail.borrow(), names);
    }
}

fn write_value(out: &mut String, value: &Value, names: &Names) {
    match value {
        Value::Void => out.push_str("#void"),
        Value::Integer(n) => out.push_str(&n.to_string()),
        Value::Boolean(true) => out.push_str("#t"),
        Value::Boolean(false) => out.push_str("#f"),
        Value::String(s) => {
            out.push('"');
            out.push_str(&s.replace('"', "\\\""));
            out.push('"');
        }
        Value::Symbol(id) => out.push_str(names.text(*id)),
        Value::Cons(None) => out.push_str("()"),
        Value::Cons(_) | Value::List(_) | Value::NonList(_) => {
            if let Some((items, tail)) = list::elements(value) {
                out.push('(');
                write_items(out, &items, tail.as_ref(), names);
                out.push(')');
            }
        }
        Value::Splice(items) => {
            out.push_str("#@(");
            write_items(out, items, None, names);
            out.push(')');
        }
        Value::Record(record) => {
            out.push_str("#r(");
            out.push_str(names.text(record.name));
            for field in record.fields.borrow().iter() {
                out.push(' ');
                write_value(out, &field.borrow(), names);
            }
            out.push(')');
        }
        Value::Dict(dict) => {
            if dict.borrow().is_empty() {
                out.push_str("#{}");
            } else {
                out.push_str("#{#}");
            }
        }
        Value::Procedure(Procedure::Closure(_)) => out.push_str("#~fun"),
        Value::Procedure(Procedure::Native(_)) => out.push_str("#~fun-host"),
        Value::Port(_) => out.push_str("#~port"),
        Value::Eof => out.push_str("#~eof-object"),
        Value::Apply(_) => out.push_str("#~apply"),
        Value::Extra(_) => {
            out.push_str("#~");
            out.push_str(&value.type_name());
        }
    }
}
