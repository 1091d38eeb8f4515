//! The built-in macro set.
//!
//! Every surface form except application lowers to one of the four core
//! operations (`Bind`, `Lambda`, `Cond`, `Seq`) plus `Import`/`Export`.
//! Each function here receives the whole form, head included, with its
//! arguments already expanded.

use std::collections::HashSet;
use std::rc::Rc;

use crate::lexer::names::{self, NameId, shadow};
use crate::parser::{CoreOp, Lambda, Syntax, is_dotform, without_dot};
use crate::resolver::resolve_top;

use super::quote::{quote, unquote};
use super::{ExpandError, Expander, Macro, UserMacro, report_unbound, unbound};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinMacro {
    Quote,
    Quasiquote,
    Unquote,
    Macro,
    Gensym,
    Ref,
    Define,
    Seq,
    Lambda,
    Let,
    LetStar,
    Letrec,
    LetrecStar,
    Do,
    Begin,
    Cond,
    Case,
    If,
    And,
    Or,
    When,
    Unless,
    Export,
    Scope,
    Import,
}

pub const BUILTIN_MACROS: &[(&str, BuiltinMacro)] = &[
    ("quote", BuiltinMacro::Quote),
    ("quasiquote", BuiltinMacro::Quasiquote),
    ("unquote", BuiltinMacro::Unquote),
    ("macro", BuiltinMacro::Macro),
    ("gensym", BuiltinMacro::Gensym),
    ("ref", BuiltinMacro::Ref),
    ("define", BuiltinMacro::Define),
    ("seq", BuiltinMacro::Seq),
    ("lambda", BuiltinMacro::Lambda),
    ("let", BuiltinMacro::Let),
    ("let*", BuiltinMacro::LetStar),
    ("letrec", BuiltinMacro::Letrec),
    ("letrec*", BuiltinMacro::LetrecStar),
    ("do", BuiltinMacro::Do),
    ("begin", BuiltinMacro::Begin),
    ("cond", BuiltinMacro::Cond),
    ("case", BuiltinMacro::Case),
    ("if", BuiltinMacro::If),
    ("and", BuiltinMacro::And),
    ("or", BuiltinMacro::Or),
    ("when", BuiltinMacro::When),
    ("unless", BuiltinMacro::Unless),
    ("export", BuiltinMacro::Export),
    ("scope", BuiltinMacro::Scope),
    ("import", BuiltinMacro::Import),
];

pub fn apply(which: BuiltinMacro, s: Vec<Syntax>, ex: &mut Expander) -> Result<Syntax, ExpandError> {
    match which {
        BuiltinMacro::Quote => {
            let datum = single("quote", s)?;
            quote(datum, false)
        }
        BuiltinMacro::Quasiquote => {
            let datum = single("quasiquote", s)?;
            quote(datum, true)
        }
        BuiltinMacro::Unquote => Ok(unquote(single("unquote", s)?)),
        BuiltinMacro::Macro => define_user_macro(s, ex),
        BuiltinMacro::Gensym => {
            arity_eq("gensym", &s, 0)?;
            Ok(Syntax::Symbol(ex.vm.names.gensym()))
        }
        BuiltinMacro::Ref => reference(s),
        BuiltinMacro::Define => define(s),
        BuiltinMacro::Seq => Ok(Syntax::Op(CoreOp::Seq(rest(s)))),
        BuiltinMacro::Lambda => lambda(s),
        BuiltinMacro::Let => let_macro(s, false),
        BuiltinMacro::Letrec => let_macro(s, true),
        BuiltinMacro::LetStar => let_star(s, false),
        BuiltinMacro::LetrecStar => let_star(s, true),
        BuiltinMacro::Do => do_loop(s),
        BuiltinMacro::Begin => begin(rest(s)),
        BuiltinMacro::Cond => cond_arms(rest(s)),
        BuiltinMacro::Case => case(s),
        BuiltinMacro::If => if_form(s),
        BuiltinMacro::And => Ok(match s.len() {
            1 => Syntax::Boolean(true),
            _ => and_chain(rest(s)),
        }),
        BuiltinMacro::Or => or_chain(rest(s)),
        BuiltinMacro::When => when(s, true),
        BuiltinMacro::Unless => when(s, false),
        BuiltinMacro::Export => Ok(Syntax::Op(CoreOp::Export(rest(s)))),
        BuiltinMacro::Scope => scope(s, ex),
        BuiltinMacro::Import => import(s, ex),
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn fail(message: impl Into<String>) -> ExpandError {
    ExpandError::new(message)
}

fn arity_eq(name: &str, s: &[Syntax], n: usize) -> Result<(), ExpandError> {
    let got = s.len().saturating_sub(1);
    if got != n {
        return Err(fail(format!("{name} requires {n} args but got {got}")));
    }
    Ok(())
}

fn arity_ge(name: &str, s: &[Syntax], n: usize) -> Result<(), ExpandError> {
    let got = s.len().saturating_sub(1);
    if got < n {
        return Err(fail(format!("{name} requires {n} args but got {got}")));
    }
    Ok(())
}

fn single(name: &str, s: Vec<Syntax>) -> Result<Syntax, ExpandError> {
    arity_eq(name, &s, 1)?;
    Ok(rest(s).remove(0))
}

/// The arguments of a form, without its head.
fn rest(mut s: Vec<Syntax>) -> Vec<Syntax> {
    if s.is_empty() {
        return s;
    }
    s.remove(0);
    s
}

fn bind(key: NameId, value: Syntax) -> Syntax {
    Syntax::Op(CoreOp::Bind {
        key,
        value: Box::new(value),
    })
}

fn cond(arms: Vec<(Syntax, Syntax)>) -> Syntax {
    Syntax::Op(CoreOp::Cond { arms, line: 0 })
}

fn closure(lambda: Lambda) -> Syntax {
    Syntax::Op(CoreOp::Lambda(Rc::new(lambda)))
}

fn call(head: Syntax, args: Vec<Syntax>) -> Syntax {
    let mut items = Vec::with_capacity(args.len() + 1);
    items.push(head);
    items.extend(args);
    Syntax::Form(items)
}

fn free_in(items: &[Syntax], bound: &[NameId]) -> Result<std::collections::BTreeSet<NameId>, ExpandError> {
    let mut defs: HashSet<NameId> = bound.iter().copied().collect();
    unbound(items, &mut defs, false)
}

/// A lambda whose free set is computed from its body.
fn make_lambda(params: Vec<NameId>, variadic: bool, body: Vec<Syntax>) -> Result<Lambda, ExpandError> {
    let body = if body.is_empty() { vec![Syntax::Void] } else { body };
    let mut defs: HashSet<NameId> = params.iter().copied().collect();
    let free = unbound(&body, &mut defs, true)?;
    Ok(Lambda::new(params, variadic, free, body))
}

/// Parameter list of a lambda or macro: a bare name collects every
/// argument, a dotted form collects the remainder into its last name.
fn parameters(spec: Syntax, who: &str) -> Result<(Vec<NameId>, bool), ExpandError> {
    match spec {
        Syntax::Name(id, _) => Ok((vec![id], true)),
        Syntax::Form(items) => {
            let variadic = is_dotform(&items);
            let params = without_dot(items)
                .iter()
                .map(|p| p.as_name().ok_or_else(|| fail(format!("{who} params must be names"))))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((params, variadic))
        }
        _ => Err(fail(format!("{who}.1 expected a name"))),
    }
}

// ============================================================================
// Definitions and procedures
// ============================================================================

fn lambda(mut s: Vec<Syntax>) -> Result<Syntax, ExpandError> {
    arity_ge("lambda", &s, 2)?;
    let body = s.split_off(2);
    let spec = s.remove(1);
    let (params, variadic) = parameters(spec, "lambda")?;
    Ok(closure(make_lambda(params, variadic, body)?))
}

/// `(ref name value)` binds without copying; `(ref (f . params) body...)`
/// binds a procedure. A value that refers to its own name becomes a
/// `letrec` so the reference sees the binding.
fn reference(mut s: Vec<Syntax>) -> Result<Syntax, ExpandError> {
    arity_ge("ref", &s, 2)?;
    let mut body = s.split_off(2);
    let target = s.remove(1);

    let (name, value) = match target {
        Syntax::Form(mut items) if !items.is_empty() => {
            let head = items.remove(0);
            let (params, variadic) = parameters(Syntax::Form(items), "lambda")?;
            (head, closure(make_lambda(params, variadic, body)?))
        }
        target => {
            if body.len() != 1 {
                return Err(fail(format!("ref requires 2 args but got {}", body.len() + 1)));
            }
            (target, body.remove(0))
        }
    };
    let id = name.as_name().ok_or_else(|| fail("ref.1 expects name"))?;

    if free_in(std::slice::from_ref(&value), &[])?.contains(&id) {
        let recursive = let_form(vec![(id, value)], vec![Syntax::name(id)], true)?;
        return Ok(bind(id, recursive));
    }
    Ok(bind(id, value))
}

/// Like `ref`, but a plain binding stores a copy of the value.
fn define(mut s: Vec<Syntax>) -> Result<Syntax, ExpandError> {
    if matches!(s.get(1), Some(Syntax::Form(_))) {
        return reference(s);
    }
    arity_eq("define", &s, 2)?;
    let value = s.remove(2);
    let id = s[1].as_name().ok_or_else(|| fail("define.1 expects name"))?;
    Ok(bind(id, call(Syntax::name(names::DUP), vec![value])))
}

// ============================================================================
// Binding forms
// ============================================================================

fn binding(node: Syntax, who: &str) -> Result<(NameId, Syntax), ExpandError> {
    let Syntax::Form(mut pair) = node else {
        return Err(fail(format!("{who} expected binding")));
    };
    if pair.len() != 2 {
        return Err(fail(format!("{who} expected binding")));
    }
    let value = pair.remove(1);
    let name = pair[0]
        .as_name()
        .ok_or_else(|| fail(format!("{who} binding not to name")))?;
    Ok((name, value))
}

fn bindings(spec: Syntax, who: &str) -> Result<Vec<(NameId, Syntax)>, ExpandError> {
    let Syntax::Form(items) = spec else {
        return Err(fail(format!("{who} expected sub-form")));
    };
    items.into_iter().map(|item| binding(item, who)).collect()
}

fn let_macro(mut s: Vec<Syntax>, rec: bool) -> Result<Syntax, ExpandError> {
    let who = if rec { "letrec" } else { "let" };
    arity_ge(who, &s, 1)?;
    let body = s.split_off(2);
    match s.remove(1) {
        Syntax::Name(id, _) => named_let(id, body),
        spec => let_form(bindings(spec, who)?, body, rec),
    }
}

/// `((lambda names body...) values...)`. With `rec`, the names are bound
/// to placeholders first and each value is stored into its cell, so the
/// values can refer to one another.
fn let_form(bindings: Vec<(NameId, Syntax)>, body: Vec<Syntax>, rec: bool) -> Result<Syntax, ExpandError> {
    let (names, values): (Vec<NameId>, Vec<Syntax>) = bindings.into_iter().unzip();
    if !rec {
        let inner = make_lambda(names, false, body)?;
        return Ok(call(closure(inner), values));
    }

    let params = names.iter().map(|&n| shadow(n)).collect();
    let mut inner = make_lambda(params, false, body)?;
    store_shadows(&mut inner, &names);
    rec_frame(names, call(closure(inner), values))
}

/// Prefixes the body with `(set!! name %name)` for each shadowed name.
fn store_shadows(lambda: &mut Lambda, names: &[NameId]) {
    for &name in names {
        let store = call(
            Syntax::name(names::SET_BANG_BANG),
            vec![Syntax::name(name), Syntax::name(shadow(name))],
        );
        lambda.body.insert(0, store);
    }
    lambda.free.insert(names::SET_BANG_BANG);
    lambda.free.extend(names.iter().copied());
}

/// Wraps `form` in a lambda binding each name to a fresh void cell.
fn rec_frame(names: Vec<NameId>, form: Syntax) -> Result<Syntax, ExpandError> {
    let free = free_in(std::slice::from_ref(&form), &names)?;
    let voids = vec![Syntax::Void; names.len()];
    let outer = Lambda::new(names, false, free, vec![form]);
    Ok(call(closure(outer), voids))
}

fn let_star(mut s: Vec<Syntax>, rec: bool) -> Result<Syntax, ExpandError> {
    let who = if rec { "letrec*" } else { "let*" };
    arity_ge(who, &s, 1)?;
    let body = s.split_off(2);
    let Syntax::Form(specs) = s.remove(1) else {
        return Err(fail(format!("{who} expected sub-form")));
    };
    if specs.is_empty() {
        return begin(body);
    }

    let mut block = body;
    let mut names = Vec::new();
    for spec in specs.into_iter().rev() {
        let (name, value) = binding(spec, who)?;
        let form = if rec {
            names.push(name);
            let mut inner = make_lambda(vec![shadow(name)], false, block)?;
            store_shadows(&mut inner, &[name]);
            call(closure(inner), vec![value])
        } else {
            call(closure(make_lambda(vec![name], false, block)?), vec![value])
        };
        block = vec![form];
    }

    let form = block.remove(0);
    if rec { rec_frame(names, form) } else { Ok(form) }
}

fn named_let(name: NameId, mut rest: Vec<Syntax>) -> Result<Syntax, ExpandError> {
    if rest.is_empty() {
        return Err(fail("let expected sub-form"));
    }
    let block = rest.split_off(1);
    let (params, values): (Vec<NameId>, Vec<Syntax>) = bindings(rest.remove(0), "let")?.into_iter().unzip();
    let procedure = closure(make_lambda(params, false, block)?);
    let_form(
        vec![(name, procedure)],
        vec![call(Syntax::name(name), values)],
        true,
    )
}

/// `(do ((var init step)...) (test result...) body...)` as a named let
/// whose loop procedure is called `else`.
fn do_loop(mut s: Vec<Syntax>) -> Result<Syntax, ExpandError> {
    arity_ge("do", &s, 2)?;
    let mut body = s.split_off(3);
    let exit = s.remove(2);
    let Syntax::Form(clauses) = s.remove(1) else {
        return Err(fail("do expected sub-form"));
    };

    let mut specs = Vec::with_capacity(clauses.len());
    let mut steps = Vec::with_capacity(clauses.len());
    for clause in clauses {
        let Syntax::Form(mut items) = clause else {
            return Err(fail("do sub-form size 2 expected"));
        };
        let step = match items.len() {
            3 => items.remove(2),
            2 => items[0].clone(),
            _ => return Err(fail("do sub-form size 2 expected")),
        };
        steps.push(step);
        specs.push(Syntax::Form(items));
    }

    let Syntax::Form(mut exit) = exit else {
        return Err(fail("do expected test clause"));
    };
    if exit.is_empty() {
        return Err(fail("do expected test clause"));
    }
    let test = exit.remove(0);
    body.push(call(Syntax::name(names::ELSE), steps));

    let step = cond(vec![(test, begin(exit)?), (Syntax::Boolean(true), begin(body)?)]);
    named_let(names::ELSE, vec![Syntax::Form(specs), step])
}

fn begin(body: Vec<Syntax>) -> Result<Syntax, ExpandError> {
    Ok(call(closure(make_lambda(Vec::new(), false, body)?), Vec::new()))
}

// ============================================================================
// Conditionals
// ============================================================================

fn cond_arms(arms: Vec<Syntax>) -> Result<Syntax, ExpandError> {
    let mut out = Vec::with_capacity(arms.len());
    let mut arms = arms.into_iter();
    while let Some(arm) = arms.next() {
        let Syntax::Form(mut items) = arm else {
            return Err(fail("cond clause must be a form"));
        };
        if items.is_empty() {
            return Err(fail("cond clause must be a form"));
        }

        if items[0].is_name(names::ELSE) {
            out.push((Syntax::Boolean(true), begin(rest(items))?));
            return Ok(cond(out));
        }

        if items.get(1).is_some_and(|x| x.is_name(names::THEN)) {
            if items.len() != 3 {
                return Err(fail(format!("cond => clause of length {}", items.len())));
            }
            let receiver = items.remove(2);
            let test = items.remove(0);
            let mut remaining = vec![Syntax::Form(vec![
                Syntax::name(names::THEN),
                call(receiver, vec![Syntax::name(names::THEN)]),
            ])];
            remaining.extend(arms);
            let inner = cond_arms(remaining)?;
            out.push((
                Syntax::Boolean(true),
                let_form(vec![(names::THEN, test)], vec![inner], false)?,
            ));
            return Ok(cond(out));
        }

        let test = items.remove(0);
        let consequent = match items.len() {
            1 => items.remove(0),
            _ => begin(items)?,
        };
        out.push((test, consequent));
    }
    Ok(cond(out))
}

fn if_form(mut s: Vec<Syntax>) -> Result<Syntax, ExpandError> {
    if s.len() == 3 {
        s.push(Syntax::Void);
    }
    if s.len() != 4 {
        return Err(fail(format!("if-expression of length {}", s.len())));
    }
    let otherwise = s.remove(3);
    let then = s.remove(2);
    let test = s.remove(1);
    Ok(cond(vec![(test, then), (Syntax::Boolean(true), otherwise)]))
}

fn and_chain(mut tests: Vec<Syntax>) -> Syntax {
    if tests.len() == 1 {
        return tests.remove(0);
    }
    let first = tests.remove(0);
    cond(vec![
        (first, and_chain(tests)),
        (Syntax::Boolean(true), Syntax::Boolean(false)),
    ])
}

/// Each test is bound to `=>` so it runs once.
fn or_chain(mut tests: Vec<Syntax>) -> Result<Syntax, ExpandError> {
    if tests.is_empty() {
        return Ok(Syntax::Boolean(false));
    }
    let first = tests.remove(0);
    let body = cond(vec![
        (Syntax::name(names::THEN), Syntax::name(names::THEN)),
        (Syntax::Boolean(true), or_chain(tests)?),
    ]);
    let_form(vec![(names::THEN, first)], vec![body], false)
}

fn when(mut s: Vec<Syntax>, positive: bool) -> Result<Syntax, ExpandError> {
    arity_ge(if positive { "when" } else { "unless" }, &s, 1)?;
    let body = begin(s.split_off(2))?;
    let test = s.remove(1);
    let arms = if positive {
        vec![(test, body), (Syntax::Boolean(true), Syntax::Void)]
    } else {
        vec![(test, Syntax::Void), (Syntax::Boolean(true), body)]
    };
    Ok(cond(arms))
}

/// The key is bound to `else`; each datum is compared with `eqv?`. With no
/// `else` clause an unmatched key is an error.
fn case(mut s: Vec<Syntax>) -> Result<Syntax, ExpandError> {
    arity_ge("case", &s, 1)?;
    let clauses = s.split_off(2);
    let key = s.remove(1);

    let mut arms = Vec::with_capacity(clauses.len() + 1);
    let mut has_else = false;
    for clause in clauses {
        let Syntax::Form(mut items) = clause else {
            return Err(fail("case neither form nor else"));
        };
        if items.is_empty() {
            return Err(fail("case neither form nor else"));
        }
        let test = match items.remove(0) {
            Syntax::Form(datums) => or_chain(
                datums
                    .into_iter()
                    .map(|d| call(Syntax::name(names::EQVP), vec![d, Syntax::name(names::ELSE)]))
                    .collect(),
            )?,
            head if head.is_name(names::ELSE) => {
                has_else = true;
                Syntax::Boolean(true)
            }
            _ => return Err(fail("case neither form nor else")),
        };

        let target = if items.first().is_some_and(|x| x.is_name(names::THEN)) {
            if items.len() != 2 {
                return Err(fail(format!("length {} case => target", items.len())));
            }
            call(items.remove(1), vec![Syntax::name(names::ELSE)])
        } else if items.len() == 1 {
            items.remove(0)
        } else {
            begin(items)?
        };
        arms.push((test, target));
        if has_else {
            break;
        }
    }
    if !has_else {
        arms.push((
            Syntax::Boolean(true),
            call(Syntax::name(names::ERROR), vec![Syntax::name(names::ELSE)]),
        ));
    }
    let_form(vec![(names::ELSE, key)], vec![cond(arms)], false)
}

// ============================================================================
// Macros and units
// ============================================================================

/// `(macro name params body...)`: the body is resolved as a top-level unit
/// and runs at expansion time whenever `name` heads a form.
fn define_user_macro(mut s: Vec<Syntax>, ex: &mut Expander) -> Result<Syntax, ExpandError> {
    arity_ge("macro", &s, 3)?;
    let mut body = s.split_off(3);
    let spec = s.remove(2);
    let name = s[1].as_name().ok_or_else(|| fail("non-name macro"))?;
    let (params, variadic) = parameters(spec, "macro")?;

    resolve_top(&mut body);
    let user = UserMacro {
        name,
        params,
        variadic,
        body,
    };
    ex.define_macro(name, Macro::User(Rc::new(user)));
    Ok(Syntax::Void)
}

/// `(scope (export names...) body...)`: runs the body privately and binds
/// only the exported names in the enclosing scope.
fn scope(mut s: Vec<Syntax>, ex: &mut Expander) -> Result<Syntax, ExpandError> {
    arity_ge("scope", &s, 1)?;
    let mut body = s.split_off(2);
    let Syntax::Op(CoreOp::Export(items)) = s.remove(1) else {
        return Err(fail("missing export"));
    };
    let exports = items
        .iter()
        .map(|item| {
            item.as_name()
                .map(|id| (id, id))
                .ok_or_else(|| fail("export of non-name"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut defs: HashSet<NameId> = ex.vm.globals.keys().into_iter().collect();
    let free = unbound(&body, &mut defs, true)?;
    report_unbound(&free, &body, &ex.vm.names)?;
    resolve_top(&mut body);
    Ok(Syntax::Op(CoreOp::Import { exports, body }))
}

/// `(import "path" [prefix])`
fn import(s: Vec<Syntax>, ex: &mut Expander) -> Result<Syntax, ExpandError> {
    if !(2..=3).contains(&s.len()) {
        return Err(fail("import expects 2 or 3 args"));
    }
    let Syntax::Str(path) = &s[1] else {
        return Err(fail("import.1 expects string"));
    };
    let prefix = match s.get(2) {
        None => None,
        Some(Syntax::Name(id, _)) => Some((ex.vm.name(*id).to_string(), false)),
        Some(Syntax::Symbol(id)) => Some((ex.vm.name(*id).to_string(), true)),
        Some(_) => return Err(fail("non-name import-prefix")),
    };
    ex.import_unit(path, prefix).map_err(|e| ExpandError {
        message: format!("import \"{path}\": {}", e.message),
        line: e.line,
    })
}
