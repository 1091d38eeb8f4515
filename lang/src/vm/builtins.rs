//! Built-in native functions
//!
//! Every builtin receives its argument cells by reference and returns a
//! cell. Errors carry line 0; the evaluator stamps the line of the call.
//! Builtins that must invoke a procedure in tail position return an
//! `Apply` marker instead of calling it.

use std::cell::RefCell;
use std::rc::Rc;

use super::list;
use super::port::Port;
use super::printer;
use super::runtime::{RunError, Vm};
use super::value::{Apply, Dict, DictKey, Pair, Record, Tail, Value, Var, var};

pub type Builtin = fn(&[Var], &mut Vm) -> Result<Var, RunError>;

/// Core builtins installed into every session.
pub const BUILTINS: &[(&str, Builtin)] = &[
    // Lists
    ("list", new_list),
    ("nonlist", nonlist),
    ("list-copy", list_copy),
    ("cons", cons),
    ("car", car),
    ("cdr", cdr),
    ("list-ref", list_ref),
    ("list-tail", list_tail),
    ("list-set!", list_set),
    ("set-car!", set_car),
    ("set-cdr!", set_cdr),
    ("append", append),
    ("make-list", make_list),
    ("reverse", reverse),
    ("take", take),
    ("length", length),
    ("splice", splice),
    // Numbers
    ("+", add),
    ("-", subtract),
    ("*", multiply),
    ("/", divide),
    ("div", div),
    ("max", max),
    ("min", min),
    ("abs", abs),
    ("=", num_eq),
    ("<", num_lt),
    (">", num_gt),
    ("<=", num_le),
    (">=", num_ge),
    ("zero?", zero),
    ("positive?", positive),
    ("negative?", negative),
    ("even?", even),
    ("odd?", odd),
    // Identity and copying
    ("not", not),
    ("eq?", eqv),
    ("eqv?", eqv),
    ("equal?", equal),
    ("alias?", alias),
    ("dup", dup),
    ("set!", set),
    ("set!!", set_force),
    // Dicts
    ("alist->dict", alist_to_dict),
    ("dict->alist", dict_to_alist),
    ("dict-set!", dict_set),
    ("dict-get-default!", dict_get_default),
    ("dict-if-get", dict_if_get),
    ("dict?", is_dict),
    // Records
    ("make-record", make_record),
    ("record-get", record_get),
    ("record-set!", record_set),
    ("record?", is_record),
    // Strings and symbols
    ("string-ref", string_ref),
    ("string->list", string_to_list),
    ("list->string", list_to_string),
    ("symbol->string", symbol_to_string),
    ("substring", substring),
    ("substring-index", substring_index),
    ("string-length", string_length),
    ("string-append", string_append),
    ("string=?", string_eq),
    ("string<?", string_lt),
    ("string>?", string_gt),
    ("string->number", string_to_number),
    ("number->string", number_to_string),
    // Predicates
    ("boolean?", is_boolean),
    ("number?", is_number),
    ("procedure?", is_procedure),
    ("symbol?", is_symbol),
    ("string?", is_string),
    ("null?", is_null),
    ("list?", is_list),
    ("pair?", is_pair),
    ("void?", is_void),
    ("cont??", is_contiguous),
    // Higher order
    ("apply", apply),
    ("map", map),
    ("member", member),
    ("assoc", assoc),
    // I/O and control
    ("display", display),
    ("write", write),
    ("read", read),
    ("error", error),
    ("exit", exit),
    ("eof-object?", is_eof),
    ("read-byte", read_byte),
    ("read-line", read_line),
    ("write-byte", write_byte),
    ("write-string", write_string),
    ("open-input-string", open_input_string),
    ("open-input-string-bytes", open_input_string_bytes),
    ("open-output-string", open_output_string),
    ("output-string-get", output_string_get),
    ("output-string-get-bytes", output_string_get_bytes),
];

pub fn install(vm: &mut Vm) {
    for &(name, func) in BUILTINS {
        vm.define_native(name, Rc::new(func));
    }
}

// ============================================================================
// Argument checks
// ============================================================================

pub fn ok(value: Value) -> Result<Var, RunError> {
    Ok(var(value))
}

pub fn void() -> Result<Var, RunError> {
    ok(Value::Void)
}

pub fn boolean(b: bool) -> Result<Var, RunError> {
    ok(Value::Boolean(b))
}

pub fn arity_eq(name: &str, args: &[Var], n: usize) -> Result<(), RunError> {
    if args.len() != n {
        return Err(arity_error(name, args.len(), n));
    }
    Ok(())
}

pub fn arity_ge(name: &str, args: &[Var], n: usize) -> Result<(), RunError> {
    if args.len() < n {
        return Err(arity_error(name, args.len(), n));
    }
    Ok(())
}

fn arity_error(name: &str, got: usize, n: usize) -> RunError {
    RunError::new(format!("{name} requires {n} args but got {got}"), 0)
}

pub fn arg<'a>(name: &str, args: &'a [Var], i: usize) -> Result<&'a Var, RunError> {
    args.get(i)
        .ok_or_else(|| RunError::new(format!("{name} with no args[{i}]"), 0))
}

pub fn type_error(name: &str, i: usize, expected: &str, got: &Value) -> RunError {
    RunError::new(
        format!("{name} expected args[{i}] {expected} got {}", got.type_name()),
        0,
    )
}

fn accepts_error(name: &str, i: usize, accepted: &str, got: &Value) -> RunError {
    RunError::new(
        format!("{name} args[{i}] accepts '{accepted}' got {}", got.type_name()),
        0,
    )
}

pub fn int_arg(name: &str, args: &[Var], i: usize) -> Result<i64, RunError> {
    match &*arg(name, args, i)?.borrow() {
        Value::Integer(n) => Ok(*n),
        other => Err(type_error(name, i, "number", other)),
    }
}

pub fn string_arg(name: &str, args: &[Var], i: usize) -> Result<Rc<str>, RunError> {
    match &*arg(name, args, i)?.borrow() {
        Value::String(s) => Ok(s.clone()),
        other => Err(type_error(name, i, "string", other)),
    }
}

pub fn port_arg(name: &str, args: &[Var], i: usize) -> Result<Rc<RefCell<Port>>, RunError> {
    match &*arg(name, args, i)?.borrow() {
        Value::Port(port) => Ok(port.clone()),
        other => Err(type_error(name, i, "port", other)),
    }
}

pub fn procedure_arg<'a>(name: &str, args: &'a [Var], i: usize) -> Result<&'a Var, RunError> {
    let cell = arg(name, args, i)?;
    if !cell.borrow().is_procedure() {
        return Err(accepts_error(name, i, "fun/fun-host", &cell.borrow()));
    }
    Ok(cell)
}

/// Elements of a proper list argument in either representation.
pub fn list_arg(name: &str, args: &[Var], i: usize) -> Result<Vec<Var>, RunError> {
    let value = arg(name, args, i)?.borrow();
    match &*value {
        Value::List(_) | Value::Cons(_) => list::proper_elements(&value, name),
        other => Err(accepts_error(name, i, "list/cons", other)),
    }
}

fn list_family_arg<'a>(name: &str, args: &'a [Var], i: usize) -> Result<&'a Var, RunError> {
    let cell = arg(name, args, i)?;
    if !cell.borrow().is_list_family() {
        return Err(accepts_error(name, i, "cons/list/nonlist", &cell.borrow()));
    }
    Ok(cell)
}

fn index(name: &str, n: i64, len: usize) -> Result<usize, RunError> {
    usize::try_from(n)
        .ok()
        .filter(|&i| i < len)
        .ok_or_else(|| RunError::new(format!("{name} index {n} out of range"), 0))
}

fn io_error(name: &str, error: std::io::Error) -> RunError {
    RunError::new(format!("{name}: {error}"), 0)
}

// ============================================================================
// Lists
// ============================================================================

fn new_list(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    ok(Value::list(args.to_vec()))
}

fn nonlist(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_ge("nonlist", args, 2)?;
    ok(Value::NonList(args.to_vec()))
}

fn list_copy(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("list-copy", args, 1)?;
    ok(Value::list(list_arg("list-copy", args, 0)?))
}

fn cons(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("cons", args, 2)?;
    match list::ensure_cons(&args[1]) {
        Some(chain) => ok(Value::Cons(Some(Pair::new(
            args[0].clone(),
            Tail::from_chain(chain),
        )))),
        None => ok(Value::NonList(args.to_vec())),
    }
}

pub fn car_of(name: &str, cell: &Var) -> Result<Var, RunError> {
    match &*cell.borrow() {
        Value::List(items) | Value::NonList(items) => items
            .first()
            .cloned()
            .ok_or_else(|| RunError::broken("empty contiguous list")),
        Value::Cons(Some(pair)) => Ok(pair.car()),
        Value::Cons(None) => Err(RunError::new("car on null", 0)),
        other => Err(accepts_error(name, 0, "cons/list/nonlist", other)),
    }
}

pub fn cdr_of(name: &str, cell: &Var) -> Result<Var, RunError> {
    if let Value::NonList(items) = &*cell.borrow()
        && items.len() == 2
    {
        return Ok(items[1].clone());
    }
    match list::ensure_cons(cell) {
        None => Err(accepts_error(name, 0, "cons/list/nonlist", &cell.borrow())),
        Some(None) => Err(RunError::new("cdr on null", 0)),
        Some(Some(pair)) => match pair.cdr() {
            Tail::Nil => ok(Value::empty_list()),
            Tail::Pair(next) => ok(Value::Cons(Some(next))),
            Tail::Improper(last) => Ok(last),
        },
    }
}

fn car(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("car", args, 1)?;
    car_of("car", &args[0])
}

fn cdr(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("cdr", args, 1)?;
    cdr_of("cdr", &args[0])
}

/// Follows `n` cdrs from the head of a chain.
fn walk(chain: Option<Rc<Pair>>, n: usize) -> Option<Tail> {
    let mut tail = Tail::from_chain(chain);
    for _ in 0..n {
        tail = match tail {
            Tail::Pair(pair) => pair.cdr(),
            _ => return None,
        };
    }
    Some(tail)
}

fn list_ref(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("list-ref", args, 2)?;
    let n = int_arg("list-ref", args, 1)?;
    match &*args[0].borrow() {
        Value::List(items) | Value::NonList(items) => {
            Ok(items[index("list-ref", n, items.len())?].clone())
        }
        Value::Cons(chain) => {
            let steps = usize::try_from(n).ok();
            match steps.and_then(|steps| walk(chain.clone(), steps)) {
                Some(Tail::Pair(pair)) => Ok(pair.car()),
                _ => Err(RunError::new(format!("list-ref index {n} out of range"), 0)),
            }
        }
        other => Err(RunError::new(format!("list-ref on {}", other.type_name()), 0)),
    }
}

fn list_tail(args: &[Var], vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("list-tail", args, 2)?;
    let n = int_arg("list-tail", args, 1)?;
    let invalid = match &*args[0].borrow() {
        Value::List(_) | Value::Cons(_) => None,
        other => Some(accepts_error("list-tail", 0, "list/cons", other)),
    };
    if let Some(error) = invalid {
        return Err(error);
    }
    let chain = list::ensure_cons(&args[0]).flatten();
    let mut tail = Tail::from_chain(chain);
    for _ in 0..n.max(0) {
        let Tail::Pair(pair) = &tail else {
            vm.warn("list-tail overrun");
            break;
        };
        let next = pair.cdr();
        tail = next;
    }
    match tail {
        Tail::Nil => ok(Value::empty_list()),
        Tail::Pair(pair) => ok(Value::Cons(Some(pair))),
        Tail::Improper(last) => Ok(last),
    }
}

fn list_set(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("list-set!", args, 3)?;
    let n = int_arg("list-set!", args, 1)?;
    let mut target = args[0].borrow_mut();
    match &mut *target {
        Value::List(items) => {
            let i = index("list-set!", n, items.len())?;
            items[i] = args[2].clone();
        }
        Value::Cons(chain) => {
            let steps = usize::try_from(n).ok();
            match steps.and_then(|steps| walk(chain.clone(), steps)) {
                Some(Tail::Pair(pair)) => *pair.car.borrow_mut() = args[2].clone(),
                _ => return Err(RunError::new(format!("list-set! index {n} out of range"), 0)),
            }
        }
        other => return Err(accepts_error("list-set!", 0, "list/cons", other)),
    }
    void()
}

fn set_car(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("set-car!", args, 2)?;
    let value = args[1].clone();
    match &mut *args[0].borrow_mut() {
        Value::List(items) | Value::NonList(items) => items[0] = value,
        Value::Cons(Some(pair)) => *pair.car.borrow_mut() = value,
        Value::Cons(None) => return Err(RunError::new("set-car! on null", 0)),
        other => return Err(accepts_error("set-car!", 0, "cons/list/nonlist", other)),
    }
    void()
}

fn set_cdr(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("set-cdr!", args, 2)?;
    list_family_arg("set-cdr!", args, 0)?;
    let tail = match list::ensure_cons(&args[1]) {
        Some(chain) => Tail::from_chain(chain),
        None => Tail::Improper(args[1].clone()),
    };

    let head = match &*args[0].borrow() {
        Value::Cons(Some(pair)) => {
            *pair.cdr.borrow_mut() = tail;
            return void();
        }
        Value::Cons(None) => return Err(RunError::new("set-cdr! on null", 0)),
        Value::List(items) | Value::NonList(items) => items[0].clone(),
        _ => return Err(RunError::broken("set-cdr! on non-list")),
    };
    *args[0].borrow_mut() = Value::Cons(Some(Pair::new(head, tail)));
    void()
}

fn append(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    let Some((last, init)) = args.split_last() else {
        return ok(Value::empty_list());
    };
    if init.is_empty() {
        return Ok(last.clone());
    }

    let mut items = Vec::new();
    for i in 0..init.len() {
        items.extend(list_arg("append", args, i)?);
    }
    let tail = match list::ensure_cons(last) {
        Some(chain) => Tail::from_chain(chain),
        None if items.is_empty() => return Ok(last.clone()),
        None => Tail::Improper(last.clone()),
    };
    match list::build(&items, tail) {
        Tail::Pair(pair) => ok(Value::Cons(Some(pair))),
        Tail::Nil => ok(Value::empty_list()),
        Tail::Improper(last) => Ok(last),
    }
}

fn make_list(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_ge("make-list", args, 1)?;
    let n = int_arg("make-list", args, 0)?;
    let fill = args.get(1).cloned().unwrap_or_else(|| var(Value::Void));
    let n = usize::try_from(n)
        .map_err(|_| RunError::new(format!("make-list negative length {n}"), 0))?;
    ok(Value::list(vec![fill; n]))
}

fn reverse(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("reverse", args, 1)?;
    let mut items = list_arg("reverse", args, 0)?;
    items.reverse();
    ok(Value::list(items))
}

fn take(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("take", args, 2)?;
    let n = int_arg("take", args, 0)?;
    let items = match &*args[1].borrow() {
        Value::List(_) | Value::Cons(_) => list::elements(&args[1].borrow())
            .map(|(items, _)| items)
            .unwrap_or_default(),
        other => return Err(accepts_error("take", 1, "list/cons", other)),
    };
    let n = usize::try_from(n).unwrap_or(0).min(items.len());
    ok(Value::list(items[..n].to_vec()))
}

fn length(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("length", args, 1)?;
    let value = args[0].borrow();
    match list::length(&value) {
        Some(n) => ok(Value::Integer(n as i64)),
        None => Err(accepts_error("length", 0, "list/cons", &value)),
    }
}

fn splice(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("splice", args, 1)?;
    ok(Value::Splice(list_arg("splice", args, 0)?))
}

// ============================================================================
// Numbers
// ============================================================================

fn overflow(name: &str) -> RunError {
    RunError::new(format!("{name}: integer overflow"), 0)
}

fn add(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    let mut sum: i64 = 0;
    for i in 0..args.len() {
        sum = sum
            .checked_add(int_arg("+", args, i)?)
            .ok_or_else(|| overflow("+"))?;
    }
    ok(Value::Integer(sum))
}

fn subtract(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    let first = int_arg("-", args, 0)?;
    if args.len() == 1 {
        return ok(Value::Integer(first.checked_neg().ok_or_else(|| overflow("-"))?));
    }
    let mut result = first;
    for i in 1..args.len() {
        result = result
            .checked_sub(int_arg("-", args, i)?)
            .ok_or_else(|| overflow("-"))?;
    }
    ok(Value::Integer(result))
}

fn multiply(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    let mut product: i64 = 1;
    for i in 0..args.len() {
        product = product
            .checked_mul(int_arg("*", args, i)?)
            .ok_or_else(|| overflow("*"))?;
    }
    ok(Value::Integer(product))
}

/// Floored quotient and remainder: the remainder takes the divisor's sign.
fn floor_div_rem(name: &str, args: &[Var]) -> Result<(i64, i64), RunError> {
    let n = int_arg(name, args, 0)?;
    let mut d: i64 = 1;
    for i in 1..args.len() {
        d = d
            .checked_mul(int_arg(name, args, i)?)
            .ok_or_else(|| overflow(name))?;
    }
    if d == 0 {
        return Err(RunError::new(format!("{name}: division by zero"), 0));
    }
    let q = n.checked_div(d).ok_or_else(|| overflow(name))?;
    let r = n.checked_rem(d).ok_or_else(|| overflow(name))?;
    if r != 0 && ((r < 0) != (d < 0)) {
        Ok((q - 1, r + d))
    } else {
        Ok((q, r))
    }
}

fn divide(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    let (q, _) = floor_div_rem("/", args)?;
    ok(Value::Integer(q))
}

fn div(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    let (q, r) = floor_div_rem("div", args)?;
    ok(Value::NonList(vec![
        var(Value::Integer(q)),
        var(Value::Integer(r)),
    ]))
}

fn fold_ints(name: &str, args: &[Var], pick: fn(i64, i64) -> i64) -> Result<Var, RunError> {
    let mut result = int_arg(name, args, 0)?;
    for i in 1..args.len() {
        result = pick(result, int_arg(name, args, i)?);
    }
    ok(Value::Integer(result))
}

fn max(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    fold_ints("max", args, i64::max)
}

fn min(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    fold_ints("min", args, i64::min)
}

fn abs(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    let n = int_arg("abs", args, 0)?;
    ok(Value::Integer(n.checked_abs().ok_or_else(|| overflow("abs"))?))
}

/// True when `pred` holds for every adjacent pair.
fn compare_chain(name: &str, args: &[Var], pred: fn(i64, i64) -> bool) -> Result<Var, RunError> {
    if args.is_empty() {
        return boolean(true);
    }
    let mut prev = int_arg(name, args, 0)?;
    for i in 1..args.len() {
        let next = int_arg(name, args, i)?;
        if !pred(prev, next) {
            return boolean(false);
        }
        prev = next;
    }
    boolean(true)
}

fn num_eq(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    compare_chain("=", args, |a, b| a == b)
}

fn num_lt(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    compare_chain("<", args, |a, b| a < b)
}

fn num_gt(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    compare_chain(">", args, |a, b| a > b)
}

fn num_le(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    compare_chain("<=", args, |a, b| a <= b)
}

fn num_ge(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    compare_chain(">=", args, |a, b| a >= b)
}

fn zero(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    boolean(int_arg("zero?", args, 0)? == 0)
}

fn positive(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    boolean(int_arg("positive?", args, 0)? > 0)
}

fn negative(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    boolean(int_arg("negative?", args, 0)? < 0)
}

fn even(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    boolean(int_arg("even?", args, 0)?.rem_euclid(2) == 0)
}

fn odd(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    boolean(int_arg("odd?", args, 0)?.rem_euclid(2) == 1)
}

// ============================================================================
// Identity and copying
// ============================================================================

fn not(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("not", args, 1)?;
    boolean(args[0].borrow().is_false())
}

fn eqv(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("eqv?", args, 2)?;
    boolean(list::is_eqv(&args[0], &args[1]))
}

fn equal(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("equal?", args, 2)?;
    boolean(list::is_equal(&args[0], &args[1]))
}

fn alias(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("alias?", args, 2)?;
    boolean(Rc::ptr_eq(&args[0], &args[1]))
}

/// Returns the argument itself when no one else holds the cell, and a
/// one-level copy otherwise.
pub fn dup(args: &[Var], vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("dup", args, 1)?;
    let cell = &args[0];
    if matches!(&*cell.borrow(), Value::Void) {
        vm.warn("dup of void");
        return Ok(cell.clone());
    }
    // The argument slice holds one reference; any other is an owner.
    if Rc::strong_count(cell) == 1 {
        return Ok(cell.clone());
    }
    let copy = var(Value::Void);
    list::assign(&copy, cell);
    Ok(copy)
}

fn set(args: &[Var], vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("set!", args, 2)?;
    {
        let (target, source) = (args[0].borrow(), args[1].borrow());
        let both_lists = target.is_list_family() && source.is_list_family();
        if !both_lists && target.type_name() != source.type_name() {
            vm.warn(format!(
                "set! {} with {}",
                target.type_name(),
                source.type_name()
            ));
        }
    }
    list::assign(&args[0], &args[1]);
    void()
}

fn set_force(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("set!!", args, 2)?;
    list::assign(&args[0], &args[1]);
    void()
}

// ============================================================================
// Dicts
// ============================================================================

fn dict_arg(name: &str, args: &[Var], i: usize) -> Result<Rc<RefCell<Dict>>, RunError> {
    match &*arg(name, args, i)?.borrow() {
        Value::Dict(dict) => Ok(dict.clone()),
        other => Err(type_error(name, i, "dict", other)),
    }
}

/// Key of the right type for `dict`, or an error naming both types.
fn dict_key(name: &str, dict: &Dict, key: &Var) -> Result<DictKey, RunError> {
    let value = key.borrow();
    let wanted = dict.key_type().unwrap_or("number/string");
    match DictKey::from_value(&value) {
        Some(key) if dict.accepts(&key) => Ok(key),
        _ => Err(RunError::new(
            format!("{name}: key type {} not dict type {wanted}", value.type_name()),
            0,
        )),
    }
}

fn alist_to_dict(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("alist->dict", args, 1)?;
    let mut dict = Dict::new();
    for entry in list_arg("alist->dict", args, 0)? {
        if !entry.borrow().is_list_family() {
            return Err(RunError::new("not alist", 0));
        }
        let key = car_of("alist->dict", &entry)?;
        let value = cdr_of("alist->dict", &entry)?;
        let key = DictKey::from_value(&key.borrow())
            .filter(|key| dict.accepts(key))
            .ok_or_else(|| RunError::new("dict key types differ", 0))?;
        dict.insert(key, value);
    }
    ok(Value::Dict(Rc::new(RefCell::new(dict))))
}

fn dict_to_alist(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("dict->alist", args, 1)?;
    let dict = dict_arg("dict->alist", args, 0)?;
    let pairs = dict
        .borrow()
        .entries()
        .map(|(key, value)| var(Value::NonList(vec![var(key.to_value()), value.clone()])))
        .collect();
    ok(Value::list(pairs))
}

fn dict_set(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("dict-set!", args, 3)?;
    let dict = dict_arg("dict-set!", args, 0)?;
    let key = dict_key("dict-set!", &dict.borrow(), &args[1])?;
    dict.borrow_mut().insert(key, args[2].clone());
    void()
}

fn dict_get_default(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("dict-get-default!", args, 3)?;
    let dict = dict_arg("dict-get-default!", args, 0)?;
    let key = dict_key("dict-get-default!", &dict.borrow(), &args[1])?;
    if let Some(value) = dict.borrow().get(&key) {
        return Ok(value);
    }
    dict.borrow_mut().insert(key, args[2].clone());
    Ok(args[2].clone())
}

fn dict_if_get(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("dict-if-get", args, 4)?;
    let dict = dict_arg("dict-if-get", args, 0)?;
    let target = procedure_arg("dict-if-get", args, 3)?;
    let found = DictKey::from_value(&args[1].borrow()).and_then(|key| dict.borrow().get(&key));
    match found {
        Some(value) => ok(Value::Apply(Rc::new(Apply {
            target: target.clone(),
            args: vec![value],
        }))),
        None => Ok(args[2].clone()),
    }
}

fn is_dict(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("dict?", args, 1)?;
    boolean(matches!(&*args[0].borrow(), Value::Dict(_)))
}

// ============================================================================
// Records
// ============================================================================

fn record_arg(name: &str, args: &[Var], i: usize) -> Result<Rc<Record>, RunError> {
    match &*arg(name, args, i)?.borrow() {
        Value::Record(record) => Ok(record.clone()),
        other => Err(type_error(name, i, "record", other)),
    }
}

fn make_record(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_ge("make-record", args, 1)?;
    let name = match &*args[0].borrow() {
        Value::Symbol(id) => *id,
        other => return Err(type_error("make-record", 0, "name", other)),
    };
    ok(Value::Record(Rc::new(Record {
        name,
        fields: RefCell::new(args[1..].to_vec()),
    })))
}

fn record_get(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("record-get", args, 2)?;
    let record = record_arg("record-get", args, 0)?;
    let n = int_arg("record-get", args, 1)?;
    let fields = record.fields.borrow();
    Ok(fields[index("record-get", n, fields.len())?].clone())
}

fn record_set(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("record-set!", args, 3)?;
    let record = record_arg("record-set!", args, 0)?;
    let n = int_arg("record-set!", args, 1)?;
    let mut fields = record.fields.borrow_mut();
    let i = index("record-set!", n, fields.len())?;
    fields[i] = args[2].clone();
    void()
}

fn is_record(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("record?", args, 2)?;
    let name = match &*args[1].borrow() {
        Value::Symbol(id) => *id,
        other => return Err(type_error("record?", 1, "name", other)),
    };
    boolean(matches!(&*args[0].borrow(), Value::Record(record) if record.name == name))
}

// ============================================================================
// Strings and symbols
// ============================================================================

/// Resolves a possibly negative character offset against `len`.
fn clamp_offset(n: i64, len: usize) -> usize {
    let len_i = len as i64;
    let n = if n < 0 { n + len_i } else { n };
    n.clamp(0, len_i) as usize
}

fn string_ref(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("string-ref", args, 2)?;
    let s = string_arg("string-ref", args, 0)?;
    let n = int_arg("string-ref", args, 1)?;
    let c = usize::try_from(n)
        .ok()
        .and_then(|i| s.chars().nth(i))
        .ok_or_else(|| RunError::new(format!("string-ref index {n} out of range"), 0))?;
    ok(Value::Integer(c as i64))
}

fn string_to_list(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("string->list", args, 1)?;
    let s = string_arg("string->list", args, 0)?;
    ok(Value::list(
        s.chars().map(|c| var(Value::Integer(c as i64))).collect(),
    ))
}

fn list_to_string(args: &[Var], vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("list->string", args, 1)?;
    let mut s = String::new();
    for item in list_arg("list->string", args, 0)? {
        let c = match &*item.borrow() {
            Value::Integer(n) => u32::try_from(*n).ok().and_then(char::from_u32),
            _ => None,
        };
        let c = c.ok_or_else(|| {
            RunError::new(
                format!("list->string expects character codes, got {}", printer::repr(&item, &vm.names)),
                0,
            )
        })?;
        s.push(c);
    }
    ok(Value::string(s))
}

fn symbol_to_string(args: &[Var], vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("symbol->string", args, 1)?;
    match &*args[0].borrow() {
        Value::Symbol(id) => ok(Value::string(vm.names.text(*id))),
        other => Err(type_error("symbol->string", 0, "name", other)),
    }
}

fn substring(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_ge("substring", args, 2)?;
    let s = string_arg("substring", args, 0)?;
    let len = s.chars().count();
    let start = clamp_offset(int_arg("substring", args, 1)?, len);
    let end = match args.len() {
        2 => len,
        _ => clamp_offset(int_arg("substring", args, 2)?, len),
    };
    let part: String = s.chars().skip(start).take(end.saturating_sub(start)).collect();
    ok(Value::string(part))
}

fn substring_index(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_ge("substring-index", args, 2)?;
    let needle = string_arg("substring-index", args, 0)?;
    let haystack = string_arg("substring-index", args, 1)?;
    let len = haystack.chars().count();
    let start = match args.len() {
        2 => 0,
        _ => clamp_offset(int_arg("substring-index", args, 2)?, len),
    };
    let offset = haystack
        .char_indices()
        .nth(start)
        .map_or(haystack.len(), |(i, _)| i);
    let found = haystack[offset..]
        .find(&*needle)
        .map(|i| (start + haystack[offset..offset + i].chars().count()) as i64);
    ok(Value::Integer(found.unwrap_or(-1)))
}

fn string_length(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("string-length", args, 1)?;
    let s = string_arg("string-length", args, 0)?;
    ok(Value::Integer(s.chars().count() as i64))
}

fn string_append(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    let mut result = String::new();
    for i in 0..args.len() {
        result.push_str(&string_arg("string-append", args, i)?);
    }
    ok(Value::string(result))
}

fn compare_strings(name: &str, args: &[Var], pred: fn(&str, &str) -> bool) -> Result<Var, RunError> {
    arity_eq(name, args, 2)?;
    let a = string_arg(name, args, 0)?;
    let b = string_arg(name, args, 1)?;
    boolean(pred(&a, &b))
}

fn string_eq(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    compare_strings("string=?", args, |a, b| a == b)
}

fn string_lt(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    compare_strings("string<?", args, |a, b| a < b)
}

fn string_gt(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    compare_strings("string>?", args, |a, b| a > b)
}

/// Parses an integer the way the reader does. Radix 0 takes the base
/// from a `0x`/`0o`/`0b` prefix; an explicit radix also accepts its own prefix.
fn parse_radix(text: &str, radix: u32) -> Option<i64> {
    let text = text.trim();
    let (negative, body) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let lower = body.to_ascii_lowercase();
    let (radix, digits) = match (radix, lower.get(..2)) {
        (0 | 16, Some("0x")) => (16, &body[2..]),
        (0 | 8, Some("0o")) => (8, &body[2..]),
        (0 | 2, Some("0b")) => (2, &body[2..]),
        (0, _) => (10, body),
        (radix, _) => (radix, body),
    };
    let digits = digits.replace('_', "");
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    let magnitude = i128::from_str_radix(&digits, radix).ok()?;
    i64::try_from(if negative { -magnitude } else { magnitude }).ok()
}

fn string_to_number(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_ge("string->number", args, 1)?;
    let s = string_arg("string->number", args, 0)?;
    let radix = match args.len() {
        1 => 0,
        _ => int_arg("string->number", args, 1)?,
    };
    let valid_radix = radix == 0 || (2..=36).contains(&radix);
    valid_radix
        .then(|| parse_radix(&s, radix as u32))
        .flatten()
        .map(|n| var(Value::Integer(n)))
        .ok_or_else(|| RunError::new(format!("string->number {s} with radix {radix}"), 0))
}

fn number_to_string(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_ge("number->string", args, 1)?;
    let n = int_arg("number->string", args, 0)?;
    let radix = match args.len() {
        1 => 10,
        _ => int_arg("number->string", args, 1)?,
    };
    let magnitude = n.unsigned_abs();
    let digits = match radix {
        2 => format!("{magnitude:b}"),
        8 => format!("{magnitude:o}"),
        10 => format!("{magnitude}"),
        16 => format!("{magnitude:x}"),
        _ => {
            return Err(RunError::new(
                format!("number->string {n} with radix {radix}"),
                0,
            ));
        }
    };
    let sign = if n < 0 { "-" } else { "" };
    ok(Value::string(format!("{sign}{digits}")))
}

// ============================================================================
// Predicates
// ============================================================================

fn type_test(name: &str, args: &[Var], test: fn(&Value) -> bool) -> Result<Var, RunError> {
    arity_eq(name, args, 1)?;
    boolean(test(&args[0].borrow()))
}

fn is_boolean(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    type_test("boolean?", args, |v| matches!(v, Value::Boolean(_)))
}

fn is_number(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    type_test("number?", args, |v| matches!(v, Value::Integer(_)))
}

fn is_procedure(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    type_test("procedure?", args, Value::is_procedure)
}

fn is_symbol(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    type_test("symbol?", args, |v| matches!(v, Value::Symbol(_)))
}

fn is_string(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    type_test("string?", args, |v| matches!(v, Value::String(_)))
}

fn is_null(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    type_test("null?", args, Value::is_null)
}

fn is_list(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    type_test("list?", args, |v| match v {
        Value::List(_) => true,
        Value::Cons(_) => matches!(list::elements(v), Some((_, None))),
        _ => false,
    })
}

fn is_pair(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    type_test("pair?", args, |v| match v {
        Value::List(_) | Value::NonList(_) => true,
        Value::Cons(chain) => chain.is_some(),
        _ => false,
    })
}

fn is_void(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    type_test("void?", args, |v| matches!(v, Value::Void))
}

/// Whether a list is still in contiguous form.
fn is_contiguous(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    type_test("cont??", args, |v| matches!(v, Value::List(_) | Value::NonList(_)))
}

fn is_eof(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    type_test("eof-object?", args, |v| matches!(v, Value::Eof))
}

// ============================================================================
// Higher order
// ============================================================================

fn apply(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("apply", args, 2)?;
    let call_args = list_arg("apply", args, 1)?;
    ok(Value::Apply(Rc::new(Apply {
        target: args[0].clone(),
        args: call_args,
    })))
}

fn map(args: &[Var], vm: &mut Vm) -> Result<Var, RunError> {
    arity_ge("map", args, 2)?;
    let f = procedure_arg("map", args, 0)?;
    let inputs = (1..args.len())
        .map(|i| list_arg("map", args, i))
        .collect::<Result<Vec<_>, _>>()?;
    let rows = inputs.iter().map(Vec::len).min().unwrap_or(0);

    let mut results = Vec::with_capacity(rows);
    for row in 0..rows {
        let call_args = inputs.iter().map(|input| input[row].clone()).collect();
        results.push(vm.call(f, call_args)?);
    }
    ok(Value::list(results))
}

/// Builds the test `member` and `assoc` apply to candidates: a procedure
/// argument is a predicate, anything else is compared with `equal?`.
fn search_test(needle: &Var, candidate: &Var, vm: &mut Vm) -> Result<bool, RunError> {
    if needle.borrow().is_procedure() {
        let verdict = vm.call(needle, vec![candidate.clone()])?;
        return Ok(!verdict.borrow().is_false());
    }
    Ok(list::is_equal(needle, candidate))
}

fn member(args: &[Var], vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("member", args, 2)?;
    let haystack = list_family_arg("member", args, 1)?;
    let chain = list::ensure_cons(haystack).flatten();

    let mut tail = Tail::from_chain(chain);
    let mut first = true;
    loop {
        match tail {
            Tail::Nil => return boolean(false),
            Tail::Pair(pair) => {
                if search_test(&args[0], &pair.car(), vm)? {
                    return if first {
                        Ok(haystack.clone())
                    } else {
                        ok(Value::Cons(Some(pair)))
                    };
                }
                tail = pair.cdr();
            }
            Tail::Improper(last) => {
                vm.warn("member hit non-cons cdr");
                return if search_test(&args[0], &last, vm)? {
                    Ok(last)
                } else {
                    boolean(false)
                };
            }
        }
        first = false;
    }
}

fn assoc(args: &[Var], vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("assoc", args, 2)?;
    let haystack = list_family_arg("assoc", args, 1)?;
    let (entries, tail) = list::elements(&haystack.borrow()).unwrap_or_default();
    for entry in entries {
        let key = car_of("assoc", &entry)?;
        if search_test(&args[0], &key, vm)? {
            return Ok(entry);
        }
    }
    if tail.is_some() {
        vm.warn("assoc hit non-cons cdr");
    }
    boolean(false)
}

// ============================================================================
// I/O and control
// ============================================================================

fn display(args: &[Var], vm: &mut Vm) -> Result<Var, RunError> {
    let text = args
        .iter()
        .map(|a| printer::display(a, &vm.names))
        .collect::<Vec<_>>()
        .join(" ");
    vm.output()
        .borrow_mut()
        .write_string(&text)
        .map_err(|e| io_error("display", e))?;
    void()
}

fn write(args: &[Var], vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("write", args, 1)?;
    ok(Value::string(printer::repr(&args[0], &vm.names)))
}

fn read(args: &[Var], vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("read", args, 1)?;
    let text = string_arg("read", args, 0)?;
    let tokens = crate::lexer::Lexer::new(&text, &mut vm.names)
        .tokenize()
        .map_err(|e| RunError::new(format!("read: {}", e.message), 0))?;
    let forms = crate::parser::Parser::new(tokens)
        .parse_program()
        .map_err(|e| RunError::new(format!("read: {}", e.message), 0))?;
    let Some(first) = forms.first() else {
        return void();
    };
    if forms.len() > 1 {
        vm.warn("trailing objects");
    }
    crate::expander::quote::from_syntax(first, vm)
        .map_err(|e| RunError::new(format!("read: {}", e.message), 0))
}

fn error(args: &[Var], vm: &mut Vm) -> Result<Var, RunError> {
    let message = args
        .iter()
        .map(|a| printer::display(a, &vm.names))
        .collect::<Vec<_>>()
        .join(" ");
    Err(RunError::new(message, 0))
}

fn exit(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    let code = match args.len() {
        0 => 0,
        _ => int_arg("exit", args, 0)?,
    };
    Err(RunError::exit(i32::try_from(code).unwrap_or(1)))
}

fn read_byte(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("read-byte", args, 1)?;
    let port = port_arg("read-byte", args, 0)?;
    let byte = port.borrow_mut().read_byte().map_err(|e| io_error("read-byte", e))?;
    ok(byte.map_or(Value::Eof, |b| Value::Integer(b as i64)))
}

fn read_line(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("read-line", args, 1)?;
    let port = port_arg("read-line", args, 0)?;
    let line = port.borrow_mut().read_line().map_err(|e| io_error("read-line", e))?;
    ok(line.map_or(Value::Eof, Value::string))
}

fn write_byte(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("write-byte", args, 2)?;
    let n = int_arg("write-byte", args, 0)?;
    let port = port_arg("write-byte", args, 1)?;
    let byte = u8::try_from(n)
        .map_err(|_| RunError::new(format!("write-byte value {n} out of range"), 0))?;
    port.borrow_mut()
        .write_byte(byte)
        .map_err(|e| io_error("write-byte", e))?;
    void()
}

fn write_string(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("write-string", args, 2)?;
    let s = string_arg("write-string", args, 0)?;
    let port = port_arg("write-string", args, 1)?;
    port.borrow_mut()
        .write_string(&s)
        .map_err(|e| io_error("write-string", e))?;
    void()
}

fn port(port: Port) -> Result<Var, RunError> {
    ok(Value::Port(Rc::new(RefCell::new(port))))
}

fn open_input_string(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("open-input-string", args, 1)?;
    let s = string_arg("open-input-string", args, 0)?;
    port(Port::input_string(s.as_bytes().to_vec()))
}

fn open_input_string_bytes(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("open-input-string-bytes", args, 1)?;
    let mut bytes = Vec::new();
    for item in list_arg("open-input-string-bytes", args, 0)? {
        let byte = match &*item.borrow() {
            Value::Integer(n) => u8::try_from(*n).ok(),
            _ => None,
        };
        let byte = byte.ok_or_else(|| {
            RunError::new(
                format!("open-input-string-bytes got {} expects byte", item.borrow().type_name()),
                0,
            )
        })?;
        bytes.push(byte);
    }
    port(Port::input_string(bytes))
}

fn open_output_string(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("open-output-string", args, 0)?;
    port(Port::OutputString(Vec::new()))
}

fn output_bytes(name: &str, args: &[Var]) -> Result<Vec<u8>, RunError> {
    arity_eq(name, args, 1)?;
    let port = port_arg(name, args, 0)?;
    let port = port.borrow();
    port.output_bytes()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| RunError::new(format!("{name} got non-string port"), 0))
}

fn output_string_get(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    let bytes = output_bytes("output-string-get", args)?;
    let s = String::from_utf8(bytes)
        .map_err(|_| RunError::new("output-string-get: invalid utf-8", 0))?;
    ok(Value::string(s))
}

fn output_string_get_bytes(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    let bytes = output_bytes("output-string-get-bytes", args)?;
    ok(Value::list(
        bytes.into_iter().map(|b| var(Value::Integer(b as i64))).collect(),
    ))
}
