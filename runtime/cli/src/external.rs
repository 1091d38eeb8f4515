//! Host natives that need the operating system: files, pipes, the
//! standard streams, the command line, time and a seeded PRNG.

use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::process::{Child, Command, Stdio};
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use humble::vm::builtins::{
    arity_eq, arity_ge, boolean, int_arg, list_arg, ok, procedure_arg, string_arg, void,
};
use humble::vm::value::{Native, Procedure};
use humble::vm::{NativeFn, Port, RunError, Value, Var, Vm, var};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const JIFFIES_PER_SECOND: u128 = 1000;

/// The batch a session is built with. `command_line` is what
/// `system-command-line` returns.
pub fn natives(command_line: Vec<String>) -> Vec<(&'static str, NativeFn)> {
    let command_line: Rc<[String]> = command_line.into();
    let epoch: Rc<Cell<Option<Instant>>> = Rc::new(Cell::new(None));

    vec![
        ("open-input-file", Rc::new(open_input_file) as NativeFn),
        ("open-output-file", Rc::new(open_output_file) as NativeFn),
        ("with-input-pipe", Rc::new(with_input_pipe) as NativeFn),
        ("with-output-pipe", Rc::new(with_output_pipe) as NativeFn),
        (
            "system-command-line",
            Rc::new(move |args: &[Var], _: &mut Vm| {
                arity_eq("system-command-line", args, 0)?;
                let items = command_line.iter().map(|s| var(Value::string(s))).collect();
                ok(Value::list(items))
            }) as NativeFn,
        ),
        ("system-input-file", Rc::new(system_input_file) as NativeFn),
        ("system-output-file", Rc::new(system_output_file) as NativeFn),
        ("system-error-file", Rc::new(system_error_file) as NativeFn),
        ("make-prng", Rc::new(make_prng) as NativeFn),
        ("clock", Rc::new(clock) as NativeFn),
        (
            "current-jiffy",
            Rc::new(move |args: &[Var], _: &mut Vm| {
                arity_eq("current-jiffy", args, 0)?;
                let jiffies = match epoch.get() {
                    Some(start) => start.elapsed().as_millis() * JIFFIES_PER_SECOND / 1000,
                    None => {
                        epoch.set(Some(Instant::now()));
                        0
                    }
                };
                ok(Value::Integer(i64::try_from(jiffies).unwrap_or(i64::MAX)))
            }) as NativeFn,
        ),
        ("pause", Rc::new(pause) as NativeFn),
    ]
}

fn port(port: Port) -> Result<Var, RunError> {
    ok(Value::Port(Rc::new(RefCell::new(port))))
}

fn host_error(name: &str, error: io::Error) -> RunError {
    RunError::new(format!("{name}: {error}"), 0)
}

fn open_input_file(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("open-input-file", args, 1)?;
    let path = string_arg("open-input-file", args, 0)?;
    match File::open(&*path) {
        Ok(file) => port(Port::input(BufReader::new(file))),
        Err(_) => boolean(false),
    }
}

fn open_output_file(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("open-output-file", args, 1)?;
    let path = string_arg("open-output-file", args, 0)?;
    match File::create(&*path) {
        Ok(file) => port(Port::output(BufWriter::new(file))),
        Err(_) => boolean(false),
    }
}

/// Command words from a list of strings.
fn command_words(name: &str, args: &[Var]) -> Result<Vec<String>, RunError> {
    let words = list_arg(name, args, 0)?
        .iter()
        .map(|word| match &*word.borrow() {
            Value::String(s) => Ok(s.to_string()),
            other => Err(RunError::new(
                format!("{name} got {} expects string", other.type_name()),
                0,
            )),
        })
        .collect::<Result<Vec<_>, _>>()?;
    if words.is_empty() {
        return Err(RunError::new(format!("{name} got empty command"), 0));
    }
    Ok(words)
}

/// Hands `port` to the procedure, then closes it and waits for the child.
/// The result is `(exit-code . procedure-result)`.
fn run_with_pipe(
    name: &str,
    procedure: &Var,
    mut child: Child,
    pipe: Port,
    vm: &mut Vm,
) -> Result<Var, RunError> {
    let pipe = Rc::new(RefCell::new(pipe));
    let result = vm.call(procedure, vec![var(Value::Port(pipe.clone()))]);
    pipe.borrow_mut().close();
    let status = child.wait().map_err(|e| host_error(name, e))?;
    let code = i64::from(status.code().unwrap_or(-1));
    ok(Value::NonList(vec![var(Value::Integer(code)), result?]))
}

fn with_input_pipe(args: &[Var], vm: &mut Vm) -> Result<Var, RunError> {
    let name = "with-input-pipe";
    arity_eq(name, args, 2)?;
    let words = command_words(name, args)?;
    let procedure = procedure_arg(name, args, 1)?;
    let mut child = Command::new(&words[0])
        .args(&words[1..])
        .stdout(Stdio::piped())
        .spawn()
        .map_err(|e| host_error(name, e))?;
    let Some(stdout) = child.stdout.take() else {
        return Err(RunError::new(format!("{name}: no pipe"), 0));
    };
    run_with_pipe(name, procedure, child, Port::input(BufReader::new(stdout)), vm)
}

fn with_output_pipe(args: &[Var], vm: &mut Vm) -> Result<Var, RunError> {
    let name = "with-output-pipe";
    arity_eq(name, args, 2)?;
    let words = command_words(name, args)?;
    let procedure = procedure_arg(name, args, 1)?;
    let mut child = Command::new(&words[0])
        .args(&words[1..])
        .stdin(Stdio::piped())
        .spawn()
        .map_err(|e| host_error(name, e))?;
    let Some(stdin) = child.stdin.take() else {
        return Err(RunError::new(format!("{name}: no pipe"), 0));
    };
    run_with_pipe(name, procedure, child, Port::output(stdin), vm)
}

fn system_input_file(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("system-input-file", args, 0)?;
    port(Port::input(BufReader::new(io::stdin())))
}

fn system_output_file(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("system-output-file", args, 0)?;
    port(Port::output(io::stdout()))
}

fn system_error_file(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("system-error-file", args, 0)?;
    port(Port::output(io::stderr()))
}

/// `(make-prng seed)` returns `prng`: `(prng b)` draws from `0..=b` and
/// `(prng a b)` from `a..=b`.
fn make_prng(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("make-prng", args, 1)?;
    let seed = int_arg("make-prng", args, 0)?;
    let rng = RefCell::new(StdRng::seed_from_u64(seed as u64));

    let func: NativeFn = Rc::new(move |args: &[Var], _: &mut Vm| {
        arity_ge("prng", args, 1)?;
        let (low, high) = match args.len() {
            1 => (0, int_arg("prng", args, 0)?),
            _ => (int_arg("prng", args, 0)?, int_arg("prng", args, 1)?),
        };
        if low > high {
            return Err(RunError::new(format!("prng empty range {low}..={high}"), 0));
        }
        ok(Value::Integer(rng.borrow_mut().gen_range(low..=high)))
    });
    ok(Value::Procedure(Procedure::Native(Rc::new(Native {
        name: Rc::from("prng"),
        func,
    }))))
}

fn clock(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("clock", args, 0)?;
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    ok(Value::Integer(i64::try_from(seconds).unwrap_or(i64::MAX)))
}

/// Sleeps for a number of jiffies (milliseconds).
fn pause(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
    arity_eq("pause", args, 1)?;
    let jiffies = int_arg("pause", args, 0)?;
    if jiffies > 0 {
        thread::sleep(Duration::from_millis(jiffies as u64));
    }
    void()
}

#[cfg(test)]
mod tests {
    use super::*;
    use humble::Session;

    fn session() -> Session {
        Session::builder()
            .natives(natives(vec!["script.scm".to_string(), "a".to_string()]))
            .build()
            .unwrap()
    }

    #[test]
    fn command_line_is_a_list_of_strings() {
        let mut session = session();
        assert_eq!(
            session.eval_to_strings("(system-command-line)").unwrap(),
            vec![r#"("script.scm" "a")"#]
        );
    }

    #[test]
    fn seeded_prngs_agree() {
        let mut session = session();
        let results = session
            .eval_to_strings(
                "(define p (make-prng 7)) (define q (make-prng 7))
                 (equal? (list (p 100) (p 100) (p 5 9)) (list (q 100) (q 100) (q 5 9)))",
            )
            .unwrap();
        assert_eq!(results, vec!["#t"]);
    }

    #[test]
    fn prng_stays_in_range() {
        let mut session = session();
        let results = session
            .eval_to_strings(
                "(define p (make-prng 1))
                 (let loop ((i 0) (ok #t))
                   (if (eqv? i 200) ok
                       (let ((n (p 3 4))) (loop (+ i 1) (and ok (>= n 3) (<= n 4))))))",
            )
            .unwrap();
        assert_eq!(results, vec!["#t"]);
    }

    #[test]
    fn missing_input_file_is_false() {
        let mut session = session();
        assert_eq!(
            session
                .eval_to_strings(r#"(open-input-file "/no/such/humble/file")"#)
                .unwrap(),
            vec!["#f"]
        );
    }

    #[test]
    fn first_jiffy_is_zero() {
        let mut session = session();
        assert_eq!(session.eval_to_strings("(current-jiffy)").unwrap(), vec!["0"]);
    }
}
