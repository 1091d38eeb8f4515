mod external;

use colored::Colorize;
use humble::runner::FileOpener;
use humble::{HumbleError, Session};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::env;
use std::fs;
use std::io::Read;
use std::process;
use std::thread;

/// Non-tail recursion in the evaluator uses the native stack.
const STACK_SIZE: usize = 1024 * 1024 * 1024;

/// Call nesting allowed on the `STACK_SIZE` thread.
const MAX_DEPTH: usize = 100_000;

fn main() {
    let args: Vec<String> = env::args().collect();

    let code = thread::Builder::new()
        .name("humble".to_string())
        .stack_size(STACK_SIZE)
        .spawn(move || run(args))
        .map_err(|e| eprintln!("Error: failed to start interpreter thread: {}", e))
        .and_then(|handle| handle.join().map_err(|_| ()));

    match code {
        Ok(ExitCode::Success) => process::exit(0),
        Ok(ExitCode::ArgumentError) => process::exit(1),
        Ok(ExitCode::RuntimeError) => process::exit(2),
        Ok(ExitCode::Exit(code)) => process::exit(code),
        Ok(ExitCode::Broken) | Err(()) => process::exit(3),
    }
}

enum ExitCode {
    Success,
    ArgumentError,
    RuntimeError,
    Broken,
    Exit(i32),
}

impl ExitCode {
    fn from_error(error: &HumbleError) -> Self {
        if let Some(code) = error.exit_code() {
            ExitCode::Exit(code)
        } else if error.is_broken() {
            ExitCode::Broken
        } else {
            ExitCode::RuntimeError
        }
    }
}

#[derive(Default)]
struct Options {
    eval_script: Option<String>,
    script_path: Option<String>,
    script_args: Vec<String>,
    verbose: bool,
    repl: bool,
}

fn parse_args(args: &[String]) -> Result<Options, ExitCode> {
    let mut options = Options::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return Err(ExitCode::Success);
            }
            "-r" | "--repl" => options.repl = true,
            "-v" | "--verbose" => options.verbose = true,
            "-e" | "--eval" => {
                i += 1;
                if i < args.len() {
                    options.eval_script = Some(args[i].clone());
                } else {
                    eprintln!("Error: -e requires a script argument");
                    return Err(ExitCode::ArgumentError);
                }
            }
            "--" => {
                options.script_args.extend(args[i + 1..].iter().cloned());
                break;
            }
            arg if !arg.starts_with('-') => {
                // Everything after the script belongs to the script.
                options.script_path = Some(arg.to_string());
                options.script_args.extend(args[i + 1..].iter().cloned());
                break;
            }
            unknown => {
                eprintln!("Unknown option: {}", unknown);
                return Err(ExitCode::ArgumentError);
            }
        }
        i += 1;
    }

    Ok(options)
}

fn run(args: Vec<String>) -> ExitCode {
    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(code) => return code,
    };

    // What `system-command-line` sees: the script, then its arguments.
    let command_line: Vec<String> = options
        .script_path
        .iter()
        .chain(options.script_args.iter())
        .cloned()
        .collect();

    let mut session = match create_session(command_line) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::Broken;
        }
    };

    if options.repl {
        return run_repl(&mut session, options.verbose);
    }

    // Determine source: -e > file > stdin
    let source = if let Some(script) = options.eval_script {
        script
    } else if let Some(path) = &options.script_path {
        match fs::read_to_string(path) {
            Ok(content) => {
                session.set_current_file(Some(path.clone()));
                content
            }
            Err(e) => {
                eprintln!("Error reading file '{}': {}", path, e);
                return ExitCode::ArgumentError;
            }
        }
    } else if !atty::is(atty::Stream::Stdin) {
        let mut source = String::new();
        if let Err(e) = std::io::stdin().read_to_string(&mut source) {
            eprintln!("Error reading from stdin: {}", e);
            return ExitCode::ArgumentError;
        }
        source
    } else {
        print_help();
        return ExitCode::ArgumentError;
    };

    match run_unit(&mut session, &source, options.verbose, false) {
        Ok(()) => ExitCode::Success,
        Err(e) => ExitCode::from_error(&e),
    }
}

fn print_help() {
    println!("Humble Scheme CLI");
    println!();
    println!("USAGE:");
    println!("    humble-cli <SCRIPT> [ARGS...]   Run a source file");
    println!("    humble-cli -e <CODE>            Evaluate inline source");
    println!("    humble-cli -r                   Start REPL");
    println!("    humble-cli -h                   Show this help");
    println!("    cat file | humble-cli           Read source from stdin");
    println!();
    println!("OPTIONS:");
    println!("    -e, --eval                      Evaluate inline source");
    println!("    -v, --verbose                   Print each expanded form to stderr");
    println!("    --                              Pass the remaining arguments to the program");
}

fn create_session(command_line: Vec<String>) -> Result<Session, HumbleError> {
    Session::builder()
        .opener(FileOpener::new())
        .natives(external::natives(command_line))
        .max_depth(MAX_DEPTH)
        .build()
}

/// Compiles and runs one unit, echoing results and reporting any error
/// and warnings on stderr. In the REPL an incomplete unit is not an error
/// yet: the caller reads more lines.
fn run_unit(
    session: &mut Session,
    source: &str,
    verbose: bool,
    repl: bool,
) -> Result<(), HumbleError> {
    let result = compile_and_echo(session, source, verbose);
    for warning in session.take_warnings() {
        eprintln!("{} {}", "warning:".yellow().bold(), warning);
    }
    if let Err(e) = &result {
        let quiet = e.exit_code().is_some() || (repl && e.is_incomplete());
        if !quiet {
            report(session, e, source);
        }
    }
    result
}

fn compile_and_echo(session: &mut Session, source: &str, verbose: bool) -> Result<(), HumbleError> {
    if !verbose {
        return session.echo_source(source);
    }
    let mut forms = session.expand(source)?;
    for form in &forms {
        eprintln!("{}", session.render(form));
    }
    humble::resolver::resolve_top(&mut forms);
    session.echo(&forms)
}

fn report(session: &Session, error: &HumbleError, source: &str) {
    if let Some(file) = session.current_file() {
        eprintln!("{}", format!("in {}:", file).dimmed());
    }
    eprintln!("{}", error.format_colored(source));
}

fn run_repl(session: &mut Session, verbose: bool) -> ExitCode {
    println!("Humble Scheme REPL. Input runs once its parentheses balance; end of input exits.");

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("Failed to initialize REPL: {}", e);
            return ExitCode::RuntimeError;
        }
    };

    let mut buffer = String::new();
    loop {
        let prompt = if buffer.is_empty() { ": " } else { ".. " };
        match editor.readline(prompt) {
            Ok(line) => {
                if buffer.is_empty() && line.trim().is_empty() {
                    continue;
                }
                buffer.push_str(&line);
                buffer.push('\n');

                let source = std::mem::take(&mut buffer);
                session.set_current_file(None);
                match run_unit(session, &source, verbose, true) {
                    Err(e) if e.is_incomplete() => buffer = source,
                    Err(e) if e.exit_code().is_some() || e.is_broken() => {
                        editor.add_history_entry(source.trim_end()).ok();
                        return ExitCode::from_error(&e);
                    }
                    _ => {
                        editor.add_history_entry(source.trim_end()).ok();
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
            }
            Err(ReadlineError::Eof) => {
                println!("fare well.");
                break;
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::RuntimeError;
            }
        }
    }

    ExitCode::Success
}
