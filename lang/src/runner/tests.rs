use super::*;
use crate::expander::ExpandError;

fn eval(source: &str) -> Vec<String> {
    let mut session = Session::new().unwrap();
    session.eval_to_strings(source).unwrap()
}

fn eval_last(source: &str) -> String {
    eval(source).pop().unwrap_or_default()
}

fn eval_err(source: &str) -> HumbleError {
    let mut session = Session::new().unwrap();
    session.eval_source(source).unwrap_err()
}

fn on_big_stack(f: impl FnOnce() + Send + 'static) {
    on_thread(1024 * 1024 * 1024, f);
}

fn on_thread(stack_size: usize, f: impl FnOnce() + Send + 'static) {
    std::thread::Builder::new()
        .stack_size(stack_size)
        .spawn(f)
        .unwrap()
        .join()
        .unwrap();
}

fn captured_output(session: &Session) -> String {
    let port = session.vm().output();
    let port = port.borrow();
    String::from_utf8_lossy(port.output_bytes().unwrap_or_default()).into_owned()
}

mod scenario_tests {
    use super::*;

    #[test]
    fn variadic_addition() {
        assert_eq!(eval("(+ 1 2 3)"), vec!["6"]);
    }

    #[test]
    fn named_let_loop() {
        assert_eq!(
            eval("(let loop ((a 9)) (if (eqv? a 0) '(done) (loop (- a 1))))"),
            vec!["(done)"]
        );
    }

    #[test]
    fn define_aliases_share_cells() {
        assert_eq!(
            eval_last("(define x '(1 2 3)) (define y x) (set-car! (cdr y) 99) x"),
            "(1 99 3)"
        );
    }

    #[test]
    fn nested_cons() {
        assert_eq!(
            eval("(cons 1 (cons 2 '())) (car (cdr (cons 1 (cons 2 '()))))"),
            vec!["(1 2)", "2"]
        );
    }

    #[test]
    fn macro_duplicates_its_argument() {
        assert_eq!(
            eval("(macro twice (x) `(list ,x ,x)) (twice (+ 1 1))"),
            vec!["(2 2)"]
        );
    }

    #[test]
    fn dict_keys_have_one_type() {
        let mut session = Session::new().unwrap();
        let found = session
            .eval_to_strings("(define d (alist->dict '((1 . 2) (3 . 4)))) (dict-get-default! d 1 0)")
            .unwrap();
        assert_eq!(found, vec!["2"]);

        let error = session.eval_source(r#"(dict-set! d "k" 1)"#).unwrap_err();
        assert!(matches!(error, HumbleError::Run(_)));
        assert!(error.to_string().contains("key type"), "{error}");
    }
}

mod evaluation_tests {
    use super::*;

    #[test]
    fn tail_calls_run_in_constant_stack() {
        assert_eq!(
            eval("(let loop ((i 0)) (if (eqv? i 1000000) i (loop (+ i 1))))"),
            vec!["1000000"]
        );
    }

    #[test]
    fn mutual_tail_calls() {
        let source = "
            (define (ev? n) (if (eqv? n 0) #t (od? (- n 1))))
            (define (od? n) (if (eqv? n 0) #f (ev? (- n 1))))
            (ev? 100001)";
        assert_eq!(eval_last(source), "#f");
    }

    #[test]
    fn deep_non_tail_recursion() {
        on_big_stack(|| {
            let mut session = Session::builder().max_depth(100_000).build().unwrap();
            let source = "
                (define (count n) (if (eqv? n 0) 0 (+ 1 (count (- n 1)))))
                (count 50000)";
            assert_eq!(session.eval_to_strings(source).unwrap(), vec!["50000"]);
        });
    }

    #[test]
    fn default_recursion_limit_fits_a_main_thread_stack() {
        on_thread(8 * 1024 * 1024, || {
            let mut session = Session::new().unwrap();
            session
                .eval_source("(define (count n) (if (eqv? n 0) 0 (+ 1 (count (- n 1)))))")
                .unwrap();
            assert_eq!(session.eval_to_strings("(count 900)").unwrap(), vec!["900"]);

            let error = session.eval_source("(count 9000)").unwrap_err();
            assert!(error.to_string().contains("recursion too deep"), "{error}");
            assert_eq!(session.eval_to_strings("(count 10)").unwrap(), vec!["10"]);
        });
    }

    #[test]
    fn recursion_limit_is_an_error() {
        on_big_stack(|| {
            let mut session = Session::builder().max_depth(500).build().unwrap();
            let error = session
                .eval_source(
                    "(define (count n) (if (eqv? n 0) 0 (+ 1 (count (- n 1))))) (count 2000)",
                )
                .unwrap_err();
            assert!(error.to_string().contains("recursion too deep"), "{error}");
        });
    }

    #[test]
    fn letrec_mutual_recursion() {
        let source = "
            (letrec ((ev? (lambda (n) (if (eqv? n 0) #t (od? (- n 1)))))
                     (od? (lambda (n) (if (eqv? n 0) #f (ev? (- n 1))))))
              (ev? 10))";
        assert_eq!(eval(source), vec!["#t"]);
    }

    #[test]
    fn cond_arrow_passes_the_test_value() {
        assert_eq!(
            eval("(cond ((assoc 2 '((1 . a) (2 . b))) => cdr) (else 'none))"),
            vec!["b"]
        );
    }

    #[test]
    fn do_loop_collects() {
        assert_eq!(
            eval("(do ((i 0 (+ i 1)) (acc '() (cons i acc))) ((eqv? i 3) acc))"),
            vec!["(2 1 0)"]
        );
    }

    #[test]
    fn case_matches_with_eqv() {
        assert_eq!(
            eval("(case 3 ((1 2) 'low) ((3 4) 'high) (else 'none))"),
            vec!["high"]
        );
        assert!(matches!(eval_err("(case 9 ((1) 'one))"), HumbleError::Run(_)));
    }

    #[test]
    fn void_results_are_not_collected() {
        assert!(eval("(when #f 1) (define z 2)").is_empty());
    }

    #[test]
    fn local_copies_a_global() {
        let source = "
            (define n 1)
            (define (f) (local n) (set! n 5) n)
            (list (f) n)";
        assert_eq!(eval_last(source), "(5 1)");
    }
}

mod prelude_tests {
    use super::*;

    #[test]
    fn cxr_functions() {
        assert_eq!(eval("(caddr '(1 2 3)) (cdar '((1 . 2)))"), vec!["3", "2"]);
    }

    #[test]
    fn record_types() {
        let source = "
            (define-record-type point (make-point x y) point?
              (x point-x set-point-x!)
              (y point-y))
            (define p (make-point 1 2))
            (set-point-x! p 5)
            (list (point-x p) (point-y p) (point? p) (point? 5))";
        assert_eq!(eval_last(source), "(5 2 #t #f)");
    }

    #[test]
    fn case_lambda_dispatches_on_arity() {
        let source = "
            (define f (case-lambda ((x) (list 'one x)) ((x y) (list 'two x y))))
            (list (f 1) (f 1 2))";
        assert_eq!(eval_last(source), "((one 1) (two 1 2))");
    }

    #[test]
    fn class_dispatches_on_message() {
        let source = r#"
            (define (greet) "hi")
            (define (add a b) (+ a b))
            (define obj (class greet add))
            (list (obj 'greet) (obj 'add 1 2))"#;
        assert_eq!(eval_last(source), r#"("hi" 3)"#);
    }

    #[test]
    fn ref_at_destructures() {
        assert_eq!(eval_last("(ref@ a b '(1 2)) (list b a)"), "(2 1)");
    }
}

mod unit_tests {
    use super::*;

    const LIB: &str = "
        (export double 'twice)
        (define (double x) (* 2 x))
        (macro twice (e) `(list ,e ,e))";

    fn session_with_lib() -> Session {
        Session::builder()
            .opener(MemoryOpener::new().with_file("lib.scm", LIB))
            .build()
            .unwrap()
    }

    #[test]
    fn import_with_a_name_prefix() {
        let mut session = session_with_lib();
        let results = session
            .eval_to_strings(r#"(import "lib.scm" m-) (m-double 4) (twice 3)"#)
            .unwrap();
        assert_eq!(results, vec!["8", "(3 3)"]);
        assert!(!session.has_global("double"));
    }

    #[test]
    fn symbol_prefix_renames_macros() {
        let mut session = session_with_lib();
        let results = session
            .eval_to_strings(r#"(import "lib.scm" 'm-) (m-twice (m-double 1))"#)
            .unwrap();
        assert_eq!(results, vec!["(2 2)"]);
        assert!(session.has_macro("m-twice"));
    }

    #[test]
    fn import_without_export_fails() {
        let mut session = Session::builder()
            .opener(MemoryOpener::new().with_file("bare.scm", "(define x 1)"))
            .build()
            .unwrap();
        let error = session.eval_source(r#"(import "bare.scm")"#).unwrap_err();
        assert!(error.to_string().contains("missing export"), "{error}");
    }

    #[test]
    fn scope_exports_only_what_it_names() {
        let mut session = Session::new().unwrap();
        let results = session
            .eval_to_strings(
                "(scope (export inc) (define n 0) (define (inc) (set! n (+ n 1)) n)) (inc) (inc)",
            )
            .unwrap();
        assert_eq!(results, vec!["1", "2"]);
        assert!(session.has_global("inc"));
        assert!(!session.has_global("n"));
    }
}

mod session_tests {
    use super::*;

    #[test]
    fn errors_keep_earlier_definitions() {
        let mut session = Session::new().unwrap();
        session.eval_source("(define a 1)").unwrap();
        assert!(session.eval_source("(define b 2) (car '())").is_err());
        assert_eq!(session.eval_to_strings("(list a b)").unwrap(), vec!["(1 2)"]);
    }

    #[test]
    fn failed_unit_leaves_no_forward_placeholders() {
        let mut session = Session::new().unwrap();
        let error = session
            .eval_source("(define (f) (g)) (car '()) (define (g) 1)")
            .unwrap_err();
        assert!(error.to_string().contains("car"), "{error}");
        assert!(session.has_global("f"));
        assert!(!session.has_global("g"));

        let error = session.eval_source("(g)").unwrap_err();
        assert!(matches!(error, HumbleError::Expand(_)), "{error:?}");
        assert!(error.to_string().contains("unbound"), "{error}");
    }

    #[test]
    fn exhausted_cond_reports_the_form_line() {
        let error = eval_err("(define x 1)\n(cond (#f 1))");
        match error {
            HumbleError::Run(RunError { message, line, .. }) => {
                assert_eq!(message, "all cond #f");
                assert_eq!(line, 2);
            }
            other => panic!("expected run error, got {other:?}"),
        }
    }

    #[test]
    fn unbound_names_stop_the_whole_unit() {
        let mut session = Session::new().unwrap();
        let error = session.eval_source("(define c 1) (foo c)").unwrap_err();
        match &error {
            HumbleError::Expand(ExpandError { message, .. }) => {
                assert_eq!(message, "unbound,\nline 1: foo")
            }
            other => panic!("expected expand error, got {other:?}"),
        }
        assert!(!session.has_global("c"));
    }

    #[test]
    fn incomplete_input_is_flagged() {
        assert!(eval_err("(+ 1").is_incomplete());
        assert!(!eval_err("(+ 1))").is_incomplete());
    }

    #[test]
    fn exit_carries_its_code() {
        assert_eq!(eval_err("(exit 3)").exit_code(), Some(3));
        assert_eq!(eval_err("(exit)").exit_code(), Some(0));
    }

    #[test]
    fn display_writes_to_the_output_port() {
        let mut session = Session::builder()
            .output(Port::OutputString(Vec::new()))
            .build()
            .unwrap();
        session.eval_source(r#"(display "hi") (write "hi")"#).unwrap();
        assert_eq!(captured_output(&session), "hi\"hi\"");
    }

    #[test]
    fn echo_interleaves_results_with_output() {
        let mut session = Session::builder()
            .output(Port::OutputString(Vec::new()))
            .build()
            .unwrap();
        session.echo_source(r#"(display "a") 1 (display "b")"#).unwrap();
        assert_eq!(captured_output(&session), "a1\nb");
    }

    #[test]
    fn set_across_types_warns() {
        let mut session = Session::new().unwrap();
        session.eval_source(r#"(define x 1) (set! x "s")"#).unwrap();
        let warnings = session.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("set!"), "{warnings:?}");
    }

    #[test]
    fn gensyms_are_distinct() {
        assert_eq!(eval_last("(eq? (gensym) (gensym))"), "#f");
    }
}

mod host_tests {
    use super::*;

    fn triple(args: &[Var], _vm: &mut Vm) -> Result<Var, RunError> {
        match &*args[0].borrow() {
            Value::Integer(n) => Ok(crate::vm::var(Value::Integer(n * 3))),
            _ => Err(RunError::new("triple expects a number", 0)),
        }
    }

    fn always_one(_: Vec<Syntax>, _: &mut Vm) -> Result<Syntax, ExpandError> {
        Ok(Syntax::Integer(1))
    }

    #[test]
    fn registered_native_is_callable() {
        let mut session = Session::new().unwrap();
        session.register_native("triple", native(triple));
        assert_eq!(session.eval_to_strings("(triple 3)").unwrap(), vec!["9"]);
    }

    #[test]
    fn natives_given_to_the_builder_are_visible_to_imports() {
        let mut session = Session::builder()
            .natives([("triple", native(triple))])
            .opener(
                MemoryOpener::new().with_file("t.scm", "(export nine) (define nine (triple 3))"),
            )
            .build()
            .unwrap();
        let results = session
            .eval_to_strings(r#"(import "t.scm") nine"#)
            .unwrap();
        assert_eq!(results, vec!["9"]);
    }

    #[test]
    fn registered_macro_replaces_its_form() {
        let mut session = Session::new().unwrap();
        session.register_macro("always-one", Rc::new(always_one));
        assert_eq!(
            session.eval_to_strings("(always-one anything)").unwrap(),
            vec!["1"]
        );
    }

    #[test]
    fn extra_tags_run_out() {
        let mut session = Session::new().unwrap();
        let tags: Vec<_> = std::iter::from_fn(|| session.register_extra()).take(1000).collect();
        assert!(!tags.is_empty());
        assert!(tags.len() < 1000);
    }
}
