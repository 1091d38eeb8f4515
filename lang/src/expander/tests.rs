use std::collections::HashSet;

use super::*;
use crate::runner::MemoryOpener;
use crate::vm::builtins as runtime;
use expect_test::{Expect, expect};

struct Fixture {
    vm: Vm,
    macros: Macros,
    opener: MemoryOpener,
    prelude: Macros,
    base_keys: HashSet<NameId>,
}

impl Fixture {
    fn new() -> Self {
        let mut vm = Vm::new();
        runtime::install(&mut vm);
        let mut macros = Macros::new();
        for &(name, which) in builtins::BUILTIN_MACROS {
            macros.insert(vm.names.intern(name), Macro::Builtin(which));
        }
        let base_keys = vm.globals.keys().into_iter().collect();
        Self {
            vm,
            prelude: macros.clone(),
            macros,
            opener: MemoryOpener::new(),
            base_keys,
        }
    }

    fn forms(&mut self, source: &str) -> Vec<Syntax> {
        let tokens = Lexer::new(source, &mut self.vm.names).tokenize().unwrap();
        Parser::new(tokens).parse_program().unwrap()
    }

    fn expand(&mut self, source: &str) -> Result<Vec<Syntax>, ExpandError> {
        let forms = self.forms(source);
        let mut expander = Expander::new(
            &mut self.vm,
            &mut self.macros,
            &mut self.opener,
            &self.prelude,
            &self.base_keys,
        );
        expander.expand_program(forms)
    }

    fn compile(&mut self, source: &str) -> Result<Vec<Syntax>, ExpandError> {
        let forms = self.forms(source);
        let defined = self.vm.globals.keys();
        let mut expander = Expander::new(
            &mut self.vm,
            &mut self.macros,
            &mut self.opener,
            &self.prelude,
            &self.base_keys,
        );
        expander.compile(forms, defined)
    }

    fn render(&self, forms: &[Syntax]) -> String {
        forms
            .iter()
            .map(|f| f.render(&self.vm.names))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn check(input: &str, expect: Expect) {
    let mut fixture = Fixture::new();
    let output = match fixture.expand(input) {
        Ok(forms) => fixture.render(&forms),
        Err(e) => format!("Error: {}", e.message),
    };
    expect.assert_eq(&output);
}

fn expand_error(input: &str) -> ExpandError {
    let mut fixture = Fixture::new();
    match fixture.compile(input) {
        Ok(forms) => panic!("expected an error, got {}", fixture.render(&forms)),
        Err(e) => e,
    }
}

mod quoting_tests {
    use super::*;

    #[test]
    fn quote_builds_data() {
        check(
            "'x '(1 (2)) '(a b . c)",
            expect![[r#"
                'x
                $(1 $(2))
                $('a 'b . 'c)"#]],
        );
    }

    #[test]
    fn quasiquote_fills_unquoted_holes() {
        check("`(1 ,x)", expect![[r#"$(1 x)"#]]);
    }

    #[test]
    fn nested_quasiquote_keeps_inner_unquote() {
        check(
            "`(a `(b ,(c ,x)))",
            expect![[r#"$('a $('quasiquote $('b $('unquote $('c x)))))"#]],
        );
    }

    #[test]
    fn macros_do_not_expand_inside_quote() {
        check("'(if a b)", expect![[r#"$('if 'a 'b)"#]]);
    }

    #[test]
    fn splice_inside_quote_is_data() {
        let mut fixture = Fixture::new();
        assert!(fixture.expand("'(1 @(2 3))").is_ok());
    }
}

mod core_form_tests {
    use super::*;

    #[test]
    fn if_becomes_cond() {
        check(
            "(if a b) (if a b c)",
            expect![[r#"
                #<cond [a b] [#t #void]>
                #<cond [a b] [#t c]>"#]],
        );
    }

    #[test]
    fn and_nests_conds() {
        check(
            "(and a b c)",
            expect![[r#"#<cond [a #<cond [b c] [#t #f]>] [#t #f]>"#]],
        );
    }

    #[test]
    fn or_binds_each_test_once() {
        check(
            "(or a)",
            expect![[r#"(#<lambda (=>) [] #<cond [=> =>] [#t #f]>> a)"#]],
        );
    }

    #[test]
    fn define_copies_its_value() {
        check("(define x 5)", expect![[r#"#<bind x (dup 5)>"#]]);
    }

    #[test]
    fn lambda_records_free_names() {
        check(
            "(lambda (x . rest) (f x rest))",
            expect![[r#"#<lambda. (x rest) [f] (f x rest)>"#]],
        );
    }

    #[test]
    fn let_is_an_immediate_call() {
        check("(let ((x 1)) x)", expect![[r#"(#<lambda (x) [] x> 1)"#]]);
    }

    #[test]
    fn when_and_unless() {
        check(
            "(when a b) (unless a b)",
            expect![[r#"
                #<cond [a (#<lambda () [b] b>)] [#t #void]>
                #<cond [a #void] [#t (#<lambda () [b] b>)]>"#]],
        );
    }
}

mod error_tests {
    use super::*;

    #[test]
    fn unbound_names_are_listed_by_line() {
        let error = expand_error("(define y 1)\n(+ y x)");
        assert_eq!(error.message, "unbound,\nline 2: x");
        assert_eq!(error.line, 2);
    }

    #[test]
    fn several_unbound_names() {
        let error = expand_error("(p)\n(q)");
        assert_eq!(error.message, "unbound,\nline 1: p\nline 2: q");
    }

    #[test]
    fn define_outside_a_block() {
        let error = expand_error("(car (define x 1))");
        assert_eq!(error.message, "define in non-block");
    }

    #[test]
    fn if_with_too_many_parts() {
        let error = expand_error("(if 1 2 3 4)");
        assert_eq!(error.message, "if-expression of length 5");
    }

    #[test]
    fn user_macro_arity() {
        let error = expand_error("(macro two (a b) a) (two 1)");
        assert_eq!(error.message, "two requires 2 args but got 1");
    }

    #[test]
    fn import_of_a_missing_file() {
        let error = expand_error(r#"(import "nowhere.scm")"#);
        assert!(error.message.contains("no such file"), "{}", error.message);
    }
}

mod user_macro_tests {
    use super::*;

    #[test]
    fn user_macro_output_is_expanded_again() {
        check(
            "(macro unless2 (t e) `(if ,t #f ,e)) (unless2 a b)",
            expect![[r#"
                #void
                #<cond [a #f] [#t b]>"#]],
        );
    }

    #[test]
    fn user_macro_arguments_arrive_unexpanded() {
        check(
            "(macro first-of (form) `',(car form)) (first-of (if a b))",
            expect![[r#"
                #void
                'if"#]],
        );
    }

    #[test]
    fn macro_introduced_binding_captures_call_site_name() {
        let mut fixture = Fixture::new();
        let forms = fixture
            .expand("(macro with-it (e body) `(let ((it ,e)) ,body)) (with-it 5 (+ it 1))")
            .unwrap();
        let rendered = fixture.render(&forms[1..]);
        assert_eq!(rendered, "(#<lambda (it) [+] (+ it 1)> 5)");
    }
}
