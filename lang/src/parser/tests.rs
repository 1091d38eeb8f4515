use super::*;
use crate::lexer::{Lexer, Names};
use expect_test::{Expect, expect};

fn parse(input: &str, names: &mut Names) -> Result<Vec<Syntax>, ParseError> {
    let tokens = Lexer::new(input, names).tokenize().unwrap();
    Parser::new(tokens).parse_program()
}

fn check_program(input: &str, expect: Expect) {
    let mut names = Names::new();
    let output = match parse(input, &mut names) {
        Ok(forms) => forms
            .iter()
            .map(|f| f.render(&names))
            .collect::<Vec<_>>()
            .join("\n"),
        Err(e) => format!("Error: {} at {}:{}", e.message, e.span.line, e.span.column),
    };
    expect.assert_eq(&output);
}

#[test]
fn parse_nested_forms_of_every_bracket_kind() {
    check_program("(a (b . c) [d] {})", expect![[r#"(a (b . c) (d) ())"#]]);
}

#[test]
fn parse_quote_sugar() {
    check_program(
        "'x `(a ,b) @c",
        expect![[r#"
            (quote x)
            (quasiquote (a (unquote b)))
            (splice c)"#]],
    );
}

#[test]
fn parse_literals() {
    check_program(
        r#"42 #t "s" #void"#,
        expect![[r#"
            42
            #t
            "s"
            #void"#]],
    );
}

#[test]
fn parse_record_fields_are_quoted() {
    check_program(
        "#r(point 1 (a b))",
        expect![[r#"#r('point 1 $('a 'b))"#]],
    );
}

#[test]
fn parse_records_nested_dotted_data() {
    check_program("#r(p (a . b))", expect![[r#"#r('p $('a . 'b))"#]]);
}

#[test]
fn parse_mismatched_parens() {
    check_program(
        "(a]",
        expect![[r#"Error: parens ']' at line 1 does not match '(' at line 1 at 1:3"#]],
    );
    check_program(
        "[a\n b)",
        expect![[r#"Error: parens ')' at line 2 does not match '[' at line 1 at 2:3"#]],
    );
}

#[test]
fn parse_unclosed_paren() {
    check_program(
        "(a\n(b)",
        expect![[r#"Error: parens '(' at line 1 not closed at 1:1"#]],
    );
}

#[test]
fn parse_stray_close() {
    check_program(
        ")",
        expect![[r#"Error: parens ')' at line 1 does not match any open paren at 1:1"#]],
    );
}

#[test]
fn parse_prefix_requires_datum() {
    check_program(
        "'",
        expect![[r#"Error: quote must be followed by a datum at 1:1"#]],
    );
    check_program(
        "(')",
        expect![[r#"Error: quote must be followed by a datum at 1:2"#]],
    );
    check_program("#r 5", expect![[r#"Error: #r takes a form at 1:1"#]]);
}

#[test]
fn parse_marks_errors_fixable_by_more_input() {
    let mut names = Names::new();
    assert!(parse("(a", &mut names).unwrap_err().incomplete);
    assert!(parse("`", &mut names).unwrap_err().incomplete);
    assert!(!parse("(a]", &mut names).unwrap_err().incomplete);
}

#[test]
fn parse_names_keep_their_line() {
    let mut names = Names::new();
    let forms = parse("(a\n b)", &mut names).unwrap();
    let Syntax::Form(items) = &forms[0] else {
        panic!("expected a form");
    };
    assert!(matches!(items[0], Syntax::Name(_, 1)));
    assert!(matches!(items[1], Syntax::Name(_, 2)));
    assert_eq!(forms[0].line(), 1);
}
