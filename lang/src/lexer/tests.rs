use super::*;
use expect_test::{Expect, expect};

fn check(input: &str, expect: Expect) {
    let mut names = Names::new();
    let mut lexer = Lexer::new(input, &mut names);
    let result = lexer.tokenize();
    let output = match result {
        Ok(tokens) => {
            let mut lines = Vec::new();
            for token in &tokens {
                lines.push(format!(
                    "{:?} @ {}:{} [{}-{}]",
                    token.kind,
                    token.span.line,
                    token.span.column,
                    token.span.start,
                    token.span.end
                ));
            }
            lines.join("\n")
        }
        Err(e) => format!("Error: {} at {}:{}", e.message, e.line, e.column),
    };
    expect.assert_eq(&output);
}

#[test]
fn lex_dotted_pair() {
    check(
        "(a . b)",
        expect![[r#"
            Open(Round) @ 1:1 [0-1]
            Name(15) @ 1:2 [1-2]
            Dot @ 1:4 [3-4]
            Name(16) @ 1:6 [5-6]
            Close(Round) @ 1:7 [6-7]
            Eof @ 1:8 [7-7]"#]],
    );
}

#[test]
fn lex_bracket_families() {
    check(
        "[a]{b}",
        expect![[r#"
            Open(Square) @ 1:1 [0-1]
            Name(15) @ 1:2 [1-2]
            Close(Square) @ 1:3 [2-3]
            Open(Curly) @ 1:4 [3-4]
            Name(16) @ 1:5 [4-5]
            Close(Curly) @ 1:6 [5-6]
            Eof @ 1:7 [6-6]"#]],
    );
}

#[test]
fn lex_integer_literals() {
    check(
        "42 -17 +5 0x1F 1_000 #b101 #xff",
        expect![[r#"
            Integer(42) @ 1:1 [0-2]
            Integer(-17) @ 1:4 [3-6]
            Integer(5) @ 1:8 [7-9]
            Integer(31) @ 1:11 [10-14]
            Integer(1000) @ 1:16 [15-20]
            Integer(5) @ 1:22 [21-26]
            Integer(255) @ 1:28 [27-31]
            Eof @ 1:32 [31-31]"#]],
    );
}

#[test]
fn lex_sign_without_digit_is_a_name() {
    check(
        "- -> +x a.b x@y set!",
        expect![[r#"
            Name(15) @ 1:1 [0-1]
            Name(16) @ 1:3 [2-4]
            Name(17) @ 1:6 [5-7]
            Name(18) @ 1:9 [8-11]
            Name(19) @ 1:13 [12-15]
            Name(20) @ 1:17 [16-20]
            Eof @ 1:21 [20-20]"#]],
    );
}

#[test]
fn lex_hash_literals() {
    check(
        "#t #false #void #r #\\a #\\space #\\(",
        expect![[r#"
            Boolean(true) @ 1:1 [0-2]
            Boolean(false) @ 1:4 [3-9]
            Void @ 1:11 [10-15]
            Record @ 1:17 [16-18]
            Integer(97) @ 1:20 [19-22]
            Integer(32) @ 1:24 [23-30]
            Integer(40) @ 1:32 [31-34]
            Eof @ 1:35 [34-34]"#]],
    );
}

#[test]
fn lex_string_escapes() {
    check(
        r#""hi\n" "a\"b" "\101""#,
        expect![[r#"
            String("hi\n") @ 1:1 [0-6]
            String("a\"b") @ 1:8 [7-13]
            String("A") @ 1:15 [14-20]
            Eof @ 1:21 [20-20]"#]],
    );
}

#[test]
fn lex_quote_prefixes() {
    check(
        "'a `(b ,c) @d",
        expect![[r#"
            Quote @ 1:1 [0-1]
            Name(15) @ 1:2 [1-2]
            Quasiquote @ 1:4 [3-4]
            Open(Round) @ 1:5 [4-5]
            Name(16) @ 1:6 [5-6]
            Unquote @ 1:8 [7-8]
            Name(17) @ 1:9 [8-9]
            Close(Round) @ 1:10 [9-10]
            Splice @ 1:12 [11-12]
            Name(18) @ 1:13 [12-13]
            Eof @ 1:14 [13-13]"#]],
    );
}

#[test]
fn lex_comments_track_lines() {
    check(
        "; hi\n(a #| x\n y |# b)\n",
        expect![[r#"
            Open(Round) @ 2:1 [5-6]
            Name(15) @ 2:2 [6-7]
            Name(16) @ 3:7 [19-20]
            Close(Round) @ 3:8 [20-21]
            Eof @ 4:1 [22-22]"#]],
    );
}

#[test]
fn lex_skips_shebang_line() {
    check(
        "#!/usr/bin/env humble\n42",
        expect![[r#"
            Integer(42) @ 2:1 [22-24]
            Eof @ 2:3 [24-24]"#]],
    );
}

#[test]
fn lex_interns_repeated_names_once() {
    let mut names = Names::new();
    let tokens = Lexer::new("foo bar foo quote", &mut names).tokenize().unwrap();
    let ids: Vec<_> = tokens
        .iter()
        .filter_map(|t| match t.kind {
            TokenKind::Name(id) => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(ids, vec![15, 16, 15, names::QUOTE]);
    assert_eq!(names.text(16), "bar");
}

#[test]
fn lex_error_unterminated_string() {
    check(
        "\"abc",
        expect![[r#"Error: Unterminated string literal at 1:1"#]],
    );
}

#[test]
fn lex_error_unterminated_block_comment() {
    check(
        "#| never",
        expect![[r#"Error: Unterminated '#|' comment at 1:1"#]],
    );
}

#[test]
fn lex_error_unknown_character_name() {
    check(
        "#\\bogus",
        expect![[r#"Error: Unknown character name '#\bogus' at 1:1"#]],
    );
}

#[test]
fn lex_error_character_followed_by_space() {
    check("#\\ ", expect![[r#"Error: '#\' followed by space at 1:1"#]]);
}

#[test]
fn lex_error_octal_overflow() {
    check(
        "\"\\400\"",
        expect![[r#"Error: Octal escape overflows a byte at 1:3"#]],
    );
}

#[test]
fn lex_error_unknown_hash_syntax() {
    check("#q", expect![[r#"Error: Unknown '#q' syntax at 1:1"#]]);
    check("# x", expect![[r#"Error: '#' followed by space at 1:1"#]]);
    check(
        "#tru",
        expect![[r#"Error: Expected #t or #f, got '#tru' at 1:1"#]],
    );
}

#[test]
fn lex_error_leading_dot_name() {
    check(
        ".foo",
        expect![[r#"Error: Name '.foo' cannot begin with '.' at 1:1"#]],
    );
}

#[test]
fn lex_error_malformed_numbers() {
    check(
        "12abc",
        expect![[r#"Error: Invalid integer literal: 12abc at 1:1"#]],
    );
    check(
        "9223372036854775808",
        expect![[r#"Error: Invalid integer literal: 9223372036854775808 at 1:1"#]],
    );
}

#[test]
fn lex_error_unexpected_character() {
    check("a | b", expect![[r#"Error: Unexpected character '|' at 1:3"#]]);
}
