//! Lexer scenarios: contextual classification, string forms, verbatims, and
//! the boundary errors lexing must survive.

use avalanche::{Lexer, TokenKind};

/// Collects the kinds of every successfully lexed token.
fn kinds(src: &str) -> Vec<TokenKind> {
    Lexer::new(src).filter_map(Result::ok).map(|t| t.kind).collect()
}

/// Collects the text of every successfully lexed token.
fn texts(src: &str) -> Vec<String> {
    Lexer::new(src).filter_map(Result::ok).map(|t| t.text).collect()
}

/// Collects every error message produced while lexing to exhaustion.
fn errors(src: &str) -> Vec<String> {
    Lexer::new(src)
        .filter_map(Result::err)
        .map(|e| e.message)
        .collect()
}

#[test]
fn a_line_of_mixed_tokens_classifies() {
    assert_eq!(
        kinds("word (sub) [lit] {blk}\n"),
        [
            TokenKind::Bareword,
            TokenKind::BeginSubstitution,
            TokenKind::Bareword,
            TokenKind::CloseParen,
            TokenKind::BeginSemiliteral,
            TokenKind::Bareword,
            TokenKind::CloseBracket,
            TokenKind::BeginBlock,
            TokenKind::Bareword,
            TokenKind::CloseBrace,
            TokenKind::Newline,
        ]
    );
}

#[test]
fn glued_openers_become_subscripts() {
    assert_eq!(
        kinds("f(x) f[0] f{k}"),
        [
            TokenKind::Bareword,
            TokenKind::BeginNameSubscript,
            TokenKind::Bareword,
            TokenKind::CloseParen,
            TokenKind::Bareword,
            TokenKind::BeginNumericSubscript,
            TokenKind::Bareword,
            TokenKind::CloseBracket,
            TokenKind::Bareword,
            TokenKind::BeginStringSubscript,
            TokenKind::Bareword,
            TokenKind::CloseBrace,
        ]
    );
}

#[test]
fn an_opener_after_an_opener_is_independent() {
    assert_eq!(
        kinds("(("),
        [TokenKind::BeginSubstitution, TokenKind::BeginSubstitution]
    );
}

#[test]
fn string_kind_follows_both_delimiters() {
    assert_eq!(
        kinds("\"a\" `l\" \"r` `lr`"),
        [
            TokenKind::AString,
            TokenKind::LString,
            TokenKind::RString,
            TokenKind::LrString,
        ]
    );
}

#[test]
fn escapes_resolve_inside_strings() {
    assert_eq!(texts("\"a\\tb\\x41\\\\\""), ["a\tbA\\"]);
}

#[test]
fn literal_newlines_accumulate_as_lf() {
    assert_eq!(texts("\"a\r\nb\""), ["a\nb"]);
}

#[test]
fn invalid_escape_fails_the_string() {
    let errs = errors("\"a\\qb\"");
    assert_eq!(errs.len(), 1);
    assert!(errs[0].contains("invalid backslash sequence"), "{errs:?}");
}

#[test]
fn unclosed_string_is_an_error() {
    assert!(errors("\"abc").iter().any(|e| e.contains("unclosed string")));
}

#[test]
fn lone_backslash_at_end_of_input_is_an_error() {
    assert!(
        errors("\\")
            .iter()
            .any(|e| e.contains("lone backslash at end of input"))
    );
}

#[test]
fn verbatims_nest_and_keep_their_markers() {
    assert_eq!(texts("\\{a \\{b\\} c\\}"), ["a \\{b\\} c"]);
}

#[test]
fn verbatim_escape_set_is_reached_via_semicolon() {
    assert_eq!(texts("\\{a\\;tb\\}"), ["a\tb"]);
}

#[test]
fn bare_backslash_in_verbatim_is_literal() {
    assert_eq!(texts("\\{a\\b\\}"), ["a\\b"]);
}

#[test]
fn unbalanced_verbatim_is_an_error() {
    let errs = errors("\\{abc \\{de");
    assert!(errs.iter().any(|e| e.contains("unclosed verbatim")), "{errs:?}");
}

#[test]
fn comments_vanish_without_taking_the_newline() {
    assert_eq!(
        kinds("a ; the rest\nb"),
        [TokenKind::Bareword, TokenKind::Newline, TokenKind::Bareword]
    );
}

#[test]
fn escaped_physical_newline_joins_lines() {
    assert_eq!(kinds("a \\\nb"), [TokenKind::Bareword, TokenKind::Bareword]);
}

#[test]
fn backslash_space_is_a_logical_newline() {
    assert_eq!(
        kinds("a \\ b"),
        [TokenKind::Bareword, TokenKind::Newline, TokenKind::Bareword]
    );
}

#[test]
fn crlf_yields_one_newline_token() {
    assert_eq!(
        kinds("a\r\nb"),
        [TokenKind::Bareword, TokenKind::Newline, TokenKind::Bareword]
    );
    assert_eq!(texts("a\r\nb")[1], "\n");
}

#[test]
fn bareword_glued_to_a_string_is_an_error() {
    let errs = errors("\"foo\"bar");
    assert!(
        errs.iter().any(|e| e.contains("separated from previous")),
        "{errs:?}"
    );
}

#[test]
fn quote_glued_to_a_bareword_is_an_error() {
    let errs = errors("foo\"bar\"");
    assert!(
        errs.iter().any(|e| e.contains("separated from previous")),
        "{errs:?}"
    );
}

#[test]
fn backquote_strings_may_attach() {
    // An L-string glues to the preceding token by design.
    assert_eq!(kinds("foo`bar\""), [TokenKind::Bareword, TokenKind::LString]);
}

#[test]
fn group_tags_ride_on_the_closer() {
    let toks: Vec<_> = Lexer::new("(a)tag").filter_map(Result::ok).collect();
    assert_eq!(toks[2].kind, TokenKind::CloseParen);
    assert_eq!(toks[2].text, ")tag");
}

#[test]
fn illegal_characters_are_reported_and_skipped() {
    let errs = errors("a \x01\x02 b");
    assert!(
        errs.iter()
            .any(|e| e.contains("illegal character") && e.contains("\\x01")),
        "{errs:?}"
    );
    // Lexing continued past the bad run.
    assert_eq!(kinds("a \x01\x02 b").len(), 2);
}

#[test]
fn positions_are_one_based_and_tab_aware() {
    let toks: Vec<_> = Lexer::new("ab\n\tc").filter_map(Result::ok).collect();
    assert_eq!((toks[0].line, toks[0].column), (1, 1));
    assert_eq!((toks[2].line, toks[2].column), (2, 9));
}
