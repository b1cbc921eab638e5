//! Parser scenarios: statement structure, subscript rewriting, group tags,
//! interpolation, and the semiliteral regrouping rules.

use avalanche::{ErrorList, ParseUnit, ParseUnitKind, Statement, parse};

fn parse_ok(src: &str) -> ParseUnit {
    let mut errors = ErrorList::new();
    let root = parse(&mut errors, src, "test.ava");
    assert!(
        errors.is_empty(),
        "{}",
        errors.to_diagnostic_string(30, false)
    );
    root
}

fn parse_errors(src: &str) -> Vec<String> {
    let mut errors = ErrorList::new();
    let _ = parse(&mut errors, src, "test.ava");
    errors.iter().map(|e| e.message.clone()).collect()
}

fn statements(root: &ParseUnit) -> &[Statement] {
    match &root.kind {
        ParseUnitKind::Block(statements) => statements,
        other => panic!("root must be a block, got {other:?}"),
    }
}

/// The statements of the root that actually hold units.
fn proper_statements(root: &ParseUnit) -> Vec<&Statement> {
    statements(root).iter().filter(|s| !s.is_empty()).collect()
}

#[test]
fn empty_input_parses_to_an_empty_block() {
    let root = parse_ok("");
    assert!(statements(&root).iter().all(Statement::is_empty));
}

#[test]
fn every_valid_source_produces_a_populated_block() {
    let root = parse_ok("alpha beta\ngamma (delta)\n[eps] {zeta\n}\n");
    let proper = proper_statements(&root);
    assert_eq!(proper.len(), 3);
    assert_eq!(proper[0].units.len(), 2);
}

#[test]
fn newlines_inside_groups_are_transparent() {
    let root = parse_ok("(a\nb)");
    let proper = proper_statements(&root);
    assert_eq!(proper.len(), 1);
    let ParseUnitKind::Substitution(stmts) = &proper[0].units[0].kind else {
        panic!("expected substitution");
    };
    assert_eq!(stmts[0].units.len(), 2);
}

#[test]
fn blocks_keep_their_statement_structure() {
    let root = parse_ok("f {a\nb c\n}");
    let unit = &proper_statements(&root)[0].units[1];
    let ParseUnitKind::Block(stmts) = &unit.kind else {
        panic!("expected block, got {unit:?}");
    };
    let sizes: Vec<usize> = stmts.iter().filter(|s| !s.is_empty()).map(|s| s.units.len()).collect();
    assert_eq!(sizes, [1, 2]);
}

#[test]
fn name_subscript_rewrites_around_its_base() {
    let root = parse_ok("base(sub unit)");
    let unit = &proper_statements(&root)[0].units[0];
    let ParseUnitKind::Substitution(stmts) = &unit.kind else {
        panic!("expected substitution");
    };
    let words = &stmts[0].units;
    assert_eq!(words.len(), 4);
    assert!(matches!(words[0].kind, ParseUnitKind::Bareword(ref s) if s == "#name-subscript#"));
    assert!(matches!(words[1].kind, ParseUnitKind::Bareword(ref s) if s == "##"));
    assert!(matches!(words[2].kind, ParseUnitKind::Bareword(ref s) if s == "base"));
    assert!(matches!(words[3].kind, ParseUnitKind::Substitution(_)));
}

#[test]
fn numeric_and_string_subscripts_use_their_own_heads() {
    for (src, head) in [
        ("base[3]", "#numeric-subscript#"),
        ("base{key}", "#string-subscript#"),
    ] {
        let root = parse_ok(src);
        let unit = &proper_statements(&root)[0].units[0];
        let ParseUnitKind::Substitution(stmts) = &unit.kind else {
            panic!("expected substitution for {src}");
        };
        assert!(
            matches!(stmts[0].units[0].kind, ParseUnitKind::Bareword(ref s) if s == head),
            "{src}"
        );
    }
}

#[test]
fn tagged_subscripts_carry_the_tag() {
    let root = parse_ok("base(sub)t");
    let unit = &proper_statements(&root)[0].units[0];
    let ParseUnitKind::Substitution(stmts) = &unit.kind else {
        panic!("expected substitution");
    };
    assert!(matches!(stmts[0].units[1].kind, ParseUnitKind::Bareword(ref s) if s == "#t#"));
}

#[test]
fn group_tags_wrap_every_group_kind() {
    for (src, head) in [
        ("(a)go", "#substitution#go"),
        ("[a]go", "#semiliteral#go"),
        ("{a}go", "#block#go"),
    ] {
        let root = parse_ok(src);
        let unit = &proper_statements(&root)[0].units[0];
        let ParseUnitKind::Substitution(stmts) = &unit.kind else {
            panic!("expected substitution for {src}");
        };
        assert!(
            matches!(stmts[0].units[0].kind, ParseUnitKind::Bareword(ref s) if s == head),
            "{src}"
        );
    }
}

#[test]
fn interpolation_splits_into_partials_and_var_reads() {
    let root = parse_ok("pre$x$mid$y$post");
    let unit = &proper_statements(&root)[0].units[0];
    let ParseUnitKind::Substitution(stmts) = &unit.kind else {
        panic!("expected substitution");
    };
    let parts = &stmts[0].units;
    assert_eq!(parts.len(), 5);
    assert!(matches!(parts[0].kind, ParseUnitKind::RString(ref s) if s == "pre"));
    assert!(matches!(parts[2].kind, ParseUnitKind::LrString(ref s) if s == "mid"));
    assert!(matches!(parts[4].kind, ParseUnitKind::LString(ref s) if s == "post"));
    for var in [&parts[1], &parts[3]] {
        let ParseUnitKind::Substitution(inner) = &var.kind else {
            panic!("expected #var# substitution");
        };
        assert!(matches!(inner[0].units[0].kind, ParseUnitKind::Bareword(ref s) if s == "#var#"));
    }
}

#[test]
fn a_lone_interpolated_variable_has_no_partials() {
    let root = parse_ok("$x");
    let unit = &proper_statements(&root)[0].units[0];
    let ParseUnitKind::Substitution(stmts) = &unit.kind else {
        panic!("expected substitution");
    };
    assert_eq!(stmts[0].units.len(), 1);
}

#[test]
fn empty_variable_names_are_errors() {
    assert!(
        parse_errors("a$$b")
            .iter()
            .any(|e| e.contains("empty variable name"))
    );
}

#[test]
fn semiliteral_partials_regroup_with_neighbours() {
    let root = parse_ok("[a `mid` b c]");
    let unit = &proper_statements(&root)[0].units[0];
    let ParseUnitKind::Semiliteral(units) = &unit.kind else {
        panic!("expected semiliteral");
    };
    // a`mid`b regroups; c stays alone.
    assert_eq!(units.len(), 2);
    let ParseUnitKind::Substitution(stmts) = &units[0].kind else {
        panic!("expected regrouped substitution, got {units:?}");
    };
    assert_eq!(stmts[0].units.len(), 3);
    assert!(matches!(units[1].kind, ParseUnitKind::Bareword(ref s) if s == "c"));
}

#[test]
fn l_like_string_at_semiliteral_start_is_an_error() {
    assert!(
        parse_errors("[`oops\" a]")
            .iter()
            .any(|e| e.contains("beginning of semiliteral"))
    );
}

#[test]
fn r_like_string_at_semiliteral_end_is_an_error() {
    assert!(
        parse_errors("[a \"oops` ]")
            .iter()
            .any(|e| e.contains("end of semiliteral"))
    );
}

#[test]
fn stray_closer_is_an_unexpected_token() {
    assert!(
        parse_errors("a)")
            .iter()
            .any(|e| e.contains("unexpected token"))
    );
}

#[test]
fn unclosed_group_reports_end_of_input() {
    assert!(
        parse_errors("(a b")
            .iter()
            .any(|e| e.contains("unexpected end-of-input"))
    );
}

#[test]
fn lexical_errors_surface_in_the_error_list() {
    let errs = parse_errors("\"abc");
    assert!(errs.iter().any(|e| e.contains("unclosed string")), "{errs:?}");
}

#[test]
fn parsing_continues_past_recoverable_errors() {
    let mut errors = ErrorList::new();
    let root = parse(&mut errors, "\"bad\\q\"\ngood unit\n", "test.ava");
    assert!(!errors.is_empty());
    // The second line still parsed.
    let proper = proper_statements(&root);
    assert!(proper.iter().any(|s| s.units.len() == 2));
}

#[test]
fn locations_point_into_the_source() {
    let root = parse_ok("  word");
    let unit = &proper_statements(&root)[0].units[0];
    assert_eq!(unit.location.start_line, 1);
    assert_eq!(unit.location.start_column, 3);
    assert_eq!(&*unit.location.filename, "test.ava");
}
