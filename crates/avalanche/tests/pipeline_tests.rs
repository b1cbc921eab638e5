//! End-to-end pipeline tests: source text through parsing, macro
//! substitution, code generation and validation, driven by a compilation
//! environment with in-memory sources.

use std::sync::Arc;

use avalanche::{
    CompEnv, ErrorList, Global, INIT_FUNCTION_NAME, SourceMap, compile_module, emit_object,
    make_interface, parse_object,
};

fn env_with(sources: &[(&str, &str)]) -> CompEnv {
    let mut env = CompEnv::new("test:");
    let mut map = SourceMap::new();
    for (name, text) in sources {
        map.insert((*name).to_owned(), Arc::from(*text));
    }
    env.use_fixed_sources(map);
    env
}

#[test]
fn a_literal_module_compiles_to_a_synthesised_init() {
    let env = env_with(&[("lit.ava", "onlyliteral\n")]);
    let mut errors = ErrorList::new();
    let pcode = compile_module(&env, "lit.ava", &mut errors).expect("compiles");
    assert!(errors.is_empty(), "{}", errors.to_diagnostic_string(30, false));

    assert_eq!(pcode.len(), 3);
    assert!(matches!(pcode.globals[0], Global::SrcPos(_)));
    let Global::Fun(init) = &pcode.globals[1] else {
        panic!("expected the init function, got {:?}", pcode.globals[1]);
    };
    assert_eq!(init.name.name, INIT_FUNCTION_NAME);
    assert_eq!(init.prototype.num_args(), 1);
    assert!(matches!(pcode.globals[2], Global::Init { fun: 1 }));
}

#[test]
fn implicit_packages_lead_the_object() {
    let mut env = env_with(&[("lit.ava", "onlyliteral\n")]);
    env.implicit_packages.push("org.ava-lang.avast".to_owned());

    let mut errors = ErrorList::new();
    let pcode = compile_module(&env, "lit.ava", &mut errors).expect("compiles");
    assert!(errors.is_empty());

    assert!(matches!(pcode.globals[0], Global::SrcPos(_)));
    assert!(
        matches!(&pcode.globals[1], Global::LoadPkg { name } if name == "org.ava-lang.avast")
    );
    assert!(matches!(pcode.globals[3], Global::Init { fun: 2 }));
}

#[test]
fn compiled_objects_round_trip_through_text() {
    let env = env_with(&[("lit.ava", "first\n(second)\n")]);
    let mut errors = ErrorList::new();
    let pcode = compile_module(&env, "lit.ava", &mut errors).expect("compiles");
    assert!(errors.is_empty());

    let reparsed = parse_object(&emit_object(&pcode)).expect("emitted object parses");
    assert_eq!(pcode, reparsed);
}

#[test]
fn a_private_module_has_an_empty_interface() {
    let env = env_with(&[("lit.ava", "onlyliteral\n")]);
    let mut errors = ErrorList::new();
    let pcode = compile_module(&env, "lit.ava", &mut errors).expect("compiles");
    assert!(make_interface(&pcode).is_empty());
}

#[test]
fn unknown_invocations_fail_compilation() {
    let env = env_with(&[("bad.ava", "frobnicate a b\n")]);
    let mut errors = ErrorList::new();
    assert!(compile_module(&env, "bad.ava", &mut errors).is_none());
    assert!(
        errors
            .iter()
            .any(|e| e.message.contains("no such function or macro"))
    );
}

#[test]
fn unknown_variables_fail_compilation() {
    let env = env_with(&[("bad.ava", "prefix$nowhere$suffix\n")]);
    let mut errors = ErrorList::new();
    assert!(compile_module(&env, "bad.ava", &mut errors).is_none());
    assert!(
        errors
            .iter()
            .any(|e| e.message.contains("no such variable"))
    );
}

#[test]
fn errors_arrive_in_source_order() {
    let env = env_with(&[("bad.ava", "\"first\\q\"\n\"second\\z\"\n")]);
    let mut errors = ErrorList::new();
    assert!(compile_module(&env, "bad.ava", &mut errors).is_none());
    let lines: Vec<usize> = errors.iter().map(|e| e.location.start_line).collect();
    assert_eq!(lines, [1, 2]);
}

#[test]
fn missing_sources_are_io_errors_with_a_location() {
    let env = env_with(&[]);
    let mut errors = ErrorList::new();
    assert!(compile_module(&env, "absent.ava", &mut errors).is_none());
    let error = errors.iter().next().expect("one error");
    assert!(error.message.contains("absent.ava"), "{}", error.message);
    assert_eq!(&*error.location.filename, "absent.ava");
}

#[test]
fn diagnostics_quote_the_offending_line() {
    let env = env_with(&[("bad.ava", "frobnicate a b\n")]);
    let mut errors = ErrorList::new();
    let _ = compile_module(&env, "bad.ava", &mut errors);

    let rendered = errors.to_diagnostic_string(30, false);
    assert!(rendered.contains("[ERROR] bad.ava:1:1:"), "{rendered}");
    assert!(rendered.contains("frobnicate a b\n"), "{rendered}");
    assert!(rendered.contains('^'), "{rendered}");
    assert!(rendered.contains("error(s) total"), "{rendered}");
}

#[test]
fn empty_sources_compile_to_an_empty_init() {
    let env = env_with(&[("empty.ava", "")]);
    let mut errors = ErrorList::new();
    let pcode = compile_module(&env, "empty.ava", &mut errors).expect("compiles");
    assert!(errors.is_empty());
    let Global::Fun(init) = &pcode.globals[1] else {
        panic!("expected init function");
    };
    assert!(init.body.is_empty());
}

#[test]
fn discarded_literal_substitutions_emit_no_code() {
    let env = env_with(&[("folded.ava", "(inner)\n")]);
    let mut errors = ErrorList::new();
    let pcode = compile_module(&env, "folded.ava", &mut errors).expect("compiles");
    assert!(errors.is_empty());
    let Global::Fun(init) = &pcode.globals[1] else {
        panic!("expected init function");
    };
    // Discarding a pure literal emits nothing.
    assert!(init.body.is_empty());
}
