//! Round-trip and robustness tests for the textual P-Code format.

use avalanche::{Global, Instr, MemoryOrder, PcodeObject, emit_object, parse_object};
use pretty_assertions::assert_eq;

fn round_trip(text: &str) -> PcodeObject {
    let object = parse_object(text).expect("input parses");
    let emitted = emit_object(&object);
    let reparsed = parse_object(&emitted).expect("emitted form parses");
    assert_eq!(object, reparsed, "round trip diverged for:\n{text}");
    object
}

/// A module exercising every global-record schema.
const ALL_GLOBALS: &str = "\
[src-pos mod.ava 0 1 3 1 80]
[load-pkg org.ava-lang.avast]
[load-mod helpers]
[macro true defer 20 1 [control [body]]]
[var true [ava counter]]
[export 4 true counter]
[ext-var [none raw_symbol]]
[ext-fun [ava helper] [ava pos pos]]
[decl-sxt true [[struct cell] [value v] \
[int word true true 8 native n] [real double r] [ptr FILE* true p] \
[hybrid BUF* h] [compose [[struct pair] [value a] [value b]] c] \
[array [[struct slot] [value s]] 4 arr] [tail [[struct tail-slot] [value t]] tl]]]
[fun true [ava main] [ava pos] [arg tmp] [[ret v0]]]
[init 9]
";

/// A function body exercising every instruction schema.
const ALL_INSTRS: &str = "\
[ext-fun [ava helper] [ava pos pos]]
[var true [ava state]]
[decl-sxt false [[struct cell] [value v] \
[int word true true 0 native n] [real double r] [ptr FILE* true p] \
[hybrid BUF* h] [compose [[struct pair] [value a]] c] \
[array [[struct slot] [value s]] 4 arr] [tail [[struct ts] [value t]] tl]]]
[fun false [ava everything] [ava pos] [x] [
  [src-pos mod.ava 0 2 2 3 9]
  [push d 3]
  [push i 2]
  [push l 1]
  [push p 1]
  [push f 1]
  [ld-imm-vd d0 \\{two words\\}]
  [ld-imm-i i0 -42]
  [ld-glob d1 1]
  [set-glob 1 d0]
  [ld-reg-s d2 d0]
  [ld-reg-d i1 d0]
  [ld-reg-u d1 i0]
  [ld-parm p0 d0 true]
  [label 1]
  [branch i0 3 true 2]
  [goto 1]
  [label 2]
  [invoke-ss d0 0 0 2]
  [invoke-sd d1 0 0 1]
  [invoke-dd d2 f0 0 1]
  [try true 7]
  [yrt]
  [S-new-s v0 2 true]
  [S-new-st v0 2 i0 false]
  [S-cpy v0 v0 2]
  [S-cpy-t v0 v0 2 i0]
  [S-i-ld i0 v0 2 1 false]
  [S-i-st v0 2 1 i0 true]
  [S-ia-ld i0 v0 2 1 false acquire]
  [S-ia-st v0 2 1 i0 false release]
  [S-ia-cas i0 i1 v0 2 1 i0 i1 true false acqrel monotonic]
  [S-ia-rmw i0 v0 2 1 add i1 false seqcst]
  [S-r-ld d0 v0 2 2 false]
  [S-r-st v0 2 2 d0 false]
  [S-p-ld d0 v0 2 3 false]
  [S-p-st v0 2 3 d0 false]
  [S-pa-ld d0 v0 2 3 true unordered]
  [S-pa-st v0 2 3 d0 false monotonic]
  [S-pa-cas i0 d0 v0 2 3 d1 d2 false true seqcst acquire]
  [S-pa-xch d0 v0 2 3 d1 false acqrel]
  [S-v-ld d0 v0 2 0 false]
  [S-v-st v0 2 0 d0 false]
  [S-hi-ld i0 v0 2 4 false]
  [S-hi-st v0 2 4 i0 false]
  [S-hy-intp d0 v0 2 4 false]
  [S-gfp d0 v0 2 5]
  [S-gap d0 v0 i0 2 6]
  [label 7]
  [rethrow]
]]
";

#[test]
fn empty_text_is_the_empty_object() {
    let object = round_trip("");
    assert!(object.is_empty());
    assert_eq!(emit_object(&object), "");
}

#[test]
fn every_global_schema_round_trips() {
    let object = round_trip(ALL_GLOBALS);
    assert_eq!(object.len(), 11);
}

#[test]
fn every_instruction_schema_round_trips() {
    let object = round_trip(ALL_INSTRS);
    let Global::Fun(fun) = &object.globals[3] else {
        panic!("expected fun record");
    };
    assert!(fun.body.len() > 40);
    assert!(
        fun.body
            .iter()
            .any(|i| matches!(i, Instr::SIaLd { order: MemoryOrder::Acquire, .. }))
    );
}

#[test]
fn emission_is_a_fixed_point() {
    for text in [ALL_GLOBALS, ALL_INSTRS] {
        let once = emit_object(&parse_object(text).unwrap());
        let twice = emit_object(&parse_object(&once).unwrap());
        assert_eq!(once, twice);
    }
}

#[test]
fn the_reader_is_whitespace_insensitive() {
    let compact = parse_object("[var true [ava x]] [ext-var [ava y]]").unwrap();
    let airy = parse_object("\n  [var  true\n [ava x]\t]\n\n[ext-var [ava y]]\n").unwrap();
    assert_eq!(compact, airy);
}

#[test]
fn quoted_and_bracketed_names_are_equivalent() {
    let bracketed = parse_object("[var true [ava some-var]]").unwrap();
    let quoted = parse_object("[var true \"ava some-var\"]").unwrap();
    assert_eq!(bracketed, quoted);
}

#[test]
fn verbatim_atoms_carry_awkward_payloads() {
    let object = round_trip(
        "[fun false [ava f] [ava pos] [x] [[ld-imm-vd d0 \\{spaces and [brackets]\\}]]]",
    );
    let Global::Fun(fun) = &object.globals[0] else {
        panic!("expected fun");
    };
    assert_eq!(
        fun.body[0],
        Instr::LdImmVd {
            dst: avalanche::Register::parse("d0").unwrap(),
            value: "spaces and [brackets]".to_owned(),
        }
    );
}

#[test]
fn integers_normalise_to_decimal_on_output() {
    let object = parse_object("[init 0007]").unwrap();
    assert_eq!(emit_object(&object), "[init 7]\n");
}

#[test]
fn non_decimal_integers_are_rejected() {
    assert!(parse_object("[init 0x10]").is_err());
}

#[test]
fn unknown_heads_are_reported_with_context() {
    let err = parse_object("[frobnicate 1 2]").unwrap_err();
    assert!(err.contains("unknown global record"), "{err}");

    let err = parse_object("[fun false [ava f] [ava pos] [x] [[warp 9]]]").unwrap_err();
    assert!(err.contains("unknown instruction"), "{err}");
}

#[test]
fn missing_and_trailing_operands_are_errors() {
    assert!(parse_object("[var true]").unwrap_err().contains("missing"));
    assert!(
        parse_object("[init 0 extra]")
            .unwrap_err()
            .contains("trailing")
    );
}

#[test]
fn malformed_registers_are_rejected() {
    let err = parse_object("[fun false [ava f] [ava pos] [x] [[ret q0]]]").unwrap_err();
    assert!(err.contains("not a register"), "{err}");
}

#[test]
fn bad_memory_orders_are_local_errors() {
    let err = parse_object(
        "[fun false [ava f] [ava pos] [x] [[S-ia-ld i0 v0 0 0 true sideways]]]",
    )
    .unwrap_err();
    assert!(err.contains("bad memory order"), "{err}");
}

#[test]
fn bad_booleans_are_rejected() {
    let err = parse_object("[var yes [ava x]]").unwrap_err();
    assert!(err.contains("not a boolean"), "{err}");
}
