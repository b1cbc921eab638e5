//! P-Code validation scenarios: block decomposition, register renaming, the
//! exception-region walk, definite assignment, and the object-level
//! reference checks, each pinned to its X-code.

use avalanche::{
    ErrorList, Instr, RegKind, Register, SourceMap, XcodeFun, XcodeObject, parse_object,
    xcode_from_pcode,
};

fn build(text: &str) -> (XcodeObject, ErrorList) {
    let pcode = parse_object(text).expect("test input parses");
    let mut errors = ErrorList::new();
    let xcode = xcode_from_pcode(&pcode, &mut errors, &SourceMap::new());
    (xcode, errors)
}

fn build_clean(text: &str) -> XcodeObject {
    let (xcode, errors) = build(text);
    assert!(
        errors.is_empty(),
        "{}",
        errors.to_diagnostic_string(30, false)
    );
    xcode
}

fn assert_code(text: &str, code: &str) {
    let (_, errors) = build(text);
    assert!(
        errors.iter().any(|e| e.message.starts_with(code)),
        "expected {code}, got: {}",
        errors.to_diagnostic_string(30, false)
    );
}

fn only_fun(xcode: &XcodeObject) -> &XcodeFun {
    xcode
        .globals
        .iter()
        .find_map(|g| g.fun.as_ref())
        .expect("input holds a fun")
}

#[test]
fn empty_function_has_no_blocks() {
    let xcode = build_clean("[fun false [ava foo] [ava pos] [] []]");
    assert_eq!(xcode.len(), 1);
    assert_eq!(only_fun(&xcode).num_blocks(), 0);
}

#[test]
fn identity_function_is_one_block_of_one_ret() {
    let xcode = build_clean("[fun false [ava foo] [ava pos] [x] [[ret v0]]]");
    let fun = only_fun(&xcode);
    assert_eq!(fun.num_blocks(), 1);
    assert_eq!(fun.blocks[0].instrs.len(), 1);
    assert_eq!(
        fun.blocks[0].instrs[0],
        Instr::Ret {
            value: Register::new(RegKind::Var, 0)
        }
    );
    assert_eq!(fun.blocks[0].next, [-1, -1]);
}

#[test]
fn renaming_flattens_registers_by_kind() {
    let xcode = build_clean(
        "[fun false [ava foo] [ava pos] [x] [\n\
         [push d 1]\n\
         [ld-imm-vd d0 seed]\n\
         [push i 1]\n\
         [ld-reg-d i0 d0]\n\
         [pop i 1]\n\
         [pop d 1]\n\
         [ret v0]\n\
         ]]",
    );
    let fun = only_fun(&xcode);
    // One variable, one data, one integer register: offsets 0, 1, 2.
    assert_eq!(fun.reg_type_off[..4], [0, 1, 2, 3]);

    // The conversion may throw, so it opens its own block.
    assert_eq!(fun.num_blocks(), 2);
    assert_eq!(
        fun.blocks[1].instrs[0],
        Instr::LdRegD {
            dst: Register::new(RegKind::Int, 2),
            src: Register::new(RegKind::Data, 1),
        }
    );
}

#[test]
fn branch_targets_resolve_to_block_indices() {
    let xcode = build_clean(
        "[fun false [ava foo] [ava pos] [x] [\n\
         [branch v0 0 false 1]\n\
         [ret v0]\n\
         [label 1]\n\
         [ret v0]\n\
         ]]",
    );
    let fun = only_fun(&xcode);
    assert_eq!(fun.num_blocks(), 3);
    assert_eq!(fun.blocks[0].next, [1, 2]);
    assert_eq!(fun.blocks[1].next, [-1, -1]);
}

#[test]
fn duplicate_labels_are_x9000() {
    assert_code(
        "[fun false [ava foo] [ava pos] [x] [[label 4] [label 4] [ret v0]]]",
        "X9000",
    );
}

#[test]
fn pop_beyond_the_stack_is_x9001() {
    assert_code(
        "[fun false [ava foo] [ava pos] [x] [[pop d 1] [ret v0]]]",
        "X9001",
    );
}

#[test]
fn reference_to_a_nonexistent_register_is_x9002() {
    assert_code(
        "[fun false [ava foo] [ava pos] [x] [[ld-reg-s d0 v0] [ret v0]]]",
        "X9002",
    );
}

#[test]
fn jump_to_a_missing_label_is_x9003() {
    assert_code("[fun false [ava foo] [ava pos] [x] [[goto 9]]]", "X9003");
}

#[test]
fn read_of_an_uninitialised_register_is_x9004() {
    assert_code(
        "[fun false [ava foo] [ava pos] [x] [\n\
         [push d 1] [ld-reg-s v0 d0] [pop d 1] [ret v0]]]",
        "X9004",
    );
}

#[test]
fn read_of_an_uninitialised_variable_is_x9005() {
    assert_code(
        "[fun false [ava foo] [ava pos] [x y] [[ret v1]]]",
        "X9005",
    );
}

#[test]
fn conditional_initialisation_does_not_count() {
    assert_code(
        "[fun false [ava foo] [ava pos] [x y] [\n\
         [branch v0 0 false 1]\n\
         [ld-reg-s v1 v0]\n\
         [label 1]\n\
         [ret v1]\n\
         ]]",
        "X9005",
    );
}

#[test]
fn initialisation_on_every_path_satisfies_the_fixed_point() {
    build_clean(
        "[fun false [ava foo] [ava pos] [x y] [\n\
         [branch v0 0 false 1]\n\
         [ld-reg-s v1 v0]\n\
         [goto 2]\n\
         [label 1]\n\
         [ld-reg-s v1 v0]\n\
         [label 2]\n\
         [ret v1]\n\
         ]]",
    );
}

#[test]
fn open_register_section_at_function_end_is_x9006() {
    assert_code(
        "[fun false [ava foo] [ava pos] [x] [[push d 1] [ld-imm-vd d0 q] [ret v0]]]",
        "X9006",
    );
}

#[test]
fn global_reference_out_of_range_is_x9007() {
    assert_code(
        "[fun false [ava foo] [ava pos] [x] [\n\
         [push d 1] [ld-glob d0 5] [pop d 1] [ret v0]]]",
        "X9007",
    );
}

#[test]
fn invoking_a_variable_is_x9008() {
    assert_code(
        "[var true [ava v]]\n\
         [fun false [ava foo] [ava pos] [x] [\n\
         [push d 1] [invoke-ss d0 0 0 0] [pop d 1] [ret v0]]]",
        "X9008",
    );
}

#[test]
fn static_invocation_arity_mismatch_is_x9009() {
    assert_code(
        "[fun false [ava callee] [ava pos pos] [a b] [[ret v0]]]\n\
         [fun false [ava caller] [ava pos] [x] [\n\
         [push d 1] [ld-imm-vd d0 q] [invoke-ss d0 0 0 1] [pop d 1] [ret v0]]]",
        "X9009",
    );
}

#[test]
fn matching_arity_invocation_is_clean() {
    build_clean(
        "[ext-fun [ava callee] [ava pos pos]]\n\
         [fun false [ava caller] [ava pos] [x] [\n\
         [push d 2] [ld-imm-vd d0 a] [ld-imm-vd d1 b]\n\
         [invoke-ss d0 0 0 2] [pop d 2] [ret v0]]]",
    );
}

#[test]
fn regions_sharing_a_landing_pad_are_x9013() {
    assert_code(
        "[fun false [ava foo] [ava pos] [x] [\n\
         [try false 1]\n\
         [try false 1]\n\
         [yrt]\n\
         [yrt]\n\
         [ret v0]\n\
         [label 1]\n\
         [rethrow]\n\
         ]]",
        "X9013",
    );
}

#[test]
fn divergent_region_state_at_a_join_is_x9013() {
    assert_code(
        "[fun false [ava foo] [ava pos] [x] [\n\
         [branch v0 0 false 1]\n\
         [try false 2]\n\
         [label 1]\n\
         [ret v0]\n\
         [label 2]\n\
         [rethrow]\n\
         ]]",
        "X9013",
    );
}

#[test]
fn yrt_with_no_open_region_is_x9014() {
    assert_code(
        "[fun false [ava foo] [ava pos] [x] [[yrt] [ret v0]]]",
        "X9014",
    );
}

#[test]
fn ret_with_an_open_region_is_x9015() {
    assert_code(
        "[fun false [ava foo] [ava pos] [x] [\n\
         [try false 1]\n\
         [ret v0]\n\
         [label 1]\n\
         [rethrow]\n\
         ]]",
        "X9015",
    );
}

#[test]
fn rethrow_outside_a_caught_region_is_x9016() {
    assert_code("[fun false [ava foo] [ava pos] [x] [[rethrow]]]", "X9016");
}

#[test]
fn balanced_try_yrt_is_clean() {
    build_clean(
        "[fun false [ava foo] [ava pos] [x] [\n\
         [try false 1]\n\
         [yrt]\n\
         [ret v0]\n\
         [label 1]\n\
         [rethrow]\n\
         ]]",
    );
}

#[test]
fn struct_field_out_of_range_is_x9017() {
    assert_code(
        "[decl-sxt true [[struct cell] [int word true false 0 native n]]]\n\
         [fun false [ava foo] [ava pos] [x] [\n\
         [push i 1] [S-i-ld i0 v0 0 5 false] [pop i 1] [ret v0]]]",
        "X9017",
    );
}

#[test]
fn value_load_of_an_integer_field_is_x9018() {
    assert_code(
        "[decl-sxt true [[struct cell] [int word true false 0 native n]]]\n\
         [fun false [ava foo] [ava pos] [x] [\n\
         [push d 1] [S-v-ld d0 v0 0 0 false] [pop d 1] [ret v0]]]",
        "X9018",
    );
}

#[test]
fn atomic_ops_demand_atomic_fields() {
    assert_code(
        "[decl-sxt true [[struct cell] [int word true false 0 native n]]]\n\
         [fun false [ava foo] [ava pos] [x] [\n\
         [push i 1] [S-ia-ld i0 v0 0 0 false seqcst] [pop i 1] [ret v0]]]",
        "X9018",
    );
}

#[test]
fn tail_allocation_demands_a_tail_struct() {
    assert_code(
        "[decl-sxt true [[struct cell] [value v]]]\n\
         [fun false [ava foo] [ava pos] [x] [\n\
         [push i 1] [ld-imm-i i0 4] [S-new-st v0 0 i0 true] [pop i 1] [ret v0]]]",
        "X9008",
    );
}

#[test]
fn well_typed_struct_access_is_clean() {
    build_clean(
        "[decl-sxt true [[struct cell] [value v] [int word true true 0 native n]]]\n\
         [fun false [ava foo] [ava pos] [x] [\n\
         [push i 1]\n\
         [S-ia-ld i0 v0 0 1 false acquire]\n\
         [pop i 1]\n\
         [ret v0]]]",
    );
}

#[test]
fn init_must_point_at_a_unary_function() {
    assert_code(
        "[fun false [ava not-init] [ava pos pos] [a b] [[ret v0]]]\n[init 0]",
        "X9008",
    );
}

#[test]
fn validation_reports_every_problem_it_finds() {
    let (_, errors) = build(
        "[fun false [ava foo] [ava pos] [x] [[label 4] [label 4] [pop d 1] [ret v0]]]",
    );
    let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
    assert!(messages.iter().any(|m| m.starts_with("X9000")), "{messages:?}");
    assert!(messages.iter().any(|m| m.starts_with("X9001")), "{messages:?}");
}
