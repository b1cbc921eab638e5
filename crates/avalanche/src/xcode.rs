//! P-Code validation and the X-Code structural transform.
//!
//! Each `fun` record is decomposed into basic blocks, its register stacks
//! are simulated and every register use renamed to a flat unique index, the
//! exception-region structure is checked for consistency, and a fixed-point
//! pass computes definite-assignment bitsets across the control-flow graph.
//! Problems are reported with stable X-codes:
//!
//! | code  | meaning |
//! |-------|---------|
//! | X9000 | duplicate label id |
//! | X9001 | register stack underflow |
//! | X9002 | reference to a register that does not exist at that point |
//! | X9003 | jump or landing pad targets a label that does not exist |
//! | X9004 | register read without definite initialisation |
//! | X9005 | variable read without definite initialisation |
//! | X9006 | register stacks not empty at end of function |
//! | X9007 | global reference out of range |
//! | X9008 | global reference to a record of the wrong kind |
//! | X9009 | static invocation with the wrong argument count |
//! | X9013 | inconsistent exception-region state at a join point |
//! | X9014 | `yrt` with no region open |
//! | X9015 | `ret` or function end with a region open |
//! | X9016 | `rethrow` outside a caught region |
//! | X9017 | struct field reference out of range |
//! | X9018 | struct field of the wrong kind for the operation |
//!
//! Basic blocks start at labels, after terminators, and **before** any
//! instruction that may throw; the last rule is what ties landing pads into
//! the definite-assignment analysis, since a landing pad can then be
//! constrained by the entry state of every throwing block in its region.

use std::collections::VecDeque;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use ahash::AHashMap;
use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::diag::{ErrorList, Location};
use crate::pcode::{
    FieldKind, FunGlobal, Global, Instr, NUM_REG_KINDS, PcodeObject, RegKind, Register, SrcPos,
    StructDef,
};

/// A fixed-width bitset keyed by uniquified register index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhiBits {
    words: Vec<u64>,
}

impl PhiBits {
    #[must_use]
    pub fn zeros(bits: usize) -> Self {
        Self {
            words: vec![0; bits.div_ceil(64).max(1)],
        }
    }

    #[must_use]
    pub fn ones(bits: usize) -> Self {
        let mut set = Self::zeros(bits);
        for (ix, word) in set.words.iter_mut().enumerate() {
            let low = ix * 64;
            *word = if low + 64 <= bits {
                u64::MAX
            } else if low < bits {
                (1u64 << (bits - low)) - 1
            } else {
                0
            };
        }
        set
    }

    #[must_use]
    pub fn get(&self, ix: u32) -> bool {
        let ix = ix as usize;
        (self.words[ix / 64] >> (ix % 64)) & 1 != 0
    }

    pub fn set(&mut self, ix: u32, value: bool) {
        let ix = ix as usize;
        self.words[ix / 64] &= !(1 << (ix % 64));
        self.words[ix / 64] |= u64::from(value) << (ix % 64);
    }

    pub fn and_with(&mut self, other: &Self) {
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a &= b;
        }
    }

    pub fn or_with(&mut self, other: &Self) {
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            *a |= b;
        }
    }

    /// `self = (self & !effect) | (base & effect)`.
    pub fn merge_effect(&mut self, effect: &Self, base: &Self) {
        for ((a, e), b) in self.words.iter_mut().zip(&effect.words).zip(&base.words) {
            *a = (*a & !*e) | (*b & *e);
        }
    }
}

/// Register accesses of one instruction, in uniquified flat indices.
#[derive(Debug, Clone, Default)]
struct InstrAccess {
    reads: SmallVec<[u32; 4]>,
    writes: SmallVec<[u32; 2]>,
    destroys: SmallVec<[u32; 2]>,
    location: Location,
}

/// A basic block of an X-Code function.
#[derive(Debug, Clone)]
pub struct XcodeBlock {
    /// The instructions, with register operands renamed to flat indices.
    pub instrs: Vec<Instr>,
    /// Up to two successor block indices; -1 marks an empty slot.
    pub next: [i64; 2],
    pub phi_iinit: PhiBits,
    pub phi_oinit: PhiBits,
    pub phi_effect: PhiBits,
    pub phi_iexist: PhiBits,
    pub phi_oexist: PhiBits,
    access: Vec<InstrAccess>,
    /// Definitely-initialised-by-this-block set, for the fixed point.
    oinit_local: PhiBits,
    location: Location,
}

/// An X-Code function: uniquified registers plus basic blocks.
#[derive(Debug, Clone)]
pub struct XcodeFun {
    /// Base flat index of each register kind; the final entry is the total
    /// register count.
    pub reg_type_off: [u32; NUM_REG_KINDS + 1],
    /// Words per phi bitset.
    pub phi_length: usize,
    pub blocks: Vec<XcodeBlock>,
}

impl XcodeFun {
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

/// A P-Code global alongside its X-Code function, when it is a `fun`.
#[derive(Debug, Clone)]
pub struct XcodeGlobal {
    pub global: Global,
    pub fun: Option<XcodeFun>,
}

/// The X-Code form of a whole object.
#[derive(Debug, Clone)]
pub struct XcodeObject {
    pub globals: Vec<XcodeGlobal>,
}

impl XcodeObject {
    #[must_use]
    pub fn len(&self) -> usize {
        self.globals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }
}

/// Converts P-Code to X-Code, validating as it goes.
///
/// `sources` maps filenames to full source text so diagnostics can carry
/// their line; missing entries merely lose the quoted context. When errors
/// are reported the returned structure is still populated as far as
/// construction got, but its invariants are advisory only.
pub fn xcode_from_pcode(
    pcode: &PcodeObject,
    errors: &mut ErrorList,
    sources: &IndexMap<String, Arc<str>>,
) -> XcodeObject {
    let mut globals = Vec::with_capacity(pcode.len());
    let mut location = Location::unknown();

    for global in &pcode.globals {
        if let Global::SrcPos(pos) = global {
            location = location_of(pos, sources);
        }
        let fun = match global {
            Global::Fun(fun) => Some(build_fun(fun, errors, sources, &location)),
            _ => None,
        };
        globals.push(XcodeGlobal {
            global: global.clone(),
            fun,
        });
    }

    check_global_refs(pcode, errors, sources);
    XcodeObject { globals }
}

fn location_of(pos: &SrcPos, sources: &IndexMap<String, Arc<str>>) -> Location {
    let clamp = |v: i64| usize::try_from(v).unwrap_or(0);
    Location {
        filename: Arc::from(pos.filename.as_str()),
        source: sources.get(&pos.filename).cloned(),
        line_offset: clamp(pos.line_offset),
        start_line: clamp(pos.start_line),
        end_line: clamp(pos.end_line),
        start_column: clamp(pos.start_column),
        end_column: clamp(pos.end_column),
    }
}

/// Per-kind register-stack state during the linear walk.
struct RegFiles {
    /// Unique kind-local ids of the currently live registers, per kind.
    live: [Vec<u32>; NUM_REG_KINDS],
    /// Next fresh kind-local id, per kind.
    fresh: [u32; NUM_REG_KINDS],
}

impl RegFiles {
    fn new(num_vars: u32) -> Self {
        let mut files = Self {
            live: Default::default(),
            fresh: [0; NUM_REG_KINDS],
        };
        files.live[RegKind::Var.ordinal()] = (0..num_vars).collect();
        files.fresh[RegKind::Var.ordinal()] = num_vars;
        files
    }

    fn lookup(&self, reg: Register) -> Option<u32> {
        self.live[reg.kind.ordinal()].get(reg.index as usize).copied()
    }
}

struct FunBuilder<'a> {
    fun: &'a FunGlobal,
    errors: &'a mut ErrorList,
    sources: &'a IndexMap<String, Arc<str>>,
    location: Location,
}

impl FunBuilder<'_> {
    fn error(&mut self, code: &str, message: &str) {
        self.errors
            .error(format!("{code}: {message}"), self.location.clone());
    }
}

fn build_fun(
    fun: &FunGlobal,
    errors: &mut ErrorList,
    sources: &IndexMap<String, Arc<str>>,
    outer_location: &Location,
) -> XcodeFun {
    let mut builder = FunBuilder {
        fun,
        errors,
        sources,
        location: outer_location.clone(),
    };

    // Pass 1: label table and duplicate detection.
    let mut label_positions: AHashMap<i64, usize> = AHashMap::new();
    for (ix, instr) in fun.body.iter().enumerate() {
        if let Instr::Label { id } = instr {
            if label_positions.insert(*id, ix).is_some() {
                builder.error("X9000", &format!("duplicate label {id}"));
            }
        }
    }

    // Pass 2: block boundaries. A block starts at index 0, at each label,
    // after each terminator, and before each potentially-throwing
    // instruction.
    let mut starts = vec![false; fun.body.len()];
    if !fun.body.is_empty() {
        starts[0] = true;
    }
    for (ix, instr) in fun.body.iter().enumerate() {
        if matches!(instr, Instr::Label { .. }) || instr.can_throw() {
            starts[ix] = true;
        }
        if instr.is_terminator() && ix + 1 < fun.body.len() {
            starts[ix + 1] = true;
        }
    }
    let block_of_instr: Vec<usize> = {
        let mut out = Vec::with_capacity(fun.body.len());
        let mut current = 0usize;
        for (ix, &is_start) in starts.iter().enumerate() {
            if is_start && ix > 0 {
                current += 1;
            }
            out.push(current);
        }
        out
    };
    let num_blocks = block_of_instr.last().map_or(0, |b| b + 1);
    let block_of_label: AHashMap<i64, usize> = label_positions
        .iter()
        .map(|(&id, &ix)| (id, block_of_instr[ix]))
        .collect();

    // Pass 3: linear register-stack simulation, renaming as we go.
    let num_vars = u32::try_from(fun.vars.len()).unwrap_or(u32::MAX);
    let mut files = RegFiles::new(num_vars);
    let mut blocks: Vec<BlockDraft> = (0..num_blocks).map(|_| BlockDraft::default()).collect();

    for (ix, instr) in fun.body.iter().enumerate() {
        let block_ix = block_of_instr[ix];
        if blocks[block_ix].instrs.is_empty() {
            blocks[block_ix].entry_live = files.live.clone();
            blocks[block_ix].location = builder.location.clone();
        }

        if let Instr::SrcPos(pos) = instr {
            builder.location = location_of(pos, builder.sources);
        }

        let (renamed, access) = simulate_instr(instr, &mut files, &mut builder);
        blocks[block_ix].instrs.push(renamed);
        blocks[block_ix].access.push(access);
        blocks[block_ix].exit_live = files.live.clone();
    }

    // Unclosed register sections at the end of the stream.
    if RegKind::ALL
        .iter()
        .any(|k| *k != RegKind::Var && !files.live[k.ordinal()].is_empty())
    {
        builder.error("X9006", "register stack not empty at end of function");
    }

    // reg_type_off: cumulative totals per kind.
    let mut reg_type_off = [0u32; NUM_REG_KINDS + 1];
    for kind in RegKind::ALL {
        reg_type_off[kind.ordinal() + 1] = reg_type_off[kind.ordinal()] + files.fresh[kind.ordinal()];
    }
    let total_regs = reg_type_off[NUM_REG_KINDS] as usize;
    let phi_length = total_regs.div_ceil(64).max(1);

    // Flatten every register operand and access record.
    for block in &mut blocks {
        for instr in &mut block.instrs {
            for reg in instr.registers_mut() {
                reg.index += reg_type_off[reg.kind.ordinal()];
            }
            match instr {
                Instr::InvokeSs { base, .. } => *base += reg_type_off[RegKind::Data.ordinal()],
                Instr::InvokeSd { base, .. } | Instr::InvokeDd { base, .. } => {
                    *base += reg_type_off[RegKind::Parm.ordinal()];
                }
                _ => {}
            }
        }
    }

    // Successor analysis.
    let resolve_label = |builder: &mut FunBuilder<'_>, label: i64| -> Option<i64> {
        match block_of_label.get(&label) {
            Some(&block) => Some(i64::try_from(block).unwrap_or(-1)),
            None => {
                builder.error("X9003", &format!("jump to nonexistent label {label}"));
                None
            }
        }
    };
    for (ix, block) in blocks.iter_mut().enumerate() {
        let fall = if ix + 1 < num_blocks {
            i64::try_from(ix + 1).unwrap_or(-1)
        } else {
            -1
        };
        block.next = match block.instrs.last() {
            Some(Instr::Goto { target }) => {
                [resolve_label(&mut builder, *target).unwrap_or(-1), -1]
            }
            Some(Instr::Branch { target, .. }) => {
                [fall, resolve_label(&mut builder, *target).unwrap_or(-1)]
            }
            Some(Instr::Ret { .. } | Instr::Rethrow) => [-1, -1],
            _ => [fall, -1],
        };
        // Landing-pad labels must resolve too.
        for instr in &block.instrs {
            if let Instr::Try { landing_pad, .. } = instr {
                let _ = resolve_label(&mut builder, *landing_pad);
            }
        }
    }

    // Exception-region walk.
    let exc_sources = check_exception_regions(&blocks, &block_of_label, &mut builder);

    // Phi bitsets and the fixed point.
    let num_args = fun.prototype.num_args().min(fun.vars.len());
    let mut finished = finish_blocks(
        blocks,
        &reg_type_off,
        total_regs,
        phi_length,
        num_args,
        &exc_sources,
    );
    check_definite_assignment(&mut finished, &mut builder);

    XcodeFun {
        reg_type_off,
        phi_length,
        blocks: finished,
    }
}

#[derive(Debug, Clone, Default)]
struct BlockDraft {
    instrs: Vec<Instr>,
    access: Vec<InstrAccess>,
    entry_live: [Vec<u32>; NUM_REG_KINDS],
    exit_live: [Vec<u32>; NUM_REG_KINDS],
    next: [i64; 2],
    location: Location,
}

/// Simulates one instruction: bounds-checks and renames register operands,
/// applies push/pop, and records the instruction's reads, writes, and
/// destroyed registers as kind-local unique ids (flattened later).
fn simulate_instr(
    instr: &Instr,
    files: &mut RegFiles,
    builder: &mut FunBuilder<'_>,
) -> (Instr, InstrAccess) {
    let mut renamed = instr.clone();
    let mut access = InstrAccess {
        location: builder.location.clone(),
        ..InstrAccess::default()
    };

    let mut bad_operand = false;
    for reg in renamed.registers_mut() {
        match files.lookup(*reg) {
            Some(uniq) => reg.index = uniq,
            None => bad_operand = true,
        }
    }
    if bad_operand {
        builder.error("X9002", &format!("reference to nonexistent register in {}", instr.head()));
    }

    // Reads and writes over the original operand indices.
    let (reads, writes) = classify(instr);
    for reg in reads {
        if let Some(uniq) = files.lookup(reg) {
            access
                .reads
                .push(uniq + kind_offset_placeholder(reg.kind));
        }
    }
    for reg in writes {
        if let Some(uniq) = files.lookup(reg) {
            access
                .writes
                .push(uniq + kind_offset_placeholder(reg.kind));
        }
    }

    match instr {
        Instr::Push { kind, count } => {
            if *kind == RegKind::Var {
                builder.error("X9001", "variable registers cannot be pushed");
            } else {
                let file = &mut files.live[kind.ordinal()];
                let fresh = &mut files.fresh[kind.ordinal()];
                for _ in 0..*count {
                    file.push(*fresh);
                    *fresh += 1;
                }
            }
        }
        Instr::Pop { kind, count } => {
            if *kind == RegKind::Var {
                builder.error("X9001", "variable registers cannot be popped");
            } else {
                let file = &mut files.live[kind.ordinal()];
                if (*count as usize) > file.len() {
                    builder.error("X9001", &format!("pop of {count} beyond {} stack", kind));
                    file.clear();
                } else {
                    let keep = file.len() - *count as usize;
                    for dead in file.drain(keep..) {
                        access
                            .destroys
                            .push(dead + kind_offset_placeholder(*kind));
                    }
                }
            }
        }
        Instr::InvokeSs { base, count, .. } => {
            range_access(files, RegKind::Data, *base, *count, false, &mut access, builder, instr);
        }
        Instr::InvokeSd { base, count, .. } | Instr::InvokeDd { base, count, .. } => {
            range_access(files, RegKind::Parm, *base, *count, true, &mut access, builder, instr);
        }
        _ => {}
    }

    (renamed, access)
}

/// Kind-local ids are biased by kind so they stay distinct until the real
/// offsets are known; the bias is removed during flattening.
const KIND_BIAS: u32 = 1 << 24;

fn kind_offset_placeholder(kind: RegKind) -> u32 {
    u32::try_from(kind.ordinal()).unwrap_or(0) * KIND_BIAS
}

#[expect(clippy::too_many_arguments, reason = "internal helper of the simulation walk")]
fn range_access(
    files: &RegFiles,
    kind: RegKind,
    base: u32,
    count: u32,
    destroy: bool,
    access: &mut InstrAccess,
    builder: &mut FunBuilder<'_>,
    instr: &Instr,
) {
    let file = &files.live[kind.ordinal()];
    if (base as usize) + (count as usize) > file.len() {
        builder.error(
            "X9002",
            &format!("{} argument range exceeds live {kind} registers", instr.head()),
        );
        return;
    }
    for offset in 0..count {
        let uniq = file[(base + offset) as usize] + kind_offset_placeholder(kind);
        access.reads.push(uniq);
        if destroy {
            access.destroys.push(uniq);
        }
    }
}

/// Splits an instruction's explicit register operands into reads and
/// writes. Invoke argument ranges are handled separately.
fn classify(instr: &Instr) -> (SmallVec<[Register; 4]>, SmallVec<[Register; 2]>) {
    let mut reads: SmallVec<[Register; 4]> = SmallVec::new();
    let mut writes: SmallVec<[Register; 2]> = SmallVec::new();
    match instr {
        Instr::SrcPos(_)
        | Instr::Push { .. }
        | Instr::Pop { .. }
        | Instr::Label { .. }
        | Instr::Goto { .. }
        | Instr::Try { .. }
        | Instr::Yrt
        | Instr::Rethrow => {}
        Instr::LdImmVd { dst, .. } | Instr::LdImmI { dst, .. } | Instr::LdGlob { dst, .. } => {
            writes.push(*dst);
        }
        Instr::SetGlob { src, .. } => reads.push(*src),
        Instr::LdRegS { dst, src }
        | Instr::LdRegD { dst, src }
        | Instr::LdRegU { dst, src }
        | Instr::LdParm { dst, src, .. } => {
            reads.push(*src);
            writes.push(*dst);
        }
        Instr::Branch { key, .. } => reads.push(*key),
        Instr::Ret { value } => reads.push(*value),
        Instr::InvokeSs { dst, .. } | Instr::InvokeSd { dst, .. } => writes.push(*dst),
        Instr::InvokeDd { dst, fun, .. } => {
            reads.push(*fun);
            writes.push(*dst);
        }
        Instr::SNewS { dst, .. } => writes.push(*dst),
        Instr::SNewSt { dst, length, .. } => {
            reads.push(*length);
            writes.push(*dst);
        }
        Instr::SCpy { dst, src, .. } => {
            reads.push(*dst);
            reads.push(*src);
        }
        Instr::SCpyT { dst, src, length, .. } => {
            reads.push(*dst);
            reads.push(*src);
            reads.push(*length);
        }
        Instr::SILd { dst, src, .. }
        | Instr::SIaLd { dst, src, .. }
        | Instr::SPLd { dst, src, .. }
        | Instr::SPaLd { dst, src, .. }
        | Instr::SRLd { dst, src, .. }
        | Instr::SVLd { dst, src, .. }
        | Instr::SHiLd { dst, src, .. }
        | Instr::SHyIntp { dst, src, .. }
        | Instr::SGfp { dst, src, .. } => {
            reads.push(*src);
            writes.push(*dst);
        }
        Instr::SISt { dst, src, .. }
        | Instr::SIaSt { dst, src, .. }
        | Instr::SPSt { dst, src, .. }
        | Instr::SPaSt { dst, src, .. }
        | Instr::SRSt { dst, src, .. }
        | Instr::SVSt { dst, src, .. }
        | Instr::SHiSt { dst, src, .. } => {
            reads.push(*dst);
            reads.push(*src);
        }
        Instr::SIaCas {
            success,
            actual,
            target,
            expected,
            replacement,
            ..
        }
        | Instr::SPaCas {
            success,
            actual,
            target,
            expected,
            replacement,
            ..
        } => {
            reads.push(*target);
            reads.push(*expected);
            reads.push(*replacement);
            writes.push(*success);
            writes.push(*actual);
        }
        Instr::SIaRmw { dst, target, src, .. } | Instr::SPaXch { dst, target, src, .. } => {
            reads.push(*target);
            reads.push(*src);
            writes.push(*dst);
        }
        Instr::SGap { dst, src, index, .. } => {
            reads.push(*src);
            reads.push(*index);
            writes.push(*dst);
        }
    }
    (reads, writes)
}

/// One open exception region during the consistency walk.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Region {
    landing_pad: usize,
    caught: bool,
}

/// Walks the CFG propagating the open-region stack, enforcing the
/// X9013..X9016 rules, and collecting for each landing pad the blocks
/// whose entry state constrains it (throwing blocks inside its region).
fn check_exception_regions(
    blocks: &[BlockDraft],
    block_of_label: &AHashMap<i64, usize>,
    builder: &mut FunBuilder<'_>,
) -> Vec<Vec<usize>> {
    let mut exc_sources: Vec<Vec<usize>> = vec![Vec::new(); blocks.len()];
    if blocks.is_empty() {
        return exc_sources;
    }

    let mut states: Vec<Option<Vec<Region>>> = vec![None; blocks.len()];
    let mut lp_owner: AHashMap<usize, (usize, usize)> = AHashMap::new();
    let mut conflict_reported = false;
    let mut queue: VecDeque<(usize, Vec<Region>)> = VecDeque::new();
    queue.push_back((0, Vec::new()));

    while let Some((block_ix, entry_state)) = queue.pop_front() {
        match &states[block_ix] {
            Some(existing) => {
                if *existing != entry_state && !conflict_reported {
                    builder.location = blocks[block_ix].location.clone();
                    builder.error(
                        "X9013",
                        "block reached with inconsistent exception-region state",
                    );
                    conflict_reported = true;
                }
                continue;
            }
            None => states[block_ix] = Some(entry_state.clone()),
        }

        // A throwing block inside an active region constrains that
        // region's landing pad.
        if blocks[block_ix].instrs.first().is_some_and(Instr::can_throw)
            && let Some(active) = entry_state.iter().rev().find(|r| !r.caught)
        {
            exc_sources[active.landing_pad].push(block_ix);
        }

        let mut state = entry_state;
        let mut terminated = false;
        for (iix, instr) in blocks[block_ix].instrs.iter().enumerate() {
            builder.location = blocks[block_ix].access[iix].location.clone();
            match instr {
                Instr::Try { landing_pad, .. } => {
                    let Some(&lp_block) = block_of_label.get(landing_pad) else {
                        continue; // X9003 already reported
                    };
                    match lp_owner.entry(lp_block) {
                        Entry::Occupied(owner) => {
                            if *owner.get() != (block_ix, iix) && !conflict_reported {
                                builder.error(
                                    "X9013",
                                    "two exception regions share one landing pad",
                                );
                                conflict_reported = true;
                            }
                        }
                        Entry::Vacant(slot) => {
                            slot.insert((block_ix, iix));
                        }
                    }
                    state.push(Region {
                        landing_pad: lp_block,
                        caught: false,
                    });
                    let mut lp_state = state.clone();
                    lp_state.last_mut().expect("just pushed").caught = true;
                    queue.push_back((lp_block, lp_state));
                }
                Instr::Yrt => {
                    if state.pop().is_none() {
                        builder.error("X9014", "yrt with no open exception region");
                    }
                }
                Instr::Rethrow => {
                    if !state.last().is_some_and(|r| r.caught) {
                        builder.error("X9016", "rethrow outside a caught exception region");
                    }
                    terminated = true;
                }
                Instr::Ret { .. } => {
                    if !state.is_empty() {
                        builder.error("X9015", "ret with an exception region still open");
                    }
                    terminated = true;
                }
                _ => {}
            }
        }

        let ends_without_jump = blocks[block_ix]
            .instrs
            .last()
            .is_none_or(|instr| !instr.is_terminator());
        if !terminated && ends_without_jump && blocks[block_ix].next[0] == -1 && !state.is_empty() {
            builder.location = blocks[block_ix].location.clone();
            builder.error("X9015", "function ends with an exception region still open");
        }

        for &succ in &blocks[block_ix].next {
            if succ >= 0 {
                queue.push_back((usize::try_from(succ).expect("checked non-negative"), state.clone()));
            }
        }
    }

    exc_sources
}

/// Builds the final blocks with their phi bitsets and runs the fixed point.
fn finish_blocks(
    drafts: Vec<BlockDraft>,
    reg_type_off: &[u32; NUM_REG_KINDS + 1],
    total_regs: usize,
    phi_length: usize,
    num_args: usize,
    exc_sources: &[Vec<usize>],
) -> Vec<XcodeBlock> {
    let _ = phi_length;
    let deflatten = |biased: u32| -> u32 {
        let kind = (biased / KIND_BIAS) as usize;
        (biased % KIND_BIAS) + reg_type_off[kind]
    };

    let live_bits = |live: &[Vec<u32>; NUM_REG_KINDS]| -> PhiBits {
        let mut bits = PhiBits::zeros(total_regs);
        for kind in RegKind::ALL {
            for &id in &live[kind.ordinal()] {
                bits.set(id + reg_type_off[kind.ordinal()], true);
            }
        }
        bits
    };

    let num_blocks = drafts.len();
    let mut blocks: Vec<XcodeBlock> = drafts
        .into_iter()
        .enumerate()
        .map(|(ix, mut draft)| {
            let mut effect = PhiBits::zeros(total_regs);
            let mut oinit_local = PhiBits::zeros(total_regs);
            let iexist = live_bits(&draft.entry_live);
            let oexist = live_bits(&draft.exit_live);

            for access in &mut draft.access {
                for id in &mut access.reads {
                    *id = deflatten(*id);
                }
                for id in &mut access.writes {
                    *id = deflatten(*id);
                }
                for id in &mut access.destroys {
                    *id = deflatten(*id);
                }
            }

            for access in &draft.access {
                for &id in &access.writes {
                    effect.set(id, true);
                    oinit_local.set(id, true);
                }
                for &id in &access.destroys {
                    effect.set(id, true);
                    oinit_local.set(id, false);
                }
            }
            // Registers created or destroyed across the block's span are
            // affected: their prior state must not flow through.
            let mut created = oexist.clone();
            for (word, iword) in created.words.iter_mut().zip(&iexist.words) {
                *word &= !*iword;
            }
            effect.or_with(&created);
            let mut popped = iexist.clone();
            for (word, oword) in popped.words.iter_mut().zip(&oexist.words) {
                *word &= !*oword;
            }
            effect.or_with(&popped);

            let iinit = if ix == 0 {
                let mut seed = PhiBits::zeros(total_regs);
                for arg in 0..num_args {
                    seed.set(u32::try_from(arg).unwrap_or(0), true);
                }
                seed
            } else {
                PhiBits::ones(total_regs)
            };
            let oinit = {
                let mut o = iinit.clone();
                o.merge_effect(&effect, &oinit_local);
                o
            };

            XcodeBlock {
                instrs: draft.instrs,
                next: draft.next,
                phi_iinit: iinit,
                phi_oinit: oinit,
                phi_effect: effect,
                phi_iexist: iexist,
                phi_oexist: oexist,
                access: draft.access,
                oinit_local,
                location: draft.location,
            }
        })
        .collect();

    // Predecessor lists over the successor graph.
    let mut preds: Vec<Vec<usize>> = vec![Vec::new(); num_blocks];
    for (ix, block) in blocks.iter().enumerate() {
        for &succ in &block.next {
            if succ >= 0 && (succ as usize) < num_blocks {
                preds[succ as usize].push(ix);
            }
        }
    }

    // Fixed point: iinit is the AND of predecessor oinit (and, for landing
    // pads, of the entry state of each throwing block in the region);
    // existence propagates with OR.
    let entry_seed = blocks.first().map(|b| b.phi_iinit.clone());
    let mut changed = true;
    while changed {
        changed = false;
        for ix in 0..num_blocks {
            let mut iinit = if ix == 0 {
                entry_seed.clone().expect("non-empty block list")
            } else {
                PhiBits::ones(total_regs)
            };
            for &p in &preds[ix] {
                iinit.and_with(&blocks[p].phi_oinit);
            }
            for &s in &exc_sources[ix] {
                iinit.and_with(&blocks[s].phi_iinit);
            }

            let mut iexist = blocks[ix].phi_iexist.clone();
            for &p in &preds[ix] {
                iexist.or_with(&blocks[p].phi_oexist);
            }

            let mut oinit = iinit.clone();
            oinit.merge_effect(&blocks[ix].phi_effect, &blocks[ix].oinit_local);

            let block = &mut blocks[ix];
            if iinit != block.phi_iinit || oinit != block.phi_oinit || iexist != block.phi_iexist {
                block.phi_iinit = iinit;
                block.phi_oinit = oinit;
                block.phi_iexist = iexist;
                changed = true;
            }
        }
    }

    blocks
}

/// Verifies every read against the converged `phi_iinit`, tracking writes
/// and destructions through the block.
fn check_definite_assignment(blocks: &mut [XcodeBlock], builder: &mut FunBuilder<'_>) {
    let var_limit = builder.fun.vars.len() as u32;
    for block in blocks.iter() {
        let mut cur = block.phi_iinit.clone();
        for access in &block.access {
            for &read in &access.reads {
                if !cur.get(read) {
                    builder.location = access.location.clone();
                    if read < var_limit {
                        builder.error(
                            "X9005",
                            &format!("variable {read} used before initialisation"),
                        );
                    } else {
                        builder.error(
                            "X9004",
                            &format!("register {read} used before initialisation"),
                        );
                    }
                }
            }
            for &write in &access.writes {
                cur.set(write, true);
            }
            for &dead in &access.destroys {
                cur.set(dead, false);
            }
        }
    }
}

/// Object-level checks: every global reference must be in range and point
/// at a record of the required kind; struct field references must be in
/// range and match the operation.
fn check_global_refs(
    pcode: &PcodeObject,
    errors: &mut ErrorList,
    sources: &IndexMap<String, Arc<str>>,
) {
    let mut location = Location::unknown();

    for global in &pcode.globals {
        if let Global::SrcPos(pos) = global {
            location = location_of(pos, sources);
        }

        match global {
            Global::Init { fun } => match target_of(pcode, *fun) {
                None => errors.error(
                    format!("X9007: init reference {fun} out of range"),
                    location.clone(),
                ),
                Some(Global::Fun(f)) => {
                    if f.prototype.num_args() != 1 {
                        errors.error(
                            "X9008: init function must take exactly one argument".to_owned(),
                            location.clone(),
                        );
                    }
                }
                Some(_) => errors.error(
                    format!("X9008: init reference {fun} is not a function definition"),
                    location.clone(),
                ),
            },
            Global::Export { global: target, .. } => match target_of(pcode, *target) {
                None => errors.error(
                    format!("X9007: export reference {target} out of range"),
                    location.clone(),
                ),
                Some(entity) if !entity.is_exportable_entity() => errors.error(
                    format!("X9008: export reference {target} is not an exportable entity"),
                    location.clone(),
                ),
                Some(_) => {}
            },
            Global::Fun(fun) => {
                let mut inner = location.clone();
                for instr in &fun.body {
                    if let Instr::SrcPos(pos) = instr {
                        inner = location_of(pos, sources);
                    }
                    check_instr_refs(instr, pcode, errors, &inner);
                }
            }
            _ => {}
        }
    }
}

fn target_of(pcode: &PcodeObject, reference: i64) -> Option<&Global> {
    usize::try_from(reference)
        .ok()
        .and_then(|ix| pcode.globals.get(ix))
}

/// What a struct operation demands of the field it names.
#[derive(Debug, Clone, Copy)]
enum FieldNeed {
    AnyInt,
    AtomicInt,
    Real,
    Value,
    PtrOrHybrid,
    AtomicPtr,
    Hybrid,
    Composite,
    Repeated,
}

impl FieldNeed {
    fn admits(self, kind: &FieldKind) -> bool {
        match self {
            Self::AnyInt => matches!(kind, FieldKind::Int { .. }),
            Self::AtomicInt => matches!(kind, FieldKind::Int { atomic: true, .. }),
            Self::Real => matches!(kind, FieldKind::Real { .. }),
            Self::Value => matches!(kind, FieldKind::Value),
            Self::PtrOrHybrid => matches!(kind, FieldKind::Ptr { .. } | FieldKind::Hybrid { .. }),
            Self::AtomicPtr => matches!(kind, FieldKind::Ptr { atomic: true, .. }),
            Self::Hybrid => matches!(kind, FieldKind::Hybrid { .. }),
            Self::Composite => kind.is_composite(),
            Self::Repeated => matches!(kind, FieldKind::Array { .. } | FieldKind::Tail { .. }),
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::AnyInt => "an integer field",
            Self::AtomicInt => "an atomic integer field",
            Self::Real => "a real field",
            Self::Value => "a value field",
            Self::PtrOrHybrid => "a pointer or hybrid field",
            Self::AtomicPtr => "an atomic pointer field",
            Self::Hybrid => "a hybrid field",
            Self::Composite => "a composite field",
            Self::Repeated => "an array or tail field",
        }
    }
}

/// The struct-operation shape of an instruction: its struct reference,
/// optional field demand, and whether the struct must end in a tail.
fn struct_demand(instr: &Instr) -> Option<(i64, Option<(i64, FieldNeed)>, bool)> {
    match instr {
        Instr::SNewS { sxt, .. } | Instr::SCpy { sxt, .. } => Some((*sxt, None, false)),
        Instr::SNewSt { sxt, .. } | Instr::SCpyT { sxt, .. } => Some((*sxt, None, true)),
        Instr::SILd { sxt, field, .. } | Instr::SISt { sxt, field, .. } => {
            Some((*sxt, Some((*field, FieldNeed::AnyInt)), false))
        }
        Instr::SIaLd { sxt, field, .. }
        | Instr::SIaSt { sxt, field, .. }
        | Instr::SIaCas { sxt, field, .. }
        | Instr::SIaRmw { sxt, field, .. } => {
            Some((*sxt, Some((*field, FieldNeed::AtomicInt)), false))
        }
        Instr::SRLd { sxt, field, .. } | Instr::SRSt { sxt, field, .. } => {
            Some((*sxt, Some((*field, FieldNeed::Real)), false))
        }
        Instr::SVLd { sxt, field, .. } | Instr::SVSt { sxt, field, .. } => {
            Some((*sxt, Some((*field, FieldNeed::Value)), false))
        }
        Instr::SPLd { sxt, field, .. } | Instr::SPSt { sxt, field, .. } => {
            Some((*sxt, Some((*field, FieldNeed::PtrOrHybrid)), false))
        }
        Instr::SPaLd { sxt, field, .. }
        | Instr::SPaSt { sxt, field, .. }
        | Instr::SPaCas { sxt, field, .. }
        | Instr::SPaXch { sxt, field, .. } => {
            Some((*sxt, Some((*field, FieldNeed::AtomicPtr)), false))
        }
        Instr::SHiLd { sxt, field, .. }
        | Instr::SHiSt { sxt, field, .. }
        | Instr::SHyIntp { sxt, field, .. } => {
            Some((*sxt, Some((*field, FieldNeed::Hybrid)), false))
        }
        Instr::SGfp { sxt, field, .. } => Some((*sxt, Some((*field, FieldNeed::Composite)), false)),
        Instr::SGap { sxt, field, .. } => Some((*sxt, Some((*field, FieldNeed::Repeated)), false)),
        _ => None,
    }
}

fn check_instr_refs(
    instr: &Instr,
    pcode: &PcodeObject,
    errors: &mut ErrorList,
    location: &Location,
) {
    let head = instr.head();

    match instr {
        Instr::LdGlob { global, .. } => match target_of(pcode, *global) {
            None => errors.error(
                format!("X9007: {head} reference {global} out of range"),
                location.clone(),
            ),
            Some(Global::Var { .. } | Global::ExtVar { .. }) => {}
            Some(_) => errors.error(
                format!("X9008: {head} reference {global} is not a variable"),
                location.clone(),
            ),
        },
        Instr::SetGlob { global, .. } => match target_of(pcode, *global) {
            None => errors.error(
                format!("X9007: {head} reference {global} out of range"),
                location.clone(),
            ),
            Some(Global::Var { .. }) => {}
            Some(_) => errors.error(
                format!("X9008: {head} reference {global} is not a mutable variable"),
                location.clone(),
            ),
        },
        Instr::InvokeSs { fun, count, .. } => match target_of(pcode, *fun) {
            None => errors.error(
                format!("X9007: {head} reference {fun} out of range"),
                location.clone(),
            ),
            Some(Global::Fun(target)) => {
                if target.prototype.num_args() != *count as usize {
                    errors.error(
                        format!(
                            "X9009: {head} passes {count} arguments to a function of {}",
                            target.prototype.num_args()
                        ),
                        location.clone(),
                    );
                }
            }
            Some(Global::ExtFun { prototype, .. }) => {
                if prototype.num_args() != *count as usize {
                    errors.error(
                        format!(
                            "X9009: {head} passes {count} arguments to a function of {}",
                            prototype.num_args()
                        ),
                        location.clone(),
                    );
                }
            }
            Some(_) => errors.error(
                format!("X9008: {head} reference {fun} is not a function"),
                location.clone(),
            ),
        },
        Instr::InvokeSd { fun, .. } => match target_of(pcode, *fun) {
            None => errors.error(
                format!("X9007: {head} reference {fun} out of range"),
                location.clone(),
            ),
            Some(Global::Fun(_) | Global::ExtFun { .. }) => {}
            Some(_) => errors.error(
                format!("X9008: {head} reference {fun} is not a function"),
                location.clone(),
            ),
        },
        _ => {}
    }

    if let Some((sxt, field_demand, needs_tail)) = struct_demand(instr) {
        let def: &StructDef = match target_of(pcode, sxt) {
            None => {
                errors.error(
                    format!("X9007: {head} struct reference {sxt} out of range"),
                    location.clone(),
                );
                return;
            }
            Some(Global::DeclSxt { def, .. }) => def,
            Some(_) => {
                errors.error(
                    format!("X9008: {head} reference {sxt} is not a struct declaration"),
                    location.clone(),
                );
                return;
            }
        };

        if needs_tail && !def.has_tail() {
            errors.error(
                format!("X9008: {head} requires a struct whose final field is a tail"),
                location.clone(),
            );
        }

        if let Some((field, need)) = field_demand {
            let Some(field_def) = usize::try_from(field).ok().and_then(|ix| def.fields.get(ix))
            else {
                errors.error(
                    format!("X9017: field reference {field} outside struct {}", def.name),
                    location.clone(),
                );
                return;
            };
            if !need.admits(&field_def.kind) {
                errors.error(
                    format!(
                        "X9018: {head} requires {} but field {} of {} is not one",
                        need.description(),
                        field_def.name,
                        def.name
                    ),
                    location.clone(),
                );
            }
        }
    }
}
