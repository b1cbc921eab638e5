//! The P-Code model: global records, the register-stack instruction set,
//! struct definitions, and the reflective access the validator and linker
//! are built on.
//!
//! A P-Code object is a flat list of global records. Executable code lives
//! only inside `fun` records, as a list of instructions over typed register
//! stacks. Records and instructions reference other globals by index into
//! the enclosing object; every instruction exposes its global references,
//! register operands and label targets uniformly so that passes can iterate
//! opaquely.

pub mod text;

use std::fmt;
use std::sync::Arc;

use smallvec::{SmallVec, smallvec};
use strum::{Display, EnumString, IntoStaticStr};

use crate::exception::{self, ExceptionKind};
use crate::mangle::Demangled;

/// The register kinds, in uniquification order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegKind {
    Var,
    Data,
    Int,
    List,
    Parm,
    Function,
}

/// Number of register kinds.
pub const NUM_REG_KINDS: usize = 6;

impl RegKind {
    pub const ALL: [Self; NUM_REG_KINDS] = [
        Self::Var,
        Self::Data,
        Self::Int,
        Self::List,
        Self::Parm,
        Self::Function,
    ];

    /// The single-letter notation used in the textual format.
    #[must_use]
    pub fn letter(self) -> char {
        match self {
            Self::Var => 'v',
            Self::Data => 'd',
            Self::Int => 'i',
            Self::List => 'l',
            Self::Parm => 'p',
            Self::Function => 'f',
        }
    }

    #[must_use]
    pub fn from_letter(c: char) -> Option<Self> {
        match c {
            'v' => Some(Self::Var),
            'd' => Some(Self::Data),
            'i' => Some(Self::Int),
            'l' => Some(Self::List),
            'p' => Some(Self::Parm),
            'f' => Some(Self::Function),
            _ => None,
        }
    }

    #[must_use]
    pub fn ordinal(self) -> usize {
        match self {
            Self::Var => 0,
            Self::Data => 1,
            Self::Int => 2,
            Self::List => 3,
            Self::Parm => 4,
            Self::Function => 5,
        }
    }
}

impl fmt::Display for RegKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// A fully identified register: kind plus index within that kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register {
    pub kind: RegKind,
    pub index: u32,
}

impl Register {
    #[must_use]
    pub fn new(kind: RegKind, index: u32) -> Self {
        Self { kind, index }
    }

    /// Parses the `d0` notation.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut chars = text.chars();
        let kind = RegKind::from_letter(chars.next()?)?;
        let index: u32 = chars.as_str().parse().ok()?;
        Some(Self { kind, index })
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.letter(), self.index)
    }
}

/// Memory orders for atomic struct operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum MemoryOrder {
    Unordered,
    Monotonic,
    Acquire,
    Release,
    Acqrel,
    Seqcst,
}

impl MemoryOrder {
    /// Parses a memory-order string, interrupting the caller on failure.
    ///
    /// This is the reflective helper backed by the exception layer; callers
    /// that can recover wrap the call in [`crate::exception::catch`].
    #[must_use]
    pub fn parse_reflective(text: &str) -> Self {
        text.parse().unwrap_or_else(|_| {
            exception::throw_str(ExceptionKind::Format, format!("bad memory order: {text}"))
        })
    }
}

/// Read-modify-write operations for `S-ia-rmw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum RmwOp {
    Xchg,
    Add,
    Sub,
    And,
    Nand,
    Or,
    Xor,
    Smax,
    Smin,
    Umax,
    Umin,
}

/// A function-binding prototype: calling convention plus one argument
/// specifier per argument.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Prototype {
    pub calling_convention: String,
    pub args: Vec<String>,
}

impl Prototype {
    #[must_use]
    pub fn num_args(&self) -> usize {
        self.args.len()
    }
}

impl fmt::Display for Prototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.calling_convention)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Struct (extended-type) definitions, as declared by `decl-sxt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDef {
    pub is_union: bool,
    pub name: String,
    pub fields: Vec<StructField>,
}

impl StructDef {
    /// Whether the final field is a tail, which `S-new-st` and friends
    /// require.
    #[must_use]
    pub fn has_tail(&self) -> bool {
        matches!(
            self.fields.last().map(|f| &f.kind),
            Some(FieldKind::Tail { .. })
        )
    }
}

impl fmt::Display for StructDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&text::emit_node(&text::struct_def_node(self)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructField {
    pub name: String,
    pub kind: FieldKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// A full dynamic value.
    Value,
    Int {
        size: String,
        signed: bool,
        atomic: bool,
        alignment: i64,
        byte_order: String,
    },
    Real {
        size: String,
    },
    Ptr {
        prot: String,
        atomic: bool,
    },
    Hybrid {
        prot: String,
    },
    Compose {
        def: Arc<StructDef>,
    },
    Array {
        def: Arc<StructDef>,
        count: i64,
    },
    Tail {
        def: Arc<StructDef>,
    },
}

impl FieldKind {
    #[must_use]
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Compose { .. } | Self::Array { .. } | Self::Tail { .. })
    }
}

/// A source location record; `filename` refers into the compilation
/// environment's source map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrcPos {
    pub filename: String,
    pub line_offset: i64,
    pub start_line: i64,
    pub end_line: i64,
    pub start_column: i64,
    pub end_column: i64,
}

/// A function definition: prototype, variable names, and body.
///
/// The first `prototype.num_args()` variables bind the arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunGlobal {
    pub publish: bool,
    pub name: Demangled,
    pub prototype: Prototype,
    pub vars: Vec<String>,
    pub body: Vec<Instr>,
}

/// A global record of a P-Code object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Global {
    SrcPos(SrcPos),
    Init {
        fun: i64,
    },
    Macro {
        publish: bool,
        name: String,
        precedence: i64,
        macro_type: i64,
        definition: crate::value::Value,
    },
    Export {
        global: i64,
        reexport: bool,
        name: String,
    },
    LoadPkg {
        name: String,
    },
    LoadMod {
        name: String,
    },
    Fun(Box<FunGlobal>),
    Var {
        publish: bool,
        name: Demangled,
    },
    ExtFun {
        name: Demangled,
        prototype: Prototype,
    },
    ExtVar {
        name: Demangled,
    },
    DeclSxt {
        publish: bool,
        def: Arc<StructDef>,
    },
}

impl Global {
    /// The record's head keyword in the textual format.
    #[must_use]
    pub fn head(&self) -> &'static str {
        match self {
            Self::SrcPos(_) => "src-pos",
            Self::Init { .. } => "init",
            Self::Macro { .. } => "macro",
            Self::Export { .. } => "export",
            Self::LoadPkg { .. } => "load-pkg",
            Self::LoadMod { .. } => "load-mod",
            Self::Fun(_) => "fun",
            Self::Var { .. } => "var",
            Self::ExtFun { .. } => "ext-fun",
            Self::ExtVar { .. } => "ext-var",
            Self::DeclSxt { .. } => "decl-sxt",
        }
    }

    /// Mutable views of this record's own global-entity references. Does
    /// not descend into function bodies.
    pub fn global_refs_mut(&mut self) -> SmallVec<[&mut i64; 1]> {
        match self {
            Self::Init { fun } => smallvec![fun],
            Self::Export { global, .. } => smallvec![global],
            _ => SmallVec::new(),
        }
    }

    /// This record's own global-entity references.
    #[must_use]
    pub fn global_refs(&self) -> SmallVec<[i64; 1]> {
        match self {
            Self::Init { fun } => smallvec![*fun],
            Self::Export { global, .. } => smallvec![*global],
            _ => SmallVec::new(),
        }
    }

    /// The linkage name, for records that have one.
    #[must_use]
    pub fn linkage_name(&self) -> Option<LinkageName> {
        match self {
            Self::Fun(fun) => Some(LinkageName::Entity(fun.name.clone())),
            Self::Var { name, .. } | Self::ExtFun { name, .. } | Self::ExtVar { name } => {
                Some(LinkageName::Entity(name.clone()))
            }
            Self::DeclSxt { def, .. } => {
                Some(LinkageName::Entity(Demangled::ava(def.name.clone())))
            }
            Self::Export { name, .. } => Some(LinkageName::Export(name.clone())),
            _ => None,
        }
    }

    /// Whether this record *defines* (rather than declares) its entity.
    #[must_use]
    pub fn is_linkage_definition(&self) -> bool {
        matches!(self, Self::Fun(_) | Self::Var { .. } | Self::DeclSxt { .. })
    }

    /// The publish flag, for records that carry one.
    #[must_use]
    pub fn publish_flag(&self) -> Option<bool> {
        match self {
            Self::Fun(fun) => Some(fun.publish),
            Self::Var { publish, .. }
            | Self::DeclSxt { publish, .. }
            | Self::Macro { publish, .. } => Some(*publish),
            _ => None,
        }
    }

    /// External declarations are published by their nature.
    #[must_use]
    pub fn is_effectively_published(&self) -> bool {
        matches!(self, Self::ExtFun { .. } | Self::ExtVar { .. })
    }

    /// Whether the record takes part in cross-object linkage: a published
    /// definition, an external declaration, or a re-exported export.
    #[must_use]
    pub fn participates_in_linkage(&self) -> bool {
        if self.is_effectively_published() {
            return true;
        }
        if let Self::Export { reexport, .. } = self {
            return *reexport;
        }
        self.publish_flag().unwrap_or(false)
    }

    /// Whether an `export` record may target this record.
    #[must_use]
    pub fn is_exportable_entity(&self) -> bool {
        matches!(
            self,
            Self::Fun(_)
                | Self::Var { .. }
                | Self::ExtFun { .. }
                | Self::ExtVar { .. }
                | Self::DeclSxt { .. }
                | Self::Macro { .. }
        )
    }
}

/// Key under which a record participates in linkage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LinkageName {
    /// A mangled entity name.
    Entity(Demangled),
    /// An export's source-language name; exports dedupe among themselves.
    Export(String),
}

impl LinkageName {
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Entity(name) => format!("e:{}", name.mangle()),
            Self::Export(name) => format!("x:{name}"),
        }
    }
}

/// One executable instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    SrcPos(SrcPos),
    Push { kind: RegKind, count: u32 },
    Pop { kind: RegKind, count: u32 },
    LdImmVd { dst: Register, value: String },
    LdImmI { dst: Register, value: i64 },
    LdGlob { dst: Register, global: i64 },
    SetGlob { global: i64, src: Register },
    LdRegS { dst: Register, src: Register },
    LdRegD { dst: Register, src: Register },
    LdRegU { dst: Register, src: Register },
    LdParm { dst: Register, src: Register, spread: bool },
    Label { id: i64 },
    Goto { target: i64 },
    Branch { key: Register, value: i64, invert: bool, target: i64 },
    Ret { value: Register },
    InvokeSs { dst: Register, fun: i64, base: u32, count: u32 },
    InvokeSd { dst: Register, fun: i64, base: u32, count: u32 },
    InvokeDd { dst: Register, fun: Register, base: u32, count: u32 },
    Try { cleanup: bool, landing_pad: i64 },
    Yrt,
    Rethrow,

    SNewS { dst: Register, sxt: i64, zero: bool },
    SNewSt { dst: Register, sxt: i64, length: Register, zero: bool },
    SCpy { dst: Register, src: Register, sxt: i64 },
    SCpyT { dst: Register, src: Register, sxt: i64, length: Register },
    SILd { dst: Register, src: Register, sxt: i64, field: i64, volatile_access: bool },
    SISt { dst: Register, sxt: i64, field: i64, src: Register, volatile_access: bool },
    SIaLd { dst: Register, src: Register, sxt: i64, field: i64, volatile_access: bool, order: MemoryOrder },
    SIaSt { dst: Register, sxt: i64, field: i64, src: Register, volatile_access: bool, order: MemoryOrder },
    SIaCas {
        success: Register,
        actual: Register,
        target: Register,
        sxt: i64,
        field: i64,
        expected: Register,
        replacement: Register,
        weak: bool,
        volatile_access: bool,
        success_order: MemoryOrder,
        failure_order: MemoryOrder,
    },
    SIaRmw {
        dst: Register,
        target: Register,
        sxt: i64,
        field: i64,
        op: RmwOp,
        src: Register,
        volatile_access: bool,
        order: MemoryOrder,
    },
    SPLd { dst: Register, src: Register, sxt: i64, field: i64, volatile_access: bool },
    SPSt { dst: Register, sxt: i64, field: i64, src: Register, volatile_access: bool },
    SPaLd { dst: Register, src: Register, sxt: i64, field: i64, volatile_access: bool, order: MemoryOrder },
    SPaSt { dst: Register, sxt: i64, field: i64, src: Register, volatile_access: bool, order: MemoryOrder },
    SPaCas {
        success: Register,
        actual: Register,
        target: Register,
        sxt: i64,
        field: i64,
        expected: Register,
        replacement: Register,
        weak: bool,
        volatile_access: bool,
        success_order: MemoryOrder,
        failure_order: MemoryOrder,
    },
    SPaXch {
        dst: Register,
        target: Register,
        sxt: i64,
        field: i64,
        src: Register,
        volatile_access: bool,
        order: MemoryOrder,
    },
    SRLd { dst: Register, src: Register, sxt: i64, field: i64, volatile_access: bool },
    SRSt { dst: Register, sxt: i64, field: i64, src: Register, volatile_access: bool },
    SVLd { dst: Register, src: Register, sxt: i64, field: i64, volatile_access: bool },
    SVSt { dst: Register, sxt: i64, field: i64, src: Register, volatile_access: bool },
    SHiLd { dst: Register, src: Register, sxt: i64, field: i64, volatile_access: bool },
    SHiSt { dst: Register, sxt: i64, field: i64, src: Register, volatile_access: bool },
    SHyIntp { dst: Register, src: Register, sxt: i64, field: i64, volatile_access: bool },
    SGfp { dst: Register, src: Register, sxt: i64, field: i64 },
    SGap { dst: Register, src: Register, index: Register, sxt: i64, field: i64 },
}

impl Instr {
    /// The instruction's head keyword in the textual format.
    #[must_use]
    pub fn head(&self) -> &'static str {
        match self {
            Self::SrcPos(_) => "src-pos",
            Self::Push { .. } => "push",
            Self::Pop { .. } => "pop",
            Self::LdImmVd { .. } => "ld-imm-vd",
            Self::LdImmI { .. } => "ld-imm-i",
            Self::LdGlob { .. } => "ld-glob",
            Self::SetGlob { .. } => "set-glob",
            Self::LdRegS { .. } => "ld-reg-s",
            Self::LdRegD { .. } => "ld-reg-d",
            Self::LdRegU { .. } => "ld-reg-u",
            Self::LdParm { .. } => "ld-parm",
            Self::Label { .. } => "label",
            Self::Goto { .. } => "goto",
            Self::Branch { .. } => "branch",
            Self::Ret { .. } => "ret",
            Self::InvokeSs { .. } => "invoke-ss",
            Self::InvokeSd { .. } => "invoke-sd",
            Self::InvokeDd { .. } => "invoke-dd",
            Self::Try { .. } => "try",
            Self::Yrt => "yrt",
            Self::Rethrow => "rethrow",
            Self::SNewS { .. } => "S-new-s",
            Self::SNewSt { .. } => "S-new-st",
            Self::SCpy { .. } => "S-cpy",
            Self::SCpyT { .. } => "S-cpy-t",
            Self::SILd { .. } => "S-i-ld",
            Self::SISt { .. } => "S-i-st",
            Self::SIaLd { .. } => "S-ia-ld",
            Self::SIaSt { .. } => "S-ia-st",
            Self::SIaCas { .. } => "S-ia-cas",
            Self::SIaRmw { .. } => "S-ia-rmw",
            Self::SPLd { .. } => "S-p-ld",
            Self::SPSt { .. } => "S-p-st",
            Self::SPaLd { .. } => "S-pa-ld",
            Self::SPaSt { .. } => "S-pa-st",
            Self::SPaCas { .. } => "S-pa-cas",
            Self::SPaXch { .. } => "S-pa-xch",
            Self::SRLd { .. } => "S-r-ld",
            Self::SRSt { .. } => "S-r-st",
            Self::SVLd { .. } => "S-v-ld",
            Self::SVSt { .. } => "S-v-st",
            Self::SHiLd { .. } => "S-hi-ld",
            Self::SHiSt { .. } => "S-hi-st",
            Self::SHyIntp { .. } => "S-hy-intp",
            Self::SGfp { .. } => "S-gfp",
            Self::SGap { .. } => "S-gap",
        }
    }

    /// Mutable views of this instruction's global references.
    pub fn global_refs_mut(&mut self) -> SmallVec<[&mut i64; 1]> {
        match self {
            Self::LdGlob { global, .. } | Self::SetGlob { global, .. } => smallvec![global],
            Self::InvokeSs { fun, .. } | Self::InvokeSd { fun, .. } => smallvec![fun],
            Self::SNewS { sxt, .. }
            | Self::SNewSt { sxt, .. }
            | Self::SCpy { sxt, .. }
            | Self::SCpyT { sxt, .. }
            | Self::SILd { sxt, .. }
            | Self::SISt { sxt, .. }
            | Self::SIaLd { sxt, .. }
            | Self::SIaSt { sxt, .. }
            | Self::SIaCas { sxt, .. }
            | Self::SIaRmw { sxt, .. }
            | Self::SPLd { sxt, .. }
            | Self::SPSt { sxt, .. }
            | Self::SPaLd { sxt, .. }
            | Self::SPaSt { sxt, .. }
            | Self::SPaCas { sxt, .. }
            | Self::SPaXch { sxt, .. }
            | Self::SRLd { sxt, .. }
            | Self::SRSt { sxt, .. }
            | Self::SVLd { sxt, .. }
            | Self::SVSt { sxt, .. }
            | Self::SHiLd { sxt, .. }
            | Self::SHiSt { sxt, .. }
            | Self::SHyIntp { sxt, .. }
            | Self::SGfp { sxt, .. }
            | Self::SGap { sxt, .. } => smallvec![sxt],
            _ => SmallVec::new(),
        }
    }

    /// This instruction's global references.
    #[must_use]
    pub fn global_refs(&self) -> SmallVec<[i64; 1]> {
        match self {
            Self::LdGlob { global, .. } | Self::SetGlob { global, .. } => smallvec![*global],
            Self::InvokeSs { fun, .. } | Self::InvokeSd { fun, .. } => smallvec![*fun],
            Self::SNewS { sxt, .. }
            | Self::SNewSt { sxt, .. }
            | Self::SCpy { sxt, .. }
            | Self::SCpyT { sxt, .. }
            | Self::SILd { sxt, .. }
            | Self::SISt { sxt, .. }
            | Self::SIaLd { sxt, .. }
            | Self::SIaSt { sxt, .. }
            | Self::SIaCas { sxt, .. }
            | Self::SIaRmw { sxt, .. }
            | Self::SPLd { sxt, .. }
            | Self::SPSt { sxt, .. }
            | Self::SPaLd { sxt, .. }
            | Self::SPaSt { sxt, .. }
            | Self::SPaCas { sxt, .. }
            | Self::SPaXch { sxt, .. }
            | Self::SRLd { sxt, .. }
            | Self::SRSt { sxt, .. }
            | Self::SVLd { sxt, .. }
            | Self::SVSt { sxt, .. }
            | Self::SHiLd { sxt, .. }
            | Self::SHiSt { sxt, .. }
            | Self::SHyIntp { sxt, .. }
            | Self::SGfp { sxt, .. }
            | Self::SGap { sxt, .. } => smallvec![*sxt],
            _ => SmallVec::new(),
        }
    }

    /// Mutable views of every explicit register operand.
    pub fn registers_mut(&mut self) -> SmallVec<[&mut Register; 4]> {
        match self {
            Self::SrcPos(_) | Self::Push { .. } | Self::Pop { .. } | Self::Label { .. }
            | Self::Goto { .. } | Self::Try { .. } | Self::Yrt | Self::Rethrow => SmallVec::new(),
            Self::LdImmVd { dst, .. } | Self::LdImmI { dst, .. } | Self::LdGlob { dst, .. } => {
                smallvec![dst]
            }
            Self::SetGlob { src, .. } | Self::Ret { value: src } => smallvec![src],
            Self::LdRegS { dst, src } | Self::LdRegD { dst, src } | Self::LdRegU { dst, src }
            | Self::LdParm { dst, src, .. } => smallvec![dst, src],
            Self::Branch { key, .. } => smallvec![key],
            Self::InvokeSs { dst, .. } | Self::InvokeSd { dst, .. } => smallvec![dst],
            Self::InvokeDd { dst, fun, .. } => smallvec![dst, fun],
            Self::SNewS { dst, .. } => smallvec![dst],
            Self::SNewSt { dst, length, .. } => smallvec![dst, length],
            Self::SCpy { dst, src, .. } => smallvec![dst, src],
            Self::SCpyT { dst, src, length, .. } => smallvec![dst, src, length],
            Self::SILd { dst, src, .. }
            | Self::SIaLd { dst, src, .. }
            | Self::SPLd { dst, src, .. }
            | Self::SPaLd { dst, src, .. }
            | Self::SRLd { dst, src, .. }
            | Self::SVLd { dst, src, .. }
            | Self::SHiLd { dst, src, .. }
            | Self::SHyIntp { dst, src, .. }
            | Self::SGfp { dst, src, .. } => smallvec![dst, src],
            Self::SISt { dst, src, .. }
            | Self::SIaSt { dst, src, .. }
            | Self::SPSt { dst, src, .. }
            | Self::SPaSt { dst, src, .. }
            | Self::SRSt { dst, src, .. }
            | Self::SVSt { dst, src, .. }
            | Self::SHiSt { dst, src, .. } => smallvec![dst, src],
            Self::SIaCas {
                success,
                actual,
                target,
                expected,
                replacement,
                ..
            }
            | Self::SPaCas {
                success,
                actual,
                target,
                expected,
                replacement,
                ..
            } => smallvec![success, actual, target, expected, replacement],
            Self::SIaRmw { dst, target, src, .. } | Self::SPaXch { dst, target, src, .. } => {
                smallvec![dst, target, src]
            }
            Self::SGap { dst, src, index, .. } => smallvec![dst, src, index],
        }
    }

    /// Label targets referenced by this instruction.
    #[must_use]
    pub fn labels(&self) -> SmallVec<[i64; 1]> {
        match self {
            Self::Goto { target } | Self::Branch { target, .. } => smallvec![*target],
            Self::Try { landing_pad, .. } => smallvec![*landing_pad],
            _ => SmallVec::new(),
        }
    }

    /// Whether control cannot continue to the next instruction.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Goto { .. } | Self::Branch { .. } | Self::Ret { .. } | Self::Rethrow
        )
    }

    /// Whether the instruction may raise an exception at run time.
    ///
    /// Conversions out of the dynamic types and function invocations can
    /// throw; pure moves and memory accesses cannot.
    #[must_use]
    pub fn can_throw(&self) -> bool {
        matches!(
            self,
            Self::LdRegD { .. }
                | Self::InvokeSs { .. }
                | Self::InvokeSd { .. }
                | Self::InvokeDd { .. }
                | Self::Rethrow
        )
    }
}

/// A whole P-Code object: the unit of compilation, linking and caching.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PcodeObject {
    pub globals: Vec<Global>,
}

impl PcodeObject {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.globals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }
}
