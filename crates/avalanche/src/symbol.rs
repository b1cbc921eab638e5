//! Symbols: the entities the symbol table binds names to.

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

use crate::diag::Location;
use crate::macsub::MacroExpander;
use crate::pcode::{Prototype, StructDef};

/// Visibility of a global symbol, controlling export emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Private,
    Internal,
    Public,
}

/// Payload of a macro symbol.
#[derive(Clone)]
pub struct MacroData {
    /// Lower values bind earlier within a statement.
    pub precedence: u32,
    pub expander: MacroExpander,
}

impl fmt::Debug for MacroData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacroData")
            .field("precedence", &self.precedence)
            .finish_non_exhaustive()
    }
}

/// What a symbol denotes; the payload is keyed by the variant.
#[derive(Debug, Clone)]
pub enum SymbolKind {
    GlobalVariable { mutable: bool },
    GlobalFunction { prototype: Prototype },
    LocalVariable,
    LocalFunction { prototype: Prototype },
    Struct(Arc<StructDef>),
    ExpanderMacro(MacroData),
    ControlMacro(MacroData),
    OperatorMacro(MacroData),
    FunctionMacro(MacroData),
    Other(&'static str),
}

impl SymbolKind {
    /// Human name of the symbol's type, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::GlobalVariable { .. } => "global variable",
            Self::GlobalFunction { .. } => "global function",
            Self::LocalVariable => "local variable",
            Self::LocalFunction { .. } => "local function",
            Self::Struct(_) => "struct",
            Self::ExpanderMacro(_) => "expander macro",
            Self::ControlMacro(_) => "control macro",
            Self::OperatorMacro(_) => "operator macro",
            Self::FunctionMacro(_) => "function macro",
            Self::Other(name) => name,
        }
    }

    #[must_use]
    pub fn macro_data(&self) -> Option<&MacroData> {
        match self {
            Self::ExpanderMacro(data)
            | Self::ControlMacro(data)
            | Self::OperatorMacro(data)
            | Self::FunctionMacro(data) => Some(data),
            _ => None,
        }
    }
}

/// A named entity known to the compiler.
///
/// Symbols live for the duration of one compilation context and are shared
/// by reference; the P-Code index is filled in when the defining global is
/// emitted.
#[derive(Debug)]
pub struct Symbol {
    pub full_name: String,
    /// Nesting level at definition; zero for globals.
    pub level: u32,
    pub visibility: Visibility,
    /// Where the definition was written, for diagnostics.
    pub definition: Location,
    /// Index of the defining record in the output P-Code object.
    pub pcode_index: Cell<Option<usize>>,
    pub kind: SymbolKind,
}

impl Symbol {
    #[must_use]
    pub fn new(
        full_name: impl Into<String>,
        level: u32,
        visibility: Visibility,
        definition: Location,
        kind: SymbolKind,
    ) -> Arc<Self> {
        Arc::new(Self {
            full_name: full_name.into(),
            level,
            visibility,
            definition,
            pcode_index: Cell::new(None),
            kind,
        })
    }
}
