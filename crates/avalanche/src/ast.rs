//! AST nodes: the interface between macro substitution and code
//! generation.
//!
//! Nodes expose a fixed set of optional operations. The generator calls
//! `cg_evaluate` when it needs the node's value in a particular register,
//! `cg_discard` when the value is ignored, and `cg_define` at most once on
//! nodes that introduce globals. Nodes that cannot satisfy a request report
//! a compile error rather than failing hard, so downstream stages keep
//! running for error collection.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use crate::codegen::CodegenContext;
use crate::diag::{CompileError, Location};
use crate::mangle::Demangled;
use crate::pcode::{Instr, Prototype, RegKind, Register};
use crate::symbol::{Symbol, SymbolKind};
use crate::value::Value;
use crate::varscope::VarScope;

/// Shared handle to an AST node.
pub type AstRef = Rc<dyn AstNode>;

/// The assignable view of a node, for macros with store semantics.
pub trait LValueNode {
    fn cg_store(&self, src: Register, ctx: &mut CodegenContext);
}

/// One AST node.
pub trait AstNode {
    fn location(&self) -> &Location;

    /// Diagnostic rendering.
    fn render(&self) -> String {
        "<node>".to_owned()
    }

    /// Resolution work after the whole tree is built; runs at most once.
    fn postprocess(&self) {}

    /// Emits code leaving the node's value in `dst`.
    fn cg_evaluate(&self, dst: Register, ctx: &mut CodegenContext) {
        let _ = dst;
        ctx.error(CompileError::new(
            format!("{} does not produce a value", self.render()),
            self.location().clone(),
        ));
    }

    /// Emits code for the node's effect, ignoring its value.
    fn cg_discard(&self, ctx: &mut CodegenContext) {
        ctx.error(CompileError::new(
            format!("{} cannot be used as a statement", self.render()),
            self.location().clone(),
        ));
    }

    /// Emits the global-level records for a defining node.
    fn cg_define(&self, ctx: &mut CodegenContext) {
        ctx.error(CompileError::new(
            format!("{} does not define anything", self.render()),
            self.location().clone(),
        ));
    }

    /// Pre-statement setup, for nodes that stage state.
    fn cg_set_up(&self, ctx: &mut CodegenContext) {
        let _ = ctx;
    }

    /// Post-statement teardown, paired with `cg_set_up`.
    fn cg_tear_down(&self, ctx: &mut CodegenContext) {
        let _ = ctx;
    }

    /// The node's value when it is statically known.
    fn get_constexpr(&self) -> Option<Value> {
        None
    }

    /// The assignable view, when the node denotes a location.
    fn as_lvalue(&self) -> Option<&dyn LValueNode> {
        None
    }
}

/// A node standing in for something that already failed; inert everywhere.
pub struct ErrorNode {
    pub location: Location,
}

impl AstNode for ErrorNode {
    fn location(&self) -> &Location {
        &self.location
    }

    fn render(&self) -> String {
        "<error>".to_owned()
    }

    fn cg_evaluate(&self, _dst: Register, _ctx: &mut CodegenContext) {}

    fn cg_discard(&self, _ctx: &mut CodegenContext) {}

    fn cg_define(&self, _ctx: &mut CodegenContext) {}
}

/// The empty expression: evaluates to the empty string, discards to
/// nothing.
pub struct EmptyNode {
    pub location: Location,
}

impl AstNode for EmptyNode {
    fn location(&self) -> &Location {
        &self.location
    }

    fn render(&self) -> String {
        "()".to_owned()
    }

    fn cg_evaluate(&self, dst: Register, ctx: &mut CodegenContext) {
        ctx.set_location(&self.location);
        ctx.emit(Instr::LdImmVd {
            dst,
            value: String::new(),
        });
    }

    fn cg_discard(&self, _ctx: &mut CodegenContext) {}

    fn get_constexpr(&self) -> Option<Value> {
        Some(Value::empty())
    }
}

/// A string (or any statically known) literal.
pub struct LiteralNode {
    pub value: Value,
    pub location: Location,
}

impl AstNode for LiteralNode {
    fn location(&self) -> &Location {
        &self.location
    }

    fn render(&self) -> String {
        self.value.stringify()
    }

    fn cg_evaluate(&self, dst: Register, ctx: &mut CodegenContext) {
        ctx.set_location(&self.location);
        ctx.emit(Instr::LdImmVd {
            dst,
            value: self.value.stringify(),
        });
    }

    fn cg_discard(&self, _ctx: &mut CodegenContext) {
        // Pure; nothing to do.
    }

    fn get_constexpr(&self) -> Option<Value> {
        Some(self.value.clone())
    }
}

/// A sequence of statements; evaluating yields the last statement's value.
pub struct SeqNode {
    pub children: Vec<AstRef>,
    pub location: Location,
    postprocessed: Cell<bool>,
}

impl SeqNode {
    #[must_use]
    pub fn new(children: Vec<AstRef>, location: Location) -> Self {
        Self {
            children,
            location,
            postprocessed: Cell::new(false),
        }
    }
}

impl AstNode for SeqNode {
    fn location(&self) -> &Location {
        &self.location
    }

    fn render(&self) -> String {
        let parts: Vec<String> = self.children.iter().map(|c| c.render()).collect();
        format!("{{{}}}", parts.join("; "))
    }

    fn postprocess(&self) {
        if self.postprocessed.replace(true) {
            return;
        }
        for child in &self.children {
            child.postprocess();
        }
    }

    fn cg_evaluate(&self, dst: Register, ctx: &mut CodegenContext) {
        match self.children.split_last() {
            None => EmptyNode {
                location: self.location.clone(),
            }
            .cg_evaluate(dst, ctx),
            Some((last, init)) => {
                for child in init {
                    child.cg_discard(ctx);
                }
                last.cg_evaluate(dst, ctx);
            }
        }
    }

    fn cg_discard(&self, ctx: &mut CodegenContext) {
        for child in &self.children {
            child.cg_discard(ctx);
        }
    }
}

/// A read of a named variable.
pub struct VarReadNode {
    pub symbol: Arc<Symbol>,
    pub varscope: VarScope,
    pub location: Location,
}

impl VarReadNode {
    fn local_register(&self, ctx: &mut CodegenContext) -> Option<Register> {
        match self.varscope.index_of(&self.symbol) {
            Some(index) => Some(Register::new(RegKind::Var, index)),
            None => {
                ctx.error(CompileError::new(
                    format!("variable not in scope: {}", self.symbol.full_name),
                    self.location.clone(),
                ));
                None
            }
        }
    }
}

impl AstNode for VarReadNode {
    fn location(&self) -> &Location {
        &self.location
    }

    fn render(&self) -> String {
        format!("${}", self.symbol.full_name)
    }

    fn cg_evaluate(&self, dst: Register, ctx: &mut CodegenContext) {
        ctx.set_location(&self.location);
        match &self.symbol.kind {
            SymbolKind::GlobalVariable { .. } => match self.symbol.pcode_index.get() {
                Some(index) => ctx.emit(Instr::LdGlob {
                    dst,
                    global: i64::try_from(index).unwrap_or(0),
                }),
                None => ctx.error(CompileError::new(
                    format!("global variable not yet defined: {}", self.symbol.full_name),
                    self.location.clone(),
                )),
            },
            SymbolKind::LocalVariable => {
                if let Some(src) = self.local_register(ctx) {
                    ctx.emit(Instr::LdRegS { dst, src });
                }
            }
            other => ctx.error(CompileError::new(
                format!(
                    "{} cannot be read as a variable: {}",
                    other.type_name(),
                    self.symbol.full_name
                ),
                self.location.clone(),
            )),
        }
    }

    fn cg_discard(&self, _ctx: &mut CodegenContext) {
        // Reading a variable has no effect.
    }

    fn as_lvalue(&self) -> Option<&dyn LValueNode> {
        match &self.symbol.kind {
            SymbolKind::GlobalVariable { mutable: true } | SymbolKind::LocalVariable => Some(self),
            _ => None,
        }
    }
}

impl LValueNode for VarReadNode {
    fn cg_store(&self, src: Register, ctx: &mut CodegenContext) {
        ctx.set_location(&self.location);
        match &self.symbol.kind {
            SymbolKind::GlobalVariable { .. } => match self.symbol.pcode_index.get() {
                Some(index) => ctx.emit(Instr::SetGlob {
                    global: i64::try_from(index).unwrap_or(0),
                    src,
                }),
                None => ctx.error(CompileError::new(
                    format!("global variable not yet defined: {}", self.symbol.full_name),
                    self.location.clone(),
                )),
            },
            SymbolKind::LocalVariable => {
                if let Some(dst) = self.local_register(ctx) {
                    ctx.emit(Instr::LdRegS { dst, src });
                }
            }
            _ => {}
        }
    }
}

/// Concatenation of partial strings, from `$`-interpolation.
///
/// Statically known parts fold at compile time; anything dynamic lowers to
/// the external binary concatenation function.
pub struct ConcatNode {
    pub parts: Vec<AstRef>,
    pub location: Location,
}

impl ConcatNode {
    fn folded(&self) -> Option<String> {
        let mut out = String::new();
        for part in &self.parts {
            out.push_str(&part.get_constexpr()?.stringify());
        }
        Some(out)
    }
}

fn concat_prototype() -> Prototype {
    Prototype {
        calling_convention: "ava".to_owned(),
        args: vec!["pos".to_owned(), "pos".to_owned()],
    }
}

impl AstNode for ConcatNode {
    fn location(&self) -> &Location {
        &self.location
    }

    fn render(&self) -> String {
        let parts: Vec<String> = self.parts.iter().map(|p| p.render()).collect();
        parts.join("..")
    }

    fn postprocess(&self) {
        for part in &self.parts {
            part.postprocess();
        }
    }

    fn cg_evaluate(&self, dst: Register, ctx: &mut CodegenContext) {
        ctx.set_location(&self.location);
        if let Some(folded) = self.folded() {
            ctx.emit(Instr::LdImmVd { dst, value: folded });
            return;
        }

        let concat = ctx
            .globals()
            .borrow_mut()
            .declare_ext_fun(&Demangled::ava("string-concat"), &concat_prototype());
        let concat = i64::try_from(concat).unwrap_or(0);

        let base = ctx.push_reg(RegKind::Data, 2);
        let acc = Register::new(RegKind::Data, base);
        let next = Register::new(RegKind::Data, base + 1);

        match self.parts.split_first() {
            None => ctx.emit(Instr::LdImmVd {
                dst: acc,
                value: String::new(),
            }),
            Some((first, rest)) => {
                first.cg_evaluate(acc, ctx);
                for part in rest {
                    part.cg_evaluate(next, ctx);
                    ctx.emit(Instr::InvokeSs {
                        dst: acc,
                        fun: concat,
                        base,
                        count: 2,
                    });
                }
            }
        }

        if dst != acc {
            ctx.emit(Instr::LdRegS { dst, src: acc });
        }
        ctx.pop_reg(RegKind::Data, 2);
    }

    fn cg_discard(&self, ctx: &mut CodegenContext) {
        // Parts may have effects; evaluate into a scratch register.
        let base = ctx.push_reg(RegKind::Data, 1);
        self.cg_evaluate(Register::new(RegKind::Data, base), ctx);
        ctx.pop_reg(RegKind::Data, 1);
    }

    fn get_constexpr(&self) -> Option<Value> {
        self.folded().map(Value::str)
    }
}

/// A statically bound function invocation.
pub struct InvocationNode {
    pub target: Arc<Symbol>,
    pub args: Vec<AstRef>,
    pub location: Location,
}

impl AstNode for InvocationNode {
    fn location(&self) -> &Location {
        &self.location
    }

    fn render(&self) -> String {
        let args: Vec<String> = self.args.iter().map(|a| a.render()).collect();
        format!("{}({})", self.target.full_name, args.join(" "))
    }

    fn postprocess(&self) {
        for arg in &self.args {
            arg.postprocess();
        }
    }

    fn cg_evaluate(&self, dst: Register, ctx: &mut CodegenContext) {
        let prototype = match &self.target.kind {
            SymbolKind::GlobalFunction { prototype } | SymbolKind::LocalFunction { prototype } => {
                prototype.clone()
            }
            other => {
                ctx.error(CompileError::new(
                    format!("{} is not callable: {}", other.type_name(), self.target.full_name),
                    self.location.clone(),
                ));
                return;
            }
        };
        let Some(fun_index) = self.target.pcode_index.get() else {
            ctx.error(CompileError::new(
                format!("function not yet defined: {}", self.target.full_name),
                self.location.clone(),
            ));
            return;
        };
        if prototype.num_args() != self.args.len() {
            ctx.error(CompileError::new(
                format!(
                    "{} takes {} argument(s), {} given",
                    self.target.full_name,
                    prototype.num_args(),
                    self.args.len()
                ),
                self.location.clone(),
            ));
            return;
        }

        ctx.set_location(&self.location);
        let count = u32::try_from(self.args.len()).unwrap_or(0);
        let base = ctx.push_reg(RegKind::Data, count.max(1));
        for (ix, arg) in self.args.iter().enumerate() {
            let slot = Register::new(RegKind::Data, base + u32::try_from(ix).unwrap_or(0));
            arg.cg_evaluate(slot, ctx);
        }
        ctx.emit(Instr::InvokeSs {
            dst,
            fun: i64::try_from(fun_index).unwrap_or(0),
            base,
            count,
        });
        ctx.pop_reg(RegKind::Data, count.max(1));
    }

    fn cg_discard(&self, ctx: &mut CodegenContext) {
        let base = ctx.push_reg(RegKind::Data, 1);
        self.cg_evaluate(Register::new(RegKind::Data, base), ctx);
        ctx.pop_reg(RegKind::Data, 1);
    }
}
