//! P-Code emission: register-stack accounting, jump protection, and the
//! assembly of whole objects.
//!
//! A codegen context builds one function body at a time against a shared
//! global-record builder. Register pushes and pops are balanced through the
//! context; source positions are emitted only when they change; and `goto`,
//! `branch` and `ret` honour the jump-protection stack, running the exit
//! code of every protector a transfer crosses.

use std::cell::RefCell;
use std::rc::Rc;

use crate::diag::{CompileError, ErrorList, Location};
use crate::mangle::Demangled;
use crate::pcode::{
    FunGlobal, Global, Instr, NUM_REG_KINDS, PcodeObject, Prototype, RegKind, Register, SrcPos,
};
use crate::symbol::{Symbol, Visibility};

/// Shared, additive error list used across the front-end contexts.
pub type SharedErrors = Rc<RefCell<ErrorList>>;

/// Builder for the global-record list of the object being produced.
#[derive(Debug, Default)]
pub struct GlobalBuilder {
    globals: Vec<Global>,
}

impl GlobalBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record, returning its index.
    pub fn push(&mut self, global: Global) -> usize {
        self.globals.push(global);
        self.globals.len() - 1
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.globals.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }

    /// Declares an external function once per linkage name, returning the
    /// record's index.
    pub fn declare_ext_fun(&mut self, name: &Demangled, prototype: &Prototype) -> usize {
        for (ix, global) in self.globals.iter().enumerate() {
            if let Global::ExtFun { name: existing, .. } = global
                && existing == name
            {
                return ix;
            }
        }
        self.push(Global::ExtFun {
            name: name.clone(),
            prototype: prototype.clone(),
        })
    }

    #[must_use]
    pub fn finish(self) -> PcodeObject {
        PcodeObject {
            globals: self.globals,
        }
    }

    pub fn get_mut(&mut self, ix: usize) -> Option<&mut Global> {
        self.globals.get_mut(ix)
    }
}

/// Exit code generator of one jump protector.
pub type JprotExit = Rc<dyn Fn(&mut CodegenContext, Option<&Location>)>;

struct Jprot {
    ordinal: i64,
    exit: JprotExit,
}

/// An opaque key for symbolic labels and registers; callers mint one per
/// named thing (loop label, bound variable) and compare by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NameKey(u64);

/// The per-function code generation context.
pub struct CodegenContext {
    errors: SharedErrors,
    globals: Rc<RefCell<GlobalBuilder>>,
    body: Vec<Instr>,
    last_location: Option<Location>,
    register_stacks: [u32; NUM_REG_KINDS],
    next_label: i64,
    next_name_key: u64,
    jprots: Vec<Jprot>,
    symlabels: Vec<(NameKey, i64)>,
    symregs: Vec<(NameKey, Register)>,
}

impl CodegenContext {
    #[must_use]
    pub fn new(errors: SharedErrors, globals: Rc<RefCell<GlobalBuilder>>) -> Self {
        Self {
            errors,
            globals,
            body: Vec::new(),
            last_location: None,
            register_stacks: [0; NUM_REG_KINDS],
            next_label: 0,
            next_name_key: 0,
            jprots: Vec::new(),
            symlabels: Vec::new(),
            symregs: Vec::new(),
        }
    }

    /// Derives a context for another function against the same object.
    #[must_use]
    pub fn for_function(&self) -> Self {
        Self::new(Rc::clone(&self.errors), Rc::clone(&self.globals))
    }

    pub fn error(&mut self, error: CompileError) {
        self.errors.borrow_mut().push(error);
    }

    #[must_use]
    pub fn globals(&self) -> Rc<RefCell<GlobalBuilder>> {
        Rc::clone(&self.globals)
    }

    #[must_use]
    pub fn errors(&self) -> SharedErrors {
        Rc::clone(&self.errors)
    }

    /// Emits one instruction into the current body.
    pub fn emit(&mut self, instr: Instr) {
        self.body.push(instr);
    }

    /// Takes the finished body.
    #[must_use]
    pub fn take_body(&mut self) -> Vec<Instr> {
        std::mem::take(&mut self.body)
    }

    /// Allocates `count` registers of a kind, returning the base index.
    pub fn push_reg(&mut self, kind: RegKind, count: u32) -> u32 {
        let base = self.register_stacks[kind.ordinal()];
        self.register_stacks[kind.ordinal()] += count;
        self.emit(Instr::Push { kind, count });
        base
    }

    /// Releases `count` registers; pops must balance pushes.
    pub fn pop_reg(&mut self, kind: RegKind, count: u32) {
        debug_assert!(count <= self.register_stacks[kind.ordinal()], "unbalanced pop");
        self.register_stacks[kind.ordinal()] =
            self.register_stacks[kind.ordinal()].saturating_sub(count);
        self.emit(Instr::Pop { kind, count });
    }

    /// Current depth of a register stack.
    #[must_use]
    pub fn stack_depth(&self, kind: RegKind) -> u32 {
        self.register_stacks[kind.ordinal()]
    }

    /// Emits a `src-pos` instruction when `location` differs from the last
    /// one emitted.
    pub fn set_location(&mut self, location: &Location) {
        if self.last_location.as_ref() == Some(location) {
            return;
        }
        self.emit(Instr::SrcPos(srcpos_of(location)));
        self.last_location = Some(location.clone());
    }

    /// Emits a `src-pos` global record.
    pub fn set_global_location(&mut self, location: &Location) {
        self.globals
            .borrow_mut()
            .push(Global::SrcPos(srcpos_of(location)));
    }

    /// Emits the export record matching a symbol's visibility.
    pub fn export(&mut self, symbol: &Symbol) {
        let Some(index) = symbol.pcode_index.get() else {
            return;
        };
        let reexport = match symbol.visibility {
            Visibility::Private => return,
            Visibility::Internal => false,
            Visibility::Public => true,
        };
        self.globals.borrow_mut().push(Global::Export {
            global: i64::try_from(index).unwrap_or(0),
            reexport,
            name: symbol.full_name.clone(),
        });
    }

    /// Mints a fresh label id.
    pub fn gen_label(&mut self) -> i64 {
        let label = self.next_label;
        self.next_label += 1;
        label
    }

    /// Mints a fresh symbolic name key.
    pub fn gen_name_key(&mut self) -> NameKey {
        self.next_name_key += 1;
        NameKey(self.next_name_key)
    }

    /// Places a label in the body.
    pub fn label(&mut self, id: i64) {
        self.emit(Instr::Label { id });
    }

    /// Installs a jump protector; its exit runs whenever control leaves the
    /// protected extent, and once when the protector is popped.
    pub fn push_jprot(&mut self, exit: JprotExit) -> i64 {
        let ordinal = self.gen_label();
        self.jprots.push(Jprot { ordinal, exit });
        ordinal
    }

    /// Pops the innermost protector, running its exit.
    pub fn pop_jprot(&mut self) {
        let jprot = self.jprots.pop().expect("jprot stack underflow");
        (jprot.exit)(self, None);
    }

    fn crosses_jprot(&self, target: i64) -> bool {
        self.jprots.last().is_some_and(|j| j.ordinal > target)
    }

    /// Emits a conditional branch. A branch that would cross a protector is
    /// rewritten as an inverted branch around a protected `goto`.
    pub fn branch(
        &mut self,
        location: &Location,
        key: Register,
        value: i64,
        invert: bool,
        target: i64,
    ) {
        if self.crosses_jprot(target) {
            let around = self.gen_label();
            self.branch(location, key, value, !invert, around);
            self.goto_label(location, target);
            self.label(around);
        } else {
            self.emit(Instr::Branch {
                key,
                value,
                invert,
                target,
            });
        }
    }

    /// Emits an unconditional jump, draining the exits of every protector
    /// it crosses. Each protector is temporarily removed while its exit
    /// runs so a nested early exit cannot run it twice.
    pub fn goto_label(&mut self, location: &Location, target: i64) {
        if self.crosses_jprot(target) {
            let jprot = self.jprots.pop().expect("crossing implies a protector");
            (jprot.exit)(self, Some(location));
            self.goto_label(location, target);
            self.jprots.push(jprot);
        } else {
            self.emit(Instr::Goto { target });
        }
    }

    /// Emits a return, draining every protector first.
    pub fn ret(&mut self, location: &Location, value: Register) {
        if let Some(jprot) = self.jprots.pop() {
            (jprot.exit)(self, Some(location));
            self.ret(location, value);
            self.jprots.push(jprot);
        } else {
            self.emit(Instr::Ret { value });
        }
    }

    /// Pushes a symbolic label binding.
    pub fn push_symlabel(&mut self, name: NameKey, label: i64) {
        self.symlabels.push((name, label));
    }

    pub fn pop_symlabel(&mut self) {
        self.symlabels.pop();
    }

    /// Finds the innermost label bound to `name`.
    #[must_use]
    pub fn get_symlabel(&self, name: NameKey) -> Option<i64> {
        self.symlabels
            .iter()
            .rev()
            .find(|(key, _)| *key == name)
            .map(|(_, label)| *label)
    }

    /// Pushes a symbolic register binding.
    pub fn push_symreg(&mut self, name: NameKey, reg: Register) {
        self.symregs.push((name, reg));
    }

    pub fn pop_symreg(&mut self) {
        self.symregs.pop();
    }

    #[must_use]
    pub fn get_symreg(&self, name: NameKey) -> Option<Register> {
        self.symregs
            .iter()
            .rev()
            .find(|(key, _)| *key == name)
            .map(|(_, reg)| *reg)
    }
}

fn srcpos_of(location: &Location) -> SrcPos {
    let int = |v: usize| i64::try_from(v).unwrap_or(0);
    SrcPos {
        filename: location.filename.to_string(),
        line_offset: int(location.line_offset),
        start_line: int(location.start_line),
        end_line: int(location.end_line),
        start_column: int(location.start_column),
        end_column: int(location.end_column),
    }
}

/// The name of the synthesised module-initialisation function.
pub const INIT_FUNCTION_NAME: &str = "\\init";

/// Runs code generation over a finished AST root, producing a complete
/// object: a `src-pos` for the root, `load-pkg` records for the implicit
/// packages, the synthesised `\init` function holding the top-level code,
/// and an `init` record pointing at it.
pub fn codegen_run(
    root: &dyn crate::ast::AstNode,
    implicit_packages: &[String],
    errors: &SharedErrors,
) -> PcodeObject {
    let globals = Rc::new(RefCell::new(GlobalBuilder::new()));

    globals
        .borrow_mut()
        .push(Global::SrcPos(srcpos_of(root.location())));
    for package in implicit_packages {
        globals.borrow_mut().push(Global::LoadPkg {
            name: package.clone(),
        });
    }

    let init_index = globals.borrow_mut().push(Global::Fun(Box::new(FunGlobal {
        publish: false,
        name: Demangled::ava(INIT_FUNCTION_NAME),
        prototype: Prototype {
            calling_convention: "ava".to_owned(),
            args: vec!["pos".to_owned()],
        },
        vars: vec![String::new()],
        body: Vec::new(),
    })));
    globals.borrow_mut().push(Global::Init {
        fun: i64::try_from(init_index).unwrap_or(0),
    });

    let mut context = CodegenContext::new(Rc::clone(errors), Rc::clone(&globals));
    root.cg_discard(&mut context);
    let body = context.take_body();
    drop(context);

    {
        let mut builder = globals.borrow_mut();
        if let Some(Global::Fun(fun)) = builder.get_mut(init_index) {
            fun.body = body;
        }
    }

    match Rc::try_unwrap(globals) {
        Ok(builder) => builder.into_inner().finish(),
        Err(shared) => {
            // Some defining node kept a handle; emit from a snapshot.
            let snapshot = shared.borrow();
            PcodeObject {
                globals: snapshot.globals.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> CodegenContext {
        CodegenContext::new(
            Rc::new(RefCell::new(ErrorList::new())),
            Rc::new(RefCell::new(GlobalBuilder::new())),
        )
    }

    fn loc() -> Location {
        Location::start_of("test.ava")
    }

    #[test]
    fn push_returns_base_and_counts_up() {
        let mut ctx = context();
        assert_eq!(ctx.push_reg(RegKind::Data, 2), 0);
        assert_eq!(ctx.push_reg(RegKind::Data, 1), 2);
        assert_eq!(ctx.stack_depth(RegKind::Data), 3);
        ctx.pop_reg(RegKind::Data, 3);
        assert_eq!(ctx.stack_depth(RegKind::Data), 0);
    }

    #[test]
    fn set_location_deduplicates() {
        let mut ctx = context();
        let location = loc();
        ctx.set_location(&location);
        ctx.set_location(&location);
        let mut other = location.clone();
        other.start_line = 7;
        ctx.set_location(&other);

        let srcpos_count = ctx
            .take_body()
            .iter()
            .filter(|i| matches!(i, Instr::SrcPos(_)))
            .count();
        assert_eq!(srcpos_count, 2);
    }

    #[test]
    fn goto_across_jprot_runs_exits_in_order() {
        let mut ctx = context();
        let outer_target = ctx.gen_label(); // minted before the protector

        ctx.push_jprot(Rc::new(|ctx, _| {
            ctx.emit(Instr::Yrt);
        }));
        ctx.goto_label(&loc(), outer_target);
        ctx.pop_jprot();

        let body = ctx.take_body();
        assert_eq!(
            body,
            vec![
                Instr::Yrt,
                Instr::Goto { target: outer_target },
                Instr::Yrt,
            ]
        );
    }

    #[test]
    fn goto_within_jprot_is_direct() {
        let mut ctx = context();
        ctx.push_jprot(Rc::new(|ctx, _| {
            ctx.emit(Instr::Yrt);
        }));
        let inner_target = ctx.gen_label(); // minted after the protector
        ctx.goto_label(&loc(), inner_target);

        assert_eq!(ctx.body[0], Instr::Goto { target: inner_target });
    }

    #[test]
    fn ret_drains_every_jprot() {
        let mut ctx = context();
        ctx.push_jprot(Rc::new(|ctx, _| {
            ctx.emit(Instr::Pop {
                kind: RegKind::Data,
                count: 1,
            });
        }));
        ctx.push_jprot(Rc::new(|ctx, _| {
            ctx.emit(Instr::Pop {
                kind: RegKind::Int,
                count: 1,
            });
        }));
        ctx.ret(&loc(), Register::new(RegKind::Var, 0));

        let body = ctx.take_body();
        assert_eq!(
            body,
            vec![
                Instr::Pop { kind: RegKind::Int, count: 1 },
                Instr::Pop { kind: RegKind::Data, count: 1 },
                Instr::Ret { value: Register::new(RegKind::Var, 0) },
            ]
        );
    }

    #[test]
    fn branch_across_jprot_inverts_around_protected_goto() {
        let mut ctx = context();
        let target = ctx.gen_label();
        ctx.push_jprot(Rc::new(|ctx, _| {
            ctx.emit(Instr::Yrt);
        }));
        ctx.branch(&loc(), Register::new(RegKind::Int, 0), 0, false, target);

        let body = ctx.take_body();
        assert!(matches!(body[0], Instr::Branch { invert: true, .. }));
        assert_eq!(body[1], Instr::Yrt);
        assert_eq!(body[2], Instr::Goto { target });
        assert!(matches!(body[3], Instr::Label { .. }));
    }

    #[test]
    fn symbolic_registers_shadow_inward() {
        let mut ctx = context();
        let name = ctx.gen_name_key();
        ctx.push_symreg(name, Register::new(RegKind::Var, 1));
        ctx.push_symreg(name, Register::new(RegKind::Var, 2));
        assert_eq!(ctx.get_symreg(name), Some(Register::new(RegKind::Var, 2)));
        ctx.pop_symreg();
        assert_eq!(ctx.get_symreg(name), Some(Register::new(RegKind::Var, 1)));
    }
}
