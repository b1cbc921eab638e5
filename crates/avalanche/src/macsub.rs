//! Macro substitution: parse trees become AST nodes.
//!
//! The engine walks a block statement by statement. Within a statement it
//! resolves every bareword against the symbol table; the strongest-
//! precedence (lowest value), leftmost macro found is invoked with the
//! statement, the provoking unit, the context, and the statements that
//! follow (so control macros can swallow, say, a loop body on the next
//! line). A substitution either finishes with an AST node or asks to be
//! run `again` on a rewritten statement, which is how operator rescanning
//! works. A statement with no macros is an invocation; a lone unit is an
//! expression.
//!
//! A context that has *panicked* stops substituting statements in its block
//! but keeps collecting errors.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use crate::ast::{
    AstRef, ConcatNode, EmptyNode, ErrorNode, InvocationNode, LiteralNode, SeqNode, VarReadNode,
};
use crate::codegen::SharedErrors;
use crate::diag::{CompileError, Location};
use crate::macro_args::{MacroArgs, literal_value};
use crate::parse::{ParseUnit, ParseUnitKind, Statement};
use crate::symbol::{MacroData, Symbol, SymbolKind, Visibility};
use crate::symtab::SymTab;
use crate::value::Value;
use crate::varscope::VarScope;

/// What a macro substitution produced.
pub enum MacroResult {
    /// Substitution finished with this node.
    Done(AstRef),
    /// Re-run substitution over this rewritten statement.
    Again(Statement),
}

/// One macro invocation, as handed to an expander.
pub struct MacroInvocation<'a> {
    pub statement: &'a Statement,
    /// Index of the provoking unit within the statement.
    pub provoker: usize,
    /// Statements following the provoking one in the same block.
    pub following: &'a [Statement],
    /// Set by control macros that swallow following statements.
    pub consumed_following: Cell<usize>,
}

impl MacroInvocation<'_> {
    /// The argument cursors for this invocation.
    #[must_use]
    pub fn args(&self) -> MacroArgs<'_> {
        MacroArgs::new(self.statement, self.provoker)
    }

    #[must_use]
    pub fn provoker_unit(&self) -> &ParseUnit {
        &self.statement.units[self.provoker]
    }
}

/// A macro's substitution function.
pub type MacroExpander =
    Arc<dyn Fn(&Arc<Symbol>, &mut MacsubContext, &MacroInvocation<'_>) -> MacroResult>;

/// The macro substitution context for one block nesting.
pub struct MacsubContext {
    symtab: SymTab,
    errors: SharedErrors,
    package_prefix: String,
    level: u32,
    varscope: VarScope,
    panic: Cell<bool>,
}

impl MacsubContext {
    /// Creates a root context over a fresh scope, with the intrinsic
    /// expanders registered.
    #[must_use]
    pub fn new(symtab: SymTab, errors: SharedErrors, package_prefix: impl Into<String>) -> Self {
        let context = Self {
            symtab,
            errors,
            package_prefix: package_prefix.into(),
            level: 0,
            varscope: VarScope::new(),
            panic: Cell::new(false),
        };
        register_intrinsics(&context);
        context
    }

    /// Derives a nested context (a deeper scope level, its own varscope).
    #[must_use]
    pub fn nested(&self, varscope: VarScope) -> Self {
        Self {
            symtab: SymTab::new(Some(&self.symtab)),
            errors: Rc::clone(&self.errors),
            package_prefix: self.package_prefix.clone(),
            level: self.level + 1,
            varscope,
            panic: Cell::new(false),
        }
    }

    #[must_use]
    pub fn symtab(&self) -> &SymTab {
        &self.symtab
    }

    /// Replaces the symbol table, as `import` macros do.
    pub fn set_symtab(&mut self, symtab: SymTab) {
        self.symtab = symtab;
    }

    #[must_use]
    pub fn errors(&self) -> SharedErrors {
        Rc::clone(&self.errors)
    }

    #[must_use]
    pub fn package_prefix(&self) -> &str {
        &self.package_prefix
    }

    #[must_use]
    pub fn level(&self) -> u32 {
        self.level
    }

    #[must_use]
    pub fn varscope(&self) -> &VarScope {
        &self.varscope
    }

    /// Applies the package prefix to a new global name.
    #[must_use]
    pub fn apply_prefix(&self, name: &str) -> String {
        format!("{}{name}", self.package_prefix)
    }

    pub fn error(&self, message: impl Into<String>, location: Location) {
        self.errors
            .borrow_mut()
            .push(CompileError::new(message, location));
    }

    /// Reports an error and returns an inert node, as most expanders do on
    /// failure.
    #[must_use]
    pub fn error_result(&self, message: impl Into<String>, location: Location) -> MacroResult {
        self.error(message, location.clone());
        MacroResult::Done(Rc::new(ErrorNode { location }))
    }

    /// Enters panic state: no further substitution in this block.
    pub fn set_panic(&self) {
        self.panic.set(true);
    }

    #[must_use]
    pub fn in_panic(&self) -> bool {
        self.panic.get()
    }

    /// Defines a symbol, diagnosing redefinition.
    pub fn define(&self, symbol: Arc<Symbol>) {
        let location = symbol.definition.clone();
        if let Some(previous) = self.symtab.put(symbol) {
            self.error(
                format!("redefinition of {}", previous.full_name),
                location,
            );
        }
    }

    /// Runs substitution over a whole block.
    pub fn run(&mut self, location: &Location, statements: &[Statement]) -> AstRef {
        let mut children: Vec<AstRef> = Vec::new();
        let mut ix = 0;
        while ix < statements.len() {
            let statement = &statements[ix];
            ix += 1;
            if statement.is_empty() {
                continue;
            }
            if self.in_panic() {
                continue;
            }
            let mut consumed = 0;
            let node = self.run_statement(statement, &statements[ix..], &mut consumed);
            children.push(node);
            ix += consumed;
        }
        Rc::new(SeqNode::new(children, location.clone()))
    }

    /// Substitutes one statement, possibly consuming following statements.
    pub fn run_statement(
        &mut self,
        statement: &Statement,
        following: &[Statement],
        consumed: &mut usize,
    ) -> AstRef {
        let mut current = statement.clone();
        loop {
            match self.find_macro(&current) {
                Some((provoker, symbol, data)) => {
                    let invocation = MacroInvocation {
                        statement: &current,
                        provoker,
                        following,
                        consumed_following: Cell::new(0),
                    };
                    let result = (data.expander)(&symbol, self, &invocation);
                    *consumed += invocation.consumed_following.get();
                    match result {
                        MacroResult::Done(node) => return node,
                        MacroResult::Again(rewritten) => {
                            current = rewritten;
                        }
                    }
                }
                None => return self.plain_statement(&current),
            }
        }
    }

    /// Finds the strongest-precedence, leftmost macro in the statement.
    fn find_macro(&self, statement: &Statement) -> Option<(usize, Arc<Symbol>, MacroData)> {
        let mut best: Option<(u32, usize, Arc<Symbol>, MacroData)> = None;
        for (ix, unit) in statement.units.iter().enumerate() {
            let ParseUnitKind::Bareword(word) = &unit.kind else {
                continue;
            };
            let found = self.symtab.get(word);
            let macros: Vec<&Arc<Symbol>> = found
                .iter()
                .filter(|s| s.kind.macro_data().is_some())
                .collect();
            if macros.is_empty() {
                continue;
            }
            if found.len() >= 2 {
                self.error(format!("ambiguous name: {word}"), unit.location.clone());
                continue;
            }
            let symbol = macros[0];
            let data = symbol.kind.macro_data().expect("filtered above").clone();
            let better = best
                .as_ref()
                .is_none_or(|(precedence, pos, _, _)| {
                    data.precedence < *precedence || (data.precedence == *precedence && ix < *pos)
                });
            if better {
                best = Some((data.precedence, ix, Arc::clone(symbol), data));
            }
        }
        best.map(|(_, ix, symbol, data)| (ix, symbol, data))
    }

    /// A statement with no macros: a lone unit is an expression; several
    /// units are a statically bound invocation.
    fn plain_statement(&mut self, statement: &Statement) -> AstRef {
        if statement.units.len() == 1 {
            return self.unit_to_node(&statement.units[0]);
        }

        let head = &statement.units[0];
        let location = head.location.clone();
        let ParseUnitKind::Bareword(name) = &head.kind else {
            self.error("statement must begin with a function name", location.clone());
            return Rc::new(ErrorNode { location });
        };

        let found = self.symtab.get(name);
        let target = match found.len() {
            0 => {
                self.error(
                    format!("no such function or macro: {name}"),
                    location.clone(),
                );
                return Rc::new(ErrorNode { location });
            }
            1 => Arc::clone(&found[0]),
            _ => {
                self.error(format!("ambiguous name: {name}"), location.clone());
                return Rc::new(ErrorNode { location });
            }
        };
        if !matches!(
            target.kind,
            SymbolKind::GlobalFunction { .. } | SymbolKind::LocalFunction { .. }
        ) {
            self.error(
                format!("{} is not callable: {name}", target.kind.type_name()),
                location.clone(),
            );
            return Rc::new(ErrorNode { location });
        }

        let args: Vec<AstRef> = statement.units[1..]
            .iter()
            .map(|unit| self.unit_to_node(unit))
            .collect();
        Rc::new(InvocationNode {
            target,
            args,
            location,
        })
    }

    /// Substitutes a single unit in expression position.
    pub fn unit_to_node(&mut self, unit: &ParseUnit) -> AstRef {
        let location = unit.location.clone();
        match &unit.kind {
            ParseUnitKind::Bareword(text)
            | ParseUnitKind::AString(text)
            | ParseUnitKind::Verbatim(text) => Rc::new(LiteralNode {
                value: Value::str(text.clone()),
                location,
            }),
            ParseUnitKind::LString(_) | ParseUnitKind::RString(_) | ParseUnitKind::LrString(_) => {
                self.error("dangling partial string", location.clone());
                Rc::new(ErrorNode { location })
            }
            ParseUnitKind::Substitution(statements) => match statements.as_slice() {
                [] => Rc::new(EmptyNode { location }),
                [statement] => {
                    if statement.units.iter().any(is_partial) {
                        let parts: Vec<AstRef> = statement
                            .units
                            .iter()
                            .map(|part| self.interpolation_part(part))
                            .collect();
                        Rc::new(ConcatNode { parts, location })
                    } else {
                        let mut consumed = 0;
                        self.run_statement(statement, &[], &mut consumed)
                    }
                }
                many => {
                    let mut children = Vec::with_capacity(many.len());
                    for statement in many {
                        if statement.is_empty() {
                            continue;
                        }
                        let mut consumed = 0;
                        children.push(self.run_statement(statement, &[], &mut consumed));
                    }
                    Rc::new(SeqNode::new(children, location))
                }
            },
            ParseUnitKind::Semiliteral(units) => {
                let mut items = Vec::with_capacity(units.len());
                for item in units {
                    match literal_value(item) {
                        Ok(value) => items.push(value),
                        Err(offender) => {
                            self.error(
                                "semiliteral elements must be literals in the bootstrap core",
                                offender.location.clone(),
                            );
                            return Rc::new(ErrorNode { location });
                        }
                    }
                }
                Rc::new(LiteralNode {
                    value: Value::List(crate::value::List::from_values(items)),
                    location,
                })
            }
            ParseUnitKind::Block(_) => {
                self.error("block not allowed in expression position", location.clone());
                Rc::new(ErrorNode { location })
            }
        }
    }

    /// Inside an interpolation, partial strings are literal fragments.
    fn interpolation_part(&mut self, unit: &ParseUnit) -> AstRef {
        match &unit.kind {
            ParseUnitKind::LString(text)
            | ParseUnitKind::RString(text)
            | ParseUnitKind::LrString(text) => Rc::new(LiteralNode {
                value: Value::str(text.clone()),
                location: unit.location.clone(),
            }),
            _ => self.unit_to_node(unit),
        }
    }
}

fn is_partial(unit: &ParseUnit) -> bool {
    matches!(
        unit.kind,
        ParseUnitKind::LString(_) | ParseUnitKind::RString(_) | ParseUnitKind::LrString(_)
    )
}

/// Registers the intrinsic expanders for the parser-generated forms.
fn register_intrinsics(context: &MacsubContext) {
    let var_expander: MacroExpander = Arc::new(expand_var);
    context.symtab.put(Symbol::new(
        "#var#",
        0,
        Visibility::Private,
        Location::start_of("<intrinsic>"),
        SymbolKind::ExpanderMacro(MacroData {
            precedence: 0,
            expander: var_expander,
        }),
    ));
}

/// `(#var# name)`: a variable reference.
fn expand_var(
    self_symbol: &Arc<Symbol>,
    context: &mut MacsubContext,
    invocation: &MacroInvocation<'_>,
) -> MacroResult {
    let location = invocation.provoker_unit().location.clone();
    let mut args = invocation.args();
    let mut cursor = args.from_right_begin();
    let name = match cursor.bareword("variable name") {
        Ok(name) => name,
        Err(err) => {
            context.error(err.message, err.location);
            return MacroResult::Done(Rc::new(ErrorNode { location }));
        }
    };
    drop(cursor);
    if let Err(err) = args.check_consumed(&self_symbol.full_name) {
        context.error(err.message, err.location);
        return MacroResult::Done(Rc::new(ErrorNode { location }));
    }

    let found = context.symtab.get(&name);
    let variables: Vec<&Arc<Symbol>> = found
        .iter()
        .filter(|s| {
            matches!(
                s.kind,
                SymbolKind::GlobalVariable { .. } | SymbolKind::LocalVariable
            )
        })
        .collect();
    match variables.as_slice() {
        [] => context.error_result(format!("no such variable: {name}"), location),
        [symbol] => {
            if found.len() > 1 {
                return context.error_result(format!("ambiguous name: {name}"), location);
            }
            if matches!(symbol.kind, SymbolKind::LocalVariable) {
                context.varscope.ref_var(symbol);
            }
            MacroResult::Done(Rc::new(VarReadNode {
                symbol: Arc::clone(symbol),
                varscope: context.varscope.clone(),
                location,
            }))
        }
        _ => context.error_result(format!("ambiguous name: {name}"), location),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::diag::ErrorList;
    use crate::parse::parse;

    fn run_source(src: &str, setup: impl FnOnce(&MacsubContext)) -> (AstRef, SharedErrors) {
        let errors: SharedErrors = Rc::new(RefCell::new(ErrorList::new()));
        let root = parse(&mut errors.borrow_mut(), src, "test.ava");
        let ParseUnitKind::Block(statements) = &root.kind else {
            panic!("root is a block");
        };
        let mut context = MacsubContext::new(SymTab::new(None), Rc::clone(&errors), "test:");
        setup(&context);
        let node = context.run(&root.location, statements);
        (node, errors)
    }

    #[test]
    fn bare_literals_substitute_cleanly() {
        let (node, errors) = run_source("hello", |_| {});
        assert!(errors.borrow().is_empty());
        assert_eq!(node.render(), "{hello}");
    }

    #[test]
    fn unknown_invocations_are_errors() {
        let (_, errors) = run_source("frobnicate a b", |_| {});
        assert!(
            errors
                .borrow()
                .iter()
                .any(|e| e.message.contains("no such function or macro"))
        );
    }

    #[test]
    fn var_expander_reports_unknown_variables() {
        let (_, errors) = run_source("$nowhere", |_| {});
        assert!(
            errors
                .borrow()
                .iter()
                .any(|e| e.message.contains("no such variable"))
        );
    }

    #[test]
    fn var_expander_resolves_known_globals() {
        let (node, errors) = run_source("$answer", |ctx| {
            ctx.define(Symbol::new(
                "answer",
                0,
                Visibility::Private,
                Location::start_of("<test>"),
                SymbolKind::GlobalVariable { mutable: true },
            ));
        });
        assert!(errors.borrow().is_empty(), "{:?}", errors.borrow().iter().collect::<Vec<_>>());
        assert!(node.render().contains("$answer"));
    }

    #[test]
    fn control_macros_consume_following_statements() {
        let (node, errors) = run_source("twice\nbody statement\nafter", |ctx| {
            let expander: MacroExpander = Arc::new(|_, context, invocation| {
                // Swallow the next statement and substitute it twice.
                invocation.consumed_following.set(1);
                let Some(next) = invocation.following.first() else {
                    return context.error_result(
                        "twice needs a following statement",
                        invocation.provoker_unit().location.clone(),
                    );
                };
                let mut consumed = 0;
                let once = context.run_statement(next, &[], &mut consumed);
                let again = context.run_statement(next, &[], &mut consumed);
                MacroResult::Done(Rc::new(SeqNode::new(
                    vec![once, again],
                    invocation.provoker_unit().location.clone(),
                )))
            });
            ctx.define(Symbol::new(
                "twice",
                0,
                Visibility::Private,
                Location::start_of("<test>"),
                SymbolKind::ControlMacro(MacroData {
                    precedence: 10,
                    expander,
                }),
            ));
            ctx.define(Symbol::new(
                "body",
                0,
                Visibility::Private,
                Location::start_of("<test>"),
                SymbolKind::GlobalFunction {
                    prototype: crate::pcode::Prototype {
                        calling_convention: "ava".to_owned(),
                        args: vec!["pos".to_owned()],
                    },
                },
            ));
        });
        assert!(errors.borrow().is_empty(), "{:?}", errors.borrow().iter().collect::<Vec<_>>());
        // The body statement appears twice; "after" once.
        let rendered = node.render();
        assert_eq!(rendered.matches("body(statement)").count(), 2);
        assert_eq!(rendered.matches("after").count(), 1);
    }

    #[test]
    fn panic_suppresses_later_statements() {
        let (node, _) = run_source("boom\nnever reached statement", |ctx| {
            let expander: MacroExpander = Arc::new(|_, context, invocation| {
                context.set_panic();
                context.error_result(
                    "boom",
                    invocation.provoker_unit().location.clone(),
                )
            });
            ctx.define(Symbol::new(
                "boom",
                0,
                Visibility::Private,
                Location::start_of("<test>"),
                SymbolKind::ControlMacro(MacroData {
                    precedence: 1,
                    expander,
                }),
            ));
        });
        // Only the error node from the panicking statement survives.
        assert_eq!(node.render(), "{<error>}");
    }

    #[test]
    fn again_reruns_substitution_on_the_rewrite() {
        let (node, errors) = run_source("x REWRITE y", |ctx| {
            let expander: MacroExpander = Arc::new(|_, _context, invocation| {
                // Collapse the whole statement to a single bareword.
                let unit = invocation.provoker_unit();
                MacroResult::Again(Statement {
                    units: vec![ParseUnit {
                        kind: ParseUnitKind::Bareword("rewritten".to_owned()),
                        location: unit.location.clone(),
                    }],
                })
            });
            ctx.define(Symbol::new(
                "REWRITE",
                0,
                Visibility::Private,
                Location::start_of("<test>"),
                SymbolKind::OperatorMacro(MacroData {
                    precedence: 20,
                    expander,
                }),
            ));
        });
        assert!(errors.borrow().is_empty());
        assert_eq!(node.render(), "{rewritten}");
    }
}
