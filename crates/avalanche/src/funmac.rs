//! Simplified function-like macros.
//!
//! A function-like macro substitutes each unit to its right independently,
//! then binds the resulting nodes to a declared parameter list the same way
//! function arguments bind: positionally, by `-name value` pairs, or by
//! `-flag` booleans. Omitted optional parameters surface as
//! [`FunmacArg::Omitted`]; bound flags surface as
//! [`FunmacArg::ImplicitTrue`] rather than a real node. The bound array is
//! offered to an optional `accept` hook at substitution time and then fed
//! to the macro's code-generation callbacks.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use crate::ast::{AstNode, AstRef};
use crate::codegen::CodegenContext;
use crate::diag::{CompileError, Location};
use crate::macsub::{MacroInvocation, MacroResult, MacsubContext};
use crate::pcode::Register;
use crate::symbol::{MacroData, Symbol, SymbolKind, Visibility};
use crate::value::Value;

/// One declared parameter of a function-like macro.
#[derive(Debug, Clone)]
pub enum ParamSpec {
    /// Required positional argument.
    Pos(&'static str),
    /// `-flag`: bound to the implicit constant true when present.
    Bool(&'static str),
    /// `-name value`: optional, with an optional default.
    Named(&'static str, Option<Value>),
}

impl ParamSpec {
    fn name(&self) -> &'static str {
        match self {
            Self::Pos(name) | Self::Bool(name) | Self::Named(name, _) => name,
        }
    }
}

/// A bound argument slot.
#[derive(Clone)]
pub enum FunmacArg {
    /// An omitted optional parameter.
    Omitted,
    /// A `-flag` bound to the constant true.
    ImplicitTrue,
    /// A real argument.
    Node(AstRef),
}

impl FunmacArg {
    #[must_use]
    pub fn node(&self) -> Option<&AstRef> {
        match self {
            Self::Node(node) => Some(node),
            _ => None,
        }
    }
}

/// Code-generation callback: `dst` is `None` for discard.
pub type FunmacCg = Rc<dyn Fn(Option<Register>, &mut CodegenContext, &Location, &[FunmacArg])>;

/// Post-binding inspection hook.
pub type FunmacAccept = Rc<dyn Fn(&Location, &mut MacsubContext, &mut [FunmacArg])>;

/// The behaviour of one function-like macro.
pub struct FunMacro {
    pub params: Vec<ParamSpec>,
    pub accept: Option<FunmacAccept>,
    /// Generates the value; absent means the macro produces none.
    pub cg_evaluate: Option<FunmacCg>,
    /// Generates for effect; absent means the macro is pure and must not
    /// be discarded.
    pub cg_discard: Option<FunmacCg>,
}

/// Wraps a [`FunMacro`] into a symbol ready for the symbol table.
///
/// Function-like macros are nominally public and global.
#[must_use]
pub fn funmac_symbol(full_name: impl Into<String>, behaviour: FunMacro) -> Arc<Symbol> {
    let behaviour = Rc::new(behaviour);
    let expander: crate::macsub::MacroExpander = Arc::new(move |symbol, context, invocation| {
        substitute(&behaviour, symbol, context, invocation)
    });
    Symbol::new(
        full_name,
        0,
        Visibility::Public,
        Location::start_of("<intrinsic>"),
        SymbolKind::FunctionMacro(MacroData {
            precedence: 0,
            expander,
        }),
    )
}

fn substitute(
    behaviour: &Rc<FunMacro>,
    symbol: &Arc<Symbol>,
    context: &mut MacsubContext,
    invocation: &MacroInvocation<'_>,
) -> MacroResult {
    let location = invocation.provoker_unit().location.clone();

    if invocation.provoker != 0 {
        return context.error_result(
            format!("{} must begin its statement", symbol.full_name),
            location,
        );
    }

    // Substitute each parameter unit independently.
    let nodes: Vec<AstRef> = invocation.statement.units[invocation.provoker + 1..]
        .iter()
        .map(|unit| context.unit_to_node(unit))
        .collect();

    let mut args = match bind(&behaviour.params, &nodes) {
        Ok(args) => args,
        Err(message) => {
            return context.error_result(
                format!("cannot bind arguments to {}: {message}", symbol.full_name),
                location,
            );
        }
    };

    if let Some(accept) = &behaviour.accept {
        accept(&location, context, &mut args);
    }

    MacroResult::Done(Rc::new(FunmacNode {
        name: symbol.full_name.clone(),
        behaviour: Rc::clone(behaviour),
        args,
        location,
        postprocessed: Cell::new(false),
    }))
}

/// Binds substituted nodes to the parameter list.
fn bind(params: &[ParamSpec], nodes: &[AstRef]) -> Result<Vec<FunmacArg>, String> {
    let mut slots: Vec<FunmacArg> = params
        .iter()
        .map(|param| match param {
            ParamSpec::Named(_, Some(default)) => FunmacArg::Node(Rc::new(crate::ast::LiteralNode {
                value: default.clone(),
                location: Location::start_of("<default>"),
            })),
            _ => FunmacArg::Omitted,
        })
        .collect();

    let positional: Vec<usize> = params
        .iter()
        .enumerate()
        .filter(|(_, p)| matches!(p, ParamSpec::Pos(_)))
        .map(|(ix, _)| ix)
        .collect();
    let mut next_positional = 0usize;

    let mut ix = 0;
    while ix < nodes.len() {
        let keyword = nodes[ix]
            .get_constexpr()
            .map(|v| v.stringify())
            .filter(|s| s.starts_with('-'));

        if let Some(keyword) = keyword {
            let name = &keyword[1..];
            if let Some(slot) = params
                .iter()
                .position(|p| matches!(p, ParamSpec::Bool(n) if *n == name))
            {
                slots[slot] = FunmacArg::ImplicitTrue;
                ix += 1;
                continue;
            }
            if let Some(slot) = params
                .iter()
                .position(|p| matches!(p, ParamSpec::Named(n, _) if *n == name))
            {
                let value = nodes
                    .get(ix + 1)
                    .ok_or_else(|| format!("missing value for -{name}"))?;
                slots[slot] = FunmacArg::Node(Rc::clone(value));
                ix += 2;
                continue;
            }
        }

        let Some(&slot) = positional.get(next_positional) else {
            return Err("too many arguments".to_owned());
        };
        slots[slot] = FunmacArg::Node(Rc::clone(&nodes[ix]));
        next_positional += 1;
        ix += 1;
    }

    if next_positional < positional.len() {
        let missing = params[positional[next_positional]].name();
        return Err(format!("missing argument: {missing}"));
    }

    Ok(slots)
}

/// The AST node produced by a function-like macro.
struct FunmacNode {
    name: String,
    behaviour: Rc<FunMacro>,
    args: Vec<FunmacArg>,
    location: Location,
    postprocessed: Cell<bool>,
}

impl AstNode for FunmacNode {
    fn location(&self) -> &Location {
        &self.location
    }

    fn render(&self) -> String {
        let mut out = self.name.clone();
        for arg in &self.args {
            out.push(' ');
            match arg {
                FunmacArg::Omitted => out.push_str("<omitted>"),
                FunmacArg::ImplicitTrue => out.push_str("<true>"),
                FunmacArg::Node(node) => out.push_str(&node.render()),
            }
        }
        out
    }

    fn postprocess(&self) {
        if self.postprocessed.replace(true) {
            return;
        }
        for arg in &self.args {
            if let FunmacArg::Node(node) = arg {
                node.postprocess();
            }
        }
    }

    fn cg_evaluate(&self, dst: Register, ctx: &mut CodegenContext) {
        match &self.behaviour.cg_evaluate {
            Some(evaluate) => evaluate(Some(dst), ctx, &self.location, &self.args),
            None => ctx.error(CompileError::new(
                format!("{} does not produce a value", self.name),
                self.location.clone(),
            )),
        }
    }

    fn cg_discard(&self, ctx: &mut CodegenContext) {
        match &self.behaviour.cg_discard {
            Some(discard) => discard(None, ctx, &self.location, &self.args),
            None => ctx.error(CompileError::new(
                format!("{} cannot be used as a statement", self.name),
                self.location.clone(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::codegen::SharedErrors;
    use crate::diag::ErrorList;
    use crate::parse::{ParseUnitKind, parse};
    use crate::symtab::SymTab;

    fn run_with_macro(src: &str, behaviour: FunMacro) -> (String, SharedErrors) {
        let errors: SharedErrors = Rc::new(RefCell::new(ErrorList::new()));
        let root = parse(&mut errors.borrow_mut(), src, "test.ava");
        let ParseUnitKind::Block(statements) = &root.kind else {
            panic!("root is a block");
        };
        let mut context =
            MacsubContext::new(SymTab::new(None), Rc::clone(&errors), "test:");
        context.define(funmac_symbol("demo", behaviour));
        let node = context.run(&root.location, statements);
        (node.render(), errors)
    }

    fn spec(params: Vec<ParamSpec>) -> FunMacro {
        FunMacro {
            params,
            accept: None,
            cg_evaluate: None,
            cg_discard: Some(Rc::new(|_, _, _, _| {})),
        }
    }

    #[test]
    fn positional_arguments_bind_in_order() {
        let (rendered, errors) = run_with_macro(
            "demo one two",
            spec(vec![ParamSpec::Pos("a"), ParamSpec::Pos("b")]),
        );
        assert!(errors.borrow().is_empty());
        assert_eq!(rendered, "{demo one two}");
    }

    #[test]
    fn flags_bind_the_true_sentinel() {
        let (rendered, errors) = run_with_macro(
            "demo -loud one",
            spec(vec![ParamSpec::Bool("loud"), ParamSpec::Pos("a")]),
        );
        assert!(errors.borrow().is_empty());
        assert_eq!(rendered, "{demo <true> one}");
    }

    #[test]
    fn omitted_flags_stay_omitted() {
        let (rendered, errors) = run_with_macro(
            "demo one",
            spec(vec![ParamSpec::Bool("loud"), ParamSpec::Pos("a")]),
        );
        assert!(errors.borrow().is_empty());
        assert_eq!(rendered, "{demo <omitted> one}");
    }

    #[test]
    fn named_defaults_apply() {
        let (rendered, errors) = run_with_macro(
            "demo one",
            spec(vec![
                ParamSpec::Named("mode", Some(Value::str("fast"))),
                ParamSpec::Pos("a"),
            ]),
        );
        assert!(errors.borrow().is_empty());
        assert_eq!(rendered, "{demo fast one}");
    }

    #[test]
    fn named_arguments_override_defaults() {
        let (rendered, errors) = run_with_macro(
            "demo -mode slow one",
            spec(vec![
                ParamSpec::Named("mode", Some(Value::str("fast"))),
                ParamSpec::Pos("a"),
            ]),
        );
        assert!(errors.borrow().is_empty());
        assert_eq!(rendered, "{demo slow one}");
    }

    #[test]
    fn excess_arguments_fail_binding() {
        let (_, errors) = run_with_macro("demo one two", spec(vec![ParamSpec::Pos("a")]));
        assert!(
            errors
                .borrow()
                .iter()
                .any(|e| e.message.contains("cannot bind arguments"))
        );
    }

    #[test]
    fn missing_positionals_fail_binding() {
        let (_, errors) = run_with_macro(
            "demo",
            spec(vec![ParamSpec::Pos("a")]),
        );
        assert!(
            errors
                .borrow()
                .iter()
                .any(|e| e.message.contains("cannot bind arguments"))
        );
    }
}
