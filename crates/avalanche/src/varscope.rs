//! Local-variable accounting for one function scope.
//!
//! A varscope tracks the locals a function declares and the outer variables
//! it captures. Captures come first in the variable file, so a local's
//! final index shifts as captures are discovered; indices are therefore
//! only read once the scope is complete. When scope A references scope B
//! (a nested function using its enclosure), every capture added to B is
//! propagated into A as well.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::symbol::Symbol;

#[derive(Debug, Default)]
struct Inner {
    locals: IndexMap<usize, (Arc<Symbol>, u32)>,
    captures: IndexMap<usize, (Arc<Symbol>, u32)>,
    referrers: Vec<VarScope>,
}

fn key_of(symbol: &Arc<Symbol>) -> usize {
    Arc::as_ptr(symbol) as usize
}

/// A shared, mutable variable scope.
#[derive(Debug, Clone, Default)]
pub struct VarScope {
    inner: Rc<RefCell<Inner>>,
}

impl VarScope {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a local variable. The symbol must not already be in any
    /// varscope.
    pub fn put_local(&self, symbol: &Arc<Symbol>) {
        let mut inner = self.inner.borrow_mut();
        let offset = u32::try_from(inner.locals.len()).unwrap_or(u32::MAX);
        let previous = inner
            .locals
            .insert(key_of(symbol), (Arc::clone(symbol), offset));
        assert!(previous.is_none(), "symbol declared twice in one varscope");
    }

    /// Notes a reference to `symbol` from within this scope, capturing it
    /// (and propagating the capture to referring scopes) when it is not
    /// already local or captured.
    pub fn ref_var(&self, symbol: &Arc<Symbol>) {
        {
            let inner = self.inner.borrow();
            if inner.locals.contains_key(&key_of(symbol))
                || inner.captures.contains_key(&key_of(symbol))
            {
                return;
            }
        }

        let referrers: Vec<VarScope> = {
            let mut inner = self.inner.borrow_mut();
            let offset = u32::try_from(inner.captures.len()).unwrap_or(u32::MAX);
            inner
                .captures
                .insert(key_of(symbol), (Arc::clone(symbol), offset));
            inner.referrers.clone()
        };
        for referrer in referrers {
            referrer.ref_var(symbol);
        }
    }

    /// Marks `referrer` as embedding this scope: captures here become
    /// captures there.
    pub fn ref_scope(&self, referrer: &Self) {
        let captures: Vec<Arc<Symbol>> = {
            let mut inner = self.inner.borrow_mut();
            inner.referrers.push(referrer.clone());
            inner
                .captures
                .values()
                .map(|(symbol, _)| Arc::clone(symbol))
                .collect()
        };
        for capture in captures {
            referrer.ref_var(&capture);
        }
    }

    /// The final variable-file index of `symbol`: captures first, then
    /// locals.
    #[must_use]
    pub fn index_of(&self, symbol: &Arc<Symbol>) -> Option<u32> {
        let inner = self.inner.borrow();
        if let Some((_, offset)) = inner.captures.get(&key_of(symbol)) {
            return Some(*offset);
        }
        inner.locals.get(&key_of(symbol)).map(|(_, offset)| {
            offset + u32::try_from(inner.captures.len()).unwrap_or(0)
        })
    }

    #[must_use]
    pub fn num_captures(&self) -> usize {
        self.inner.borrow().captures.len()
    }

    #[must_use]
    pub fn num_vars(&self) -> usize {
        let inner = self.inner.borrow();
        inner.captures.len() + inner.locals.len()
    }

    /// Variable names in file order, for emitting a `fun` record.
    #[must_use]
    pub fn var_names(&self) -> Vec<String> {
        let inner = self.inner.borrow();
        inner
            .captures
            .values()
            .chain(inner.locals.values())
            .map(|(symbol, _)| symbol.full_name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Location;
    use crate::symbol::{SymbolKind, Visibility};

    fn local(name: &str) -> Arc<Symbol> {
        Symbol::new(
            name,
            1,
            Visibility::Private,
            Location::unknown(),
            SymbolKind::LocalVariable,
        )
    }

    #[test]
    fn locals_index_after_captures() {
        let scope = VarScope::new();
        let a = local("a");
        let outer = local("outer");
        scope.put_local(&a);
        assert_eq!(scope.index_of(&a), Some(0));

        scope.ref_var(&outer);
        assert_eq!(scope.index_of(&outer), Some(0));
        assert_eq!(scope.index_of(&a), Some(1));
    }

    #[test]
    fn captures_propagate_to_referrers() {
        let inner = VarScope::new();
        let outer_scope = VarScope::new();
        inner.ref_scope(&outer_scope);

        let captured = local("captured");
        inner.ref_var(&captured);
        assert!(outer_scope.index_of(&captured).is_some());
    }
}
