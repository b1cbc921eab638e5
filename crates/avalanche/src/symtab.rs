//! Scoped, layered symbol table with prefix-based imports.
//!
//! A `SymTab` is an immutable handle onto a chain of scopes. Each scope has
//! a name map (shared structurally between handles derived from the same
//! scope) and a list of import records. Adding an import produces a new
//! handle sharing the underlying name map; inserting a symbol mutates the
//! shared map, so every derived handle observes it.
//!
//! Lookup works outward one scope at a time: first the scope's own names,
//! then, for each scope's import list (strong imports before weak), the
//! name rewritten through any import whose `new_prefix` it starts with.
//! The first stage that yields results wins; more than one distinct result
//! in that stage is an ambiguity for the caller to report.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::symbol::Symbol;

/// One import record: `new_prefix` maps onto `old_prefix`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub new_prefix: String,
    pub old_prefix: String,
    pub is_strong: bool,
}

type NameMap = BTreeMap<String, Arc<Symbol>>;

#[derive(Debug)]
struct Scope {
    parent: Option<SymTab>,
    names: Arc<RefCell<NameMap>>,
    imports: Vec<Import>,
}

/// An immutable symbol-table handle.
#[derive(Debug, Clone)]
pub struct SymTab {
    scope: Arc<Scope>,
}

/// The two results of absolutising an import prefix: the primary
/// resolution and, if the lookup was ambiguous, some other resolution.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Absolutisation {
    pub primary: Option<String>,
    pub ambiguous: Option<String>,
}

impl SymTab {
    /// Creates a fresh scope, optionally nested inside `parent`.
    #[must_use]
    pub fn new(parent: Option<&Self>) -> Self {
        Self {
            scope: Arc::new(Scope {
                parent: parent.cloned(),
                names: Arc::new(RefCell::new(NameMap::new())),
                imports: Vec::new(),
            }),
        }
    }

    /// Inserts a symbol under its full name.
    ///
    /// On a name conflict the map is left unchanged and the previously
    /// bound symbol is returned for the caller to diagnose. Re-inserting
    /// the same symbol is not a conflict.
    pub fn put(&self, symbol: Arc<Symbol>) -> Option<Arc<Symbol>> {
        let mut names = self.scope.names.borrow_mut();
        if let Some(existing) = names.get(&symbol.full_name) {
            if Arc::ptr_eq(existing, &symbol) {
                return None;
            }
            return Some(Arc::clone(existing));
        }
        names.insert(symbol.full_name.clone(), symbol);
        None
    }

    /// Looks `key` up, returning every match of the first stage that
    /// produced any, deduplicated and ordered by full name.
    #[must_use]
    pub fn get(&self, key: &str) -> Vec<Arc<Symbol>> {
        let mut found: BTreeMap<String, Arc<Symbol>> = BTreeMap::new();
        self.search(key, false, &mut |_, symbol| {
            found.entry(symbol.full_name.clone()).or_insert(symbol);
        });
        found.into_values().collect()
    }

    /// Adds an import mapping `new_prefix` onto `old_prefix`.
    ///
    /// Unless `absolute`, `old_prefix` is first absolutised by a prefix
    /// lookup through this table; the outcome is reported back for the
    /// caller to diagnose. Returns an unchanged handle when an identical
    /// import is already present.
    pub fn import(
        &self,
        old_prefix: &str,
        new_prefix: &str,
        absolute: bool,
        is_strong: bool,
    ) -> (Self, Absolutisation) {
        let mut a12n = Absolutisation::default();
        let mut old_prefix = old_prefix.to_owned();

        if !absolute {
            self.search(&old_prefix, true, &mut |effective, _| {
                match &a12n.primary {
                    None => a12n.primary = Some(effective.to_owned()),
                    Some(primary) if primary == effective => {}
                    Some(_) => a12n.ambiguous = Some(effective.to_owned()),
                }
            });
            if let Some(primary) = &a12n.primary {
                old_prefix.clone_from(primary);
            }
        }

        let import = Import {
            new_prefix: new_prefix.to_owned(),
            old_prefix,
            is_strong,
        };
        if self.scope.imports.contains(&import) {
            return (self.clone(), a12n);
        }

        let mut imports = Vec::with_capacity(self.scope.imports.len() + 1);
        imports.push(import);
        imports.extend(self.scope.imports.iter().cloned());

        let derived = Self {
            scope: Arc::new(Scope {
                parent: self.scope.parent.clone(),
                names: Arc::clone(&self.scope.names),
                imports,
            }),
        };
        (derived, a12n)
    }

    /// The staged search described in the module docs. `accept` is called
    /// once per match of the first stage that matches at all; `prefix_only`
    /// matches any symbol whose name starts with the target and reports the
    /// effective name used to find it.
    fn search(&self, target: &str, prefix_only: bool, accept: &mut dyn FnMut(&str, Arc<Symbol>)) {
        let mut name_source = Some(self.clone());
        while let Some(source) = name_source {
            if source.find_local(target, target, prefix_only, accept) {
                return;
            }

            let mut import_source = Some(self.clone());
            while let Some(imports_from) = import_source {
                for strong in [true, false] {
                    let mut any_found = false;
                    for import in &imports_from.scope.imports {
                        if import.is_strong != strong {
                            continue;
                        }
                        let Some(stripped) = target.strip_prefix(import.new_prefix.as_str()) else {
                            continue;
                        };
                        let effective = format!("{}{}", import.old_prefix, stripped);
                        if source.find_local(&effective, &effective, prefix_only, accept) {
                            any_found = true;
                        }
                    }
                    if any_found {
                        return;
                    }
                }
                import_source = imports_from.scope.parent.clone();
            }

            name_source = source.scope.parent.clone();
        }
    }

    /// Looks in this scope's own name map only.
    fn find_local(
        &self,
        effective: &str,
        report_as: &str,
        prefix_only: bool,
        accept: &mut dyn FnMut(&str, Arc<Symbol>),
    ) -> bool {
        let names = self.scope.names.borrow();
        if prefix_only {
            // Any entry whose key extends the prefix counts.
            if let Some((_, symbol)) = names
                .range(effective.to_owned()..)
                .next()
                .filter(|(key, _)| key.starts_with(effective))
            {
                accept(report_as, Arc::clone(symbol));
                return true;
            }
            return false;
        }

        if let Some(symbol) = names.get(effective) {
            accept(report_as, Arc::clone(symbol));
            return true;
        }
        false
    }
}
