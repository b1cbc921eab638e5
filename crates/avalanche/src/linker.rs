//! Linking P-Code objects and reducing them to interfaces.
//!
//! The linker accumulates named modules and named packages (two separate
//! namespaces) and merges them into a single object: inputs are
//! concatenated in dependency order, entities participating in linkage are
//! deduplicated onto one canonical record per linkage name, every global
//! reference is rewritten accordingly, and the surviving records are
//! compacted. All inputs are assumed to be already-validated P-Code.

use std::collections::BTreeMap;

use ahash::AHashMap;

use crate::diag::{ErrorList, Location};
use crate::pcode::{Global, Instr, PcodeObject, SrcPos};

/// Reduces an object to its externally visible interface.
///
/// Exported `var`/`fun` records become `ext-var`/`ext-fun`; `macro` and
/// `export` records survive unconditionally; `decl-sxt` and `ext-*` records
/// survive only when exported; `src-pos` survives only when a retained
/// record follows it before the next `src-pos`; `load-*`, `init` and
/// everything private is dropped.
#[must_use]
pub fn to_interface(pcode: &PcodeObject) -> PcodeObject {
    let len = pcode.len();
    let mut exported = vec![false; len];
    for global in &pcode.globals {
        if let Global::Export { global: target, .. } = global
            && let Ok(ix) = usize::try_from(*target)
            && ix < len
        {
            exported[ix] = true;
        }
    }

    // Decide retention, non-src-pos records first.
    let mut keep = vec![false; len];
    for (ix, global) in pcode.globals.iter().enumerate() {
        keep[ix] = match global {
            Global::SrcPos(_) => false, // second pass
            Global::Var { .. }
            | Global::Fun(_)
            | Global::ExtVar { .. }
            | Global::ExtFun { .. }
            | Global::DeclSxt { .. } => exported[ix],
            Global::Export { .. } | Global::Macro { .. } => true,
            Global::LoadPkg { .. } | Global::LoadMod { .. } | Global::Init { .. } => false,
        };
    }
    for (ix, global) in pcode.globals.iter().enumerate() {
        if !matches!(global, Global::SrcPos(_)) {
            continue;
        }
        // Keep only when something retained follows before the next
        // src-pos.
        for following in ix + 1..len {
            if matches!(pcode.globals[following], Global::SrcPos(_)) {
                break;
            }
            if keep[following] {
                keep[ix] = true;
                break;
            }
        }
    }

    let mut index_map: Vec<Option<i64>> = vec![None; len];
    let mut out = PcodeObject::new();
    for (ix, global) in pcode.globals.iter().enumerate() {
        if !keep[ix] {
            continue;
        }
        index_map[ix] = Some(i64::try_from(out.len()).unwrap_or(0));
        let record = match global {
            Global::Fun(fun) => Global::ExtFun {
                name: fun.name.clone(),
                prototype: fun.prototype.clone(),
            },
            Global::Var { name, .. } => Global::ExtVar { name: name.clone() },
            other => other.clone(),
        };
        out.globals.push(record);
    }

    for record in &mut out.globals {
        for reference in record.global_refs_mut() {
            if let Ok(ix) = usize::try_from(*reference)
                && let Some(Some(new)) = index_map.get(ix)
            {
                *reference = *new;
            }
        }
    }

    out
}

#[derive(Debug)]
struct LinkerEntry {
    pcode: PcodeObject,
    consumed: bool,
}

/// Accumulates one link's inputs; each instance produces one output.
#[derive(Debug, Default)]
pub struct Linker {
    packages: BTreeMap<String, LinkerEntry>,
    modules: BTreeMap<String, LinkerEntry>,
    duplicate_name: Option<String>,
}

impl Linker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module; inputs may arrive in any order.
    pub fn add_module(&mut self, name: impl Into<String>, module: PcodeObject) {
        let name = name.into();
        if self
            .modules
            .insert(
                name.clone(),
                LinkerEntry {
                    pcode: module,
                    consumed: false,
                },
            )
            .is_some()
        {
            self.duplicate_name = Some(name);
        }
    }

    /// Adds a package; packages and modules are separate namespaces.
    pub fn add_package(&mut self, name: impl Into<String>, package: PcodeObject) {
        let name = name.into();
        if self
            .packages
            .insert(
                name.clone(),
                LinkerEntry {
                    pcode: package,
                    consumed: false,
                },
            )
            .is_some()
        {
            self.duplicate_name = Some(name);
        }
    }

    /// Links everything added so far into one object.
    ///
    /// Returns `None` and reports errors on duplicate linkage definitions
    /// or duplicate input names.
    pub fn link(&mut self, errors: &mut ErrorList) -> Option<PcodeObject> {
        if let Some(name) = &self.duplicate_name {
            errors.error(
                format!("module or package added more than once: {name}"),
                linker_location(),
            );
        }

        let mut slots: Vec<Option<Global>> = Vec::new();
        let package_names: Vec<String> = self.packages.keys().cloned().collect();
        for name in package_names {
            self.concat_package(&name, &mut slots);
        }
        let module_names: Vec<String> = self.modules.keys().cloned().collect();
        for name in module_names {
            self.concat_module(&name, &mut slots);
        }

        let canonical = select_canonical(&slots, errors);
        relink_canonical(&mut slots, &canonical);
        delete_noncanonical(&mut slots, &canonical);

        if !errors.is_empty() {
            return None;
        }
        Some(compact(slots))
    }

    fn concat_package(&mut self, name: &str, slots: &mut Vec<Option<Global>>) -> bool {
        match self.packages.get_mut(name) {
            None => false,
            Some(entry) if entry.consumed => true,
            Some(entry) => {
                entry.consumed = true;
                let pcode = entry.pcode.clone();
                self.concat_object(&pcode, slots);
                true
            }
        }
    }

    fn concat_module(&mut self, name: &str, slots: &mut Vec<Option<Global>>) -> bool {
        match self.modules.get_mut(name) {
            None => false,
            Some(entry) if entry.consumed => true,
            Some(entry) => {
                entry.consumed = true;
                let pcode = entry.pcode.clone();
                self.concat_object(&pcode, slots);
                true
            }
        }
    }

    /// Copies `pcode` into the output slots, pulling its dependencies in
    /// first and dropping the `load-*` records they satisfy.
    fn concat_object(&mut self, pcode: &PcodeObject, slots: &mut Vec<Option<Global>>) {
        let len = pcode.len();
        let mut discard = vec![false; len];

        for (ix, global) in pcode.globals.iter().enumerate() {
            if let Global::LoadPkg { name } = global
                && self.concat_package(name, slots)
            {
                discard[ix] = true;
            }
        }
        for (ix, global) in pcode.globals.iter().enumerate() {
            if let Global::LoadMod { name } = global
                && self.concat_module(name, slots)
            {
                discard[ix] = true;
            }
        }

        let object_base = i64::try_from(slots.len()).unwrap_or(0);
        for (ix, global) in pcode.globals.iter().enumerate() {
            // Non-reexported exports are dropped at link time.
            let dropped = discard[ix]
                || matches!(global, Global::Export { reexport: false, .. });
            if dropped {
                slots.push(None);
                continue;
            }

            let mut record = global.clone();
            for reference in record.global_refs_mut() {
                *reference += object_base;
            }
            if let Global::Fun(fun) = &mut record {
                for instr in &mut fun.body {
                    for reference in instr.global_refs_mut() {
                        *reference += object_base;
                    }
                }
            }
            slots.push(Some(record));
        }
    }
}

fn linker_location() -> Location {
    Location::start_of("<linker-input>")
}

/// Chooses one canonical slot per linkage name: definitions first (a second
/// definition under one name is an error), then first occurrence wins.
fn select_canonical(slots: &[Option<Global>], errors: &mut ErrorList) -> AHashMap<String, usize> {
    let mut canonical: AHashMap<String, usize> = AHashMap::new();
    let mut location = linker_location();

    for (ix, slot) in slots.iter().enumerate() {
        let Some(global) = slot else { continue };
        update_location(&mut location, global);
        if global.is_linkage_definition() && global.participates_in_linkage() {
            let name = global.linkage_name().expect("definitions are named");
            if canonical.contains_key(&name.key()) {
                errors.error(
                    format!("symbol redefined: {}", describe(&name)),
                    location.clone(),
                );
            } else {
                canonical.insert(name.key(), ix);
            }
        }
    }

    for (ix, slot) in slots.iter().enumerate() {
        let Some(global) = slot else { continue };
        if global.participates_in_linkage()
            && let Some(name) = global.linkage_name()
        {
            canonical.entry(name.key()).or_insert(ix);
        }
    }

    canonical
}

fn describe(name: &crate::pcode::LinkageName) -> String {
    match name {
        crate::pcode::LinkageName::Entity(demangled) => demangled.name.clone(),
        crate::pcode::LinkageName::Export(name) => name.clone(),
    }
}

fn update_location(location: &mut Location, global: &Global) {
    if let Global::SrcPos(pos) = global {
        *location = srcpos_location(pos);
    }
}

fn srcpos_location(pos: &SrcPos) -> Location {
    let clamp = |v: i64| usize::try_from(v).unwrap_or(0);
    Location {
        filename: std::sync::Arc::from(pos.filename.as_str()),
        source: None,
        line_offset: clamp(pos.line_offset),
        start_line: clamp(pos.start_line),
        end_line: clamp(pos.end_line),
        start_column: clamp(pos.start_column),
        end_column: clamp(pos.end_column),
    }
}

/// Rewrites every reference to a participating entity onto its canonical
/// index.
fn relink_canonical(slots: &mut [Option<Global>], canonical: &AHashMap<String, usize>) {
    let resolve: Vec<i64> = (0..slots.len())
        .map(|ix| {
            let Some(global) = &slots[ix] else {
                return i64::try_from(ix).unwrap_or(0);
            };
            canonical_of(global, ix, canonical)
        })
        .collect();

    for slot in slots.iter_mut() {
        let Some(global) = slot else { continue };
        for reference in global.global_refs_mut() {
            if let Ok(ix) = usize::try_from(*reference)
                && ix < resolve.len()
            {
                *reference = resolve[ix];
            }
        }
        if let Global::Fun(fun) = global {
            for instr in &mut fun.body {
                for reference in instr.global_refs_mut() {
                    if let Ok(ix) = usize::try_from(*reference)
                        && ix < resolve.len()
                    {
                        *reference = resolve[ix];
                    }
                }
            }
        }
    }
}

fn canonical_of(global: &Global, ix: usize, canonical: &AHashMap<String, usize>) -> i64 {
    if !global.participates_in_linkage() {
        return i64::try_from(ix).unwrap_or(0);
    }
    let Some(name) = global.linkage_name() else {
        return i64::try_from(ix).unwrap_or(0);
    };
    let target = canonical.get(&name.key()).copied().unwrap_or(ix);
    i64::try_from(target).unwrap_or(0)
}

/// Clears every participating slot that is not its name's canonical one.
fn delete_noncanonical(slots: &mut [Option<Global>], canonical: &AHashMap<String, usize>) {
    for ix in 0..slots.len() {
        let Some(global) = &slots[ix] else { continue };
        if global.participates_in_linkage()
            && canonical_of(global, ix, canonical) != i64::try_from(ix).unwrap_or(0)
        {
            slots[ix] = None;
        }
    }
}

/// Removes the cleared slots, rewriting references through the index map.
fn compact(slots: Vec<Option<Global>>) -> PcodeObject {
    let mut index_map: Vec<Option<i64>> = vec![None; slots.len()];
    let mut next = 0i64;
    for (ix, slot) in slots.iter().enumerate() {
        if slot.is_some() {
            index_map[ix] = Some(next);
            next += 1;
        }
    }

    let mut out = PcodeObject::new();
    for slot in slots {
        let Some(mut global) = slot else { continue };
        for reference in global.global_refs_mut() {
            remap(reference, &index_map);
        }
        if let Global::Fun(fun) = &mut global {
            for instr in &mut fun.body {
                for reference in instr.global_refs_mut() {
                    remap(reference, &index_map);
                }
            }
        }
        out.globals.push(global);
    }
    out
}

fn remap(reference: &mut i64, index_map: &[Option<i64>]) {
    if let Ok(ix) = usize::try_from(*reference)
        && let Some(Some(new)) = index_map.get(ix)
    {
        *reference = *new;
    }
}

/// The instruction-level references of a `fun` body, for callers that need
/// to inspect them without recursing by hand.
#[must_use]
pub fn body_refs(body: &[Instr]) -> Vec<i64> {
    body.iter().flat_map(|i| i.global_refs()).collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::pcode::text::{emit_object, parse_object};

    fn pc(text: &str) -> PcodeObject {
        parse_object(text).expect("test input parses")
    }

    fn interface_like(expected: &str, input: &str) {
        let reduced = to_interface(&pc(input));
        assert_eq!(emit_object(&reduced), emit_object(&pc(expected)));
    }

    #[test]
    fn empty_object_yields_empty_interface() {
        assert!(to_interface(&pc("")).is_empty());
    }

    #[test]
    fn unexported_module_yields_empty_interface() {
        let input = "\
[src-pos source.ava 0 1 1 1 1]
[init 2]
[fun false [ava module:init] [ava pos] [\"\"] [[ret v0]]]
[var true [ava SOME-CONST]]
[ext-var [ava some-ext-var]]
[ext-fun [ava some-ext-fun] [ava pos pos]]
";
        assert!(to_interface(&pc(input)).is_empty());
    }

    #[test]
    fn interface_changes_definitions_to_externals() {
        interface_like(
            "[src-pos source.ava 0 1 1 1 1]\n[export 2 true foo]\n[ext-var [ava foo]]\n",
            "[src-pos source.ava 0 1 1 1 1]\n[export 2 true foo]\n[var true [ava foo]]\n",
        );
        interface_like(
            "[src-pos source.ava 0 1 1 1 1]\n[export 2 true bar]\n[ext-fun [ava bar] [ava pos pos]]\n",
            "[src-pos source.ava 0 1 1 1 1]\n[export 2 true bar]\n\
             [fun true [ava bar] [ava pos pos] [x y] [[ret v0]]]\n",
        );
    }

    #[test]
    fn interface_relinks_global_references() {
        interface_like(
            "[export 1 true bar]\n[ext-var [ava bar]]\n",
            "[var false [ava private]]\n[export 2 true bar]\n[var true [ava bar]]\n",
        );
    }

    #[test]
    fn interface_drops_redundant_src_pos() {
        interface_like(
            "[src-pos source.ava 1 2 2 2 2]\n[macro true foo 5 0 [die]]\n",
            "[src-pos source.ava 0 1 1 1 1]\n[var false [ava private]]\n\
             [src-pos source.ava 1 2 2 2 2]\n[macro true foo 5 0 [die]]\n",
        );
        interface_like(
            "[macro true foo 5 0 [die]]\n",
            "[macro true foo 5 0 [die]]\n[src-pos source.ava 0 1 1 1 1]\n\
             [var false [ava private]]\n",
        );
    }

    #[test]
    fn interface_extraction_is_idempotent() {
        let input = pc(
            "[src-pos source.ava 0 1 1 1 1]\n[export 2 true foo]\n[var true [ava foo]]\n\
             [macro false m 5 0 [die]]\n[decl-sxt true [[struct s] [value v]]]\n[export 4 false s]\n",
        );
        let once = to_interface(&input);
        let twice = to_interface(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn duplicate_module_names_fail_the_link() {
        let mut linker = Linker::new();
        linker.add_module("foo", pc(""));
        linker.add_module("foo", pc(""));
        let mut errors = ErrorList::new();
        assert!(linker.link(&mut errors).is_none());
        assert!(!errors.is_empty());
    }

    #[test]
    fn modules_and_packages_are_separate_namespaces() {
        let mut linker = Linker::new();
        linker.add_module("foo", pc(""));
        linker.add_package("foo", pc(""));
        let mut errors = ErrorList::new();
        assert!(linker.link(&mut errors).is_some());
        assert!(errors.is_empty());
    }
}
