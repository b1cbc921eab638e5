//! The compilation environment: everything needed to turn a named source
//! file into validated P-Code, repeatedly.
//!
//! An environment ties together the package prefix applied to new symbols,
//! the module and package cache stacks, the pending-load stack used for
//! cycle detection, the source-reading and macro-context behaviours (both
//! swappable), and the list of packages every compiled module implicitly
//! loads. Unlike the contexts it creates, an environment may be used for
//! any number of inputs.

use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::codegen::{SharedErrors, codegen_run};
use crate::diag::{ErrorList, Location};
use crate::linker::{Linker, to_interface};
use crate::macsub::MacsubContext;
use crate::module_cache::{CacheStack, MemoryCache};
use crate::parse::{ParseUnitKind, parse};
use crate::pcode::PcodeObject;
use crate::symtab::SymTab;
use crate::xcode::{XcodeObject, xcode_from_pcode};

/// A module's sources: an ordered map of filename to content.
pub type SourceMap = IndexMap<String, Arc<str>>;

/// Reads the full text of a module by relative name.
pub type ReadSourceFn = Box<dyn Fn(&CompEnv, &str) -> Result<SourceMap, String>>;

/// Creates a fresh macro substitution context for one input.
pub type NewMacsubFn = Box<dyn Fn(&CompEnv, SharedErrors) -> MacsubContext>;

/// The compilation environment.
pub struct CompEnv {
    /// Prefix applied to all symbols of compiled modules, e.g.
    /// `org.ava-lang.avast:`.
    pub package_prefix: String,
    pub package_cache: CacheStack,
    pub module_cache: CacheStack,
    /// Packages implicitly loaded by every compiled module.
    pub implicit_packages: Vec<String>,
    /// Modules whose compilation is in progress; loading one again is a
    /// dependency cycle.
    pending_modules: RefCell<Vec<String>>,
    read_source: ReadSourceFn,
    new_macsub: NewMacsubFn,
}

impl CompEnv {
    /// A new environment with a memory cache per stack, the simple
    /// filesystem source reader rooted at the working directory, and the
    /// minimal (intrinsics-only) macro context.
    #[must_use]
    pub fn new(package_prefix: impl Into<String>) -> Self {
        let mut package_cache = CacheStack::new();
        package_cache.push_bottom(Box::new(MemoryCache::new()));
        let mut module_cache = CacheStack::new();
        module_cache.push_bottom(Box::new(MemoryCache::new()));

        let mut env = Self {
            package_prefix: package_prefix.into(),
            package_cache,
            module_cache,
            implicit_packages: Vec::new(),
            pending_modules: RefCell::new(Vec::new()),
            read_source: Box::new(|_, _| Err("no source reader configured".to_owned())),
            new_macsub: Box::new(|_, _| unreachable!("replaced below")),
        };
        env.use_simple_source_reader("");
        env.use_minimal_macsub();
        env
    }

    /// Reads sources by prepending `prefix` to the input filename and
    /// loading it from the local filesystem.
    pub fn use_simple_source_reader(&mut self, prefix: impl Into<String>) {
        let prefix = prefix.into();
        self.read_source = Box::new(move |_, filename| {
            let path = format!("{prefix}{filename}");
            match fs::read_to_string(Path::new(&path)) {
                Ok(content) => {
                    let mut map = SourceMap::new();
                    map.insert(filename.to_owned(), Arc::from(content.as_str()));
                    Ok(map)
                }
                Err(err) => Err(format!("cannot read {path}: {err}")),
            }
        });
    }

    /// Supplies sources from a fixed in-memory map, for tests and embedded
    /// use.
    pub fn use_fixed_sources(&mut self, sources: SourceMap) {
        self.read_source = Box::new(move |_, filename| match sources.get(filename) {
            Some(content) => {
                let mut map = SourceMap::new();
                map.insert(filename.to_owned(), Arc::clone(content));
                Ok(map)
            }
            None => Err(format!("no such source file: {filename}")),
        });
    }

    /// Creates macro contexts with only the intrinsic expanders; useful
    /// for low-level work and for compiling the core library itself.
    pub fn use_minimal_macsub(&mut self) {
        self.new_macsub = Box::new(|env, errors| {
            MacsubContext::new(SymTab::new(None), errors, env.package_prefix.clone())
        });
    }

    /// Replaces the macro-context factory wholesale, e.g. to inject a
    /// standard-library macro set.
    pub fn set_new_macsub(&mut self, new_macsub: NewMacsubFn) {
        self.new_macsub = new_macsub;
    }

    /// Compiles one source file to validated P-Code and X-Code.
    ///
    /// All errors land in `errors`; compilation succeeded iff nothing was
    /// added. `location` is reported when the module itself cannot be
    /// read.
    pub fn compile_file(
        &self,
        filename: &str,
        errors: &mut ErrorList,
        location: Option<&Location>,
    ) -> (Option<PcodeObject>, Option<XcodeObject>) {
        let sources = match (self.read_source)(self, filename) {
            Ok(sources) => sources,
            Err(message) => {
                let at = location
                    .cloned()
                    .unwrap_or_else(|| Location::start_of(filename));
                errors.error(message, at);
                return (None, None);
            }
        };
        let Some(source) = sources.get(filename).cloned() else {
            errors.error(
                format!("source reader returned no content for {filename}"),
                Location::start_of(filename),
            );
            return (None, None);
        };

        let shared: SharedErrors = Rc::new(RefCell::new(ErrorList::new()));
        let root = parse(&mut shared.borrow_mut(), &source, filename);
        if !shared.borrow().is_empty() {
            drain(&shared, errors);
            return (None, None);
        }

        let ParseUnitKind::Block(statements) = &root.kind else {
            unreachable!("parse roots are blocks");
        };
        let mut macsub = (self.new_macsub)(self, Rc::clone(&shared));
        let ast_root = macsub.run(&root.location, statements);
        ast_root.postprocess();
        if !shared.borrow().is_empty() {
            drain(&shared, errors);
            return (None, None);
        }

        let pcode = codegen_run(ast_root.as_ref(), &self.implicit_packages, &shared);
        if !shared.borrow().is_empty() {
            drain(&shared, errors);
            return (Some(pcode), None);
        }
        drain(&shared, errors);

        let xcode = xcode_from_pcode(&pcode, errors, &sources);
        (Some(pcode), Some(xcode))
    }

    /// Loads a module interface by name, consulting the module cache and
    /// compiling `<name>.ava` on a miss. Detects dependency cycles via the
    /// pending-load stack.
    pub fn load_module(
        &self,
        name: &str,
        errors: &mut ErrorList,
        location: &Location,
    ) -> Option<Arc<PcodeObject>> {
        if self.pending_modules.borrow().iter().any(|m| m == name) {
            errors.error(
                format!("cyclic module dependency involving {name}"),
                location.clone(),
            );
            return None;
        }

        match self.module_cache.get(name) {
            Err(message) => {
                errors.error(message, location.clone());
                return None;
            }
            Ok(Some(found)) => return Some(found),
            Ok(None) => {}
        }

        self.pending_modules.borrow_mut().push(name.to_owned());
        let (pcode, _) = self.compile_file(&format!("{name}.ava"), errors, Some(location));
        self.pending_modules.borrow_mut().pop();

        let pcode = pcode?;
        if !errors.is_empty() {
            return None;
        }
        let interface = Arc::new(to_interface(&pcode));
        self.module_cache.put(name, &interface);
        Some(interface)
    }

    /// Loads a package interface by name from the package cache.
    pub fn load_package(
        &self,
        name: &str,
        errors: &mut ErrorList,
        location: &Location,
    ) -> Option<Arc<PcodeObject>> {
        match self.package_cache.get(name) {
            Err(message) => {
                errors.error(message, location.clone());
                None
            }
            Ok(found) => found,
        }
    }
}

impl std::fmt::Debug for CompEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompEnv")
            .field("package_prefix", &self.package_prefix)
            .field("implicit_packages", &self.implicit_packages)
            .finish_non_exhaustive()
    }
}

fn drain(shared: &SharedErrors, into: &mut ErrorList) {
    into.extend_from(shared.borrow_mut().take());
}

/// Compiles a single module to implementation P-Code.
pub fn compile_module(
    env: &CompEnv,
    filename: &str,
    errors: &mut ErrorList,
) -> Option<PcodeObject> {
    let (pcode, _) = env.compile_file(filename, errors, None);
    if errors.is_empty() { pcode } else { None }
}

/// Reduces implementation P-Code to its interface.
#[must_use]
pub fn make_interface(pcode: &PcodeObject) -> PcodeObject {
    to_interface(pcode)
}

/// Links a set of named modules into one package object.
pub fn make_package(
    modules: impl IntoIterator<Item = (String, PcodeObject)>,
    errors: &mut ErrorList,
) -> Option<PcodeObject> {
    let mut linker = Linker::new();
    for (name, module) in modules {
        linker.add_module(name, module);
    }
    linker.link(errors)
}

/// Links a set of named packages into one application object.
pub fn link_application(
    packages: impl IntoIterator<Item = (String, PcodeObject)>,
    errors: &mut ErrorList,
) -> Option<PcodeObject> {
    let mut linker = Linker::new();
    for (name, package) in packages {
        linker.add_package(name, package);
    }
    linker.link(errors)
}
