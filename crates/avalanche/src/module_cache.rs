//! Caching of compiled module and package objects.
//!
//! A cache level may support reading, writing, or both; a [`CacheStack`] is
//! ordered from hottest to coldest (process intrinsics, then memory, then
//! read-only disk caches, then a writable cache). Hits found lower in the
//! stack are propagated into every level above them. Writes may fail
//! silently, but each individual write is atomic: afterwards the name maps
//! to the stored object or the level is unchanged.
//!
//! Modules and packages use the same machinery but always live in two
//! distinct stacks.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::pcode::PcodeObject;

/// One cache level.
pub trait ModuleCache {
    /// Retrieves an object. `Ok(None)` means the level does not have it;
    /// `Err` means it may have it but could not load it, which aborts the
    /// lookup.
    fn get(&self, name: &str) -> Result<Option<Arc<PcodeObject>>, String> {
        let _ = name;
        Ok(None)
    }

    /// Stores an object. Levels that do not support writing simply ignore
    /// the call; failures must be silent and atomic.
    fn put(&self, name: &str, object: &Arc<PcodeObject>) {
        let _ = (name, object);
    }
}

/// A stack of cache levels, hottest first.
#[derive(Default)]
pub struct CacheStack {
    levels: Vec<Box<dyn ModuleCache>>,
}

impl CacheStack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a level below every existing one.
    pub fn push_bottom(&mut self, level: Box<dyn ModuleCache>) {
        self.levels.push(level);
    }

    /// Pushes a level above every existing one.
    pub fn push_top(&mut self, level: Box<dyn ModuleCache>) {
        self.levels.insert(0, level);
    }

    /// Finds the first level holding `name`, propagating a hit into every
    /// level above it.
    pub fn get(&self, name: &str) -> Result<Option<Arc<PcodeObject>>, String> {
        for (ix, level) in self.levels.iter().enumerate() {
            if let Some(found) = level.get(name)? {
                for warmer in &self.levels[..ix] {
                    warmer.put(name, &found);
                }
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Stores `object` into every level of the stack.
    pub fn put(&self, name: &str, object: &Arc<PcodeObject>) {
        for level in &self.levels {
            level.put(name, object);
        }
    }
}

impl std::fmt::Debug for CacheStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStack")
            .field("levels", &self.levels.len())
            .finish()
    }
}

/// The memory-backed cache level: an ordered map keyed by name.
#[derive(Default)]
pub struct MemoryCache {
    entries: RefCell<BTreeMap<String, Arc<PcodeObject>>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModuleCache for MemoryCache {
    fn get(&self, name: &str) -> Result<Option<Arc<PcodeObject>>, String> {
        Ok(self.entries.borrow().get(name).cloned())
    }

    fn put(&self, name: &str, object: &Arc<PcodeObject>) {
        // An existing entry is kept; either outcome is permitted.
        self.entries
            .borrow_mut()
            .entry(name.to_owned())
            .or_insert_with(|| Arc::clone(object));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcode::Global;

    fn object(tag: &str) -> Arc<PcodeObject> {
        Arc::new(PcodeObject {
            globals: vec![Global::LoadMod {
                name: tag.to_owned(),
            }],
        })
    }

    /// A read-only level that records nothing and reports a fixed set.
    struct Fixed(BTreeMap<String, Arc<PcodeObject>>);

    impl ModuleCache for Fixed {
        fn get(&self, name: &str) -> Result<Option<Arc<PcodeObject>>, String> {
            Ok(self.0.get(name).cloned())
        }
    }

    /// A level that always fails to load.
    struct Broken;

    impl ModuleCache for Broken {
        fn get(&self, _name: &str) -> Result<Option<Arc<PcodeObject>>, String> {
            Err("disk on fire".to_owned())
        }
    }

    #[test]
    fn memory_cache_round_trips() {
        let cache = MemoryCache::new();
        assert!(cache.get("m").unwrap().is_none());
        let obj = object("m");
        cache.put("m", &obj);
        assert!(Arc::ptr_eq(&cache.get("m").unwrap().unwrap(), &obj));
    }

    /// Shares a memory cache so the test can probe a level after the stack
    /// has taken ownership of it.
    struct Shared(Arc<MemoryCache>);

    impl ModuleCache for Shared {
        fn get(&self, name: &str) -> Result<Option<Arc<PcodeObject>>, String> {
            self.0.get(name)
        }

        fn put(&self, name: &str, obj: &Arc<PcodeObject>) {
            self.0.put(name, obj);
        }
    }

    #[test]
    fn hits_propagate_into_warmer_levels() {
        let warm = Arc::new(MemoryCache::new());
        let mut cold_map = BTreeMap::new();
        let obj = object("mod");
        cold_map.insert("mod".to_owned(), Arc::clone(&obj));

        let mut stack = CacheStack::new();
        stack.push_bottom(Box::new(Shared(Arc::clone(&warm))));
        stack.push_bottom(Box::new(Fixed(cold_map)));

        assert!(warm.get("mod").unwrap().is_none());
        assert!(Arc::ptr_eq(&stack.get("mod").unwrap().unwrap(), &obj));
        assert!(warm.get("mod").unwrap().is_some());
    }

    #[test]
    fn put_reaches_every_level() {
        let mut stack = CacheStack::new();
        stack.push_bottom(Box::new(MemoryCache::new()));
        stack.push_bottom(Box::new(MemoryCache::new()));
        let obj = object("x");
        stack.put("x", &obj);
        assert!(stack.get("x").unwrap().is_some());
    }

    #[test]
    fn level_errors_abort_the_walk() {
        let mut stack = CacheStack::new();
        stack.push_bottom(Box::new(Broken));
        stack.push_bottom(Box::new(MemoryCache::new()));
        assert!(stack.get("anything").is_err());
    }

    #[test]
    fn misses_fall_through_the_whole_stack() {
        let mut stack = CacheStack::new();
        stack.push_bottom(Box::new(MemoryCache::new()));
        assert!(stack.get("absent").unwrap().is_none());
    }
}
