// Compiled-unit cache keyed by script identity and global binding names
//
// INVARIANT:
// - At most one compilation per key is in flight; later callers wait
//   for it and reuse its unit.
// - An entry is reused only while the script source is unchanged.
// - Units compiled against different global names never share an entry;
//   import decisions depend on which globals exist.

use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

use template_compiler::ScriptIdentity;

use crate::error::Result;
use crate::gatekeeper::GlobalBindingSet;
use crate::unit::ExecutableUnit;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    identity: ScriptIdentity,
    globals: u64,
}

struct CachedUnit {
    fingerprint: u64,
    unit: ExecutableUnit,
}

type Slot = Arc<Mutex<Option<CachedUnit>>>;

#[derive(Default)]
pub struct UnitCache {
    entries: Mutex<HashMap<CacheKey, Slot>>,
}

impl UnitCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached unit for `identity` compiled against the same global names if
    /// `source` is unchanged, otherwise the result of `compile` (stored on
    /// success).
    pub fn get_or_compile<F>(
        &self,
        identity: &ScriptIdentity,
        source: &str,
        globals: &GlobalBindingSet,
        compile: F,
    ) -> Result<ExecutableUnit>
    where
        F: FnOnce() -> Result<ExecutableUnit>,
    {
        let key = CacheKey {
            identity: identity.clone(),
            globals: globals_fingerprint(globals),
        };
        let fingerprint = fingerprint(source);
        let slot = self.entries.lock().entry(key).or_default().clone();

        let mut slot = slot.lock();
        if let Some(cached) = slot.as_ref() {
            if cached.fingerprint == fingerprint {
                debug!(script = %identity, "unit cache hit");
                return Ok(cached.unit.clone());
            }
            debug!(script = %identity, "script source changed, recompiling");
        }

        let unit = compile()?;
        *slot = Some(CachedUnit {
            fingerprint,
            unit: unit.clone(),
        });
        Ok(unit)
    }

    /// Drop every entry of `identity`, whatever globals it was compiled with.
    pub fn invalidate(&self, identity: &ScriptIdentity) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| &key.identity != identity);
        entries.len() != before
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of compiled units held.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|slot| slot.lock().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn fingerprint(source: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

// Order-insensitive.
fn globals_fingerprint(globals: &GlobalBindingSet) -> u64 {
    let mut names: Vec<&str> = globals.iter().collect();
    names.sort_unstable();
    let mut hasher = DefaultHasher::new();
    names.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::unit::ProgramUnit;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unit(name: &str) -> ExecutableUnit {
        ExecutableUnit::new(ProgramUnit::new(name, HashMap::new(), vec![]))
    }

    #[test]
    fn test_hit_and_recompile_on_change() {
        let cache = UnitCache::new();
        let id = ScriptIdentity::new("/apps/a.html");
        let none = GlobalBindingSet::default();
        let first = cache.get_or_compile(&id, "v1", &none, || Ok(unit("a"))).unwrap();
        let again = cache
            .get_or_compile(&id, "v1", &none, || panic!("must not recompile"))
            .unwrap();
        assert!(first.ptr_eq(&again));

        let changed = cache.get_or_compile(&id, "v2", &none, || Ok(unit("a2"))).unwrap();
        assert!(!first.ptr_eq(&changed));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failures_are_not_cached() {
        let cache = UnitCache::new();
        let id = ScriptIdentity::new("/apps/b.html");
        let none = GlobalBindingSet::default();
        let err = cache.get_or_compile(&id, "x", &none, || {
            Err(EngineError::InternalInvariant("boom".to_string()))
        });
        assert!(err.is_err());
        assert!(cache.is_empty());
        assert!(cache.get_or_compile(&id, "x", &none, || Ok(unit("b"))).is_ok());
        assert!(cache.invalidate(&id));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_single_compilation_per_identity() {
        let cache = UnitCache::new();
        let id = ScriptIdentity::new("/apps/c.html");
        let none = GlobalBindingSet::default();
        let compilations = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    cache
                        .get_or_compile(&id, "same", &none, || {
                            compilations.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(10));
                            Ok(unit("c"))
                        })
                        .unwrap();
                });
            }
        });
        assert_eq!(compilations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_global_names_select_the_entry() {
        let cache = UnitCache::new();
        let id = ScriptIdentity::new("/apps/d.html");
        let none = GlobalBindingSet::default();
        let model: GlobalBindingSet = vec!["Model".to_string()].into_iter().collect();

        let plain = cache.get_or_compile(&id, "src", &none, || Ok(unit("d"))).unwrap();
        let shadowed = cache
            .get_or_compile(&id, "src", &model, || Ok(unit("d-model")))
            .unwrap();
        assert!(!plain.ptr_eq(&shadowed));
        assert_eq!(cache.len(), 2);

        let reordered: GlobalBindingSet = vec!["b".to_string(), "a".to_string()].into_iter().collect();
        let ordered: GlobalBindingSet = vec!["a".to_string(), "b".to_string()].into_iter().collect();
        let first = cache.get_or_compile(&id, "src", &ordered, || Ok(unit("ab"))).unwrap();
        let again = cache
            .get_or_compile(&id, "src", &reordered, || panic!("must not recompile"))
            .unwrap();
        assert!(first.ptr_eq(&again));

        assert!(cache.invalidate(&id));
        assert!(cache.is_empty());
    }
}
