//! Ambient symbol-resolution scope.
//!
//! Host linking and use-object resolution look names up in "the current
//! scope" without it being passed down explicitly. The scope is per thread:
//! `enter` installs one and the returned guard puts the previous scope back
//! when dropped, whichever way the caller leaves.

use parking_lot::RwLock;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::RenderContext;
use crate::error::RenderError;
use crate::value::Value;

/// Produces the object a template asks for with `{% use %}`.
pub trait UseFactory: Send + Sync {
    fn create(&self, context: &RenderContext, args: &[Value]) -> Result<Value, RenderError>;
}

impl<F> UseFactory for F
where
    F: Fn(&RenderContext, &[Value]) -> Result<Value, RenderError> + Send + Sync,
{
    fn create(&self, context: &RenderContext, args: &[Value]) -> Result<Value, RenderError> {
        self(context, args)
    }
}

/// Named set of resolvable reference paths.
pub struct SymbolScope {
    name: String,
    symbols: RwLock<HashMap<String, Arc<dyn UseFactory>>>,
}

impl SymbolScope {
    pub fn new(name: impl Into<String>) -> Self {
        SymbolScope {
            name: name.into(),
            symbols: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn define(&self, path: impl Into<String>, factory: impl UseFactory + 'static) {
        self.symbols.write().insert(path.into(), Arc::new(factory));
    }

    pub fn with(self, path: impl Into<String>, factory: impl UseFactory + 'static) -> Self {
        self.define(path, factory);
        self
    }

    pub fn resolve(&self, path: &str) -> Option<Arc<dyn UseFactory>> {
        self.symbols.read().get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.symbols.read().contains_key(path)
    }
}

impl fmt::Debug for SymbolScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut paths: Vec<String> = self.symbols.read().keys().cloned().collect();
        paths.sort();
        f.debug_struct("SymbolScope")
            .field("name", &self.name)
            .field("symbols", &paths)
            .finish()
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Arc<SymbolScope>>> = const { RefCell::new(None) };
}

/// The scope installed on this thread, if any.
pub fn current() -> Option<Arc<SymbolScope>> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Install `scope` for this thread until the guard drops.
pub fn enter(scope: Arc<SymbolScope>) -> ScopeGuard {
    let previous = CURRENT.with(|current| current.replace(Some(scope)));
    ScopeGuard {
        previous,
        _not_send: PhantomData,
    }
}

/// Restores the previously installed scope on drop.
#[must_use = "the scope is restored as soon as the guard is dropped"]
pub struct ScopeGuard {
    previous: Option<Arc<SymbolScope>>,
    // Restoring must happen on the thread that entered.
    _not_send: PhantomData<*const ()>,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn same(a: &Option<Arc<SymbolScope>>, b: &Option<Arc<SymbolScope>>) -> bool {
        match (a, b) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    #[test]
    fn test_enter_and_restore_nested() {
        let outer = Arc::new(SymbolScope::new("outer"));
        let inner = Arc::new(SymbolScope::new("inner"));
        let before = current();

        {
            let _outer = enter(outer.clone());
            assert_eq!(current().map(|s| s.name().to_string()).as_deref(), Some("outer"));
            {
                let _inner = enter(inner);
                assert_eq!(current().map(|s| s.name().to_string()).as_deref(), Some("inner"));
            }
            assert!(same(&current(), &Some(outer)));
        }
        assert!(same(&current(), &before));
    }

    #[test]
    fn test_restored_after_panic() {
        let before = current();
        let result = std::panic::catch_unwind(|| {
            let _guard = enter(Arc::new(SymbolScope::new("doomed")));
            panic!("render blew up");
        });
        assert!(result.is_err());
        assert!(same(&current(), &before));
    }

    #[test]
    fn test_scope_is_per_thread() {
        let _guard = enter(Arc::new(SymbolScope::new("main")));
        let seen = std::thread::spawn(|| current().is_none()).join().unwrap();
        assert!(seen);
    }

    #[test]
    fn test_define_and_resolve() {
        let scope = SymbolScope::new("engine").with(
            "com.acme.Model",
            |_: &RenderContext, _: &[Value]| -> Result<Value, RenderError> {
                Ok(Value::from("model"))
            },
        );
        assert!(scope.contains("com.acme.Model"));
        assert!(scope.resolve("com.acme.Other").is_none());
        assert!(format!("{:?}", scope).contains("com.acme.Model"));
    }
}
