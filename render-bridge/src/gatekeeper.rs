// Reference policies installed on the codegen backend by the engine
//
// ImportGatekeeper keeps script-local units (anything under a search path)
// out of the import list. GlobalShadowChecker keeps imports from hiding a
// global binding of the same simple name.

use indexmap::IndexSet;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use template_compiler::identity::{make_package, simple_name};
use template_compiler::ReferencePolicy;

use crate::bindings::Bindings;

/// Source of the current script search paths.
pub trait SearchPathProvider: Send + Sync {
    fn search_paths(&self) -> Vec<String>;
}

/// Search paths held in memory; replaceable at runtime.
#[derive(Debug, Default)]
pub struct StaticSearchPaths {
    paths: RwLock<Vec<String>>,
}

impl StaticSearchPaths {
    pub fn new(paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        StaticSearchPaths {
            paths: RwLock::new(paths.into_iter().map(Into::into).collect()),
        }
    }

    pub fn set(&self, paths: Vec<String>) {
        *self.paths.write() = paths;
    }

    pub fn push(&self, path: impl Into<String>) {
        self.paths.write().push(path.into());
    }
}

impl SearchPathProvider for StaticSearchPaths {
    fn search_paths(&self) -> Vec<String> {
        self.paths.read().clone()
    }
}

pub struct ImportGatekeeper {
    provider: Arc<dyn SearchPathProvider>,
}

impl ImportGatekeeper {
    pub fn new(provider: Arc<dyn SearchPathProvider>) -> Self {
        ImportGatekeeper { provider }
    }
}

impl ReferencePolicy for ImportGatekeeper {
    /// Rejects `path` when it lives in the package of a search path. The
    /// provider is asked on every check.
    fn allow(&self, path: &str) -> bool {
        for search_path in self.provider.search_paths() {
            let package = make_package(&search_path);
            if package.is_empty() {
                continue;
            }
            let inside = path
                .strip_prefix(package.as_str())
                .map_or(false, |rest| rest.is_empty() || rest.starts_with('.'));
            if inside {
                debug!(path, search_path = %search_path, "reference is script-local, not importing");
                return false;
            }
        }
        true
    }
}

/// Names bound globally at compile time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalBindingSet {
    names: IndexSet<String>,
}

impl GlobalBindingSet {
    pub fn from_bindings(bindings: &Bindings) -> Self {
        bindings.names().into_iter().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl FromIterator<String> for GlobalBindingSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        GlobalBindingSet {
            names: iter.into_iter().collect(),
        }
    }
}

pub struct GlobalShadowChecker {
    globals: GlobalBindingSet,
}

impl GlobalShadowChecker {
    pub fn new(globals: GlobalBindingSet) -> Self {
        GlobalShadowChecker { globals }
    }
}

impl ReferencePolicy for GlobalShadowChecker {
    fn allow(&self, path: &str) -> bool {
        let name = simple_name(path);
        if self.globals.contains(name) {
            debug!(path, global = name, "import would shadow a global binding");
            return false;
        }
        true
    }
}
