//! Runtime extensions: named functions templates reach through
//! `RenderContext::call`.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::context::RenderContext;
use crate::error::RenderError;
use crate::scope;
use crate::value::Value;

/// Name the `{% use %}` instruction dispatches to.
pub const USE_EXTENSION: &str = "use";

pub trait RuntimeExtension: Send + Sync {
    fn call(&self, context: &RenderContext, args: &[Value]) -> Result<Value, RenderError>;
}

impl<F> RuntimeExtension for F
where
    F: Fn(&RenderContext, &[Value]) -> Result<Value, RenderError> + Send + Sync,
{
    fn call(&self, context: &RenderContext, args: &[Value]) -> Result<Value, RenderError> {
        self(context, args)
    }
}

/// Name -> extension map. Registration may happen while renders read it;
/// a lookup sees either the old or the new entry, never a torn one.
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: RwLock<HashMap<String, Arc<dyn RuntimeExtension>>>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `use` extension.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(USE_EXTENSION, UseExtension);
        registry
    }

    /// Last registration wins; the replaced extension is returned.
    pub fn register(
        &self,
        name: impl Into<String>,
        extension: impl RuntimeExtension + 'static,
    ) -> Option<Arc<dyn RuntimeExtension>> {
        self.register_arc(name, Arc::new(extension))
    }

    pub fn register_arc(
        &self,
        name: impl Into<String>,
        extension: Arc<dyn RuntimeExtension>,
    ) -> Option<Arc<dyn RuntimeExtension>> {
        let name = name.into();
        debug!(extension = %name, "registering runtime extension");
        self.extensions.write().insert(name, extension)
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<dyn RuntimeExtension>> {
        self.extensions.write().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RuntimeExtension>> {
        self.extensions.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.extensions.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.extensions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.read().is_empty()
    }
}

/// Provides use-objects. The first argument is the reference path; the
/// loader published by the script's module is asked first, then the ambient
/// scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct UseExtension;

impl RuntimeExtension for UseExtension {
    fn call(&self, context: &RenderContext, args: &[Value]) -> Result<Value, RenderError> {
        let path = match args.first() {
            Some(Value::Str(path)) => path.as_str(),
            Some(other) => {
                return Err(RenderError::Type(format!(
                    "use expects a reference path, got {:?}",
                    other
                )))
            }
            None => {
                return Err(RenderError::Type(
                    "use expects a reference path".to_string(),
                ))
            }
        };

        let factory = context
            .loader()
            .and_then(|loader| loader.resolve(path))
            .or_else(|| scope::current().and_then(|scope| scope.resolve(path)));

        match factory {
            Some(factory) => factory.create(context, &args[1..]),
            None => Err(RenderError::UseObject {
                path: path.to_string(),
                message: "no provider in scope".to_string(),
            }),
        }
    }
}
