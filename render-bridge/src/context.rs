// Script and render contexts
//
// ScriptContext is what a host hands the engine: bindings plus optional
// request slot, precompiled unit, script-providing module and script path.
// RenderContext is what an executing unit sees.

use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::bindings::Bindings;
use crate::error::RenderError;
use crate::extension::ExtensionRegistry;
use crate::object_model::ObjectModel;
use crate::scope::SymbolScope;
use crate::value::Value;

/// Binding under which a render publishes its script module's loader.
pub const RENDER_UNIT_LOADER: &str = "render_unit.loader";

/// Binding naming the script being evaluated.
pub const FILENAME: &str = "engine.filename";

/// Per-request storage a host may read bindings from during a render.
pub trait RequestSlot: Send + Sync {
    fn get(&self) -> Option<Bindings>;
    fn set(&self, bindings: Bindings);
    fn remove(&self);
}

/// In-memory request slot.
#[derive(Default)]
pub struct RequestAttributes {
    bindings: Mutex<Option<Bindings>>,
}

impl RequestAttributes {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RequestSlot for RequestAttributes {
    fn get(&self) -> Option<Bindings> {
        self.bindings.lock().clone()
    }

    fn set(&self, bindings: Bindings) {
        *self.bindings.lock() = Some(bindings);
    }

    fn remove(&self) {
        self.bindings.lock().take();
    }
}

/// The module a script was loaded from and the loader it brings along.
#[derive(Debug)]
pub struct ScriptModule {
    name: String,
    loader: Arc<SymbolScope>,
}

impl ScriptModule {
    pub fn new(name: impl Into<String>, loader: Arc<SymbolScope>) -> Self {
        ScriptModule {
            name: name.into(),
            loader,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn loader(&self) -> &Arc<SymbolScope> {
        &self.loader
    }
}

#[derive(Clone, Default)]
pub struct ScriptContext {
    bindings: Bindings,
    request: Option<Arc<dyn RequestSlot>>,
    precompiled_unit: Option<Arc<dyn Any + Send + Sync>>,
    script_module: Option<Arc<ScriptModule>>,
    script_path: Option<String>,
}

impl ScriptContext {
    pub fn new(bindings: Bindings) -> Self {
        ScriptContext {
            bindings,
            ..Self::default()
        }
    }

    pub fn with_request(mut self, request: Arc<dyn RequestSlot>) -> Self {
        self.request = Some(request);
        self
    }

    /// Attach an already compiled unit. Anything other than an
    /// `ExecutableUnit` is rejected when the engine compiles.
    pub fn with_precompiled_unit(mut self, unit: Arc<dyn Any + Send + Sync>) -> Self {
        self.precompiled_unit = Some(unit);
        self
    }

    pub fn with_script_module(mut self, module: Arc<ScriptModule>) -> Self {
        self.script_module = Some(module);
        self
    }

    pub fn with_script_path(mut self, path: impl Into<String>) -> Self {
        self.script_path = Some(path.into());
        self
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn request(&self) -> Option<&Arc<dyn RequestSlot>> {
        self.request.as_ref()
    }

    pub fn precompiled_unit(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.precompiled_unit.as_ref()
    }

    pub fn script_module(&self) -> Option<&Arc<ScriptModule>> {
        self.script_module.as_ref()
    }

    pub fn script_path(&self) -> Option<&str> {
        self.script_path.as_deref()
    }
}

impl fmt::Debug for ScriptContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptContext")
            .field("bindings", &self.bindings)
            .field("request", &self.request.is_some())
            .field("precompiled_unit", &self.precompiled_unit.is_some())
            .field("script_module", &self.script_module.as_ref().map(|m| m.name()))
            .field("script_path", &self.script_path)
            .finish()
    }
}

/// What an executing unit sees: bindings, the object model and extensions.
#[derive(Clone)]
pub struct RenderContext {
    bindings: Bindings,
    extensions: Arc<ExtensionRegistry>,
}

impl RenderContext {
    /// Publishes the script module's loader into the bindings when the
    /// context carries one.
    pub fn new(extensions: Arc<ExtensionRegistry>, script_context: &ScriptContext) -> Self {
        let bindings = script_context.bindings().clone();
        if let Some(module) = script_context.script_module() {
            let loader: Arc<dyn Any + Send + Sync> = module.loader().clone();
            bindings.insert(RENDER_UNIT_LOADER, Value::Object(loader));
        }
        RenderContext {
            bindings,
            extensions,
        }
    }

    pub fn with_bindings(extensions: Arc<ExtensionRegistry>, bindings: Bindings) -> Self {
        RenderContext {
            bindings,
            extensions,
        }
    }

    pub fn object_model(&self) -> &'static ObjectModel {
        ObjectModel::shared()
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    /// Invoke a runtime extension; its result or error is passed through
    /// untouched.
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, RenderError> {
        let extension = self
            .extensions
            .get(name)
            .ok_or_else(|| RenderError::ExtensionNotFound {
                name: name.to_string(),
            })?;
        extension.call(self, args)
    }

    /// Loader published by the script's module, if any.
    pub fn loader(&self) -> Option<Arc<SymbolScope>> {
        self.bindings
            .get(RENDER_UNIT_LOADER)
            .and_then(|value| value.downcast_object::<SymbolScope>())
    }
}
