// Library interface for render-bridge
// Compiles templates through template-compiler, links the generated units
// and renders them against bindings.

pub mod bindings;
pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod extension;
pub mod gatekeeper;
pub mod host;
pub mod object_model;
pub mod scope;
pub mod unit;
pub mod value;

#[cfg(test)]
mod engine_tests;

pub use bindings::Bindings;
pub use config::EngineConfig;
pub use context::{
    RenderContext, RequestAttributes, RequestSlot, ScriptContext, ScriptModule, FILENAME,
    RENDER_UNIT_LOADER,
};
pub use engine::{CompiledScript, EngineParts, ScriptEngine, ScriptSource};
pub use error::{EngineError, RenderError, Result};
pub use extension::{ExtensionRegistry, RuntimeExtension, UseExtension};
pub use gatekeeper::{GlobalShadowChecker, ImportGatekeeper, SearchPathProvider, StaticSearchPaths};
pub use host::{HostCompilationService, UnitLinker};
pub use object_model::ObjectModel;
pub use scope::SymbolScope;
pub use unit::{ExecutableUnit, RenderUnit};
pub use value::Value;
