//! Script engine: compiles templates into executable units and renders them.
//!
//! Compilation runs inside the engine's symbol scope. The backend the
//! template compiler drives is guarded by the import gatekeeper and, when a
//! context is supplied, by the global shadow checker. Warnings are logged,
//! the first error aborts, and the generated source goes through the host
//! compilation service.

use std::any::Any;
use std::fs;
use std::sync::Arc;
use tracing::{debug, warn};

use template_compiler::{
    CodegenBackend, MarkupCompiler, ReferencePolicies, ScriptIdentity, SourceIdentifier,
    TemplateCompiler, UnitSourceBackend, NO_SCRIPT,
};

use crate::bindings::Bindings;
use crate::cache::UnitCache;
use crate::config::EngineConfig;
use crate::context::{RenderContext, RequestSlot, ScriptContext, FILENAME};
use crate::error::{EngineError, Result};
use crate::extension::ExtensionRegistry;
use crate::gatekeeper::{
    GlobalBindingSet, GlobalShadowChecker, ImportGatekeeper, SearchPathProvider,
    StaticSearchPaths,
};
use crate::host::{HostCompilationService, UnitLinker};
use crate::scope::{self, SymbolScope};
use crate::unit::ExecutableUnit;
use crate::value::Value;

/// Collaborators an engine is wired from.
pub struct EngineParts {
    pub config: EngineConfig,
    pub compiler: Arc<dyn TemplateCompiler>,
    pub host: Arc<dyn HostCompilationService>,
    pub extensions: Arc<ExtensionRegistry>,
    pub search_paths: Arc<dyn SearchPathProvider>,
    pub scope: Arc<SymbolScope>,
}

impl EngineParts {
    /// Markup compiler, unit linker, built-in extensions, the configured
    /// search paths and an empty scope named after the engine.
    pub fn new(config: EngineConfig) -> Self {
        let search_paths = Arc::new(StaticSearchPaths::new(config.search_paths.clone()));
        let scope = Arc::new(SymbolScope::new(config.engine_name.clone()));
        EngineParts {
            config,
            compiler: Arc::new(MarkupCompiler::new()),
            host: Arc::new(UnitLinker::new()),
            extensions: Arc::new(ExtensionRegistry::with_defaults()),
            search_paths,
            scope,
        }
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn TemplateCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn with_host(mut self, host: Arc<dyn HostCompilationService>) -> Self {
        self.host = host;
        self
    }

    pub fn with_extensions(mut self, extensions: Arc<ExtensionRegistry>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_search_paths(mut self, search_paths: Arc<dyn SearchPathProvider>) -> Self {
        self.search_paths = search_paths;
        self
    }

    pub fn with_scope(mut self, scope: Arc<SymbolScope>) -> Self {
        self.scope = scope;
        self
    }
}

/// Template text plus an optional explicit script name.
#[derive(Debug, Clone, Copy)]
pub struct ScriptSource<'a> {
    text: &'a str,
    name: Option<&'a str>,
}

impl<'a> ScriptSource<'a> {
    pub fn new(text: &'a str) -> Self {
        ScriptSource { text, name: None }
    }

    pub fn named(name: &'a str, text: &'a str) -> Self {
        ScriptSource {
            text,
            name: Some(name),
        }
    }

    pub fn text(&self) -> &'a str {
        self.text
    }

    pub fn name(&self) -> Option<&'a str> {
        self.name
    }
}

pub struct ScriptEngine {
    config: EngineConfig,
    compiler: Arc<dyn TemplateCompiler>,
    host: Arc<dyn HostCompilationService>,
    extensions: Arc<ExtensionRegistry>,
    search_paths: Arc<dyn SearchPathProvider>,
    scope: Arc<SymbolScope>,
    cache: UnitCache,
}

impl ScriptEngine {
    pub fn new(parts: EngineParts) -> Self {
        ScriptEngine {
            config: parts.config,
            compiler: parts.compiler,
            host: parts.host,
            extensions: parts.extensions,
            search_paths: parts.search_paths,
            scope: parts.scope,
            cache: UnitCache::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn extensions(&self) -> &Arc<ExtensionRegistry> {
        &self.extensions
    }

    pub fn scope(&self) -> &Arc<SymbolScope> {
        &self.scope
    }

    pub fn cache(&self) -> &UnitCache {
        &self.cache
    }

    /// Compile `source` into a reusable script. Never consults the cache.
    pub fn compile(
        &self,
        source: &ScriptSource<'_>,
        context: Option<&ScriptContext>,
    ) -> Result<CompiledScript> {
        let _scope = scope::enter(self.scope.clone());
        let identity = resolve_identity(source, context);
        let unit = self.compile_unit(&identity, source.text(), context)?;
        Ok(self.compiled(identity, unit))
    }

    /// Compile (through the cache) and render with `context`.
    ///
    /// The context must carry a request slot. While the render runs the slot
    /// holds the render's bindings; its previous content is put back on every
    /// exit path.
    pub fn eval(&self, source: &ScriptSource<'_>, context: &ScriptContext) -> Result<String> {
        let request = context.request().ok_or_else(|| {
            EngineError::MissingContext("script context carries no request".to_string())
        })?;
        let _slot = SlotGuard::replace(request.clone(), context.bindings().clone());

        let script = {
            let _scope = scope::enter(self.scope.clone());
            let identity = resolve_identity(source, Some(context));
            let unit = if context.precompiled_unit().is_some() {
                self.compile_unit(&identity, source.text(), Some(context))?
            } else {
                let globals = GlobalBindingSet::from_bindings(context.bindings());
                self.cache
                    .get_or_compile(&identity, source.text(), &globals, || {
                        self.compile_unit(&identity, source.text(), Some(context))
                    })?
            };
            self.compiled(identity, unit)
        };
        script.eval(context)
    }

    /// Generated unit source for `source`, after gatekeeping, without host
    /// compilation.
    pub fn generate(
        &self,
        source: &ScriptSource<'_>,
        context: Option<&ScriptContext>,
    ) -> Result<String> {
        let _scope = scope::enter(self.scope.clone());
        let identity = resolve_identity(source, context);
        let (_, unit_source) = self.generate_unit_source(&identity, source.text(), context)?;
        Ok(unit_source)
    }

    fn compiled(&self, identity: ScriptIdentity, unit: ExecutableUnit) -> CompiledScript {
        CompiledScript {
            identity,
            unit,
            extensions: self.extensions.clone(),
            scope: self.scope.clone(),
        }
    }

    // Callers hold the engine scope.
    fn compile_unit(
        &self,
        identity: &ScriptIdentity,
        text: &str,
        context: Option<&ScriptContext>,
    ) -> Result<ExecutableUnit> {
        if let Some(precompiled) = context.and_then(|c| c.precompiled_unit()) {
            return match precompiled.downcast_ref::<ExecutableUnit>() {
                Some(unit) => {
                    debug!(script = %identity, "reusing precompiled unit");
                    Ok(unit.clone())
                }
                None => Err(EngineError::InternalInvariant(
                    "Expected a RenderUnit in the precompiled unit attribute".to_string(),
                )),
            };
        }

        let (source_id, unit_source) = self.generate_unit_source(identity, text, context)?;
        let artifact = self.host.compile_source(&source_id, &unit_source)?;
        link_artifact(artifact)
    }

    fn generate_unit_source(
        &self,
        identity: &ScriptIdentity,
        text: &str,
        context: Option<&ScriptContext>,
    ) -> Result<(SourceIdentifier, String)> {
        let mut policies =
            ReferencePolicies::new().with(ImportGatekeeper::new(self.search_paths.clone()));
        let globals = context
            .map(|c| GlobalBindingSet::from_bindings(c.bindings()))
            .unwrap_or_default();
        if context.is_some() {
            policies.push(GlobalShadowChecker::new(globals.clone()));
        }
        let mut backend = UnitSourceBackend::new(policies).with_globals(globals.iter());

        let result = self
            .compiler
            .compile(identity, &mut text.as_bytes(), &mut backend);
        for warning in &result.warnings {
            warn!(
                "Script {} {}:{}: {}",
                warning.script_name, warning.line, warning.column, warning.message
            );
        }
        if let Some(error) = result.first_error() {
            return Err(EngineError::Compilation {
                message: error.message.clone(),
                script: error.script_name.clone(),
                line: error.line,
                column: error.column,
                diagnostics: result.all().cloned().collect(),
            });
        }

        let source_id = SourceIdentifier::new(&self.config.unit_prefix, identity);
        let unit_source = backend
            .build(&source_id)
            .map_err(|e| EngineError::InternalInvariant(format!("codegen backend failed: {}", e)))?;
        debug!(unit = %source_id.fully_qualified_name(), "generated unit source");

        if self.config.keep_generated {
            self.write_generated(&source_id, &unit_source)?;
        }
        Ok((source_id, unit_source))
    }

    fn write_generated(&self, source_id: &SourceIdentifier, unit_source: &str) -> Result<()> {
        let dir = self.config.generated_dir.as_ref().ok_or_else(|| {
            EngineError::Config("keep_generated requires generated_dir".to_string())
        })?;
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", source_id.fully_qualified_name()));
        fs::write(&path, unit_source)?;
        debug!(path = %path.display(), "kept generated unit source");
        Ok(())
    }
}

fn link_artifact(artifact: Box<dyn Any + Send + Sync>) -> Result<ExecutableUnit> {
    match artifact.downcast::<ExecutableUnit>() {
        Ok(unit) => Ok(*unit),
        Err(_) => Err(EngineError::InternalInvariant(
            "host compilation service did not produce an executable unit".to_string(),
        )),
    }
}

/// Explicit source name, then the `FILENAME` binding, then the context's
/// script path, then `NO_SCRIPT`.
fn resolve_identity(source: &ScriptSource<'_>, context: Option<&ScriptContext>) -> ScriptIdentity {
    if let Some(name) = source.name().filter(|n| !n.is_empty() && *n != NO_SCRIPT) {
        return ScriptIdentity::new(name);
    }
    if let Some(context) = context {
        if let Some(Value::Str(name)) = context.bindings().get(FILENAME) {
            if !name.is_empty() {
                return ScriptIdentity::new(name);
            }
        }
        if let Some(path) = context.script_path().filter(|p| !p.is_empty()) {
            return ScriptIdentity::new(path);
        }
    }
    ScriptIdentity::no_script()
}

/// A compiled script bound to the engine's extensions and scope.
#[derive(Clone)]
pub struct CompiledScript {
    identity: ScriptIdentity,
    unit: ExecutableUnit,
    extensions: Arc<ExtensionRegistry>,
    scope: Arc<SymbolScope>,
}

impl CompiledScript {
    pub fn identity(&self) -> &ScriptIdentity {
        &self.identity
    }

    pub fn unit(&self) -> &ExecutableUnit {
        &self.unit
    }

    pub fn eval(&self, context: &ScriptContext) -> Result<String> {
        let _slot = context
            .request()
            .map(|request| SlotGuard::replace(request.clone(), context.bindings().clone()));
        let _scope = scope::enter(self.scope.clone());
        let render_context = RenderContext::new(self.extensions.clone(), context);
        Ok(self.unit.execute(&render_context)?)
    }
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScript")
            .field("identity", &self.identity)
            .field("unit", &self.unit)
            .finish()
    }
}

/// Puts the request slot's previous bindings back on drop.
struct SlotGuard {
    slot: Arc<dyn RequestSlot>,
    previous: Option<Bindings>,
}

impl SlotGuard {
    fn replace(slot: Arc<dyn RequestSlot>, bindings: Bindings) -> Self {
        let previous = slot.get();
        slot.set(bindings);
        SlotGuard { slot, previous }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(previous) => self.slot.set(previous),
            None => self.slot.remove(),
        }
    }
}
