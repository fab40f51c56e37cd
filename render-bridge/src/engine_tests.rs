// End-to-end engine tests: compile, gatekeeping, caching and restoration

use std::any::Any;
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use template_compiler::{
    CodegenBackend, CompilationResult, Diagnostic, MarkupCompiler, ScriptIdentity,
    SourceIdentifier, TemplateCompiler, NO_SCRIPT,
};

use crate::bindings::Bindings;
use crate::config::EngineConfig;
use crate::context::{RenderContext, RequestAttributes, RequestSlot, ScriptContext, ScriptModule, FILENAME};
use crate::engine::{EngineParts, ScriptEngine, ScriptSource};
use crate::error::{EngineError, RenderError, Result};
use crate::host::{HostCompilationService, UnitLinker};
use crate::scope::{self, SymbolScope};
use crate::unit::{ExecutableUnit, ProgramUnit};
use crate::value::Value;

#[derive(Default)]
struct CountingHost {
    inner: UnitLinker,
    calls: AtomicUsize,
}

impl CountingHost {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl HostCompilationService for CountingHost {
    fn compile_source(
        &self,
        source: &SourceIdentifier,
        unit_source: &str,
    ) -> Result<Box<dyn Any + Send + Sync>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.compile_source(source, unit_source)
    }
}

/// Host that hands back something other than an executable unit.
struct StringHost;

impl HostCompilationService for StringHost {
    fn compile_source(&self, _: &SourceIdentifier, unit_source: &str) -> Result<Box<dyn Any + Send + Sync>> {
        Ok(Box::new(unit_source.to_string()))
    }
}

/// Markup compiler that keeps every diagnostic it reports.
#[derive(Default)]
struct RecordingCompiler {
    seen: Mutex<Vec<Diagnostic>>,
}

impl TemplateCompiler for RecordingCompiler {
    fn compile(
        &self,
        identity: &ScriptIdentity,
        source: &mut dyn Read,
        backend: &mut dyn CodegenBackend,
    ) -> CompilationResult {
        let result = MarkupCompiler::new().compile(identity, source, backend);
        self.seen.lock().extend(result.all().cloned());
        result
    }
}

fn model_factory(_: &RenderContext, _: &[Value]) -> std::result::Result<Value, RenderError> {
    Ok(Value::from(json!({"title": "From model"})))
}

fn engine_with(config: EngineConfig) -> (ScriptEngine, Arc<CountingHost>) {
    let host = Arc::new(CountingHost::default());
    let parts = EngineParts::new(config).with_host(host.clone());
    parts.scope.define("com.acme.Model", model_factory);
    parts.scope.define("com.acme.x", model_factory);
    parts.extensions.register(
        "upper",
        |_: &RenderContext, args: &[Value]| -> std::result::Result<Value, RenderError> {
            Ok(Value::Str(args[0].to_string().to_uppercase()))
        },
    );
    (ScriptEngine::new(parts), host)
}

fn engine() -> (ScriptEngine, Arc<CountingHost>) {
    engine_with(EngineConfig::default())
}

fn request_context(bindings: serde_json::Value) -> (ScriptContext, Arc<RequestAttributes>) {
    let request = Arc::new(RequestAttributes::new());
    let context = ScriptContext::new(Bindings::from_json(bindings).unwrap())
        .with_request(request.clone());
    (context, request)
}

fn same_scope(a: &Option<Arc<SymbolScope>>, b: &Option<Arc<SymbolScope>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

#[test]
fn test_render_and_rebind_without_recompiling() {
    let (engine, host) = engine();
    let source = ScriptSource::named("/apps/site/hello.html", "<div>${x}</div>");

    let (context, _) = request_context(json!({"x": "hello"}));
    assert_eq!(engine.eval(&source, &context).unwrap(), "<div>hello</div>");

    context.bindings().insert("x", "world");
    assert_eq!(engine.eval(&source, &context).unwrap(), "<div>world</div>");
    assert_eq!(host.calls(), 1);

    let script = engine.compile(&source, None).unwrap();
    let (other, _) = request_context(json!({"x": "again"}));
    assert_eq!(script.eval(&other).unwrap(), "<div>again</div>");
    assert_eq!(script.eval(&other).unwrap(), "<div>again</div>");
    assert_eq!(host.calls(), 2);
}

#[test]
fn test_compile_error_reports_first_error_and_all_diagnostics() {
    let (engine, host) = engine();
    let source = ScriptSource::named("/apps/site/broken.html", "${}\n<p>${ (x }</p>");

    match engine.compile(&source, None) {
        Err(err @ EngineError::Compilation { .. }) => {
            if let EngineError::Compilation {
                script, line, ..
            } = &err
            {
                assert_eq!(script, "/apps/site/broken.html");
                assert_eq!(*line, 2);
            }
            assert_eq!(err.diagnostics().len(), 1);
            assert!(err.diagnostics()[0].is_error());
        }
        other => panic!("expected a compilation error, got {:?}", other),
    }
    assert_eq!(host.calls(), 0);

    let source = ScriptSource::named(
        "/apps/site/mixed.html",
        "${}${ x @ context = 'bogus' }${ y @ context = y }",
    );
    let err = engine.compile(&source, None).unwrap_err();
    assert_eq!(err.diagnostics().len(), 3);
    assert_eq!(err.diagnostics().iter().filter(|d| d.is_error()).count(), 1);
    assert!(err.to_string().contains("string literal"));
}

#[test]
fn test_first_of_several_errors_is_reported() {
    let (engine, host) = engine();
    let source = ScriptSource::named(
        "/apps/site/two.html",
        "${ a @ context = b }\n${ c @ context = d }",
    );
    let err = engine.compile(&source, None).unwrap_err();
    match &err {
        EngineError::Compilation { line, column, .. } => assert_eq!((*line, *column), (1, 8)),
        other => panic!("expected a compilation error, got {:?}", other),
    }
    let positions: Vec<(usize, usize)> = err
        .diagnostics()
        .iter()
        .map(|d| {
            assert!(d.is_error());
            (d.line, d.column)
        })
        .collect();
    assert_eq!(positions, vec![(1, 8), (2, 8)]);
    assert_eq!(host.calls(), 0);
}

#[test]
fn test_warnings_only_still_compile() {
    let (engine, host) = engine();
    let source = ScriptSource::named("/apps/site/warn.html", "<p>${}${ x @ context = 'bogus' }</p>");
    let script = engine.compile(&source, None).unwrap();
    assert_eq!(host.calls(), 1);

    let (context, _) = request_context(json!({"x": "<i>"}));
    assert_eq!(script.eval(&context).unwrap(), "<p>&lt;i&gt;</p>");
}

#[test]
fn test_search_path_references_are_not_imported() {
    let (engine, _) = engine();
    let source = ScriptSource::named(
        "/apps/site/page.html",
        "{% use local = 'apps.site.Helper' %}{% use m = 'com.acme.Model' %}${m.title}",
    );
    let unit_source = engine.generate(&source, None).unwrap();
    let unit: serde_json::Value = serde_json::from_str(&unit_source).unwrap();
    assert_eq!(unit["imports"], json!(["com.acme.Model"]));
    assert_eq!(unit["body"][0]["target"], json!({"kind": "type_ref", "path": "apps.site.Helper"}));
    assert_eq!(unit["body"][1]["target"], json!({"kind": "name", "name": "Model"}));
}

#[test]
fn test_imported_use_object_renders() {
    let (engine, _) = engine();
    let source = ScriptSource::named(
        "/apps/site/model.html",
        "{% use m = 'com.acme.Model' %}<h1>${m.title @ upper}</h1>",
    );
    let (context, _) = request_context(json!({}));
    assert_eq!(engine.eval(&source, &context).unwrap(), "<h1>FROM MODEL</h1>");
}

#[test]
fn test_global_binding_is_not_shadowed_by_import() {
    let (engine, _) = engine();
    let shadowing = ScriptSource::named("/apps/site/x.html", "{% use m = 'com.acme.x' %}${x}");
    let (context, _) = request_context(json!({"x": "global"}));

    let unit_source = engine.generate(&shadowing, Some(&context)).unwrap();
    let unit: serde_json::Value = serde_json::from_str(&unit_source).unwrap();
    assert_eq!(unit["imports"], json!([]));
    assert_eq!(engine.eval(&shadowing, &context).unwrap(), "global");

    // Without a context no binding set exists and the import goes through.
    let unit_source = engine.generate(&shadowing, None).unwrap();
    let unit: serde_json::Value = serde_json::from_str(&unit_source).unwrap();
    assert_eq!(unit["imports"], json!(["com.acme.x"]));

    let plain = ScriptSource::named("/apps/site/y.html", "{% use m = 'com.acme.Model' %}${m.title}");
    let unit_source = engine.generate(&plain, Some(&context)).unwrap();
    let unit: serde_json::Value = serde_json::from_str(&unit_source).unwrap();
    assert_eq!(unit["imports"], json!(["com.acme.Model"]));
}

#[test]
fn test_cached_unit_never_shadows_a_later_global() {
    let (engine, host) = engine();
    let source = ScriptSource::named(
        "/apps/site/late.html",
        "{% use m = 'com.acme.Model' %}${Model}",
    );

    let (without, _) = request_context(json!({}));
    assert_eq!(engine.eval(&source, &without).unwrap(), "com.acme.Model");

    let (with_global, _) = request_context(json!({"Model": "global"}));
    assert_eq!(engine.eval(&source, &with_global).unwrap(), "global");
    assert_eq!(host.calls(), 2);

    let (rebound, _) = request_context(json!({"Model": "rebound"}));
    assert_eq!(engine.eval(&source, &rebound).unwrap(), "rebound");
    assert_eq!(engine.eval(&source, &without).unwrap(), "com.acme.Model");
    assert_eq!(host.calls(), 2);
    assert_eq!(engine.cache().len(), 2);
}

#[test]
fn test_locals_shadowing_globals_are_reported() {
    let compiler = Arc::new(RecordingCompiler::default());
    let engine = ScriptEngine::new(
        EngineParts::new(EngineConfig::default()).with_compiler(compiler.clone()),
    );
    let source = ScriptSource::named(
        "/apps/site/local.html",
        "{% set x = 'local' %}${x}{% for y in list %}{% end %}",
    );
    let (context, _) = request_context(json!({"x": "global", "list": []}));

    assert_eq!(engine.eval(&source, &context).unwrap(), "local");
    let seen = compiler.seen.lock();
    assert_eq!(seen.len(), 1);
    assert!(!seen[0].is_error());
    assert!(seen[0].message.contains("'x' shadows a global"));
    assert_eq!((seen[0].line, seen[0].column), (1, 1));
}

#[test]
fn test_missing_extension_fails_the_render() {
    let (engine, _) = engine();
    let source = ScriptSource::named("/apps/site/i18n.html", "${ 'hello' @ i18n }");
    let (context, _) = request_context(json!({}));
    match engine.eval(&source, &context) {
        Err(EngineError::Render(RenderError::ExtensionNotFound { name })) => {
            assert_eq!(name, "i18n")
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_precompiled_unit_is_reused() {
    let (engine, host) = engine();
    let precompiled = ExecutableUnit::new(ProgramUnit::new(
        "precompiled",
        Default::default(),
        vec![template_compiler::unit_ir::Instr::Text {
            text: "cached".to_string(),
        }],
    ));
    let (context, _) = request_context(json!({}));
    let context = context.with_precompiled_unit(Arc::new(precompiled.clone()));

    // The source is never looked at, so even broken markup is fine.
    let source = ScriptSource::named("/apps/site/pre.html", "${ (");
    let script = engine.compile(&source, Some(&context)).unwrap();
    assert!(script.unit().ptr_eq(&precompiled));
    assert_eq!(engine.eval(&source, &context).unwrap(), "cached");
    assert_eq!(host.calls(), 0);
}

#[test]
fn test_ill_typed_precompiled_unit_is_rejected() {
    let (engine, _) = engine();
    let (context, _) = request_context(json!({}));
    let context = context.with_precompiled_unit(Arc::new(42u32));
    let err = engine.compile(&ScriptSource::new("x"), Some(&context)).unwrap_err();
    assert!(matches!(err, EngineError::InternalInvariant(_)));
}

#[test]
fn test_wrong_host_artifact_is_rejected() {
    let parts = EngineParts::new(EngineConfig::default()).with_host(Arc::new(StringHost));
    let engine = ScriptEngine::new(parts);
    let err = engine.compile(&ScriptSource::new("plain"), None).unwrap_err();
    assert!(matches!(err, EngineError::InternalInvariant(_)));
}

#[test]
fn test_missing_request_fails_before_side_effects() {
    let (engine, host) = engine();
    let context = ScriptContext::new(Bindings::new());
    let err = engine.eval(&ScriptSource::new("x"), &context).unwrap_err();
    assert!(matches!(err, EngineError::MissingContext(_)));
    assert_eq!(host.calls(), 0);
    assert!(engine.cache().is_empty());
}

#[test]
fn test_scope_and_slot_are_restored() {
    let (engine, _) = engine();
    let outer = Arc::new(SymbolScope::new("caller"));
    let _caller = scope::enter(outer.clone());
    let before = scope::current();

    let (context, request) = request_context(json!({"x": 1}));
    let earlier = Bindings::new();
    request.set(earlier.clone());

    let ok = ScriptSource::named("/apps/site/ok.html", "${x}");
    assert_eq!(engine.eval(&ok, &context).unwrap(), "1");
    assert!(same_scope(&scope::current(), &before));
    assert!(request.get().unwrap().same_as(&earlier));

    let broken = ScriptSource::named("/apps/site/bad.html", "${ (x }");
    assert!(engine.eval(&broken, &context).is_err());
    assert!(same_scope(&scope::current(), &before));
    assert!(request.get().unwrap().same_as(&earlier));

    let failing = ScriptSource::named("/apps/site/fail.html", "${ x @ nope }");
    assert!(engine.eval(&failing, &context).is_err());
    assert!(same_scope(&scope::current(), &before));
    assert!(request.get().unwrap().same_as(&earlier));

    request.remove();
    assert!(engine.eval(&ok, &context).is_ok());
    assert!(request.get().is_none());

    assert!(engine.compile(&broken, None).is_err());
    assert!(same_scope(&scope::current(), &Some(outer)));
}

#[test]
fn test_slot_holds_render_bindings_while_rendering() {
    let (engine, _) = engine();
    let (context, request) = request_context(json!({}));
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let slot: Arc<dyn RequestSlot> = request.clone();
    engine.extensions().register(
        "check_slot",
        move |ctx: &RenderContext, _: &[Value]| -> std::result::Result<Value, RenderError> {
            if slot.get().map_or(false, |b| b.same_as(ctx.bindings())) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Value::Null)
        },
    );
    let source = ScriptSource::named("/apps/site/slot.html", "${ '' @ check_slot }");
    engine.eval(&source, &context).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert!(request.get().is_none());
}

#[test]
fn test_identity_resolution_order() {
    let (engine, _) = engine();
    let text = "${}";

    let script = engine.compile(&ScriptSource::named("/apps/explicit.html", text), None).unwrap();
    assert_eq!(script.identity().name(), "/apps/explicit.html");

    let context = ScriptContext::new(Bindings::new()).with_script_path("/apps/from-path.html");
    context.bindings().insert(FILENAME, "/apps/from-binding.html");
    let script = engine.compile(&ScriptSource::new(text), Some(&context)).unwrap();
    assert_eq!(script.identity().name(), "/apps/from-binding.html");

    context.bindings().remove(FILENAME);
    let script = engine.compile(&ScriptSource::new(text), Some(&context)).unwrap();
    assert_eq!(script.identity().name(), "/apps/from-path.html");

    let script = engine.compile(&ScriptSource::new(text), None).unwrap();
    assert_eq!(script.identity(), &ScriptIdentity::no_script());
    assert_eq!(script.identity().name(), NO_SCRIPT);
}

#[test]
fn test_module_loader_provides_use_objects() {
    let (engine, _) = engine();
    let loader = Arc::new(SymbolScope::new("bundle").with(
        "apps.site.Helper",
        |_: &RenderContext, _: &[Value]| -> std::result::Result<Value, RenderError> {
            Ok(Value::from("from bundle"))
        },
    ));
    let (context, _) = request_context(json!({}));
    let context = context.with_script_module(Arc::new(ScriptModule::new("bundle", loader)));
    let source = ScriptSource::named("/apps/site/helper.html", "{% use h = 'apps.site.Helper' %}${h}");
    assert_eq!(engine.eval(&source, &context).unwrap(), "from bundle");
}

#[test]
fn test_keep_generated_writes_unit_source() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig {
        keep_generated: true,
        generated_dir: Some(dir.path().join("units")),
        ..EngineConfig::default()
    };
    let (engine, _) = engine_with(config);
    engine
        .compile(&ScriptSource::named("/apps/site/kept.html", "<b>${x}</b>"), None)
        .unwrap();

    let path = dir
        .path()
        .join("units")
        .join("render_units.apps.site.kept__002e__html.json");
    let written = std::fs::read_to_string(path).unwrap();
    assert!(written.contains("\"script\": \"/apps/site/kept.html\""));
}

#[test]
fn test_concurrent_renders_share_one_unit() {
    let (engine, host) = engine();
    let source = ScriptSource::named("/apps/site/shared.html", "<i>${n}</i>");
    std::thread::scope(|s| {
        for n in 0..8i64 {
            let engine = &engine;
            s.spawn(move || {
                let (context, _) = request_context(json!({ "n": n }));
                for _ in 0..10 {
                    assert_eq!(engine.eval(&source, &context).unwrap(), format!("<i>{}</i>", n));
                }
            });
        }
    });
    assert_eq!(host.calls(), 1);
}
