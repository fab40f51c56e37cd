// Template compiler: source -> diagnostics + backend commands
// The backend is only fed when parsing and lowering produced no errors.

use std::io::Read;

use tracing::debug;

use crate::backend::CodegenBackend;
use crate::commands::lower_template;
use crate::diagnostics::{CompilationResult, Diagnostic};
use crate::identity::ScriptIdentity;
use crate::surface_parser::parse_template;

/// Compiles template source through a codegen backend.
pub trait TemplateCompiler: Send + Sync {
    fn compile(
        &self,
        identity: &ScriptIdentity,
        source: &mut dyn Read,
        backend: &mut dyn CodegenBackend,
    ) -> CompilationResult;
}

/// Compiler for the `${ }` / `{% %}` markup language.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupCompiler;

impl MarkupCompiler {
    pub fn new() -> Self {
        MarkupCompiler
    }

    pub fn compile_str(
        &self,
        identity: &ScriptIdentity,
        source: &str,
        backend: &mut dyn CodegenBackend,
    ) -> CompilationResult {
        self.compile(identity, &mut source.as_bytes(), backend)
    }
}

impl TemplateCompiler for MarkupCompiler {
    fn compile(
        &self,
        identity: &ScriptIdentity,
        source: &mut dyn Read,
        backend: &mut dyn CodegenBackend,
    ) -> CompilationResult {
        let script_name = identity.name();
        let mut result = CompilationResult::new();

        let mut text = String::new();
        if let Err(e) = source.read_to_string(&mut text) {
            result.push(Diagnostic::error(
                script_name,
                0,
                0,
                format!("unable to read script: {}", e),
            ));
            return result;
        }

        let template = match parse_template(&text) {
            Ok(template) => template,
            Err(e) => {
                result.push(Diagnostic::error(script_name, e.line, e.column, e.message));
                return result;
            }
        };

        let lowered = lower_template(&template, script_name);
        result.extend(lowered.diagnostics);
        for declared in &lowered.declarations {
            if backend.shadows_global(&declared.name) {
                result.push(Diagnostic::warning(
                    script_name,
                    declared.location.line,
                    declared.location.column,
                    format!("variable '{}' shadows a global binding", declared.name),
                ));
            }
        }
        if !result.is_success() {
            return result;
        }

        debug!(
            script = script_name,
            commands = lowered.commands.len(),
            "handing command stream to backend"
        );
        if let Err(e) = backend.handle(lowered.commands) {
            result.push(Diagnostic::error(script_name, 0, 0, e.to_string()));
        }
        result
    }
}
