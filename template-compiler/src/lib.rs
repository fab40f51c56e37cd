// Library interface for template-compiler
// Exposes the parser, command lowering and the unit-source codegen backend

pub mod backend;
pub mod commands;
pub mod compiler;
pub mod diagnostics;
pub mod identity;
pub mod surface_parser;
pub mod unit_ir;

mod error;

pub use backend::{CodegenBackend, ReferencePolicies, ReferencePolicy, UnitSourceBackend};
pub use compiler::{MarkupCompiler, TemplateCompiler};
pub use diagnostics::{CompilationResult, Diagnostic, DiagnosticKind};
pub use error::{Error, Result};
pub use identity::{ScriptIdentity, SourceIdentifier, NO_SCRIPT};
