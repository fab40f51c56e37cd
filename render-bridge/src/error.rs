// Error types for compiling and rendering scripts

use template_compiler::Diagnostic;
use thiserror::Error;

/// Failures raised while a unit renders.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Runtime extension is not available: {name}")]
    ExtensionNotFound { name: String },

    #[error("runtime extension '{name}' failed: {message}")]
    Extension { name: String, message: String },

    #[error("cannot provide use-object {path}: {message}")]
    UseObject { path: String, message: String },

    #[error("type error: {0}")]
    Type(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// First compilation error; the full diagnostic list rides along.
    #[error("{script} {line}:{column}: {message}")]
    Compilation {
        message: String,
        script: String,
        line: usize,
        column: usize,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("missing context: {0}")]
    MissingContext(String),

    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),

    #[error("host compilation of {unit} failed: {message}")]
    HostCompilation { unit: String, message: String },

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Every diagnostic of a failed compilation, warnings included.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            EngineError::Compilation { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
