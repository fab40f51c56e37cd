//! Compiler diagnostics.
//!
//! Diagnostics are produced only while compiling and are never mutated after
//! creation. Warnings never affect the outcome of a compilation; a single
//! error makes it fail.

use std::fmt;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    Warning,
    Error,
}

/// A compiler message anchored to a script location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    pub script_name: String,
    pub line: usize,
    pub column: usize,
}

impl Diagnostic {
    pub fn warning(
        script_name: impl Into<String>,
        line: usize,
        column: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: DiagnosticKind::Warning,
            message: message.into(),
            script_name: script_name.into(),
            line,
            column,
        }
    }

    pub fn error(
        script_name: impl Into<String>,
        line: usize,
        column: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: DiagnosticKind::Error,
            message: message.into(),
            script_name: script_name.into(),
            line,
            column,
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == DiagnosticKind::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{}: {}",
            self.script_name, self.line, self.column, self.message
        )
    }
}

/// Outcome of running the template compiler: warnings and errors in
/// encounter order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilationResult {
    pub warnings: Vec<Diagnostic>,
    pub errors: Vec<Diagnostic>,
}

impl CompilationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route a diagnostic to the warning or error list.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.kind {
            DiagnosticKind::Warning => self.warnings.push(diagnostic),
            DiagnosticKind::Error => self.errors.push(diagnostic),
        }
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        for diagnostic in diagnostics {
            self.push(diagnostic);
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.errors.first()
    }

    /// Warnings first, then errors, each in encounter order.
    pub fn all(&self) -> impl Iterator<Item = &Diagnostic> {
        self.warnings.iter().chain(self.errors.iter())
    }
}
