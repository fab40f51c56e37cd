//! Compiler errors

use thiserror::Error;

use crate::surface_parser::ParseError;

/// Compiler result type
pub type Result<T> = std::result::Result<T, Error>;

/// Compiler errors
///
/// These never escape a compilation as-is: the template compiler turns them
/// into error diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("unable to read script: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed command stream: {0}")]
    Codegen(String),

    #[error("unit source serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
