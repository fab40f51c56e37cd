// Engine configuration, loaded from JSON

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use template_compiler::identity::is_valid_reference_path;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Also names the engine's symbol scope.
    pub engine_name: String,
    /// Package prefix of generated units.
    pub unit_prefix: String,
    /// Write generated unit source to `generated_dir`.
    pub keep_generated: bool,
    pub generated_dir: Option<PathBuf>,
    /// Script search paths; units under them are never imported.
    pub search_paths: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            engine_name: "render-bridge".to_string(),
            unit_prefix: "render_units".to_string(),
            keep_generated: false,
            generated_dir: None,
            search_paths: vec!["/apps/".to_string(), "/libs/".to_string()],
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.unit_prefix.is_empty() && !is_valid_reference_path(&self.unit_prefix) {
            return Err(EngineError::Config(format!(
                "unit_prefix '{}' is not a dotted identifier path",
                self.unit_prefix
            )));
        }
        if self.keep_generated && self.generated_dir.is_none() {
            return Err(EngineError::Config(
                "keep_generated requires generated_dir".to_string(),
            ));
        }
        Ok(())
    }
}
