// Host compilation: unit source -> executable artifact

use std::any::Any;
use std::collections::HashMap;
use tracing::debug;

use template_compiler::identity::simple_name;
use template_compiler::unit_ir::UnitSource;
use template_compiler::SourceIdentifier;

use crate::error::{EngineError, Result};
use crate::scope;
use crate::unit::{ExecutableUnit, ProgramUnit};

/// Turns generated unit source into a host artifact. The engine expects the
/// artifact to be an `ExecutableUnit`.
pub trait HostCompilationService: Send + Sync {
    fn compile_source(
        &self,
        source: &SourceIdentifier,
        unit_source: &str,
    ) -> Result<Box<dyn Any + Send + Sync>>;
}

/// Links unit source against the ambient symbol scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnitLinker;

impl UnitLinker {
    pub fn new() -> Self {
        UnitLinker
    }

    pub fn link(&self, source: &SourceIdentifier, unit_source: &str) -> Result<ExecutableUnit> {
        let unit_name = source.fully_qualified_name();
        let unit = UnitSource::from_source(unit_source).map_err(|e| EngineError::HostCompilation {
            unit: unit_name.clone(),
            message: e.to_string(),
        })?;

        let scope = scope::current();
        let mut imports = HashMap::new();
        for import in &unit.imports {
            let resolvable = scope.as_ref().map_or(false, |scope| scope.contains(import));
            if !resolvable {
                return Err(EngineError::HostCompilation {
                    unit: unit_name,
                    message: format!("cannot resolve import {}", import),
                });
            }
            imports.insert(simple_name(import).to_string(), import.clone());
        }

        debug!(
            unit = %unit_name,
            imports = imports.len(),
            scope = scope.as_ref().map(|s| s.name()).unwrap_or("<none>"),
            "linked unit"
        );
        Ok(ExecutableUnit::new(ProgramUnit::new(unit.unit, imports, unit.body)))
    }
}

impl HostCompilationService for UnitLinker {
    fn compile_source(
        &self,
        source: &SourceIdentifier,
        unit_source: &str,
    ) -> Result<Box<dyn Any + Send + Sync>> {
        Ok(Box::new(self.link(source, unit_source)?))
    }
}
