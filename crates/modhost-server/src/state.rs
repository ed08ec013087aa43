//! Shared application state.
//!
//! This module provides [`AppState`], which holds shared resources
//! across all HTTP request handlers.

use std::sync::Arc;

use modhost_common::{DeploymentMode, RuntimeConfig, RuntimeError};
use modhost_core::{ArtifactTable, EmbeddedResources, Registry, WasmEngine};
use modhost_host::create_handle_factory;

/// Shared state across all request handlers.
///
/// This struct is cloned for each request, so it uses `Arc` for shared data.
#[derive(Clone)]
pub struct AppState {
    registry: Arc<Registry>,
}

impl AppState {
    /// Build the engines, host functions and an empty registry.
    ///
    /// Populate the registry with [`Registry::init`] before serving.
    ///
    /// # Errors
    ///
    /// Returns an error if engine or host function setup fails.
    pub fn new(config: &RuntimeConfig, resources: EmbeddedResources) -> Result<Self, RuntimeError> {
        let engine = WasmEngine::new(&config.engine, &config.execution)?;
        let factory = create_handle_factory(engine, ArtifactTable::new(), config.execution.clone())?;
        let registry = Registry::new(config.deployment, Arc::new(factory), resources);

        Ok(Self::from_registry(Arc::new(registry)))
    }

    pub fn from_registry(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn deployment(&self) -> DeploymentMode {
        self.registry.deployment()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("deployment", &self.deployment())
            .field("modules_count", &self.registry.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modhost_common::{EngineConfig, ModuleEntry};

    fn config() -> RuntimeConfig {
        RuntimeConfig {
            engine: EngineConfig {
                pooling_allocator: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_app_state_creation() {
        let state = AppState::new(&config(), EmbeddedResources::new()).unwrap();
        assert!(state.registry().is_empty());
        assert_eq!(state.deployment(), DeploymentMode::ProdJit);
    }

    #[test]
    fn test_registry_is_shared_between_clones() {
        let state = AppState::new(&config(), EmbeddedResources::new()).unwrap();
        let clone = state.clone();

        state
            .registry()
            .init(&[ModuleEntry::dynamic("later")])
            .unwrap();

        assert!(clone.registry().get("later").is_some());
    }
}
