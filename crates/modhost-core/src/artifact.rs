//! Prebuilt compiled artifacts.
//!
//! An [`ArtifactTable`] maps a module name to a constructor that yields an
//! already compiled Wasmtime module. It is populated by the embedding program
//! (for instance from `.cwasm` files produced by an ahead-of-time build step)
//! and consulted by the strategy selector and the handle factory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, instrument};
use wasmtime::{Engine, Module};

use modhost_common::RuntimeError;

/// Constructor producing a compiled module for the given engine.
pub type ArtifactFactory = Arc<dyn Fn(&Engine) -> Result<Module, RuntimeError> + Send + Sync>;

/// Shared, name-keyed table of prebuilt artifact constructors.
///
/// Cloning yields another handle onto the same table.
#[derive(Clone, Default)]
pub struct ArtifactTable {
    factories: Arc<RwLock<HashMap<String, ArtifactFactory>>>,
}

impl ArtifactTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for `name`, replacing any previous one.
    pub fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Engine) -> Result<Module, RuntimeError> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(module = %name, "Prebuilt artifact registered");
        self.factories.write().insert(name, Arc::new(factory));
    }

    /// Register a serialized artifact held in memory.
    ///
    /// The bytes must come from [`WasmEngine::precompile`](crate::WasmEngine::precompile)
    /// on an engine with the same configuration.
    pub fn register_serialized(&self, name: impl Into<String>, artifact: Vec<u8>) {
        let artifact: Arc<[u8]> = artifact.into();
        self.register(name, move |engine| deserialize(engine, &artifact));
    }

    /// Register a serialized artifact stored on disk (`.cwasm`).
    ///
    /// The file is read when the handle is built, not at registration.
    pub fn register_file(&self, name: impl Into<String>, path: impl Into<PathBuf>) {
        let path = path.into();
        self.register(name, move |engine| deserialize_file(engine, &path));
    }

    /// Copy the current entries into an independent table.
    ///
    /// Changes to the copy are not seen by this table, and the other way
    /// round.
    pub fn fork(&self) -> Self {
        Self {
            factories: Arc::new(RwLock::new(self.factories.read().clone())),
        }
    }

    /// Returns `true` if an artifact is registered for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }

    /// Look up the constructor for `name`.
    pub fn get(&self, name: &str) -> Option<ArtifactFactory> {
        self.factories.read().get(name).cloned()
    }

    /// Remove the constructor for `name`.
    pub fn unregister(&self, name: &str) -> bool {
        self.factories.write().remove(name).is_some()
    }

    /// Number of registered artifacts.
    pub fn len(&self) -> usize {
        self.factories.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.read().is_empty()
    }
}

impl std::fmt::Debug for ArtifactTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.factories.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("ArtifactTable").field("modules", &names).finish()
    }
}

/// Load a precompiled module from memory.
#[allow(unsafe_code)]
fn deserialize(engine: &Engine, artifact: &[u8]) -> Result<Module, RuntimeError> {
    // SAFETY: artifacts are produced by `WasmEngine::precompile` of this runtime
    unsafe { Module::deserialize(engine, artifact) }.map_err(|e| {
        RuntimeError::compilation_failed(format!("Failed to load precompiled module: {e}"))
    })
}

/// Load a precompiled module from disk.
#[allow(unsafe_code)]
#[instrument(skip(engine))]
fn deserialize_file(engine: &Engine, path: &Path) -> Result<Module, RuntimeError> {
    let start = Instant::now();

    // SAFETY: we trust artifacts compiled by our AOT pipeline
    let module = unsafe { Module::deserialize_file(engine, path) }.map_err(|e| {
        RuntimeError::compilation_failed(format!(
            "Failed to load precompiled module from {}: {e}",
            path.display()
        ))
    })?;

    debug!(
        path = %path.display(),
        duration_us = start.elapsed().as_micros(),
        "Precompiled module loaded"
    );

    Ok(module)
}
