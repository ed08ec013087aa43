//! Payload loading.
//!
//! Static payloads come from a module file or from a named resource. Named
//! resources are looked up first in the table supplied by the embedding
//! program (typically `include_bytes!` data) and then in an optional
//! resource directory on disk.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::{Module, ParsedModule};
use modhost_common::{ModuleEntry, ModuleOrigin, PayloadSource, RuntimeError};

/// Maximum accepted payload size (16 MiB).
pub const MAX_MODULE_SIZE: usize = 16 * 1024 * 1024;

/// Named module payloads available without a file path.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedResources {
    entries: HashMap<String, Arc<[u8]>>,
    resource_dir: Option<PathBuf>,
}

impl EmbeddedResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Search `dir` for resources not embedded in the table.
    #[must_use]
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.resource_dir = Some(dir.into());
        self
    }

    /// Add an embedded resource.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        self.insert(name, bytes);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        self.entries.insert(name.into(), bytes.into());
    }

    pub fn resource_dir(&self) -> Option<&Path> {
        self.resource_dir.as_deref()
    }

    /// Look up a resource by name.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the resource is neither embedded nor
    /// present in the resource directory, or if the name escapes that
    /// directory.
    pub fn get(&self, name: &str) -> Result<Arc<[u8]>, RuntimeError> {
        if let Some(bytes) = self.entries.get(name) {
            return Ok(Arc::clone(bytes));
        }

        let Some(dir) = &self.resource_dir else {
            return Err(resource_not_found(name));
        };

        let relative = Path::new(name);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(RuntimeError::invalid_config(format!(
                "resource name '{name}' must be a relative path inside the resource directory"
            )));
        }

        let path = dir.join(relative);
        if !path.is_file() {
            return Err(resource_not_found(name));
        }

        read_module_file(&path).map(Into::into)
    }
}

fn resource_not_found(name: &str) -> RuntimeError {
    RuntimeError::invalid_config(format!("resource '{name}' not found"))
}

/// Read a module file, enforcing [`MAX_MODULE_SIZE`].
///
/// # Errors
///
/// Returns [`RuntimeError::Io`] if the file cannot be read and
/// [`RuntimeError::ParseFailed`] if it is too large.
pub fn read_module_file(path: &Path) -> Result<Vec<u8>, RuntimeError> {
    let bytes = std::fs::read(path)?;
    check_size(&path.display().to_string(), &bytes)?;
    Ok(bytes)
}

/// Reject payloads over [`MAX_MODULE_SIZE`].
///
/// # Errors
///
/// Returns [`RuntimeError::ParseFailed`] for oversized payloads.
pub fn check_size(name: &str, bytes: &[u8]) -> Result<(), RuntimeError> {
    if bytes.len() > MAX_MODULE_SIZE {
        return Err(RuntimeError::parse_failed(
            name,
            format!(
                "module too large: {} bytes (max: {MAX_MODULE_SIZE} bytes)",
                bytes.len()
            ),
        ));
    }
    Ok(())
}

/// Load the raw bytes behind a payload source.
///
/// # Errors
///
/// See [`read_module_file`] and [`EmbeddedResources::get`].
pub fn load_payload(
    source: &PayloadSource,
    resources: &EmbeddedResources,
) -> Result<Arc<[u8]>, RuntimeError> {
    match source {
        PayloadSource::File(path) => read_module_file(path).map(Into::into),
        PayloadSource::Resource(name) => {
            let bytes = resources.get(name)?;
            check_size(name, &bytes)?;
            Ok(bytes)
        }
    }
}

/// Build a [`Module`] from a configuration entry.
///
/// Dynamic entries may omit the payload; when they name one it is loaded
/// like a static payload.
///
/// # Errors
///
/// Configuration and I/O errors, or [`RuntimeError::ParseFailed`] if the
/// payload is not a valid module.
#[instrument(skip(entry, resources), fields(module = %entry.name))]
pub fn module_from_entry(
    entry: &ModuleEntry,
    resources: &EmbeddedResources,
) -> Result<Module, RuntimeError> {
    let origin = entry.origin()?;
    let source = entry.payload_source();

    let parsed = match &source {
        Some(source) => {
            let bytes = load_payload(source, resources)?;
            debug!(source = %source, bytes_len = bytes.len(), "Payload loaded");
            Some(ParsedModule::parse(&entry.name, &bytes)?)
        }
        None => None,
    };

    match (origin, parsed) {
        (ModuleOrigin::Static, Some(parsed)) => {
            Module::new_static(&entry.name, parsed, source, entry.intent())
        }
        (ModuleOrigin::Static, None) => Err(RuntimeError::invalid_config(format!(
            "static module '{}' has no payload source",
            entry.name
        ))),
        (ModuleOrigin::Dynamic, parsed) => Module::new_dynamic(&entry.name, parsed, entry.intent()),
    }
}
