//! Configuration file structures for modhost.
//!
//! This module defines structures for TOML configuration files:
//! - [`ConfigFile`]: Top-level configuration file structure
//! - [`ServerConfigFile`]: HTTP server settings
//! - [`AdminConfig`]: Admin API settings
//! - [`ModuleEntry`]: A configured module definition

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ExecutionIntent, ExecutionMode, InterpreterFallback, ModuleOrigin, RuntimeConfig, RuntimeError};

/// Top-level configuration file structure.
///
/// # Example
///
/// ```toml
/// resource_dir = "./resources"
///
/// [runtime]
/// deployment = "prod-jit"
///
/// [runtime.engine]
/// pooling_allocator = true
/// max_instances = 1000
///
/// [runtime.execution]
/// max_fuel = 10_000_000
///
/// [server]
/// bind_addr = "0.0.0.0:8080"
///
/// [admin]
/// enabled = true
/// token = "your-secret-token"
///
/// [[modules]]
/// name = "operation"
/// path = "./modules/operation.wasm"
/// execution_mode = "compiler"
///
/// [[modules]]
/// name = "uploaded"
/// dynamic = true
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    /// Runtime configuration (deployment + engine + execution settings).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfigFile,

    /// Admin API configuration.
    #[serde(default)]
    pub admin: AdminConfig,

    /// Directory searched for `resource` payloads not embedded in the binary.
    #[serde(default)]
    pub resource_dir: Option<PathBuf>,

    /// Modules to register at startup, in declaration order.
    #[serde(default)]
    pub modules: Vec<ModuleEntry>,
}

impl ConfigFile {
    /// Load configuration from a TOML file.
    ///
    /// Relative module, artifact and resource paths are resolved against
    /// the directory containing the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigFileError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        let mut config = Self::from_toml(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        debug!(
            path = %path.display(),
            modules = config.modules.len(),
            deployment = %config.runtime.deployment,
            "Configuration file loaded"
        );
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML or declares
    /// the same module name twice.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check for duplicate module names.
    fn validate(&self) -> Result<(), ConfigFileError> {
        let mut seen = HashSet::new();
        for entry in &self.modules {
            if entry.name.is_empty() {
                return Err(ConfigFileError::Invalid {
                    message: "module name must not be empty".to_string(),
                });
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(ConfigFileError::Invalid {
                    message: format!("module '{}' is declared more than once", entry.name),
                });
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let rebase = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };

        if let Some(dir) = self.resource_dir.as_mut() {
            rebase(dir);
        }
        for entry in &mut self.modules {
            if let Some(path) = entry.path.as_mut() {
                rebase(path);
            }
            if let Some(artifact) = entry.artifact.as_mut() {
                rebase(artifact);
            }
        }
    }
}

/// HTTP server configuration from config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfigFile {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "defaults::bind_addr")]
    pub bind_addr: String,

    /// Request timeout in seconds.
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Enable graceful shutdown.
    #[serde(default = "defaults::graceful_shutdown")]
    pub graceful_shutdown: bool,
}

impl Default for ServerConfigFile {
    fn default() -> Self {
        Self {
            bind_addr: defaults::bind_addr(),
            request_timeout_secs: defaults::request_timeout_secs(),
            graceful_shutdown: defaults::graceful_shutdown(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminConfig {
    /// Enable Admin API.
    #[serde(default)]
    pub enabled: bool,

    /// Authentication token (required when enabled).
    ///
    /// Clients must include this token in the `X-Admin-Token` header.
    pub token: Option<String>,

    /// URL prefix for Admin API endpoints.
    #[serde(default = "defaults::admin_prefix")]
    pub prefix: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: None,
            prefix: defaults::admin_prefix(),
        }
    }
}

impl AdminConfig {
    /// Check if Admin API is properly configured.
    ///
    /// Returns `true` if enabled and token is set.
    pub fn is_configured(&self) -> bool {
        self.enabled && self.token.is_some()
    }
}

/// Where a static payload is read from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadSource {
    /// A module file on disk.
    File(PathBuf),
    /// A named resource embedded in the binary or found in `resource_dir`.
    Resource(String),
}

impl fmt::Display for PayloadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "file:{}", path.display()),
            Self::Resource(name) => write!(f, "resource:{name}"),
        }
    }
}

/// A module declared in the configuration file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ModuleEntry {
    /// Unique name of the module.
    pub name: String,

    /// Path to the module file. Takes precedence over `resource`.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Name of an embedded resource holding the module.
    #[serde(default)]
    pub resource: Option<String>,

    /// The payload is supplied at runtime.
    #[serde(default)]
    pub dynamic: bool,

    /// Requested execution mode.
    #[serde(default)]
    pub execution_mode: Option<ExecutionMode>,

    /// Fallback policy when compilation cannot serve the module.
    #[serde(default)]
    pub interpreter_fallback: InterpreterFallback,

    /// Function indices forced onto the interpreter.
    #[serde(default)]
    pub interpreted_functions: Vec<u32>,

    /// Precompiled artifact (`.cwasm`) produced ahead of time for this module.
    #[serde(default)]
    pub artifact: Option<PathBuf>,
}

impl ModuleEntry {
    /// A static entry backed by a file.
    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// A static entry backed by an embedded resource.
    pub fn resource(name: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource: Some(resource.into()),
            ..Self::default()
        }
    }

    /// A dynamic entry whose payload arrives at runtime.
    pub fn dynamic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dynamic: true,
            ..Self::default()
        }
    }

    /// Set the requested execution mode.
    #[must_use]
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = Some(mode);
        self
    }

    /// Set the fallback policy.
    #[must_use]
    pub fn with_fallback(mut self, fallback: InterpreterFallback) -> Self {
        self.interpreter_fallback = fallback;
        self
    }

    /// Set the prebuilt artifact path.
    #[must_use]
    pub fn with_artifact(mut self, artifact: impl Into<PathBuf>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }

    /// The payload source, if any. A file path wins over a resource.
    pub fn payload_source(&self) -> Option<PayloadSource> {
        self.path
            .clone()
            .map(PayloadSource::File)
            .or_else(|| self.resource.clone().map(PayloadSource::Resource))
    }

    /// Determine the module origin.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the entry neither carries a payload
    /// source nor is marked dynamic.
    pub fn origin(&self) -> Result<ModuleOrigin, RuntimeError> {
        if self.dynamic {
            Ok(ModuleOrigin::Dynamic)
        } else if self.payload_source().is_some() {
            Ok(ModuleOrigin::Static)
        } else {
            Err(RuntimeError::invalid_config(format!(
                "module '{}' defines neither a file path nor a resource name and is not marked dynamic",
                self.name
            )))
        }
    }

    /// The declared execution intent.
    pub fn intent(&self) -> ExecutionIntent {
        ExecutionIntent {
            mode: self.execution_mode,
            fallback: self.interpreter_fallback,
            interpreted_functions: self.interpreted_functions.iter().copied().collect(),
        }
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },

    /// The file parsed but is semantically invalid.
    #[error("Invalid config file: {message}")]
    Invalid { message: String },
}

/// Default value functions for serde.
mod defaults {
    pub fn bind_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    pub const fn request_timeout_secs() -> u64 {
        30
    }

    pub const fn graceful_shutdown() -> bool {
        true
    }

    pub fn admin_prefix() -> String {
        "/admin".to_string()
    }
}
