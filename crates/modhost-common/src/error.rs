//! Error types for modhost.
//!
//! [`RuntimeError`] covers the whole lifecycle of a module: configuration,
//! parsing, strategy selection, backend construction and execution.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Top-level runtime errors.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// No module is registered under the requested name.
    #[error("Module not found: {module_id}")]
    ModuleNotFound {
        /// The name that was looked up.
        module_id: String,
    },

    /// The module payload is not a valid WebAssembly binary.
    #[error("Failed to parse module '{module}': {reason}")]
    ParseFailed {
        /// Name of the module being parsed.
        module: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// A dynamic module was resolved before its payload was supplied.
    #[error("Module '{module}' has no payload; supply one before resolving it")]
    MissingPayload {
        /// Name of the payload-less module.
        module: String,
    },

    /// A prebuilt artifact is required but none is registered.
    #[error("No prebuilt artifact registered for module '{module}' and fallback is disabled")]
    MissingArtifact {
        /// Name of the module lacking an artifact.
        module: String,
    },

    /// Machine code generation failed.
    #[error("Compilation failed: {reason}")]
    CompilationFailed {
        /// Description of the compilation failure.
        reason: String,
    },

    /// Linking or instantiation of a built module failed.
    #[error("Instantiation failed: {reason}")]
    InstantiationFailed {
        /// Description of the failure.
        reason: String,
    },

    /// A previous build of this context failed; the failure is final until
    /// the context is replaced.
    #[error("Module '{module}' is unusable: {cause}")]
    Unusable {
        /// Name of the failed module.
        module: String,
        /// The cached build failure.
        #[source]
        cause: Arc<RuntimeError>,
    },

    /// The requested export does not exist or is not a function.
    #[error("Export '{export}' not found in module '{module}'")]
    ExportNotFound {
        /// Module that was searched.
        module: String,
        /// Missing export name.
        export: String,
    },

    /// Arguments do not match the function signature.
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Description of the mismatch.
        reason: String,
    },

    /// Execution exhausted the configured fuel limit.
    #[error("Fuel exhausted: CPU limit exceeded")]
    FuelExhausted,

    /// A WebAssembly trap occurred during execution.
    #[error("Wasm trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

impl RuntimeError {
    /// Create a new `ModuleNotFound` error.
    pub fn module_not_found(module_id: impl Into<String>) -> Self {
        Self::ModuleNotFound {
            module_id: module_id.into(),
        }
    }

    /// Create a new `ParseFailed` error.
    pub fn parse_failed(module: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ParseFailed {
            module: module.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `MissingPayload` error.
    pub fn missing_payload(module: impl Into<String>) -> Self {
        Self::MissingPayload {
            module: module.into(),
        }
    }

    /// Create a new `CompilationFailed` error.
    pub fn compilation_failed(reason: impl Into<String>) -> Self {
        Self::CompilationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `InstantiationFailed` error.
    pub fn instantiation_failed(reason: impl Into<String>) -> Self {
        Self::InstantiationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `Trap` error.
    pub fn trap(message: impl Into<String>) -> Self {
        Self::Trap {
            message: message.into(),
        }
    }

    /// Create a new `InvalidArgument` error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error indicates the module was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ModuleNotFound { .. } | Self::ExportNotFound { .. })
    }

    /// Returns `true` for configuration errors, which are never retried.
    pub fn is_config_error(&self) -> bool {
        match self {
            Self::InvalidConfig { .. } | Self::MissingPayload { .. } | Self::MissingArtifact { .. } => {
                true
            }
            Self::Unusable { cause, .. } => cause.is_config_error(),
            _ => false,
        }
    }

    /// Returns `true` if this error indicates a resource limit was exceeded.
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Self::FuelExhausted)
    }

    /// Returns `true` if this is a cached build failure.
    pub fn is_unusable(&self) -> bool {
        matches!(self, Self::Unusable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RuntimeError::module_not_found("test-module");
        assert_eq!(err.to_string(), "Module not found: test-module");

        let err = RuntimeError::FuelExhausted;
        assert_eq!(err.to_string(), "Fuel exhausted: CPU limit exceeded");

        let err = RuntimeError::missing_payload("m2");
        assert_eq!(
            err.to_string(),
            "Module 'm2' has no payload; supply one before resolving it"
        );
    }

    #[test]
    fn test_unusable_wraps_cause() {
        let cause = Arc::new(RuntimeError::compilation_failed("bad body"));
        let err = RuntimeError::Unusable {
            module: "m1".into(),
            cause,
        };

        assert!(err.is_unusable());
        assert_eq!(
            err.to_string(),
            "Module 'm1' is unusable: Compilation failed: bad body"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_is_config_error() {
        assert!(RuntimeError::invalid_config("x").is_config_error());
        assert!(RuntimeError::missing_payload("x").is_config_error());
        assert!(
            RuntimeError::MissingArtifact {
                module: "x".into()
            }
            .is_config_error()
        );
        assert!(!RuntimeError::parse_failed("x", "bad magic").is_config_error());
        assert!(!RuntimeError::FuelExhausted.is_config_error());
    }

    #[test]
    fn test_is_resource_limit() {
        assert!(RuntimeError::FuelExhausted.is_resource_limit());
        assert!(!RuntimeError::module_not_found("test").is_resource_limit());
    }

    #[test]
    fn test_is_not_found() {
        assert!(RuntimeError::module_not_found("test").is_not_found());
        assert!(
            RuntimeError::ExportNotFound {
                module: "m".into(),
                export: "add".into()
            }
            .is_not_found()
        );
        assert!(!RuntimeError::FuelExhausted.is_not_found());
    }
}
