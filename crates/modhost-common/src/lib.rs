//! Common types, errors, and configuration for modhost.
//!
//! This crate provides shared functionality used across the modhost workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for runtime settings and the TOML config file
//! - The execution/deployment mode enums the strategy selector works on

pub mod config;
pub mod config_file;
pub mod error;
pub mod mode;

pub use config::{EngineConfig, ExecutionConfig, RuntimeConfig};
pub use config_file::{
    AdminConfig, ConfigFile, ConfigFileError, ModuleEntry, PayloadSource, ServerConfigFile,
};
pub use error::RuntimeError;
pub use mode::{DeploymentMode, ExecutionIntent, ExecutionMode, InterpreterFallback, ModuleOrigin};
