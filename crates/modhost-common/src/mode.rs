//! Mode enums driving execution strategy selection.
//!
//! - [`DeploymentMode`]: the environment the process runs in
//! - [`ExecutionMode`]: compiled vs. interpreted execution
//! - [`InterpreterFallback`]: what happens when compilation is not possible
//! - [`ModuleOrigin`]: whether a payload is known at configuration time
//! - [`ExecutionIntent`]: the per-module declaration combining the above

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::RuntimeError;

/// The environment the runtime is deployed in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentMode {
    /// Local development. Modules are recompiled on change and prebuilt
    /// artifacts are ignored.
    Dev,
    /// Test harness runs.
    Test,
    /// Production with a runtime compiler available.
    #[default]
    ProdJit,
    /// Production packaged ahead of time. Modules unknown at build time
    /// cannot be compiled.
    ProdNative,
}

impl DeploymentMode {
    /// Returns `true` for [`DeploymentMode::Dev`].
    pub fn is_dev(self) -> bool {
        matches!(self, Self::Dev)
    }

    /// Returns `true` for [`DeploymentMode::ProdNative`].
    pub fn is_native(self) -> bool {
        matches!(self, Self::ProdNative)
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dev => write!(f, "dev"),
            Self::Test => write!(f, "test"),
            Self::ProdJit => write!(f, "prod-jit"),
            Self::ProdNative => write!(f, "prod-native"),
        }
    }
}

impl FromStr for DeploymentMode {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Self::Dev),
            "test" => Ok(Self::Test),
            "prod-jit" | "prod" | "jit" => Ok(Self::ProdJit),
            "prod-native" | "native" => Ok(Self::ProdNative),
            other => Err(RuntimeError::invalid_config(format!(
                "Unknown deployment mode '{other}'"
            ))),
        }
    }
}

/// How a module's code is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Run on the interpreter backend.
    #[serde(alias = "Interpreter")]
    Interpreter,
    /// Compile to machine code, ahead of time or on first use.
    #[serde(alias = "Compiler", alias = "runtime-compiler", alias = "RuntimeCompiler")]
    Compiler,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interpreter => write!(f, "interpreter"),
            Self::Compiler => write!(f, "compiler"),
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interpreter" => Ok(Self::Interpreter),
            "compiler" | "runtime-compiler" | "runtimecompiler" => Ok(Self::Compiler),
            other => Err(RuntimeError::invalid_config(format!(
                "Unknown execution mode '{other}'"
            ))),
        }
    }
}

/// Behavior when the compiled path cannot serve a module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterpreterFallback {
    /// Refuse to run the module.
    #[serde(alias = "FAIL")]
    Fail,
    /// Degrade to the interpreter (or to on-demand compilation when only the
    /// prebuilt artifact is missing) and log a warning.
    #[default]
    FallbackToInterpreter,
}

impl InterpreterFallback {
    /// Returns `true` if degradation is permitted.
    pub fn allows_fallback(self) -> bool {
        matches!(self, Self::FallbackToInterpreter)
    }
}

/// Where a module's payload comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleOrigin {
    /// Payload known at configuration time.
    Static,
    /// Payload supplied only at runtime.
    Dynamic,
}

impl fmt::Display for ModuleOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => write!(f, "static"),
            Self::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// Declared execution intent of a single module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExecutionIntent {
    /// Requested mode, `None` when left to the selector.
    pub mode: Option<ExecutionMode>,

    /// Fallback policy when compilation cannot serve the module.
    pub fallback: InterpreterFallback,

    /// Function indices that must be interpreted.
    pub interpreted_functions: BTreeSet<u32>,
}

impl ExecutionIntent {
    /// Intent with an explicit mode and default policy.
    pub fn with_mode(mode: ExecutionMode) -> Self {
        Self {
            mode: Some(mode),
            ..Self::default()
        }
    }

    /// Set the fallback policy.
    #[must_use]
    pub fn fallback(mut self, fallback: InterpreterFallback) -> Self {
        self.fallback = fallback;
        self
    }

    /// Force the given function indices onto the interpreter.
    #[must_use]
    pub fn interpret_functions(mut self, indices: impl IntoIterator<Item = u32>) -> Self {
        self.interpreted_functions.extend(indices);
        self
    }
}
