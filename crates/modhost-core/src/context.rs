//! Execution contexts.
//!
//! A [`Context`] binds a [`Module`] to the [`Strategy`] chosen for it and a
//! lazily built execution handle. Contexts are immutable after creation;
//! updating a module means building a new context and replacing the old one
//! in the registry.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::handle::{CallOutcome, ExecutionHandle, HandleFactory, Value};
use crate::lazy::LazyHandle;
use crate::selector::{Backend, Strategy};
use crate::{ExportInfo, Module};
use modhost_common::{ExecutionMode, ModuleOrigin, RuntimeError};

/// A module, its execution strategy and its (lazy) execution handle.
pub struct Context {
    module: Module,
    strategy: Strategy,
    factory: Arc<HandleFactory>,
    lazy: LazyHandle,
}

impl Context {
    pub fn new(module: Module, strategy: Strategy, factory: Arc<HandleFactory>) -> Self {
        Self {
            module,
            strategy,
            factory,
            lazy: LazyHandle::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.module.name()
    }

    pub fn origin(&self) -> ModuleOrigin {
        self.module.origin()
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    /// The strategy selected when the context was created.
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn mode(&self) -> ExecutionMode {
        self.strategy.mode
    }

    /// Return the execution handle, building it on first use.
    ///
    /// All callers of one context share the same handle.
    ///
    /// # Errors
    ///
    /// See [`LazyHandle::get_or_build`].
    pub fn resolve_handle(&self) -> Result<Arc<ExecutionHandle>, RuntimeError> {
        self.lazy
            .get_or_build(&self.module, &self.strategy, &self.factory)
    }

    /// Resolve the handle and call an export on it.
    ///
    /// # Errors
    ///
    /// Any error from [`Context::resolve_handle`] or
    /// [`ExecutionHandle::call`].
    pub fn call(&self, export: &str, args: &[Value]) -> Result<CallOutcome, RuntimeError> {
        self.resolve_handle()?.call(export, args)
    }

    /// Returns `true` once the handle has been built.
    pub fn is_resolved(&self) -> bool {
        self.lazy.is_resolved()
    }

    /// Serializable summary for listings.
    pub fn info(&self) -> ContextInfo {
        let handle = self.lazy.get();
        let payload = self.module.payload().ok();

        ContextInfo {
            name: self.name().to_string(),
            origin: self.origin(),
            mode: self.strategy.mode,
            backend: self.strategy.backend,
            has_payload: payload.is_some(),
            content_hash: payload.map(|p| p.content_hash().to_string()),
            exports: payload.map(|p| p.exports().to_vec()).unwrap_or_default(),
            source: self.module.source().map(ToString::to_string),
            resolved: handle.is_some(),
            failed: self.lazy.is_failed(),
            active_backend: handle.as_ref().map(|h| h.backend()),
            fell_back: handle.is_some_and(|h| h.fell_back()),
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Context{{{}, strategy={}", self.module, self.strategy)?;
        if self.lazy.is_resolved() {
            write!(f, ", resolved")?;
        } else if self.lazy.is_failed() {
            write!(f, ", failed")?;
        }
        write!(f, "}}")
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("module", &self.module)
            .field("strategy", &self.strategy)
            .field("lazy", &self.lazy)
            .finish_non_exhaustive()
    }
}

/// Context summary returned by listings and the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct ContextInfo {
    pub name: String,
    pub origin: ModuleOrigin,
    pub mode: ExecutionMode,
    pub backend: Backend,
    pub has_payload: bool,
    pub content_hash: Option<String>,
    pub exports: Vec<ExportInfo>,
    pub source: Option<String>,
    pub resolved: bool,
    pub failed: bool,
    /// Backend actually in use, once resolved.
    pub active_backend: Option<Backend>,
    pub fell_back: bool,
}
