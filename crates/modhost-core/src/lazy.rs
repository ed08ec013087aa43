//! Build-once execution handle slot.

use std::sync::{Arc, OnceLock};

use tracing::error;

use crate::handle::{ExecutionHandle, HandleFactory};
use crate::selector::Strategy;
use crate::Module;
use modhost_common::RuntimeError;

type Slot = Result<Arc<ExecutionHandle>, Arc<RuntimeError>>;

/// Holds the execution handle of one context, built on first request.
///
/// The build runs at most once per slot, even under concurrent first
/// requests: late callers block until the first build finishes and then
/// share its result. A failed build is remembered and reported as
/// [`RuntimeError::Unusable`] on every later request.
#[derive(Debug, Default)]
pub struct LazyHandle {
    slot: OnceLock<Slot>,
}

impl LazyHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the handle, building it on first use.
    ///
    /// A module without payload is rejected before the slot is touched, so
    /// supplying the payload later (by replacing the context) is not
    /// blocked by a cached failure.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::MissingPayload`] if the module has no payload
    /// - [`RuntimeError::Unusable`] wrapping the build error, now and on
    ///   every later call
    pub fn get_or_build(
        &self,
        module: &Module,
        strategy: &Strategy,
        factory: &Arc<HandleFactory>,
    ) -> Result<Arc<ExecutionHandle>, RuntimeError> {
        if !module.has_payload() {
            return Err(RuntimeError::missing_payload(module.name()));
        }

        let slot = self.slot.get_or_init(|| {
            factory.build(module, strategy).map(Arc::new).map_err(|e| {
                error!(module = %module.name(), error = %e, "Failed to build execution handle");
                Arc::new(e)
            })
        });

        match slot {
            Ok(handle) => Ok(Arc::clone(handle)),
            Err(cause) => Err(RuntimeError::Unusable {
                module: module.name().to_string(),
                cause: Arc::clone(cause),
            }),
        }
    }

    /// The handle, if one has been built successfully.
    pub fn get(&self) -> Option<Arc<ExecutionHandle>> {
        match self.slot.get() {
            Some(Ok(handle)) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    /// Returns `true` once a handle has been built successfully.
    pub fn is_resolved(&self) -> bool {
        matches!(self.slot.get(), Some(Ok(_)))
    }

    /// Returns `true` if the build was attempted and failed.
    pub fn is_failed(&self) -> bool {
        matches!(self.slot.get(), Some(Err(_)))
    }
}
