//! Host functions for modhost guest modules.
//!
//! Guest modules import these functions to interact with the runtime. Every
//! host function is registered on both backends' linkers.
//!
//! # Interfaces
//!
//! - [`logging`]: Structured logging from guest code (`env.log`)

pub mod linker;
pub mod logging;

pub use linker::register_all;
pub use logging::LoggingHost;

use modhost_common::{ExecutionConfig, RuntimeError};
use modhost_core::{ArtifactTable, HandleFactory, WasmEngine};

/// Create a [`HandleFactory`] with all host functions registered.
///
/// # Errors
///
/// Returns an error if host function registration fails.
pub fn create_handle_factory(
    engine: WasmEngine,
    artifacts: ArtifactTable,
    execution: ExecutionConfig,
) -> Result<HandleFactory, RuntimeError> {
    let mut factory = HandleFactory::new(engine, artifacts, execution);
    register_all(&mut factory)?;
    Ok(factory)
}
