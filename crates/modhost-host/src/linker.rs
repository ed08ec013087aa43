//! Host function registration.
//!
//! Registers the same host functions on the compiler (Wasmtime) and
//! interpreter (Wasmi) linkers, so a module links identically whichever
//! backend runs it.

use modhost_common::RuntimeError;
use modhost_core::HandleFactory;
use modhost_core::store::CallContext;
use tracing::warn;
use wasmtime::{Caller, Linker};

use crate::logging::{LoggingHost, level_from_i32, read_message};

/// Register all standard host functions on both linkers of a factory.
///
/// This registers the following host functions:
/// - `env::log` - Logging function for guest code
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register_all(factory: &mut HandleFactory) -> Result<(), RuntimeError> {
    register_logging(factory.linker_mut())?;
    register_interpreted_logging(factory.interpreter_linker_mut())?;
    Ok(())
}

/// Register `env::log(level: i32, ptr: i32, len: i32)` for compiled modules.
///
/// # Memory Protocol
///
/// The guest passes:
/// - `level`: Log level (0=debug, 1=info, 2=warn, 3=error)
/// - `ptr`: Pointer to the message string in the exported `memory`
/// - `len`: Length of the message in bytes (UTF-8)
pub fn register_logging(linker: &mut Linker<CallContext>) -> Result<(), RuntimeError> {
    linker
        .func_wrap(
            "env",
            "log",
            |mut caller: Caller<'_, CallContext>, level: i32, ptr: i32, len: i32| {
                let Some(memory) = caller
                    .get_export("memory")
                    .and_then(wasmtime::Extern::into_memory)
                else {
                    warn!("Memory export not found in guest module");
                    return;
                };

                let Some(message) = read_message(memory.data(&caller), ptr, len) else {
                    return;
                };

                LoggingHost::log(caller.data_mut(), level_from_i32(level), &message);
            },
        )
        .map_err(|e| {
            RuntimeError::invalid_config(format!("Failed to register log function: {e}"))
        })?;

    Ok(())
}

/// Register `env::log` for interpreted modules.
///
/// Same protocol as [`register_logging`].
pub fn register_interpreted_logging(
    linker: &mut wasmi::Linker<CallContext>,
) -> Result<(), RuntimeError> {
    linker
        .func_wrap(
            "env",
            "log",
            |mut caller: wasmi::Caller<'_, CallContext>, level: i32, ptr: i32, len: i32| {
                let Some(memory) = caller
                    .get_export("memory")
                    .and_then(wasmi::Extern::into_memory)
                else {
                    warn!("Memory export not found in guest module");
                    return;
                };

                let Some(message) = read_message(memory.data(&caller), ptr, len) else {
                    return;
                };

                LoggingHost::log(caller.data_mut(), level_from_i32(level), &message);
            },
        )
        .map_err(|e| {
            RuntimeError::invalid_config(format!("Failed to register log function: {e}"))
        })?;

    Ok(())
}
