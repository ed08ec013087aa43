//! Per-call execution state and store management.
//!
//! This module provides:
//! - [`CallContext`]: Per-call state accessible from host functions
//! - [`LogEntry`] and [`LogLevel`]: Structured logging from guest code
//! - [`ExecutionMetrics`]: Fuel and timing for each call
//!
//! Both backends use the same [`CallContext`] as their store data, so host
//! functions are written once.

use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;
use wasmtime::Store;

use crate::WasmEngine;
use modhost_common::{ExecutionConfig, RuntimeError};

/// Per-call execution context.
///
/// Created for each export call and dropped when the call returns. Host
/// functions reach it through the backend's `Caller` API.
pub struct CallContext {
    /// Unique call identifier for tracing.
    pub call_id: String,

    /// Logs collected from guest code.
    pub logs: Vec<LogEntry>,

    /// Execution metrics.
    pub metrics: ExecutionMetrics,

    start_time: Instant,
}

/// A single log entry from guest code.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    #[serde(skip)]
    pub timestamp: Instant,
}

/// Log level for guest logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Execution metrics for one call.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    pub fuel_consumed: u64,
    pub duration: Option<Duration>,
}

impl CallContext {
    /// Create a context with a fresh call ID.
    pub fn new() -> Self {
        Self::with_call_id(Uuid::new_v4().to_string())
    }

    pub fn with_call_id(call_id: String) -> Self {
        Self {
            call_id,
            logs: Vec::new(),
            metrics: ExecutionMetrics::default(),
            start_time: Instant::now(),
        }
    }

    /// Add a log entry.
    pub fn log(&mut self, level: LogLevel, message: String) {
        self.logs.push(LogEntry {
            level,
            message,
            timestamp: Instant::now(),
        });
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Record fuel usage and duration once the call has returned.
    pub fn finalize_metrics(&mut self, fuel_consumed: u64) {
        self.metrics.fuel_consumed = fuel_consumed;
        self.metrics.duration = Some(self.start_time.elapsed());
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("call_id", &self.call_id)
            .field("logs", &self.logs.len())
            .finish_non_exhaustive()
    }
}

/// Create a Wasmtime store for a compiled call.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn create_compiled_store(
    engine: &WasmEngine,
    config: &ExecutionConfig,
) -> Result<Store<CallContext>, RuntimeError> {
    let mut store = Store::new(engine.compiler(), CallContext::new());

    if engine.is_fuel_metered() {
        store
            .set_fuel(config.max_fuel)
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to set fuel: {e}")))?;
    }

    Ok(store)
}

/// Create a Wasmi store for an interpreted call.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn create_interpreted_store(
    engine: &WasmEngine,
    config: &ExecutionConfig,
) -> Result<wasmi::Store<CallContext>, RuntimeError> {
    let mut store = wasmi::Store::new(engine.interpreter(), CallContext::new());

    if engine.is_fuel_metered() {
        store
            .set_fuel(config.max_fuel)
            .map_err(|e| RuntimeError::invalid_config(format!("Failed to set fuel: {e}")))?;
    }

    Ok(store)
}

/// Fuel consumed so far, given the starting budget and what remains.
///
/// `remaining` is `None` when metering is disabled.
pub fn calculate_fuel_consumed(initial_fuel: u64, remaining: Option<u64>) -> u64 {
    remaining.map_or(0, |left| initial_fuel.saturating_sub(left))
}
