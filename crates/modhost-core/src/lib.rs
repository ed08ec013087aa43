//! Module registry and execution runtime for modhost.
//!
//! This crate provides:
//! - [`WasmEngine`]: Compiler (Wasmtime) and interpreter (Wasmi) engines
//! - [`ParsedModule`] and [`Module`]: Validated payloads and named modules
//! - [`StrategySelector`]: Chooses how each module is executed
//! - [`HandleFactory`] and [`ExecutionHandle`]: Build and call backends
//! - [`Context`]: A module bound to its strategy and lazy handle
//! - [`Registry`]: Name-keyed, snapshot-able set of contexts
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       Registry                          │
//! │  (Shared, copy-on-write name → Context table)           │
//! │  - init / add / replace / remove / register_dynamic     │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                       Context                           │
//! │  (Immutable, replaced as a whole)                       │
//! │  - Module + Strategy chosen by StrategySelector         │
//! │  - LazyHandle: built once on first resolve              │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                   ExecutionHandle                       │
//! │  (Shared by all callers of a context)                   │
//! │  - Precompiled artifact, compiled now, or interpreted   │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │               Store<CallContext> + Instance             │
//! │  (Per-call, isolated)                                   │
//! │  - Fuel metering                                        │
//! │  - Linear memory                                        │
//! │  - Guest logs and metrics                               │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod artifact;
pub mod context;
pub mod engine;
pub mod handle;
pub mod lazy;
pub mod loader;
pub mod module;
pub mod registry;
pub mod selector;
pub mod store;

pub use artifact::{ArtifactFactory, ArtifactTable};
pub use context::{Context, ContextInfo};
pub use engine::WasmEngine;
pub use handle::{BuildHook, CallOutcome, ExecutionHandle, HandleFactory, Value, ValueType};
pub use lazy::LazyHandle;
pub use loader::{EmbeddedResources, MAX_MODULE_SIZE};
pub use module::{ExportInfo, ExportKind, Module, ParsedModule};
pub use registry::{InitReport, Registry, RegistrySnapshot};
pub use selector::{Backend, Strategy, StrategySelector};
pub use store::{CallContext, ExecutionMetrics, LogEntry, LogLevel};
