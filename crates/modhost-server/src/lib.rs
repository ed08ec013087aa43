//! HTTP server for modhost.
//!
//! This crate exposes a [`modhost_core::Registry`] over HTTP:
//!
//! - Calling exported functions of registered modules
//! - Health and readiness checks, module listings
//! - An optional token-guarded Admin API for supplying dynamic payloads
//!
//! # Quick Start
//!
//! ```ignore
//! use modhost_core::EmbeddedResources;
//! use modhost_server::{AppState, ModhostServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let state = AppState::new(&runtime_config, EmbeddedResources::new())?;
//!     state.registry().init(&modules)?;
//!
//!     ModhostServer::new(state, ServerConfig::default()).run().await?;
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod handler;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod state;

pub use server::{ModhostServer, ServerConfig};
pub use state::AppState;
