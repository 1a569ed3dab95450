//! HTTP API module.
//!
//! This module provides the HTTP server, the API types and the pipeline
//! event log for the chartforge backend.

pub mod logs;
pub mod server;
pub mod types;

pub use logs::*;
pub use server::{build_router, start_server, AppState};
pub use types::*;
