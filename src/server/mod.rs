//! Server role
//!
//! The accept loop, the per-connection task, and command dispatch.

pub mod commands;
pub mod core;
pub mod handler;

pub use core::Server;
pub use handler::SessionContext;
