//! Error handling
//!
//! Defines the protocol error taxonomy and the server-side domain errors.

pub mod handlers;
pub mod types;

pub use types::*;
