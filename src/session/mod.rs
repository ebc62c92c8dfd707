//! Session state
//!
//! The protocol state machine both ends of a control connection run.

pub mod state;

pub use state::{AuthState, Session, SessionRole};
