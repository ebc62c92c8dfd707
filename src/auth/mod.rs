//! Authentication system
//!
//! Handles user credential storage and validation for server sessions.

pub mod credentials;
pub mod validator;

pub use credentials::CredentialStore;
pub use validator::{validate_password, validate_user};
