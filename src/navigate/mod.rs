//! Navigate module
//!
//! Handles directory navigation for server sessions: changing into a
//! directory and moving to its parent, confined to the server root.

mod operations;

// Re-export public functions
pub use operations::{change_directory, change_to_parent};
