//! File system storage management
//!
//! Handles file access and path validation under the server root.

pub mod filesystem;
pub mod validation;

// Re-export commonly used functions
pub use filesystem::{
    EntryInfo, format_listing, list_entries, open_for_read, open_for_write, partial_path,
};
pub use validation::{parent_virtual_path, resolve_virtual_path, virtual_to_real_path};
