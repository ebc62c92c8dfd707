//! Transfer module
//!
//! Data channel negotiation, the host/port tuple codec, and the engine that
//! streams listings and files across an opened channel.

pub mod address;
pub mod data_channel;
pub mod engine;
pub mod modes;
pub mod operations;
pub mod results;

// Re-export key types and functions
pub use address::HostPort;
pub use data_channel::{DataChannel, DataChannelRole};
pub use engine::{TransferEndpoint, TransferEngine, TransferRequest};
pub use modes::{DataChannelMode, TransferType};
pub use operations::{accept_active, negotiate_active, negotiate_passive, offer_passive};
pub use results::{TransferKind, TransferReport};
