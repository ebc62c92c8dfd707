//! Transfer result types
//!
//! Defines result structures returned by transfer operations.

use std::fmt;

use crate::protocol::Reply;

/// What a transfer moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferKind {
    Listing,
    FileRetrieve(String),
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferKind::Listing => write!(f, "directory listing"),
            TransferKind::FileRetrieve(path) => write!(f, "file {}", path),
        }
    }
}

/// Outcome of a completed data transfer.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub kind: TransferKind,
    /// Bytes moved over the data channel.
    pub bytes: u64,
    /// Size announced before the transfer, when known.
    pub expected_size: Option<u64>,
    /// The completion reply, once confirmed on the control channel.
    pub reply: Option<Reply>,
}

impl fmt::Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} bytes", self.kind, self.bytes)?;
        if let Some(reply) = &self.reply {
            write!(f, " ({})", reply)?;
        }
        Ok(())
    }
}
