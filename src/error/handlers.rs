//! Error handlers
//!
//! Maps server-side errors onto reply codes and logs them.

use crate::error::types::{FtpError, ServerError, TransferError};
use log::error;

/// Log a server error with the peer it concerns
pub fn handle_error(peer: &str, err: &ServerError) {
    error!("Command from {} failed: {}", peer, err);
}

/// Convert a protocol error to the reply code a server sends for it
pub fn protocol_error_code(err: &FtpError) -> u16 {
    match err {
        FtpError::NotAuthenticated => 530,
        FtpError::InvalidState(_) => 503,
        FtpError::NoDataChannel => 425,
        FtpError::DataChannelTimeout(_) | FtpError::DataChannelOpen(_) => 425,
        FtpError::MalformedAddressTuple(_) => 501,
        FtpError::DataChannel(_)
        | FtpError::ChannelTimeout(_)
        | FtpError::IncompleteTransfer(_) => 426,
        FtpError::LocalIo(_) => 451,
        FtpError::SessionAborted | FtpError::ChannelRead(_) | FtpError::ChannelWrite { .. } => {
            421
        }
        FtpError::NegotiationRejected(reply) => reply.code(),
        FtpError::CommandRejected { reply, .. } => reply.code(),
        FtpError::ProtocolFraming(_) | FtpError::ConnectFailed(..) => 500,
    }
}

/// Convert a server error to the reply code sent to the client
pub fn error_to_reply_code(err: &ServerError) -> u16 {
    match err {
        ServerError::Auth(_) => 530,
        ServerError::Storage(_) => 550,
        ServerError::Navigate(_) => 550,
        ServerError::Transfer(TransferError::IpMismatch { .. })
        | ServerError::Transfer(TransferError::InvalidPortRange(_))
        | ServerError::Transfer(TransferError::Address(_)) => 501,
        ServerError::Transfer(_) => 425,
        ServerError::Protocol(e) => protocol_error_code(e),
    }
}
