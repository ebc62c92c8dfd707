//! Error types
//!
//! Defines the protocol-level error taxonomy shared by both session roles and the
//! domain-specific errors raised by the server-side modules.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::Reply;

/// Errors surfaced by control-channel, data-channel and session operations.
#[derive(Debug)]
pub enum FtpError {
    /// The control connection could not be read (closed or reset).
    ChannelRead(io::Error),
    /// A command or reply could not be written to the control connection.
    ChannelWrite { command: String, source: io::Error },
    /// A reply line was malformed or a multiline reply was cut short.
    ProtocolFraming(String),
    /// A `h1,h2,h3,h4,p1,p2` tuple failed validation, or no IPv4 address was usable.
    MalformedAddressTuple(String),
    /// No data connection arrived (or could be made) within the bounded wait.
    DataChannelTimeout(Duration),
    /// A control or data read/write did not complete within the bounded wait.
    ChannelTimeout(Duration),
    /// The peer refused a TYPE/PASV/PORT negotiation.
    NegotiationRejected(Reply),
    /// The peer refused any other command.
    CommandRejected { command: String, reply: Reply },
    /// LIST/RETR attempted without a negotiated data channel.
    NoDataChannel,
    /// The data channel closed without a matching completion reply.
    IncompleteTransfer(String),
    /// The control connection closed while an operation was in flight.
    SessionAborted,
    /// The command requires a logged-in session.
    NotAuthenticated,
    /// The command is not valid in the current session state.
    InvalidState(String),
    /// The initial control connection could not be established.
    ConnectFailed(String, io::Error),
    /// The data connection could not be accepted or connected.
    DataChannelOpen(io::Error),
    /// Read or write failure on an open data channel.
    DataChannel(io::Error),
    /// The local sink or source failed.
    LocalIo(io::Error),
}

impl FtpError {
    /// Returns the peer reply attached to this error, if any.
    pub fn reply(&self) -> Option<&Reply> {
        match self {
            FtpError::NegotiationRejected(reply) => Some(reply),
            FtpError::CommandRejected { reply, .. } => Some(reply),
            _ => None,
        }
    }

    /// Whether the control connection can no longer be used after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FtpError::ChannelRead(_)
                | FtpError::ChannelWrite { .. }
                | FtpError::ProtocolFraming(_)
                | FtpError::SessionAborted
        )
    }
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FtpError::ChannelRead(e) => write!(f, "Control channel read failed: {}", e),
            FtpError::ChannelWrite { command, source } => {
                write!(f, "Failed to send {}: {}", command, source)
            }
            FtpError::ProtocolFraming(msg) => write!(f, "Protocol framing error: {}", msg),
            FtpError::MalformedAddressTuple(msg) => write!(f, "Malformed address tuple: {}", msg),
            FtpError::DataChannelTimeout(d) => {
                write!(f, "No data connection within {}s", d.as_secs_f32())
            }
            FtpError::ChannelTimeout(d) => {
                write!(f, "Channel operation timed out after {}s", d.as_secs_f32())
            }
            FtpError::NegotiationRejected(reply) => write!(f, "Negotiation rejected: {}", reply),
            FtpError::CommandRejected { command, reply } => {
                write!(f, "{} rejected: {}", command, reply)
            }
            FtpError::NoDataChannel => write!(f, "No data channel negotiated; use PASV or PORT"),
            FtpError::IncompleteTransfer(msg) => write!(f, "Incomplete transfer: {}", msg),
            FtpError::SessionAborted => write!(f, "Session aborted: control connection closed"),
            FtpError::NotAuthenticated => write!(f, "Not logged in"),
            FtpError::InvalidState(msg) => write!(f, "Invalid session state: {}", msg),
            FtpError::ConnectFailed(addr, e) => write!(f, "Failed to connect to {}: {}", addr, e),
            FtpError::DataChannelOpen(e) => write!(f, "Failed to open data channel: {}", e),
            FtpError::DataChannel(e) => write!(f, "Data channel error: {}", e),
            FtpError::LocalIo(e) => write!(f, "Local I/O error: {}", e),
        }
    }
}

impl std::error::Error for FtpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FtpError::ChannelRead(e)
            | FtpError::ConnectFailed(_, e)
            | FtpError::DataChannelOpen(e)
            | FtpError::DataChannel(e)
            | FtpError::LocalIo(e) => Some(e),
            FtpError::ChannelWrite { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Authentication module errors
#[derive(Debug)]
pub enum AuthError {
    InvalidUsername(String),
    InvalidPassword(String),
    UserNotFound(String),
    MalformedInput(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidUsername(u) => write!(f, "Invalid username: {}", u),
            AuthError::InvalidPassword(u) => write!(f, "Invalid password for user: {}", u),
            AuthError::UserNotFound(u) => write!(f, "User not found: {}", u),
            AuthError::MalformedInput(s) => write!(f, "Malformed input: {}", s),
        }
    }
}

impl std::error::Error for AuthError {}

/// Storage module errors
#[derive(Debug)]
pub enum StorageError {
    FileNotFound(String),
    NotAFile(String),
    InvalidPath(String),
    PathTraversal(String),
    IoError(io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::FileNotFound(p) => write!(f, "File not found: {}", p),
            StorageError::NotAFile(p) => write!(f, "Not a plain file: {}", p),
            StorageError::InvalidPath(p) => write!(f, "Invalid path: {}", p),
            StorageError::PathTraversal(p) => write!(f, "Path traversal attempt: {}", p),
            StorageError::IoError(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<io::Error> for StorageError {
    fn from(error: io::Error) -> Self {
        StorageError::IoError(error)
    }
}

/// Navigate module errors
#[derive(Debug)]
pub enum NavigateError {
    InvalidPath(String),
    DirectoryNotFound(String),
    NotADirectory(String),
    PathTraversal(String),
}

impl fmt::Display for NavigateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NavigateError::InvalidPath(p) => write!(f, "Invalid path: {}", p),
            NavigateError::DirectoryNotFound(p) => write!(f, "Directory not found: {}", p),
            NavigateError::NotADirectory(p) => write!(f, "Not a directory: {}", p),
            NavigateError::PathTraversal(p) => write!(f, "Path traversal attempt: {}", p),
        }
    }
}

impl std::error::Error for NavigateError {}

impl From<StorageError> for NavigateError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::PathTraversal(p) => NavigateError::PathTraversal(p),
            other => NavigateError::InvalidPath(other.to_string()),
        }
    }
}

/// Data-channel setup errors raised while serving PASV/PORT
#[derive(Debug)]
pub enum TransferError {
    PortBindingFailed(SocketAddr, io::Error),
    NoAvailablePort,
    ListenerConfigurationFailed(io::Error),
    IpMismatch { expected: String, provided: String },
    InvalidPortRange(u16),
    Address(FtpError),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::PortBindingFailed(addr, e) => {
                write!(f, "Failed to bind to {}: {}", addr, e)
            }
            TransferError::NoAvailablePort => write!(f, "No available port for data connection"),
            TransferError::ListenerConfigurationFailed(e) => {
                write!(f, "Failed to configure listener: {}", e)
            }
            TransferError::IpMismatch { expected, provided } => {
                write!(f, "IP mismatch: expected {}, got {}", expected, provided)
            }
            TransferError::InvalidPortRange(port) => {
                write!(f, "Invalid port {}: below the permitted client range", port)
            }
            TransferError::Address(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for TransferError {}

impl From<FtpError> for TransferError {
    fn from(error: FtpError) -> Self {
        TransferError::Address(error)
    }
}

/// Any error a server-side command handler can turn into a reply.
#[derive(Debug)]
pub enum ServerError {
    Auth(AuthError),
    Storage(StorageError),
    Navigate(NavigateError),
    Transfer(TransferError),
    Protocol(FtpError),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Auth(e) => write!(f, "Authentication error: {}", e),
            ServerError::Storage(e) => write!(f, "Storage error: {}", e),
            ServerError::Navigate(e) => write!(f, "Navigate error: {}", e),
            ServerError::Transfer(e) => write!(f, "Transfer error: {}", e),
            ServerError::Protocol(e) => write!(f, "Protocol error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<AuthError> for ServerError {
    fn from(error: AuthError) -> Self {
        ServerError::Auth(error)
    }
}

impl From<StorageError> for ServerError {
    fn from(error: StorageError) -> Self {
        ServerError::Storage(error)
    }
}

impl From<NavigateError> for ServerError {
    fn from(error: NavigateError) -> Self {
        ServerError::Navigate(error)
    }
}

impl From<TransferError> for ServerError {
    fn from(error: TransferError) -> Self {
        ServerError::Transfer(error)
    }
}

impl From<FtpError> for ServerError {
    fn from(error: FtpError) -> Self {
        ServerError::Protocol(error)
    }
}
