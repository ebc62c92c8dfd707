//! Module `state`
//!
//! Per-connection protocol state shared by the client and server ends: login
//! progress, representation type, working directory, and the negotiated data
//! channel.

use log::{debug, info};
use std::net::SocketAddr;

use crate::error::FtpError;
use crate::protocol::{Command, Reply};
use crate::transfer::{DataChannel, DataChannelMode, TransferType};

/// Login progress of a control connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    AwaitingPassword {
        username: String,
    },
    Authenticated {
        username: String,
    },
    Closed,
}

/// Which end of the control connection a session tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Client,
    Server,
}

/// State of one control connection.
///
/// Commands are checked with [`Session::check`] before anything goes on the
/// wire, and the reply they drew is applied with [`Session::observe`].
#[derive(Debug)]
pub struct Session {
    role: SessionRole,
    peer: SocketAddr,
    auth: AuthState,
    transfer_type: TransferType,
    working_directory: String,
    data_mode: DataChannelMode,
    data_channel: Option<DataChannel>,
}

impl Session {
    pub fn new(role: SessionRole, peer: SocketAddr) -> Self {
        Self {
            role,
            peer,
            auth: AuthState::Unauthenticated,
            transfer_type: TransferType::default(),
            working_directory: "/".to_string(),
            data_mode: DataChannelMode::None,
            data_channel: None,
        }
    }

    // --------------------
    // Getter methods
    // --------------------

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn auth(&self) -> &AuthState {
        &self.auth
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.auth, AuthState::Authenticated { .. })
    }

    pub fn is_closed(&self) -> bool {
        self.auth == AuthState::Closed
    }

    pub fn username(&self) -> Option<&str> {
        match &self.auth {
            AuthState::AwaitingPassword { username } | AuthState::Authenticated { username } => {
                Some(username)
            }
            _ => None,
        }
    }

    pub fn transfer_type(&self) -> TransferType {
        self.transfer_type
    }

    pub fn working_directory(&self) -> &str {
        &self.working_directory
    }

    pub fn data_mode(&self) -> DataChannelMode {
        self.data_mode
    }

    pub fn has_data_channel(&self) -> bool {
        self.data_channel.is_some()
    }

    // --------------------
    // Transitions
    // --------------------

    /// Verifies that `command` may be issued in the current state.
    pub fn check(&self, command: &Command) -> Result<(), FtpError> {
        if self.is_closed() {
            return Err(FtpError::InvalidState(format!(
                "{} issued on a closed session",
                command.verb()
            )));
        }

        match command {
            Command::USER(_)
            | Command::QUIT
            | Command::UNKNOWN(_)
            | Command::MALFORMED { .. } => Ok(()),
            Command::PASS(_) => match self.auth {
                AuthState::AwaitingPassword { .. } => Ok(()),
                _ => Err(FtpError::InvalidState(
                    "PASS must directly follow an accepted USER".into(),
                )),
            },
            _ if !self.is_authenticated() => Err(FtpError::NotAuthenticated),
            Command::LIST | Command::RETR(_) if self.data_channel.is_none() => {
                Err(FtpError::NoDataChannel)
            }
            _ => Ok(()),
        }
    }

    /// Applies the state change implied by `reply` to `command`.
    pub fn observe(&mut self, command: &Command, reply: &Reply) {
        match command {
            Command::USER(username) => {
                self.auth = if reply.is_success() {
                    AuthState::Authenticated {
                        username: username.clone(),
                    }
                } else if reply.is_preliminary() || reply.is_intermediate() {
                    AuthState::AwaitingPassword {
                        username: username.clone(),
                    }
                } else {
                    AuthState::Unauthenticated
                };
            }
            Command::PASS(_) => {
                let username = self.username().map(str::to_string);
                self.auth = match username {
                    Some(username) if reply.is_success() => {
                        info!("{} logged in as {}", self.peer, username);
                        AuthState::Authenticated { username }
                    }
                    _ => AuthState::Unauthenticated,
                };
            }
            Command::TYPE(transfer_type) if reply.is_success() => {
                self.transfer_type = *transfer_type;
                self.close_data_channel();
            }
            Command::CWD(_) | Command::CDUP if reply.is_success() => {
                self.close_data_channel();
            }
            Command::QUIT => self.close(),
            _ => {}
        }
    }

    /// Prepares for PASV or PORT: the caller must be logged in, and any
    /// previously negotiated channel is released first.
    pub fn begin_negotiation(&mut self) -> Result<(), FtpError> {
        if self.is_closed() {
            return Err(FtpError::InvalidState(
                "data channel negotiation on a closed session".into(),
            ));
        }
        if !self.is_authenticated() {
            return Err(FtpError::NotAuthenticated);
        }
        self.close_data_channel();
        Ok(())
    }

    pub fn install_data_channel(&mut self, mode: DataChannelMode, channel: DataChannel) {
        debug!(
            "{} data channel {:?} at {}",
            self.peer,
            mode,
            channel.address()
        );
        self.data_mode = mode;
        self.data_channel = Some(channel);
    }

    /// Hands the negotiated channel to a transfer. A channel is used once.
    pub fn take_data_channel(&mut self) -> Option<DataChannel> {
        self.data_mode = DataChannelMode::None;
        self.data_channel.take()
    }

    pub fn close_data_channel(&mut self) {
        self.data_mode = DataChannelMode::None;
        if let Some(channel) = self.data_channel.take() {
            channel.close();
        }
    }

    pub fn set_working_directory(&mut self, path: String) {
        self.working_directory = path;
    }

    /// Terminal state; every later command is refused.
    pub fn close(&mut self) {
        self.close_data_channel();
        if !self.is_closed() {
            info!("{:?} session with {} closed", self.role, self.peer);
        }
        self.auth = AuthState::Closed;
    }
}
