//! Module `commands`
//!
//! Defines the control-channel command set, the parser that turns a raw line
//! into a tagged command, and the wire encoding used when sending one.

use std::fmt;

use crate::transfer::{HostPort, TransferType};

/// Represents an FTP command exchanged on the control channel.
///
/// Commands that require arguments carry them in the variant. A known verb
/// with a missing or invalid argument parses to `MALFORMED`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    USER(String),       // Username for login
    PASS(String),       // Password for login
    TYPE(TransferType), // Representation type
    CWD(String),        // Change working directory
    CDUP,               // Change to parent directory
    PWD,                // Print working directory
    PASV,               // Listener-offered data channel
    PORT(HostPort),     // Connector-offered data channel
    LIST,               // Directory listing over the data channel
    RETR(String),       // Retrieve/download file
    QUIT,
    MALFORMED { verb: String, reason: String },
    UNKNOWN(String),
}

/// Represents the outcome status of handling a command on the server.
#[derive(Debug, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    Failure(String),
    CloseConnection,
}

impl Command {
    /// The upper-case verb as it appears on the wire.
    pub fn verb(&self) -> &str {
        match self {
            Command::USER(_) => "USER",
            Command::PASS(_) => "PASS",
            Command::TYPE(_) => "TYPE",
            Command::CWD(_) => "CWD",
            Command::CDUP => "CDUP",
            Command::PWD => "PWD",
            Command::PASV => "PASV",
            Command::PORT(_) => "PORT",
            Command::LIST => "LIST",
            Command::RETR(_) => "RETR",
            Command::QUIT => "QUIT",
            Command::MALFORMED { verb, .. } => verb,
            Command::UNKNOWN(verb) => verb,
        }
    }

    /// Wire form with the password hidden, for logging.
    pub fn masked(&self) -> String {
        match self {
            Command::PASS(_) => "PASS ****".to_string(),
            other => other.to_string(),
        }
    }

    /// Whether the command moves bytes over the data channel.
    pub fn needs_data_channel(&self) -> bool {
        matches!(self, Command::LIST | Command::RETR(_))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::USER(name) => write!(f, "USER {}", name),
            Command::PASS(secret) => write!(f, "PASS {}", secret),
            Command::TYPE(kind) => write!(f, "TYPE {}", kind.code()),
            Command::CWD(path) => write!(f, "CWD {}", path),
            Command::PORT(addr) => write!(f, "PORT {}", addr),
            Command::RETR(path) => write!(f, "RETR {}", path),
            other => write!(f, "{}", other.verb()),
        }
    }
}

/// Parses a raw command line received from a client into the `Command` enum.
pub fn parse_command(raw: &str) -> Command {
    let trimmed = raw.trim();
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let cmd = parts.next().unwrap_or("").to_ascii_uppercase();
    let arg = parts.next().unwrap_or("").trim();

    let malformed = |reason: &str| Command::MALFORMED {
        verb: cmd.clone(),
        reason: reason.to_string(),
    };

    match cmd.as_str() {
        "USER" if arg.is_empty() => malformed("USER requires a user name"),
        "USER" => Command::USER(arg.to_string()),
        "PASS" if arg.is_empty() => malformed("PASS requires a password"),
        "PASS" => Command::PASS(arg.to_string()),
        "TYPE" => match arg.split_whitespace().next().and_then(TransferType::from_code) {
            Some(kind) => Command::TYPE(kind),
            None => malformed("TYPE requires A or I"),
        },
        "CWD" if arg.is_empty() => malformed("CWD requires a path"),
        "CWD" => Command::CWD(arg.to_string()),
        "CDUP" => Command::CDUP,
        "PWD" => Command::PWD,
        "PASV" => Command::PASV,
        "PORT" => match arg.parse::<HostPort>() {
            Ok(addr) => Command::PORT(addr),
            Err(e) => malformed(&e.to_string()),
        },
        "LIST" => Command::LIST,
        "RETR" if arg.is_empty() => malformed("RETR requires a file name"),
        "RETR" => Command::RETR(arg.to_string()),
        "QUIT" => Command::QUIT,
        _ => Command::UNKNOWN(cmd.clone()),
    }
}
