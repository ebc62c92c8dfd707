//! FTP Protocol implementation
//!
//! Command parsing and encoding, reply parsing, and the control-channel codec.

pub mod codec;
pub mod commands;
pub mod reply;
pub mod responses;

pub use codec::ControlChannel;
pub use commands::{Command, CommandStatus, parse_command};
pub use reply::{Reply, ReplyClass, ReplyLine, parse_reply_line};
