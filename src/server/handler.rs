use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::TcpStream;

use crate::auth::CredentialStore;
use crate::config::ServerConfig;
use crate::error::FtpError;
use crate::protocol::responses::{SERVICE_UNAVAILABLE, SYNTAX_ERROR, greeting};
use crate::protocol::{CommandStatus, ControlChannel, Reply, parse_command};
use crate::server::commands::handle_command;
use crate::session::{Session, SessionRole};
use crate::transfer::TransferEngine;

/// What a connection task knows besides its own session.
pub struct SessionContext {
    pub config: Arc<ServerConfig>,
    pub credentials: Arc<CredentialStore>,
    /// Local end of the control connection; PASV listeners bind to its IP.
    pub local_addr: SocketAddr,
    pub peer: SocketAddr,
    pub engine: TransferEngine,
}

/// Drives one control connection from greeting to close.
///
/// - Reads command lines; an idle connection is closed with `421`.
/// - Over-long lines are answered with `500` and skipped.
/// - Dispatches everything else through `handle_command`.
pub async fn handle_client(stream: TcpStream, context: SessionContext) {
    let peer = context.peer;
    let (read_half, write_half) = stream.into_split();
    let mut control = ControlChannel::new(
        BufReader::new(read_half),
        write_half,
        context.config.connection_timeout(),
    )
    .with_max_line(context.config.max_command_length);
    let mut session = Session::new(SessionRole::Server, peer);

    if let Err(e) = control.send_reply(&greeting()).await {
        warn!("Failed to greet {}: {}", peer, e);
        return;
    }

    loop {
        let line = match control.read_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Connection closed by client {}", peer);
                break;
            }
            Err(FtpError::ChannelTimeout(idle)) => {
                info!("Client {} idle for {}s, closing", peer, idle.as_secs());
                let reply = Reply::new(SERVICE_UNAVAILABLE, "Idle timeout, closing control connection");
                let _ = control.send_reply(&reply).await;
                break;
            }
            Err(e) => {
                error!("Failed to read from {}: {}", peer, e);
                break;
            }
        };

        // Enforce command length limit
        if line.len() > context.config.max_command_length {
            let reply = Reply::new(SYNTAX_ERROR, "Command too long");
            if control.send_reply(&reply).await.is_err() {
                break;
            }
            continue;
        }

        let command = parse_command(&line);
        debug!("Received from {}: {}", peer, command.masked());

        match handle_command(&mut control, &mut session, &context, command).await {
            CommandStatus::CloseConnection => break,
            CommandStatus::Success => {}
            CommandStatus::Failure(reason) => debug!("Command from {} failed: {}", peer, reason),
        }
    }

    session.close();
    info!("Client {} disconnected", peer);
}
