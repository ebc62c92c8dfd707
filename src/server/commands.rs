//! Module `commands`
//!
//! Server-side command dispatch. Every command is checked against the session
//! first; a refused command is answered without side effects. The reply is
//! applied to the session before it is sent.

use log::{info, warn};
use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::auth::{validate_password, validate_user};
use crate::error::handlers::{error_to_reply_code, handle_error, protocol_error_code};
use crate::error::{FtpError, ServerError, TransferError};
use crate::navigate;
use crate::protocol::responses::*;
use crate::protocol::{Command, CommandStatus, ControlChannel, Reply};
use crate::server::handler::SessionContext;
use crate::session::Session;
use crate::storage;
use crate::transfer::{self, DataChannel, DataChannelMode, HostPort, TransferRequest};

/// Handles one parsed command and sends its reply(ies).
pub async fn handle_command<R, W>(
    control: &mut ControlChannel<R, W>,
    session: &mut Session,
    context: &SessionContext,
    command: Command,
) -> CommandStatus
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if let Err(violation) = session.check(&command) {
        warn!(
            "Refused {} from {}: {}",
            command.verb(),
            context.peer,
            violation
        );
        let reply = Reply::new(protocol_error_code(&violation), violation.to_string());
        return respond(control, &reply, CommandStatus::Failure(violation.to_string())).await;
    }

    let root = context.config.server_root_path();
    let result = match &command {
        Command::USER(username) => handle_user(username, context),
        Command::PASS(password) => handle_pass(session, password, context),
        Command::TYPE(transfer_type) => Ok(Reply::new(
            OK,
            format!("Type set to {}", transfer_type.code()),
        )),
        Command::CWD(path) => {
            let moved = navigate::change_directory(&root, session.working_directory(), path).await;
            moved.map(|new_path| {
                session.set_working_directory(new_path);
                Reply::new(FILE_ACTION_OK, "Directory successfully changed")
            })
            .map_err(ServerError::from)
        }
        Command::CDUP => {
            let moved = navigate::change_to_parent(&root, session.working_directory()).await;
            moved.map(|new_path| {
                session.set_working_directory(new_path);
                Reply::new(FILE_ACTION_OK, "Directory successfully changed")
            })
            .map_err(ServerError::from)
        }
        Command::PWD => Ok(Reply::new(
            PATH_CREATED,
            format!(
                "{} is the current directory",
                quote_path(session.working_directory())
            ),
        )),
        Command::PASV => handle_pasv(session, context).await,
        Command::PORT(target) => handle_port(session, *target, context),
        Command::LIST | Command::RETR(_) => {
            return handle_transfer(control, session, context, &command).await;
        }
        Command::QUIT => Ok(Reply::new(CLOSING, "Goodbye")),
        Command::UNKNOWN(verb) => Ok(Reply::new(
            NOT_IMPLEMENTED,
            format!("Command {} not implemented", verb),
        )),
        Command::MALFORMED { reason, .. } => Ok(Reply::new(ARGUMENT_ERROR, reason.clone())),
    };

    let reply = match result {
        Ok(reply) => reply,
        Err(e) => {
            handle_error(&context.peer.to_string(), &e);
            Reply::new(error_to_reply_code(&e), e.to_string())
        }
    };
    session.observe(&command, &reply);

    let status = if command == Command::QUIT {
        CommandStatus::CloseConnection
    } else if reply.is_success() || reply.is_intermediate() {
        CommandStatus::Success
    } else {
        CommandStatus::Failure(reply.text())
    };
    respond(control, &reply, status).await
}

fn handle_user(username: &str, context: &SessionContext) -> Result<Reply, ServerError> {
    validate_user(username, &context.credentials)?;
    let text = if context.credentials.is_anonymous(username) {
        "Anonymous login okay, send your email as password"
    } else {
        "Please specify the password"
    };
    Ok(Reply::new(PASSWORD_REQUIRED, text))
}

fn handle_pass(
    session: &mut Session,
    password: &str,
    context: &SessionContext,
) -> Result<Reply, ServerError> {
    // `check` guarantees a pending USER
    let username = session.username().unwrap_or_default().to_string();
    validate_password(&username, password, &context.credentials)?;
    session.set_working_directory("/".to_string());
    info!("User {} logged in from {}", username, context.peer);
    Ok(Reply::new(LOGIN_SUCCESS, "Login successful"))
}

async fn handle_pasv(
    session: &mut Session,
    context: &SessionContext,
) -> Result<Reply, ServerError> {
    session.begin_negotiation()?;
    let channel = transfer::offer_passive(
        context.local_addr.ip(),
        context.config.data_port_range(),
        context.peer.ip().to_canonical(),
    )
    .await?;
    let advertised = HostPort::from_socket_addr(channel.address()).map_err(TransferError::from)?;
    session.install_data_channel(DataChannelMode::Listener, channel);
    Ok(Reply::new(
        PASSIVE_MODE,
        format!("Entering Passive Mode ({})", advertised),
    ))
}

fn handle_port(
    session: &mut Session,
    target: HostPort,
    context: &SessionContext,
) -> Result<Reply, ServerError> {
    session.begin_negotiation()?;
    let channel = transfer::accept_active(target, context.peer, context.config.min_client_port)?;
    session.install_data_channel(DataChannelMode::Connector, channel);
    Ok(Reply::new(OK, "PORT command successful"))
}

/// LIST and RETR: `150`, the data transfer, then `226` or the failure code.
async fn handle_transfer<R, W>(
    control: &mut ControlChannel<R, W>,
    session: &mut Session,
    context: &SessionContext,
    command: &Command,
) -> CommandStatus
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let Some(channel) = session.take_data_channel() else {
        let reply = Reply::new(CANT_OPEN_DATA, FtpError::NoDataChannel.to_string());
        return respond(control, &reply, CommandStatus::Failure(reply.text())).await;
    };
    let root = context.config.server_root_path();

    match command {
        Command::RETR(filename) => {
            let opened = storage::open_for_read(&root, session.working_directory(), filename).await;
            let (mut file, size, virtual_path) = match opened {
                Ok(opened) => opened,
                Err(e) => return refuse_transfer(control, context, channel, e.into()).await,
            };
            let opening = Reply::new(
                OPENING_DATA,
                format!(
                    "Opening {} mode data connection for {} ({} bytes)",
                    session.transfer_type().label(),
                    virtual_path,
                    size
                ),
            );
            let request =
                TransferRequest::send_file(&virtual_path, session.transfer_type(), &mut file, size);
            stream_transfer(control, session, context, channel, opening, request).await
        }
        _ => {
            let entries =
                match storage::list_entries(&root, session.working_directory()).await {
                    Ok(entries) => entries,
                    Err(e) => return refuse_transfer(control, context, channel, e.into()).await,
                };
            let listing = storage::format_listing(&entries);
            let mut source: &[u8] = listing.as_bytes();
            let opening = Reply::new(OPENING_DATA, "Here comes the directory listing");
            let request = TransferRequest::send_listing(&mut source);
            stream_transfer(control, session, context, channel, opening, request).await
        }
    }
}

async fn stream_transfer<R, W>(
    control: &mut ControlChannel<R, W>,
    session: &mut Session,
    context: &SessionContext,
    channel: DataChannel,
    opening: Reply,
    request: TransferRequest<'_>,
) -> CommandStatus
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if let Err(e) = control.send_reply(&opening).await {
        warn!("Failed to announce transfer to {}: {}", context.peer, e);
        channel.close();
        return CommandStatus::CloseConnection;
    }

    match context
        .engine
        .execute(request, channel, control.reader_mut())
        .await
    {
        Ok(report) => {
            info!("Sent {} to {}", report, context.peer);
            let reply = Reply::new(TRANSFER_COMPLETE, "Transfer complete");
            respond(control, &reply, CommandStatus::Success).await
        }
        Err(FtpError::SessionAborted) => {
            warn!("Client {} went away during transfer", context.peer);
            session.close();
            CommandStatus::CloseConnection
        }
        Err(e) => {
            warn!("Transfer to {} failed: {}", context.peer, e);
            let reply = Reply::new(protocol_error_code(&e), e.to_string());
            respond(control, &reply, CommandStatus::Failure(e.to_string())).await
        }
    }
}

async fn refuse_transfer<R, W>(
    control: &mut ControlChannel<R, W>,
    context: &SessionContext,
    channel: DataChannel,
    error: ServerError,
) -> CommandStatus
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    channel.close();
    handle_error(&context.peer.to_string(), &error);
    let reply = Reply::new(error_to_reply_code(&error), error.to_string());
    respond(control, &reply, CommandStatus::Failure(error.to_string())).await
}

async fn respond<R, W>(
    control: &mut ControlChannel<R, W>,
    reply: &Reply,
    status: CommandStatus,
) -> CommandStatus
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match control.send_reply(reply).await {
        Ok(()) => status,
        Err(e) => {
            warn!("Failed to send reply {}: {}", reply.code(), e);
            CommandStatus::CloseConnection
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::auth::CredentialStore;
    use crate::config::ServerConfig;
    use crate::transfer::TransferEngine;

    fn context(root: &std::path::Path) -> SessionContext {
        let config = ServerConfig {
            server_root: root.to_string_lossy().to_string(),
            users: [("alice".to_string(), "alice123".to_string())].into(),
            ..ServerConfig::default()
        };
        SessionContext {
            credentials: Arc::new(CredentialStore::from_config(&config)),
            engine: TransferEngine::new(config.buffer_size, Duration::from_secs(1)),
            config: Arc::new(config),
            local_addr: "127.0.0.1:2121".parse().unwrap(),
            peer: "127.0.0.1:40000".parse().unwrap(),
        }
    }

    fn control() -> ControlChannel<&'static [u8], Vec<u8>> {
        let no_input: &'static [u8] = &[];
        ControlChannel::new(no_input, Vec::new(), Duration::from_secs(1))
    }

    async fn run(
        control: &mut ControlChannel<&'static [u8], Vec<u8>>,
        session: &mut Session,
        context: &SessionContext,
        line: &str,
    ) -> CommandStatus {
        handle_command(control, session, context, crate::protocol::parse_command(line)).await
    }

    fn sent(control: ControlChannel<&'static [u8], Vec<u8>>) -> String {
        String::from_utf8(control.into_inner().1).unwrap()
    }

    fn new_session() -> Session {
        Session::new(
            crate::session::SessionRole::Server,
            "127.0.0.1:40000".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn login_navigation_and_quit() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("pub")).unwrap();
        let context = context(root.path());
        let mut control = control();
        let mut session = new_session();

        run(&mut control, &mut session, &context, "USER alice").await;
        run(&mut control, &mut session, &context, "PASS alice123").await;
        run(&mut control, &mut session, &context, "CWD pub").await;
        run(&mut control, &mut session, &context, "PWD").await;
        run(&mut control, &mut session, &context, "CDUP").await;
        run(&mut control, &mut session, &context, "TYPE A").await;
        run(&mut control, &mut session, &context, "NOOP").await;
        let status = run(&mut control, &mut session, &context, "QUIT").await;
        assert_eq!(status, CommandStatus::CloseConnection);
        assert!(session.is_closed());

        let codes: Vec<String> = sent(control)
            .lines()
            .map(|line| line[..3].to_string())
            .collect();
        assert_eq!(codes, ["331", "230", "250", "257", "250", "200", "502", "221"]);
    }

    #[tokio::test]
    async fn sequencing_violations_get_reply_codes() {
        let root = tempfile::tempdir().unwrap();
        let context = context(root.path());
        let mut control = control();
        let mut session = new_session();

        run(&mut control, &mut session, &context, "PASS x").await;
        run(&mut control, &mut session, &context, "PWD").await;
        run(&mut control, &mut session, &context, "USER alice").await;
        run(&mut control, &mut session, &context, "PASS wrong").await;
        // A rejected password means USER again.
        run(&mut control, &mut session, &context, "PASS alice123").await;
        run(&mut control, &mut session, &context, "USER alice").await;
        run(&mut control, &mut session, &context, "PASS alice123").await;
        run(&mut control, &mut session, &context, "LIST").await;
        run(&mut control, &mut session, &context, "PORT 10,0,0,1,20,0").await;
        run(&mut control, &mut session, &context, "CWD ../..").await;

        let output = sent(control);
        let codes: Vec<&str> = output.lines().map(|line| &line[..3]).collect();
        assert_eq!(
            codes,
            ["503", "530", "331", "530", "503", "331", "230", "425", "501", "550"]
        );
    }

    #[tokio::test]
    async fn passive_offer_advertises_local_address() {
        let root = tempfile::tempdir().unwrap();
        let context = context(root.path());
        let mut control = control();
        let mut session = new_session();

        run(&mut control, &mut session, &context, "USER anonymous").await;
        run(&mut control, &mut session, &context, "PASS guest").await;
        run(&mut control, &mut session, &context, "PASV").await;
        assert_eq!(session.data_mode(), DataChannelMode::Listener);

        let output = sent(control);
        let reply = output.lines().last().unwrap();
        assert!(reply.starts_with("227 Entering Passive Mode (127,0,0,1,"), "{}", reply);
    }
}
