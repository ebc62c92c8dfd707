//! Module `session`
//!
//! The client end of a control connection. Every user-level operation is one
//! method on [`FtpClient`]; operations run strictly one after another, and a
//! data transfer finishes before the next command goes out.

use log::{debug, info, warn};
use std::net::SocketAddr;
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time;

use crate::client::results::ListingResult;
use crate::config::ClientConfig;
use crate::error::FtpError;
use crate::protocol::{Command, ControlChannel, Reply};
use crate::session::{Session, SessionRole};
use crate::storage;
use crate::transfer::{
    self, DataChannelMode, TransferEngine, TransferReport, TransferRequest, TransferType,
};

type Control = ControlChannel<BufReader<OwnedReadHalf>, OwnedWriteHalf>;

/// A logged-in (or logging-in) FTP client session.
pub struct FtpClient {
    control: Control,
    session: Session,
    engine: TransferEngine,
    local_addr: SocketAddr,
}

impl FtpClient {
    /// Opens the control connection and reads the server greeting.
    ///
    /// No session exists if this fails.
    pub async fn connect(addr: &str, config: &ClientConfig) -> Result<Self, FtpError> {
        let stream = match time::timeout(config.connect_timeout(), TcpStream::connect(addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(FtpError::ConnectFailed(addr.to_string(), e)),
            Err(_) => return Err(FtpError::ChannelTimeout(config.connect_timeout())),
        };
        let peer = stream
            .peer_addr()
            .map_err(|e| FtpError::ConnectFailed(addr.to_string(), e))?;
        let local_addr = stream
            .local_addr()
            .map_err(|e| FtpError::ConnectFailed(addr.to_string(), e))?;

        let (reader, writer) = stream.into_split();
        let mut control = ControlChannel::new(
            BufReader::new(reader),
            writer,
            config.control_timeout(),
        );

        let mut greeting = control.read_reply().await?;
        while greeting.is_preliminary() {
            debug!("Server not ready yet: {}", greeting);
            greeting = control.read_reply().await?;
        }
        if !greeting.is_success() {
            return Err(FtpError::CommandRejected {
                command: "connect".into(),
                reply: greeting,
            });
        }
        info!("Connected to {}: {}", peer, greeting);

        Ok(Self {
            control,
            session: Session::new(SessionRole::Client, peer),
            engine: TransferEngine::new(config.buffer_size, config.data_timeout()),
            local_addr,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sends `USER`; a password request or an immediate login both succeed.
    pub async fn user(&mut self, username: &str) -> Result<Reply, FtpError> {
        let command = Command::USER(username.to_string());
        let reply = self.exchange(&command).await?;
        if reply.is_success() || reply.is_intermediate() || reply.is_preliminary() {
            Ok(reply)
        } else {
            Err(rejected(&command, reply))
        }
    }

    pub async fn pass(&mut self, password: &str) -> Result<Reply, FtpError> {
        let command = Command::PASS(password.to_string());
        let reply = self.exchange(&command).await?;
        if reply.is_success() {
            Ok(reply)
        } else {
            Err(rejected(&command, reply))
        }
    }

    /// `USER` followed by `PASS` unless the server logged us in already.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<Reply, FtpError> {
        let reply = self.user(username).await?;
        if self.session.is_authenticated() {
            return Ok(reply);
        }
        self.pass(password).await
    }

    /// Switches the representation type. A refusal leaves the type unchanged.
    pub async fn set_type(&mut self, transfer_type: TransferType) -> Result<Reply, FtpError> {
        let reply = self.exchange(&Command::TYPE(transfer_type)).await?;
        if reply.is_success() {
            Ok(reply)
        } else {
            Err(FtpError::NegotiationRejected(reply))
        }
    }

    pub async fn change_directory(&mut self, path: &str) -> Result<Reply, FtpError> {
        let command = Command::CWD(path.to_string());
        let reply = self.exchange(&command).await?;
        if reply.is_success() {
            Ok(reply)
        } else {
            Err(rejected(&command, reply))
        }
    }

    pub async fn to_parent_directory(&mut self) -> Result<Reply, FtpError> {
        let reply = self.exchange(&Command::CDUP).await?;
        if reply.is_success() {
            Ok(reply)
        } else {
            Err(rejected(&Command::CDUP, reply))
        }
    }

    /// Asks for the working directory and records it on the session.
    pub async fn print_working_directory(&mut self) -> Result<String, FtpError> {
        let reply = self.exchange(&Command::PWD).await?;
        if !reply.is_success() {
            return Err(rejected(&Command::PWD, reply));
        }
        let path = reply.quoted_path().ok_or_else(|| {
            FtpError::ProtocolFraming(format!("no quoted path in PWD reply {}", reply))
        })?;
        self.session.set_working_directory(path.clone());
        Ok(path)
    }

    /// Negotiates a listener-offered channel: the server listens, we connect.
    pub async fn enter_passive_mode(&mut self) -> Result<SocketAddr, FtpError> {
        self.session.begin_negotiation()?;
        let negotiated = transfer::negotiate_passive(&mut self.control).await;
        let channel = self.settle(negotiated)?;
        let addr = channel.address();
        self.session
            .install_data_channel(DataChannelMode::Listener, channel);
        Ok(addr)
    }

    /// Negotiates a connector-offered channel: we listen, the server connects.
    pub async fn enter_active_mode(&mut self) -> Result<SocketAddr, FtpError> {
        self.session.begin_negotiation()?;
        let negotiated = transfer::negotiate_active(
            &mut self.control,
            self.local_addr.ip(),
            self.session.peer().ip(),
        )
        .await;
        let channel = self.settle(negotiated)?;
        let addr = channel.address();
        self.session
            .install_data_channel(DataChannelMode::Connector, channel);
        Ok(addr)
    }

    /// Runs `LIST` over the negotiated channel and returns the raw listing.
    pub async fn list_directory(&mut self) -> Result<ListingResult, FtpError> {
        let mut data = Vec::new();
        let report = self
            .run_transfer(Command::LIST, TransferRequest::receive_listing(&mut data))
            .await?;
        Ok(ListingResult { data, report })
    }

    /// Runs `RETR path`, appending the body to `sink`.
    pub async fn retrieve_file(
        &mut self,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<TransferReport, FtpError> {
        let request = TransferRequest::receive_file(path, self.session.transfer_type(), sink);
        self.run_transfer(Command::RETR(path.to_string()), request)
            .await
    }

    /// Runs `RETR remote` into the local file `local`.
    ///
    /// A failed transfer leaves `local` as it was: a replacement is written
    /// beside it and renamed into place, an append is truncated back.
    pub async fn retrieve_to_path(
        &mut self,
        remote: &str,
        local: &Path,
        append: bool,
    ) -> Result<TransferReport, FtpError> {
        self.session.check(&Command::RETR(remote.to_string()))?;
        if append {
            self.retrieve_appending(remote, local).await
        } else {
            self.retrieve_replacing(remote, local).await
        }
    }

    async fn retrieve_appending(
        &mut self,
        remote: &str,
        local: &Path,
    ) -> Result<TransferReport, FtpError> {
        let mut file = storage::open_for_write(local, true)
            .await
            .map_err(FtpError::LocalIo)?;
        let original_len = file.metadata().await.map_err(FtpError::LocalIo)?.len();

        let retrieved = self.retrieve_file(remote, &mut file).await;
        let result = match retrieved {
            Ok(report) => file.sync_all().await.map(|()| report).map_err(FtpError::LocalIo),
            Err(e) => Err(e),
        };
        if result.is_err() {
            if let Err(e) = file.set_len(original_len).await {
                warn!("Could not restore {}: {}", local.display(), e);
            }
        }
        result
    }

    async fn retrieve_replacing(
        &mut self,
        remote: &str,
        local: &Path,
    ) -> Result<TransferReport, FtpError> {
        let partial = storage::partial_path(local);
        let mut file = storage::open_for_write(&partial, false)
            .await
            .map_err(FtpError::LocalIo)?;

        let retrieved = self.retrieve_file(remote, &mut file).await;
        let result = match retrieved {
            Ok(report) => file.sync_all().await.map(|()| report).map_err(FtpError::LocalIo),
            Err(e) => Err(e),
        };
        drop(file);

        let result = match result {
            Ok(report) => tokio::fs::rename(&partial, local)
                .await
                .map(|()| report)
                .map_err(FtpError::LocalIo),
            Err(e) => Err(e),
        };
        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(&partial).await {
                debug!("Could not remove {}: {}", partial.display(), e);
            }
        }
        result
    }

    /// Sends `QUIT` and releases the control connection and any data channel,
    /// whether or not the reply arrives.
    pub async fn quit(mut self) -> Result<Reply, FtpError> {
        let result = self.exchange(&Command::QUIT).await;
        self.session.close();

        let (_, mut writer) = self.control.into_inner();
        if let Err(e) = writer.shutdown().await {
            debug!("Control shutdown: {}", e);
        }
        info!("Disconnected from {}", self.session.peer());

        let reply = result?;
        if reply.is_success() {
            Ok(reply)
        } else {
            Err(rejected(&Command::QUIT, reply))
        }
    }

    /// One command, one reply, with the reply applied to the session.
    async fn exchange(&mut self, command: &Command) -> Result<Reply, FtpError> {
        self.session.check(command)?;
        let sent = self.control.send_command(command).await;
        self.settle(sent)?;
        let received = self.control.read_reply().await;
        let reply = self.settle(received)?;
        self.session.observe(command, &reply);
        Ok(reply)
    }

    async fn run_transfer(
        &mut self,
        command: Command,
        mut request: TransferRequest<'_>,
    ) -> Result<TransferReport, FtpError> {
        self.session.check(&command)?;
        let channel = self
            .session
            .take_data_channel()
            .ok_or(FtpError::NoDataChannel)?;

        let sent = self.control.send_command(&command).await;
        if let Err(e) = self.settle(sent) {
            channel.close();
            return Err(e);
        }
        let opening = match self.control.read_reply().await {
            Ok(reply) => reply,
            Err(e) => {
                channel.close();
                return self.settle(Err(e));
            }
        };
        if !opening.is_preliminary() {
            channel.close();
            return Err(rejected(&command, opening));
        }
        request.expected_size = opening.announced_size();

        match self
            .engine
            .execute(request, channel, self.control.reader_mut())
            .await
        {
            Ok(report) => {
                let reply = self.read_final_reply().await?;
                TransferEngine::confirm(report, reply)
            }
            Err(FtpError::SessionAborted) => {
                self.session.close();
                Err(FtpError::SessionAborted)
            }
            Err(e) => {
                warn!("{} transfer failed: {}", command.verb(), e);
                // The server still answers for this transfer; consume it so
                // the next command gets its own reply.
                match self.read_final_reply().await {
                    Ok(reply) => debug!("Server verdict after failed transfer: {}", reply),
                    Err(FtpError::SessionAborted) => return Err(FtpError::SessionAborted),
                    Err(read_err) => debug!("No verdict after failed transfer: {}", read_err),
                }
                Err(e)
            }
        }
    }

    /// Reads the reply that follows a data transfer. A closed control
    /// connection at this point aborts the session.
    async fn read_final_reply(&mut self) -> Result<Reply, FtpError> {
        match self.control.read_reply().await {
            Ok(reply) => Ok(reply),
            Err(FtpError::ChannelRead(e)) => {
                warn!("Control connection lost after transfer: {}", e);
                self.session.close();
                Err(FtpError::SessionAborted)
            }
            Err(e) => self.settle(Err(e)),
        }
    }

    /// Closes the session when an error leaves the control channel unusable.
    fn settle<T>(&mut self, result: Result<T, FtpError>) -> Result<T, FtpError> {
        if let Err(e) = &result {
            if e.is_fatal() || matches!(e, FtpError::ChannelTimeout(_)) {
                warn!("Control channel to {} unusable: {}", self.session.peer(), e);
                self.session.close();
            }
        }
        result
    }
}

fn rejected(command: &Command, reply: Reply) -> FtpError {
    warn!("{} rejected: {}", command.verb(), reply);
    FtpError::CommandRejected {
        command: command.verb().to_string(),
        reply,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answers each command by verb and returns every line received.
    async fn scripted_server(answer: fn(&str) -> &'static str) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            writer.write_all(b"220 Test server ready\r\n").await.unwrap();

            let mut received = Vec::new();
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let verb = line.split(' ').next().unwrap_or_default().to_string();
                received.push(line);
                writer.write_all(answer(&verb).as_bytes()).await.unwrap();
                if verb == "QUIT" {
                    break;
                }
            }
            received
        });
        (addr, handle)
    }

    fn standard_answers(verb: &str) -> &'static str {
        match verb {
            "USER" => "331 Password required\r\n",
            "PASS" => "230 Logged in\r\n",
            "PORT" => "200 PORT command successful\r\n",
            "PWD" => "257 \"/pub\" is the current directory\r\n",
            "QUIT" => "221 Goodbye\r\n",
            _ => "502 Not implemented\r\n",
        }
    }

    #[tokio::test]
    async fn list_without_negotiation_sends_nothing() {
        let (addr, server) = scripted_server(standard_answers).await;
        let mut client = FtpClient::connect(&addr, &ClientConfig::default())
            .await
            .unwrap();
        client.login("alice", "secret").await.unwrap();

        let err = client.list_directory().await.unwrap_err();
        assert!(matches!(err, FtpError::NoDataChannel));
        client.quit().await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received, vec!["USER alice", "PASS secret", "QUIT"]);
    }

    #[tokio::test]
    async fn pass_before_user_never_reaches_the_wire() {
        let (addr, server) = scripted_server(standard_answers).await;
        let mut client = FtpClient::connect(&addr, &ClientConfig::default())
            .await
            .unwrap();

        let err = client.pass("secret").await.unwrap_err();
        assert!(matches!(err, FtpError::InvalidState(_)));
        let err = client.enter_passive_mode().await.unwrap_err();
        assert!(matches!(err, FtpError::NotAuthenticated));
        client.quit().await.unwrap();

        assert_eq!(server.await.unwrap(), vec!["QUIT"]);
    }

    #[tokio::test]
    async fn second_active_negotiation_closes_first_listener() {
        let (addr, _server) = scripted_server(standard_answers).await;
        let mut client = FtpClient::connect(&addr, &ClientConfig::default())
            .await
            .unwrap();
        client.login("alice", "secret").await.unwrap();

        let first = client.enter_active_mode().await.unwrap();
        let second = client.enter_active_mode().await.unwrap();
        assert_eq!(client.session().data_mode(), DataChannelMode::Connector);
        // The OS may hand the released port straight back.
        if first != second {
            assert!(TcpStream::connect(first).await.is_err());
        }
        client.quit().await.unwrap();
    }

    #[tokio::test]
    async fn pwd_records_working_directory() {
        let (addr, _server) = scripted_server(standard_answers).await;
        let mut client = FtpClient::connect(&addr, &ClientConfig::default())
            .await
            .unwrap();
        client.login("alice", "secret").await.unwrap();

        assert_eq!(client.print_working_directory().await.unwrap(), "/pub");
        assert_eq!(client.session().working_directory(), "/pub");
        client.quit().await.unwrap();
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails_before_session() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = FtpClient::connect(&addr, &ClientConfig::default()).await;
        assert!(matches!(result, Err(FtpError::ConnectFailed(..))));
    }
}
