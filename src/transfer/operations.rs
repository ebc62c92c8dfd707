//! Transfer operations
//!
//! Data channel negotiation for both ends of the control connection: the
//! client issues PASV or PORT, the server answers them.

use log::{debug, info, warn};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::net::TcpListener;

use crate::error::{FtpError, TransferError};
use crate::protocol::{Command, ControlChannel};
use crate::transfer::address::first_usable_ipv4;
use crate::transfer::{DataChannel, HostPort};

/// Sends `PASV` and turns the `227` reply into a channel the client connects to.
pub async fn negotiate_passive<R, W>(
    control: &mut ControlChannel<R, W>,
) -> Result<DataChannel, FtpError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    control.send_command(&Command::PASV).await?;
    let reply = control.read_reply().await?;
    if !reply.is_success() {
        warn!("PASV rejected: {}", reply);
        return Err(FtpError::NegotiationRejected(reply));
    }

    let target = HostPort::from_passive_reply(&reply)?;
    info!("Server offered passive data channel at {}", target.socket_addr());
    Ok(DataChannel::WillConnect {
        remote: target.socket_addr(),
    })
}

/// Binds an ephemeral listener on `local_ip`, announces it with `PORT`, and
/// keeps it only if the server accepts. Only `server_ip` may connect to it.
pub async fn negotiate_active<R, W>(
    control: &mut ControlChannel<R, W>,
    local_ip: IpAddr,
    server_ip: IpAddr,
) -> Result<DataChannel, FtpError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let ip = first_usable_ipv4(&[local_ip])?;
    let listener = TcpListener::bind((ip, 0))
        .await
        .map_err(FtpError::LocalIo)?;
    let advertised = HostPort::from_socket_addr(listener.local_addr().map_err(FtpError::LocalIo)?)?;
    debug!("Listening for active data connection on {}", advertised.socket_addr());

    control.send_command(&Command::PORT(advertised)).await?;
    let reply = control.read_reply().await?;
    if !reply.is_success() {
        warn!("PORT {} rejected: {}", advertised, reply);
        return Err(FtpError::NegotiationRejected(reply));
    }

    info!("Active data channel announced at {}", advertised.socket_addr());
    Ok(DataChannel::WillListen {
        listener,
        advertised,
        expected_peer: Some(server_ip.to_canonical()),
    })
}

/// Opens the listener a `227` reply advertises.
///
/// Scans `ports` for a free port, or takes an ephemeral one when no range is
/// configured. Only `owner` may connect to the resulting channel.
pub async fn offer_passive(
    bind_ip: IpAddr,
    ports: Option<RangeInclusive<u16>>,
    owner: IpAddr,
) -> Result<DataChannel, TransferError> {
    let ip = first_usable_ipv4(&[bind_ip])?;

    let listener = match ports {
        None => {
            let addr = SocketAddr::new(IpAddr::V4(ip), 0);
            TcpListener::bind(addr)
                .await
                .map_err(|e| TransferError::PortBindingFailed(addr, e))?
        }
        Some(range) => bind_in_range(IpAddr::V4(ip), range).await?,
    };

    let local = listener
        .local_addr()
        .map_err(TransferError::ListenerConfigurationFailed)?;
    let advertised = HostPort::new(ip, local.port());

    info!(
        "Client {} offered passive data socket {}",
        owner,
        advertised.socket_addr()
    );
    Ok(DataChannel::WillListen {
        listener,
        advertised,
        expected_peer: Some(owner),
    })
}

async fn bind_in_range(
    ip: IpAddr,
    range: RangeInclusive<u16>,
) -> Result<TcpListener, TransferError> {
    for port in range {
        let addr = SocketAddr::new(ip, port);
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                debug!("Data port {} in use", port);
            }
            Err(e) => return Err(TransferError::PortBindingFailed(addr, e)),
        }
    }
    Err(TransferError::NoAvailablePort)
}

/// Validates a `PORT` target against the control connection's peer.
pub fn accept_active(
    target: HostPort,
    client_addr: SocketAddr,
    min_port: u16,
) -> Result<DataChannel, TransferError> {
    let provided = IpAddr::V4(target.ip);
    let expected = client_addr.ip().to_canonical();
    if provided != expected {
        return Err(TransferError::IpMismatch {
            expected: expected.to_string(),
            provided: provided.to_string(),
        });
    }

    if target.port < min_port {
        return Err(TransferError::InvalidPortRange(target.port));
    }

    info!(
        "Client {} requested active data connection to {}",
        client_addr,
        target.socket_addr()
    );
    Ok(DataChannel::WillConnect {
        remote: target.socket_addr(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use crate::transfer::DataChannelRole;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn scripted(replies: &'static [u8]) -> ControlChannel<&'static [u8], Vec<u8>> {
        ControlChannel::new(replies, Vec::new(), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn passive_reply_yields_connect_channel() {
        let mut control = scripted(b"227 Entering Passive Mode (127,0,0,1,200,0).\r\n");
        let channel = negotiate_passive(&mut control).await.unwrap();
        assert_eq!(channel.role(), DataChannelRole::WillConnect);
        assert_eq!(channel.address(), "127.0.0.1:51200".parse().unwrap());

        let (_, sent) = control.into_inner();
        assert_eq!(sent, b"PASV\r\n");
    }

    #[tokio::test]
    async fn passive_rejection_and_bad_tuple() {
        let mut control = scripted(b"502 Not implemented\r\n");
        let err = negotiate_passive(&mut control).await.unwrap_err();
        assert!(matches!(err, FtpError::NegotiationRejected(reply) if reply.code() == 502));

        let mut control = scripted(b"227 Entering Passive Mode (127,0,0,1,300,0)\r\n");
        let err = negotiate_passive(&mut control).await.unwrap_err();
        assert!(matches!(err, FtpError::MalformedAddressTuple(_)));
    }

    #[tokio::test]
    async fn active_negotiation_announces_listener() {
        let mut control = scripted(b"200 PORT command successful\r\n");
        let channel = negotiate_active(&mut control, LOCALHOST, LOCALHOST).await.unwrap();
        assert_eq!(channel.role(), DataChannelRole::WillListen);

        let port = channel.address().port();
        let (_, sent) = control.into_inner();
        let expected = format!("PORT 127,0,0,1,{},{}\r\n", port >> 8, port & 0xff);
        assert_eq!(String::from_utf8(sent).unwrap(), expected);
    }

    #[tokio::test]
    async fn active_listener_only_admits_the_server() {
        let mut control = scripted(b"200 PORT command successful\r\n");
        let server = IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3));
        let channel = negotiate_active(&mut control, LOCALHOST, server).await.unwrap();
        assert!(matches!(
            &channel,
            DataChannel::WillListen { expected_peer: Some(ip), .. } if *ip == server
        ));

        // A local intruder is dropped; nobody else shows up.
        let addr = channel.address();
        let _intruder = tokio::spawn(async move { tokio::net::TcpStream::connect(addr).await });
        let err = channel.open(Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, FtpError::DataChannelTimeout(_)));
    }

    #[tokio::test]
    async fn rejected_port_drops_listener() {
        let mut control = scripted(b"501 Illegal PORT command\r\n");
        let err = negotiate_active(&mut control, LOCALHOST, LOCALHOST).await.unwrap_err();
        assert!(matches!(err, FtpError::NegotiationRejected(_)));
    }

    #[tokio::test]
    async fn passive_offer_scans_configured_range() {
        let taken = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = offer_passive(LOCALHOST, Some(port..=port), LOCALHOST)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::NoAvailablePort));

        let channel = offer_passive(LOCALHOST, None, LOCALHOST).await.unwrap();
        assert_eq!(channel.address().ip(), LOCALHOST);
        assert_ne!(channel.address().port(), 0);
    }

    #[test]
    fn active_target_must_match_client() {
        let client: SocketAddr = "127.0.0.1:40000".parse().unwrap();

        let foreign = HostPort::new(Ipv4Addr::new(10, 0, 0, 9), 5000);
        assert!(matches!(
            accept_active(foreign, client, 1024),
            Err(TransferError::IpMismatch { .. })
        ));

        let low = HostPort::new(Ipv4Addr::LOCALHOST, 80);
        assert!(matches!(
            accept_active(low, client, 1024),
            Err(TransferError::InvalidPortRange(80))
        ));

        let ok = HostPort::new(Ipv4Addr::LOCALHOST, 5000);
        let channel = accept_active(ok, client, 1024).unwrap();
        assert_eq!(channel.address(), "127.0.0.1:5000".parse().unwrap());
    }
}
