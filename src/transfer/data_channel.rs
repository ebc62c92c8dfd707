//! Module `data_channel`
//!
//! The negotiated data-channel descriptor. A descriptor is owned by the session
//! that negotiated it and is consumed exactly once when the transfer opens it.

use log::{debug, info, warn};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{self, Instant};

use crate::error::FtpError;
use crate::transfer::HostPort;

/// Which side of the data connection the local end plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChannelRole {
    /// The local side accepts an inbound connection.
    WillListen,
    /// The local side initiates an outbound connection.
    WillConnect,
}

/// A negotiated, not yet opened, data channel.
#[derive(Debug)]
pub enum DataChannel {
    WillListen {
        listener: TcpListener,
        advertised: HostPort,
        /// Inbound connections from any other address are refused.
        expected_peer: Option<IpAddr>,
    },
    WillConnect {
        remote: SocketAddr,
    },
}

impl DataChannel {
    pub fn role(&self) -> DataChannelRole {
        match self {
            DataChannel::WillListen { .. } => DataChannelRole::WillListen,
            DataChannel::WillConnect { .. } => DataChannelRole::WillConnect,
        }
    }

    /// The address the data connection is made to.
    pub fn address(&self) -> SocketAddr {
        match self {
            DataChannel::WillListen { advertised, .. } => advertised.socket_addr(),
            DataChannel::WillConnect { remote } => *remote,
        }
    }

    /// Accepts or initiates the data connection, bounded by `timeout`.
    ///
    /// The listener, if any, is closed once this returns.
    pub async fn open(self, timeout: Duration) -> Result<TcpStream, FtpError> {
        match self {
            DataChannel::WillListen {
                listener,
                advertised,
                expected_peer,
            } => {
                debug!("Waiting for data connection on {}", advertised.socket_addr());
                let deadline = Instant::now() + timeout;
                loop {
                    let (stream, peer) = match time::timeout_at(deadline, listener.accept()).await
                    {
                        Ok(Ok(accepted)) => accepted,
                        Ok(Err(e)) => return Err(FtpError::DataChannelOpen(e)),
                        Err(_) => return Err(FtpError::DataChannelTimeout(timeout)),
                    };

                    match expected_peer {
                        Some(owner) if owner.to_canonical() != peer.ip().to_canonical() => {
                            warn!(
                                "Rejected data connection from {}: channel belongs to {}",
                                peer, owner
                            );
                            drop(stream);
                        }
                        _ => {
                            info!("Data connection accepted from {}", peer);
                            return Ok(stream);
                        }
                    }
                }
            }
            DataChannel::WillConnect { remote } => {
                debug!("Opening data connection to {}", remote);
                match time::timeout(timeout, TcpStream::connect(remote)).await {
                    Ok(Ok(stream)) => {
                        info!("Data connection established to {}", remote);
                        Ok(stream)
                    }
                    Ok(Err(e)) => Err(FtpError::DataChannelOpen(e)),
                    Err(_) => Err(FtpError::DataChannelTimeout(timeout)),
                }
            }
        }
    }

    /// Releases the descriptor without opening it.
    pub fn close(self) {
        debug!("Closing unused data channel {}", self.address());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    async fn listening_channel(expected_peer: Option<IpAddr>) -> DataChannel {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let advertised = HostPort::from_socket_addr(listener.local_addr().unwrap()).unwrap();
        DataChannel::WillListen {
            listener,
            advertised,
            expected_peer,
        }
    }

    #[tokio::test]
    async fn listening_channel_accepts_one_connection() {
        let channel = listening_channel(None).await;
        assert_eq!(channel.role(), DataChannelRole::WillListen);
        let addr = channel.address();

        let connector = tokio::spawn(async move { TcpStream::connect(addr).await });
        let stream = channel.open(Duration::from_secs(2)).await.unwrap();
        assert!(connector.await.unwrap().is_ok());
        drop(stream);

        // The listener went away with the descriptor.
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn listening_channel_times_out() {
        let channel = listening_channel(None).await;
        let err = channel.open(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, FtpError::DataChannelTimeout(_)));
    }

    #[tokio::test]
    async fn foreign_peer_is_refused_until_timeout() {
        let channel = listening_channel(Some(IpAddr::V4(Ipv4Addr::new(10, 9, 8, 7)))).await;
        let addr = channel.address();
        let _connector = tokio::spawn(async move { TcpStream::connect(addr).await });
        let err = channel.open(Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, FtpError::DataChannelTimeout(_)));
    }

    #[tokio::test]
    async fn connecting_channel_reaches_listener() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let remote = listener.local_addr().unwrap();
        let channel = DataChannel::WillConnect { remote };
        assert_eq!(channel.role(), DataChannelRole::WillConnect);

        let stream = channel.open(Duration::from_secs(2)).await.unwrap();
        let (_, peer) = listener.accept().await.unwrap();
        assert_eq!(peer, stream.local_addr().unwrap());
    }

    #[tokio::test]
    async fn refused_connect_is_an_open_failure() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let remote = listener.local_addr().unwrap();
        drop(listener);

        let channel = DataChannel::WillConnect { remote };
        let err = channel.open(Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, FtpError::DataChannelOpen(_)), "{:?}", err);
    }
}
