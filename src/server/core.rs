//! Module `core`
//!
//! The accept loop. Each control connection gets its own task and its own
//! session; the only state shared between tasks is read-only configuration.

use log::{error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::auth::CredentialStore;
use crate::config::ServerConfig;
use crate::protocol::responses::{SERVICE_UNAVAILABLE, format_response};
use crate::server::handler::{SessionContext, handle_client};
use crate::transfer::TransferEngine;

pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    credentials: Arc<CredentialStore>,
    slots: Arc<Semaphore>,
}

impl Server {
    /// Binds the control listener and prepares the server root.
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let socket = config.control_socket();
        let listener = TcpListener::bind(&socket).await.map_err(|e| {
            error!("Failed to bind to {}: {}", socket, e);
            e
        })?;
        info!("Server bound to {}", listener.local_addr()?);

        if let Err(e) = tokio::fs::create_dir_all(&config.server_root).await {
            warn!("Failed to create server root directory: {}", e);
        } else {
            info!("Server root directory: {}", config.server_root);
        }

        Ok(Self {
            listener,
            credentials: Arc::new(CredentialStore::from_config(&config)),
            slots: Arc::new(Semaphore::new(config.max_clients)),
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop until the task is dropped.
    pub async fn start(self) {
        info!(
            "Starting Rax FTP server on {} (max {} clients)",
            self.config.control_socket(),
            self.config.max_clients
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => self.dispatch(stream, peer),
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        let Ok(permit) = Arc::clone(&self.slots).try_acquire_owned() else {
            warn!("Refusing {}: client limit reached", peer);
            tokio::spawn(refuse(stream));
            return;
        };

        let local_addr = match stream.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("Dropping {}: no local address: {}", peer, e);
                return;
            }
        };

        let context = SessionContext {
            engine: TransferEngine::new(self.config.buffer_size, self.config.data_timeout()),
            config: Arc::clone(&self.config),
            credentials: Arc::clone(&self.credentials),
            local_addr,
            peer,
        };

        info!(
            "Accepted client {} ({} slots free)",
            peer,
            self.slots.available_permits()
        );

        // Spawn a task for each client so the accept loop doesn't block
        tokio::spawn(async move {
            handle_client(stream, context).await;
            drop(permit);
        });
    }
}

async fn refuse(mut stream: TcpStream) {
    let reply = format_response(SERVICE_UNAVAILABLE, "Too many connections. Try again later.");
    if let Err(e) = stream.write_all(reply.as_bytes()).await {
        warn!("Failed to refuse connection: {}", e);
    }
    let _ = stream.shutdown().await;
}
