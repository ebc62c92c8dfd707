//! Module `engine`
//!
//! Streams a listing or file body across an opened data channel in bounded
//! chunks, watching the control connection for closure while it runs.

use log::{debug, info, warn};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;

use crate::error::FtpError;
use crate::protocol::Reply;
use crate::transfer::modes::{CrlfDecoder, CrlfEncoder};
use crate::transfer::{DataChannel, TransferKind, TransferReport, TransferType};

pub const MIN_CHUNK_SIZE: usize = 4 * 1024;
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

/// Where transferred bytes go, or come from.
pub enum TransferEndpoint<'a> {
    /// Append-only receiver for downloaded bytes.
    Sink(&'a mut (dyn AsyncWrite + Unpin + Send)),
    /// Producer of bytes to send.
    Source(&'a mut (dyn AsyncRead + Unpin + Send)),
}

/// A single unit of transfer work, consumed by `TransferEngine::execute`.
pub struct TransferRequest<'a> {
    pub kind: TransferKind,
    pub transfer_type: TransferType,
    pub endpoint: TransferEndpoint<'a>,
    pub expected_size: Option<u64>,
}

impl<'a> TransferRequest<'a> {
    pub fn receive_listing(sink: &'a mut (dyn AsyncWrite + Unpin + Send)) -> Self {
        Self {
            kind: TransferKind::Listing,
            transfer_type: TransferType::Binary,
            endpoint: TransferEndpoint::Sink(sink),
            expected_size: None,
        }
    }

    pub fn receive_file(
        path: &str,
        transfer_type: TransferType,
        sink: &'a mut (dyn AsyncWrite + Unpin + Send),
    ) -> Self {
        Self {
            kind: TransferKind::FileRetrieve(path.to_string()),
            transfer_type,
            endpoint: TransferEndpoint::Sink(sink),
            expected_size: None,
        }
    }

    pub fn send_listing(source: &'a mut (dyn AsyncRead + Unpin + Send)) -> Self {
        Self {
            kind: TransferKind::Listing,
            transfer_type: TransferType::Binary,
            endpoint: TransferEndpoint::Source(source),
            expected_size: None,
        }
    }

    pub fn send_file(
        path: &str,
        transfer_type: TransferType,
        source: &'a mut (dyn AsyncRead + Unpin + Send),
        size: u64,
    ) -> Self {
        Self {
            kind: TransferKind::FileRetrieve(path.to_string()),
            transfer_type,
            endpoint: TransferEndpoint::Source(source),
            expected_size: Some(size),
        }
    }

    /// Listings pass through verbatim; file bodies are translated in text mode.
    fn translates(&self) -> bool {
        self.transfer_type == TransferType::Text
            && matches!(self.kind, TransferKind::FileRetrieve(_))
    }
}

/// Moves bytes between a data channel and a local sink or source.
#[derive(Debug, Clone, Copy)]
pub struct TransferEngine {
    chunk_size: usize,
    timeout: Duration,
}

impl TransferEngine {
    /// `chunk_size` is clamped to 4..=64 KiB; `timeout` bounds the data
    /// connection setup and every chunk read or write.
    pub fn new(chunk_size: usize, timeout: Duration) -> Self {
        Self {
            chunk_size: chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE),
            timeout,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Opens `channel`, streams the request through it until the sending side
    /// closes it, and closes the data socket on every exit path.
    ///
    /// `control` is the read half of the control connection; if it reaches EOF
    /// before the data channel does, the transfer fails with `SessionAborted`.
    pub async fn execute<C>(
        &self,
        request: TransferRequest<'_>,
        channel: DataChannel,
        control: &mut C,
    ) -> Result<TransferReport, FtpError>
    where
        C: AsyncBufRead + Unpin,
    {
        let translate = request.translates();
        let TransferRequest {
            kind,
            endpoint,
            expected_size,
            ..
        } = request;

        info!(
            "Starting transfer of {} ({:?} via {})",
            kind,
            channel.role(),
            channel.address()
        );
        let mut stream = self.open_watching(channel, control).await?;

        let result = match endpoint {
            TransferEndpoint::Sink(sink) => {
                self.receive(&mut stream, sink, translate, control).await
            }
            TransferEndpoint::Source(source) => {
                self.send(&mut stream, source, translate, control).await
            }
        };

        if let Err(e) = stream.shutdown().await {
            debug!("Data channel shutdown: {}", e);
        }
        drop(stream);

        let bytes = result?;
        info!("Transfer of {} finished: {} bytes", kind, bytes);
        Ok(TransferReport {
            kind,
            bytes,
            expected_size,
            reply: None,
        })
    }

    /// Checks the completion reply read after the data channel closed.
    pub fn confirm(mut report: TransferReport, reply: Reply) -> Result<TransferReport, FtpError> {
        if !reply.is_success() {
            return Err(FtpError::IncompleteTransfer(format!(
                "{} ended with {}",
                report.kind, reply
            )));
        }
        if let Some(size) = report.expected_size {
            if size > 0 && report.bytes == 0 {
                return Err(FtpError::IncompleteTransfer(format!(
                    "data channel closed before any of the {} announced bytes of {} arrived",
                    size, report.kind
                )));
            }
        }
        report.reply = Some(reply);
        Ok(report)
    }

    /// Waits for the data connection while watching the control connection;
    /// losing control first aborts the session.
    async fn open_watching<C>(
        &self,
        channel: DataChannel,
        control: &mut C,
    ) -> Result<TcpStream, FtpError>
    where
        C: AsyncBufRead + Unpin,
    {
        let open = channel.open(self.timeout);
        tokio::pin!(open);
        let mut control_ready = false;

        loop {
            tokio::select! {
                opened = &mut open => return opened,
                watched = control.fill_buf(), if !control_ready => {
                    control_ready = control_still_open(watched)?;
                }
            }
        }
    }

    async fn receive<C>(
        &self,
        stream: &mut TcpStream,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        translate: bool,
        control: &mut C,
    ) -> Result<u64, FtpError>
    where
        C: AsyncBufRead + Unpin,
    {
        let mut buf = vec![0u8; self.chunk_size];
        let mut decoder = translate.then(CrlfDecoder::default);
        let mut translated = Vec::new();
        let mut total = 0u64;
        let mut control_ready = false;

        loop {
            tokio::select! {
                read = time::timeout(self.timeout, stream.read(&mut buf)) => {
                    let n = match read {
                        Ok(Ok(n)) => n,
                        Ok(Err(e)) => return Err(FtpError::DataChannel(e)),
                        Err(_) => return Err(FtpError::ChannelTimeout(self.timeout)),
                    };
                    if n == 0 {
                        break;
                    }
                    total += n as u64;

                    let chunk: &[u8] = match decoder.as_mut() {
                        Some(decoder) => {
                            translated.clear();
                            decoder.decode(&buf[..n], &mut translated);
                            &translated
                        }
                        None => &buf[..n],
                    };
                    sink.write_all(chunk).await.map_err(FtpError::LocalIo)?;
                }
                watched = control.fill_buf(), if !control_ready => {
                    control_ready = control_still_open(watched)?;
                }
            }
        }

        if let Some(decoder) = decoder.as_mut() {
            translated.clear();
            decoder.finish(&mut translated);
            sink.write_all(&translated).await.map_err(FtpError::LocalIo)?;
        }
        sink.flush().await.map_err(FtpError::LocalIo)?;
        Ok(total)
    }

    async fn send<C>(
        &self,
        stream: &mut TcpStream,
        source: &mut (dyn AsyncRead + Unpin + Send),
        translate: bool,
        control: &mut C,
    ) -> Result<u64, FtpError>
    where
        C: AsyncBufRead + Unpin,
    {
        let mut buf = vec![0u8; self.chunk_size];
        let mut encoder = translate.then(CrlfEncoder::default);
        let mut encoded = Vec::new();
        let mut total = 0u64;
        let mut control_ready = false;

        loop {
            let n = source.read(&mut buf).await.map_err(FtpError::LocalIo)?;
            if n == 0 {
                break;
            }

            let chunk: &[u8] = match encoder.as_mut() {
                Some(encoder) => {
                    encoded.clear();
                    encoder.encode(&buf[..n], &mut encoded);
                    &encoded
                }
                None => &buf[..n],
            };

            let mut offset = 0;
            while offset < chunk.len() {
                tokio::select! {
                    written = time::timeout(self.timeout, stream.write(&chunk[offset..])) => {
                        match written {
                            Ok(Ok(0)) => {
                                return Err(FtpError::DataChannel(io::ErrorKind::WriteZero.into()));
                            }
                            Ok(Ok(w)) => offset += w,
                            Ok(Err(e)) => return Err(FtpError::DataChannel(e)),
                            Err(_) => return Err(FtpError::ChannelTimeout(self.timeout)),
                        }
                    }
                    watched = control.fill_buf(), if !control_ready => {
                        control_ready = control_still_open(watched)?;
                    }
                }
            }
            total += chunk.len() as u64;
        }

        match time::timeout(self.timeout, stream.flush()).await {
            Ok(Ok(())) => Ok(total),
            Ok(Err(e)) => Err(FtpError::DataChannel(e)),
            Err(_) => Err(FtpError::ChannelTimeout(self.timeout)),
        }
    }
}

/// `Ok(true)` once control bytes are waiting; EOF or a read error aborts.
fn control_still_open(watched: io::Result<&[u8]>) -> Result<bool, FtpError> {
    match watched {
        Ok(pending) if pending.is_empty() => {
            warn!("Control connection closed during data transfer");
            Err(FtpError::SessionAborted)
        }
        Ok(_) => Ok(true),
        Err(e) => {
            warn!("Control connection failed during data transfer: {}", e);
            Err(FtpError::SessionAborted)
        }
    }
}
