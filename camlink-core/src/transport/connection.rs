//! A single outbound collector connection.
//!
//! A `Connection` is owned by exactly one device stream (streaming mode)
//! or one transfer (burst mode). The first I/O error drops the socket; a
//! failed connection is never reused, the owner reconnects instead.

use std::path::Path;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::error::CamlinkError;
use crate::transport::endpoint::Endpoint;
use crate::wire::{TRANSFER_CHUNK_SIZE, TransferHeader, TransferVariant, encode_header, length_prefix};

pub struct Connection<S = TcpStream> {
    endpoint: Endpoint,
    stream: Option<S>,
    connected_at: Instant,
    frames_sent: u64,
    bytes_sent: u64,
}

impl Connection<TcpStream> {
    /// Connect to `endpoint`, failing with
    /// [`CamlinkError::ConnectTimeout`] after `timeout`.
    pub async fn connect(endpoint: &Endpoint, timeout: Duration) -> Result<Self, CamlinkError> {
        let attempt = TcpStream::connect((endpoint.host(), endpoint.port()));
        let stream = match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(CamlinkError::Connection(e)),
            Err(_) => {
                return Err(CamlinkError::ConnectTimeout {
                    endpoint: endpoint.to_string(),
                    timeout,
                });
            }
        };
        // Frames are latency-sensitive and already written in two calls.
        stream.set_nodelay(true)?;
        info!(%endpoint, "connected to collector");
        Ok(Self::from_stream(endpoint.clone(), stream))
    }
}

impl<S> Connection<S>
where
    S: AsyncWrite + Unpin,
{
    /// Wrap an already-established stream.
    pub fn from_stream(endpoint: Endpoint, stream: S) -> Self {
        Self {
            endpoint,
            stream: Some(stream),
            connected_at: Instant::now(),
            frames_sent: 0,
            bytes_sent: 0,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Payload and header bytes written so far.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    fn stream_mut(&mut self) -> Result<&mut S, CamlinkError> {
        self.stream.as_mut().ok_or(CamlinkError::ConnectionClosed)
    }

    /// Send one streaming frame: one prefix write, one payload write, flush.
    ///
    /// On error the socket is dropped and every later call returns
    /// [`CamlinkError::ConnectionClosed`].
    pub async fn send_frame(&mut self, payload: &Bytes) -> Result<(), CamlinkError> {
        let prefix = length_prefix(payload.len())?;
        let result = async {
            let stream = self.stream_mut()?;
            stream.write_all(&prefix).await?;
            stream.write_all(payload).await?;
            stream.flush().await?;
            Ok::<_, CamlinkError>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.frames_sent += 1;
                self.bytes_sent += (prefix.len() + payload.len()) as u64;
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Stream the file at `path` as a transfer named `filename`.
    ///
    /// The body is read and written in [`TRANSFER_CHUNK_SIZE`] chunks. For
    /// [`TransferVariant::Sized`] the size is taken from the file metadata
    /// and exactly that many bytes are sent. Returns the body length.
    pub async fn send_file(
        &mut self,
        path: &Path,
        filename: &str,
        variant: TransferVariant,
    ) -> Result<u64, CamlinkError> {
        let result = self.send_file_inner(path, filename, variant).await;
        if let Err(e) = &result {
            // A local read failure still leaves a half-written transfer on
            // the wire, so the connection is unusable either way.
            self.fail(e);
        }
        result
    }

    async fn send_file_inner(
        &mut self,
        path: &Path,
        filename: &str,
        variant: TransferVariant,
    ) -> Result<u64, CamlinkError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| CamlinkError::file(path, e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| CamlinkError::file(path, e))?
            .len();

        let header = match variant {
            TransferVariant::UntilClose => TransferHeader::until_close(filename),
            TransferVariant::Sized => TransferHeader::sized(filename, size),
        };
        let header = encode_header(&header)?;

        let stream = self.stream_mut()?;
        stream.write_all(&header).await?;

        let mut body = file.take(size);
        let mut buf = vec![0u8; TRANSFER_CHUNK_SIZE];
        let mut sent = 0u64;
        loop {
            let n = body
                .read(&mut buf)
                .await
                .map_err(|e| CamlinkError::file(path, e))?;
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await?;
            sent += n as u64;
        }
        stream.flush().await?;

        if sent != size {
            return Err(CamlinkError::Truncated {
                expected: size,
                actual: sent,
            });
        }

        self.bytes_sent += header.len() as u64 + sent;
        debug!(endpoint = %self.endpoint, filename, bytes = sent, "file transferred");
        Ok(sent)
    }

    /// Shut down the write half and drop the socket. Idempotent.
    pub async fn close(&mut self) -> Result<(), CamlinkError> {
        match self.stream.take() {
            Some(mut stream) => {
                stream.shutdown().await?;
                debug!(endpoint = %self.endpoint, frames = self.frames_sent, "connection closed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn fail(&mut self, error: &CamlinkError) {
        if self.stream.take().is_some() {
            warn!(endpoint = %self.endpoint, %error, "connection failed, dropping socket");
        }
    }
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.endpoint)
            .field("open", &self.stream.is_some())
            .field("frames_sent", &self.frames_sent)
            .field("bytes_sent", &self.bytes_sent)
            .finish()
    }
}
