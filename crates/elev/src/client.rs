//! Client side of one broker exchange.
//!
//! A client session is: connect (bounded wait for a listening broker),
//! write the single request line, drain, read the reply until the broker
//! closes its side, disconnect. All failures are terminal for the
//! invocation; there are no retries beyond the connect window.

use log::debug;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::Instant;

use elev_protocol::{Reply, Request};

/// Delay between connect attempts while waiting for a broker to appear.
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// Failures of a client exchange.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No broker accepted a connection within the configured window.
    #[error("no broker answered within {0:?}")]
    ConnectTimeout(Duration),
    /// The broker closed the channel without sending any reply bytes.
    #[error("broker sent an empty reply")]
    EmptyReply,
    /// The reply bytes were not a valid envelope.
    #[error("malformed reply")]
    MalformedReply(#[source] serde_json::Error),
    /// Transport-level failure mid-exchange.
    #[error("channel I/O failed")]
    Io(#[from] std::io::Error),
}

/// Client for one-shot command exchanges with the broker.
pub struct BrokerClient {
    socket_path: PathBuf,
    connect_timeout: Duration,
}

impl BrokerClient {
    pub fn new(socket_path: impl Into<PathBuf>, connect_timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            connect_timeout,
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Connect, retrying until a broker listens or the window elapses.
    /// A freshly launched elevated broker needs a moment to bind.
    async fn connect(&self) -> Result<UnixStream, ClientError> {
        let deadline = Instant::now() + self.connect_timeout;
        loop {
            match UnixStream::connect(&self.socket_path).await {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    if Instant::now() >= deadline {
                        debug!("Giving up on broker at {:?}: {err}", self.socket_path);
                        return Err(ClientError::ConnectTimeout(self.connect_timeout));
                    }
                    tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                }
            }
        }
    }

    /// Write one request line and drain it.
    ///
    /// The half-close is the write-drain barrier: the broker sees EOF right
    /// after the request line, and the client cannot race its own read.
    async fn send_request(stream: &mut UnixStream, request: &Request) -> Result<(), ClientError> {
        let mut line = request.as_line().to_string();
        line.push('\n');
        stream.write_all(line.as_bytes()).await?;
        stream.flush().await?;
        stream.shutdown().await?;
        Ok(())
    }

    /// Submit one command and wait for the broker's reply.
    pub async fn submit(&self, name: &str) -> Result<Reply, ClientError> {
        let mut stream = self.connect().await?;
        Self::send_request(&mut stream, &Request::Run(name.to_string())).await?;

        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await?;
        if buf.is_empty() {
            return Err(ClientError::EmptyReply);
        }

        serde_json::from_slice(&buf).map_err(ClientError::MalformedReply)
    }

    /// Fire-and-forget shutdown request. No reply is expected or read.
    pub async fn send_shutdown(&self) -> Result<(), ClientError> {
        let mut stream = self.connect().await?;
        Self::send_request(&mut stream, &Request::Shutdown).await
    }
}

impl std::fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient")
            .field("socket_path", &self.socket_path)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}
