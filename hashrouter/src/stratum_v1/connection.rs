//! TCP connection management with line-delimited I/O.
//!
//! Stratum v1 is newline-delimited JSON over TCP. This module wraps tokio's
//! TCP stream in buffered, independently-owned read and write halves so one
//! task can drain the socket while another writes to it. The
//! [`MessageRead`] and [`MessageWrite`] traits abstract message I/O,
//! allowing channel-based mocks for deterministic testing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::error::{StratumError, StratumResult};
use super::messages::{JsonRpcMessage, Message};

/// Dial timeout for outbound connections.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Reading side of a message transport.
#[async_trait]
pub trait MessageRead: Send {
    /// Read one complete Stratum message.
    ///
    /// Fails with [`StratumError::Closed`] on EOF.
    async fn read_message(&mut self) -> StratumResult<Message>;
}

/// Writing side of a message transport.
#[async_trait]
pub trait MessageWrite: Send {
    /// Write one Stratum message as a single frame.
    async fn write_message(&mut self, msg: &Message) -> StratumResult<()>;
}

/// Buffered TCP connection for the Stratum protocol.
///
/// Split into halves with [`Connection::split`] so reads and writes can be
/// owned by different tasks.
pub struct Connection {
    id: String,
    reader: ConnectionReader,
    writer: ConnectionWriter,
}

/// Buffered reading half of a [`Connection`].
pub struct ConnectionReader {
    reader: BufReader<OwnedReadHalf>,
    line_buf: String,
}

/// Buffered writing half of a [`Connection`].
pub struct ConnectionWriter {
    writer: BufWriter<OwnedWriteHalf>,
}

impl Connection {
    /// Wrap an accepted TCP stream.
    pub fn new(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let id = format!("conn-{}@{}", NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed), peer);

        let (read_half, write_half) = stream.into_split();
        Self {
            id,
            reader: ConnectionReader {
                reader: BufReader::new(read_half),
                line_buf: String::with_capacity(4096),
            },
            writer: ConnectionWriter {
                writer: BufWriter::new(write_half),
            },
        }
    }

    /// Dial a pool, bounded by [`CONNECTION_TIMEOUT`].
    pub async fn connect(host: &str) -> StratumResult<Self> {
        debug!(host = %host, "Connecting");
        let stream = tokio::time::timeout(CONNECTION_TIMEOUT, TcpStream::connect(host))
            .await
            .map_err(|_| {
                StratumError::ConnectionFailed(format!("dial {} timed out", host))
            })?
            .map_err(|e| StratumError::ConnectionFailed(format!("dial {}: {}", host, e)))?;
        stream.set_nodelay(true).ok();
        Ok(Self::new(stream))
    }

    /// Stable connection identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Split into independently owned read and write halves.
    pub fn split(self) -> (ConnectionReader, ConnectionWriter) {
        (self.reader, self.writer)
    }
}

#[async_trait]
impl MessageRead for ConnectionReader {
    async fn read_message(&mut self) -> StratumResult<Message> {
        loop {
            self.line_buf.clear();

            let n = self.reader.read_line(&mut self.line_buf).await?;
            if n == 0 {
                return Err(StratumError::Closed);
            }

            let line = self.line_buf.trim();
            if line.is_empty() {
                continue;
            }

            trace!(rx = %line, "Received message");

            let env: JsonRpcMessage = serde_json::from_str(line).map_err(|e| {
                StratumError::Protocol(format!("malformed frame: {}, line: {}", e, line))
            })?;
            return Message::from_envelope(env);
        }
    }
}

#[async_trait]
impl MessageWrite for ConnectionWriter {
    async fn write_message(&mut self, msg: &Message) -> StratumResult<()> {
        let json = serde_json::to_string(&msg.to_envelope())?;
        trace!(tx = %json, "Sending message");

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

/// Channel-based transport halves for deterministic testing.
///
/// Backed by tokio mpsc channels rather than TCP, so they work with
/// `tokio::time::pause()` without triggering auto-advance on real I/O.
/// Create a linked set with [`mock_conn()`]; the read/write halves are the
/// client's side, the handle is the test's side.
#[cfg(test)]
pub(crate) struct MockRead {
    rx: tokio::sync::mpsc::UnboundedReceiver<Message>,
}

#[cfg(test)]
pub(crate) struct MockWrite {
    tx: tokio::sync::mpsc::UnboundedSender<Message>,
}

/// Test-side handle for a mock connection.
#[cfg(test)]
pub(crate) struct MockHandle {
    pub tx: tokio::sync::mpsc::UnboundedSender<Message>,
    pub rx: tokio::sync::mpsc::UnboundedReceiver<Message>,
}

#[cfg(test)]
pub(crate) fn mock_conn() -> (MockRead, MockWrite, MockHandle) {
    let (peer_tx, client_rx) = tokio::sync::mpsc::unbounded_channel();
    let (client_tx, peer_rx) = tokio::sync::mpsc::unbounded_channel();
    (
        MockRead { rx: client_rx },
        MockWrite { tx: client_tx },
        MockHandle {
            tx: peer_tx,
            rx: peer_rx,
        },
    )
}

#[cfg(test)]
#[async_trait]
impl MessageRead for MockRead {
    async fn read_message(&mut self) -> StratumResult<Message> {
        self.rx.recv().await.ok_or(StratumError::Closed)
    }
}

#[cfg(test)]
#[async_trait]
impl MessageWrite for MockWrite {
    async fn write_message(&mut self, msg: &Message) -> StratumResult<()> {
        self.tx.send(msg.clone()).map_err(|_| StratumError::Closed)
    }
}

#[cfg(test)]
impl MockHandle {
    /// Send a message to the client side.
    pub fn send(&self, msg: Message) {
        self.tx.send(msg).expect("mock peer dropped");
    }

    /// Receive a message the client side wrote.
    pub async fn recv(&mut self) -> Message {
        self.rx.recv().await.expect("mock peer dropped")
    }
}
