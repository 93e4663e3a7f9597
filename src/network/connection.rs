use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::watch;
use tracing::{debug, trace};

use super::Socket;
use crate::codec::{BinaryReader, BinaryWriter, StreamReader, StreamWriter};
use crate::protocol::Protocol;
use crate::service::ConnectionConfig;
use crate::{AppError, AppResult, Shutdown};

/// Process wide identifier of a connection. Never zero.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Where a connection is in its turn cycle.
///
/// A turn may suspend any number of times inside `fill`/`flush` without
/// leaving `InTurn`. Every transition is published to
/// [`Connection::watch_state`] subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the peer to send the first byte of the next turn.
    Idle,
    /// Input is buffered, the protocol is about to be invoked.
    AwaitingTurn,
    InTurn,
    /// No further turns; output is flushed and the socket released.
    Closing,
}

/// Buffered inbound side of a connection.
#[derive(Debug)]
pub struct InboundStream<R = OwnedReadHalf> {
    reader: R,
    buffer: BytesMut,
    read_chunk: usize,
    max_fill_size: usize,
    shutdown: Shutdown,
    eof: bool,
}

impl<R: AsyncRead + Unpin + Send> InboundStream<R> {
    pub fn new(reader: R, config: &ConnectionConfig, shutdown: Shutdown) -> Self {
        InboundStream {
            reader,
            buffer: BytesMut::with_capacity(config.read_buffer_size),
            read_chunk: config.read_buffer_size,
            max_fill_size: config.max_fill_size,
            shutdown,
            eof: false,
        }
    }

    /// Waits until at least one byte is buffered.
    ///
    /// Returns `false` if the peer closed the connection between messages.
    pub async fn wait_for_data(&mut self) -> AppResult<bool> {
        while self.buffer.is_empty() {
            if self.eof || self.read_more(1).await? == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Current capacity of the inbound buffer.
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    // Reads whatever the socket has, reserving room for at least `wanted` more
    // bytes. Reserving after a full consume reclaims the existing allocation.
    async fn read_more(&mut self, wanted: usize) -> AppResult<usize> {
        self.buffer.reserve(wanted.max(self.read_chunk));
        let read = tokio::select! {
            res = self.reader.read_buf(&mut self.buffer) => res?,
            _ = self.shutdown.recv() => return Err(AppError::ConnectionClosing),
        };
        if read == 0 {
            self.eof = true;
        }
        Ok(read)
    }
}

impl<R: AsyncRead + Unpin + Send> StreamReader for InboundStream<R> {
    async fn fill(&mut self, min_bytes: usize) -> AppResult<&[u8]> {
        if min_bytes > self.max_fill_size {
            return Err(AppError::FillTooLarge {
                requested: min_bytes,
                ceiling: self.max_fill_size,
            });
        }
        while self.buffer.len() < min_bytes {
            let missing = min_bytes - self.buffer.len();
            if self.eof || self.read_more(missing).await? == 0 {
                return Err(AppError::UnexpectedEof {
                    needed: min_bytes,
                    available: self.buffer.len(),
                });
            }
        }
        Ok(&self.buffer[..])
    }

    fn consume(&mut self, n: usize) {
        self.buffer.advance(n);
    }

    fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Buffered outbound side of a connection.
///
/// Small writes coalesce in the buffer; it is pushed to the socket when it
/// crosses the high water mark or on `flush`.
#[derive(Debug)]
pub struct OutboundStream<W = OwnedWriteHalf> {
    writer: W,
    buffer: BytesMut,
    high_water: usize,
    shutdown: Shutdown,
}

impl<W: AsyncWrite + Unpin + Send> OutboundStream<W> {
    pub fn new(writer: W, config: &ConnectionConfig, shutdown: Shutdown) -> Self {
        OutboundStream {
            writer,
            buffer: BytesMut::with_capacity(config.write_buffer_high_water.min(64 * 1024)),
            high_water: config.write_buffer_high_water,
            shutdown,
        }
    }

    async fn send_queued(&mut self) -> AppResult<()> {
        while !self.buffer.is_empty() {
            let written = tokio::select! {
                res = self.writer.write_buf(&mut self.buffer) => res?,
                _ = self.shutdown.recv() => return Err(AppError::ConnectionClosing),
            };
            if written == 0 {
                return Err(
                    io::Error::new(ErrorKind::WriteZero, "peer stopped accepting data").into(),
                );
            }
        }
        self.writer.flush().await?;
        Ok(())
    }

    /// Half-closes the socket so the peer sees end of stream.
    async fn shutdown(&mut self) -> AppResult<()> {
        Ok(self.writer.shutdown().await?)
    }
}

impl<W: AsyncWrite + Unpin + Send> StreamWriter for OutboundStream<W> {
    async fn write_all(&mut self, bytes: &[u8]) -> AppResult<()> {
        self.buffer.extend_from_slice(bytes);
        if self.buffer.len() >= self.high_water {
            self.send_queued().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> AppResult<()> {
        self.send_queued().await
    }

    fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// One accepted (or dialed) socket and its buffers.
///
/// A connection is driven by exactly one task, so its buffers are never touched
/// concurrently; different connections run in parallel on the worker pool.
#[derive(Debug)]
pub struct Connection<R = OwnedReadHalf, W = OwnedWriteHalf> {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    inbound: InboundStream<R>,
    outbound: OutboundStream<W>,
    max_field_len: usize,
    state: watch::Sender<ConnectionState>,
    turns: u64,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        socket: Socket,
        config: &ConnectionConfig,
        shutdown: Shutdown,
    ) -> AppResult<Connection> {
        socket.set_nodelay(config.tcp_nodelay)?;
        let peer_addr = socket.peer_addr();
        let (reader, writer) = socket.into_split();
        let mut connection = Connection::from_parts(id, reader, writer, config, shutdown);
        connection.peer_addr = Some(peer_addr);
        Ok(connection)
    }
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn from_parts(
        id: ConnectionId,
        reader: R,
        writer: W,
        config: &ConnectionConfig,
        shutdown: Shutdown,
    ) -> Self {
        Connection {
            id,
            peer_addr: None,
            inbound: InboundStream::new(reader, config, shutdown.clone()),
            outbound: OutboundStream::new(writer, config, shutdown),
            max_field_len: config.max_field_len,
            state: watch::channel(ConnectionState::Idle).0,
            turns: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Follows the state while another task drives the connection.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            trace!(connection_id = self.id, from = ?current, to = ?state, "state change");
            *current = state;
            true
        });
    }

    /// Completed `process` invocations.
    pub fn turns(&self) -> u64 {
        self.turns
    }

    /// Runs turns until the protocol asks to close, the peer disconnects, or
    /// an error occurs. `on_close` is invoked exactly once on the way out.
    pub async fn run<P: Protocol>(&mut self, protocol: &mut P) -> AppResult<()> {
        let result = self.run_turns(protocol).await;
        self.set_state(ConnectionState::Closing);
        protocol.on_close(self.id);
        debug!(
            connection_id = self.id,
            turns = self.turns,
            "connection finished processing"
        );
        result
    }

    async fn run_turns<P: Protocol>(&mut self, protocol: &mut P) -> AppResult<()> {
        loop {
            if self.inbound.buffered() == 0 {
                self.set_state(ConnectionState::Idle);
                // replies queued during the last turns go out before we wait
                self.outbound.send_queued().await?;
                if !self.inbound.wait_for_data().await? {
                    trace!(connection_id = self.id, "peer closed the connection");
                    return Ok(());
                }
                self.set_state(ConnectionState::AwaitingTurn);
            }

            self.set_state(ConnectionState::InTurn);
            let processed = {
                let mut reader =
                    BinaryReader::new(&mut self.inbound).with_max_field_len(self.max_field_len);
                let mut writer = BinaryWriter::new(&mut self.outbound);
                protocol.process(&mut reader, &mut writer).await
            };
            let keep_going = match processed {
                Ok(keep_going) => keep_going,
                Err(e) => {
                    self.set_state(ConnectionState::Closing);
                    self.flush_after_error(&e).await;
                    return Err(e);
                }
            };
            self.turns += 1;

            if !keep_going {
                self.set_state(ConnectionState::Closing);
                self.outbound.send_queued().await?;
                return Ok(());
            }
            self.set_state(ConnectionState::AwaitingTurn);
        }
    }

    // Replies the protocol queued before failing still reach the peer. Nothing
    // is sent once the context is stopping.
    async fn flush_after_error(&mut self, error: &AppError) {
        if error.is_closing() || self.outbound.pending() == 0 {
            return;
        }
        if let Err(e) = self.outbound.send_queued().await {
            trace!(
                connection_id = self.id,
                "dropping {} queued bytes after error: {}",
                self.outbound.pending(),
                e
            );
        }
    }

    /// Sends end of stream to the peer and releases the socket.
    pub async fn close(mut self) {
        self.set_state(ConnectionState::Closing);
        if let Err(e) = self.outbound.shutdown().await {
            trace!(connection_id = self.id, "shutdown on close failed: {}", e);
        }
    }
}
