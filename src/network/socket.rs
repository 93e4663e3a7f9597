use std::net::SocketAddr;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::Address;
use crate::AppResult;

/// Exclusive owner of a connected TCP socket.
///
/// The OS handle is released exactly once: when the socket, or both halves
/// returned by [`Socket::into_split`], are dropped.
#[derive(Debug)]
pub struct Socket {
    stream: TcpStream,
    peer_addr: SocketAddr,
}

impl Socket {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Socket { stream, peer_addr }
    }

    pub async fn connect(address: &Address) -> AppResult<Socket> {
        let stream = TcpStream::connect(address.socket_addr()).await?;
        let peer_addr = stream.peer_addr()?;
        Ok(Socket { stream, peer_addr })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    pub fn set_nodelay(&self, nodelay: bool) -> AppResult<()> {
        Ok(self.stream.set_nodelay(nodelay)?)
    }

    pub fn into_split(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.stream.into_split()
    }
}
