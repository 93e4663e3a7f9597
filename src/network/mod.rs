//! Network Module Implementation
//!
//! Sockets, connections and the sources that produce them.
//!
//! # Components
//!
//! - `Address` / `Socket`: an endpoint and an owned TCP stream
//! - `Connection`: one socket with its inbound and outbound buffers, driving a
//!   `Protocol` turn by turn
//! - `Listener`: binds an address and admits a bounded number of connections
//! - `Connector`: dials an address and drives a single outbound connection
//!
//! # Flow
//!
//! A listener acquires an admission permit before every accept. The accepted
//! socket becomes a `Connection`, a protocol is created for it, and both move
//! into a task of their own that holds the permit until the connection closes.

pub use address::Address;
pub use connection::{Connection, ConnectionId, ConnectionState, InboundStream, OutboundStream};
pub use connector::Connector;
pub use listener::{Admission, Listener};
pub use socket::Socket;

mod address;
mod connection;
mod connector;
mod listener;
mod socket;
