//! Protocol Module
//!
//! The contract between the engine and application code.
//!
//! A [`Protocol`] is invoked once per turn with a reader over the connection's
//! inbound bytes and a writer for its replies. It only ever sees the codec
//! cursors, never the connection itself, so the same implementation runs over a
//! socket or an in-memory buffer.
//!
//! # Binding
//!
//! Listeners obtain a protocol per connection from a [`ProtocolFactory`]:
//! - a closure `Fn(ConnectionId) -> P`
//! - a [`Prototype`] that is cloned for every connection; state meant to be
//!   shared across connections lives behind an `Arc` inside it
//!
//! The engine imposes no isolation on shared protocol state. [`SlotTable`]
//! covers the common case of per-index slots owned by one connection each.

use std::future::Future;

use crate::codec::{BinaryReader, BinaryWriter, StreamReader, StreamWriter};
use crate::network::ConnectionId;
use crate::AppResult;

pub use slot_table::{SlotGuard, SlotTable};

mod slot_table;

pub trait Protocol: Send + 'static {
    /// Handles one turn.
    ///
    /// Reads as much as the message framing requires (reads suspend until the
    /// bytes arrive) and optionally writes a reply. Returns `true` to be invoked
    /// again for the next turn, `false` to flush queued replies and close the
    /// connection. An error also closes the connection; replies queued before
    /// it are still flushed unless the context is stopping.
    fn process<R: StreamReader, W: StreamWriter>(
        &mut self,
        reader: &mut BinaryReader<'_, R>,
        writer: &mut BinaryWriter<'_, W>,
    ) -> impl Future<Output = AppResult<bool>> + Send;

    /// Called once when the connection stops being processed, whatever the reason.
    fn on_close(&mut self, _connection_id: ConnectionId) {}
}

pub trait ProtocolFactory: Send + Sync + 'static {
    type Protocol: Protocol;

    fn create(&self, connection_id: ConnectionId) -> Self::Protocol;
}

impl<F, P> ProtocolFactory for F
where
    F: Fn(ConnectionId) -> P + Send + Sync + 'static,
    P: Protocol,
{
    type Protocol = P;

    fn create(&self, connection_id: ConnectionId) -> P {
        self(connection_id)
    }
}

/// Hands every connection its own clone of a protocol value.
#[derive(Debug, Clone)]
pub struct Prototype<P>(pub P);

impl<P: Protocol + Clone + Sync> ProtocolFactory for Prototype<P> {
    type Protocol = P;

    fn create(&self, _connection_id: ConnectionId) -> P {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use super::*;

    #[derive(Clone)]
    struct Echo;

    impl Protocol for Echo {
        async fn process<R: StreamReader, W: StreamWriter>(
            &mut self,
            reader: &mut BinaryReader<'_, R>,
            writer: &mut BinaryWriter<'_, W>,
        ) -> AppResult<bool> {
            let value = reader.read::<u32>().await?;
            writer.write(value).await?;
            Ok(value != 0)
        }
    }

    #[tokio::test]
    async fn test_protocol_over_memory_buffers() -> AppResult<()> {
        let mut request = BytesMut::new();
        request.extend_from_slice(&9u32.to_ne_bytes());
        request.extend_from_slice(&0u32.to_ne_bytes());
        let mut request: Bytes = request.freeze();
        let mut reply = BytesMut::new();

        let mut protocol = Prototype(Echo).create(1);
        let mut reader = BinaryReader::new(&mut request);
        let mut writer = BinaryWriter::new(&mut reply);
        assert!(protocol.process(&mut reader, &mut writer).await?);
        assert!(!protocol.process(&mut reader, &mut writer).await?);
        assert_eq!(writer.pending(), 8);
        Ok(())
    }

    #[test]
    fn test_closure_factory_sees_connection_id() {
        struct Tagged(ConnectionId);
        impl Protocol for Tagged {
            async fn process<R: StreamReader, W: StreamWriter>(
                &mut self,
                _reader: &mut BinaryReader<'_, R>,
                _writer: &mut BinaryWriter<'_, W>,
            ) -> AppResult<bool> {
                Ok(false)
            }
        }

        let factory = Tagged;
        assert_eq!(factory.create(42).0, 42);
    }
}
