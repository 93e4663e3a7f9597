use tracing::{debug, error};

use super::connection::next_connection_id;
use super::{Address, Connection, Socket};
use crate::protocol::Protocol;
use crate::service::{ConnectionConfig, Context, IoSource, Registration};

/// Outbound source: dials `address` once and drives `protocol` over the
/// resulting connection exactly like an accepted one.
#[derive(Debug)]
pub struct Connector<P> {
    address: Address,
    protocol: P,
    connection_config: ConnectionConfig,
}

impl<P: Protocol> Connector<P> {
    pub fn new(context: &Context, address: Address, protocol: P) -> Self {
        Connector {
            address,
            protocol,
            connection_config: context.config().connection.clone(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

impl<P: Protocol> IoSource for Connector<P> {
    fn describe(&self) -> String {
        format!("connector to {}", self.address)
    }

    fn launch(self: Box<Self>, registration: Registration) {
        let Connector {
            address,
            protocol,
            connection_config,
        } = *self;
        let spawner = registration.clone();
        spawner.spawn(async move {
            let mut shutdown = registration.shutdown();
            let socket = tokio::select! {
                res = Socket::connect(&address) => match res {
                    Ok(socket) => socket,
                    Err(e) => {
                        error!("failed to connect to {}: {}", address, e);
                        return;
                    }
                },
                _ = shutdown.recv() => {
                    debug!("connect to {} cancelled", address);
                    return;
                }
            };

            let connection_id = next_connection_id();
            match Connection::new(
                connection_id,
                socket,
                &connection_config,
                registration.shutdown(),
            ) {
                Ok(connection) => {
                    debug!(connection_id, %address, "connected");
                    registration.spawn_connection(connection, protocol, ());
                }
                Err(e) => error!("failed to set up connection to {}: {}", address, e),
            }
        });
    }
}
