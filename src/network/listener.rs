use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

use super::connection::next_connection_id;
use super::{Address, Connection, Socket};
use crate::protocol::{Protocol, ProtocolFactory, Prototype};
use crate::service::{ConnectionConfig, Context, IoSource, Registration};
use crate::{AppError, AppResult};

const ACCEPT_BACKOFF_START: Duration = Duration::from_millis(1);

/// Doubles the accept retry delay, capped at `max`.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// Live view of a listener's connection budget.
#[derive(Debug, Clone)]
pub struct Admission {
    permits: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    max: usize,
}

impl Admission {
    fn new(max: usize) -> Self {
        Admission {
            permits: Arc::new(Semaphore::new(max)),
            active: Arc::new(AtomicUsize::new(0)),
            max,
        }
    }

    /// Connections currently admitted and not yet closed.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn available(&self) -> usize {
        self.max - self.active()
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> AdmissionPermit {
        self.active.fetch_add(1, Ordering::SeqCst);
        AdmissionPermit {
            _permit: permit,
            active: self.active.clone(),
        }
    }
}

/// One unit of a listener's budget, held by a connection until it is gone.
struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        // the semaphore permit is returned after this, so active never exceeds max
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Accepts connections on a bound address and hands each one a fresh protocol.
///
/// At most `max_connections` accepted connections are open at any time; while
/// the budget is exhausted nothing is accepted and new peers wait in the OS
/// backlog. Closing any admitted connection lets exactly one more in.
pub struct Listener<F: ProtocolFactory> {
    address: SocketAddr,
    // handed to the runtime on launch
    listener: Option<StdTcpListener>,
    admission: Admission,
    factory: F,
    connection_config: ConnectionConfig,
    backoff_max: Duration,
}

impl<P> Listener<Prototype<P>>
where
    P: Protocol + Clone + Sync,
{
    /// Binds `address` immediately; every accepted connection gets a clone of
    /// `protocol`.
    pub fn new(
        context: &Context,
        address: Address,
        max_connections: usize,
        protocol: P,
    ) -> AppResult<Self> {
        Listener::with_factory(context, address, max_connections, Prototype(protocol))
    }
}

impl<F: ProtocolFactory> Listener<F> {
    pub fn with_factory(
        context: &Context,
        address: Address,
        max_connections: usize,
        factory: F,
    ) -> AppResult<Self> {
        if max_connections == 0 {
            return Err(AppError::InvalidValue(
                "a listener must admit at least one connection".to_string(),
            ));
        }
        let listener = StdTcpListener::bind(address.socket_addr()).map_err(|source| {
            AppError::Bind {
                address: address.socket_addr(),
                source,
            }
        })?;
        listener.set_nonblocking(true)?;
        let bound = listener.local_addr()?;
        info!("listening on {} for up to {} connections", bound, max_connections);

        let config = context.config();
        Ok(Listener {
            address: bound,
            listener: Some(listener),
            admission: Admission::new(max_connections),
            factory,
            connection_config: config.connection.clone(),
            backoff_max: Duration::from_millis(config.network.accept_backoff_max_ms.max(1)),
        })
    }

    /// The bound address, with the actual port when bound to port 0.
    pub fn local_addr(&self) -> Address {
        Address::from(self.address)
    }

    pub fn admission(&self) -> Admission {
        self.admission.clone()
    }

    /// Accept loop. Returns only when `shutdown` fires.
    #[tracing::instrument(skip_all, fields(address = %self.address))]
    async fn run(self, listener: TcpListener, registration: Registration) {
        let mut shutdown = registration.shutdown();
        loop {
            let permit = tokio::select! {
                permit = self.admission.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.recv() => break,
            };

            let (stream, peer_addr) = tokio::select! {
                accepted = self.accept(&listener) => accepted,
                _ = shutdown.recv() => break,
            };

            if let Err(e) = self.admit(stream, peer_addr, permit, &registration) {
                warn!("dropping connection from {}: {}", peer_addr, e);
            }
        }
        debug!("listener stopped accepting");
    }

    fn admit(
        &self,
        stream: TcpStream,
        peer_addr: SocketAddr,
        permit: OwnedSemaphorePermit,
        registration: &Registration,
    ) -> AppResult<()> {
        let connection_id = next_connection_id();
        let connection = Connection::new(
            connection_id,
            Socket::new(stream, peer_addr),
            &self.connection_config,
            registration.shutdown(),
        )?;
        let permit = self.admission.admit(permit);
        debug!(
            connection_id,
            %peer_addr,
            active = self.admission.active(),
            "accepted connection"
        );
        let protocol = self.factory.create(connection_id);
        registration.spawn_connection(connection, protocol, permit);
        Ok(())
    }

    /// Retries failed accepts with a doubling delay. Accept errors are usually
    /// transient (descriptor exhaustion, aborted handshakes), so it never gives up.
    async fn accept(&self, listener: &TcpListener) -> (TcpStream, SocketAddr) {
        let mut backoff = ACCEPT_BACKOFF_START;
        loop {
            match listener.accept().await {
                Ok(accepted) => return accepted,
                Err(err) => {
                    error!("accept failed, retrying in {:?}: {}", backoff, err);
                }
            }
            time::sleep(backoff).await;
            backoff = next_backoff(backoff, self.backoff_max);
        }
    }
}

impl<F: ProtocolFactory> IoSource for Listener<F> {
    fn describe(&self) -> String {
        format!("listener on {}", self.address)
    }

    fn launch(self: Box<Self>, registration: Registration) {
        let mut source = *self;
        let Some(std_listener) = source.listener.take() else {
            error!("{} launched twice", source.describe());
            return;
        };
        let handle = registration.handle().clone();
        // from_std registers with the reactor of the current runtime
        let _enter = handle.enter();
        let listener = match TcpListener::from_std(std_listener) {
            Ok(listener) => listener,
            Err(e) => {
                error!("{}: cannot register socket: {}", source.describe(), e);
                return;
            }
        };
        let spawner = registration.clone();
        spawner.spawn(source.run(listener, registration));
    }
}

impl<F: ProtocolFactory> std::fmt::Debug for Listener<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("address", &self.address)
            .field("admission", &self.admission)
            .finish()
    }
}
