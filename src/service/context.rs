use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::{self, Handle, Runtime};
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{AppError, AppResult, ReactorConfig, Shutdown};
use crate::network::Connection;
use crate::protocol::Protocol;

/// Identifies a source registered with a [`Context`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source-{}", self.0)
    }
}

/// Something that produces I/O work for the context: a listener accepting
/// connections, or an outbound connection.
pub trait IoSource: Send + 'static {
    fn describe(&self) -> String;

    /// Spawns the source's tasks on the worker pool. Called once, from `add`
    /// on a running context or from `start`.
    fn launch(self: Box<Self>, registration: Registration);
}

type SourceMap = Arc<DashMap<SourceId, CancellationToken>>;

/// Keeps a source listed in the context while any of its tasks is alive.
#[derive(Debug)]
struct SourceLease {
    id: SourceId,
    sources: SourceMap,
}

impl Drop for SourceLease {
    fn drop(&mut self) {
        if self.sources.remove(&self.id).is_some() {
            debug!("{} finished", self.id);
        }
    }
}

/// What a launched source gets from the context.
#[derive(Debug, Clone)]
pub struct Registration {
    id: SourceId,
    token: CancellationToken,
    shutdown_complete_tx: mpsc::Sender<()>,
    handle: Handle,
    lease: Arc<SourceLease>,
}

impl Registration {
    pub fn id(&self) -> SourceId {
        self.id
    }

    /// Fires when the context stops or the source is removed.
    pub fn shutdown(&self) -> Shutdown {
        Shutdown::new(self.token.clone())
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawns a task the context waits for when it stops.
    pub fn spawn<F>(&self, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let shutdown_complete_tx = self.shutdown_complete_tx.clone();
        let lease = self.lease.clone();
        self.handle.spawn(async move {
            let _shutdown_complete_tx = shutdown_complete_tx;
            let _lease = lease;
            future.await;
        });
    }

    /// Drives `connection` with `protocol` on its own task.
    ///
    /// Errors and panics are logged and end only this connection. `guard` is
    /// dropped when the connection is gone, whichever way it ends.
    pub fn spawn_connection<P, G>(&self, mut connection: Connection, mut protocol: P, guard: G)
    where
        P: Protocol,
        G: Send + 'static,
    {
        let connection_id = connection.id();
        let peer = connection.peer_addr();
        let shutdown_complete_tx = self.shutdown_complete_tx.clone();
        let lease = self.lease.clone();
        let task = self.handle.spawn(async move {
            let _guard = guard;
            let _shutdown_complete_tx = shutdown_complete_tx;
            let _lease = lease;
            match connection.run(&mut protocol).await {
                Ok(()) => debug!(connection_id, ?peer, "connection closed"),
                Err(e) if e.is_closing() => {
                    debug!(connection_id, ?peer, "connection closed on shutdown")
                }
                Err(e) if e.is_end_of_stream() => {
                    warn!(connection_id, ?peer, "peer disconnected mid-message: {}", e)
                }
                Err(e) => error!(connection_id, ?peer, "connection error: {}", e),
            }
            connection.close().await;
        });

        self.handle.spawn(async move {
            if let Err(join_error) = task.await {
                if join_error.is_panic() {
                    error!(
                        connection_id,
                        "connection task panicked with message: {}",
                        panic_message(join_error.into_panic())
                    );
                }
            }
        });
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

type PendingSource = (SourceId, CancellationToken, Box<dyn IoSource>);

enum ContextState {
    Created {
        pending: Vec<PendingSource>,
    },
    Running {
        runtime: Runtime,
        shutdown_complete_tx: mpsc::Sender<()>,
        shutdown_complete_rx: mpsc::Receiver<()>,
    },
    Stopped,
}

/// The scheduler: a fixed pool of worker threads sharing one readiness queue,
/// plus the sources whose I/O it dispatches.
///
/// Each connection is one task, so its completions are handled one at a time
/// and in order, by whichever worker picks them up. Different connections run
/// in parallel.
///
/// Lifecycle: `new` → `add`* → `start` → `add`* / `remove`* → `stop`.
pub struct Context {
    config: ReactorConfig,
    worker_count: usize,
    root: CancellationToken,
    next_source_id: AtomicU64,
    // a source leaves when removed, or by itself once its last task ends
    sources: SourceMap,
    state: Mutex<ContextState>,
}

impl Context {
    /// A context with `worker_count` workers (0 = one per cpu) and default settings.
    pub fn new(worker_count: usize) -> Self {
        let mut config = ReactorConfig::default();
        config.context.worker_threads = worker_count;
        Context::with_config(config)
    }

    pub fn with_config(config: ReactorConfig) -> Self {
        Context {
            worker_count: config.context.effective_worker_threads(),
            config,
            root: CancellationToken::new(),
            next_source_id: AtomicU64::new(1),
            sources: Arc::new(DashMap::new()),
            state: Mutex::new(ContextState::Created {
                pending: Vec::new(),
            }),
        }
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), ContextState::Running { .. })
    }

    /// Sources registered and not yet finished or removed.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    fn lease(&self, id: SourceId) -> Arc<SourceLease> {
        Arc::new(SourceLease {
            id,
            sources: self.sources.clone(),
        })
    }

    /// Registers a source. Before `start` it is launched by `start`, afterwards
    /// immediately.
    pub fn add<S: IoSource>(&self, source: S) -> AppResult<SourceId> {
        let mut state = self.state.lock();
        let id = SourceId(self.next_source_id.fetch_add(1, Ordering::Relaxed));
        let token = self.root.child_token();
        let description = source.describe();

        match &mut *state {
            ContextState::Created { pending } => {
                self.sources.insert(id, token.clone());
                pending.push((id, token, Box::new(source)));
            }
            ContextState::Running {
                runtime,
                shutdown_complete_tx,
                ..
            } => {
                // listed before launch, a source may finish before launch returns
                self.sources.insert(id, token.clone());
                let registration = Registration {
                    id,
                    token,
                    shutdown_complete_tx: shutdown_complete_tx.clone(),
                    handle: runtime.handle().clone(),
                    lease: self.lease(id),
                };
                Box::new(source).launch(registration);
            }
            ContextState::Stopped => {
                return Err(AppError::IllegalStateError(format!(
                    "cannot add {} to a stopped context",
                    description
                )));
            }
        }
        debug!("registered {} as {}", description, id);
        Ok(id)
    }

    /// Shuts a single source down. A listener stops accepting and closes the
    /// connections it admitted. Returns `false` for unknown ids.
    pub fn remove(&self, id: SourceId) -> bool {
        let mut state = self.state.lock();
        if let ContextState::Created { pending } = &mut *state {
            pending.retain(|(pending_id, _, _)| *pending_id != id);
        }
        match self.sources.remove(&id) {
            Some((_, token)) => {
                token.cancel();
                debug!("removed {}", id);
                true
            }
            None => false,
        }
    }

    /// Spawns the worker threads and launches every registered source.
    pub fn start(&self) -> AppResult<()> {
        let mut state = self.state.lock();
        let ContextState::Created { pending } = &mut *state else {
            return Err(AppError::IllegalStateError(
                "context already started or stopped".to_string(),
            ));
        };

        let runtime = runtime::Builder::new_multi_thread()
            .worker_threads(self.worker_count)
            .thread_name("turnstile-worker")
            .enable_all()
            .build()?;
        let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);

        for (id, token, source) in pending.drain(..) {
            source.launch(Registration {
                id,
                token,
                shutdown_complete_tx: shutdown_complete_tx.clone(),
                handle: runtime.handle().clone(),
                lease: self.lease(id),
            });
        }

        *state = ContextState::Running {
            runtime,
            shutdown_complete_tx,
            shutdown_complete_rx,
        };
        info!("context started with {} workers", self.worker_count);
        Ok(())
    }

    /// Cancels all outstanding operations, closes every managed socket and joins
    /// the workers. Nothing runs on the context after this returns.
    ///
    /// Must not be called from inside an async runtime. Calling it again is a no-op.
    pub fn stop(&self) -> AppResult<()> {
        if Handle::try_current().is_ok() {
            return Err(AppError::IllegalStateError(
                "stop cannot be called from within an async runtime".to_string(),
            ));
        }
        // later adds fail, and sources spawned by running tasks may still take the lock
        let previous = std::mem::replace(&mut *self.state.lock(), ContextState::Stopped);

        match previous {
            ContextState::Stopped => Ok(()),
            ContextState::Created { pending } => {
                self.root.cancel();
                self.sources.clear();
                debug!("context stopped before start, dropping {} sources", pending.len());
                Ok(())
            }
            ContextState::Running {
                runtime,
                shutdown_complete_tx,
                mut shutdown_complete_rx,
            } => {
                info!("stopping context");
                self.root.cancel();
                // every task holds a sender clone; recv yields None once all are gone
                drop(shutdown_complete_tx);

                let grace = Duration::from_millis(self.config.context.shutdown_timeout_ms);
                let drained = runtime
                    .block_on(async { time::timeout(grace, shutdown_complete_rx.recv()).await })
                    .is_ok();
                if !drained {
                    warn!(
                        "connections still busy after {:?}, dropping them",
                        grace
                    );
                }
                runtime.shutdown_timeout(grace);
                self.sources.clear();
                info!("context stopped");
                Ok(())
            }
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if Handle::try_current().is_err() {
            if let Err(e) = self.stop() {
                error!("failed to stop context: {}", e);
            }
            return;
        }
        // a runtime cannot be joined from inside another one
        let previous = std::mem::replace(&mut *self.state.lock(), ContextState::Stopped);
        if let ContextState::Running { runtime, .. } = previous {
            self.root.cancel();
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("worker_count", &self.worker_count)
            .field("sources", &self.sources.len())
            .field("running", &self.is_running())
            .finish()
    }
}
