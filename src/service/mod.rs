pub use app_error::{AppError, AppResult};
pub use config::{ConnectionConfig, ContextConfig, NetworkConfig, ReactorConfig};
pub use context::{Context, IoSource, Registration, SourceId};
pub use shutdown::Shutdown;
pub use tracing_config::{setup_local_tracing, setup_tracing};

mod app_error;
mod config;
mod context;
mod shutdown;
mod tracing_config;
