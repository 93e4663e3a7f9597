use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

/// Worker pool and lifecycle settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Number of worker threads; 0 means one per logical cpu.
    pub worker_threads: usize,
    /// How long `stop` waits for connections to wind down before the
    /// runtime drops whatever is still pending.
    pub shutdown_timeout_ms: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig {
            worker_threads: 0,
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl ContextConfig {
    pub fn effective_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            num_cpus::get()
        } else {
            self.worker_threads
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    pub max_connection: usize,
    pub accept_backoff_max_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "0.0.0.0".to_string(),
            port: 42000,
            max_connection: 1024,
            accept_backoff_max_ms: 1_000,
        }
    }
}

/// Buffer policy applied to every connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Initial capacity of the inbound buffer.
    pub read_buffer_size: usize,
    /// Ceiling for a single `fill` request; the inbound buffer never grows beyond it.
    pub max_fill_size: usize,
    /// Queued outbound bytes that trigger a send before the turn ends.
    pub write_buffer_high_water: usize,
    /// Largest length prefix accepted for strings and blobs.
    pub max_field_len: usize,
    pub tcp_nodelay: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            read_buffer_size: 4 * 1024,
            max_fill_size: 1024 * 1024,
            write_buffer_high_water: 64 * 1024,
            max_field_len: 16 * 1024 * 1024,
            tcp_nodelay: true,
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReactorConfig {
    pub context: ContextConfig,
    pub network: NetworkConfig,
    pub connection: ConnectionConfig,
}

impl ReactorConfig {
    /// Loads the configuration from a toml file, then applies `TURNSTILE_*`
    /// environment overrides, e.g. `TURNSTILE_NETWORK__PORT=9000`.
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<ReactorConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .add_source(config::Environment::with_prefix("TURNSTILE").separator("__"))
            .build()?;

        let reactor_config: ReactorConfig = config.try_deserialize()?;
        reactor_config.validate()?;

        Ok(reactor_config)
    }

    pub fn validate(&self) -> AppResult<()> {
        let conn = &self.connection;
        if conn.read_buffer_size == 0 {
            return Err(AppError::InvalidValue(
                "connection.read_buffer_size must be positive".to_string(),
            ));
        }
        if conn.max_fill_size < conn.read_buffer_size {
            return Err(AppError::InvalidValue(format!(
                "connection.max_fill_size {} is smaller than read_buffer_size {}",
                conn.max_fill_size, conn.read_buffer_size
            )));
        }
        if self.network.max_connection == 0 {
            return Err(AppError::InvalidValue(
                "network.max_connection must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
