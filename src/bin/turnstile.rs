use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use tokio::runtime;
use tracing::{debug, info};
use turnstile::{
    setup_local_tracing, setup_tracing, Address, AppResult, BinaryReader, BinaryWriter, Context,
    Listener, Protocol, ReactorConfig, StreamReader, StreamWriter,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    /// write logs to hourly rolling files in this directory as well as stdout
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
pub enum Command {
    PrintConfig,
}

/// Totals across all connections of the sink.
#[derive(Debug, Default)]
struct SinkStats {
    batches: AtomicU64,
    records: AtomicU64,
}

/// Accepts batches of `u64 count, i32 index` followed by `count` records of
/// `uuid, i64, i64, f64`, and acknowledges each batch with its record count.
#[derive(Debug, Clone)]
struct RecordSink {
    stats: Arc<SinkStats>,
}

impl Protocol for RecordSink {
    async fn process<R: StreamReader, W: StreamWriter>(
        &mut self,
        reader: &mut BinaryReader<'_, R>,
        writer: &mut BinaryWriter<'_, W>,
    ) -> AppResult<bool> {
        let count = reader.read::<u64>().await?;
        let index = reader.read::<i32>().await?;
        let mut checksum = 0f64;
        for _ in 0..count {
            let _id = reader.read::<Uuid>().await?;
            let _timestamp = reader.read::<i64>().await?;
            let _flags = reader.read::<i64>().await?;
            checksum += reader.read::<f64>().await?;
        }
        debug!(index, count, checksum, "batch received");

        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        self.stats.records.fetch_add(count, Ordering::Relaxed);
        writer.write(count).await?;
        Ok(true)
    }
}

fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn main() -> AppResult<()> {
    dotenv().ok();

    let commandline: CommandLine = CommandLine::parse();
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", log_filter(commandline.verbose));
    }
    let _log_guard = match &commandline.log_dir {
        Some(dir) => Some(setup_tracing(dir)?),
        None => {
            setup_local_tracing()?;
            None
        }
    };

    let config_path = commandline.conf.as_ref().map_or_else(
        || {
            let mut path = PathBuf::from("./");
            path.push("conf.toml");
            path
        },
        PathBuf::from,
    );
    let config = ReactorConfig::set_up_config(config_path)?;

    if let Some(Command::PrintConfig) = commandline.command {
        println!("{:#?}", config);
        return Ok(());
    }

    let address = Address::from_parts(&config.network.ip, config.network.port)?;
    let max_connection = config.network.max_connection;
    let context = Context::with_config(config);
    let stats = Arc::new(SinkStats::default());
    let listener = Listener::new(
        &context,
        address,
        max_connection,
        RecordSink {
            stats: stats.clone(),
        },
    )?;
    info!("record sink listening on {}", listener.local_addr());
    context.add(listener)?;
    context.start()?;

    // the context refuses to stop from inside a runtime, so wait on a separate one
    let signal_runtime = runtime::Builder::new_current_thread().enable_all().build()?;
    signal_runtime.block_on(tokio::signal::ctrl_c())?;
    drop(signal_runtime);

    info!("received ctrl-c, shutting down");
    context.stop()?;
    info!(
        batches = stats.batches.load(Ordering::Relaxed),
        records = stats.records.load(Ordering::Relaxed),
        "record sink stopped"
    );
    Ok(())
}
