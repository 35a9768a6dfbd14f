use std::{
    path::{Path, PathBuf},
    process,
    sync::Arc,
};

use clap::{Parser, Subcommand};
use console::style;
use tokio_util::sync::CancellationToken;
use workstream_log::{MemoryStreamLog, RedisStreamLog, StreamLog};
use workstream_sdk::{ConsumerConfig, Publisher, PublisherConfig};

mod config;
mod consume;
mod controller;
mod publish;
mod serve;
mod server;

use config::{CONFIG_FILE_NAME, Config, LoadConfigError};

#[derive(Clone, Debug)]
pub struct Context {
    pub config: Config,
}

impl Context {
    pub fn new(config: Config) -> Self {
        Context { config }
    }

    /// Open the stream transport, in process or on the configured Redis server
    pub async fn open_log(&self, in_memory: bool) -> anyhow::Result<Arc<dyn StreamLog>> {
        if in_memory {
            return Ok(MemoryStreamLog::new());
        }
        let log = RedisStreamLog::connect(&self.config.redis.dsn).await?;
        log.ping().await?;
        Ok(Arc::new(log))
    }

    pub fn publisher(&self, log: Arc<dyn StreamLog>) -> Publisher {
        Publisher::new(
            log,
            PublisherConfig::new(&self.config.redis.streamname)
                .with_max_stream_length(self.config.redis.maxstreamlength),
        )
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig::new(&self.config.redis.streamname, &self.config.redis.streamgroup)
            .with_data_size_bytes(self.config.data_size_bytes())
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about = "Workstream - consumer-group work queue", long_about = None)]
struct Opts {
    /// Path to the configuration file
    #[arg(
        long = "config",
        short = 'c',
        global = true,
        default_value = CONFIG_FILE_NAME
    )]
    config_path: PathBuf,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
enum Command {
    /// Start the HTTP surface, optionally with a consumer
    Serve(serve::ServeCommand),
    /// Run a consumer until interrupted
    Consume(consume::ConsumeCommand),
    /// Publish a message
    Publish(publish::PublishCommand),
    /// Print the outstanding work of the consumer group
    Pending(publish::PendingCommand),
}

#[tokio::main]
async fn main() {
    let opts: Opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(e) => {
            let _ = e.print();
            process::exit(e.exit_code());
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_dir = opts
        .config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();
    load_env_file(&config_dir);

    let config = match load_config(&opts.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red(), e);
            process::exit(1);
        }
    };

    let ctx = Context::new(config);

    if let Err(e) = handle_command(opts.command, &ctx).await {
        eprintln!("{} {:#}", style("Error:").red(), e);
        process::exit(1);
    }
}

/// Load the configuration file, then apply environment overrides.
/// A missing file is fine when the environment carries every setting.
fn load_config(path: &Path) -> Result<Config, LoadConfigError> {
    let mut config = match Config::load(path) {
        Ok(config) => {
            eprintln!("✓ Loaded configuration from {}", path.display());
            config
        }
        Err(LoadConfigError::FileNotFound(_)) => Config::default(),
        Err(e) => return Err(e),
    };
    config.apply_env()?;
    Ok(config)
}

/// Load environment variables from .env file in the configuration directory
fn load_env_file(config_dir: &Path) {
    let env_file_path = config_dir.join(".env");

    match dotenvy::from_path(&env_file_path) {
        Ok(_) => {
            eprintln!("✓ Loaded environment from {}", env_file_path.display());
        }
        Err(e) if e.not_found() => {}
        Err(e) => {
            eprintln!(
                "Warning: Failed to load .env file at {}: {}",
                env_file_path.display(),
                e
            );
        }
    }
}

/// Cancelled on Ctrl+C
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
        }
        trigger.cancel();
    });
    token
}

async fn handle_command(command: Command, ctx: &Context) -> anyhow::Result<()> {
    match command {
        Command::Serve(cmd) => cmd.execute(ctx).await,
        Command::Consume(cmd) => cmd.execute(ctx).await,
        Command::Publish(cmd) => cmd.execute(ctx).await,
        Command::Pending(cmd) => cmd.execute(ctx).await,
    }
}
