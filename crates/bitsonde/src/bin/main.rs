use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use bitsonde::filter::{CommandFilter, CommandFilterConfig, Processor};
use bitsonde::manager::{Manager, ManagerConfig};
use bitsonde::recorder::{FileRecorder, RecorderConfig};
use bitsonde::repo::{Repository, RepositoryConfig};
use bitsonde::tracker::Tracker;
use bitsonde::{Network, PROTOCOL_VERSION};

/// Commands recorded when no explicit set is configured.
const DEFAULT_COMMANDS: &[&str] = &[
    "version",
    "verack",
    "ping",
    "pong",
    "getaddr",
    "addr",
    "inv",
    "getdata",
    "notfound",
    "tx",
    "block",
    "merkleblock",
    "headers",
    "reject",
    "alert",
    "filterload",
    "filteradd",
    "filterclear",
];

#[derive(Parser)]
#[command(name = "bitsonde")]
#[command(about = "A passive crawler that records Bitcoin peer-to-peer traffic.", long_about = None)]
struct Args {
    /// Use the specified network (mainnet, testnet3, regtest).
    #[arg(short, long, default_value = "testnet3")]
    pub network: Network,

    /// Listen for incoming connections on the specified addresses.
    /// Defaults to the wildcard addresses at the network default port.
    #[arg(short, long = "listen")]
    pub listen: Vec<SocketAddr>,

    /// Maximum number of simultaneous peer connections.
    #[arg(long, default_value_t = 100)]
    pub conn_limit: usize,

    /// Milliseconds between outbound connection attempts.
    #[arg(long, default_value_t = 40)]
    pub conn_rate_ms: u64,

    /// Seconds between aggregate status log lines.
    #[arg(long, default_value_t = 5)]
    pub info_rate_secs: u64,

    /// Maximum protocol version to negotiate.
    #[arg(long, default_value_t = PROTOCOL_VERSION)]
    pub protocol_version: u32,

    /// Only accept inbound connections from these remote ports.
    #[arg(long = "accept-port")]
    pub accept_ports: Vec<u16>,

    /// DNS seeds to bootstrap from, overriding the network defaults.
    #[arg(long = "seed")]
    pub seeds: Vec<String>,

    /// Persist the address table here and restore it on startup.
    #[arg(long)]
    pub addr_file: Option<PathBuf>,

    /// Commands to record; defaults to every supported command.
    #[arg(long = "record")]
    pub commands: Vec<String>,

    /// Path prefix of the record logs.
    #[arg(long, default_value = "bitsonde")]
    pub record_prefix: PathBuf,

    /// Rotate record logs after this many bytes (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    pub rotate_size: u64,

    /// Rotate record logs after this many seconds (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    pub rotate_age_secs: u64,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Disable colored output.
    #[arg(long, default_value_t = false)]
    pub no_color: bool,

    /// Enable verbose logging (thread ids, file and line numbers).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    init_tracing(&args)?;
    info!(network = %args.network, "bitsonde starting");

    let seeds = if args.seeds.is_empty() {
        args.network
            .dns_seeds()
            .iter()
            .map(|seed| seed.to_string())
            .collect()
    } else {
        args.seeds.clone()
    };
    let repo = Repository::new(RepositoryConfig {
        seeds,
        default_port: args.network.default_port(),
        restore: args.addr_file.is_some(),
        path: args
            .addr_file
            .clone()
            .unwrap_or_else(|| PathBuf::from("addresses.json")),
        ..RepositoryConfig::default()
    })?;

    let recorder = FileRecorder::new(RecorderConfig {
        prefix: args.record_prefix.clone(),
        size_limit: args.rotate_size,
        age_limit: Duration::from_secs(args.rotate_age_secs),
    })
    .await?;
    let sink: Arc<dyn Processor> = Arc::clone(&recorder) as Arc<dyn Processor>;

    let commands: Vec<String> = if args.commands.is_empty() {
        DEFAULT_COMMANDS.iter().map(|cmd| cmd.to_string()).collect()
    } else {
        args.commands.clone()
    };
    let filter = CommandFilter::new(CommandFilterConfig::with_commands(commands), vec![sink]);

    let tracker = Arc::new(Tracker::new());
    let manager = Manager::new(
        ManagerConfig {
            network: args.network,
            version: args.protocol_version,
            conn_rate: Duration::from_millis(args.conn_rate_ms.max(1)),
            info_rate: Duration::from_secs(args.info_rate_secs.max(1)),
            conn_limit: args.conn_limit,
            listen: args.listen.clone(),
            accept_ports: args.accept_ports.clone(),
        },
        Arc::clone(&repo),
        tracker,
        Arc::clone(&filter) as Arc<dyn Processor>,
    )?;

    repo.start();
    manager.start().await?;
    info!("crawler running, interrupt to stop");

    tokio::signal::ctrl_c().await?;
    info!("bitsonde shutting down");

    manager.stop().await;
    if args.addr_file.is_some() {
        if let Err(err) = repo.save() {
            warn!(%err, "could not save address table");
        }
    }
    filter.stop().await;
    recorder.stop().await;

    info!("bitsonde closing");
    Ok(())
}

fn init_tracing(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let level = match args.log_level.as_str() {
        "error" => tracing::Level::ERROR,
        "warn" => tracing::Level::WARN,
        "info" => tracing::Level::INFO,
        "debug" => tracing::Level::DEBUG,
        "trace" => tracing::Level::TRACE,
        _ => {
            eprintln!(
                "Invalid log level: {}. Using 'info' as default.",
                args.log_level
            );
            tracing::Level::INFO
        }
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
        .add_directive("tokio=warn".parse()?);

    let use_ansi = std::io::IsTerminal::is_terminal(&std::io::stderr()) && !args.no_color;

    let subscriber = Registry::default().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .with_level(true)
            .with_target(true)
            .with_thread_ids(args.verbose)
            .with_thread_names(args.verbose)
            .with_ansi(use_ansi)
            .with_file(args.verbose)
            .with_line_number(args.verbose)
            .with_timer(ChronoUtc::rfc_3339()),
    );

    subscriber.try_init()?;

    Ok(())
}
