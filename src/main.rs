//! Tether — command relay and remote agent.
//!
//! Usage:
//!   tether relay                                  # Relay on 0.0.0.0:8080
//!   tether relay --port 9000 --max-connections 64
//!   tether agent --url ws://relay:8080/ --device-id pixel-7
//!   tether agent --url wss://relay.example.com/ws --heartbeat-secs 0

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tether_agent::{ActionRouter, AgentConfig, Supervisor};
use tether_relay::{RelayConfig, RelayServer};
use tether_transport::{DEFAULT_MAX_FRAME_SIZE, WsConfig, WsConnector};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tether", about = "Tether — resilient command relay")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Write logs to a file (defaults to ~/.tether/logs/tether.log if no path given)
    #[arg(long, global = true, default_missing_value = "DEFAULT", num_args = 0..=1)]
    log_file: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the broadcast relay
    Relay(RelayArgs),
    /// Run an agent that keeps a connection to the relay and answers commands
    Agent(AgentArgs),
}

#[derive(Args, Debug)]
struct RelayArgs {
    /// Hostname to bind to
    #[arg(long, default_value = "0.0.0.0")]
    hostname: String,

    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Largest accepted frame, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,

    /// Maximum concurrent peers (unbounded if not given)
    #[arg(long)]
    max_connections: Option<usize>,

    /// Frames queued per peer before it is dropped as too slow
    #[arg(long, default_value = "256")]
    send_buffer: usize,
}

#[derive(Args, Debug)]
struct AgentArgs {
    /// Relay URL (ws:// or wss://)
    #[arg(long, default_value = "ws://127.0.0.1:8080/")]
    url: String,

    /// Device identifier sent as the deviceId query parameter
    #[arg(long)]
    device_id: Option<String>,

    /// Seconds between keep-alive pings (0 disables)
    #[arg(long, default_value = "30")]
    heartbeat_secs: u64,

    /// First reconnect delay, in milliseconds
    #[arg(long, default_value = "1000")]
    backoff_floor_ms: u64,

    /// Largest reconnect delay before jitter, in milliseconds
    #[arg(long, default_value = "30000")]
    backoff_ceiling_ms: u64,

    /// Upper bound of the random jitter added to each delay, in milliseconds
    #[arg(long, default_value = "500")]
    jitter_ms: u64,

    /// Largest accepted frame, in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    max_frame_size: usize,

    /// Connect handshake timeout, in milliseconds
    #[arg(long, default_value = "10000")]
    connect_timeout_ms: u64,

    /// Close handshake timeout, in milliseconds
    #[arg(long, default_value = "5000")]
    close_timeout_ms: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_file.as_deref());
    let _ = rustls::crypto::ring::default_provider().install_default();

    match cli.command {
        Command::Relay(args) => run_relay(args).await,
        Command::Agent(args) => run_agent(args).await,
    }
}

fn init_tracing(verbose: bool, log_file: Option<&str>) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let Some(log_file_arg) = log_file else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return;
    };

    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    let log_path = if log_file_arg == "DEFAULT" {
        PathBuf::from(&home).join(".tether/logs/tether.log")
    } else {
        PathBuf::from(log_file_arg)
    };

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file {}: {e}", log_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();

    eprintln!("Logging to {}", log_path.display());
}

async fn run_relay(args: RelayArgs) {
    let config = RelayConfig {
        hostname: args.hostname,
        port: args.port,
        max_frame_size: args.max_frame_size,
        max_connections: args.max_connections,
        send_buffer: args.send_buffer,
        ..RelayConfig::default()
    };

    let mut relay = match RelayServer::start(config.clone()).await {
        Ok(relay) => relay,
        Err(e) => {
            error!("Failed to start relay: {e}");
            std::process::exit(1);
        }
    };

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                        Tether Relay                          ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("  Listening:  ws://{}:{}/", config.hostname, relay.port());
    println!("  Health:     http://{}:{}/health", config.hostname, relay.port());
    match config.max_connections {
        Some(max) => println!("  Peers:      up to {max}"),
        None => println!("  Peers:      unbounded"),
    }
    println!("  Send queue: {} frames per peer", config.send_buffer);
    println!();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutting down...");
    relay.stop().await;
}

async fn run_agent(args: AgentArgs) {
    let transport = WsConfig {
        max_frame_size: args.max_frame_size,
        connect_timeout: Duration::from_millis(args.connect_timeout_ms),
        close_timeout: Duration::from_millis(args.close_timeout_ms),
    };
    let config = AgentConfig {
        url: args.url,
        device_id: args.device_id,
        heartbeat_interval: Duration::from_secs(args.heartbeat_secs),
        backoff_floor: Duration::from_millis(args.backoff_floor_ms),
        backoff_ceiling: Duration::from_millis(args.backoff_ceiling_ms),
        jitter: Duration::from_millis(args.jitter_ms),
    };

    let router = ActionRouter::with_defaults();
    info!("Agent actions: {}", router.actions().join(", "));

    let supervisor = Supervisor::new(WsConnector::new(transport), router, config);
    tokio::select! {
        _ = supervisor.run() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {e}");
            }
            info!("Shutting down...");
        }
    }
}
