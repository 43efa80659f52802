use clap::Parser;
use log::{error, info};
use master::{MasterConfig, MasterServer};
use shared::EventBus;

/// Fleet master: accepts node connections and broadcasts the network state
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,
    /// Port to listen on
    #[clap(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,
    /// Accepted secret key (repeat for several)
    #[clap(short, long = "secret", required = true)]
    secrets: Vec<String>,
    /// Network state broadcast interval in milliseconds
    #[clap(long, default_value_t = shared::BROADCAST_INTERVAL_MS)]
    broadcast_interval_ms: u64,
    /// Silence after which a node is considered dead, in milliseconds
    #[clap(long, default_value_t = shared::HEARTBEAT_TIMEOUT_MS)]
    heartbeat_timeout_ms: u64,
    /// Token bucket capacity per connection
    #[clap(long, default_value_t = shared::RATE_LIMIT_BURST)]
    rate_limit_burst: u32,
    /// Tokens refilled per second per connection
    #[clap(long, default_value_t = shared::RATE_LIMIT_PER_SECOND)]
    rate_limit_per_second: u32,
    /// Disable Snappy compression of outgoing frames
    #[clap(long)]
    no_compression: bool,
}

impl Args {
    fn into_config(self) -> MasterConfig {
        MasterConfig {
            host: self.host,
            port: self.port,
            secret_keys: self.secrets,
            broadcast_interval_ms: self.broadcast_interval_ms,
            heartbeat_timeout_ms: self.heartbeat_timeout_ms,
            rate_limit_burst: self.rate_limit_burst,
            rate_limit_refill_per_second: self.rate_limit_per_second,
            compression_enabled: !self.no_compression,
            ..MasterConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();
    let server = MasterServer::bind(config, EventBus::new()).await?;
    let handle = server.handle();
    let mut server_task = tokio::spawn(server.run());

    tokio::select! {
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => info!("Master exited"),
                Ok(Err(e)) => error!("Master failed: {}", e),
                Err(e) => error!("Master task panicked: {}", e),
            }
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    handle.shutdown();
    server_task.await??;
    Ok(())
}
