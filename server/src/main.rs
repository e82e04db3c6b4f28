use clap::Parser;
use env_logger::Env;
use log::{error, info};
use server::config::{ClusterConfig, ClusterIdMode, ServerConfig};
use server::network::Server;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Maximum number of simultaneous connections
    #[clap(short, long, default_value = "256")]
    max_clients: usize,
    /// Outbound frames buffered per connection before new ones are dropped
    #[clap(long, default_value = "256")]
    queue_capacity: usize,
    /// Distance at which unclustered players form a cluster
    #[clap(long, default_value_t = shared::PROX_RADIUS)]
    prox_radius: f64,
    /// Distance beyond which clustered players split off
    #[clap(long, default_value_t = shared::EXIT_RADIUS)]
    exit_radius: f64,
    /// Derive cluster ids from membership and only announce new clusters
    #[clap(long)]
    stable_cluster_ids: bool,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let id_mode = if self.stable_cluster_ids {
            ClusterIdMode::Stable
        } else {
            ClusterIdMode::Sequential
        };

        ServerConfig {
            bind_addr: format!("{}:{}", self.host, self.port),
            max_clients: self.max_clients,
            queue_capacity: self.queue_capacity,
            cluster: ClusterConfig {
                prox_radius: self.prox_radius,
                exit_radius: self.exit_radius,
                id_mode,
            },
        }
    }
}

/// Parses arguments, validates the configuration and serves until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config();
    config.validate()?;
    info!(
        "Starting presence server (prox {}, exit {}, {:?} cluster ids)",
        config.cluster.prox_radius, config.cluster.exit_radius, config.cluster.id_mode
    );

    let server = Server::bind(config).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
