use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dhcpeterd::persist::LeaseStore;
use dhcpeterd::{server, Config};

#[derive(Parser)]
#[command(name = "dhcpeterd")]
#[command(author, version, about = "A DHCPv4 server daemon for directly attached networks", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "dhcpeterd.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::load(&cli.config).await {
        Ok(config) => config,
        Err(err) => {
            error!("load config {}: {}", cli.config.display(), err);
            return ExitCode::FAILURE;
        }
    };

    let lease_path = if config.lease_file.is_empty() {
        None
    } else {
        Some(PathBuf::from(&config.lease_file))
    };
    let (store, updates) = LeaseStore::open(lease_path).await;

    for network in config.networks {
        let restored = store.restored(&network.interface);
        let updates = updates.clone();
        tokio::spawn(async move {
            let interface = network.interface.clone();
            if let Err(err) = server::run(network, restored, updates).await {
                error!("serve {}: {}", interface, err);
                std::process::exit(1);
            }
        });
    }
    drop(updates);

    tokio::spawn(store.run());

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            error!("install SIGTERM handler: {}", err);
            return ExitCode::FAILURE;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, shutting down");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
    }

    ExitCode::SUCCESS
}
