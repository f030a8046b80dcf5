use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use fakedns::{Config, Dispatcher, Eventloop, Listener, Upstream};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// A DNS proxy that steers resolution outcomes per domain name.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the YAML configuration file.
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();

    let config = Config::load(&cli.config)?;
    let rules = Arc::new(config.rules()?);

    let upstream = Upstream::new(config.dns_server.socket_addr());
    let listener = Listener::bind(config.listening_info.socket_addr())?;

    tracing::info!(
        listen = %listener.local_addr(),
        upstream = %upstream.server(),
        rules = %rules.num_rules(),
        "Proxying DNS queries"
    );

    let mut eventloop = Eventloop::new(listener, Dispatcher::new(rules, upstream));

    tokio::select! {
        result = eventloop.run() => result.map(|_| ()),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received CTRL-C, shutting down");

            Ok(())
        }
    }
}
