use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use internals::BrokerClient;
use queues::InMemoryBroker;
use relay::{AmqpBroker, Relay, Settings};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

mod http_front;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON settings file; `RELAY_*` variables override its values.
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "RELAY_HTTP_ADDR", default_value = "127.0.0.1:8080")]
    http_addr: SocketAddr,

    /// Directory for the daily-rolling log file.
    #[arg(long, env = "RELAY_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let _log_guard = utils::init_logging(args.log_dir.as_deref())?;

    let settings = Settings::load(args.config.as_deref()).map_err(|e| {
        error!(error=%e, "invalid configuration");
        e
    })?;

    let broker: Arc<dyn BrokerClient> = match settings.broker.uri.as_deref() {
        Some(uri) => Arc::new(AmqpBroker::connect(uri).await?),
        None => {
            warn!("no broker uri configured, using the in-process broker");
            Arc::new(InMemoryBroker::new())
        }
    };

    let relay = Relay::start(&settings, broker).await?;

    let listener = TcpListener::bind(args.http_addr).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let http = tokio::spawn(http_front::serve(listener, relay.publisher(), shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown_tx.send_replace(true);

    match http.await {
        Ok(Err(e)) => error!(error=%e, "HTTP front end failed"),
        Err(e) => error!(error=%e, "HTTP front end task failed"),
        Ok(Ok(())) => {}
    }
    relay.shutdown().await?;

    Ok(())
}
