use anyhow::Result;
use sameport::{App, ServerConfig, serve};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_env()?;

    // RUST_LOG takes precedence over SAMEPORT_LOG.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let app = App::from_config(&config)?;
    let listener = TcpListener::bind(config.addr).await?;
    info!(
        addr = %config.addr,
        "RPC, JSON gateway and static files share this port"
    );

    serve(listener, app.handler(), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    })
    .await?;

    let cancelled = app.rpc.cancel_all();
    info!(cancelled, "Server stopped");
    Ok(())
}
