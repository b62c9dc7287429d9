use std::sync::Arc;

use burrow::config::{TunnelArgs, DEFAULT_GATEWAY_ADDR};
use burrow::{server, session};
use clap::Parser;

/// Remote gateway: decrypts the requested destination and relays to it.
#[derive(Parser, Debug)]
#[command(name = "burrow-gateway", version)]
struct Args {
    /// Address the tunnel listener binds to
    #[arg(short, long, default_value = DEFAULT_GATEWAY_ADDR)]
    listen: String,

    #[command(flatten)]
    tunnel: TunnelArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    args.tunnel.init_logging()?;

    let config = Arc::new(args.tunnel.session_config()?);
    let listener = server::bind(&args.listen).await?;

    server::serve(listener, args.tunnel.max_sessions, shutdown_signal(), move |socket, peer| {
        session::handle_gateway(socket, peer, config.clone())
    })
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
    tracing::info!("interrupted, shutting down");
}
