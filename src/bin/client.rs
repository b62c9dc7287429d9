use std::sync::Arc;

use burrow::config::{TunnelArgs, DEFAULT_CLIENT_LISTEN, DEFAULT_GATEWAY_ADDR};
use burrow::{server, session};
use clap::Parser;

/// Local SOCKS5 front door: tunnels every CONNECT through the gateway.
#[derive(Parser, Debug)]
#[command(name = "burrow-client", version)]
struct Args {
    /// Address the SOCKS5 listener binds to
    #[arg(short, long, default_value = DEFAULT_CLIENT_LISTEN)]
    listen: String,

    /// Address of the remote gateway
    #[arg(short, long, default_value = DEFAULT_GATEWAY_ADDR)]
    gateway: String,

    #[command(flatten)]
    tunnel: TunnelArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    args.tunnel.init_logging()?;

    let config = Arc::new(args.tunnel.session_config()?);
    let gateway: Arc<str> = args.gateway.into();
    let listener = server::bind(&args.listen).await?;

    tracing::info!("gateway is at {gateway}");

    server::serve(listener, args.tunnel.max_sessions, shutdown_signal(), move |socket, peer| {
        session::handle_client(socket, peer, config.clone(), gateway.clone())
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
