//! Accept loop shared by the front door and the gateway.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::{Error, Result};

/// Pause after a failed accept, so a full file table does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::resource(format!("cannot listen on {addr}: {e}")))
}

/// Accept connections and run `handler` for each one on its own task until
/// `shutdown` resolves.
///
/// Shutdown only stops accepting: the listener is closed, then `serve` waits
/// for the sessions already running to finish on their own before it returns.
/// With `max_sessions` set, accepting waits while that many sessions are
/// alive.
pub async fn serve<H, F, S>(
    listener: TcpListener,
    max_sessions: Option<usize>,
    shutdown: S,
    mut handler: H,
) -> Result<()>
where
    H: FnMut(TcpStream, SocketAddr) -> F,
    F: Future<Output = ()> + Send + 'static,
    S: Future<Output = ()>,
{
    let limit = max_sessions.map(|n| Arc::new(Semaphore::new(n)));
    let sessions = TaskTracker::new();
    tokio::pin!(shutdown);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!("listening on {addr}");
    }

    loop {
        let permit = match &limit {
            Some(slots) => tokio::select! {
                _ = &mut shutdown => break,
                permit = slots.clone().acquire_owned() => {
                    Some(permit.map_err(|_| Error::resource("session limit closed"))?)
                }
            },
            None => None,
        };

        let (socket, peer) = tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("accept failed: {e}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
        };
        tracing::debug!("accepted {peer}");

        let session = handler(socket, peer);
        sessions.spawn(
            async move {
                session.await;
                drop(permit);
            }
            .instrument(tracing::info_span!("session", %peer)),
        );
    }

    drop(listener);
    sessions.close();
    tracing::info!("stopped accepting connections, {} sessions still open", sessions.len());
    sessions.wait().await;
    tracing::info!("all sessions closed");
    Ok(())
}
