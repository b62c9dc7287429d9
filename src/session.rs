//! Lifecycle of one accepted connection, on either end of the tunnel.
//!
//! A session owns both of its sockets. Whatever stage it stops in, both are
//! dropped (closed) before the session handler returns.

use std::net::SocketAddr;
use std::sync::Arc;

use strum_macros::Display;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::SessionConfig;
use crate::endpoint::Endpoint;
use crate::exchange;
use crate::socks5::Socks5;
use crate::tunnel::{timed, BridgeReport, Mode, Tunnel};
use crate::Result;

/// Stages a session moves through, strictly in this order.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Handshaking,
    Exchanging,
    Relaying,
    Closed,
}

pub struct Session {
    peer: SocketAddr,
    state: SessionState,
    config: Arc<SessionConfig>,
}

/// How a session ended.
#[derive(Debug)]
pub struct Outcome {
    /// last stage reached before closing
    pub stage: SessionState,
    pub result: Result<BridgeReport>,
}

impl Session {
    pub fn new(peer: SocketAddr, config: Arc<SessionConfig>) -> Self {
        Self {
            peer,
            state: SessionState::Handshaking,
            config,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn advance(&mut self, next: SessionState) {
        debug_assert!(next > self.state, "session moved from {} to {next}", self.state);
        tracing::trace!("{} -> {next}", self.state);
        self.state = next;
    }

    /// Front door: SOCKS5 handshake, open the tunnel to `gateway`, hand over
    /// the destination, then relay with `front -> gateway` sealed.
    ///
    /// Consumes the session: it runs once and ends closed.
    pub async fn run_client<S>(mut self, mut front: S, gateway: &str) -> Outcome
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.client_stages(&mut front, gateway).await;
        self.finish(result)
    }

    /// Gateway: receive the destination, connect onward, then relay with
    /// `tunnel -> destination` opened.
    pub async fn run_gateway<S>(mut self, mut tunnel: S) -> Outcome
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = self.gateway_stages(&mut tunnel).await;
        self.finish(result)
    }

    async fn client_stages<S>(&mut self, front: &mut S, gateway: &str) -> Result<BridgeReport>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let idle = self.config.idle_timeout;

        let target = timed(idle, Socks5::new(front).handshake()).await?;
        tracing::info!("{} requested {target}", self.peer);

        let mut upstream = timed(idle, TcpStream::connect(gateway)).await?;
        self.advance(SessionState::Exchanging);
        timed(
            idle,
            exchange::send_destination(&mut upstream, &self.config.cipher, &target, self.config.framing),
        )
        .await?;

        self.advance(SessionState::Relaying);
        Ok(Tunnel::new(&self.config)
            .bridge(front, &mut upstream, Mode::Seal)
            .await)
    }

    async fn gateway_stages<S>(&mut self, tunnel: &mut S) -> Result<BridgeReport>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let idle = self.config.idle_timeout;
        self.advance(SessionState::Exchanging);

        let target: Endpoint = timed(
            idle,
            exchange::recv_destination(tunnel, &self.config.cipher, self.config.framing),
        )
        .await?;
        tracing::info!("{} tunnels to {target}", self.peer);

        let mut destination = timed(idle, TcpStream::connect((target.host(), target.port()))).await?;
        tracing::debug!("connected to {target}");

        self.advance(SessionState::Relaying);
        Ok(Tunnel::new(&self.config)
            .bridge(tunnel, &mut destination, Mode::Open)
            .await)
    }

    fn finish(mut self, result: Result<BridgeReport>) -> Outcome {
        match &result {
            Ok(report) => tracing::info!(
                "{} closed: sent {} bytes ({}), received {} bytes ({})",
                self.peer,
                report.outbound.bytes,
                report.outbound.exit,
                report.inbound.bytes,
                report.inbound.exit,
            ),
            Err(e) => tracing::debug!("{} aborted while {}: {e}", self.peer, self.state),
        }
        let stage = self.state;
        self.advance(SessionState::Closed);
        Outcome { stage, result }
    }
}

/// Accept-loop handler for the front door.
pub async fn handle_client(socket: TcpStream, peer: SocketAddr, config: Arc<SessionConfig>, gateway: Arc<str>) {
    Session::new(peer, config).run_client(socket, &gateway).await;
}

/// Accept-loop handler for the gateway.
pub async fn handle_gateway(socket: TcpStream, peer: SocketAddr, config: Arc<SessionConfig>) {
    Session::new(peer, config).run_gateway(socket).await;
}
