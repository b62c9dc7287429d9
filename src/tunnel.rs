use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use strum_macros::Display;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::frame::{self, Framing, MAX_FRAME_LEN};
use crate::{Error, Result};

const BUF_SIZE: usize = 4096;

/// Single-read bound for implicit framing. A sealed 4096-byte chunk is
/// roughly 5.6 KiB of token text.
const IMPLICIT_READ_LIMIT: usize = 8192;

/// Pump direction
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// read plaintext, write framed tokens
    Seal,
    /// read framed tokens, write plaintext
    Open,
}

fn reverse(mode: Mode) -> Mode {
    match mode {
        Mode::Seal => Mode::Open,
        Mode::Open => Mode::Seal,
    }
}

/// Why a pump stopped.
#[derive(Debug)]
pub enum PumpExit {
    /// source reached end of stream; destination was half-closed
    Eof,
    /// the sibling pump failed first
    Cancelled,
    Failed(Error),
}

impl fmt::Display for PumpExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PumpExit::Eof => write!(f, "eof"),
            PumpExit::Cancelled => write!(f, "cancelled"),
            PumpExit::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

#[derive(Debug)]
pub struct PumpReport {
    pub exit: PumpExit,
    /// plaintext bytes relayed
    pub bytes: u64,
}

/// Both directions of one session, reported once both have stopped.
#[derive(Debug)]
pub struct BridgeReport {
    /// near side to far side
    pub outbound: PumpReport,
    /// far side to near side
    pub inbound: PumpReport,
}

/// When a session last moved bytes, in either direction.
///
/// Both pumps of a session share one `Activity`, so a direction that is quiet
/// stays open for as long as its sibling keeps relaying.
#[derive(Debug)]
pub struct Activity {
    origin: Instant,
    /// microseconds after `origin`
    last: AtomicU64,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let micros = u64::try_from(self.origin.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.last.fetch_max(micros, Ordering::Relaxed);
    }

    fn last(&self) -> Instant {
        self.origin + Duration::from_micros(self.last.load(Ordering::Relaxed))
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// Relays one session's two sockets through the token cipher.
pub struct Tunnel<'a> {
    config: &'a SessionConfig,
}

impl<'a> Tunnel<'a> {
    pub fn new(config: &'a SessionConfig) -> Self {
        Self { config }
    }

    /// Run both pumps of a session and wait for both of them.
    ///
    /// `mode` applies to the `near -> far` direction; the other direction runs
    /// the reverse transform. A failing pump cancels its sibling; a pump that
    /// reaches end of stream only half-closes its destination. The inactivity
    /// timeout covers the session as a whole: it fires once neither direction
    /// has moved bytes for `idle_timeout`.
    pub async fn bridge<A, B>(&self, near: &mut A, far: &mut B, mode: Mode) -> BridgeReport
    where
        A: AsyncRead + AsyncWrite + Unpin,
        B: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut near_read, mut near_write) = io::split(near);
        let (mut far_read, mut far_write) = io::split(far);
        let cancel = CancellationToken::new();
        let activity = Activity::new();

        let near_to_far = self.pump(&mut near_read, &mut far_write, mode, &cancel, &activity);
        let far_to_near = self.pump(&mut far_read, &mut near_write, reverse(mode), &cancel, &activity);

        let (outbound, inbound) = tokio::join!(near_to_far, far_to_near);
        BridgeReport { outbound, inbound }
    }

    /// Relay `src` into `dest` until end of stream, failure or cancellation.
    pub async fn pump<R, W>(
        &self,
        src: &mut R,
        dest: &mut W,
        mode: Mode,
        cancel: &CancellationToken,
        activity: &Activity,
    ) -> PumpReport
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut bytes = 0;
        let exit = tokio::select! {
            _ = cancel.cancelled() => PumpExit::Cancelled,
            res = self.pipe(src, dest, mode, activity, &mut bytes) => match res {
                Ok(()) => PumpExit::Eof,
                Err(e) => PumpExit::Failed(e),
            },
        };

        if let PumpExit::Failed(e) = &exit {
            tracing::trace!("{mode} pump failed, cancelling sibling: {e}");
            cancel.cancel();
        }
        PumpReport { exit, bytes }
    }

    async fn pipe<R, W>(
        &self,
        src: &mut R,
        dest: &mut W,
        mode: Mode,
        activity: &Activity,
        bytes: &mut u64,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let framing = self.config.framing;
        let cipher = &self.config.cipher;
        let mut buf = [0; BUF_SIZE];

        loop {
            match mode {
                Mode::Seal => {
                    let len = self.watched(activity, src.read(&mut buf)).await?;
                    if len == 0 {
                        break;
                    }
                    activity.touch();
                    let token = cipher.encrypt(&buf[..len])?;
                    self.watched(activity, frame::write_token(dest, &token, framing)).await?;
                    activity.touch();
                    *bytes += len as u64;
                }
                Mode::Open => {
                    let limit = match framing {
                        Framing::LengthPrefixed => MAX_FRAME_LEN,
                        Framing::Implicit => IMPLICIT_READ_LIMIT,
                    };
                    let next = frame::read_token(src, framing, limit);
                    let Some(token) = self.watched(activity, next).await? else {
                        break;
                    };
                    activity.touch();
                    let plain = cipher.decrypt(&token)?;
                    self.watched(activity, dest.write_all(&plain)).await?;
                    activity.touch();
                    *bytes += plain.len() as u64;
                }
            }
        }

        self.watched(activity, dest.shutdown()).await?;
        Ok(())
    }

    /// Drive one socket operation until it completes or the whole session has
    /// been idle for the inactivity timeout.
    ///
    /// `fut` is polled in place across deadline checks and never restarted, so
    /// a partly read frame is not lost when the sibling pump extends the
    /// deadline.
    async fn watched<F, T, E>(&self, activity: &Activity, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<Error>,
    {
        let idle = self.config.idle_timeout;
        tokio::pin!(fut);
        loop {
            tokio::select! {
                res = &mut fut => return res.map_err(Into::into),
                _ = tokio::time::sleep_until(activity.last() + idle) => {
                    if activity.last() + idle <= Instant::now() {
                        return Err(Error::timeout(idle));
                    }
                }
            }
        }
    }
}

/// Bound one socket operation by the inactivity timeout.
pub(crate) async fn timed<F, T, E>(idle: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<Error>,
{
    match tokio::time::timeout(idle, fut).await {
        Ok(res) => res.map_err(Into::into),
        Err(_) => Err(Error::timeout(idle)),
    }
}
