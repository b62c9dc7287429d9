use std::sync::Arc;
use std::time::Duration;

use clap::Args;

use crate::crypto::{Fernet, DEFAULT_TTL};
use crate::frame::Framing;
use crate::{Error, Result};

pub const DEFAULT_CLIENT_LISTEN: &str = "127.0.0.1:1080";
pub const DEFAULT_GATEWAY_ADDR: &str = "127.0.0.1:65435";
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings shared read-only by every session of a process.
///
/// Built once at start-up; sessions hold an `Arc` to it and never mutate it.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cipher: Arc<Fernet>,
    /// Connect and setup bound; while relaying, how long a session may go
    /// without moving bytes in either direction
    pub idle_timeout: Duration,
    pub framing: Framing,
}

impl SessionConfig {
    pub fn new(cipher: Fernet) -> Self {
        Self {
            cipher: Arc::new(cipher),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            framing: Framing::default(),
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }
}

/// Command-line options common to both ends of the tunnel.
#[derive(Args, Debug)]
pub struct TunnelArgs {
    /// Pre-shared key, url-safe base64 of 32 bytes (see burrow-keygen)
    #[arg(long, env = "BURROW_KEY", hide_env_values = true)]
    pub key: String,

    /// Inactivity timeout in seconds for every socket of a session
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT.as_secs())]
    pub timeout: u64,

    /// Maximum token age in seconds, 0 accepts tokens of any age
    #[arg(long, default_value_t = DEFAULT_TTL.as_secs())]
    pub token_ttl: u64,

    /// Token framing on the tunnel: length-prefixed or implicit
    #[arg(long, default_value_t = Framing::LengthPrefixed)]
    pub framing: Framing,

    /// Maximum concurrent sessions, unbounded when omitted
    #[arg(long)]
    pub max_sessions: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'v', long, default_value = "info")]
    pub log_level: String,
}

impl TunnelArgs {
    pub fn session_config(&self) -> Result<SessionConfig> {
        if self.timeout == 0 {
            return Err(Error::config("timeout must be at least one second"));
        }
        let ttl = (self.token_ttl > 0).then(|| Duration::from_secs(self.token_ttl));
        let cipher = Fernet::new(&self.key)?.with_ttl(ttl);

        Ok(SessionConfig::new(cipher)
            .with_idle_timeout(Duration::from_secs(self.timeout))
            .with_framing(self.framing))
    }

    pub fn init_logging(&self) -> Result<()> {
        let level: tracing::Level = self
            .log_level
            .parse()
            .map_err(|_| Error::config(format!("unknown log level {:?}", self.log_level)))?;
        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .init();
        Ok(())
    }
}
