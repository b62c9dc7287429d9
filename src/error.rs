//! Error kinds surfaced to the session boundary.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors produced while setting up or relaying a session.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unsupported SOCKS5 / tunnel protocol fields
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Token failed its integrity check or is outside the freshness window
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Reset, refused, closed by peer or timed out
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),

    /// Socket or session slot could not be allocated
    #[error("resource error: {0}")]
    Resource(String),

    /// Invalid configuration value (bad key, bad address)
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn crypto(msg: impl Into<String>) -> Self {
        Error::Crypto(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Error::Resource(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// An inactivity timeout, reported as a connection error.
    pub fn timeout(after: Duration) -> Self {
        Error::Connection(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("idle for {}ms", after.as_millis()),
        ))
    }

    /// Peer closed the stream before a complete unit arrived.
    pub fn unexpected_eof(what: &str) -> Self {
        Error::Connection(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("stream closed while reading {what}"),
        ))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Connection(e) if e.kind() == io::ErrorKind::TimedOut)
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    pub fn is_crypto(&self) -> bool {
        matches!(self, Error::Crypto(_))
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Error::Connection(_))
    }
}
