use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Destination requested by the local application.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> crate::Result<Self> {
        let host = host.into();
        if host.is_empty() {
            return Err(Error::protocol("empty destination host"));
        }
        if host.contains(':') {
            return Err(Error::protocol(format!("host {host:?} contains ':'")));
        }
        if port == 0 {
            return Err(Error::protocol("destination port 0"));
        }
        Ok(Self { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// `host:port`, the text carried by the destination exchange.
impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let (host, port) = s
            .split_once(':')
            .ok_or_else(|| Error::protocol(format!("destination {s:?} has no port")))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::protocol(format!("destination {s:?} has an invalid port")))?;
        Endpoint::new(host, port)
    }
}
