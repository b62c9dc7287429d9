//! Encrypted SOCKS5 tunnel.
//!
//! A local front door accepts SOCKS5 CONNECT requests, hands the requested
//! destination to a remote gateway as an encrypted token and then relays
//! traffic through the gateway, encrypting every unit that crosses the
//! tunnel.
//!
//! ```text
//! browser --socks5--> client --tokens--> gateway --plain--> destination
//! ```

pub mod config;
pub mod crypto;
pub mod endpoint;
pub mod error;
pub mod exchange;
pub mod frame;
pub mod server;
pub mod session;
pub mod socks5;
pub mod tunnel;

pub use config::SessionConfig;
pub use endpoint::Endpoint;
pub use error::Error;

pub type Result<T> = std::result::Result<T, Error>;
