//! Server side of the SOCKS5 subset spoken by the front door: version 5,
//! NO-AUTH, CONNECT, IPv4 and domain-name addresses.

use std::net::Ipv4Addr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::endpoint::Endpoint;
use crate::{Error, Result};

const VERSION: u8 = 0x05;
const NO_AUTH: u8 = 0x00;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;

/// Method selection reply: version 5, no authentication.
pub const AUTH_REPLY: [u8; 2] = [VERSION, NO_AUTH];

/// CONNECT success reply. The bound address and port are always zero; the
/// real local address of the tunnel is never reported.
pub const SUCCESS_REPLY: [u8; 10] = [VERSION, 0x00, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0];

/// SOCKS5 handshake over a freshly accepted connection.
pub struct Socks5<'a, S> {
    down_stream: &'a mut S,
}

impl<'a, S> Socks5<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(down_stream: &'a mut S) -> Self {
        Self { down_stream }
    }

    /// Run the whole handshake and return the requested destination.
    ///
    /// On failure nothing but (possibly) the method reply has been written;
    /// no SOCKS5 error reply is ever sent.
    pub async fn handshake(mut self) -> Result<Endpoint> {
        self.read_auth().await?;
        self.resp_auth().await?;

        let target = self.read_target_address().await?;

        self.resp_client_cmd().await?;
        Ok(target)
    }

    async fn read_auth(&mut self) -> Result<()> {
        let version = self.down_stream.read_u8().await?;
        if version != VERSION {
            return Err(Error::protocol(format!("unsupported SOCKS version {version:#04x}")));
        }

        let method_num = self.down_stream.read_u8().await?;
        if method_num > 0 {
            let mut methods = vec![0; method_num as usize];
            self.down_stream.read_exact(&mut methods).await?;
        }
        Ok(())
    }

    async fn resp_auth(&mut self) -> Result<()> {
        self.down_stream.write_all(&AUTH_REPLY).await?;
        Ok(())
    }

    async fn read_target_address(&mut self) -> Result<Endpoint> {
        let mut header = [0u8; 4];
        self.down_stream.read_exact(&mut header).await?;
        let [version, command, _reserved, addr_type] = header;

        if version != VERSION {
            return Err(Error::protocol(format!("unsupported SOCKS version {version:#04x}")));
        }
        if command != CMD_CONNECT {
            return Err(Error::protocol(format!("unsupported command {command:#04x}")));
        }

        let host = match addr_type {
            ATYP_IPV4 => {
                let mut octets = [0u8; 4];
                self.down_stream.read_exact(&mut octets).await?;
                Ipv4Addr::from(octets).to_string()
            }
            ATYP_DOMAIN => {
                let domain_len = self.down_stream.read_u8().await?;
                let mut domain = vec![0; domain_len as usize];
                self.down_stream.read_exact(&mut domain).await?;
                String::from_utf8(domain).map_err(|_| Error::protocol("domain is not utf8"))?
            }
            other => {
                return Err(Error::protocol(format!("unsupported address type {other:#04x}")));
            }
        };

        let port = self.down_stream.read_u16().await?;
        Endpoint::new(host, port)
    }

    async fn resp_client_cmd(&mut self) -> Result<()> {
        self.down_stream.write_all(&SUCCESS_REPLY).await?;
        Ok(())
    }
}
