//! One-shot hand-over of the destination from the front door to the gateway.
//!
//! The front door sends `"host:port"` as a single token right after opening
//! the tunnel; the gateway reads exactly one token, bounded to
//! [`DESTINATION_READ_LIMIT`] bytes, before any relaying starts.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::crypto::Fernet;
use crate::endpoint::Endpoint;
use crate::frame::{self, Framing};
use crate::{Error, Result};

pub const DESTINATION_READ_LIMIT: usize = 1024;

pub fn encode_destination(cipher: &Fernet, target: &Endpoint) -> Result<Vec<u8>> {
    cipher.encrypt(target.to_string().as_bytes())
}

pub fn decode_destination(cipher: &Fernet, token: &[u8]) -> Result<Endpoint> {
    let plain = cipher.decrypt(token)?;
    let text = String::from_utf8(plain).map_err(|_| Error::protocol("destination is not utf8"))?;
    text.parse()
}

pub async fn send_destination<W>(
    writer: &mut W,
    cipher: &Fernet,
    target: &Endpoint,
    framing: Framing,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let token = encode_destination(cipher, target)?;
    frame::write_token(writer, &token, framing).await
}

pub async fn recv_destination<R>(reader: &mut R, cipher: &Fernet, framing: Framing) -> Result<Endpoint>
where
    R: AsyncRead + Unpin,
{
    let token = frame::read_token(reader, framing, DESTINATION_READ_LIMIT)
        .await?
        .ok_or_else(|| Error::unexpected_eof("destination"))?;
    decode_destination(cipher, &token)
}
