use bytebuffer::ByteBuffer;
use strum_macros::{Display, EnumString};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Error, Result};

/// Largest token accepted from a length-prefixed frame.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// How token boundaries are carried over the byte stream.
#[derive(Debug, Default, Display, EnumString, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "kebab-case")]
pub enum Framing {
    /// 4-byte big-endian length, then the token
    #[default]
    LengthPrefixed,
    /// one write is one token; the reader takes one bounded read as a token.
    /// Breaks as soon as the transport merges or splits writes.
    Implicit,
}

pub async fn write_token<W>(writer: &mut W, token: &[u8], framing: Framing) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    match framing {
        Framing::LengthPrefixed => {
            let len = u32::try_from(token.len())
                .ok()
                .filter(|len| *len as usize <= MAX_FRAME_LEN)
                .ok_or_else(|| Error::protocol(format!("token of {} bytes", token.len())))?;

            let mut block = ByteBuffer::new();
            block.write_u32(len);
            block.write_bytes(token);
            writer.write_all(block.as_bytes()).await?;
        }
        Framing::Implicit => writer.write_all(token).await?,
    }
    Ok(())
}

/// Read one token. `Ok(None)` means the peer closed the stream between units.
///
/// `limit` bounds the single read of the implicit convention and the declared
/// length of a length-prefixed frame.
pub async fn read_token<R>(reader: &mut R, framing: Framing, limit: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    match framing {
        Framing::LengthPrefixed => {
            let mut header = [0u8; 4];
            let mut filled = 0;
            while filled < header.len() {
                let n = reader.read(&mut header[filled..]).await?;
                if n == 0 {
                    if filled == 0 {
                        return Ok(None);
                    }
                    return Err(Error::unexpected_eof("frame header"));
                }
                filled += n;
            }

            let len = u32::from_be_bytes(header) as usize;
            if len == 0 || len > limit {
                return Err(Error::protocol(format!(
                    "frame length {len} outside 1..={limit}"
                )));
            }

            // read_exact keeps reading across short reads
            let mut token = vec![0; len];
            reader.read_exact(&mut token).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    Error::unexpected_eof("frame body")
                } else {
                    Error::Connection(e)
                }
            })?;
            Ok(Some(token))
        }
        Framing::Implicit => {
            let mut buf = vec![0; limit];
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Ok(None);
            }
            buf.truncate(n);
            Ok(Some(buf))
        }
    }
}
