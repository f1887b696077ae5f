//! Length-prefixed JSON framing.
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes of
//! UTF-8 JSON (one [`Envelope`]). Within a connection, request and response
//! are ordered; there is no interleaving.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, WireError};
use crate::message::Envelope;

/// Upper bound on a single frame. A peer announcing more than this is
/// treated as malformed rather than allocated for.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Encode and send one envelope.
pub async fn write_frame<W>(writer: &mut W, envelope: &Envelope) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(envelope)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(body.len()));
    }
    let mut frame = BytesMut::with_capacity(4 + body.len());
    frame.put_u32(body.len() as u32);
    frame.put_slice(&body);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and decode one envelope. A connection closed cleanly before the
/// length prefix yields [`WireError::ConnectionClosed`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Envelope>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    read_exact_or_closed(reader, &mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    read_exact_or_closed(reader, &mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

async fn read_exact_or_closed<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(WireError::ConnectionClosed)
        }
        Err(err) => Err(err.into()),
    }
}
