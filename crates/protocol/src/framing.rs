//! Length-prefixed framing for decision delivery: 4-byte big-endian length,
//! then that many bytes of UTF-8 JSON.

use {
    thiserror::Error,
    tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
};

use crate::MAX_FRAME_BYTES;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("frame of {0} bytes exceeds limit")]
    TooLarge(u32),

    #[error("peer closed before a complete frame arrived")]
    Truncated,
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// Prefix `payload` with its big-endian length.
#[must_use]
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    framed.extend_from_slice(payload);
    framed
}

/// Write one frame to `writer`.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    writer.write_all(&encode(payload)).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame from `reader`. EOF mid-frame maps to [`FrameError::Truncated`].
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(map_eof)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(FrameError::TooLarge(len));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await.map_err(map_eof)?;
    Ok(payload)
}

fn map_eof(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::Truncated
    } else {
        FrameError::Io(e)
    }
}
