//! Length-prefixed JSON frames over a byte stream.
//!
//! `u32 BE length || JSON bytes` — the framing shared by the stream hello
//! and the RPC runtime.  Clean EOF before a frame starts is distinguished
//! from a mid-frame truncation so serve loops can tell "peer finished" from
//! "peer died".

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use fsec_wire::frame::{JSON_FRAME_HEADER_LEN, encode_json_frame};

#[derive(Debug, Error)]
pub enum JsonIoError {
    /// Clean end-of-stream before any byte of the next frame.
    #[error("end of stream")]
    Eof,
    #[error("frame length {len} exceeds limit {max}")]
    Oversized { len: usize, max: usize },
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub async fn read_json_frame<R, T>(reader: &mut R, max_bytes: usize) -> Result<T, JsonIoError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; JSON_FRAME_HEADER_LEN];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            return if filled == 0 {
                Err(JsonIoError::Eof)
            } else {
                Err(JsonIoError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream ended inside a frame header",
                )))
            };
        }
        filled += n;
    }
    let len = u32::from_be_bytes(header) as usize;
    if len > max_bytes {
        return Err(JsonIoError::Oversized { len, max: max_bytes });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

pub async fn write_json_frame<W, T>(writer: &mut W, value: &T) -> Result<(), JsonIoError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(value)?;
    let frame = encode_json_frame(&body);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
