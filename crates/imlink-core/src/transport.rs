//! Framed message I/O over any tokio byte stream.
//!
//! The connection itself (TCP, TLS, in-memory duplex) is supplied by the
//! caller; these halves only add framing and CBOR encoding on top.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{frame_encode, FrameDecoder};
use crate::error::{ImError, ImResult};
use crate::messages::TransferMessage;

const READ_CHUNK: usize = 8 * 1024;

/// Read half: yields decoded [`TransferMessage`]s in arrival order.
pub struct FrameReader<R> {
    inner: R,
    decoder: FrameDecoder,
    chunk: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame_len: usize) -> Self {
        Self {
            inner,
            decoder: FrameDecoder::new(max_frame_len),
            chunk: vec![0u8; READ_CHUNK],
        }
    }

    /// Next message, or `None` on clean EOF.
    ///
    /// Cancel safe: the only suspension point is a single `read`, and bytes
    /// are buffered in the decoder before any message is surfaced.
    pub async fn recv(&mut self) -> ImResult<Option<TransferMessage>> {
        loop {
            if let Some(msg) = self.decoder.next_message()? {
                return Ok(Some(msg));
            }
            let n = self.inner.read(&mut self.chunk).await?;
            if n == 0 {
                if self.decoder.pending() > 0 {
                    return Err(ImError::Transport(format!(
                        "connection closed with {} bytes of partial frame",
                        self.decoder.pending()
                    )));
                }
                return Ok(None);
            }
            self.decoder.extend(&self.chunk[..n]);
        }
    }
}

/// Write half: encodes and flushes one message per call.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn send(&mut self, msg: &TransferMessage) -> ImResult<()> {
        let frame = frame_encode(msg)?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> ImResult<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
