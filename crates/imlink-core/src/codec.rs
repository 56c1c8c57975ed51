//! Length-prefixed CBOR framing for the transfer link.
//!
//! Wire format: `[4-byte big-endian length][CBOR payload]`

use crate::error::{ImError, ImResult};
use std::io::Cursor;

/// Default upper bound on a single frame payload (1 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

const HEADER_LEN: usize = 4;

/// Encode a serializable value into a length-prefixed CBOR frame.
pub fn frame_encode<T: serde::Serialize>(value: &T) -> ImResult<Vec<u8>> {
    let mut frame = vec![0u8; HEADER_LEN];
    ciborium::into_writer(value, &mut frame)?;

    let len = u32::try_from(frame.len() - HEADER_LEN)
        .map_err(|_| ImError::Codec("frame payload exceeds u32 length".into()))?;
    frame[..HEADER_LEN].copy_from_slice(&len.to_be_bytes());
    Ok(frame)
}

/// Decode a CBOR payload (without length prefix) into a typed value.
pub fn cbor_decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> ImResult<T> {
    let value: T = ciborium::from_reader(Cursor::new(data))?;
    Ok(value)
}

/// Streaming frame decoder: accumulates bytes and yields one message at a time.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameDecoder {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_len,
        }
    }

    /// Append raw bytes read from the connection.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pop the next complete frame, if one is buffered.
    ///
    /// An oversized length header is fatal: the stream cannot be resynchronized.
    pub fn next_frame(&mut self) -> ImResult<Option<Vec<u8>>> {
        if self.buffer.len() < HEADER_LEN {
            return Ok(None);
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&self.buffer[..HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;

        if len > self.max_frame_len {
            return Err(ImError::Codec(format!(
                "frame of {len} bytes exceeds limit of {}",
                self.max_frame_len
            )));
        }
        if self.buffer.len() < HEADER_LEN + len {
            return Ok(None);
        }

        let payload = self.buffer[HEADER_LEN..HEADER_LEN + len].to_vec();
        self.buffer.drain(..HEADER_LEN + len);
        Ok(Some(payload))
    }

    /// Pop and decode the next complete message, if one is buffered.
    pub fn next_message<T: serde::de::DeserializeOwned>(&mut self) -> ImResult<Option<T>> {
        match self.next_frame()? {
            Some(payload) => cbor_decode(&payload).map(Some),
            None => Ok(None),
        }
    }

    /// Number of bytes still buffered.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
