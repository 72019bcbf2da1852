//! Newline-delimited JSON codec for the reading stream
//!
//! Every reading is framed as exactly one line:
//! ```text
//! {"heart_rate":72.0,"distance_cm":54,"accel":[..],"gyro":[..],"image":""}\n
//! ```
//!
//! The peer splits the byte stream on `\n`; JSON never contains a raw newline,
//! so the delimiter is unambiguous.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::Reading;

/// Maximum frame size (1 MB) including the delimiter
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Byte terminating every frame
pub const FRAME_DELIMITER: u8 = b'\n';

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes (max: {MAX_FRAME_SIZE})")]
    FrameTooLarge(usize),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a Reading into a newline-terminated frame
pub fn encode(reading: &Reading) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::with_capacity(128 + reading.image.len() * 4 / 3);
    encode_into(reading, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a Reading directly into a provided buffer
pub fn encode_into(reading: &Reading, buf: &mut BytesMut) -> Result<(), CodecError> {
    let json = serde_json::to_vec(reading)?;
    let frame_len = json.len() + 1;

    if frame_len > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge(frame_len));
    }

    buf.reserve(frame_len);
    buf.put_slice(&json);
    buf.put_u8(FRAME_DELIMITER);

    Ok(())
}

/// Try to decode one frame from the front of a buffer
///
/// Returns:
/// - `Ok(Some(reading))` if a complete frame was decoded
/// - `Ok(None)` if more data is needed
/// - `Err(...)` if the frame is invalid (the bad line is consumed)
pub fn decode(buf: &mut BytesMut) -> Result<Option<Reading>, CodecError> {
    loop {
        let Some(pos) = buf.iter().position(|&b| b == FRAME_DELIMITER) else {
            if buf.len() > MAX_FRAME_SIZE {
                return Err(CodecError::FrameTooLarge(buf.len()));
            }
            return Ok(None);
        };

        let line = buf.split_to(pos + 1);
        let body = &line[..pos];
        let body = body.strip_suffix(b"\r").unwrap_or(body);

        // Blank keep-alive lines carry nothing
        if body.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        return Ok(Some(serde_json::from_slice(body)?));
    }
}

/// Decoder state for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Partial line data being accumulated
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete frames
    pub fn decode_next(&mut self) -> Result<Option<Reading>, CodecError> {
        let result = decode(&mut self.buffer);
        if let Err(CodecError::FrameTooLarge(_)) = result {
            // An unterminated oversized line can never become valid
            self.buffer.clear();
        }
        result
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}
