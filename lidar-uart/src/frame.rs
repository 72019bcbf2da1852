//! Ranging UART frame format
//!
//! ```text
//! 0x59 0x59 | dist_lo dist_hi | strength_lo strength_hi | temp_lo temp_hi | checksum
//! ```
//! The checksum is the low byte of the sum of the first eight bytes.

use thiserror::Error;

/// Frame header byte, sent twice
pub const HEADER: u8 = 0x59;
/// Full frame length including header and checksum
pub const FRAME_LEN: usize = 9;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Checksum { expected: u8, actual: u8 },
}

/// One decoded measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LidarFrame {
    pub distance_cm: u16,
    pub strength: u16,
    pub temperature_c: f32,
}

impl LidarFrame {
    /// Decode a complete frame whose header has already been matched
    pub fn parse(frame: &[u8; FRAME_LEN]) -> Result<Self, FrameError> {
        let expected = checksum(&frame[..FRAME_LEN - 1]);
        let actual = frame[FRAME_LEN - 1];
        if expected != actual {
            return Err(FrameError::Checksum { expected, actual });
        }

        let raw_temp = u16::from_le_bytes([frame[6], frame[7]]);
        Ok(Self {
            distance_cm: u16::from_le_bytes([frame[2], frame[3]]),
            strength: u16::from_le_bytes([frame[4], frame[5]]),
            temperature_c: f32::from(raw_temp) / 8.0 - 256.0,
        })
    }

    /// Weak returns make the distance meaningless
    pub fn is_reliable(&self) -> bool {
        self.strength >= 100 && self.strength != u16::MAX
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// Byte-at-a-time parser that resynchronises on the double header
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(FRAME_LEN),
        }
    }

    /// Feed one byte; yields a result whenever a full frame has been seen
    pub fn push(&mut self, byte: u8) -> Option<Result<LidarFrame, FrameError>> {
        if self.buf.len() < 2 && byte != HEADER {
            self.buf.clear();
            return None;
        }

        self.buf.push(byte);
        if self.buf.len() < FRAME_LEN {
            return None;
        }

        let mut frame = [0u8; FRAME_LEN];
        frame.copy_from_slice(&self.buf);
        self.buf.clear();
        Some(LidarFrame::parse(&frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(distance: u16, strength: u16, raw_temp: u16) -> [u8; FRAME_LEN] {
        let d = distance.to_le_bytes();
        let s = strength.to_le_bytes();
        let t = raw_temp.to_le_bytes();
        let mut f = [HEADER, HEADER, d[0], d[1], s[0], s[1], t[0], t[1], 0];
        f[8] = checksum(&f[..8]);
        f
    }

    #[test]
    fn test_parse_frame() {
        // 2248 / 8 - 256 = 25 C
        let parsed = LidarFrame::parse(&frame(312, 1500, 2248)).unwrap();
        assert_eq!(parsed.distance_cm, 312);
        assert_eq!(parsed.strength, 1500);
        assert_eq!(parsed.temperature_c, 25.0);
        assert!(parsed.is_reliable());
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bad = frame(312, 1500, 2248);
        bad[2] ^= 0xFF;
        assert!(matches!(
            LidarFrame::parse(&bad),
            Err(FrameError::Checksum { .. })
        ));
    }

    #[test]
    fn test_parser_resyncs_after_garbage() {
        let mut parser = FrameParser::new();
        let mut stream = vec![0x00, 0x59, 0x13, 0xFF];
        stream.extend_from_slice(&frame(54, 800, 2248));
        stream.extend_from_slice(&frame(55, 800, 2248));

        let frames: Vec<_> = stream
            .into_iter()
            .filter_map(|b| parser.push(b))
            .collect::<Result<_, _>>()
            .unwrap();
        let distances: Vec<u16> = frames.iter().map(|f: &LidarFrame| f.distance_cm).collect();
        assert_eq!(distances, vec![54, 55]);
    }

    #[test]
    fn test_weak_signal_unreliable() {
        let parsed = LidarFrame::parse(&frame(312, 20, 2248)).unwrap();
        assert!(!parsed.is_reliable());
    }
}
