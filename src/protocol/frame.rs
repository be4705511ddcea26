//! Generic device frame: a 10-byte header, the payload and a CRC8 trailer.
//!
//! ```text
//! [0]     0xAA start byte
//! [1]     device type
//! [2..4]  payload length, u16 big-endian
//! [4..6]  reserved
//! [6]     frame id
//! [7]     frame protocol version
//! [8]     device protocol version
//! [9]     frame type
//! [10..]  payload
//! [last]  CRC8 over everything before it
//! ```

use crate::protocol::crc8;
use thiserror::Error;

pub const START_BYTE: u8 = 0xaa;
pub const HEADER_LEN: usize = 10;
/// Header plus the checksum byte.
pub const MIN_FRAME_LEN: usize = HEADER_LEN + 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {len} bytes")]
    TooShort { len: usize },
    #[error("invalid start byte 0x{0:02x}")]
    BadStart(u8),
    #[error("declared payload length {declared} does not match actual {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("checksum mismatch: received 0x{received:02x}, calculated 0x{calculated:02x}")]
    Checksum { received: u8, calculated: u8 },
    #[error("payload of {0} bytes does not fit a frame")]
    PayloadTooLong(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub device_type: u8,
    pub frame_type: u8,
    pub protocol_version: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(device_type: u8, frame_type: u8, payload: impl Into<Vec<u8>>) -> Self {
        Frame {
            device_type,
            frame_type,
            protocol_version: 0,
            payload: payload.into(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let len = u16::try_from(self.payload.len()).map_err(|_| FrameError::PayloadTooLong(self.payload.len()))?;
        let len = len.to_be_bytes();

        let mut out = Vec::with_capacity(MIN_FRAME_LEN + self.payload.len());
        out.extend_from_slice(&[
            START_BYTE,
            self.device_type,
            len[0],
            len[1],
            0x00,
            0x00,
            0x00,
            0x00,
            self.protocol_version,
            self.frame_type,
        ]);
        out.extend_from_slice(&self.payload);
        out.push(crc8::calculate(&out));
        Ok(out)
    }

    /// Validate and parse a complete frame. Nothing is returned unless the
    /// start byte, length and checksum all agree.
    pub fn decode(data: &[u8]) -> Result<Frame, FrameError> {
        if data.len() < MIN_FRAME_LEN {
            return Err(FrameError::TooShort { len: data.len() });
        }
        if data[0] != START_BYTE {
            return Err(FrameError::BadStart(data[0]));
        }

        let declared = u16::from_be_bytes([data[2], data[3]]) as usize;
        let actual = data.len() - MIN_FRAME_LEN;
        if declared != actual {
            return Err(FrameError::LengthMismatch { declared, actual });
        }

        let (body, trailer) = data.split_at(data.len() - 1);
        let calculated = crc8::calculate(body);
        if trailer[0] != calculated {
            return Err(FrameError::Checksum {
                received: trailer[0],
                calculated,
            });
        }

        Ok(Frame {
            device_type: data[1],
            frame_type: data[9],
            protocol_version: data[8],
            payload: body[HEADER_LEN..].to_vec(),
        })
    }
}

pub fn encode(device_type: u8, frame_type: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    Frame::new(device_type, frame_type, payload).encode()
}

pub fn decode(data: &[u8]) -> Result<Frame, FrameError> {
    Frame::decode(data)
}
