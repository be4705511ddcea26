//! Generic command contract shared by every appliance type.

use crate::protocol::frame::{Frame, FrameError};
use thiserror::Error;

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DeviceType {
    HeatPump = 0xc3,
}

impl TryFrom<u8> for DeviceType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0xc3 => Ok(DeviceType::HeatPump),
            other => Err(other),
        }
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FrameType {
    Control = 0x02,
    Request = 0x03,
    Report = 0x04,
    Exception = 0x06,
    QuerySubtype = 0xa0,
}

impl TryFrom<u8> for FrameType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x02 => Ok(FrameType::Control),
            0x03 => Ok(FrameType::Request),
            0x04 => Ok(FrameType::Report),
            0x06 => Ok(FrameType::Exception),
            0xa0 => Ok(FrameType::QuerySubtype),
            other => Err(other),
        }
    }
}

/// An outbound message. Implementors only describe the payload; framing is shared.
pub trait Command: Send + Sync {
    fn device_type(&self) -> DeviceType;

    fn frame_type(&self) -> FrameType;

    fn payload(&self) -> Vec<u8>;

    fn to_frame(&self) -> Frame {
        Frame::new(self.device_type() as u8, self.frame_type() as u8, self.payload())
    }

    fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        self.to_frame().encode()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResponseError {
    #[error("empty response payload")]
    Empty,
    #[error("frame is for device type 0x{0:02x}")]
    WrongDeviceType(u8),
    #[error("response 0x{tag:02x} too short: expected at least {expected} bytes, got {actual}")]
    TooShort { tag: u8, expected: usize, actual: usize },
    #[error("invalid {field} value {value}")]
    InvalidValue { field: &'static str, value: u8 },
}

/// An inbound message decoded from a validated frame.
///
/// Implementors map every tag they do not know to an "unknown" value instead
/// of failing, so the session can log and drop it.
pub trait DeviceResponse: Sized + Send {
    fn decode(frame: &Frame) -> Result<Self, ResponseError>;

    fn is_known(&self) -> bool;
}
