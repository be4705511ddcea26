//! LAN packet ("5A5A") wrapping every frame exchanged with a device.
//!
//! A 40-byte header, the frame encrypted under the LAN packet key and a
//! 16-byte MD5 trailer. The length field counts the whole packet.

use crate::security::{CryptoError, Security};
use chrono::{Local, NaiveDateTime};
use thiserror::Error;

pub const MAGIC: [u8; 2] = [0x5a, 0x5a];
pub const HEADER_LEN: usize = 40;
pub const TRAILER_LEN: usize = 16;

#[derive(Debug, Error, PartialEq)]
pub enum PacketError {
    #[error("packet too short: {len} bytes")]
    TooShort { len: usize },
    #[error("missing 5A5A magic")]
    BadMagic,
    #[error("declared packet length {declared} exceeds available {available}")]
    Truncated { declared: usize, available: usize },
    #[error("packet checksum mismatch")]
    Checksum,
    #[error("packet crypto: {0}")]
    Crypto(#[from] CryptoError),
    #[error("packet of {0} bytes is too large")]
    TooLarge(usize),
}

/// Eight bytes of decimal digit pairs `YYYYMMDDhhmmssff`, least significant first.
fn packet_time(now: NaiveDateTime) -> [u8; 8] {
    let digits = now.format("%Y%m%d%H%M%S%f").to_string();
    let mut out = [0u8; 8];
    for (i, pair) in digits.as_bytes()[..16].chunks(2).enumerate() {
        out[7 - i] = (pair[0] - b'0') * 10 + (pair[1] - b'0');
    }
    out
}

pub fn build(security: &Security, device_id: u64, frame: &[u8]) -> Result<Vec<u8>, PacketError> {
    build_at(security, device_id, frame, Local::now().naive_local())
}

fn build_at(security: &Security, device_id: u64, frame: &[u8], now: NaiveDateTime) -> Result<Vec<u8>, PacketError> {
    let encrypted = security.aes_encrypt(frame);
    let total = HEADER_LEN + encrypted.len() + TRAILER_LEN;
    let len = u16::try_from(total).map_err(|_| PacketError::TooLarge(total))?;

    let mut packet = Vec::with_capacity(total);
    packet.extend_from_slice(&MAGIC);
    packet.extend_from_slice(&[0x01, 0x11]);
    packet.extend_from_slice(&len.to_le_bytes());
    packet.extend_from_slice(&[0x20, 0x00]);
    // message id
    packet.extend_from_slice(&[0x00; 4]);
    packet.extend_from_slice(&packet_time(now));
    packet.extend_from_slice(&device_id.to_le_bytes());
    packet.extend_from_slice(&[0x00; 12]);
    packet.extend_from_slice(&encrypted);

    let trailer = security.encode32(&packet);
    packet.extend_from_slice(&trailer);
    Ok(packet)
}

/// Split a stream of concatenated packets on their length fields.
pub fn split(data: &[u8]) -> Result<Vec<&[u8]>, PacketError> {
    let mut out = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        if rest.len() < 6 {
            return Err(PacketError::TooShort { len: rest.len() });
        }
        if rest[..2] != MAGIC {
            return Err(PacketError::BadMagic);
        }
        let declared = u16::from_le_bytes([rest[4], rest[5]]) as usize;
        if declared < HEADER_LEN + TRAILER_LEN {
            return Err(PacketError::TooShort { len: declared });
        }
        if declared > rest.len() {
            return Err(PacketError::Truncated {
                declared,
                available: rest.len(),
            });
        }
        let (packet, tail) = rest.split_at(declared);
        out.push(packet);
        rest = tail;
    }
    Ok(out)
}

/// Pull every complete packet out of a byte stream.
///
/// Bytes that do not start a packet are skipped. An incomplete packet at the
/// end is returned as the remainder for the caller to complete or discard.
pub fn split_stream(data: &[u8]) -> (Vec<&[u8]>, &[u8]) {
    let mut out = Vec::new();
    let mut rest = data;
    loop {
        let Some(start) = rest.windows(2).position(|w| w == MAGIC) else {
            // A lone trailing 0x5a may be the first half of the next magic.
            let keep = usize::from(rest.last() == Some(&MAGIC[0]));
            return (out, &rest[rest.len() - keep..]);
        };
        rest = &rest[start..];
        if rest.len() < 6 {
            return (out, rest);
        }
        let declared = u16::from_le_bytes([rest[4], rest[5]]) as usize;
        if declared < HEADER_LEN + TRAILER_LEN {
            rest = &rest[MAGIC.len()..];
            continue;
        }
        if declared > rest.len() {
            return (out, rest);
        }
        let (packet, tail) = rest.split_at(declared);
        out.push(packet);
        rest = tail;
    }
}

/// Verify one packet and return the decrypted frame bytes.
pub fn open(security: &Security, packet: &[u8]) -> Result<Vec<u8>, PacketError> {
    if packet.len() < HEADER_LEN + TRAILER_LEN {
        return Err(PacketError::TooShort { len: packet.len() });
    }
    if packet[..2] != MAGIC {
        return Err(PacketError::BadMagic);
    }

    let (body, trailer) = packet.split_at(packet.len() - TRAILER_LEN);
    if security.encode32(body) != trailer {
        return Err(PacketError::Checksum);
    }

    Ok(security.aes_decrypt(&body[HEADER_LEN..])?)
}
