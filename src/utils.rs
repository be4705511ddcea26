use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{Local, NaiveDateTime};
use rand::RngCore;

fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    rand::rng().fill_bytes(&mut buf);
    buf
}

/// `n` random bytes as lowercase hex (`2 * n` characters).
pub fn token_hex(n: usize) -> String {
    hex::encode(random_bytes(n))
}

/// `n` random bytes as unpadded URL-safe base64.
pub fn token_urlsafe(n: usize) -> String {
    URL_SAFE_NO_PAD.encode(random_bytes(n))
}

/// Local wall clock formatted as `YYYYMMDDhhmmss`.
pub fn stamp() -> String {
    stamp_at(Local::now().naive_local())
}

pub fn stamp_at(now: NaiveDateTime) -> String {
    now.format("%Y%m%d%H%M%S").to_string()
}

/// Parse a device id given either as decimal or as `0x`-prefixed hex.
pub fn parse_device_id(s: &str) -> Option<u64> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(h) => u64::from_str_radix(h, 16).ok(),
        None => s.parse().ok(),
    }
}
