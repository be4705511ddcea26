//! Cryptography shared by the LAN and cloud paths.
//!
//! - `Security` holds the process-wide constants: the LAN packet key
//!   (AES-128-ECB under `md5(sign_key)`), the cloud request signing key and
//!   the password derivation salt.
//! - `SecureChannel` is the per-device "8370" envelope keyed by the session
//!   key negotiated from the cloud-issued token/key pair.

use aes::{Aes128, Aes256};
use cipher::block_padding::{NoPadding, Pkcs7};
use cipher::{BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const BLOCK_SIZE: usize = 16;
const ZERO_IV: [u8; BLOCK_SIZE] = [0; BLOCK_SIZE];

pub const TOKEN_LEN: usize = 64;
pub const KEY_LEN: usize = 32;

#[derive(Debug, Error, PartialEq)]
pub enum CryptoError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("ciphertext length {0} is not a multiple of the block size")]
    InvalidLength(usize),
    #[error("bad padding after decryption")]
    Padding,
    #[error("signature does not match")]
    SignMismatch,
    #[error("malformed secure envelope: {0}")]
    BadEnvelope(&'static str),
    #[error("device rejected the handshake")]
    HandshakeRejected,
    #[error("no session key; device has not been authenticated")]
    NoSession,
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Cloud and LAN constants. `Default` carries the production values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityConfig {
    pub sign_key: String,
    pub app_key: String,
    pub iot_key: String,
    pub hmac_key: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        SecurityConfig {
            sign_key: "xhdiwjnchekd4d512chdjx5d8e4c394D2D7S".to_string(),
            app_key: "ac21b9f9cbfe4ca5a88562ef25e2b768".to_string(),
            iot_key: "meicloud".to_string(),
            hmac_key: "PROD_VnoClJI9aikS8dyy".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Security {
    config: SecurityConfig,
    local_key: [u8; 16],
}

impl Default for Security {
    fn default() -> Self {
        Security::new(SecurityConfig::default())
    }
}

impl Security {
    pub fn new(config: SecurityConfig) -> Self {
        let local_key = md5::compute(config.sign_key.as_bytes()).0;
        Security { config, local_key }
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// AES-128-ECB with PKCS7 padding under the LAN packet key.
    pub fn aes_encrypt(&self, data: &[u8]) -> Vec<u8> {
        Aes128::new(&self.local_key.into()).encrypt_padded_vec::<Pkcs7>(data)
    }

    pub fn aes_decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::InvalidLength(data.len()));
        }
        Aes128::new(&self.local_key.into())
            .decrypt_padded_vec::<Pkcs7>(data)
            .map_err(|_| CryptoError::Padding)
    }

    /// MD5 trailer of a LAN packet: `md5(data || sign_key)`.
    pub fn encode32(&self, data: &[u8]) -> [u8; 16] {
        let mut buf = Vec::with_capacity(data.len() + self.config.sign_key.len());
        buf.extend_from_slice(data);
        buf.extend_from_slice(self.config.sign_key.as_bytes());
        md5::compute(&buf).0
    }

    /// HMAC-SHA256 over `iot_key || body || random`, hex encoded.
    pub fn sign(&self, body: &str, random: &str) -> Result<String, CryptoError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.config.hmac_key.as_bytes()).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: 64,
                actual: self.config.hmac_key.len(),
            }
        })?;
        mac.update(self.config.iot_key.as_bytes());
        mac.update(body.as_bytes());
        mac.update(random.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// `sha256(login_id || sha256(password) || app_key)`, both stages hex encoded.
    pub fn encrypt_password(&self, login_id: &str, password: &str) -> String {
        let inner = hex::encode(Sha256::digest(password.as_bytes()));
        let login_hash = format!("{}{}{}", login_id, inner, self.config.app_key);
        hex::encode(Sha256::digest(login_hash.as_bytes()))
    }

    pub fn encrypt_iam_password(&self, password: &str) -> String {
        let first = format!("{:x}", md5::compute(password.as_bytes()));
        format!("{:x}", md5::compute(first.as_bytes()))
    }
}

/// Identifier the cloud uses to look up a device's token/key pair.
pub fn udp_id(device_id: u64) -> String {
    let id_bytes = device_id.to_le_bytes();
    let digest = Sha256::digest(&id_bytes[..6]);
    let folded: Vec<u8> = digest[..16].iter().zip(&digest[16..]).map(|(a, b)| a ^ b).collect();
    hex::encode(folded)
}

/// Token/key pair provisioned by the cloud for one device.
#[derive(Clone, PartialEq, Eq)]
pub struct DeviceCredentials {
    pub token: Vec<u8>,
    pub key: [u8; KEY_LEN],
}

impl core::fmt::Debug for DeviceCredentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DeviceCredentials").finish_non_exhaustive()
    }
}

impl DeviceCredentials {
    pub fn from_hex(token: &str, key: &str) -> Result<Self, CryptoError> {
        let token = hex::decode(token.trim())?;
        if token.len() != TOKEN_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: TOKEN_LEN,
                actual: token.len(),
            });
        }
        let key_bytes = hex::decode(key.trim())?;
        let key: [u8; KEY_LEN] = key_bytes.as_slice().try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: key_bytes.len(),
        })?;
        Ok(DeviceCredentials { token, key })
    }
}

fn cbc_encrypt(key: &[u8; KEY_LEN], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidLength(data.len()));
    }
    let enc = Aes256CbcEnc::new(key.into(), &ZERO_IV.into());
    Ok(enc.encrypt_padded_vec_mut::<NoPadding>(data))
}

fn cbc_decrypt(key: &[u8; KEY_LEN], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidLength(data.len()));
    }
    let dec = Aes256CbcDec::new(key.into(), &ZERO_IV.into());
    dec.decrypt_padded_vec_mut::<NoPadding>(data).map_err(|_| CryptoError::Padding)
}

const ENVELOPE_MAGIC: [u8; 2] = [0x83, 0x70];
const ENVELOPE_HEADER_LEN: usize = 6;
const COUNTER_LEN: usize = 2;
const SIGN_LEN: usize = 32;

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MessageType {
    HandshakeRequest = 0x0,
    HandshakeResponse = 0x1,
    EncryptedResponse = 0x3,
    EncryptedRequest = 0x6,
}

impl MessageType {
    fn from_nibble(value: u8) -> Option<Self> {
        match value {
            0x0 => Some(MessageType::HandshakeRequest),
            0x1 => Some(MessageType::HandshakeResponse),
            0x3 => Some(MessageType::EncryptedResponse),
            0x6 => Some(MessageType::EncryptedRequest),
            _ => None,
        }
    }

    fn is_encrypted(self) -> bool {
        matches!(self, MessageType::EncryptedRequest | MessageType::EncryptedResponse)
    }
}

/// Builds an 8370 envelope. Encrypted types need a session key.
fn encode_envelope(
    data: &[u8],
    msg_type: MessageType,
    counter: u16,
    key: Option<&[u8; KEY_LEN]>,
) -> Result<Vec<u8>, CryptoError> {
    let mut body = Vec::with_capacity(COUNTER_LEN + data.len() + BLOCK_SIZE);
    body.extend_from_slice(&counter.to_be_bytes());
    body.extend_from_slice(data);

    let mut padding = 0usize;
    let mut size = data.len();
    if msg_type.is_encrypted() {
        if body.len() % BLOCK_SIZE != 0 {
            padding = BLOCK_SIZE - body.len() % BLOCK_SIZE;
            let mut filler = vec![0u8; padding];
            rand::rng().fill_bytes(&mut filler);
            body.extend_from_slice(&filler);
        }
        size += padding + SIGN_LEN;
    }
    let size = u16::try_from(size).map_err(|_| CryptoError::BadEnvelope("payload too large"))?;

    let mut out = Vec::with_capacity(ENVELOPE_HEADER_LEN + body.len() + SIGN_LEN);
    out.extend_from_slice(&ENVELOPE_MAGIC);
    out.extend_from_slice(&size.to_be_bytes());
    out.push(0x20);
    out.push(((padding as u8) << 4) | msg_type as u8);

    if msg_type.is_encrypted() {
        let key = key.ok_or(CryptoError::NoSession)?;
        let mut hasher = Sha256::new();
        hasher.update(&out);
        hasher.update(&body);
        let sign = hasher.finalize();
        out.extend_from_slice(&cbc_encrypt(key, &body)?);
        out.extend_from_slice(&sign);
    } else {
        out.extend_from_slice(&body);
    }
    Ok(out)
}

struct DecodedEnvelope {
    msg_type: MessageType,
    counter: u16,
    data: Vec<u8>,
}

/// Splits `data` into envelopes and opens each one.
fn decode_envelopes(data: &[u8], key: Option<&[u8; KEY_LEN]>) -> Result<Vec<DecodedEnvelope>, CryptoError> {
    let mut out = Vec::new();
    let mut rest = data;

    while !rest.is_empty() {
        if rest.len() < ENVELOPE_HEADER_LEN + COUNTER_LEN {
            return Err(CryptoError::BadEnvelope("truncated header"));
        }
        if rest[..2] != ENVELOPE_MAGIC {
            return Err(CryptoError::BadEnvelope("missing 8370 magic"));
        }
        if rest[4] != 0x20 {
            return Err(CryptoError::BadEnvelope("missing byte 4"));
        }
        let total = u16::from_be_bytes([rest[2], rest[3]]) as usize + ENVELOPE_HEADER_LEN + COUNTER_LEN;
        if rest.len() < total {
            return Err(CryptoError::BadEnvelope("truncated body"));
        }

        let (envelope, tail) = rest.split_at(total);
        rest = tail;

        let header = &envelope[..ENVELOPE_HEADER_LEN];
        let padding = (header[5] >> 4) as usize;
        let msg_type = MessageType::from_nibble(header[5] & 0x0f).ok_or(CryptoError::BadEnvelope("unknown message type"))?;
        let mut body = envelope[ENVELOPE_HEADER_LEN..].to_vec();

        if msg_type.is_encrypted() {
            let key = key.ok_or(CryptoError::NoSession)?;
            if body.len() < SIGN_LEN + BLOCK_SIZE {
                return Err(CryptoError::BadEnvelope("encrypted body too short"));
            }
            let sign = body.split_off(body.len() - SIGN_LEN);
            let plain = cbc_decrypt(key, &body)?;

            let mut hasher = Sha256::new();
            hasher.update(header);
            hasher.update(&plain);
            if hasher.finalize().as_slice() != sign.as_slice() {
                return Err(CryptoError::SignMismatch);
            }
            if padding > plain.len() - COUNTER_LEN {
                return Err(CryptoError::Padding);
            }
            body = plain;
            body.truncate(body.len() - padding);
        }

        let data = body.split_off(COUNTER_LEN);
        out.push(DecodedEnvelope {
            msg_type,
            counter: u16::from_be_bytes([body[0], body[1]]),
            data,
        });
    }

    Ok(out)
}

/// Pull every complete 8370 envelope out of a byte stream without opening it.
///
/// Bytes that do not start an envelope are skipped; an incomplete envelope at
/// the end is returned as the remainder.
pub fn split_envelope_stream(data: &[u8]) -> (Vec<&[u8]>, &[u8]) {
    let mut out = Vec::new();
    let mut rest = data;
    loop {
        let Some(start) = rest.windows(2).position(|w| w == ENVELOPE_MAGIC) else {
            let keep = usize::from(rest.last() == Some(&ENVELOPE_MAGIC[0]));
            return (out, &rest[rest.len() - keep..]);
        };
        rest = &rest[start..];
        if rest.len() < ENVELOPE_HEADER_LEN {
            return (out, rest);
        }
        if rest[4] != 0x20 {
            rest = &rest[ENVELOPE_MAGIC.len()..];
            continue;
        }
        let total = u16::from_be_bytes([rest[2], rest[3]]) as usize + ENVELOPE_HEADER_LEN + COUNTER_LEN;
        if total > rest.len() {
            return (out, rest);
        }
        let (envelope, tail) = rest.split_at(total);
        out.push(envelope);
        rest = tail;
    }
}

pub fn handshake_request(token: &[u8]) -> Result<Vec<u8>, CryptoError> {
    encode_envelope(token, MessageType::HandshakeRequest, 0, None)
}

/// Per-device session over the 8370 envelope.
pub struct SecureChannel {
    key: [u8; KEY_LEN],
    request_count: u16,
    response_count: u16,
}

impl core::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("request_count", &self.request_count)
            .field("response_count", &self.response_count)
            .finish_non_exhaustive()
    }
}

impl SecureChannel {
    /// Derive the session key from the device's handshake reply.
    pub fn from_handshake(reply: &[u8], key: &[u8; KEY_LEN]) -> Result<Self, CryptoError> {
        if reply == b"ERROR" {
            return Err(CryptoError::HandshakeRejected);
        }

        let envelope = decode_envelopes(reply, None)?
            .into_iter()
            .next()
            .ok_or(CryptoError::BadEnvelope("empty handshake reply"))?;
        if envelope.msg_type != MessageType::HandshakeResponse {
            return Err(CryptoError::BadEnvelope("expected handshake response"));
        }
        if envelope.data.len() != 2 * SIGN_LEN {
            return Err(CryptoError::BadEnvelope("unexpected handshake length"));
        }

        let (payload, sign) = envelope.data.split_at(SIGN_LEN);
        let plain = cbc_decrypt(key, payload)?;
        if Sha256::digest(&plain).as_slice() != sign {
            return Err(CryptoError::SignMismatch);
        }

        let mut session_key = [0u8; KEY_LEN];
        for (out, (p, k)) in session_key.iter_mut().zip(plain.iter().zip(key)) {
            *out = p ^ k;
        }

        Ok(SecureChannel {
            key: session_key,
            request_count: 0,
            response_count: 0,
        })
    }

    pub fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let out = encode_envelope(data, MessageType::EncryptedRequest, self.request_count, Some(&self.key))?;
        self.request_count = self.request_count.wrapping_add(1);
        Ok(out)
    }

    /// Open every envelope in `data`; returns the inner payloads in order.
    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<Vec<u8>>, CryptoError> {
        let envelopes = decode_envelopes(data, Some(&self.key))?;
        if let Some(last) = envelopes.last() {
            self.response_count = last.counter;
        }
        Ok(envelopes.into_iter().map(|e| e.data).collect())
    }

    pub fn request_count(&self) -> u16 {
        self.request_count
    }
}
