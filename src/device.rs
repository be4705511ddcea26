//! Per-device session engine.
//!
//! `Device` turns a command into zero or more typed responses:
//! frame → LAN packet → (8370 envelope) → transport → and back. Device state
//! is only touched once every reply of a round has been received and
//! decoded, so dropping an in-flight call leaves the session as it was.

use crate::models::command::{Command, DeviceResponse, DeviceType, ResponseError};
use crate::models::heat_pump::{ControlBasicCommand, HeatPumpState, QueryCommand, Response};
use crate::protocol::frame::{Frame, FrameError};
use crate::protocol::packet::{self, PacketError};
use crate::security::{self, CryptoError, DeviceCredentials, SecureChannel, Security};
use crate::transport::{Transport, TransportError};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 6444;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("packet: {0}")]
    Packet(#[from] PacketError),
    #[error("response: {0}")]
    Response(#[from] ResponseError),
    #[error("no reply from device")]
    NoReply,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// LAN packets only.
    V2,
    /// LAN packets inside the 8370 secure envelope.
    V3,
}

pub struct Device {
    ip: String,
    port: u16,
    device_id: u64,
    device_type: DeviceType,
    version: ProtocolVersion,
    timeout: Duration,
    security: Security,
    channel: Option<SecureChannel>,
    transport: Arc<dyn Transport>,
    online: bool,
    supported: bool,
}

impl Device {
    pub fn new(
        ip: impl Into<String>,
        port: u16,
        device_id: u64,
        device_type: DeviceType,
        transport: Arc<dyn Transport>,
        security: Security,
    ) -> Self {
        Device {
            ip: ip.into(),
            port,
            device_id,
            device_type,
            version: ProtocolVersion::V2,
            timeout: DEFAULT_TIMEOUT,
            security,
            channel: None,
            transport,
            online: false,
            supported: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Declare the device as requiring the secure channel before `authenticate` runs.
    pub fn with_version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn udp_id(&self) -> String {
        security::udp_id(self.device_id)
    }

    pub fn online(&self) -> bool {
        self.online
    }

    pub fn supported(&self) -> bool {
        self.supported
    }

    pub fn authenticated(&self) -> bool {
        self.channel.is_some()
    }

    /// Negotiate the session key from the cloud-issued token/key pair.
    /// Any failure here is returned; there is no silent fallback.
    pub async fn authenticate(&mut self, credentials: &DeviceCredentials) -> Result<(), DeviceError> {
        let request = security::handshake_request(&credentials.token)?;
        let replies = self.transport.exchange(&request, self.timeout).await?;
        if replies.is_empty() {
            return Err(DeviceError::NoReply);
        }

        let reply = replies.concat();
        let channel = SecureChannel::from_handshake(&reply, &credentials.key)?;

        self.channel = Some(channel);
        self.version = ProtocolVersion::V3;
        info!("Authenticated with {}:{}", self.ip, self.port);
        Ok(())
    }

    fn encode_request(&mut self, command: &dyn Command) -> Result<Vec<u8>, DeviceError> {
        let frame = command.to_bytes()?;
        let lan_packet = packet::build(&self.security, self.device_id, &frame)?;
        match self.version {
            ProtocolVersion::V2 => Ok(lan_packet),
            ProtocolVersion::V3 => {
                let channel = self.channel.as_mut().ok_or(CryptoError::NoSession)?;
                Ok(channel.encrypt(&lan_packet)?)
            }
        }
    }

    /// Unwrap a round's received bytes down to LAN packets. One bad envelope
    /// or packet is logged and skipped; an incomplete tail is discarded.
    fn open_stream(&mut self, stream: &[u8]) -> Vec<Vec<u8>> {
        let (ip, port) = (&self.ip, self.port);

        let mut payloads: Vec<Vec<u8>> = Vec::new();
        match (self.version, self.channel.as_mut()) {
            (ProtocolVersion::V2, _) => payloads.push(stream.to_vec()),
            (ProtocolVersion::V3, Some(channel)) => {
                let (envelopes, rest) = security::split_envelope_stream(stream);
                for envelope in envelopes {
                    match channel.decrypt(envelope) {
                        Ok(inner) => payloads.extend(inner),
                        Err(e) => warn!("Dropping envelope from {}:{}: {}", ip, port, e),
                    }
                }
                if !rest.is_empty() {
                    warn!("Discarding {} trailing bytes from {}:{}", rest.len(), ip, port);
                }
            }
            (ProtocolVersion::V3, None) => {
                error!("Reply from {}:{} without a session key", ip, port);
                return Vec::new();
            }
        }

        let mut packets = Vec::new();
        for data in &payloads {
            let (complete, rest) = packet::split_stream(data);
            packets.extend(complete.into_iter().map(<[u8]>::to_vec));
            if !rest.is_empty() {
                warn!("Discarding {} trailing bytes from {}:{}", rest.len(), ip, port);
            }
        }
        packets
    }

    /// Send `command` and decode every reply. Never fails: an unreachable
    /// device is marked offline and an empty list is returned.
    pub async fn send_command<R: DeviceResponse>(&mut self, command: &dyn Command) -> Vec<R> {
        let request = match self.encode_request(command) {
            Ok(r) => r,
            Err(e) => {
                error!("Cannot send to {}:{}: {}", self.ip, self.port, e);
                self.online = false;
                self.supported = false;
                return Vec::new();
            }
        };

        let replies = match self.transport.exchange(&request, self.timeout).await {
            Ok(r) => r,
            Err(e) => {
                warn!("Exchange with {}:{} failed: {}", self.ip, self.port, e);
                Vec::new()
            }
        };

        if replies.is_empty() {
            debug!("No reply from {}:{}", self.ip, self.port);
            self.online = false;
            return Vec::new();
        }

        // A reply may be split across reads or share a read with the next one.
        let stream = replies.concat();
        let mut responses = Vec::new();
        for lan_packet in self.open_stream(&stream) {
            match self.decode_packet::<R>(&lan_packet) {
                Ok(response) if response.is_known() => responses.push(response),
                Ok(_) => debug!("Ignored unknown response from {}:{}", self.ip, self.port),
                Err(e) => warn!("Undecodable response from {}:{}: {}", self.ip, self.port, e),
            }
        }

        self.online = true;
        self.supported = !responses.is_empty();
        responses
    }

    fn decode_packet<R: DeviceResponse>(&self, lan_packet: &[u8]) -> Result<R, DeviceError> {
        let frame_bytes = packet::open(&self.security, lan_packet)?;
        debug!("Frame from {}:{}: {}", self.ip, self.port, hex::encode(&frame_bytes));
        let frame = Frame::decode(&frame_bytes)?;
        Ok(R::decode(&frame)?)
    }
}

/// Heat pump session: the engine plus typed state.
pub struct HeatPump {
    device: Device,
    state: HeatPumpState,
}

impl HeatPump {
    pub fn new(device: Device) -> Self {
        HeatPump {
            device,
            state: HeatPumpState::default(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    pub fn state(&self) -> &HeatPumpState {
        &self.state
    }

    pub fn online(&self) -> bool {
        self.device.online()
    }

    pub fn supported(&self) -> bool {
        self.device.supported()
    }

    pub async fn send_command(&mut self, command: &dyn Command) -> Vec<Response> {
        self.device.send_command(command).await
    }

    async fn send_and_apply(&mut self, command: &dyn Command) {
        for response in self.device.send_command::<Response>(command).await {
            self.state.apply(&response);
        }
    }

    /// Query basic state and apply it.
    pub async fn refresh(&mut self) {
        self.send_and_apply(&QueryCommand::basic()).await;
    }

    pub async fn refresh_eco(&mut self) {
        self.send_and_apply(&QueryCommand::eco()).await;
    }

    pub async fn control(&mut self, command: &ControlBasicCommand) {
        self.send_and_apply(command).await;
    }
}

impl core::fmt::Display for HeatPump {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "heat pump {} at {}:{} (online={}, supported={}, version={:?})",
            self.device.device_id,
            self.device.ip,
            self.device.port,
            self.device.online,
            self.device.supported,
            self.device.version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::command::FrameType;
    use crate::models::heat_pump::tests::basic_payload;
    use crate::models::heat_pump::RunMode;
    use crate::security::tests::device_handshake_reply;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const DEVICE_ID: u64 = 0x1234_5678;

    type Script = Result<Vec<Vec<u8>>, TransportError>;

    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Script>>,
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Script>) -> Arc<Self> {
            Arc::new(ScriptedTransport {
                script: Mutex::new(script.into()),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<Vec<u8>> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn exchange(&self, data: &[u8], _reply_timeout: Duration) -> Result<Vec<Vec<u8>>, TransportError> {
            self.sent.lock().unwrap().push(data.to_vec());
            self.script.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
        }
    }

    struct StalledTransport;

    #[async_trait]
    impl Transport for StalledTransport {
        async fn exchange(&self, _data: &[u8], _reply_timeout: Duration) -> Result<Vec<Vec<u8>>, TransportError> {
            std::future::pending().await
        }
    }

    fn reply_packet(payload: Vec<u8>) -> Vec<u8> {
        let frame = Frame::new(DeviceType::HeatPump as u8, FrameType::Request as u8, payload)
            .encode()
            .unwrap();
        packet::build(&Security::default(), DEVICE_ID, &frame).unwrap()
    }

    fn heat_pump(transport: Arc<dyn Transport>) -> HeatPump {
        HeatPump::new(Device::new(
            "192.0.2.10",
            DEFAULT_PORT,
            DEVICE_ID,
            DeviceType::HeatPump,
            transport,
            Security::default(),
        ))
    }

    #[tokio::test]
    async fn no_reply_marks_offline() {
        let transport = ScriptedTransport::new(vec![Ok(vec![])]);
        let mut hp = heat_pump(transport.clone());

        let responses = hp.send_command(&QueryCommand::basic()).await;
        assert!(responses.is_empty());
        assert!(!hp.online());
        assert!(!hp.supported());
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn transport_error_marks_offline() {
        let err = TransportError::Io(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"));
        let mut hp = heat_pump(ScriptedTransport::new(vec![Err(err)]));
        hp.refresh().await;
        assert!(!hp.online());
        assert_eq!(hp.state(), &HeatPumpState::default());
    }

    #[tokio::test]
    async fn refresh_applies_basic_state() {
        let transport = ScriptedTransport::new(vec![Ok(vec![reply_packet(basic_payload())])]);
        let mut hp = heat_pump(transport.clone());

        hp.refresh().await;
        assert!(hp.online());
        assert!(hp.supported());
        assert_eq!(hp.state().run_mode, Some(RunMode::Heat));
        assert_eq!(hp.state().zones[0].target_temperature, 35);
        assert_eq!(hp.state().tank_temperature, Some(46));

        let sent = transport.sent();
        let frame = packet::open(&Security::default(), &sent[0]).unwrap();
        assert_eq!(frame, QueryCommand::basic().to_bytes().unwrap());
    }

    #[tokio::test]
    async fn bad_replies_do_not_abort_the_round() {
        let mut corrupt = reply_packet(basic_payload());
        corrupt[50] ^= 0xff;
        let mut bad_frame_values = basic_payload();
        bad_frame_values[4] = 9;

        let transport = ScriptedTransport::new(vec![Ok(vec![
            b"garbage".to_vec(),
            corrupt,
            reply_packet(vec![0x05, 0x00]),
            reply_packet(bad_frame_values),
            reply_packet(basic_payload()),
        ])]);
        let mut hp = heat_pump(transport);

        let responses = hp.send_command(&QueryCommand::basic()).await;
        assert_eq!(responses.len(), 1);
        assert!(matches!(responses[0], Response::Basic(_)));
        assert!(hp.online());
        assert!(hp.supported());
    }

    #[tokio::test]
    async fn reply_split_across_reads_is_reassembled() {
        let whole = reply_packet(basic_payload());
        let (head, tail) = whole.split_at(30);
        let transport = ScriptedTransport::new(vec![Ok(vec![head.to_vec(), tail.to_vec()])]);
        let mut hp = heat_pump(transport);

        let responses = hp.send_command(&QueryCommand::basic()).await;
        assert_eq!(responses.len(), 1);
        assert!(hp.online());
        assert!(hp.supported());
    }

    #[tokio::test]
    async fn packet_sharing_a_read_with_a_partial_one_is_kept() {
        let second = reply_packet(basic_payload());
        let mut first_read = reply_packet(basic_payload());
        first_read.extend_from_slice(&second[..20]);

        let transport = ScriptedTransport::new(vec![
            Ok(vec![first_read, second[20..].to_vec()]),
            Ok(vec![reply_packet(basic_payload()), second[..20].to_vec()]),
        ]);
        let mut hp = heat_pump(transport);

        let responses = hp.send_command(&QueryCommand::basic()).await;
        assert_eq!(responses.len(), 2);

        // A tail that never completes is dropped without losing the full packet.
        let responses = hp.send_command(&QueryCommand::basic()).await;
        assert_eq!(responses.len(), 1);
        assert!(hp.supported());
    }

    #[tokio::test]
    async fn undecodable_replies_mark_unsupported() {
        let transport = ScriptedTransport::new(vec![
            Ok(vec![reply_packet(basic_payload())]),
            Ok(vec![b"noise".to_vec(), reply_packet(vec![0x05])]),
        ]);
        let mut hp = heat_pump(transport);

        hp.refresh().await;
        assert!(hp.supported());
        let before = hp.state().clone();

        hp.refresh().await;
        assert!(hp.online());
        assert!(!hp.supported());
        assert_eq!(hp.state(), &before);
    }

    #[tokio::test]
    async fn v3_without_session_sends_nothing() {
        let transport = ScriptedTransport::new(vec![]);
        let device = Device::new(
            "192.0.2.10",
            DEFAULT_PORT,
            DEVICE_ID,
            DeviceType::HeatPump,
            transport.clone(),
            Security::default(),
        )
        .with_version(ProtocolVersion::V3);
        let mut hp = HeatPump::new(device);

        assert!(hp.send_command(&QueryCommand::basic()).await.is_empty());
        assert!(!hp.online());
        assert!(!hp.supported());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn authenticated_exchange() {
        let key = [0x42; security::KEY_LEN];
        let handshake = device_handshake_reply(&[0x17; security::KEY_LEN], &key);
        let credentials = DeviceCredentials {
            token: vec![0xab; security::TOKEN_LEN],
            key,
        };

        // The device side derives the same session key from the same handshake.
        let mut device_side = SecureChannel::from_handshake(&handshake, &key).unwrap();
        let encrypted_reply = device_side.encrypt(&reply_packet(basic_payload())).unwrap();

        let transport = ScriptedTransport::new(vec![Ok(vec![handshake]), Ok(vec![encrypted_reply])]);
        let mut hp = heat_pump(transport.clone());

        hp.device_mut().authenticate(&credentials).await.unwrap();
        assert!(hp.device().authenticated());
        assert_eq!(hp.device().version(), ProtocolVersion::V3);

        hp.refresh().await;
        assert!(hp.online() && hp.supported());
        assert_eq!(hp.state().dhw.target_temperature, 48);

        let sent = transport.sent();
        assert_eq!(&sent[0][..2], &[0x83, 0x70]);
        assert_eq!(&sent[0][8..], credentials.token.as_slice());
        assert_eq!(&sent[1][..2], &[0x83, 0x70]);
        let opened = device_side.decrypt(&sent[1]).unwrap();
        assert_eq!(
            packet::open(&Security::default(), &opened[0]).unwrap(),
            QueryCommand::basic().to_bytes().unwrap()
        );
    }

    #[tokio::test]
    async fn envelope_split_across_reads_is_reassembled() {
        let key = [0x42; security::KEY_LEN];
        let handshake = device_handshake_reply(&[0x17; security::KEY_LEN], &key);
        let credentials = DeviceCredentials {
            token: vec![0xab; security::TOKEN_LEN],
            key,
        };

        let mut device_side = SecureChannel::from_handshake(&handshake, &key).unwrap();
        let mut stream = device_side.encrypt(&reply_packet(basic_payload())).unwrap();
        let second = device_side.encrypt(&reply_packet(basic_payload())).unwrap();
        stream.extend_from_slice(&second);
        let reads: Vec<Vec<u8>> = stream.chunks(25).map(<[u8]>::to_vec).collect();

        let transport = ScriptedTransport::new(vec![Ok(vec![handshake]), Ok(reads)]);
        let mut hp = heat_pump(transport);
        hp.device_mut().authenticate(&credentials).await.unwrap();

        let responses = hp.send_command(&QueryCommand::basic()).await;
        assert_eq!(responses.len(), 2);
        assert!(hp.online() && hp.supported());
    }

    #[tokio::test]
    async fn handshake_failures_are_returned() {
        let credentials = DeviceCredentials {
            token: vec![0xab; security::TOKEN_LEN],
            key: [0x42; security::KEY_LEN],
        };

        let transport = ScriptedTransport::new(vec![Ok(vec![b"ERROR".to_vec()]), Ok(vec![])]);
        let mut hp = heat_pump(transport);

        let err = hp.device_mut().authenticate(&credentials).await.unwrap_err();
        assert!(matches!(err, DeviceError::Crypto(CryptoError::HandshakeRejected)));
        let err = hp.device_mut().authenticate(&credentials).await.unwrap_err();
        assert!(matches!(err, DeviceError::NoReply));
        assert!(!hp.device().authenticated());
    }

    #[tokio::test]
    async fn cancelled_refresh_leaves_state_untouched() {
        let mut hp = heat_pump(Arc::new(StalledTransport));
        let result = tokio::time::timeout(Duration::from_millis(20), hp.refresh()).await;
        assert!(result.is_err());
        assert!(!hp.online());
        assert_eq!(hp.state(), &HeatPumpState::default());
    }

    #[tokio::test]
    async fn cancelled_v3_round_burns_only_the_request_counter() {
        let key = [0x42; security::KEY_LEN];
        let handshake = device_handshake_reply(&[0x17; security::KEY_LEN], &key);
        let credentials = DeviceCredentials {
            token: vec![0xab; security::TOKEN_LEN],
            key,
        };

        let mut hp = heat_pump(ScriptedTransport::new(vec![Ok(vec![handshake])]));
        hp.device_mut().authenticate(&credentials).await.unwrap();
        hp.device.transport = Arc::new(StalledTransport);

        let result = tokio::time::timeout(Duration::from_millis(20), hp.refresh()).await;
        assert!(result.is_err());
        assert!(!hp.online());
        assert_eq!(hp.state(), &HeatPumpState::default());

        // The sealed request may have reached the device; its counter is never reused.
        let channel = hp.device.channel.as_ref().unwrap();
        assert_eq!(channel.request_count(), 1);
    }
}
