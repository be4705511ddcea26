//! Byte transport between the session engine and one device.

use async_trait::async_trait;
use log::debug;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

const READ_BUFFER: usize = 2048;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {0} timed out")]
    ConnectTimeout(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Send one request and collect whatever the device answers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns every chunk received before `reply_timeout` expired; an empty
    /// list means the device did not answer.
    async fn exchange(&self, data: &[u8], reply_timeout: Duration) -> Result<Vec<Vec<u8>>, TransportError>;
}

/// TCP client to the device's LAN port. Connects lazily and reconnects after errors.
pub struct TcpTransport {
    addr: String,
    connect_timeout: Duration,
    /// How long to keep listening for further chunks after the first reply.
    linger: Duration,
    stream: Mutex<Option<TcpStream>>,
}

impl TcpTransport {
    pub fn new(ip: &str, port: u16, connect_timeout: Duration) -> Self {
        TcpTransport {
            addr: format!("{}:{}", ip, port),
            connect_timeout,
            linger: Duration::from_millis(200),
            stream: Mutex::new(None),
        }
    }

    async fn connect(&self) -> Result<TcpStream, TransportError> {
        debug!("Connecting to {}", self.addr);
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout(self.addr.clone()))??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn exchange(&self, data: &[u8], reply_timeout: Duration) -> Result<Vec<Vec<u8>>, TransportError> {
        let mut slot = self.stream.lock().await;

        // Taken out for the duration of the exchange: if this future is
        // dropped mid-read the half-used stream is closed, not reused.
        let mut stream = match slot.take() {
            Some(s) => s,
            None => self.connect().await?,
        };

        stream.write_all(data).await?;

        let mut replies = Vec::new();
        let mut buf = vec![0u8; READ_BUFFER];
        let mut wait = reply_timeout;
        loop {
            match timeout(wait, stream.read(&mut buf)).await {
                Err(_) => break,
                Ok(Ok(0)) => {
                    debug!("{} closed the connection", self.addr);
                    return Ok(replies);
                }
                Ok(Ok(n)) => {
                    replies.push(buf[..n].to_vec());
                    wait = self.linger;
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        }

        *slot = Some(stream);
        Ok(replies)
    }
}
