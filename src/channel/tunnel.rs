//! Tunnel transport: a socket session per delivery.
//!
//! The request is sent as a single length-prefixed frame containing its
//! raw HTTP serialization; the worker answers with two length-prefixed
//! frames, a headers frame (`HTTP/1.1 <code>` plus header lines) and a
//! content frame carrying the body bytes. Frames are a big-endian u32
//! length followed by that many bytes.
//!
//! Connect failures are transient (workers routinely come up a moment
//! after their address is known) and are retried a bounded number of
//! times before the delivery is declared failed; the supervisor then
//! treats the worker as dead.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::channel::Channel;
use crate::envelope::{Request, Response};
use crate::error::ChannelError;
use crate::provider::WorkerHandle;

/// Connection attempts before a delivery is declared failed.
const DEFAULT_CONNECT_ATTEMPTS: u32 = 3;

/// Largest frame accepted from a worker.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Channel that tunnels raw HTTP over a per-delivery socket session.
pub struct TunnelChannel {
    connect_attempts: u32,
}

impl TunnelChannel {
    pub fn new() -> Self {
        Self {
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
        }
    }

    /// Sets the number of connection attempts per delivery.
    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts.max(1);
        self
    }

    async fn connect(&self, endpoint: &str) -> Result<TcpStream, ChannelError> {
        let mut last = String::new();
        for attempt in 1..=self.connect_attempts {
            match TcpStream::connect(endpoint).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(endpoint, attempt, error = %e, "Tunnel connect failed");
                    last = e.to_string();
                }
            }
        }
        Err(ChannelError::HandshakeExhausted {
            attempts: self.connect_attempts,
            last,
        })
    }

    async fn exchange(
        &self,
        stream: &mut TcpStream,
        payload: &[u8],
    ) -> Result<Response, ChannelError> {
        write_frame(stream, payload).await?;
        let headers = read_frame(stream).await?;
        let content = read_frame(stream).await?;
        Ok(Response::from_frames(&headers, &content)?)
    }
}

impl Default for TunnelChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for TunnelChannel {
    async fn deliver(
        &self,
        request: &Request,
        worker: &WorkerHandle,
    ) -> Result<Response, ChannelError> {
        let mut request = request.clone();
        request.replace_base_url(&format!("http://{}", worker.endpoint))?;
        let payload = request.to_raw_http();

        let mut stream = self.connect(&worker.endpoint).await?;
        self.exchange(&mut stream, &payload).await
    }
}

async fn write_frame(stream: &mut TcpStream, bytes: &[u8]) -> Result<(), ChannelError> {
    let len = u32::try_from(bytes.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| {
            ChannelError::Frame(format!(
                "Frame of {} bytes exceeds the {MAX_FRAME_LEN} byte limit",
                bytes.len()
            ))
        })?;
    stream.write_u32(len).await?;
    stream.write_all(bytes).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>, ChannelError> {
    let len = stream.read_u32().await?;
    if len > MAX_FRAME_LEN {
        return Err(ChannelError::Frame(format!(
            "Frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}
