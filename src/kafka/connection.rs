//! A single request/response connection to one Kafka broker

use bytes::{Buf, Bytes};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::wire;
use super::Broker;
use crate::error::{Result, TrifectaError};
use std::time::Duration;

/// A connection to one broker.
///
/// The low-level exchange is strictly request/response: one frame out,
/// one frame in, matched by correlation id.
pub struct BrokerConnection {
    broker: Broker,
    stream: TcpStream,
    socket_timeout: Duration,
}

impl BrokerConnection {
    /// Opens a TCP connection to the broker under the socket timeout.
    pub async fn connect(broker: &Broker, socket_timeout: Duration) -> Result<Self> {
        let endpoint = broker.to_string();
        let stream = timeout(socket_timeout, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| TrifectaError::Timeout(socket_timeout.as_millis() as u64))??;
        stream.set_nodelay(true)?;
        debug!(broker = %endpoint, "connected");
        Ok(Self {
            broker: broker.clone(),
            stream,
            socket_timeout,
        })
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Sends one framed request and reads the matching framed response,
    /// returning the response body with the correlation id consumed.
    pub async fn send_request(
        &mut self,
        api_key: i16,
        api_version: i16,
        correlation_id: i32,
        client_id: &str,
        body: &[u8],
    ) -> Result<Bytes> {
        let frame = wire::frame_request(api_key, api_version, correlation_id, client_id, body);
        timeout(self.socket_timeout, self.stream.write_all(&frame))
            .await
            .map_err(|_| TrifectaError::Timeout(self.socket_timeout.as_millis() as u64))??;

        let mut len_buf = [0u8; 4];
        timeout(self.socket_timeout, self.stream.read_exact(&mut len_buf))
            .await
            .map_err(|_| TrifectaError::Timeout(self.socket_timeout.as_millis() as u64))??;
        let frame_len = i32::from_be_bytes(len_buf);
        if !(4..=64 * 1024 * 1024).contains(&frame_len) {
            return Err(TrifectaError::protocol(
                "response frame",
                format!("implausible frame length {frame_len}"),
            ));
        }

        let mut payload = vec![0u8; frame_len as usize];
        timeout(self.socket_timeout, self.stream.read_exact(&mut payload))
            .await
            .map_err(|_| TrifectaError::Timeout(self.socket_timeout.as_millis() as u64))??;

        let mut body = Bytes::from(payload);
        let echoed = body.get_i32();
        if echoed != correlation_id {
            return Err(TrifectaError::protocol(
                "response frame",
                format!("correlation id mismatch: sent {correlation_id}, received {echoed}"),
            ));
        }
        debug!(
            broker = %self.broker,
            api_key,
            correlation_id,
            bytes = body.remaining(),
            "response received"
        );
        Ok(body)
    }

    /// Shuts the socket down, swallowing transport errors.
    pub async fn shutdown(mut self) {
        let _ = self.stream.shutdown().await;
    }
}
