// ZeroMQ transport
//
// PUB/SUB sockets from the pure Rust `zeromq` crate. Payloads travel as a
// single frame; a publisher with a topic prefixes every payload with it so
// that subscribers can filter on the socket and strip it afterwards.

use super::{MessageSink, MessageSource};
use crate::types::{StreamError, StreamResult};
use async_trait::async_trait;
use std::time::Duration;
use zeromq::{PubSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

/// SUB socket connected to one publisher
pub struct ZmqSubscriber {
    endpoint: String,
    topic: String,
    socket: Option<SubSocket>,
    message_count: u64,
}

impl ZmqSubscriber {
    /// Connect to `endpoint` (e.g. "tcp://127.0.0.1:5555") and subscribe to
    /// `topic` (empty string subscribes to everything).
    pub async fn connect(endpoint: &str, topic: &str) -> StreamResult<Self> {
        log::info!("Subscribing to {} (topic: {:?})", endpoint, topic);

        let mut socket = SubSocket::new();
        socket
            .connect(endpoint)
            .await
            .map_err(|e| StreamError::Connection(format!("ZMQ SUB connect error: {}", e)))?;
        socket
            .subscribe(topic)
            .await
            .map_err(|e| StreamError::Connection(format!("ZMQ subscribe error: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            topic: topic.to_string(),
            socket: Some(socket),
            message_count: 0,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl MessageSource for ZmqSubscriber {
    fn address(&self) -> &str {
        &self.endpoint
    }

    async fn poll_message(&mut self, timeout: Duration) -> StreamResult<Option<Vec<u8>>> {
        let socket = self.socket.as_mut().ok_or(StreamError::ChannelClosed)?;
        let message = match tokio::time::timeout(timeout, socket.recv()).await {
            Err(_elapsed) => return Ok(None),
            Ok(received) => received
                .map_err(|e| StreamError::Network(format!("ZMQ receive error: {}", e)))?,
        };

        self.message_count += 1;
        if self.message_count % 1000 == 0 {
            log::debug!("Received {} ZMQ messages from {}", self.message_count, self.endpoint);
        }

        // ZMQ message is a list of frames; the delta travels in the first
        Ok(message.into_vec().into_iter().next().map(|frame| frame.to_vec()))
    }

    async fn close(&mut self) -> StreamResult<()> {
        if let Some(socket) = self.socket.take() {
            log::info!(
                "Closing ZMQ SUB socket {} (received {} messages)",
                self.endpoint,
                self.message_count
            );
            for error in socket.close().await {
                log::warn!("Error while closing {}: {}", self.endpoint, error);
            }
        }
        Ok(())
    }
}

/// PUB socket bound to a local endpoint
pub struct ZmqPublisher {
    endpoint: String,
    topic: Vec<u8>,
    socket: Option<PubSocket>,
    message_count: u64,
}

impl ZmqPublisher {
    /// Bind to `endpoint`. A tcp port of 0 picks a free port; the resolved
    /// endpoint is available through [`MessageSink::address`].
    pub async fn bind(endpoint: &str, topic: &str) -> StreamResult<Self> {
        let mut socket = PubSocket::new();
        let bound = socket
            .bind(endpoint)
            .await
            .map_err(|e| StreamError::Connection(format!("ZMQ PUB bind error: {}", e)))?;
        log::info!("Publishing on {}", bound);

        Ok(Self {
            endpoint: bound.to_string(),
            topic: topic.as_bytes().to_vec(),
            socket: Some(socket),
            message_count: 0,
        })
    }
}

#[async_trait]
impl MessageSink for ZmqPublisher {
    fn address(&self) -> &str {
        &self.endpoint
    }

    async fn send(&mut self, payload: Vec<u8>) -> StreamResult<()> {
        let socket = self.socket.as_mut().ok_or(StreamError::ChannelClosed)?;
        let frame = if self.topic.is_empty() {
            payload
        } else {
            let mut frame = Vec::with_capacity(self.topic.len() + payload.len());
            frame.extend_from_slice(&self.topic);
            frame.extend_from_slice(&payload);
            frame
        };
        socket
            .send(ZmqMessage::from(frame))
            .await
            .map_err(|e| StreamError::Network(format!("ZMQ send error: {}", e)))?;

        self.message_count += 1;
        if self.message_count % 1000 == 0 {
            log::debug!("Published {} ZMQ messages on {}", self.message_count, self.endpoint);
        }
        Ok(())
    }

    async fn close(&mut self) -> StreamResult<()> {
        if let Some(socket) = self.socket.take() {
            log::info!(
                "Closing ZMQ PUB socket {} (sent {} messages)",
                self.endpoint,
                self.message_count
            );
            for error in socket.close().await {
                log::warn!("Error while closing {}: {}", self.endpoint, error);
            }
        }
        Ok(())
    }
}
