// Publish/subscribe transport for delta messages
//
// `MessageSource` and `MessageSink` are the seams to a concrete transport.
// New transports are added by implementing them; the multiplexer only ever
// sees boxed trait objects.
//
// Current implementations:
// - ZeroMQ: PUB/SUB sockets over tcp or ipc (pure Rust, no libzmq)
// - In-process: tokio channels, for standalone runs and tests

mod inproc;
mod multiplexer;
mod zmq;

use crate::delta::DeltaMessage;
use crate::types::StreamResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use inproc::{inproc_channel, InProcessSink, InProcessSource};
pub use multiplexer::{Multiplexer, PublisherId, TickReport};
pub use zmq::{ZmqPublisher, ZmqSubscriber};

/// `{transport}://{host}:{port}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub transport: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(transport: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            transport: transport.into(),
            host: host.into(),
            port,
        }
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new("tcp", host, port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.transport, self.host, self.port)
    }
}

/// What a subscription hands to its handler
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Message body with the topic prefix removed, for subscriptions
    /// without a codec
    Raw(Vec<u8>),
    Delta(DeltaMessage),
}

/// Inbound half of a transport
#[async_trait]
pub trait MessageSource: Send {
    fn address(&self) -> &str;

    /// Wait at most `timeout` for the next message. `Ok(None)` means nothing
    /// was pending.
    async fn poll_message(&mut self, timeout: Duration) -> StreamResult<Option<Vec<u8>>>;

    async fn close(&mut self) -> StreamResult<()>;
}

/// Outbound half of a transport
#[async_trait]
pub trait MessageSink: Send {
    fn address(&self) -> &str;

    async fn send(&mut self, payload: Vec<u8>) -> StreamResult<()>;

    async fn close(&mut self) -> StreamResult<()>;
}

/// Callback of one subscription
pub trait MessageHandler: Send {
    fn on_message(&mut self, payload: Payload) -> StreamResult<()>;
}

impl<F> MessageHandler for F
where
    F: FnMut(Payload) -> StreamResult<()> + Send,
{
    fn on_message(&mut self, payload: Payload) -> StreamResult<()> {
        self(payload)
    }
}
