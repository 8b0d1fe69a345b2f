// In-process transport backed by a tokio channel

use super::{MessageSink, MessageSource};
use crate::types::{StreamError, StreamResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// Connected sink/source pair sharing `address`
pub fn inproc_channel(address: &str) -> (InProcessSink, InProcessSource) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        InProcessSink {
            address: address.to_string(),
            tx: Some(tx),
        },
        InProcessSource {
            address: address.to_string(),
            rx,
        },
    )
}

pub struct InProcessSink {
    address: String,
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

pub struct InProcessSource {
    address: String,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl MessageSink for InProcessSink {
    fn address(&self) -> &str {
        &self.address
    }

    async fn send(&mut self, payload: Vec<u8>) -> StreamResult<()> {
        let tx = self.tx.as_ref().ok_or(StreamError::ChannelClosed)?;
        tx.send(payload).map_err(|_| StreamError::ChannelClosed)
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.tx = None;
        Ok(())
    }
}

#[async_trait]
impl MessageSource for InProcessSource {
    fn address(&self) -> &str {
        &self.address
    }

    async fn poll_message(&mut self, timeout: Duration) -> StreamResult<Option<Vec<u8>>> {
        if timeout.is_zero() {
            return match self.rx.try_recv() {
                Ok(payload) => Ok(Some(payload)),
                // a closed, drained channel has simply nothing left to deliver
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Ok(None),
            };
        }
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(payload) => Ok(payload),
            Err(_elapsed) => Ok(None),
        }
    }

    async fn close(&mut self) -> StreamResult<()> {
        self.rx.close();
        Ok(())
    }
}
