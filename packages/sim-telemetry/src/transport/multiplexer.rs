// Multiplexer over any number of subscriptions and publishers
//
// `tick` drains exhaustively: every cycle polls each subscription once and
// dispatches what arrived, and the tick only ends on a cycle in which no
// subscription had anything pending. A burst is therefore always consumed
// within a single tick.

use super::{MessageHandler, MessageSink, MessageSource, Payload};
use crate::codec::Serializer;
use crate::delta::DeltaMessage;
use crate::types::{StreamError, StreamResult};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublisherId(usize);

/// Outcome of one `tick`
#[derive(Debug, Default)]
pub struct TickReport {
    /// Messages handed to handlers
    pub delivered: usize,
    /// Messages dropped because they did not carry the subscription topic
    pub filtered: usize,
    /// Subscriptions that failed during this tick, by address
    pub failures: Vec<(String, StreamError)>,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.delivered == 0 && self.failures.is_empty()
    }
}

struct Subscription {
    source: Box<dyn MessageSource>,
    topic: Vec<u8>,
    codec: Option<Serializer>,
    handler: Box<dyn MessageHandler>,
}

impl Subscription {
    /// Strip the topic and decode. `Ok(None)` for messages of other topics.
    fn decode(&self, message: Vec<u8>) -> StreamResult<Option<Payload>> {
        if !message.starts_with(&self.topic) {
            return Ok(None);
        }
        let body = &message[self.topic.len()..];
        let payload = match self.codec {
            Some(codec) => Payload::Delta(codec.deserialize::<DeltaMessage>(body)?),
            None => Payload::Raw(body.to_vec()),
        };
        Ok(Some(payload))
    }
}

pub struct Multiplexer {
    subscriptions: Vec<Subscription>,
    publishers: Vec<Box<dyn MessageSink>>,
    poll_timeout: Duration,
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl Multiplexer {
    /// `poll_timeout` is how long each source is waited on per poll cycle
    pub fn new(poll_timeout: Duration) -> Self {
        Self {
            subscriptions: Vec::new(),
            publishers: Vec::new(),
            poll_timeout,
        }
    }

    pub fn add_publisher(&mut self, sink: Box<dyn MessageSink>) -> PublisherId {
        log::info!("Registered publisher {}", sink.address());
        self.publishers.push(sink);
        PublisherId(self.publishers.len() - 1)
    }

    pub async fn publish(&mut self, id: PublisherId, payload: Vec<u8>) -> StreamResult<()> {
        let sink = self
            .publishers
            .get_mut(id.0)
            .ok_or_else(|| StreamError::UnknownPort(format!("publisher #{}", id.0)))?;
        sink.send(payload).await
    }

    /// Register a subscription. Messages not starting with `topic` are
    /// dropped; the prefix is stripped before decoding. Without a codec the
    /// handler receives the raw body.
    pub fn add_subscription(
        &mut self,
        source: Box<dyn MessageSource>,
        topic: impl Into<Vec<u8>>,
        codec: Option<Serializer>,
        handler: Box<dyn MessageHandler>,
    ) {
        log::info!(
            "Registered subscription {} (codec: {})",
            source.address(),
            codec.map_or("raw", Serializer::name)
        );
        self.subscriptions.push(Subscription {
            source,
            topic: topic.into(),
            codec,
            handler,
        });
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Drain every subscription until a full poll cycle comes back empty.
    ///
    /// A subscription whose source, codec or handler fails is skipped for
    /// the rest of this tick; the others keep draining. The failure is
    /// returned in the report and the subscription is polled again on the
    /// next tick.
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let mut suspended = vec![false; self.subscriptions.len()];

        loop {
            let mut ready = 0;
            for (subscription, suspended) in self.subscriptions.iter_mut().zip(suspended.iter_mut()) {
                if *suspended {
                    continue;
                }
                let outcome = match subscription.source.poll_message(self.poll_timeout).await {
                    Ok(None) => continue,
                    Ok(Some(message)) => {
                        ready += 1;
                        subscription.decode(message).and_then(|payload| match payload {
                            Some(payload) => subscription.handler.on_message(payload).map(|()| true),
                            None => Ok(false),
                        })
                    }
                    Err(e) => Err(e),
                };
                match outcome {
                    Ok(true) => report.delivered += 1,
                    Ok(false) => report.filtered += 1,
                    Err(e) => {
                        log::error!(
                            "Subscription {} failed, skipping it for this tick: {}",
                            subscription.source.address(),
                            e
                        );
                        *suspended = true;
                        report
                            .failures
                            .push((subscription.source.address().to_string(), e));
                    }
                }
            }
            if ready == 0 {
                break;
            }
        }
        report
    }

    /// Close every socket
    pub async fn close(&mut self) {
        log::info!(
            "Closing {} subscriptions and {} publishers",
            self.subscriptions.len(),
            self.publishers.len()
        );
        for subscription in &mut self.subscriptions {
            if let Err(e) = subscription.source.close().await {
                log::warn!("Error closing {}: {}", subscription.source.address(), e);
            }
        }
        for sink in &mut self.publishers {
            if let Err(e) = sink.close().await {
                log::warn!("Error closing {}: {}", sink.address(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::inproc_channel;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<Payload>>>, Box<dyn MessageHandler>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = move |payload: Payload| -> StreamResult<()> {
            sink.lock().push(payload);
            Ok(())
        };
        (seen, Box::new(handler))
    }

    #[tokio::test]
    async fn test_exhaustive_drain_across_subscriptions() {
        let mut mux = Multiplexer::default();
        let mut sinks = Vec::new();
        let mut records = Vec::new();
        for i in 0..3 {
            let (sink, source) = inproc_channel(&format!("inproc://sub{}", i));
            let (seen, handler) = recorder();
            mux.add_subscription(Box::new(source), "", None, handler);
            sinks.push(sink);
            records.push(seen);
        }

        // uneven backlog: 1, 4 and 7 messages
        let mut queued = 0;
        for (i, sink) in sinks.iter_mut().enumerate() {
            for n in 0..(1 + 3 * i) {
                sink.send(vec![n as u8]).await.unwrap();
                queued += 1;
            }
        }

        let report = mux.tick().await;
        assert_eq!(report.delivered, queued);
        assert_eq!(records[2].lock().len(), 7);

        let report = mux.tick().await;
        assert!(report.is_idle());
        assert_eq!(report.delivered, 0);
    }

    #[tokio::test]
    async fn test_topic_filter_and_decoding() {
        let mut mux = Multiplexer::default();
        let (mut sink, source) = inproc_channel("inproc://deltas");
        let (seen, handler) = recorder();
        mux.add_subscription(Box::new(source), "sim", Some(Serializer::Json), handler);

        let msg = DeltaMessage::new(0.25);
        let mut framed = b"sim".to_vec();
        framed.extend(Serializer::Json.serialize(&msg).unwrap());
        sink.send(framed).await.unwrap();
        sink.send(b"other[0.5,[]]".to_vec()).await.unwrap();

        let report = mux.tick().await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.filtered, 1);
        assert_eq!(*seen.lock(), vec![Payload::Delta(msg)]);
    }

    #[tokio::test]
    async fn test_failing_subscription_does_not_block_others() {
        let mut mux = Multiplexer::default();
        let (mut bad_sink, bad_source) = inproc_channel("inproc://bad");
        let (mut good_sink, good_source) = inproc_channel("inproc://good");
        let (_, bad_handler) = recorder();
        let (seen, good_handler) = recorder();
        mux.add_subscription(Box::new(bad_source), "", Some(Serializer::Json), bad_handler);
        mux.add_subscription(Box::new(good_source), "", None, good_handler);

        bad_sink.send(b"not json".to_vec()).await.unwrap();
        bad_sink.send(b"[1.0,[]]".to_vec()).await.unwrap();
        for i in 0..5u8 {
            good_sink.send(vec![i]).await.unwrap();
        }

        let report = mux.tick().await;
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "inproc://bad");
        assert_eq!(seen.lock().len(), 5);

        // the suspended subscription resumes on the next tick
        let report = mux.tick().await;
        assert_eq!(report.delivered, 1);
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn test_publish_to_registered_sink() {
        let mut mux = Multiplexer::default();
        let (sink, mut source) = inproc_channel("inproc://out");
        let id = mux.add_publisher(Box::new(sink));

        mux.publish(id, b"hello".to_vec()).await.unwrap();
        assert_eq!(
            source.poll_message(Duration::ZERO).await.unwrap(),
            Some(b"hello".to_vec())
        );
        assert!(mux.publish(PublisherId(7), vec![]).await.is_err());

        mux.close().await;
        assert!(mux.publish(id, vec![]).await.is_err());
    }
}
