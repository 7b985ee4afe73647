//! In-memory reference driver.
//!
//! Each `FakeExchange` holds a FIFO queue per topic and per `(topic, server)`
//! pair behind a single lock. Routing of one delivery:
//!
//! - fanout: a copy to every server queue registered for the topic
//! - server: the `(topic, server)` queue, created on first use
//! - otherwise: the shared topic queue
//!
//! A listener polls its `(topic, server)` queue before the shared topic
//! queue, sleeping a fixed backoff when both are empty. Replies travel over a
//! single-use [`ReplyChannel`] that every copy of a message shares.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use courier_types::{FailureRecord, Priority, RequestContext, Target};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::debug;

use super::base::{Driver, DriverError, IncomingMessage, Listener, SendOptions};
use super::envelope::{EnvelopeVersion, deserialize_msg, serialize_msg};
use crate::remote::{Failure, FailureDecoder, serialize_remote_exception};

/// Registry name of the in-memory driver.
pub const FAKE_DRIVER: &str = "fake";

type ReplyPayload = (Option<Value>, Option<FailureRecord>);

// ---------------------------------------------------------------------------
// Reply channel
// ---------------------------------------------------------------------------

/// Single-slot, single-use reply handoff. Clones share the slot; the first
/// writer wins and later writes are dropped.
#[derive(Debug, Clone)]
pub struct ReplyChannel {
    slot: Arc<Mutex<Option<oneshot::Sender<ReplyPayload>>>>,
}

impl ReplyChannel {
    fn new() -> (Self, oneshot::Receiver<ReplyPayload>) {
        let (tx, rx) = oneshot::channel();
        let channel = Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (channel, rx)
    }

    /// Returns `false` if a reply was already sent or the caller gave up.
    fn send(&self, payload: ReplyPayload) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => tx.send(payload).is_ok(),
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct QueuedMessage {
    ctxt: RequestContext,
    message: Map<String, Value>,
    server: Option<String>,
    fanout: bool,
    reply: Option<ReplyChannel>,
}

#[derive(Debug, Default)]
struct Queues {
    topics: HashMap<String, VecDeque<QueuedMessage>>,
    servers: HashMap<(String, String), VecDeque<QueuedMessage>>,
}

/// One routing domain of the in-memory broker.
#[derive(Debug)]
pub struct FakeExchange {
    name: String,
    queues: Mutex<Queues>,
}

impl FakeExchange {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queues: Mutex::new(Queues::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn deliver_message(&self, topic: &str, queued: QueuedMessage) {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        if queued.fanout {
            for ((t, _), queue) in queues.servers.iter_mut() {
                if t == topic {
                    queue.push_back(queued.clone());
                }
            }
        } else if let Some(server) = &queued.server {
            queues
                .servers
                .entry((topic.to_string(), server.clone()))
                .or_default()
                .push_back(queued);
        } else {
            queues
                .topics
                .entry(topic.to_string())
                .or_default()
                .push_back(queued);
        }
    }

    /// Make `(topic, server)` a fanout destination from now on.
    fn register_server(&self, topic: &str, server: &str) {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .servers
            .entry((topic.to_string(), server.to_string()))
            .or_default();
    }

    fn poll(&self, topic: &str, server: Option<&str>) -> Option<QueuedMessage> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        match server {
            Some(server) => queues
                .servers
                .entry((topic.to_string(), server.to_string()))
                .or_default()
                .pop_front(),
            None => queues.topics.get_mut(topic)?.pop_front(),
        }
    }

    /// Number of messages waiting in one queue.
    pub fn depth(&self, topic: &str, server: Option<&str>) -> usize {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = match server {
            Some(server) => queues.servers.get(&(topic.to_string(), server.to_string())),
            None => queues.topics.get(topic),
        };
        queue.map_or(0, VecDeque::len)
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// In-memory driver. Keeps one exchange per exchange name.
pub struct FakeDriver {
    default_exchange: String,
    exchanges: DashMap<String, Arc<FakeExchange>>,
    decoder: FailureDecoder,
    poll_backoff: Duration,
}

impl FakeDriver {
    pub fn new(
        default_exchange: impl Into<String>,
        decoder: FailureDecoder,
        poll_backoff: Duration,
    ) -> Self {
        Self {
            default_exchange: default_exchange.into(),
            exchanges: DashMap::new(),
            decoder,
            poll_backoff,
        }
    }

    /// The exchange `target` routes through.
    pub fn exchange_for(&self, target: &Target) -> Arc<FakeExchange> {
        let name = target.exchange().unwrap_or(&self.default_exchange);
        self.exchanges
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(FakeExchange::new(name)))
            .clone()
    }

    async fn deliver(
        &self,
        target: &Target,
        ctxt: &RequestContext,
        message: Map<String, Value>,
        options: SendOptions,
    ) -> Result<Option<Value>, DriverError> {
        let topic = target.require_topic()?;
        let exchange = self.exchange_for(target);
        let message = if options.envelope {
            serialize_msg(&message)
        } else {
            message
        };

        let (reply, reply_rx) = if options.wait_for_reply {
            let (channel, rx) = ReplyChannel::new();
            (Some(channel), Some(rx))
        } else {
            (None, None)
        };

        exchange.deliver_message(
            topic,
            QueuedMessage {
                ctxt: ctxt.clone(),
                message,
                server: target.server().map(str::to_string),
                fanout: target.fanout(),
                reply,
            },
        );
        debug!(exchange = exchange.name(), %target, "delivered message");

        let Some(reply_rx) = reply_rx else {
            return Ok(None);
        };

        let timed_out = || DriverError::Timeout {
            topic: topic.to_string(),
        };
        let received = match options.timeout {
            Some(timeout) => tokio::time::timeout(timeout, reply_rx)
                .await
                .map_err(|_| timed_out())?,
            None => reply_rx.await,
        };

        match received {
            Ok((_, Some(failure))) => Err(DriverError::Remote(self.decoder.deserialize(failure))),
            Ok((reply, None)) => Ok(reply),
            // Every copy was dropped unanswered; no reply can arrive.
            Err(_) => Err(timed_out()),
        }
    }
}

impl Driver for FakeDriver {
    fn name(&self) -> &str {
        FAKE_DRIVER
    }

    async fn send(
        &self,
        target: &Target,
        ctxt: &RequestContext,
        message: Map<String, Value>,
        options: SendOptions,
    ) -> Result<Option<Value>, DriverError> {
        self.deliver(target, ctxt, message, options).await
    }

    async fn send_notification(
        &self,
        target: &Target,
        ctxt: &RequestContext,
        message: Map<String, Value>,
        version: EnvelopeVersion,
    ) -> Result<(), DriverError> {
        let options = SendOptions {
            envelope: version == EnvelopeVersion::V2,
            ..SendOptions::cast()
        };
        self.deliver(target, ctxt, message, options).await?;
        Ok(())
    }

    async fn listen(&self, target: &Target) -> Result<Box<dyn Listener>, DriverError> {
        let topic = target.require_topic()?.to_string();
        let exchange = self.exchange_for(target);

        let mut sources = Vec::with_capacity(2);
        if let Some(server) = target.server() {
            exchange.register_server(&topic, server);
            sources.push(PollSource {
                exchange: exchange.clone(),
                topic: topic.clone(),
                server: Some(server.to_string()),
            });
        }
        sources.push(PollSource {
            exchange,
            topic,
            server: None,
        });

        Ok(Box::new(FakeListener {
            sources,
            backoff: self.poll_backoff,
        }))
    }

    async fn listen_for_notifications(
        &self,
        targets_and_priorities: &[(Target, Priority)],
    ) -> Result<Box<dyn Listener>, DriverError> {
        let mut sources = Vec::with_capacity(targets_and_priorities.len());
        for (target, priority) in targets_and_priorities {
            let topic = target.require_topic()?;
            sources.push(PollSource {
                exchange: self.exchange_for(target),
                topic: format!("{topic}.{}", priority.as_str()),
                server: None,
            });
        }
        Ok(Box::new(FakeListener {
            sources,
            backoff: self.poll_backoff,
        }))
    }
}

// ---------------------------------------------------------------------------
// Listener and incoming message
// ---------------------------------------------------------------------------

struct PollSource {
    exchange: Arc<FakeExchange>,
    topic: String,
    server: Option<String>,
}

/// Polls its sources in order, sleeping `backoff` between empty rounds.
pub struct FakeListener {
    sources: Vec<PollSource>,
    backoff: Duration,
}

impl Listener for FakeListener {
    fn poll(&mut self) -> BoxFuture<'_, Result<Box<dyn IncomingMessage>, DriverError>> {
        Box::pin(async move {
            loop {
                for source in &self.sources {
                    let Some(queued) = source.exchange.poll(&source.topic, source.server.as_deref())
                    else {
                        continue;
                    };
                    let message = deserialize_msg(queued.message.clone())?;
                    let incoming = FakeIncomingMessage {
                        exchange: source.exchange.clone(),
                        topic: source.topic.clone(),
                        queued,
                        message,
                    };
                    incoming.acknowledge();
                    return Ok(Box::new(incoming) as Box<dyn IncomingMessage>);
                }
                tokio::time::sleep(self.backoff).await;
            }
        })
    }
}

/// A message taken off a fake exchange queue.
pub struct FakeIncomingMessage {
    exchange: Arc<FakeExchange>,
    topic: String,
    queued: QueuedMessage,
    message: Map<String, Value>,
}

impl IncomingMessage for FakeIncomingMessage {
    fn ctxt(&self) -> &RequestContext {
        &self.queued.ctxt
    }

    fn message(&self) -> &Map<String, Value> {
        &self.message
    }

    fn reply(
        &self,
        reply: Option<Value>,
        failure: Option<Failure>,
    ) -> BoxFuture<'_, Result<(), DriverError>> {
        Box::pin(async move {
            if let Some(channel) = &self.queued.reply {
                let failure = failure.map(|f| serialize_remote_exception(&f, false));
                if !channel.send((reply, failure)) {
                    debug!(topic = %self.topic, "reply dropped, caller is gone or already answered");
                }
            }
            Ok(())
        })
    }

    fn requeue(&self) -> BoxFuture<'_, Result<(), DriverError>> {
        Box::pin(async move {
            self.exchange
                .deliver_message(&self.topic, self.queued.clone());
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
