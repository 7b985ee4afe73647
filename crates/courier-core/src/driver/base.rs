//! The contract every transport driver implements.
//!
//! A driver moves JSON envelopes between processes. It is asked to send
//! (optionally waiting for a correlated reply), to send notifications, and to
//! open listeners that yield [`IncomingMessage`]s. Everything above this
//! module (executor, dispatchers, clients) is written against these traits
//! only.

use std::future::Future;
use std::time::Duration;

use courier_types::{Priority, RequestContext, Target, TargetError};
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use thiserror::Error;

use super::envelope::{EnvelopeError, EnvelopeVersion};
use crate::remote::{Failure, RemoteFailure};

/// Errors surfaced by a driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The transport could not accept or deliver the message.
    #[error("{0}")]
    Transport(String),

    /// No reply arrived within the timeout.
    #[error("No reply on topic {topic}")]
    Timeout { topic: String },

    /// The remote handler failed.
    #[error(transparent)]
    Remote(#[from] RemoteFailure),

    #[error("invalid target: {0}")]
    InvalidTarget(#[from] TargetError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

/// Per-send options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub wait_for_reply: bool,
    /// Upper bound on the reply wait. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Wrap the message in the versioned wire envelope.
    pub envelope: bool,
}

impl SendOptions {
    /// Fire-and-forget.
    pub fn cast() -> Self {
        Self::default()
    }

    /// Wait up to `timeout` for a reply.
    pub fn call(timeout: Option<Duration>) -> Self {
        Self {
            wait_for_reply: true,
            timeout,
            envelope: false,
        }
    }
}

/// A transport driver.
///
/// Uses native async fn in traits (RPITIT). For runtime selection wrap an
/// implementation in [`BoxDriver`](super::box_driver::BoxDriver).
pub trait Driver: Send + Sync {
    /// Registry name of the driver (e.g. "fake").
    fn name(&self) -> &str;

    /// Deliver `message` to `target`. With `wait_for_reply` the returned
    /// future resolves to the reply value (`None` for an empty reply).
    fn send(
        &self,
        target: &Target,
        ctxt: &RequestContext,
        message: Map<String, Value>,
        options: SendOptions,
    ) -> impl Future<Output = Result<Option<Value>, DriverError>> + Send;

    /// Deliver a notification. Never waits for a reply.
    fn send_notification(
        &self,
        target: &Target,
        ctxt: &RequestContext,
        message: Map<String, Value>,
        version: EnvelopeVersion,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Open a listener for messages addressed to `target`.
    fn listen(
        &self,
        target: &Target,
    ) -> impl Future<Output = Result<Box<dyn Listener>, DriverError>> + Send;

    /// Open a listener for notifications on every `(target, priority)` pair.
    fn listen_for_notifications(
        &self,
        targets_and_priorities: &[(Target, Priority)],
    ) -> impl Future<Output = Result<Box<dyn Listener>, DriverError>> + Send;
}

/// A source of incoming messages.
pub trait Listener: Send {
    /// Wait until a message is available.
    fn poll(&mut self) -> BoxFuture<'_, Result<Box<dyn IncomingMessage>, DriverError>>;
}

/// One received message.
///
/// The executor calls exactly one of `reply`/`requeue` (or neither for
/// fire-and-forget messages with no result), then `done()` exactly once.
pub trait IncomingMessage: Send + Sync {
    fn ctxt(&self) -> &RequestContext;

    fn message(&self) -> &Map<String, Value>;

    /// Send a result or a failure back to the sender. A no-op when the
    /// sender is not waiting.
    fn reply(
        &self,
        reply: Option<Value>,
        failure: Option<Failure>,
    ) -> BoxFuture<'_, Result<(), DriverError>>;

    /// Put the message back for redelivery.
    fn requeue(&self) -> BoxFuture<'_, Result<(), DriverError>>;

    /// Acknowledge receipt to the transport.
    fn acknowledge(&self) {}

    /// Release listener-side bookkeeping for this message.
    fn done(&self) {}
}
