//! BoxDriver -- object-safe dynamic dispatch wrapper for [`Driver`].
//!
//! `Driver` uses RPITIT and cannot be a trait object, so:
//! 1. `DriverDyn` restates it with boxed futures
//! 2. a blanket impl covers every `T: Driver`
//! 3. `BoxDriver` wraps `Box<dyn DriverDyn>` and delegates

use courier_types::{Priority, RequestContext, Target};
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use super::base::{Driver, DriverError, Listener, SendOptions};
use super::envelope::EnvelopeVersion;

/// Object-safe version of [`Driver`] with boxed futures.
pub trait DriverDyn: Send + Sync {
    fn name(&self) -> &str;

    fn send_boxed<'a>(
        &'a self,
        target: &'a Target,
        ctxt: &'a RequestContext,
        message: Map<String, Value>,
        options: SendOptions,
    ) -> BoxFuture<'a, Result<Option<Value>, DriverError>>;

    fn send_notification_boxed<'a>(
        &'a self,
        target: &'a Target,
        ctxt: &'a RequestContext,
        message: Map<String, Value>,
        version: EnvelopeVersion,
    ) -> BoxFuture<'a, Result<(), DriverError>>;

    fn listen_boxed<'a>(
        &'a self,
        target: &'a Target,
    ) -> BoxFuture<'a, Result<Box<dyn Listener>, DriverError>>;

    fn listen_for_notifications_boxed<'a>(
        &'a self,
        targets_and_priorities: &'a [(Target, Priority)],
    ) -> BoxFuture<'a, Result<Box<dyn Listener>, DriverError>>;
}

impl<T: Driver> DriverDyn for T {
    fn name(&self) -> &str {
        Driver::name(self)
    }

    fn send_boxed<'a>(
        &'a self,
        target: &'a Target,
        ctxt: &'a RequestContext,
        message: Map<String, Value>,
        options: SendOptions,
    ) -> BoxFuture<'a, Result<Option<Value>, DriverError>> {
        Box::pin(self.send(target, ctxt, message, options))
    }

    fn send_notification_boxed<'a>(
        &'a self,
        target: &'a Target,
        ctxt: &'a RequestContext,
        message: Map<String, Value>,
        version: EnvelopeVersion,
    ) -> BoxFuture<'a, Result<(), DriverError>> {
        Box::pin(self.send_notification(target, ctxt, message, version))
    }

    fn listen_boxed<'a>(
        &'a self,
        target: &'a Target,
    ) -> BoxFuture<'a, Result<Box<dyn Listener>, DriverError>> {
        Box::pin(self.listen(target))
    }

    fn listen_for_notifications_boxed<'a>(
        &'a self,
        targets_and_priorities: &'a [(Target, Priority)],
    ) -> BoxFuture<'a, Result<Box<dyn Listener>, DriverError>> {
        Box::pin(self.listen_for_notifications(targets_and_priorities))
    }
}

/// Type-erased driver, selected at runtime from the transport URL scheme.
pub struct BoxDriver {
    inner: Box<dyn DriverDyn>,
}

impl BoxDriver {
    pub fn new<T: Driver + 'static>(driver: T) -> Self {
        Self {
            inner: Box::new(driver),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn send(
        &self,
        target: &Target,
        ctxt: &RequestContext,
        message: Map<String, Value>,
        options: SendOptions,
    ) -> Result<Option<Value>, DriverError> {
        self.inner.send_boxed(target, ctxt, message, options).await
    }

    pub async fn send_notification(
        &self,
        target: &Target,
        ctxt: &RequestContext,
        message: Map<String, Value>,
        version: EnvelopeVersion,
    ) -> Result<(), DriverError> {
        self.inner
            .send_notification_boxed(target, ctxt, message, version)
            .await
    }

    pub async fn listen(&self, target: &Target) -> Result<Box<dyn Listener>, DriverError> {
        self.inner.listen_boxed(target).await
    }

    pub async fn listen_for_notifications(
        &self,
        targets_and_priorities: &[(Target, Priority)],
    ) -> Result<Box<dyn Listener>, DriverError> {
        self.inner
            .listen_for_notifications_boxed(targets_and_priorities)
            .await
    }
}

impl std::fmt::Debug for BoxDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxDriver").field("name", &self.name()).finish()
    }
}
