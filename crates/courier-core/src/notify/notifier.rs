//! Publishing notifications.
//!
//! A `Notifier` builds the notification envelope and hands it to each of
//! its notify drivers. Drivers are looked up by name in a
//! [`NotifyDriverRegistry`]:
//!
//! | name          | behaviour                                          |
//! |---------------|----------------------------------------------------|
//! | `messaging`   | send to `"{topic}.{priority}"` on the transport     |
//! | `messagingv2` | same, wrapped in the 2.0 wire envelope              |
//! | `log`         | emit a tracing event                                |
//! | `noop`        | drop the notification                               |
//!
//! A failing driver is logged and never fails the publisher.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use courier_types::{Notification, Priority, RequestContext, Target};
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::driver::{DriverError, EnvelopeVersion, RegistryError};
use crate::serializer::{NoOpSerializer, Serializer, SerializerError};
use crate::transport::Transport;

pub const MESSAGING_DRIVER: &str = "messaging";
pub const MESSAGING_V2_DRIVER: &str = "messagingv2";
pub const LOG_DRIVER: &str = "log";
pub const NOOP_DRIVER: &str = "noop";

/// Where a notification goes once it is built.
pub trait NotifyDriver: Send + Sync {
    fn notify<'a>(
        &'a self,
        ctxt: &'a RequestContext,
        message: &'a Map<String, Value>,
        priority: Priority,
    ) -> BoxFuture<'a, Result<(), DriverError>>;
}

// ---------------------------------------------------------------------------
// Built-in drivers
// ---------------------------------------------------------------------------

/// Sends notifications over the transport, one send per topic.
pub struct MessagingDriver {
    transport: Transport,
    topics: Vec<String>,
    version: EnvelopeVersion,
}

impl MessagingDriver {
    pub fn new(transport: Transport, topics: Vec<String>, version: EnvelopeVersion) -> Self {
        Self {
            transport,
            topics,
            version,
        }
    }
}

impl NotifyDriver for MessagingDriver {
    fn notify<'a>(
        &'a self,
        ctxt: &'a RequestContext,
        message: &'a Map<String, Value>,
        priority: Priority,
    ) -> BoxFuture<'a, Result<(), DriverError>> {
        Box::pin(async move {
            for topic in &self.topics {
                let target = Target::for_topic(format!("{topic}.{}", priority.as_str()));
                if let Err(err) = self
                    .transport
                    .send_notification(&target, ctxt, message.clone(), self.version)
                    .await
                {
                    error!(%target, error = %err, "Could not send notification");
                }
            }
            Ok(())
        })
    }
}

/// Writes notifications to the log.
pub struct LogDriver;

impl NotifyDriver for LogDriver {
    fn notify<'a>(
        &'a self,
        _ctxt: &'a RequestContext,
        message: &'a Map<String, Value>,
        priority: Priority,
    ) -> BoxFuture<'a, Result<(), DriverError>> {
        Box::pin(async move {
            let event_type = message.get("event_type").and_then(Value::as_str).unwrap_or("");
            let body = Value::Object(message.clone());
            match priority {
                Priority::Debug => debug!(%event_type, %priority, notification = %body),
                Priority::Warn => warn!(%event_type, %priority, notification = %body),
                Priority::Error | Priority::Critical => {
                    error!(%event_type, %priority, notification = %body)
                }
                Priority::Audit | Priority::Info | Priority::Sample => {
                    info!(%event_type, %priority, notification = %body)
                }
            }
            Ok(())
        })
    }
}

pub struct NoOpDriver;

impl NotifyDriver for NoOpDriver {
    fn notify<'a>(
        &'a self,
        _ctxt: &'a RequestContext,
        _message: &'a Map<String, Value>,
        _priority: Priority,
    ) -> BoxFuture<'a, Result<(), DriverError>> {
        Box::pin(async { Ok(()) })
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Builds a notify driver for a transport and a topic list.
pub type NotifyDriverFactory =
    Arc<dyn Fn(&Transport, &[String]) -> Arc<dyn NotifyDriver> + Send + Sync>;

/// Notify driver factories by name.
pub struct NotifyDriverRegistry {
    factories: HashMap<String, NotifyDriverFactory>,
}

impl NotifyDriverRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// `messaging`, `messagingv2`, `log` and `noop`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            MESSAGING_DRIVER,
            Arc::new(|transport: &Transport, topics: &[String]| -> Arc<dyn NotifyDriver> {
                Arc::new(MessagingDriver::new(
                    transport.clone(),
                    topics.to_vec(),
                    EnvelopeVersion::V1,
                ))
            }),
        );
        registry.register(
            MESSAGING_V2_DRIVER,
            Arc::new(|transport: &Transport, topics: &[String]| -> Arc<dyn NotifyDriver> {
                Arc::new(MessagingDriver::new(
                    transport.clone(),
                    topics.to_vec(),
                    EnvelopeVersion::V2,
                ))
            }),
        );
        registry.register(
            LOG_DRIVER,
            Arc::new(|_: &Transport, _: &[String]| -> Arc<dyn NotifyDriver> { Arc::new(LogDriver) }),
        );
        registry.register(
            NOOP_DRIVER,
            Arc::new(|_: &Transport, _: &[String]| -> Arc<dyn NotifyDriver> { Arc::new(NoOpDriver) }),
        );
        registry
    }

    /// Register a factory. An existing entry with the same name is replaced.
    pub fn register(&mut self, name: impl Into<String>, factory: NotifyDriverFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn get(&self, name: &str) -> Result<&NotifyDriverFactory, RegistryError> {
        self.factories
            .get(name)
            .ok_or_else(|| RegistryError::UnknownNotifyDriver(name.to_string()))
    }

    pub fn list_names(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for NotifyDriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Overrides for [`Notifier::new`]. Unset fields come from the transport's
/// configuration.
#[derive(Default)]
pub struct NotifierOptions {
    /// A single driver instead of `notification_driver`.
    pub driver: Option<String>,
    /// A single topic instead of `notification_topics`.
    pub topic: Option<String>,
    pub serializer: Option<Arc<dyn Serializer>>,
}

/// Sends notifications through the configured notify drivers.
#[derive(Clone)]
pub struct Notifier {
    transport: Transport,
    publisher_id: String,
    drivers: Vec<(String, Arc<dyn NotifyDriver>)>,
    topics: Vec<String>,
    serializer: Arc<dyn Serializer>,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let drivers: Vec<&str> = self.drivers.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("Notifier")
            .field("publisher_id", &self.publisher_id)
            .field("drivers", &drivers)
            .field("topics", &self.topics)
            .finish()
    }
}

impl Notifier {
    /// Build a notifier. Fails if a driver name is not registered.
    pub fn new(
        transport: Transport,
        publisher_id: impl Into<String>,
        registry: &NotifyDriverRegistry,
        options: NotifierOptions,
    ) -> Result<Self, RegistryError> {
        let config = transport.config();
        let driver_names = match options.driver {
            Some(driver) => vec![driver],
            None => config.notification_driver.clone(),
        };
        let topics = match options.topic {
            Some(topic) => vec![topic],
            None => config.notification_topics.clone(),
        };

        let mut drivers = Vec::with_capacity(driver_names.len());
        for name in driver_names {
            let driver = (registry.get(&name)?)(&transport, &topics);
            drivers.push((name, driver));
        }

        Ok(Self {
            transport,
            publisher_id: publisher_id.into(),
            drivers,
            topics,
            serializer: options
                .serializer
                .unwrap_or_else(|| Arc::new(NoOpSerializer)),
        })
    }

    pub fn publisher_id(&self) -> &str {
        &self.publisher_id
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// A notifier sharing this one's drivers under another publisher id.
    pub fn prepare(&self, publisher_id: impl Into<String>) -> Self {
        Self {
            publisher_id: publisher_id.into(),
            ..self.clone()
        }
    }

    /// Build a notification and hand it to every driver.
    pub async fn notify(
        &self,
        ctxt: &RequestContext,
        event_type: &str,
        payload: Value,
        priority: Priority,
    ) -> Result<(), SerializerError> {
        let payload = self.serializer.serialize_entity(ctxt, payload)?;
        let message = Notification::new(&self.publisher_id, event_type, priority, payload).to_wire();

        for (name, driver) in &self.drivers {
            if let Err(err) = driver.notify(ctxt, &message, priority).await {
                error!(
                    driver = %name,
                    error = %err,
                    payload = %message.get("payload").unwrap_or(&serde_json::Value::Null),
                    "Problem attempting to send to notification system"
                );
            }
        }
        Ok(())
    }

    pub async fn audit(&self, ctxt: &RequestContext, event_type: &str, payload: Value) -> Result<(), SerializerError> {
        self.notify(ctxt, event_type, payload, Priority::Audit).await
    }

    pub async fn debug(&self, ctxt: &RequestContext, event_type: &str, payload: Value) -> Result<(), SerializerError> {
        self.notify(ctxt, event_type, payload, Priority::Debug).await
    }

    pub async fn info(&self, ctxt: &RequestContext, event_type: &str, payload: Value) -> Result<(), SerializerError> {
        self.notify(ctxt, event_type, payload, Priority::Info).await
    }

    pub async fn warn(&self, ctxt: &RequestContext, event_type: &str, payload: Value) -> Result<(), SerializerError> {
        self.notify(ctxt, event_type, payload, Priority::Warn).await
    }

    pub async fn error(&self, ctxt: &RequestContext, event_type: &str, payload: Value) -> Result<(), SerializerError> {
        self.notify(ctxt, event_type, payload, Priority::Error).await
    }

    pub async fn critical(&self, ctxt: &RequestContext, event_type: &str, payload: Value) -> Result<(), SerializerError> {
        self.notify(ctxt, event_type, payload, Priority::Critical).await
    }

    pub async fn sample(&self, ctxt: &RequestContext, event_type: &str, payload: Value) -> Result<(), SerializerError> {
        self.notify(ctxt, event_type, payload, Priority::Sample).await
    }
}
