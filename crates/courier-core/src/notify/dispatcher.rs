//! Routes notifications to endpoint handlers by priority.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use courier_types::{Priority, RequestContext, Target};
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::driver::{DriverError, Listener};
use crate::executor::{HandlerError, MessageCallback};
use crate::local_context;
use crate::serializer::{NoOpSerializer, Serializer};
use crate::server::Dispatcher;
use crate::transport::Transport;

/// Receives notifications for the priorities it declares.
pub trait NotificationEndpoint: Send + Sync {
    /// Priorities this endpoint handles. Read once, when the dispatcher is
    /// built.
    fn priorities(&self) -> Vec<Priority>;

    /// Handle one notification. Return `HandlerError::Requeue` to have it
    /// redelivered.
    fn handle<'a>(
        &'a self,
        priority: Priority,
        ctxt: &'a RequestContext,
        publisher_id: &'a str,
        event_type: &'a str,
        payload: Value,
    ) -> BoxFuture<'a, Result<(), HandlerError>>;
}

pub struct NotificationDispatcher {
    targets: Vec<Target>,
    by_priority: BTreeMap<Priority, Vec<Arc<dyn NotificationEndpoint>>>,
    serializer: Arc<dyn Serializer>,
}

impl NotificationDispatcher {
    pub fn new(
        targets: Vec<Target>,
        endpoints: Vec<Arc<dyn NotificationEndpoint>>,
        serializer: Option<Arc<dyn Serializer>>,
    ) -> Self {
        let mut by_priority: BTreeMap<Priority, Vec<Arc<dyn NotificationEndpoint>>> = BTreeMap::new();
        for endpoint in &endpoints {
            let declared: BTreeSet<Priority> = endpoint.priorities().into_iter().collect();
            for priority in declared {
                by_priority.entry(priority).or_default().push(endpoint.clone());
            }
        }

        Self {
            targets,
            by_priority,
            serializer: serializer.unwrap_or_else(|| Arc::new(NoOpSerializer)),
        }
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Every `(target, priority)` pair some endpoint is interested in.
    pub fn subscriptions(&self) -> Vec<(Target, Priority)> {
        self.targets
            .iter()
            .flat_map(|target| {
                self.by_priority
                    .keys()
                    .map(move |priority| (target.clone(), *priority))
            })
            .collect()
    }

    /// Deliver one notification to the handlers of its priority, in
    /// registration order.
    pub async fn dispatch(
        &self,
        ctxt: &RequestContext,
        message: &Map<String, Value>,
    ) -> Result<(), HandlerError> {
        let ctxt = self
            .serializer
            .deserialize_context(ctxt)
            .map_err(|e| HandlerError::failed(&e))?;

        let raw_priority = message.get("priority").and_then(Value::as_str).unwrap_or("");
        let Ok(priority) = raw_priority.parse::<Priority>() else {
            warn!(priority = %raw_priority, "Unknown priority \"{}\"", raw_priority.to_lowercase());
            return Ok(());
        };
        let publisher_id = message.get("publisher_id").and_then(Value::as_str).unwrap_or("");
        let event_type = message.get("event_type").and_then(Value::as_str).unwrap_or("");

        let payload = message.get("payload").cloned().unwrap_or(Value::Null);
        let payload = self
            .serializer
            .deserialize_entity(&ctxt, payload)
            .map_err(|e| HandlerError::failed(&e))?;

        let Some(endpoints) = self.by_priority.get(&priority) else {
            debug!(%priority, %event_type, "no handler for notification priority");
            return Ok(());
        };

        for endpoint in endpoints {
            let handled = local_context::scope(
                ctxt.clone(),
                endpoint.handle(priority, &ctxt, publisher_id, event_type, payload.clone()),
            )
            .await;
            match handled {
                Ok(()) => {}
                Err(HandlerError::Requeue) => return Err(HandlerError::Requeue),
                Err(HandlerError::Failed(failure)) => {
                    error!(
                        %priority,
                        %event_type,
                        %publisher_id,
                        class = %failure.class,
                        "Exception during notification handling: {}",
                        failure.message
                    );
                }
            }
        }
        Ok(())
    }
}

impl MessageCallback for NotificationDispatcher {
    async fn call(
        &self,
        ctxt: &RequestContext,
        message: &Map<String, Value>,
    ) -> Result<Option<Value>, HandlerError> {
        self.dispatch(ctxt, message).await.map(|()| None)
    }
}

impl Dispatcher for NotificationDispatcher {
    async fn listen(&self, transport: &Transport) -> Result<Box<dyn Listener>, DriverError> {
        transport
            .listen_for_notifications(&self.subscriptions())
            .await
    }
}
