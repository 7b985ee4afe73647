//! Notification listeners: a [`NotificationDispatcher`] behind a message
//! handling server.

use std::sync::Arc;

use courier_types::Target;

use crate::executor::ExecutorKind;
use crate::notify::dispatcher::{NotificationDispatcher, NotificationEndpoint};
use crate::serializer::Serializer;
use crate::server::MessageHandlingServer;
use crate::transport::Transport;

pub type NotificationListener = MessageHandlingServer<NotificationDispatcher>;

/// Build a listener delivering notifications published on `targets` to
/// `endpoints`. Only the priorities some endpoint declares are subscribed.
pub fn get_notification_listener(
    transport: Transport,
    targets: Vec<Target>,
    endpoints: Vec<Arc<dyn NotificationEndpoint>>,
    kind: ExecutorKind,
    serializer: Option<Arc<dyn Serializer>>,
) -> NotificationListener {
    let dispatcher = NotificationDispatcher::new(targets, endpoints, serializer);
    MessageHandlingServer::new(transport, dispatcher, kind)
}
