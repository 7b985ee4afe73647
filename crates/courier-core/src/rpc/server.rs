//! RPC servers: an [`RpcDispatcher`] behind a message handling server.

use std::sync::Arc;

use courier_types::Target;

use crate::executor::ExecutorKind;
use crate::rpc::dispatcher::{RpcDispatcher, RpcEndpoint};
use crate::serializer::Serializer;
use crate::server::MessageHandlingServer;
use crate::transport::Transport;

pub type RpcServer = MessageHandlingServer<RpcDispatcher>;

/// Build a server for `endpoints` on `target`. The target must name both a
/// topic and a server; that is checked by `start()`.
pub fn get_rpc_server(
    transport: Transport,
    target: Target,
    endpoints: Vec<Arc<dyn RpcEndpoint>>,
    kind: ExecutorKind,
    serializer: Option<Arc<dyn Serializer>>,
) -> RpcServer {
    let dispatcher = RpcDispatcher::new(target, endpoints, serializer);
    MessageHandlingServer::new(transport, dispatcher, kind)
}
