pub mod client;
pub mod dispatcher;
pub mod server;

pub use client::{CallContext, ClientError, LockCheck, Prepare, RpcClient};
pub use dispatcher::{RpcDispatchError, RpcDispatcher, RpcEndpoint};
pub use server::{RpcServer, get_rpc_server};
