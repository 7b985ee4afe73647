//! Messaging runtime for Courier.
//!
//! This crate defines the driver contract and the pieces built on it: the
//! in-memory reference driver, the transport handle, the executor that
//! drives listeners, RPC clients and servers, notifiers and notification
//! listeners, and the marshalling of handler failures across processes.
//! It depends only on `courier-types`; real brokers plug in as drivers.

pub mod driver;
pub mod executor;
pub mod local_context;
pub mod notify;
pub mod remote;
pub mod rpc;
pub mod serializer;
pub mod server;
pub mod transport;

pub use executor::{Executor, ExecutorKind, ExecutorState, HandlerError, MessageCallback};
pub use remote::{ExceptionRegistry, Failure, FailureDecoder, RemoteError, RemoteException, RemoteFailure};
pub use serializer::{NoOpSerializer, Serializer, SerializerError};
pub use server::{Dispatcher, MessageHandlingServer, ServerError};
pub use transport::{Transport, TransportError, get_transport};
