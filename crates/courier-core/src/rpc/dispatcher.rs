//! Routes RPC call envelopes to endpoint methods.
//!
//! An endpoint is selected by namespace and version: the first endpoint in
//! registration order whose namespace equals the requested one, whose
//! version is compatible with the requested one, and which implements the
//! method gets the call.

use std::sync::Arc;

use courier_types::{ApiVersion, RequestContext, RpcMessage, Target};
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::driver::{DriverError, Listener};
use crate::executor::{HandlerError, MessageCallback};
use crate::local_context;
use crate::remote::Failure;
use crate::serializer::{NoOpSerializer, Serializer};
use crate::server::Dispatcher;
use crate::transport::Transport;

/// Version assumed for endpoints and requests that do not state one.
pub const DEFAULT_VERSION: &str = "1.0";

#[derive(Debug, Error)]
pub enum RpcDispatchError {
    #[error("Endpoint does not support RPC method {method}")]
    NoSuchMethod { method: String },

    #[error("Endpoint does not support RPC version {version}")]
    UnsupportedVersion { version: String },

    #[error("malformed RPC message: {0}")]
    Malformed(String),
}

impl RpcDispatchError {
    /// Failure class seen by the caller.
    pub fn class_name(&self) -> &'static str {
        match self {
            RpcDispatchError::NoSuchMethod { .. } => "NoSuchMethod",
            RpcDispatchError::UnsupportedVersion { .. } => "UnsupportedVersion",
            RpcDispatchError::Malformed(_) => "MalformedMessage",
        }
    }
}

impl From<RpcDispatchError> for HandlerError {
    fn from(err: RpcDispatchError) -> Self {
        let mut failure = Failure::from_error(&err);
        failure.class = err.class_name().to_string();
        HandlerError::Failed(failure)
    }
}

/// A group of methods callable over RPC.
pub trait RpcEndpoint: Send + Sync {
    /// Namespace the methods live in. `None` is the default namespace.
    fn namespace(&self) -> Option<&str> {
        None
    }

    /// API version implemented, "major.minor".
    fn version(&self) -> &str {
        DEFAULT_VERSION
    }

    /// Names of the methods `invoke` accepts.
    fn methods(&self) -> &[&str];

    fn invoke<'a>(
        &'a self,
        ctxt: &'a RequestContext,
        method: &'a str,
        args: Map<String, Value>,
    ) -> BoxFuture<'a, Result<Value, HandlerError>>;
}

pub struct RpcDispatcher {
    target: Target,
    endpoints: Vec<Arc<dyn RpcEndpoint>>,
    serializer: Arc<dyn Serializer>,
}

impl RpcDispatcher {
    pub fn new(
        target: Target,
        endpoints: Vec<Arc<dyn RpcEndpoint>>,
        serializer: Option<Arc<dyn Serializer>>,
    ) -> Self {
        Self {
            target,
            endpoints,
            serializer: serializer.unwrap_or_else(|| Arc::new(NoOpSerializer)),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Handle one call envelope. Always produces a result so the caller gets
    /// a reply.
    pub async fn dispatch(
        &self,
        ctxt: &RequestContext,
        message: &Map<String, Value>,
    ) -> Result<Value, HandlerError> {
        let ctxt = self
            .serializer
            .deserialize_context(ctxt)
            .map_err(|e| HandlerError::failed(&e))?;
        let msg = RpcMessage::from_wire(message)
            .map_err(|e| RpcDispatchError::Malformed(e.to_string()))?;

        let version = msg.version.as_deref().unwrap_or(DEFAULT_VERSION);
        let requested: ApiVersion = version
            .parse::<ApiVersion>()
            .map_err(|e| RpcDispatchError::Malformed(e.to_string()))?;

        let mut found_compatible = false;
        for endpoint in &self.endpoints {
            if endpoint.namespace() != msg.namespace.as_deref() {
                continue;
            }
            let compatible = endpoint
                .version()
                .parse::<ApiVersion>()
                .is_ok_and(|available| requested.is_compatible_with(&available));
            if !compatible {
                continue;
            }
            if !endpoint.methods().contains(&msg.method.as_str()) {
                found_compatible = true;
                continue;
            }

            debug!(method = %msg.method, namespace = ?msg.namespace, %version, "dispatching rpc call");
            let mut args = Map::new();
            for (name, value) in msg.args {
                let value = self
                    .serializer
                    .deserialize_entity(&ctxt, value)
                    .map_err(|e| HandlerError::failed(&e))?;
                args.insert(name, value);
            }
            let result =
                local_context::scope(ctxt.clone(), endpoint.invoke(&ctxt, &msg.method, args)).await?;
            return self
                .serializer
                .serialize_entity(&ctxt, result)
                .map_err(|e| HandlerError::failed(&e));
        }

        let err = if found_compatible {
            RpcDispatchError::NoSuchMethod { method: msg.method }
        } else {
            RpcDispatchError::UnsupportedVersion {
                version: version.to_string(),
            }
        };
        Err(err.into())
    }
}

impl MessageCallback for RpcDispatcher {
    async fn call(
        &self,
        ctxt: &RequestContext,
        message: &Map<String, Value>,
    ) -> Result<Option<Value>, HandlerError> {
        self.dispatch(ctxt, message).await.map(Some)
    }
}

impl Dispatcher for RpcDispatcher {
    async fn listen(&self, transport: &Transport) -> Result<Box<dyn Listener>, DriverError> {
        transport.listen(&self.target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Calculator {
        namespace: Option<&'static str>,
        version: &'static str,
        tag: &'static str,
    }

    impl RpcEndpoint for Calculator {
        fn namespace(&self) -> Option<&str> {
            self.namespace
        }

        fn version(&self) -> &str {
            self.version
        }

        fn methods(&self) -> &[&str] {
            &["add", "whoami", "ctxt_user", "fail"]
        }

        fn invoke<'a>(
            &'a self,
            ctxt: &'a RequestContext,
            method: &'a str,
            args: Map<String, Value>,
        ) -> BoxFuture<'a, Result<Value, HandlerError>> {
            Box::pin(async move {
                match method {
                    "add" => {
                        let a = args.get("a").and_then(Value::as_i64).unwrap_or(0);
                        let b = args.get("b").and_then(Value::as_i64).unwrap_or(0);
                        Ok(json!(a + b))
                    }
                    "whoami" => Ok(json!(self.tag)),
                    "ctxt_user" => {
                        let local = local_context::current().unwrap_or_default();
                        assert_eq!(&local, ctxt);
                        Ok(local.get("user").cloned().unwrap_or(Value::Null))
                    }
                    _ => Err(Failure::new("calc", "Overflow", "too big").into()),
                }
            })
        }
    }

    fn endpoint(namespace: Option<&'static str>, version: &'static str, tag: &'static str) -> Arc<dyn RpcEndpoint> {
        Arc::new(Calculator { namespace, version, tag })
    }

    fn dispatcher(endpoints: Vec<Arc<dyn RpcEndpoint>>) -> RpcDispatcher {
        RpcDispatcher::new(Target::for_topic("calc"), endpoints, None)
    }

    fn call(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn failure_of(err: HandlerError) -> Failure {
        match err {
            HandlerError::Failed(f) => f,
            HandlerError::Requeue => panic!("unexpected requeue"),
        }
    }

    #[tokio::test]
    async fn invokes_method_with_args() {
        let d = dispatcher(vec![endpoint(None, "1.0", "a")]);
        let result = d
            .dispatch(&Map::new(), &call(json!({"method": "add", "args": {"a": 2, "b": 3}})))
            .await
            .unwrap();
        assert_eq!(result, json!(5));
    }

    #[tokio::test]
    async fn selects_by_namespace_and_version() {
        let d = dispatcher(vec![
            endpoint(None, "1.0", "default-1"),
            endpoint(Some("admin"), "1.0", "admin-1"),
            endpoint(None, "2.3", "default-2"),
        ]);

        let pick = |msg: Value| {
            let d = &d;
            async move { d.dispatch(&Map::new(), &call(msg)).await.unwrap() }
        };
        assert_eq!(pick(json!({"method": "whoami"})).await, json!("default-1"));
        assert_eq!(
            pick(json!({"method": "whoami", "namespace": "admin"})).await,
            json!("admin-1")
        );
        assert_eq!(
            pick(json!({"method": "whoami", "version": "2.1"})).await,
            json!("default-2")
        );
    }

    #[tokio::test]
    async fn unknown_method_on_compatible_endpoint() {
        let d = dispatcher(vec![endpoint(None, "1.0", "a")]);
        let err = d
            .dispatch(&Map::new(), &call(json!({"method": "divide"})))
            .await
            .unwrap_err();
        let failure = failure_of(err);
        assert_eq!(failure.class, "NoSuchMethod");
        assert_eq!(failure.message, "Endpoint does not support RPC method divide");
    }

    #[tokio::test]
    async fn no_compatible_version() {
        let d = dispatcher(vec![endpoint(None, "1.0", "a")]);
        let err = d
            .dispatch(&Map::new(), &call(json!({"method": "add", "version": "1.5"})))
            .await
            .unwrap_err();
        let failure = failure_of(err);
        assert_eq!(failure.class, "UnsupportedVersion");
        assert_eq!(failure.message, "Endpoint does not support RPC version 1.5");
    }

    #[tokio::test]
    async fn unparsable_version_is_malformed() {
        let d = dispatcher(vec![endpoint(None, "1.0", "a")]);
        let err = d
            .dispatch(&Map::new(), &call(json!({"method": "add", "version": "one"})))
            .await
            .unwrap_err();
        assert_eq!(failure_of(err).class, "MalformedMessage");
    }

    #[tokio::test]
    async fn endpoint_failure_is_passed_through() {
        let d = dispatcher(vec![endpoint(None, "1.0", "a")]);
        let err = d
            .dispatch(&Map::new(), &call(json!({"method": "fail"})))
            .await
            .unwrap_err();
        assert_eq!(failure_of(err).class, "Overflow");
    }

    #[tokio::test]
    async fn handler_sees_local_context() {
        let d = dispatcher(vec![endpoint(None, "1.0", "a")]);
        let mut ctxt = Map::new();
        ctxt.insert("user".to_string(), json!("alice"));
        let result = d
            .dispatch(&ctxt, &call(json!({"method": "ctxt_user"})))
            .await
            .unwrap();
        assert_eq!(result, json!("alice"));
        assert!(local_context::current().is_none());
    }

    #[tokio::test]
    async fn callback_always_replies() {
        let d = dispatcher(vec![endpoint(None, "1.0", "a")]);
        let reply = MessageCallback::call(&d, &Map::new(), &call(json!({"method": "whoami"})))
            .await
            .unwrap();
        assert_eq!(reply, Some(json!("a")));
    }
}
