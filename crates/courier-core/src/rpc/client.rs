//! Invoking methods on remote servers.
//!
//! An [`RpcClient`] holds a default target and call options. `prepare()`
//! derives a [`CallContext`] with some of them overridden for a group of
//! invocations; the client's own `cast`/`call` use its defaults directly.
//!
//! - `cast` sends and returns; only send failures are reported.
//! - `call` waits for the reply up to the effective timeout (the context's
//!   own, else `rpc_response_timeout_secs`) and deserializes it.
//!
//! Both check the version cap, if any, before anything is sent.

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use courier_types::version::version_is_compatible;
use courier_types::{
    MessagingConfig, RequestContext, RpcMessage, Target, TargetBuilder, TargetError, VersionError,
};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::driver::{DriverError, SendOptions};
use crate::remote::RemoteFailure;
use crate::serializer::{NoOpSerializer, Serializer, SerializerError};
use crate::transport::Transport;

/// Returns the names of locks held by the calling code. A non-empty answer
/// makes `call()` log a warning before blocking on the reply.
pub type LockCheck = Arc<dyn Fn(&MessagingConfig) -> Vec<String> + Send + Sync>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Failed to send to target \"{target}\": {source}")]
    Send {
        target: Target,
        #[source]
        source: DriverError,
    },

    #[error("Specified RPC version cap, {version_cap}, is too low. Needs to be higher than {version}.")]
    VersionCap { version: String, version_cap: String },

    #[error("No reply on topic {topic}")]
    Timeout { topic: String },

    #[error(transparent)]
    Remote(#[from] RemoteFailure),

    #[error("invalid target: {0}")]
    InvalidTarget(#[from] TargetError),

    #[error(transparent)]
    InvalidVersion(#[from] VersionError),

    #[error(transparent)]
    Serializer(#[from] SerializerError),
}

impl ClientError {
    fn from_driver(target: &Target, err: DriverError) -> Self {
        match err {
            DriverError::Timeout { topic } => ClientError::Timeout { topic },
            DriverError::Remote(remote) => ClientError::Remote(remote),
            DriverError::InvalidTarget(err) => ClientError::InvalidTarget(err),
            other => ClientError::Send {
                target: target.clone(),
                source: other,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Call context
// ---------------------------------------------------------------------------

/// A target plus call options, ready to invoke methods.
#[derive(Clone)]
pub struct CallContext {
    transport: Transport,
    target: Target,
    serializer: Arc<dyn Serializer>,
    timeout: Option<Duration>,
    check_for_lock: Option<LockCheck>,
    version_cap: Option<String>,
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("target", &self.target)
            .field("timeout", &self.timeout)
            .field("version_cap", &self.version_cap)
            .field("check_for_lock", &self.check_for_lock.is_some())
            .finish()
    }
}

impl CallContext {
    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn version_cap(&self) -> Option<&str> {
        self.version_cap.as_deref()
    }

    /// Derive a context with some options overridden.
    pub fn prepare(&self) -> Prepare {
        Prepare {
            base: self.clone(),
            target: self.target.to_builder(),
        }
    }

    fn make_message(
        &self,
        ctxt: &RequestContext,
        method: &str,
        args: Map<String, Value>,
    ) -> Result<Map<String, Value>, ClientError> {
        let mut serialized = Map::new();
        for (name, arg) in args {
            serialized.insert(name, self.serializer.serialize_entity(ctxt, arg)?);
        }

        let mut msg = RpcMessage::new(method, serialized);
        msg.namespace = self.target.namespace().map(str::to_string);
        msg.version = self.target.version().map(str::to_string);
        Ok(msg.to_wire())
    }

    fn check_version_cap(&self) -> Result<(), ClientError> {
        let (Some(cap), Some(version)) = (self.version_cap.as_deref(), self.target.version()) else {
            return Ok(());
        };
        if version_is_compatible(cap, version)? {
            Ok(())
        } else {
            Err(ClientError::VersionCap {
                version: version.to_string(),
                version_cap: cap.to_string(),
            })
        }
    }

    /// Whether `version` (default: the target's version) fits under the
    /// version cap. Always true without a cap or without a version.
    pub fn can_send_version(&self, version: Option<&str>) -> Result<bool, VersionError> {
        let version = version.or(self.target.version());
        match (self.version_cap.as_deref(), version) {
            (Some(cap), Some(version)) => version_is_compatible(cap, version),
            _ => Ok(true),
        }
    }

    /// Invoke `method` without waiting for a result.
    pub async fn cast(
        &self,
        ctxt: &RequestContext,
        method: &str,
        args: Map<String, Value>,
    ) -> Result<(), ClientError> {
        let msg = self.make_message(ctxt, method, args)?;
        self.check_version_cap()?;

        let ctxt = self.serializer.serialize_context(ctxt)?;
        self.transport
            .send(&self.target, &ctxt, msg, SendOptions::cast())
            .await
            .map_err(|e| ClientError::from_driver(&self.target, e))?;
        debug!(target = %self.target, %method, "cast sent");
        Ok(())
    }

    /// Invoke `method` and wait for its result.
    pub async fn call(
        &self,
        ctxt: &RequestContext,
        method: &str,
        args: Map<String, Value>,
    ) -> Result<Value, ClientError> {
        let msg = self.make_message(ctxt, method, args)?;
        let timeout = self.timeout.unwrap_or_else(|| {
            Duration::from_secs(self.transport.config().rpc_response_timeout_secs)
        });

        if let Some(check) = &self.check_for_lock {
            let locks = check(self.transport.config());
            if !locks.is_empty() {
                warn!(
                    ?locks,
                    backtrace = %Backtrace::force_capture(),
                    "An RPC is being made while holding a lock. This is probably a bug."
                );
            }
        }
        self.check_version_cap()?;

        let wire_ctxt = self.serializer.serialize_context(ctxt)?;
        let reply = self
            .transport
            .send(&self.target, &wire_ctxt, msg, SendOptions::call(Some(timeout)))
            .await
            .map_err(|e| ClientError::from_driver(&self.target, e))?;

        Ok(self
            .serializer
            .deserialize_entity(ctxt, reply.unwrap_or(Value::Null))?)
    }
}

/// Overrides for a derived [`CallContext`]. Unset options keep the base
/// context's values.
pub struct Prepare {
    base: CallContext,
    target: TargetBuilder,
}

impl Prepare {
    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.target = self.target.exchange(exchange);
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.target = self.target.topic(topic);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.target = self.target.namespace(namespace);
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.target = self.target.version(version);
        self
    }

    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.target = self.target.server(server);
        self
    }

    /// Drop the base context's server.
    pub fn any_server(mut self) -> Self {
        self.target = self.target.any_server();
        self
    }

    pub fn fanout(mut self, fanout: bool) -> Self {
        self.target = self.target.fanout(fanout);
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.base.timeout = timeout;
        self
    }

    pub fn version_cap(mut self, version_cap: Option<String>) -> Self {
        self.base.version_cap = version_cap;
        self
    }

    pub fn check_for_lock(mut self, check: Option<LockCheck>) -> Self {
        self.base.check_for_lock = check;
        self
    }

    pub fn build(self) -> Result<CallContext, ClientError> {
        Ok(CallContext {
            target: self.target.build()?,
            ..self.base
        })
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Sends method invocations to remote servers.
#[derive(Debug, Clone)]
pub struct RpcClient {
    base: CallContext,
}

impl RpcClient {
    pub fn new(transport: Transport, target: Target) -> Self {
        Self {
            base: CallContext {
                transport,
                target,
                serializer: Arc::new(NoOpSerializer),
                timeout: None,
                check_for_lock: None,
                version_cap: None,
            },
        }
    }

    pub fn with_serializer(mut self, serializer: Arc<dyn Serializer>) -> Self {
        self.base.serializer = serializer;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.base.timeout = Some(timeout);
        self
    }

    pub fn with_version_cap(mut self, version_cap: impl Into<String>) -> Self {
        self.base.version_cap = Some(version_cap.into());
        self
    }

    pub fn with_lock_check(mut self, check: LockCheck) -> Self {
        self.base.check_for_lock = Some(check);
        self
    }

    pub fn target(&self) -> &Target {
        self.base.target()
    }

    pub fn prepare(&self) -> Prepare {
        self.base.prepare()
    }

    pub async fn cast(
        &self,
        ctxt: &RequestContext,
        method: &str,
        args: Map<String, Value>,
    ) -> Result<(), ClientError> {
        self.base.cast(ctxt, method, args).await
    }

    pub async fn call(
        &self,
        ctxt: &RequestContext,
        method: &str,
        args: Map<String, Value>,
    ) -> Result<Value, ClientError> {
        self.base.call(ctxt, method, args).await
    }

    pub fn can_send_version(&self, version: Option<&str>) -> Result<bool, VersionError> {
        self.base.can_send_version(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use crate::driver::DriverRegistry;
    use crate::remote::ExceptionRegistry;
    use crate::transport::get_transport;

    fn transport() -> Transport {
        get_transport(
            Arc::new(MessagingConfig::default()),
            Some("fake:///"),
            &DriverRegistry::with_defaults(),
            ExceptionRegistry::new(),
        )
        .unwrap()
    }

    fn client() -> RpcClient {
        RpcClient::new(transport(), Target::for_topic("compute"))
    }

    #[test]
    fn version_cap_rule() {
        let ctx = client().with_version_cap("2.5").prepare().build().unwrap();
        assert!(ctx.can_send_version(Some("2.3")).unwrap());
        assert!(ctx.can_send_version(Some("2.5")).unwrap());
        assert!(!ctx.can_send_version(Some("2.6")).unwrap());
        assert!(!ctx.can_send_version(Some("3.0")).unwrap());
        assert!(ctx.can_send_version(None).unwrap());

        let uncapped = client();
        assert!(uncapped.can_send_version(Some("9.9")).unwrap());
    }

    #[test]
    fn can_send_version_defaults_to_target_version() {
        let ctx = client()
            .with_version_cap("2.5")
            .prepare()
            .version("2.6")
            .build()
            .unwrap();
        assert!(!ctx.can_send_version(None).unwrap());
        assert!(ctx.can_send_version(Some("2.0")).unwrap());
    }

    #[test]
    fn prepare_overrides_only_what_is_set() {
        let base = client()
            .with_timeout(Duration::from_secs(5))
            .with_version_cap("1.4");
        let ctx = base
            .prepare()
            .server("host1")
            .version("1.2")
            .build()
            .unwrap();

        assert_eq!(ctx.target().topic(), Some("compute"));
        assert_eq!(ctx.target().server(), Some("host1"));
        assert_eq!(ctx.target().version(), Some("1.2"));
        assert_eq!(ctx.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(ctx.version_cap(), Some("1.4"));
        // The base is untouched.
        assert_eq!(base.target().server(), None);

        let cleared = ctx.prepare().timeout(None).version_cap(None).build().unwrap();
        assert_eq!(cleared.timeout(), None);
        assert_eq!(cleared.version_cap(), None);
    }

    #[test]
    fn prepare_rejects_server_with_fanout() {
        let ctx = client().prepare().server("host1").build().unwrap();
        assert!(matches!(
            ctx.prepare().fanout(true).build(),
            Err(ClientError::InvalidTarget(TargetError::ServerAndFanout { .. }))
        ));
        assert!(ctx.prepare().any_server().fanout(true).build().is_ok());
    }

    #[test]
    fn message_shape() {
        let ctx = client()
            .prepare()
            .namespace("baseapi")
            .version("1.1")
            .build()
            .unwrap();
        let mut args = Map::new();
        args.insert("x".to_string(), json!(1));
        let msg = ctx.make_message(&Map::new(), "ping", args).unwrap();
        assert_eq!(
            Value::Object(msg),
            json!({"method": "ping", "args": {"x": 1}, "namespace": "baseapi", "version": "1.1"})
        );
    }

    #[tokio::test]
    async fn version_cap_checked_before_send() {
        let ctx = client()
            .with_version_cap("2.5")
            .prepare()
            .version("2.6")
            .build()
            .unwrap();

        let err = ctx.cast(&Map::new(), "ping", Map::new()).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Specified RPC version cap, 2.5, is too low. Needs to be higher than 2.6."
        );
        let err = ctx.call(&Map::new(), "ping", Map::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::VersionCap { .. }));
    }

    #[tokio::test]
    async fn call_without_listener_times_out() {
        let client = client().with_timeout(Duration::from_millis(50));
        let err = client.call(&Map::new(), "ping", Map::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout { ref topic } if topic == "compute"));
    }

    #[tokio::test]
    async fn lock_check_does_not_block_the_call() {
        let checks = Arc::new(AtomicUsize::new(0));
        let seen = checks.clone();
        let client = client()
            .with_timeout(Duration::from_millis(20))
            .with_lock_check(Arc::new(move |_: &MessagingConfig| {
                seen.fetch_add(1, Ordering::SeqCst);
                vec!["db".to_string()]
            }));

        let err = client.call(&Map::new(), "ping", Map::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout { .. }));
        assert_eq!(checks.load(Ordering::SeqCst), 1);

        // Casts never consult the hook.
        client.cast(&Map::new(), "ping", Map::new()).await.unwrap();
        assert_eq!(checks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn send_error_names_target() {
        let err = ClientError::from_driver(
            &Target::for_topic("compute"),
            DriverError::Transport("connection refused".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "Failed to send to target \"<Target topic=compute>\": connection refused"
        );
    }
}
