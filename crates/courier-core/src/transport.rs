//! Transport handle shared by clients, servers and notifiers.
//!
//! A `Transport` pairs the selected driver with the messaging configuration
//! and checks targets before they reach the driver.

use std::sync::Arc;

use courier_types::{MessagingConfig, Priority, RequestContext, Target, TargetError, TransportUrl, UrlError};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::driver::{
    BoxDriver, DriverContext, DriverError, DriverRegistry, EnvelopeVersion, Listener, RegistryError,
    SendOptions,
};
use crate::remote::{ExceptionRegistry, FailureDecoder};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Url(#[from] UrlError),

    #[error("transport URL '{0}' does not name a driver")]
    NoDriver(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Cheaply cloneable handle to one driver instance.
#[derive(Debug, Clone)]
pub struct Transport {
    driver: Arc<BoxDriver>,
    config: Arc<MessagingConfig>,
    url: TransportUrl,
}

impl Transport {
    pub fn new(driver: BoxDriver, config: Arc<MessagingConfig>, url: TransportUrl) -> Self {
        Self {
            driver: Arc::new(driver),
            config,
            url,
        }
    }

    pub fn config(&self) -> &Arc<MessagingConfig> {
        &self.config
    }

    pub fn url(&self) -> &TransportUrl {
        &self.url
    }

    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    /// Send to `target`, which must name a topic.
    pub async fn send(
        &self,
        target: &Target,
        ctxt: &RequestContext,
        message: Map<String, Value>,
        options: SendOptions,
    ) -> Result<Option<Value>, DriverError> {
        target.require_topic()?;
        self.driver.send(target, ctxt, message, options).await
    }

    pub async fn send_notification(
        &self,
        target: &Target,
        ctxt: &RequestContext,
        message: Map<String, Value>,
        version: EnvelopeVersion,
    ) -> Result<(), DriverError> {
        target.require_topic()?;
        self.driver
            .send_notification(target, ctxt, message, version)
            .await
    }

    /// Open a server listener. A server's target needs both a topic and a
    /// server name.
    pub async fn listen(&self, target: &Target) -> Result<Box<dyn Listener>, DriverError> {
        target.require_topic()?;
        if target.server().is_none_or(str::is_empty) {
            return Err(TargetError::MissingServer(target.to_string()).into());
        }
        self.driver.listen(target).await
    }

    pub async fn listen_for_notifications(
        &self,
        targets_and_priorities: &[(Target, Priority)],
    ) -> Result<Box<dyn Listener>, DriverError> {
        for (target, _) in targets_and_priorities {
            target.require_topic()?;
        }
        self.driver
            .listen_for_notifications(targets_and_priorities)
            .await
    }
}

/// Build a transport from `url`, or from `config.transport_url` when `url`
/// is `None`. The URL scheme selects the driver factory.
pub fn get_transport(
    config: Arc<MessagingConfig>,
    url: Option<&str>,
    drivers: &DriverRegistry,
    exceptions: ExceptionRegistry,
) -> Result<Transport, TransportError> {
    let raw = url.unwrap_or(&config.transport_url).to_string();
    let parsed = TransportUrl::parse(&raw, Some(&config.control_exchange))?;
    let name = parsed
        .transport
        .clone()
        .ok_or_else(|| TransportError::NoDriver(raw.clone()))?;
    let factory = drivers.get(&name)?;

    let ctx = DriverContext {
        default_exchange: parsed
            .exchange
            .clone()
            .unwrap_or_else(|| config.control_exchange.clone()),
        decoder: FailureDecoder::new(config.allowed_rpc_exception_modules.clone(), exceptions),
        url: parsed,
        config: config.clone(),
    };
    let driver = factory(&ctx)?;
    debug!(driver = %name, exchange = %ctx.default_exchange, "transport ready");

    Ok(Transport::new(driver, config, ctx.url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn transport(url: Option<&str>) -> Result<Transport, TransportError> {
        get_transport(
            Arc::new(MessagingConfig::default()),
            url,
            &DriverRegistry::with_defaults(),
            ExceptionRegistry::new(),
        )
    }

    #[test]
    fn uses_configured_url_by_default() {
        let transport = transport(None).unwrap();
        assert_eq!(transport.driver_name(), "fake");
        assert_eq!(transport.url().exchange.as_deref(), Some("courier"));
    }

    #[test]
    fn url_exchange_overrides_control_exchange() {
        let transport = transport(Some("fake:///billing")).unwrap();
        assert_eq!(transport.url().exchange.as_deref(), Some("billing"));
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(matches!(
            transport(Some("rabbit://h/")),
            Err(TransportError::Registry(RegistryError::UnknownDriver(_)))
        ));
        assert!(matches!(transport(Some("")), Err(TransportError::NoDriver(_))));
    }

    #[tokio::test]
    async fn server_listener_needs_server() {
        let transport = transport(None).unwrap();
        let err = transport.listen(&Target::for_topic("t")).await.err().unwrap();
        assert!(matches!(
            err,
            DriverError::InvalidTarget(TargetError::MissingServer(_))
        ));
    }

    #[tokio::test]
    async fn send_needs_topic() {
        let transport = transport(None).unwrap();
        let err = transport
            .send(&Target::default(), &Map::new(), Map::new(), SendOptions::cast())
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::InvalidTarget(TargetError::MissingTopic(_))));
    }

    #[tokio::test]
    async fn cast_reaches_server_listener() {
        let transport = transport(None).unwrap();
        let target = Target::builder().topic("t").server("s").build().unwrap();
        let mut listener = transport.listen(&target).await.unwrap();

        let msg = json!({"method": "ping"}).as_object().cloned().unwrap();
        transport
            .send(&Target::for_topic("t"), &Map::new(), msg, SendOptions::cast())
            .await
            .unwrap();

        let incoming = listener.poll().await.unwrap();
        assert_eq!(incoming.message()["method"], json!("ping"));
    }
}
