//! Driver registry for runtime driver lookup.
//!
//! Maps a transport URL scheme to a factory. Populated explicitly at process
//! start; nothing is discovered at runtime.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use courier_types::{MessagingConfig, TransportUrl};
use thiserror::Error;

use super::base::DriverError;
use super::box_driver::BoxDriver;
use super::fake::{FAKE_DRIVER, FakeDriver};
use crate::remote::FailureDecoder;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no driver registered for transport '{0}'")]
    UnknownDriver(String),

    #[error("no notification driver named '{0}'")]
    UnknownNotifyDriver(String),
}

/// Everything a driver factory gets to build a driver.
#[derive(Debug, Clone)]
pub struct DriverContext {
    pub config: Arc<MessagingConfig>,
    pub url: TransportUrl,
    /// Exchange for targets that name none.
    pub default_exchange: String,
    /// Rebuilds failure replies on the calling side.
    pub decoder: FailureDecoder,
}

pub type DriverFactory = Arc<dyn Fn(&DriverContext) -> Result<BoxDriver, DriverError> + Send + Sync>;

/// Registry of driver factories, indexed by URL scheme.
pub struct DriverRegistry {
    factories: HashMap<String, DriverFactory>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry holding the in-memory driver under `fake`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            FAKE_DRIVER,
            Arc::new(|ctx: &DriverContext| -> Result<BoxDriver, DriverError> {
                Ok(BoxDriver::new(FakeDriver::new(
                    ctx.default_exchange.clone(),
                    ctx.decoder.clone(),
                    Duration::from_millis(ctx.config.poll_backoff_ms),
                )))
            }),
        );
        registry
    }

    /// Register a factory. An existing entry with the same name is replaced.
    pub fn register(&mut self, name: impl Into<String>, factory: DriverFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn get(&self, name: &str) -> Result<&DriverFactory, RegistryError> {
        self.factories
            .get(name)
            .ok_or_else(|| RegistryError::UnknownDriver(name.to_string()))
    }

    pub fn list_names(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
