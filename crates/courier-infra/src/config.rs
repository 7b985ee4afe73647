//! Messaging configuration loader.
//!
//! Reads `courier.toml` from a configuration directory and deserializes it
//! into [`MessagingConfig`]. Falls back to the defaults (in-memory `fake`
//! transport) when the file is missing or malformed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use courier_core::driver::DriverRegistry;
use courier_core::{ExceptionRegistry, Transport, get_transport};
use courier_observe::messaging_attrs::{MESSAGING_EXCHANGE, MESSAGING_OPERATION_NAME, MESSAGING_SYSTEM, OP_CONNECT};
use courier_types::MessagingConfig;

/// Name of the configuration file inside the configuration directory.
pub const CONFIG_FILE: &str = "courier.toml";

/// `~/.config/courier` on Linux, the platform equivalent elsewhere.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("courier"))
}

/// Load messaging configuration from `{config_dir}/courier.toml`.
///
/// - If the file does not exist, returns [`MessagingConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config; missing keys take their defaults.
pub async fn load_messaging_config(config_dir: &Path) -> MessagingConfig {
    let config_path = config_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE} found at {}, using defaults", config_path.display());
            return MessagingConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return MessagingConfig::default();
        }
    };

    match toml::from_str::<MessagingConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", config_path.display());
            MessagingConfig::default()
        }
    }
}

/// Load the configuration in `config_dir` and open its transport with the
/// built-in drivers and exception constructors.
pub async fn connect(config_dir: &Path) -> anyhow::Result<Transport> {
    let config = Arc::new(load_messaging_config(config_dir).await);

    let span = tracing::info_span!(
        "courier.connect",
        { MESSAGING_OPERATION_NAME } = OP_CONNECT,
        { MESSAGING_SYSTEM } = tracing::field::Empty,
        { MESSAGING_EXCHANGE } = %config.control_exchange,
    );
    let _guard = span.enter();

    let transport = get_transport(
        config.clone(),
        None,
        &DriverRegistry::with_defaults(),
        ExceptionRegistry::with_builtins(),
    )
    .with_context(|| format!("failed to open transport '{}'", config.transport_url))?;

    span.record(MESSAGING_SYSTEM, transport.driver_name());
    tracing::info!(url = %config.transport_url, "transport connected");
    Ok(transport)
}
