//! Process-edge glue for Courier: reading `courier.toml` and turning it into
//! a ready transport.

pub mod config;

pub use config::{CONFIG_FILE, connect, default_config_dir, load_messaging_config};
