//! Shared domain types for Courier.
//!
//! This crate contains the addressing and wire types used across the
//! messaging substrate: `Target`, the RPC and notification envelopes, the
//! remote failure record, the notification priority set, API versions, the
//! transport URL grammar and the messaging configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod failure;
pub mod message;
pub mod priority;
pub mod target;
pub mod url;
pub mod version;

pub use config::MessagingConfig;
pub use error::{TargetError, UrlError, VersionError};
pub use failure::FailureRecord;
pub use message::{Notification, RequestContext, RpcMessage};
pub use priority::Priority;
pub use target::{Target, TargetBuilder};
pub use url::{TransportHost, TransportUrl};
pub use version::ApiVersion;
