//! OpenTelemetry messaging semantic convention attribute names.
//!
//! Usable as tracing field names through the `{ CONST } = value` form, e.g.
//! `info_span!("connect", { MESSAGING_SYSTEM } = "fake")`.

// --- Messaging attributes ---

/// The messaging system, here the transport driver name (e.g. "fake").
pub const MESSAGING_SYSTEM: &str = "messaging.system";

/// The operation being performed (see the `OP_*` values).
pub const MESSAGING_OPERATION_NAME: &str = "messaging.operation.name";

/// The exchange messages are routed through.
pub const MESSAGING_EXCHANGE: &str = "messaging.courier.exchange";

// --- Values ---

pub const SYSTEM_COURIER: &str = "courier";

pub const OP_CONNECT: &str = "connect";
