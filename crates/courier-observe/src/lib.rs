//! Observability for Courier: subscriber setup and the attribute names used
//! on messaging spans.

pub mod messaging_attrs;
pub mod tracing_setup;
