pub mod base;
pub mod box_driver;
pub mod envelope;
pub mod fake;
pub mod registry;

pub use base::{Driver, DriverError, IncomingMessage, Listener, SendOptions};
pub use box_driver::BoxDriver;
pub use envelope::EnvelopeVersion;
pub use registry::{DriverContext, DriverRegistry, RegistryError};
