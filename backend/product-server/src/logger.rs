pub mod setup;
pub use setup::{setup, LogDestination, TelemetryGuard};

pub mod env;

pub use tracing::{debug, error, event as log, info, warn};
pub use tracing_attributes::instrument;
