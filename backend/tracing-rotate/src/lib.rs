//! A date-keyed rotating file writer for the tracing ecosystem.
//!
//! Records are appended to `<directory>/<prefix>_<YYYY-MM-DD>.<extension>`.
//! A background task re-checks the local date periodically and atomically
//! swaps the active file when the day changes; writers never block on a
//! rotation and a record is never split across two files.
//!
//! # Examples
//! ```no_run
//! use tracing_rotate::RotatingWriter;
//! use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let writer = RotatingWriter::builder()
//!     .directory("../logs")
//!     .build()
//!     .expect("Failed to open log file");
//! let _rotation = writer.spawn_rotation();
//!
//! tracing_subscriber::registry()
//!     .with(tracing_subscriber::fmt::layer().with_writer(writer))
//!     .init();
//! # }
//! ```

pub mod builder;
mod writer;

pub use builder::RotatingWriterBuilder;
pub use writer::{date_key, today, RotateError, RotatingWriter, RotationTask};

#[cfg(feature = "rotate-metrics")]
mod metrics;

/// Initializes the metrics for the rotating writer.
/// This function should be called once at application startup.
#[cfg(feature = "rotate-metrics")]
pub fn init() {
    metrics::initialize_all_metrics();
}

#[cfg(not(feature = "rotate-metrics"))]
pub fn init() {
    tracing::warn!("Rotation metrics feature is not enabled. Metrics will not be collected.");
}
