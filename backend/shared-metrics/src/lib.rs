//! Prometheus registry access and request metrics shared by the HTTP and
//! gRPC servers.

mod layer;

use error_stack::ResultExt;
use prometheus::{Encoder, TextEncoder};

pub use layer::{RequestMetricsLayer, RequestMetricsService, REQUESTS_TOTAL, REQUEST_LATENCY};

/// Renders every metric registered in the default registry in the text
/// exposition format.
pub async fn metrics_handler() -> error_stack::Result<String, MetricsError> {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .change_context(MetricsError::EncodingError)?;
    String::from_utf8(buffer).change_context(MetricsError::Utf8Error)
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Error encoding metrics")]
    EncodingError,
    #[error("Error converting metrics to utf8")]
    Utf8Error,
}
