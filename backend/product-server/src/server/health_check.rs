use tonic_health::{
    pb::health_server::{Health, HealthServer},
    ServingStatus,
};

use crate::consts;

/// Standard `grpc.health.v1.Health` service reporting the whole server and
/// the product service as serving.
pub async fn health_service() -> HealthServer<impl Health> {
    let (reporter, service) = tonic_health::server::health_reporter();
    reporter
        .set_service_status(consts::SERVICE_NAME, ServingStatus::Serving)
        .await;
    tracing::debug!(service = consts::SERVICE_NAME, "health status registered");
    service
}
