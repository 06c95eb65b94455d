use axum::{http::StatusCode, Json};

#[derive(Debug, serde::Serialize)]
pub struct Pong {
    pub message: &'static str,
}

#[tracing_attributes::instrument(level = "debug")]
pub async fn ping() -> Json<Pong> {
    Json(Pong { message: "pong" })
}

pub async fn health() -> &'static str {
    "health is good"
}

pub async fn metrics() -> Result<String, (StatusCode, String)> {
    match shared_metrics::metrics_handler().await {
        Ok(metrics) => Ok(metrics),
        Err(error) => {
            tracing::error!(?error, "Error fetching metrics");

            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Error fetching metrics".to_string(),
            ))
        }
    }
}
