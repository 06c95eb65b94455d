use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Instant,
};

use once_cell::sync::Lazy;
use prometheus::{HistogramVec, IntCounterVec, register_histogram_vec, register_int_counter_vec};
use tower::{Layer, Service};

const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Requests served, by protocol and outcome
#[allow(clippy::expect_used)]
pub static REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "server_requests_total",
        "Total number of requests served, by protocol and outcome",
        &["protocol", "outcome"]
    )
    .expect("Failed to register server_requests_total metric")
});

/// Request latency, by protocol
#[allow(clippy::expect_used)]
pub static REQUEST_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "server_request_latency_seconds",
        "Request latency in seconds, by protocol",
        &["protocol"],
        LATENCY_BUCKETS.to_vec()
    )
    .expect("Failed to register server_request_latency_seconds metric")
});

/// Records request counts and latency for every request passing through,
/// labelled with the protocol the server speaks.
#[derive(Debug, Clone, Copy)]
pub struct RequestMetricsLayer {
    protocol: &'static str,
}

impl RequestMetricsLayer {
    pub fn new(protocol: &'static str) -> Self {
        Self { protocol }
    }
}

impl<S> Layer<S> for RequestMetricsLayer {
    type Service = RequestMetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestMetricsService {
            inner,
            protocol: self.protocol,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestMetricsService<S> {
    inner: S,
    protocol: &'static str,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for RequestMetricsService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: http::Request<ReqBody>) -> Self::Future {
        // the clone is not ready; keep the instance that was polled
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let protocol = self.protocol;
        let start_time = Instant::now();

        Box::pin(async move {
            let result = inner.call(request).await;

            let outcome = match &result {
                Ok(response) if is_success(protocol, response) => "success",
                Ok(_) => "failure",
                Err(_) => "error",
            };
            REQUESTS_TOTAL.with_label_values(&[protocol, outcome]).inc();
            REQUEST_LATENCY
                .with_label_values(&[protocol])
                .observe(start_time.elapsed().as_secs_f64());

            result
        })
    }
}

/// gRPC reports failures in `grpc-status`, which is only visible here for
/// trailers-only responses; otherwise the HTTP status decides.
fn is_success<B>(protocol: &str, response: &http::Response<B>) -> bool {
    if protocol == "grpc" {
        if let Some(status) = response.headers().get("grpc-status") {
            return status.to_str().ok().and_then(|s| s.parse::<i32>().ok()) == Some(0);
        }
    }
    !(response.status().is_client_error() || response.status().is_server_error())
}
