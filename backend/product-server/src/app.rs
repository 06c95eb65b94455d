use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use axum::http;
use connection_mux::{
    Http1Matcher, Http2HeaderMatcher, Multiplexer, MuxConfig, Shutdown, VirtualListener,
};
use shared_metrics::RequestMetricsLayer;
use tokio::{
    net::TcpListener,
    signal::unix::{signal, SignalKind},
    task::JoinSet,
};
use tonic::{service::Routes, transport::Server};
use tower_http::{request_id::MakeRequestUuid, trace as tower_trace};

use crate::{configs::Configuration, consts, error::ServeError, logger, server, utils};

/// Binds the shared port and serves HTTP and gRPC on it until a termination
/// signal arrives.
pub async fn server_builder(config: Arc<Configuration>) -> Result<(), ServeError> {
    let listener = config.tcp_listener().await?;
    let server = DualServer::new(listener, config.mux_config(), config.shutdown_timeout())?;

    let grpc = GrpcServer::new(grpc_routes().await?);
    let http = HttpServer::new(http_router());

    logger::info!(address = %server.local_addr(), "Starting dual-protocol server (HTTP + gRPC)");

    server.run(grpc, http, shutdown_signal()?).await
}

/// Resolves on the first SIGINT, SIGTERM, SIGQUIT or SIGHUP.
pub fn shutdown_signal() -> std::io::Result<impl Future<Output = ()> + Send + 'static> {
    let mut sig_int = signal(SignalKind::interrupt())?;
    let mut sig_term = signal(SignalKind::terminate())?;
    let mut sig_quit = signal(SignalKind::quit())?;
    let mut sig_hup = signal(SignalKind::hangup())?;

    Ok(async move {
        tokio::select! {
            _ = sig_int.recv() => logger::info!("Received SIGINT"),
            _ = sig_term.recv() => logger::info!("Received SIGTERM"),
            _ = sig_quit.recv() => logger::info!("Received QUIT"),
            _ = sig_hup.recv() => logger::info!("Received SIGHUP"),
        }
    })
}

/// A server that takes over the connections of one virtual listener and
/// returns once that listener is closed.
pub trait ProtocolServer: Send + 'static {
    fn serve(
        self,
        listener: VirtualListener,
    ) -> impl Future<Output = Result<(), ServeError>> + Send;
}

/// Serves a set of tonic services.
#[derive(Debug)]
pub struct GrpcServer {
    routes: Routes,
}

impl GrpcServer {
    pub fn new(routes: Routes) -> Self {
        Self { routes }
    }
}

impl ProtocolServer for GrpcServer {
    async fn serve(self, listener: VirtualListener) -> Result<(), ServeError> {
        let logging_layer = tower_trace::TraceLayer::new_for_http()
            .make_span_with(|request: &http::request::Request<_>| {
                utils::record_fields_from_header(request)
            })
            .on_request(tower_trace::DefaultOnRequest::new().level(tracing::Level::INFO))
            .on_response(
                tower_trace::DefaultOnResponse::new()
                    .level(tracing::Level::INFO)
                    .latency_unit(tower_http::LatencyUnit::Micros),
            )
            .on_failure(
                tower_trace::DefaultOnFailure::new()
                    .latency_unit(tower_http::LatencyUnit::Micros)
                    .level(tracing::Level::ERROR),
            );

        let request_id_layer = tower_http::request_id::SetRequestIdLayer::new(
            http::HeaderName::from_static(consts::X_REQUEST_ID),
            MakeRequestUuid,
        );
        let propagate_request_id_layer = tower_http::request_id::PropagateRequestIdLayer::new(
            http::HeaderName::from_static(consts::X_REQUEST_ID),
        );

        let shutdown_signal = listener.closed_signal();

        Server::builder()
            .layer(propagate_request_id_layer)
            .layer(request_id_layer)
            .layer(logging_layer)
            .layer(RequestMetricsLayer::new("grpc"))
            .add_routes(self.routes)
            .serve_with_incoming_shutdown(listener.into_grpc_incoming(), shutdown_signal)
            .await?;

        Ok(())
    }
}

/// Serves an axum router.
#[derive(Debug)]
pub struct HttpServer {
    router: axum::Router,
}

impl HttpServer {
    pub fn new(router: axum::Router) -> Self {
        Self { router }
    }
}

impl ProtocolServer for HttpServer {
    async fn serve(self, listener: VirtualListener) -> Result<(), ServeError> {
        let incoming = listener.into_http_incoming();
        let shutdown_signal = incoming.closed_signal();

        axum::serve(incoming, self.router.into_make_service())
            .with_graceful_shutdown(shutdown_signal)
            .await?;

        Ok(())
    }
}

/// Runs a gRPC and an HTTP server behind one listening socket.
#[derive(Debug)]
pub struct DualServer {
    mux: Multiplexer,
    shutdown_timeout: Duration,
}

impl DualServer {
    pub fn new(
        listener: TcpListener,
        mux_config: MuxConfig,
        shutdown_timeout: Duration,
    ) -> Result<Self, ServeError> {
        Ok(Self {
            mux: Multiplexer::new(listener, mux_config)?,
            shutdown_timeout,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.mux.local_addr()
    }

    /// Handle closing the shared listener, which winds both servers down.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.mux.shutdown_handle()
    }

    /// Starts both servers, then dispatches connections until the shutdown
    /// handle is closed or `shutdown_signal` resolves.
    ///
    /// A failing server is logged and leaves the other one running. After
    /// dispatch stops, the servers get `shutdown_timeout` to finish their
    /// in-flight work before they are abandoned.
    pub async fn run<G, H>(
        self,
        grpc: G,
        http: H,
        shutdown_signal: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServeError>
    where
        G: ProtocolServer,
        H: ProtocolServer,
    {
        let Self {
            mut mux,
            shutdown_timeout,
        } = self;

        // gRPC is tried first
        let grpc_listener = mux.register(Http2HeaderMatcher::grpc());
        let http_listener = mux.register(Http1Matcher);

        let mut servers = JoinSet::new();
        spawn_server(&mut servers, grpc, grpc_listener);
        spawn_server(&mut servers, http, http_listener);

        let shutdown = mux.shutdown_handle();
        let signal_task = tokio::spawn(async move {
            shutdown_signal.await;
            shutdown.close();
        });

        let dispatched = mux.serve().await;
        signal_task.abort();

        let drained = tokio::time::timeout(shutdown_timeout, async {
            while servers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            logger::warn!(
                timeout = ?shutdown_timeout,
                "servers did not stop in time, abandoning remaining connections"
            );
        }

        logger::info!("dual-protocol server stopped");
        dispatched.map_err(ServeError::from)
    }
}

fn spawn_server<S: ProtocolServer>(
    servers: &mut JoinSet<()>,
    server: S,
    listener: VirtualListener,
) {
    let protocol = listener.protocol();
    servers.spawn(async move {
        logger::info!(protocol, address = %listener.local_addr(), "server listening");
        match server.serve(listener).await {
            Ok(()) => logger::info!(protocol, "server stopped"),
            Err(error) => logger::error!(protocol, %error, "server error"),
        }
    });
}

/// Routes of the HTTP side, with tracing and request-id layers.
pub fn http_router() -> axum::Router {
    let logging_layer = tower_trace::TraceLayer::new_for_http()
        .make_span_with(|request: &axum::extract::Request<_>| {
            utils::record_fields_from_header(request)
        })
        .on_request(tower_trace::DefaultOnRequest::new().level(tracing::Level::INFO))
        .on_response(
            tower_trace::DefaultOnResponse::new()
                .level(tracing::Level::INFO)
                .latency_unit(tower_http::LatencyUnit::Micros),
        )
        .on_failure(
            tower_trace::DefaultOnFailure::new()
                .latency_unit(tower_http::LatencyUnit::Micros)
                .level(tracing::Level::ERROR),
        );

    let request_id_layer = tower_http::request_id::SetRequestIdLayer::new(
        http::HeaderName::from_static(consts::X_REQUEST_ID),
        MakeRequestUuid,
    );

    let propagate_request_id_layer = tower_http::request_id::PropagateRequestIdLayer::new(
        http::HeaderName::from_static(consts::X_REQUEST_ID),
    );

    // layers wrap only the routes registered before them
    axum::Router::new()
        .route("/ping", axum::routing::get(server::ping::ping))
        .route("/health", axum::routing::get(server::ping::health))
        .route("/metrics", axum::routing::get(server::ping::metrics))
        .layer(RequestMetricsLayer::new("http1"))
        .layer(logging_layer)
        .layer(request_id_layer)
        .layer(propagate_request_id_layer)
}

/// Services of the gRPC side: health checking and server reflection.
pub async fn grpc_routes() -> Result<Routes, ServeError> {
    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(tonic_health::pb::FILE_DESCRIPTOR_SET)
        .build_v1()?;

    Ok(Routes::new(server::health_check::health_service().await).add_service(reflection_service))
}
