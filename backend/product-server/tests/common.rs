#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::{net::SocketAddr, time::Duration};

use connection_mux::{MuxConfig, Shutdown};
use product_server::{
    app::{self, DualServer, GrpcServer, HttpServer, ProtocolServer},
    error::ServeError,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

pub const WAIT: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), ServeError>>,
}

/// Runs the production routers behind a dual server on an ephemeral port.
pub async fn spawn_server() -> TestServer {
    let grpc = GrpcServer::new(app::grpc_routes().await.expect("Failed to build grpc routes"));
    let http = HttpServer::new(app::http_router());
    spawn_with(grpc, http).await
}

pub async fn spawn_with<G, H>(grpc: G, http: H) -> TestServer
where
    G: ProtocolServer,
    H: ProtocolServer,
{
    spawn_with_timeout(grpc, http, Duration::from_secs(2)).await
}

pub async fn spawn_with_timeout<G, H>(grpc: G, http: H, shutdown_timeout: Duration) -> TestServer
where
    G: ProtocolServer,
    H: ProtocolServer,
{
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let server = DualServer::new(listener, MuxConfig::default(), shutdown_timeout)
        .expect("Failed to create dual server");

    TestServer {
        addr: server.local_addr(),
        shutdown: server.shutdown_handle(),
        handle: tokio::spawn(server.run(grpc, http, std::future::pending())),
    }
}

/// Sends a one-shot HTTP/1.1 GET and returns the raw response.
pub async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(WAIT, stream.read_to_end(&mut response))
        .await
        .expect("HTTP response timed out")
        .unwrap();
    String::from_utf8(response).unwrap()
}
