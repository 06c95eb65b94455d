#![allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]

use std::time::Duration;

use connection_mux::VirtualListener;
use product_server::{
    app::{self, GrpcServer, HttpServer, ProtocolServer},
    error::ServeError,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tonic::{transport::Channel, Request};
use tonic_health::pb::{
    health_check_response::ServingStatus, health_client::HealthClient, HealthCheckRequest,
};

mod common;
use common::{http_get, spawn_server, spawn_with, spawn_with_timeout, WAIT};

async fn health_client(addr: std::net::SocketAddr) -> HealthClient<Channel> {
    let channel = Channel::from_shared(format!("http://{addr}"))
        .unwrap()
        .connect()
        .await
        .expect("Failed to connect grpc channel");
    HealthClient::new(channel)
}

#[tokio::test]
async fn http_and_grpc_share_one_port() {
    let server = spawn_server().await;

    let response = http_get(server.addr, "/ping").await;
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.contains(r#"{"message":"pong"}"#), "{response}");

    let mut client = health_client(server.addr).await;
    for service in ["", "product"] {
        let response = client
            .check(Request::new(HealthCheckRequest {
                service: service.to_string(),
            }))
            .await
            .expect("Failed to call health check")
            .into_inner();
        assert_eq!(response.status(), ServingStatus::Serving);
    }

    server.shutdown.close();
    tokio::time::timeout(WAIT, server.handle)
        .await
        .expect("server did not stop within the shutdown timeout")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn http_responses_carry_a_request_id() {
    let server = spawn_server().await;

    let response = http_get(server.addr, "/health").await;
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.to_ascii_lowercase().contains("x-request-id: "), "{response}");
    assert!(response.ends_with("health is good"), "{response}");

    server.shutdown.close();
}

#[tokio::test]
async fn metrics_expose_multiplexer_counters() {
    let server = spawn_server().await;

    let response = http_get(server.addr, "/metrics").await;
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.contains("mux_connections_accepted_total"), "{response}");

    server.shutdown.close();
}

#[tokio::test]
async fn unknown_protocol_is_disconnected() {
    let server = spawn_server().await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"\x16\x03\x01\x00\x05hello").await.unwrap();
    let mut buf = [0u8; 8];
    let read = tokio::time::timeout(WAIT, stream.read(&mut buf))
        .await
        .expect("connection was not closed");
    assert!(matches!(read, Ok(0) | Err(_)));

    // the server keeps serving others
    let response = http_get(server.addr, "/ping").await;
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");

    server.shutdown.close();
}

#[tokio::test]
async fn shutdown_stops_accepting_new_connections() {
    let server = spawn_server().await;
    let addr = server.addr;

    server.shutdown.close();
    tokio::time::timeout(WAIT, server.handle)
        .await
        .expect("server did not stop within the shutdown timeout")
        .unwrap()
        .unwrap();

    let refused = match TcpStream::connect(addr).await {
        Err(_) => true,
        Ok(mut stream) => {
            let _ = stream.write_all(b"GET /ping HTTP/1.1\r\n\r\n").await;
            let mut buf = [0u8; 1];
            matches!(stream.read(&mut buf).await, Ok(0) | Err(_))
        }
    };
    assert!(refused);
}

struct FailingServer;

impl ProtocolServer for FailingServer {
    async fn serve(self, _listener: VirtualListener) -> Result<(), ServeError> {
        Err(ServeError::IoError(std::io::Error::other("refusing to serve")))
    }
}

#[tokio::test]
async fn failing_server_leaves_the_other_running() {
    let server = spawn_with(FailingServer, HttpServer::new(product_server::app::http_router())).await;

    let response = http_get(server.addr, "/ping").await;
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");

    server.shutdown.close();
    tokio::time::timeout(WAIT, server.handle)
        .await
        .expect("server did not stop within the shutdown timeout")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn close_stops_both_servers_with_idle_connections_open() {
    let grpc = GrpcServer::new(app::grpc_routes().await.unwrap());
    let http = HttpServer::new(app::http_router());
    let server = spawn_with_timeout(grpc, http, Duration::from_secs(60)).await;

    let mut client = health_client(server.addr).await;
    client
        .check(Request::new(HealthCheckRequest::default()))
        .await
        .expect("Failed to call health check");

    let mut keep_alive = TcpStream::connect(server.addr).await.unwrap();
    keep_alive
        .write_all(b"GET /ping HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut buf = vec![0; 1024];
    let read = tokio::time::timeout(WAIT, keep_alive.read(&mut buf))
        .await
        .expect("HTTP response timed out")
        .unwrap();
    let response = String::from_utf8_lossy(&buf[..read]);
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");

    // both connections stay open and idle while the listener closes
    server.shutdown.close();
    tokio::time::timeout(WAIT, server.handle)
        .await
        .expect("servers kept running until the shutdown timeout")
        .unwrap()
        .unwrap();

    let closed = tokio::time::timeout(WAIT, keep_alive.read(&mut buf))
        .await
        .expect("idle HTTP connection was not closed");
    assert!(matches!(closed, Ok(0) | Err(_)), "{closed:?}");
    drop(client);
}
