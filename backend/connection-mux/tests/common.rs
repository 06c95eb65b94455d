#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::{net::SocketAddr, time::Duration};

use connection_mux::{
    Http1Matcher, Http2HeaderMatcher, MuxConfig, MuxError, Multiplexer, Shutdown, VirtualListener,
    HTTP2_PREFACE,
};
use tokio::{net::TcpListener, task::JoinHandle};

pub struct TestMux {
    pub addr: SocketAddr,
    pub grpc: VirtualListener,
    pub http: VirtualListener,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), MuxError>>,
}

/// Starts a multiplexer with the gRPC rule ahead of the HTTP/1 rule on an
/// ephemeral port.
pub async fn spawn_mux(config: MuxConfig) -> TestMux {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let mut mux = Multiplexer::new(listener, config).expect("Failed to create multiplexer");
    let grpc = mux.register(Http2HeaderMatcher::grpc());
    let http = mux.register(Http1Matcher);

    TestMux {
        addr: mux.local_addr(),
        shutdown: mux.shutdown_handle(),
        handle: tokio::spawn(mux.serve()),
        grpc,
        http,
    }
}

pub fn frame(kind: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let length = u32::try_from(payload.len()).unwrap().to_be_bytes();
    let mut out = vec![length[1], length[2], length[3], kind, flags];
    out.extend_from_slice(&stream_id.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Client preface, an empty SETTINGS frame and one HEADERS frame carrying
/// the given content type.
pub fn h2_request(content_type: &str) -> Vec<u8> {
    let block = hpack::Encoder::new().encode(vec![
        (&b":method"[..], &b"POST"[..]),
        (&b":scheme"[..], &b"http"[..]),
        (&b":path"[..], &b"/grpc.health.v1.Health/Check"[..]),
        (&b":authority"[..], &b"localhost"[..]),
        (&b"content-type"[..], content_type.as_bytes()),
    ]);

    let mut out = HTTP2_PREFACE.to_vec();
    out.extend(frame(0x4, 0, 0, &[]));
    out.extend(frame(0x1, 0x4, 1, &block));
    out
}

/// Asserts that nothing is delivered to `listener` within a short window.
pub async fn assert_no_accept(listener: &mut VirtualListener) {
    let accepted = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(
        accepted.is_err(),
        "{} listener unexpectedly accepted a connection",
        listener.protocol()
    );
}
