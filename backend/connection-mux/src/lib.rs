//! Serve several wire protocols from a single listening socket.
//!
//! A [`Multiplexer`] owns one bound [`tokio::net::TcpListener`]. Every
//! accepted connection is handed to its own task, which reads just enough
//! bytes to decide which protocol the peer speaks. The bytes read while
//! sniffing are kept and replayed, so the protocol implementation that
//! finally receives the connection sees the stream from its first byte.
//!
//! Routing is an ordered table of [`Matcher`]s. Each call to
//! [`Multiplexer::register`] appends one rule and returns the
//! [`VirtualListener`] that receives the connections matched by it.
//!
//! # Examples
//! ```no_run
//! use connection_mux::{Http1Matcher, Http2HeaderMatcher, Multiplexer, MuxConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! let mut mux = Multiplexer::new(listener, MuxConfig::default())?;
//!
//! let grpc = mux.register(Http2HeaderMatcher::grpc());
//! let http = mux.register(Http1Matcher);
//!
//! // hand `grpc` to a tonic server and `http` to an axum server, then:
//! mux.serve().await?;
//! # drop((grpc, http));
//! # Ok(())
//! # }
//! ```

mod error;
mod listener;
mod matcher;
mod metrics;
mod multiplexer;
mod rewind;

pub use error::MuxError;
pub use listener::{HttpIncoming, SniffedConn, VirtualListener};
pub use matcher::{Http1Matcher, Http2HeaderMatcher, Matcher, Probe, HTTP2_PREFACE};
pub use multiplexer::{Multiplexer, MuxConfig, Shutdown};
pub use rewind::Rewind;
