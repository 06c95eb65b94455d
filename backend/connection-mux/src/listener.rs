use std::{
    future::Future,
    io,
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::Stream;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tonic::transport::server::Connected;

use crate::{error::MuxError, rewind::Rewind};

/// A classified connection, replaying the bytes consumed while sniffing.
#[derive(Debug)]
pub struct SniffedConn {
    io: Rewind<TcpStream>,
    peer_addr: SocketAddr,
    protocol: &'static str,
}

impl SniffedConn {
    pub(crate) fn new(
        stream: TcpStream,
        sniffed: Bytes,
        peer_addr: SocketAddr,
        protocol: &'static str,
    ) -> Self {
        Self {
            io: Rewind::new(sniffed, stream),
            peer_addr,
            protocol,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn protocol(&self) -> &'static str {
        self.protocol
    }
}

impl AsyncRead for SniffedConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for SniffedConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.io.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

impl Connected for SniffedConn {
    type ConnectInfo = <TcpStream as Connected>::ConnectInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        self.io.get_ref().connect_info()
    }
}

/// Accept queue for one protocol class, fed by the [`Multiplexer`].
///
/// The listener closes when [`VirtualListener::close`] is called or when the
/// multiplexer shuts down, whichever happens first.
///
/// [`Multiplexer`]: crate::Multiplexer
#[derive(Debug)]
pub struct VirtualListener {
    protocol: &'static str,
    local_addr: SocketAddr,
    receiver: mpsc::Receiver<SniffedConn>,
    closed: CancellationToken,
}

impl VirtualListener {
    pub(crate) fn new(
        protocol: &'static str,
        local_addr: SocketAddr,
        receiver: mpsc::Receiver<SniffedConn>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            protocol,
            local_addr,
            receiver,
            closed,
        }
    }

    pub fn protocol(&self) -> &'static str {
        self.protocol
    }

    /// Address of the shared socket backing this listener.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits for the next connection routed to this listener.
    ///
    /// Returns [`MuxError::ListenerClosed`] once the listener is closed;
    /// connections still queued at that point are dropped.
    pub async fn accept(&mut self) -> Result<SniffedConn, MuxError> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(MuxError::ListenerClosed(self.protocol)),
            conn = self.receiver.recv() => conn.ok_or(MuxError::ListenerClosed(self.protocol)),
        }
    }

    /// Closes this listener only. Closing an already closed listener is a
    /// no-op.
    pub fn close(&mut self) {
        self.closed.cancel();
        self.receiver.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the listener is closed; usable as a server's graceful
    /// shutdown signal.
    pub fn closed_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        self.closed.clone().cancelled_owned()
    }

    /// Connection stream for `tonic`'s `serve_with_incoming_shutdown`. The
    /// stream ends when the listener closes.
    pub fn into_grpc_incoming(self) -> impl Stream<Item = Result<SniffedConn, MuxError>> + Send {
        futures::stream::unfold(self, |mut listener| async move {
            let conn = listener.accept().await.ok()?;
            Some((Ok(conn), listener))
        })
    }

    pub fn into_http_incoming(self) -> HttpIncoming {
        HttpIncoming { listener: self }
    }
}

/// Adapts a [`VirtualListener`] to [`axum::serve`].
///
/// `axum::serve::Listener::accept` cannot fail, so once the listener is
/// closed `accept` never resolves; pair it with
/// `with_graceful_shutdown(listener.closed_signal())`.
#[derive(Debug)]
pub struct HttpIncoming {
    listener: VirtualListener,
}

impl HttpIncoming {
    pub fn closed_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        self.listener.closed_signal()
    }
}

impl axum::serve::Listener for HttpIncoming {
    type Io = SniffedConn;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.listener.accept().await {
            Ok(conn) => {
                let peer_addr = conn.peer_addr();
                (conn, peer_addr)
            }
            Err(error) => {
                tracing::debug!(%error, "http listener stopped accepting");
                std::future::pending().await
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.listener.local_addr())
    }
}
