use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::{
    io::AsyncReadExt,
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    error::MuxError,
    listener::{SniffedConn, VirtualListener},
    matcher::{classify, Matcher, Verdict},
    metrics,
};

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);
const INITIAL_SNIFF_CAPACITY: usize = 1024;

/// Tuning knobs for the multiplexer.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Upper bound on the time a connection may take to become classifiable.
    pub sniff_timeout: Duration,
    /// Connections still undecided after this many bytes are closed.
    pub max_sniff_bytes: usize,
    /// Classified connections queued per virtual listener before the
    /// sniffing task waits for the server to accept.
    pub backlog: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            sniff_timeout: Duration::from_secs(5),
            max_sniff_bytes: 16 * 1024,
            backlog: 128,
        }
    }
}

/// Cloneable handle that closes the real listener of a [`Multiplexer`].
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Stops the dispatch loop. Calling it more than once is a no-op.
    pub fn close(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("closing shared listener");
        }
        self.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }
}

struct Rule {
    matcher: Box<dyn Matcher>,
    sender: mpsc::Sender<SniffedConn>,
    closed: CancellationToken,
}

/// Routes connections accepted on one socket to per-protocol virtual
/// listeners.
pub struct Multiplexer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: MuxConfig,
    rules: Vec<Rule>,
    shutdown: Shutdown,
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let protocols: Vec<_> = self.rules.iter().map(|r| r.matcher.protocol()).collect();
        f.debug_struct("Multiplexer")
            .field("local_addr", &self.local_addr)
            .field("config", &self.config)
            .field("protocols", &protocols)
            .finish()
    }
}

impl Multiplexer {
    pub fn new(listener: TcpListener, config: MuxConfig) -> Result<Self, MuxError> {
        let local_addr = listener.local_addr().map_err(MuxError::LocalAddr)?;
        Ok(Self {
            listener,
            local_addr,
            config,
            rules: Vec::new(),
            shutdown: Shutdown::default(),
        })
    }

    /// Appends a routing rule and returns the listener receiving its
    /// connections. Rules are tried in registration order.
    pub fn register<M: Matcher>(&mut self, matcher: M) -> VirtualListener {
        let (sender, receiver) = mpsc::channel(self.config.backlog.max(1));
        let closed = self.shutdown.token.child_token();
        let protocol = matcher.protocol();

        self.rules.push(Rule {
            matcher: Box::new(matcher),
            sender,
            closed: closed.clone(),
        });

        VirtualListener::new(protocol, self.local_addr, receiver, closed)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Runs the dispatch loop until [`Shutdown::close`] is called.
    ///
    /// On return every virtual listener is closed, no sniffing task is left
    /// running and the real listener has been dropped. Connections already
    /// delivered are unaffected. Accept errors never end the loop, so the only
    /// outcome is `Ok(())`.
    pub async fn serve(self) -> Result<(), MuxError> {
        let Self {
            listener,
            local_addr,
            config,
            rules,
            shutdown,
        } = self;
        let rules: Arc<[Rule]> = rules.into();
        let workers = TaskTracker::new();

        tracing::info!(address = %local_addr, rules = rules.len(), "connection multiplexer started");

        loop {
            let accepted = tokio::select! {
                biased;
                () = shutdown.token.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    metrics::CONNECTIONS_ACCEPTED.inc();
                    tracing::trace!(%peer_addr, "connection accepted");
                    workers.spawn(dispatch(
                        stream,
                        peer_addr,
                        Arc::clone(&rules),
                        config.clone(),
                        shutdown.token.clone(),
                    ));
                }
                Err(error) => {
                    metrics::ACCEPT_ERRORS.inc();
                    tracing::warn!(%error, "failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }

        // Virtual listeners hold child tokens of `shutdown`, so they are
        // already closed here.
        drop(listener);
        workers.close();
        workers.wait().await;

        tracing::info!(address = %local_addr, "connection multiplexer stopped");
        Ok(())
    }
}

async fn dispatch(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    rules: Arc<[Rule]>,
    config: MuxConfig,
    shutdown: CancellationToken,
) {
    let sniffed = tokio::select! {
        biased;
        () = shutdown.cancelled() => {
            metrics::dropped("shutdown");
            return;
        }
        sniffed = tokio::time::timeout(
            config.sniff_timeout,
            sniff(&mut stream, &rules, config.max_sniff_bytes),
        ) => sniffed,
    };

    let (index, prefix) = match sniffed {
        Ok(Ok(Some(found))) => found,
        Ok(Ok(None)) => {
            metrics::dropped("unmatched");
            tracing::debug!(%peer_addr, "closing connection with unrecognized protocol");
            return;
        }
        Ok(Err(error)) => {
            metrics::dropped("read_error");
            tracing::debug!(%peer_addr, %error, "failed to read connection preface");
            return;
        }
        Err(_) => {
            metrics::dropped("timeout");
            tracing::debug!(%peer_addr, timeout = ?config.sniff_timeout, "connection preface timed out");
            return;
        }
    };

    let Some(rule) = rules.get(index) else {
        return;
    };
    let protocol = rule.matcher.protocol();
    let conn = SniffedConn::new(stream, prefix, peer_addr, protocol);

    let delivered = tokio::select! {
        biased;
        () = rule.closed.cancelled() => false,
        sent = rule.sender.send(conn) => sent.is_ok(),
    };

    if delivered {
        metrics::CONNECTIONS_ROUTED.with_label_values(&[protocol]).inc();
        tracing::trace!(%peer_addr, protocol, "connection routed");
    } else {
        metrics::dropped("listener_closed");
        tracing::debug!(%peer_addr, protocol, "virtual listener closed, dropping connection");
    }
}

/// Reads from `stream` until the routing table reaches a verdict.
///
/// Returns the index of the matching rule together with every byte read, or
/// `None` when no rule matches.
async fn sniff(
    stream: &mut TcpStream,
    rules: &[Rule],
    max_sniff_bytes: usize,
) -> std::io::Result<Option<(usize, Bytes)>> {
    let mut buffer = BytesMut::with_capacity(INITIAL_SNIFF_CAPACITY.min(max_sniff_bytes));

    loop {
        let room = max_sniff_bytes.saturating_sub(buffer.len());
        let read = if room == 0 {
            0
        } else {
            stream.read_buf(&mut (&mut buffer).limit(room)).await?
        };
        let exhausted = read == 0 || buffer.len() >= max_sniff_bytes;

        let matchers = rules.iter().map(|rule| rule.matcher.as_ref());
        match classify(matchers, &buffer, exhausted) {
            Verdict::Route(index) => return Ok(Some((index, buffer.freeze()))),
            Verdict::Reject => return Ok(None),
            Verdict::Pending => {}
        }
    }
}
