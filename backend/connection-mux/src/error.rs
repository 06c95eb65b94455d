/// Errors surfaced by the multiplexer and its virtual listeners.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    #[error("virtual listener for {0} connections is closed")]
    ListenerClosed(&'static str),
    #[error("unable to read the address of the listening socket: {0}")]
    LocalAddr(#[source] std::io::Error),
}
