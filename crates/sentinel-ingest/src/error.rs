use thiserror::Error;

/// Ingestion-side failures. All of these are recoverable: the offending frame
/// or connection is dropped and counted, and the listeners keep running.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("no tenant could be attributed")]
    UnknownTenant,

    #[error("transport error: {0}")]
    TransportError(#[from] std::io::Error),

    #[error("read deadline exceeded while parsing")]
    ParseTimeout,

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("ingestion queue closed")]
    QueueClosed,
}
