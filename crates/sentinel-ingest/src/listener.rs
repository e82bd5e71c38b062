//! Syslog listeners: UDP/514, TCP/601, TLS/6514
//!
//! Each listener runs as one task. Connections never block the listener:
//! TCP/TLS peers get their own task per connection. Backpressure differs by
//! transport: a full queue drops UDP datagrams (counted), while TCP/TLS stop
//! reading so the kernel window closes toward the sender.

use crate::error::IngestError;
use crate::framing::{FrameDecoder, FramingError};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use sentinel_core::metrics::Metrics;
use sentinel_core::{RawEvent, Transport};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

const READ_DEADLINE: Duration = Duration::from_secs(30);
const TLS_HANDSHAKE_DEADLINE: Duration = Duration::from_secs(10);

/// Load a rustls server config from PEM cert chain and key files.
pub fn load_tls_config(cert_path: &str, key_path: &str) -> Result<Arc<rustls::ServerConfig>, IngestError> {
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut std::io::BufReader::new(std::fs::File::open(cert_path)?))
            .collect::<Result<_, _>>()?;
    let key: PrivateKeyDer<'static> =
        rustls_pemfile::private_key(&mut std::io::BufReader::new(std::fs::File::open(key_path)?))?
            .ok_or_else(|| {
                IngestError::MalformedFrame(format!("no private key found in {key_path}"))
            })?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

/// UDP listener: one datagram per message, dropped (and counted) when the
/// ingestion queue is full.
pub async fn run_udp_listener(
    bind: &str,
    max_frame_bytes: usize,
    tx: mpsc::Sender<RawEvent>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), IngestError> {
    let socket = UdpSocket::bind(bind).await?;
    info!("UDP syslog listener on {}", bind);
    // One extra byte so an over-cap datagram is distinguishable from one at
    // exactly the cap.
    let mut buf = vec![0u8; max_frame_bytes + 1];
    loop {
        let (size, peer) = tokio::select! {
            result = socket.recv_from(&mut buf) => match result {
                Ok(received) => received,
                Err(e) => {
                    warn!("UDP receive error: {}", e);
                    continue;
                }
            },
            _ = shutdown.changed() => break,
        };
        if size > max_frame_bytes {
            metrics.ingest.malformed.fetch_add(1, Ordering::Relaxed);
            debug!("UDP frame from {} exceeds {} bytes", peer, max_frame_bytes);
            continue;
        }
        let event = RawEvent::new(buf[..size].to_vec(), peer, Transport::Udp);
        match tx.try_send(event) {
            Ok(()) => {
                metrics.ingest.accepted.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics.ingest.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(IngestError::QueueClosed),
        }
    }
    info!("UDP syslog listener stopped");
    Ok(())
}

/// TCP listener with RFC6587 framing.
pub async fn run_tcp_listener(
    bind: &str,
    max_frame_bytes: usize,
    tx: mpsc::Sender<RawEvent>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), IngestError> {
    let listener = TcpListener::bind(bind).await?;
    info!("TCP syslog listener on {}", bind);
    loop {
        let (stream, peer) = tokio::select! {
            result = listener.accept() => match result {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("TCP accept error: {}", e);
                    continue;
                }
            },
            _ = shutdown.changed() => break,
        };
        let tx = tx.clone();
        let metrics = Arc::clone(&metrics);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_stream(
                stream,
                peer,
                Transport::Tcp,
                None,
                max_frame_bytes,
                tx,
                metrics,
                shutdown,
            )
            .await
            {
                debug!("TCP connection from {} closed: {}", peer, e);
            }
        });
    }
    info!("TCP syslog listener stopped");
    Ok(())
}

/// TLS listener: TCP framing over rustls, with the SNI carried as a tenant
/// hint for attribution.
pub async fn run_tls_listener(
    bind: &str,
    tls_config: Arc<rustls::ServerConfig>,
    max_frame_bytes: usize,
    tx: mpsc::Sender<RawEvent>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), IngestError> {
    let listener = TcpListener::bind(bind).await?;
    let acceptor = TlsAcceptor::from(tls_config);
    info!("TLS syslog listener on {}", bind);
    loop {
        let (stream, peer) = tokio::select! {
            result = listener.accept() => match result {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("TLS accept error: {}", e);
                    continue;
                }
            },
            _ = shutdown.changed() => break,
        };
        let acceptor = acceptor.clone();
        let tx = tx.clone();
        let metrics = Arc::clone(&metrics);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let tls_stream = match timeout(TLS_HANDSHAKE_DEADLINE, acceptor.accept(stream)).await {
                Ok(Ok(tls_stream)) => tls_stream,
                Ok(Err(e)) => {
                    debug!("TLS handshake with {} failed: {}", peer, e);
                    return;
                }
                Err(_) => {
                    debug!("TLS handshake with {} timed out", peer);
                    return;
                }
            };
            let sni = tls_stream
                .get_ref()
                .1
                .server_name()
                .map(|name| name.to_string());
            if let Err(e) = serve_stream(
                tls_stream,
                peer,
                Transport::Tls,
                sni,
                max_frame_bytes,
                tx,
                metrics,
                shutdown,
            )
            .await
            {
                debug!("TLS connection from {} closed: {}", peer, e);
            }
        });
    }
    info!("TLS syslog listener stopped");
    Ok(())
}

/// Read loop shared by TCP and TLS connections. Blocking on a full queue is
/// deliberate: it is the socket-level backpressure path.
#[allow(clippy::too_many_arguments)]
async fn serve_stream<S>(
    mut stream: S,
    peer: SocketAddr,
    transport: Transport,
    sni: Option<String>,
    max_frame_bytes: usize,
    tx: mpsc::Sender<RawEvent>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), IngestError>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new(max_frame_bytes);
    let mut buf = vec![0u8; 8 * 1024];
    loop {
        let read = tokio::select! {
            read = timeout(READ_DEADLINE, stream.read(&mut buf)) => match read {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(IngestError::TransportError(e)),
                Err(_) => return Err(IngestError::ParseTimeout),
            },
            _ = shutdown.changed() => break,
        };
        decoder.extend(&buf[..read]);
        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => {
                    let event =
                        RawEvent::new(frame, peer, transport).with_sni(sni.clone());
                    if tx.send(event).await.is_err() {
                        return Err(IngestError::QueueClosed);
                    }
                    metrics.ingest.accepted.fetch_add(1, Ordering::Relaxed);
                }
                Ok(None) => break,
                Err(e @ FramingError::Oversize { .. })
                | Err(e @ FramingError::InvalidOctetCount) => {
                    // The stream cannot be resynchronized past a bad frame.
                    metrics.ingest.malformed.fetch_add(1, Ordering::Relaxed);
                    return Err(IngestError::MalformedFrame(e.to_string()));
                }
            }
        }
    }
    Ok(())
}
