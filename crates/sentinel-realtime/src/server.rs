//! WebSocket push endpoint
//!
//! Clients connect to `/ws/notifications/{tenant_id}?token=<bearer>`. The
//! handshake always completes so the close code can tell the client why it
//! was refused: 4001 for bad tokens, 4003 for a tenant mismatch. Admitted
//! sessions register with the hub and run until close or idle timeout.

use crate::auth::verify_session_token;
use crate::hub::NotificationHub;
use crate::session::{PushSession, SessionConfig};
use futures_util::SinkExt;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Tenant and token pulled from the request line.
fn parse_request_target(path_and_query: &str) -> Option<(String, String)> {
    let (path, query) = path_and_query.split_once('?')?;
    let tenant = path.strip_prefix("/ws/notifications/")?;
    if tenant.is_empty() || tenant.contains('/') {
        return None;
    }
    let token = query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "token").then(|| value.to_string())
    })?;
    Some((tenant.to_string(), token))
}

async fn serve_connection(
    stream: TcpStream,
    jwt_secret: String,
    hub: Arc<NotificationHub>,
    config: SessionConfig,
) {
    let target: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let capture = Arc::clone(&target);
    let callback = move |request: &Request, response: Response| {
        let path_and_query = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_default();
        *capture.lock().expect("request capture lock poisoned") = Some(path_and_query);
        Ok(response)
    };

    let mut websocket = match accept_hdr_async(stream, callback).await {
        Ok(websocket) => websocket,
        Err(e) => {
            debug!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let requested = target
        .lock()
        .expect("request capture lock poisoned")
        .take()
        .unwrap_or_default();
    let admitted = match parse_request_target(&requested) {
        Some((tenant, token)) => verify_session_token(&token, &jwt_secret, &tenant)
            .map(|claims| (tenant, claims)),
        None => Err(crate::auth::AdmissionError::AuthFailure),
    };

    match admitted {
        Ok((tenant, claims)) => {
            let session = PushSession::new(&tenant, config.queue_capacity);
            let session_id = session.session_id;
            info!(
                "Admitted {} to push channel of tenant {}",
                claims.sub, tenant
            );
            hub.register(Arc::clone(&session));
            session.run(websocket, config).await;
            hub.unregister(&tenant, session_id);
        }
        Err(refusal) => {
            warn!("Push admission refused: {}", refusal);
            let _ = websocket
                .send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Library(refusal.close_code()),
                    reason: refusal.to_string().into(),
                })))
                .await;
        }
    }
}

/// Accept loop for the push endpoint.
pub async fn run_push_server(
    bind: &str,
    jwt_secret: String,
    hub: Arc<NotificationHub>,
    config: SessionConfig,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind).await?;
    info!("Push channel listening on {}", bind);
    loop {
        let (stream, peer) = tokio::select! {
            result = listener.accept() => match result {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Push accept error: {}", e);
                    continue;
                }
            },
            _ = shutdown.changed() => break,
        };
        debug!("Push connection from {}", peer);
        tokio::spawn(serve_connection(
            stream,
            jwt_secret.clone(),
            Arc::clone(&hub),
            config,
        ));
    }
    info!("Push channel stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::issue_session_token;
    use futures_util::StreamExt;
    use tokio::time::{timeout, Duration};

    const SECRET: &str = "test-secret-test-secret-test-secret";

    #[test]
    fn request_target_parsing() {
        let (tenant, token) =
            parse_request_target("/ws/notifications/acme-corp?token=abc.def.ghi").unwrap();
        assert_eq!(tenant, "acme-corp");
        assert_eq!(token, "abc.def.ghi");

        assert!(parse_request_target("/ws/notifications/?token=x").is_none());
        assert!(parse_request_target("/ws/notifications/acme-corp").is_none());
        assert!(parse_request_target("/other/acme-corp?token=x").is_none());
        assert!(parse_request_target("/ws/notifications/a/b?token=x").is_none());
    }

    async fn start_server(hub: Arc<NotificationHub>) -> (String, watch::Sender<bool>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let bind = addr.to_string();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server_bind = bind.clone();
        tokio::spawn(async move {
            let _ = run_push_server(
                &server_bind,
                SECRET.to_string(),
                hub,
                SessionConfig::default(),
                shutdown_rx,
            )
            .await;
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        (bind, shutdown_tx)
    }

    #[tokio::test]
    async fn valid_token_is_admitted_and_receives_broadcasts() {
        let hub = Arc::new(NotificationHub::new());
        let (bind, _shutdown) = start_server(Arc::clone(&hub)).await;
        let token = issue_session_token("alice", "acme-corp", SECRET, 600).unwrap();
        let url = format!("ws://{bind}/ws/notifications/acme-corp?token={token}");

        let (_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        // Registration is asynchronous with respect to the handshake.
        timeout(Duration::from_secs(2), async {
            while hub.session_count("acme-corp") == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(hub.session_count("acme-corp"), 1);
    }

    #[tokio::test]
    async fn tenant_mismatch_closes_with_4003() {
        let hub = Arc::new(NotificationHub::new());
        let (bind, _shutdown) = start_server(Arc::clone(&hub)).await;
        let token = issue_session_token("alice", "beta-industries", SECRET, 600).unwrap();
        let url = format!("ws://{bind}/ws/notifications/acme-corp?token={token}");

        let (mut stream, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        let frame = timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match frame {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 4003);
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        assert_eq!(hub.session_count("acme-corp"), 0);
    }

    #[tokio::test]
    async fn garbage_token_closes_with_4001() {
        let hub = Arc::new(NotificationHub::new());
        let (bind, _shutdown) = start_server(Arc::clone(&hub)).await;
        let url = format!("ws://{bind}/ws/notifications/acme-corp?token=garbage");

        let (mut stream, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        let frame = timeout(Duration::from_secs(2), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        match frame {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 4001);
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }
}
