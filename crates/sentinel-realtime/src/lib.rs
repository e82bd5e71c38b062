//! Real-time alert delivery for the Sentinel SIEM backend
//!
//! Push clients connect over WebSocket at `/ws/notifications/{tenant_id}`,
//! are admitted by bearer-token claim, and receive compact alert messages
//! plus keepalive pings. Email and webhook sinks hang off the same hub
//! through the `Notifier` contract, with bounded retries and a dead-letter
//! log. An alert is the durable object; what travels here is only its
//! transient notification.

pub mod auth;
pub mod hub;
pub mod notifier;
pub mod server;
pub mod session;

pub use auth::{issue_session_token, verify_session_token, AdmissionError, SessionClaims};
pub use hub::{alert_message, run_hub, NotificationHub};
pub use notifier::{
    run_dispatcher, DeadLetter, Notifier, NotifyDispatcher, NotifyError, NotifyTarget,
};
pub use server::run_push_server;
pub use session::{PushSession, SessionConfig};
