//! Syslog ingestion for the Sentinel SIEM backend
//!
//! Three listeners (UDP/514, TCP/601, TLS/6514) accept frames, attach
//! transport metadata and push `RawEvent`s onto a bounded queue. A small
//! normalizer pool parses RFC5424/RFC3164, attributes each message to a
//! tenant and emits `SecurityEvent`s toward detection. Parse and transport
//! errors are recovered locally: drop, count, keep listening.

pub mod error;
pub mod framing;
pub mod listener;
pub mod normalize;
pub mod parser;

pub use error::IngestError;
pub use framing::FrameDecoder;
pub use listener::{load_tls_config, run_tcp_listener, run_tls_listener, run_udp_listener};
pub use normalize::{run_normalizer_pool, NormalizeFailure, Normalizer};
pub use parser::{parse_syslog, serialize_rfc5424, SdElement, SyslogMessage};
