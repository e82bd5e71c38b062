//! Stream threat detection for the Sentinel SIEM backend
//!
//! Events are routed by `hash(tenant, source_ip)` onto N shard workers, each
//! exclusively owning its slice of per-origin window state. No locks cross
//! shard boundaries; ordering per origin is FIFO. The engines compute
//! brute-force and port-scan signals and feed behavioral profiles that the
//! false-positive filter reads.

pub mod engine;
pub mod profile;
pub mod shard;
pub mod state;

pub use engine::{DynamicWhitelistRequest, Engine};
pub use profile::{BehavioralProfile, Classification, ProfileStore};
pub use shard::{spawn_shards, DetectionRouter, ShardHandles};
pub use state::DetectionState;
