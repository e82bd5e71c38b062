//! Pipeline assembly for the Sentinel SIEM backend
//!
//! The binary and the integration tests both build the full pipeline through
//! this crate: listeners feed a bounded raw queue, the normalizer pool feeds
//! the detection shards, candidates run through the false-positive filter
//! into the alert manager, and push-worthy alerts fan out through the
//! notification hub.

pub mod pipeline;
pub mod tenants;

pub use pipeline::{Pipeline, PipelineOptions};
pub use tenants::load_tenants;
