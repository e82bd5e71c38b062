//! Sentinel SIEM backend entry point

use anyhow::Context;
use sentinel_core::{SiemConfig, TenantRegistry};
use sentinel_server::{load_tenants, Pipeline, PipelineOptions};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::var("SIEM_CONFIG") {
        Ok(path) => SiemConfig::load(Some(&path))
            .with_context(|| format!("loading configuration from {path}"))?,
        Err(_) => SiemConfig::from_env(),
    };
    config.validate().context("validating configuration")?;

    let registry = match std::env::var("SIEM_TENANTS") {
        Ok(path) => load_tenants(&path).with_context(|| format!("loading tenants from {path}"))?,
        Err(_) => {
            warn!("SIEM_TENANTS not set, starting with an empty tenant registry");
            Arc::new(TenantRegistry::new())
        }
    };

    if config.jwt_secret.len() < 32 {
        warn!("JWT secret is shorter than 32 bytes; set SIEM_JWT_SECRET before exposing the push channel");
    }

    let mut pipeline = Pipeline::build(config, registry, PipelineOptions::default());
    pipeline.spawn_listeners().context("starting listeners")?;

    info!("Sentinel SIEM backend running");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("Shutdown signal received");
    pipeline.shutdown().await;
    Ok(())
}
