//! Tenant registry seeding
//!
//! The registry is owned by the external admin surface at runtime; at boot
//! the binary seeds it from a TOML file so a fresh node knows its tenants
//! before the first admin call arrives.

use sentinel_core::{CoreError, Tenant, TenantRegistry};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
struct TenantsFile {
    #[serde(default)]
    tenants: Vec<Tenant>,
}

/// Load tenants from a TOML file into a fresh registry.
pub fn load_tenants(path: &str) -> Result<Arc<TenantRegistry>, CoreError> {
    let file: TenantsFile = config::Config::builder()
        .add_source(config::File::with_name(path))
        .build()?
        .try_deserialize()?;
    let registry = Arc::new(TenantRegistry::new());
    for tenant in file.tenants {
        if tenant.id.is_empty() {
            return Err(CoreError::InvalidTenant("empty tenant id".to_string()));
        }
        registry.upsert(tenant);
    }
    info!("Seeded {} tenant(s)", registry.len());
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_tenants_with_cidrs_and_hours() {
        let mut file = tempfile_named();
        writeln!(
            file.1,
            r#"
[[tenants]]
id = "acme-corp"
source_cidrs = ["10.0.0.0/8"]
sni_names = ["syslog.acme.example"]

[tenants.business_hours]
weekday = [{{ start_minute = 480, end_minute = 1080 }}]
weekend = []
utc_offset_minutes = 60
holidays = []

[[tenants]]
id = "beta-industries"
source_cidrs = ["192.0.2.0/24"]
"#
        )
        .unwrap();
        file.1.flush().unwrap();

        let registry = load_tenants(&file.0).unwrap();
        assert_eq!(registry.len(), 2);
        let acme = registry.get("acme-corp").unwrap();
        assert_eq!(acme.sni_names, vec!["syslog.acme.example"]);
        assert_eq!(acme.business_hours.utc_offset_minutes, 60);
        assert!(registry
            .match_peer("192.0.2.7".parse().unwrap())
            .is_some_and(|t| t.id == "beta-industries"));
    }

    fn tempfile_named() -> (String, std::fs::File) {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("sentinel-tenants-{}.toml", uuid::Uuid::new_v4()));
        let file = std::fs::File::create(&path).unwrap();
        (path.to_string_lossy().into_owned(), file)
    }
}
