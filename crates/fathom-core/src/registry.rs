//! Tenant registry: codename resolution and fleet-wide health.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::config::DeploymentConfig;
use crate::tenant::{TenantHealth, TenantRuntime};
use crate::{Error, Result};

/// In-memory map of tenant runtimes, the single routing surface.
#[derive(Default)]
pub struct TenantRegistry {
    tenants: BTreeMap<String, Arc<TenantRuntime>>,
}

impl TenantRegistry {
    /// Build an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build runtimes for every tenant in a deployment.
    ///
    /// The configuration is validated first, so duplicate codenames never
    /// reach the map.
    pub fn from_config(config: &DeploymentConfig) -> Result<Self> {
        config.validate()?;
        let mut registry = Self::new();
        for tenant in &config.tenants {
            let runtime = TenantRuntime::new(tenant.clone(), config.infrastructure.clone())?;
            registry.register(runtime);
        }
        info!(tenants = registry.tenants.len(), "Tenant registry built");
        Ok(registry)
    }

    /// Add a runtime to the registry, replacing any previous holder of
    /// the codename.
    pub fn register(&mut self, runtime: Arc<TenantRuntime>) {
        self.tenants
            .insert(runtime.codename().to_string(), runtime);
    }

    /// Resolve a tenant by codename.
    pub fn resolve(&self, codename: &str) -> Result<Arc<TenantRuntime>> {
        self.tenants
            .get(codename)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Unknown tenant '{codename}'")))
    }

    /// All registered codenames, sorted.
    #[must_use]
    pub fn codenames(&self) -> Vec<String> {
        self.tenants.keys().cloned().collect()
    }

    /// Number of registered tenants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    /// Health snapshots across the whole registry.
    #[must_use]
    pub fn aggregate_health(&self) -> Vec<TenantHealth> {
        self.tenants.values().map(|t| t.health()).collect()
    }

    /// Initialize every tenant (schedulers, index warmup).
    pub fn initialize_all(&self, run_initial_sync: bool) -> Vec<(String, Result<()>)> {
        self.tenants
            .iter()
            .map(|(codename, runtime)| (codename.clone(), runtime.initialize(run_initial_sync)))
            .collect()
    }

    /// Shut every tenant down.
    pub async fn shutdown_all(&self) {
        for runtime in self.tenants.values() {
            runtime.shutdown().await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn deployment(dir: &TempDir) -> DeploymentConfig {
        let raw = format!(
            r#"{{
                "infrastructure": {{ "data_root_dir": "{}" }},
                "tenants": [
                    {{
                        "codename": "alpha-docs",
                        "docs_name": "Alpha",
                        "source_type": "online",
                        "docs_sitemap_url": "https://alpha.example/sitemap.xml"
                    }},
                    {{
                        "codename": "beta-docs",
                        "docs_name": "Beta",
                        "source_type": "online",
                        "docs_entry_url": "https://beta.example/docs/"
                    }}
                ]
            }}"#,
            dir.path().display()
        );
        DeploymentConfig::from_json(&raw).unwrap()
    }

    #[test]
    fn resolves_registered_tenants() {
        let dir = TempDir::new().unwrap();
        let registry = TenantRegistry::from_config(&deployment(&dir)).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.codenames(), vec!["alpha-docs", "beta-docs"]);
        assert_eq!(registry.resolve("alpha-docs").unwrap().codename(), "alpha-docs");
    }

    #[test]
    fn unknown_tenant_is_a_typed_error() {
        let dir = TempDir::new().unwrap();
        let registry = TenantRegistry::from_config(&deployment(&dir)).unwrap();
        let err = registry.resolve("missing").unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
        assert!(err.to_string().contains("Unknown tenant 'missing'"));
    }

    #[test]
    fn aggregate_health_covers_every_tenant() {
        let dir = TempDir::new().unwrap();
        let registry = TenantRegistry::from_config(&deployment(&dir)).unwrap();
        let health = registry.aggregate_health();

        assert_eq!(health.len(), 2);
        let codenames: Vec<&str> = health.iter().map(|h| h.codename.as_str()).collect();
        assert_eq!(codenames, vec!["alpha-docs", "beta-docs"]);
    }
}
