//! Tenant lookup and the active-state check consulted before a backend binds.

use std::collections::BTreeMap;

use async_trait::async_trait;
use config::TenantConfig;

use crate::connector::ConnectorSpec;

/// Result of looking up a tenant and connector.
#[derive(Debug, Clone)]
pub enum TenantLookup {
    /// The connector exists for the tenant.
    Found(ConnectorSpec),
    /// No such tenant.
    UnknownTenant,
    /// The tenant exists, the connector does not.
    UnknownConnector,
}

/// Where tenants and their connectors come from.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Describes the connector of a tenant.
    async fn lookup(&self, tenant: &str, connector: &str) -> anyhow::Result<TenantLookup>;

    /// True if both the tenant and the connector exist and are active. Lookup failures
    /// count as inactive.
    async fn is_active(&self, tenant: &str, connector: &str) -> bool;
}

/// Tenants from the `[tenants]` section of the configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigTenantDirectory {
    tenants: BTreeMap<String, TenantConfig>,
}

impl ConfigTenantDirectory {
    /// Creates a directory over the configured tenants.
    pub fn new(tenants: BTreeMap<String, TenantConfig>) -> Self {
        Self { tenants }
    }
}

#[async_trait]
impl TenantDirectory for ConfigTenantDirectory {
    async fn lookup(&self, tenant: &str, connector: &str) -> anyhow::Result<TenantLookup> {
        let Some(tenant_config) = self.tenants.get(tenant) else {
            return Ok(TenantLookup::UnknownTenant);
        };

        let Some(connector_config) = tenant_config.connectors.get(connector) else {
            return Ok(TenantLookup::UnknownConnector);
        };

        Ok(TenantLookup::Found(ConnectorSpec {
            tenant: tenant.to_string(),
            connector: connector.to_string(),
            connector_type: connector_config.connector_type(connector).to_string(),
            credential: connector_config.credential.clone(),
            downstream: connector_config.downstream(),
        }))
    }

    async fn is_active(&self, tenant: &str, connector: &str) -> bool {
        self.tenants
            .get(tenant)
            .filter(|tenant| tenant.active)
            .and_then(|tenant| tenant.connectors.get(connector))
            .is_some_and(|connector| connector.enabled)
    }
}
