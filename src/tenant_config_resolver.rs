//! §4.5 Tenant-Config Resolver — looks up and filters delivery configurations
//! per tenant.

use std::sync::Arc;

use log_distributor_common::DeliveryConfig;

use crate::clients::{ConfigStoreError, TenantConfigStoreClient};

pub struct TenantConfigResolver {
    store: Arc<dyn TenantConfigStoreClient>,
}

impl TenantConfigResolver {
    pub fn new(store: Arc<dyn TenantConfigStoreClient>) -> Self {
        Self { store }
    }

    /// Queries by tenant and filters to configs visible now (§4.5): a missing
    /// tenant (empty result) is the resolver's job to surface, not to error
    /// on — callers classify an empty vec as "unknown tenant" (§4.8.4).
    pub async fn enabled_for(&self, tenant: &str) -> Result<Vec<DeliveryConfig>, ConfigStoreError> {
        let now = chrono::Utc::now();
        let configs = self.store.query_by_tenant(tenant).await?;
        Ok(configs.into_iter().filter(|c| c.is_visible(now)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use log_distributor_common::tenant_config::{CommonConfig, ObjectStoreConfig};

    struct FakeStore {
        configs: Vec<DeliveryConfig>,
    }

    #[async_trait]
    impl TenantConfigStoreClient for FakeStore {
        async fn query_by_tenant(
            &self,
            tenant: &str,
        ) -> Result<Vec<DeliveryConfig>, ConfigStoreError> {
            Ok(self
                .configs
                .iter()
                .filter(|c| c.common().tenant == tenant)
                .cloned()
                .collect())
        }
    }

    fn object_store_cfg(tenant: &str, enabled: bool) -> DeliveryConfig {
        DeliveryConfig::ObjectStore(ObjectStoreConfig {
            common: CommonConfig {
                tenant: tenant.to_owned(),
                enabled,
                desired_applications: None,
                target_region: "us-east-1".into(),
                distribution_role: "role".into(),
                ttl: None,
            },
            bucket_name: "b".into(),
            bucket_prefix: "ROSA/cluster-logs/".into(),
        })
    }

    #[tokio::test]
    async fn unknown_tenant_yields_empty_set() {
        let store = Arc::new(FakeStore { configs: vec![] });
        let resolver = TenantConfigResolver::new(store);
        let configs = resolver.enabled_for("never-seen").await.unwrap();
        assert!(configs.is_empty());
    }

    #[tokio::test]
    async fn disabled_config_is_filtered_out() {
        let store = Arc::new(FakeStore {
            configs: vec![object_store_cfg("t", false)],
        });
        let resolver = TenantConfigResolver::new(store);
        let configs = resolver.enabled_for("t").await.unwrap();
        assert!(configs.is_empty());
    }

    #[tokio::test]
    async fn enabled_config_is_returned() {
        let store = Arc::new(FakeStore {
            configs: vec![object_store_cfg("t", true)],
        });
        let resolver = TenantConfigResolver::new(store);
        let configs = resolver.enabled_for("t").await.unwrap();
        assert_eq!(configs.len(), 1);
    }
}
