//! §4.6 Object-Store Deliverer — copies the source object into the tenant's
//! bucket at a derived key.

use std::sync::Arc;

use log_distributor_common::{Disposition, TenantInfo};
use log_distributor_common::tenant_config::ObjectStoreConfig;

use crate::clients::{ObjectStoreClient, ObjectStoreError};
use crate::credential_broker::CredentialBroker;

pub struct ObjectStoreDeliverer {
    client: Arc<dyn ObjectStoreClient>,
    credential_broker: Arc<CredentialBroker>,
}

impl ObjectStoreDeliverer {
    pub fn new(client: Arc<dyn ObjectStoreClient>, credential_broker: Arc<CredentialBroker>) -> Self {
        Self {
            client,
            credential_broker,
        }
    }

    /// Appends the portion of the source key from the tenant-segment onward
    /// beneath `bucket_prefix` (§4.6). The source key's leading `cluster`
    /// segment is dropped; everything from `namespace` onward is kept.
    pub fn derive_destination_key(source_key: &str, bucket_prefix: &str) -> String {
        let after_cluster = source_key.splitn(2, '/').nth(1).unwrap_or(source_key);
        format!("{bucket_prefix}{after_cluster}")
    }

    pub async fn deliver(
        &self,
        source_bucket: &str,
        source_key: &str,
        cfg: &ObjectStoreConfig,
        _tenant_info: &TenantInfo,
    ) -> Result<(), Disposition> {
        let dest_key = Self::derive_destination_key(source_key, &cfg.bucket_prefix);

        let credentials = self
            .credential_broker
            .credentials_for(&cfg.common)
            .await
            .map_err(Disposition::recoverable_no_progress)?;

        self.client
            .copy_object(
                &credentials,
                source_bucket,
                source_key,
                &cfg.bucket_name,
                &dest_key,
                &cfg.common.target_region,
            )
            .await
            .map_err(classify)
    }
}

pub(crate) fn classify(err: ObjectStoreError) -> Disposition {
    if err.is_non_recoverable() {
        Disposition::non_recoverable("object-store-delivery", err)
    } else {
        Disposition::recoverable_no_progress(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_key_drops_cluster_and_keeps_rest() {
        let dest = ObjectStoreDeliverer::derive_destination_key(
            "cluster-a/tenant-x/svc-a/pod-1/file.json.gz",
            "logs/",
        );
        assert_eq!(dest, "logs/tenant-x/svc-a/pod-1/file.json.gz");
    }

    #[test]
    fn default_prefix_is_used_verbatim() {
        let dest = ObjectStoreDeliverer::derive_destination_key(
            "cluster-a/tenant-x/svc-a/pod-1/file.json",
            "ROSA/cluster-logs/",
        );
        assert_eq!(dest, "ROSA/cluster-logs/tenant-x/svc-a/pod-1/file.json");
    }
}
