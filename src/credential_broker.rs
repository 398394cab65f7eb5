//! §4.4, §9 — two-hop credential exchange with a read-mostly cache.
//!
//! Modeled per §9 as a polymorphic `CredentialSource` rather than a class
//! hierarchy: `ProcessIdentity` is the root (hop 0, the process's own
//! credentials), `ExchangedFrom` composes one hop on top of another source,
//! and the two-hop exchange this system needs is simply
//! `ExchangedFrom(ProcessIdentity, tenant_role)` — `ProcessIdentity::fetch`
//! already performs the hop-1 exchange internally, so composing one more
//! `ExchangedFrom` on top yields the full two-hop chain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use log_distributor_common::credentials::CredentialCacheKey;
use log_distributor_common::tenant_config::CommonConfig;
use log_distributor_common::Credentials;

use crate::clients::{CredentialExchangeClient, CredentialExchangeError};

/// One hop of credential derivation (§9).
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self) -> Result<Credentials, CredentialExchangeError>;
}

/// Hop 1: process identity → central distribution principal (no external id).
/// The broker never hands this out directly to a deliverer — it is only ever
/// the upstream of an `ExchangedFrom` chain (§4.4: "MUST NOT silently fall
/// back to unprivileged ambient credentials").
pub struct ProcessIdentity {
    exchange: Arc<dyn CredentialExchangeClient>,
    central_role: String,
}

impl ProcessIdentity {
    pub fn new(exchange: Arc<dyn CredentialExchangeClient>, central_role: String) -> Self {
        Self {
            exchange,
            central_role,
        }
    }
}

#[async_trait]
impl CredentialSource for ProcessIdentity {
    async fn fetch(&self) -> Result<Credentials, CredentialExchangeError> {
        self.exchange.exchange_for_central(&self.central_role).await
    }
}

/// Hop 2+: exchanges an upstream source's credentials for a tenant principal.
pub struct ExchangedFrom {
    exchange: Arc<dyn CredentialExchangeClient>,
    upstream: Arc<dyn CredentialSource>,
    tenant_role: String,
    external_id: String,
    session_name: String,
    region: String,
}

#[async_trait]
impl CredentialSource for ExchangedFrom {
    async fn fetch(&self) -> Result<Credentials, CredentialExchangeError> {
        let upstream = self.upstream.fetch().await?;
        self.exchange
            .exchange_for_tenant(
                &upstream,
                &self.tenant_role,
                &self.external_id,
                &self.session_name,
                &self.region,
            )
            .await
    }
}

/// §4.4 — caches credentials keyed by `(role, external_id, session_name)`,
/// refreshing lazily within 60s of expiry (§3).
pub struct CredentialBroker {
    exchange: Arc<dyn CredentialExchangeClient>,
    central_role: String,
    cache: Mutex<HashMap<CredentialCacheKey, Credentials>>,
}

impl CredentialBroker {
    pub fn new(exchange: Arc<dyn CredentialExchangeClient>, central_role: String) -> Self {
        Self {
            exchange,
            central_role,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Second hop, composed atop [`ProcessIdentity`] via [`ExchangedFrom`],
    /// keyed and cached by `(role, external_id, session_name)`.
    pub async fn exchange_for_tenant(
        &self,
        tenant_role: &str,
        external_id: &str,
        session_name: &str,
        region: &str,
    ) -> Result<Credentials, CredentialExchangeError> {
        let key = CredentialCacheKey {
            role: tenant_role.to_owned(),
            external_id: Some(external_id.to_owned()),
            session_name: session_name.to_owned(),
        };

        if let Some(cached) = self.cached_if_fresh(&key) {
            return Ok(cached);
        }

        let source = ExchangedFrom {
            exchange: self.exchange.clone(),
            upstream: Arc::new(ProcessIdentity::new(
                self.exchange.clone(),
                self.central_role.clone(),
            )),
            tenant_role: tenant_role.to_owned(),
            external_id: external_id.to_owned(),
            session_name: session_name.to_owned(),
            region: region.to_owned(),
        };
        let fresh = source.fetch().await?;

        self.cache
            .lock()
            .expect("credential cache mutex poisoned")
            .insert(key, fresh.clone());
        Ok(fresh)
    }

    fn cached_if_fresh(&self, key: &CredentialCacheKey) -> Option<Credentials> {
        let guard = self.cache.lock().expect("credential cache mutex poisoned");
        guard
            .get(key)
            .filter(|creds| creds.is_fresh(Utc::now()))
            .cloned()
    }

    /// Convenience composition for a delivery config: the session name
    /// encodes the tenant for the audit trail (§4.4, §6) and the external-id
    /// challenge is the central account identifier, not the tenant name.
    pub async fn credentials_for(
        &self,
        common: &CommonConfig,
    ) -> Result<Credentials, CredentialExchangeError> {
        let session_name = format!("log-distributor-{}-{}", common.tenant, Utc::now().timestamp());
        self.exchange_for_tenant(
            &common.distribution_role,
            &self.central_role,
            &session_name,
            &common.target_region,
        )
        .await
    }

    /// Discards all cached entries. Called on process exit (§9: the
    /// credential cache is the only process-wide mutable state).
    pub fn purge(&self) {
        self.cache
            .lock()
            .expect("credential cache mutex poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExchange {
        central_calls: AtomicUsize,
        tenant_calls: AtomicUsize,
        deny: bool,
    }

    fn creds(expires_in_secs: i64) -> Credentials {
        Credentials {
            access_id: "id".into(),
            secret: "secret".into(),
            session_token: "token".into(),
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
        }
    }

    #[async_trait]
    impl CredentialExchangeClient for CountingExchange {
        async fn exchange_for_central(
            &self,
            _role: &str,
        ) -> Result<Credentials, CredentialExchangeError> {
            self.central_calls.fetch_add(1, Ordering::SeqCst);
            Ok(creds(3600))
        }

        async fn exchange_for_tenant(
            &self,
            _central: &Credentials,
            _tenant_role: &str,
            _external_id: &str,
            _session_name: &str,
            _region: &str,
        ) -> Result<Credentials, CredentialExchangeError> {
            if self.deny {
                return Err(CredentialExchangeError::Denied {
                    message: "denied".into(),
                });
            }
            self.tenant_calls.fetch_add(1, Ordering::SeqCst);
            Ok(creds(3600))
        }
    }

    #[tokio::test]
    async fn cache_hit_skips_second_exchange_call() {
        let exchange = Arc::new(CountingExchange {
            central_calls: AtomicUsize::new(0),
            tenant_calls: AtomicUsize::new(0),
            deny: false,
        });
        let broker = CredentialBroker::new(exchange.clone(), "central-role".into());

        broker
            .exchange_for_tenant("tenant-role", "ext-id", "session-a", "us-east-1")
            .await
            .unwrap();
        broker
            .exchange_for_tenant("tenant-role", "ext-id", "session-a", "us-east-1")
            .await
            .unwrap();

        assert_eq!(exchange.tenant_calls.load(Ordering::SeqCst), 1);
        // Hop 1 ran exactly once too, on the single cache-filling call.
        assert_eq!(exchange.central_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_session_name_is_a_cache_miss() {
        let exchange = Arc::new(CountingExchange {
            central_calls: AtomicUsize::new(0),
            tenant_calls: AtomicUsize::new(0),
            deny: false,
        });
        let broker = CredentialBroker::new(exchange.clone(), "central-role".into());

        broker
            .exchange_for_tenant("tenant-role", "ext-id", "session-a", "us-east-1")
            .await
            .unwrap();
        broker
            .exchange_for_tenant("tenant-role", "ext-id", "session-b", "us-east-1")
            .await
            .unwrap();

        assert_eq!(exchange.tenant_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn denial_propagates_as_error_not_ambient_fallback() {
        let exchange = Arc::new(CountingExchange {
            central_calls: AtomicUsize::new(0),
            tenant_calls: AtomicUsize::new(0),
            deny: true,
        });
        let broker = CredentialBroker::new(exchange, "central-role".into());

        let err = broker
            .exchange_for_tenant("tenant-role", "ext-id", "session-a", "us-east-1")
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialExchangeError::Denied { .. }));
    }

    #[tokio::test]
    async fn purge_clears_cache_and_forces_refetch() {
        let exchange = Arc::new(CountingExchange {
            central_calls: AtomicUsize::new(0),
            tenant_calls: AtomicUsize::new(0),
            deny: false,
        });
        let broker = CredentialBroker::new(exchange.clone(), "central-role".into());

        broker
            .exchange_for_tenant("tenant-role", "ext-id", "session-a", "us-east-1")
            .await
            .unwrap();
        broker.purge();
        broker
            .exchange_for_tenant("tenant-role", "ext-id", "session-a", "us-east-1")
            .await
            .unwrap();

        assert_eq!(exchange.tenant_calls.load(Ordering::SeqCst), 2);
    }
}
