//! §3, §4.5, §9 — Tenant delivery configuration, modeled as tagged variants
//! (not a single nullable-field schema) so each deliverer only ever sees its
//! own variant.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;

fn default_bucket_prefix() -> String {
    "ROSA/cluster-logs/".to_owned()
}

/// Fields common to both delivery-config variants.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CommonConfig {
    pub tenant: String,
    pub enabled: bool,
    #[serde(default)]
    pub desired_applications: Option<HashSet<String>>,
    pub target_region: String,
    pub distribution_role: String,
    #[serde(default)]
    pub ttl: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ObjectStoreConfig {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub bucket_name: String,
    #[serde(default = "default_bucket_prefix")]
    pub bucket_prefix: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LogServiceConfig {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub log_group_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryConfig {
    ObjectStore(ObjectStoreConfig),
    LogService(LogServiceConfig),
}

impl DeliveryConfig {
    pub fn common(&self) -> &CommonConfig {
        match self {
            Self::ObjectStore(c) => &c.common,
            Self::LogService(c) => &c.common,
        }
    }

    /// `enabled = true` and `ttl` absent or in the future (§4.5). Configs
    /// failing this predicate are invisible to the resolver (§3).
    pub fn is_visible(&self, now: DateTime<Utc>) -> bool {
        let common = self.common();
        common.enabled && common.ttl.is_none_or(|ttl| ttl > now)
    }

    /// `desired_applications` unset OR contains the application case-insensitively (§4.5).
    pub fn application_enabled(&self, application: &str) -> bool {
        match &self.common().desired_applications {
            None => true,
            Some(apps) => apps
                .iter()
                .any(|a| a.eq_ignore_ascii_case(application)),
        }
    }
}
