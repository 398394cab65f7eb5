//! Multi-tenant log router: consumes file-creation event notifications and
//! fans each file out to tenant-owned delivery destinations.

pub mod aws;
pub mod clients;
pub mod config;
pub mod credential_broker;
pub mod deliverers;
pub mod host;
pub mod metrics;
pub mod notification;
pub mod orchestrator;
pub mod requeue;
pub mod tenant_config_resolver;
