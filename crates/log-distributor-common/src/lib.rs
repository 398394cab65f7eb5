//! Shared domain types for the log distributor: the object-key contract,
//! tenant delivery configuration, credentials, and the error-disposition
//! taxonomy every component classifies its failures into.

pub mod credentials;
pub mod disposition;
pub mod event;
pub mod key_parser;
pub mod metadata;
pub mod tenant_config;

pub use credentials::Credentials;
pub use disposition::{Disposition, Verdict};
pub use event::LogEvent;
pub use key_parser::{Environment, KeyParseError, TenantInfo};
pub use metadata::ProcessingMetadata;
pub use tenant_config::{DeliveryConfig, LogServiceConfig, ObjectStoreConfig};
