//! §4.6, §4.7 — the two delivery-destination implementations a tenant
//! config can select between.

pub mod log_service;
pub mod object_store;

pub use log_service::LogServiceDeliverer;
pub use object_store::ObjectStoreDeliverer;
