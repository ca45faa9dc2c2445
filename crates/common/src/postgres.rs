mod client;
mod config;
mod endpoint_config_repository;
mod lifecycle_audit_repository;
mod parcel_repository;
mod routing_rule_repository;
mod timeout_policy_repository;

pub use client::*;
pub use config::*;
pub use endpoint_config_repository::*;
pub use lifecycle_audit_repository::*;
pub use parcel_repository::*;
pub use routing_rule_repository::*;
pub use timeout_policy_repository::*;
