mod config_repositories;
mod lifecycle_audit_repository;
mod parcel_repository;
mod routing_rule_repository;

pub use config_repositories::*;
pub use lifecycle_audit_repository::*;
pub use parcel_repository::*;
pub use routing_rule_repository::*;
