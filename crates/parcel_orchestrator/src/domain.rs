mod assignment_sink;
mod background_tasks;
mod config_watcher;
mod orchestrator_config;
mod parcel_orchestration_service;
mod parcel_registry;
mod rule_evaluator;
mod sorter_event_glue;
mod timeout_policy_cache;
mod timeout_supervisor;

pub use assignment_sink::*;
pub use background_tasks::*;
pub use config_watcher::*;
pub use orchestrator_config::*;
pub use parcel_orchestration_service::*;
pub use parcel_registry::*;
pub use rule_evaluator::*;
pub use sorter_event_glue::*;
pub use timeout_policy_cache::*;
pub use timeout_supervisor::*;
