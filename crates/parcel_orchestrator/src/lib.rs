mod domain;
mod parcel_orchestrator;

pub use domain::*;
pub use parcel_orchestrator::*;
