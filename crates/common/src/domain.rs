mod audit;
mod chute_assignment;
mod endpoint_config;
mod parcel;
mod result;
mod routing_rule;
mod scan;
mod timeout_policy;
mod wcs;

pub use audit::*;
pub use chute_assignment::*;
pub use endpoint_config::*;
pub use parcel::*;
pub use result::*;
pub use routing_rule::*;
pub use scan::*;
pub use timeout_policy::*;
pub use wcs::*;
