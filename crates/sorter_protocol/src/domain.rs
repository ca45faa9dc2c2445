mod endpoint_factory;
mod endpoint_manager;
mod null_endpoint;
mod sorter_endpoint;
mod sorter_event;

pub use endpoint_factory::*;
pub use endpoint_manager::*;
pub use null_endpoint::*;
pub use sorter_endpoint::*;
pub use sorter_event::*;
