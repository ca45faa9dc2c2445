mod domain;
mod tcp;

pub use domain::*;
pub use tcp::*;
