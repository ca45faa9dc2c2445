mod condition;
mod context;

pub use condition::*;
pub use context::*;

pub use cel_interpreter::Value as CelValue;
