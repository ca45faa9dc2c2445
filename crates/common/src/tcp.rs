mod reconnect_backoff;

pub use reconnect_backoff::*;
