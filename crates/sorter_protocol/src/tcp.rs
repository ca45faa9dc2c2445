mod connection;
mod tcp_client;
mod tcp_server;
mod wire;

pub(crate) use connection::*;
pub use tcp_client::*;
pub use tcp_server::*;
pub use wire::*;
