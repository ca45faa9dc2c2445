use async_trait::async_trait;
use common::domain::{ChuteAssignment, DomainResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which endpoint implementation is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Listen,
    Dial,
    Null,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listen => write!(f, "listen"),
            Self::Dial => write!(f, "dial"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// Connection to the sorter hardware.
///
/// Inbound messages are not returned from any method; implementations push
/// them as [`SorterEvent`](crate::SorterEvent)s through the publisher they
/// were built with.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait SorterEndpoint: Send + Sync {
    /// Begin listening or dialing. Calling `start` on a running endpoint is a no-op.
    async fn start(&self) -> DomainResult<()>;

    /// Stop background tasks and drop the active connection.
    async fn stop(&self) -> DomainResult<()>;

    /// Write a chute assignment to the active connection.
    ///
    /// Returns `false` when there is no connection or the write failed;
    /// never errors.
    async fn send_chute_assignment(&self, assignment: &ChuteAssignment) -> bool;

    fn is_connected(&self) -> bool;

    fn kind(&self) -> EndpointKind;
}
