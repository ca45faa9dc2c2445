use async_trait::async_trait;
use common::domain::{ChuteAssignment, DomainResult};
use sorter_protocol::EndpointManager;

/// Where chute assignments go once a decision is made.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AssignmentSink: Send + Sync {
    /// Returns `false` when the assignment could not be delivered
    async fn send_chute_assignment(&self, assignment: &ChuteAssignment) -> bool;
}

/// Something that can rebuild the sorter endpoint from stored configuration.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait EndpointReloader: Send + Sync {
    async fn reload_endpoint(&self) -> DomainResult<()>;
}

#[async_trait]
impl AssignmentSink for EndpointManager {
    async fn send_chute_assignment(&self, assignment: &ChuteAssignment) -> bool {
        EndpointManager::send_chute_assignment(self, assignment).await
    }
}

#[async_trait]
impl EndpointReloader for EndpointManager {
    async fn reload_endpoint(&self) -> DomainResult<()> {
        self.reload().await
    }
}
