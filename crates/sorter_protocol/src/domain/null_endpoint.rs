use crate::domain::{EndpointKind, SorterEndpoint};
use async_trait::async_trait;
use common::domain::{ChuteAssignment, DomainResult};
use tracing::debug;

/// Endpoint used when no real endpoint can be built.
///
/// Every operation succeeds and no events are ever produced.
#[derive(Debug, Default, Clone)]
pub struct NullSorterEndpoint;

impl NullSorterEndpoint {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SorterEndpoint for NullSorterEndpoint {
    async fn start(&self) -> DomainResult<()> {
        Ok(())
    }

    async fn stop(&self) -> DomainResult<()> {
        Ok(())
    }

    async fn send_chute_assignment(&self, assignment: &ChuteAssignment) -> bool {
        debug!(
            parcel_id = %assignment.parcel_id,
            chute_id = %assignment.chute_id,
            "null endpoint discarding chute assignment"
        );
        true
    }

    fn is_connected(&self) -> bool {
        false
    }

    fn kind(&self) -> EndpointKind {
        EndpointKind::Null
    }
}
