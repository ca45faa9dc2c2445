use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Parcel not found: {0}")]
    ParcelNotFound(String),

    #[error("Parcel already exists: {0}")]
    ParcelAlreadyExists(String),

    #[error("Invalid parcel ID: {0}")]
    InvalidParcelId(String),

    #[error("Invalid lifecycle transition for parcel {parcel_id}: {from} -> {to}")]
    InvalidStageTransition {
        parcel_id: String,
        from: String,
        to: String,
    },

    #[error("Routing rule not found: {0}")]
    RoutingRuleNotFound(String),

    #[error("Invalid routing rule condition for rule {0}: {1}")]
    InvalidRuleCondition(String, String),

    #[error("Endpoint configuration not found")]
    EndpointConfigNotFound,

    #[error("Invalid endpoint configuration: {0}")]
    InvalidEndpointConfig(String),

    #[error("Timeout policy not found")]
    TimeoutPolicyNotFound,

    #[error("Invalid timeout policy: {0}")]
    InvalidTimeoutPolicy(String),

    #[error("Endpoint error: {0}")]
    EndpointError(String),

    #[error("WCS adapter error: {0}")]
    WcsError(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
