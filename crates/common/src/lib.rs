pub mod cel;
pub mod domain;
pub mod memory;
pub mod postgres;
pub mod tcp;
pub mod telemetry;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockEndpointConfigRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockLifecycleAuditRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockParcelRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockRoutingRuleRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockTimeoutPolicyRepository;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockWcsAdapter;
