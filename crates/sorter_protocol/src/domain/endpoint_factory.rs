use crate::domain::{EventPublisher, SorterEndpoint};
use crate::tcp::{TcpClientEndpoint, TcpServerEndpoint};
use common::domain::{DomainError, DomainResult, EndpointConfig, EndpointMode};
use std::sync::Arc;

/// Builds an endpoint from its configuration and the shared event publisher.
pub type EndpointConstructor =
    Box<dyn Fn(EndpointConfig, EventPublisher) -> Arc<dyn SorterEndpoint> + Send + Sync>;

/// Registry of endpoint constructors keyed by [`EndpointMode`].
///
/// # Example
/// ```ignore
/// let factory = SorterEndpointFactory::with_tcp_endpoints();
/// let endpoint = factory.create_endpoint(&config, publisher)?;
/// ```
pub struct SorterEndpointFactory {
    listen_constructor: Option<EndpointConstructor>,
    dial_constructor: Option<EndpointConstructor>,
}

impl std::fmt::Debug for SorterEndpointFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SorterEndpointFactory")
            .field("listen_registered", &self.listen_constructor.is_some())
            .field("dial_registered", &self.dial_constructor.is_some())
            .finish()
    }
}

impl Default for SorterEndpointFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SorterEndpointFactory {
    /// Empty factory with nothing registered.
    pub fn new() -> Self {
        Self {
            listen_constructor: None,
            dial_constructor: None,
        }
    }

    /// Factory with the TCP listen and dial endpoints registered.
    pub fn with_tcp_endpoints() -> Self {
        let mut factory = Self::new();
        factory.register_listen(|config, publisher| {
            Arc::new(TcpServerEndpoint::new(config, publisher))
        });
        factory.register_dial(|config, publisher| {
            Arc::new(TcpClientEndpoint::new(config, publisher))
        });
        factory
    }

    pub fn register_listen<F>(&mut self, constructor: F)
    where
        F: Fn(EndpointConfig, EventPublisher) -> Arc<dyn SorterEndpoint> + Send + Sync + 'static,
    {
        self.listen_constructor = Some(Box::new(constructor));
    }

    pub fn register_dial<F>(&mut self, constructor: F)
    where
        F: Fn(EndpointConfig, EventPublisher) -> Arc<dyn SorterEndpoint> + Send + Sync + 'static,
    {
        self.dial_constructor = Some(Box::new(constructor));
    }

    fn constructor_for(&self, mode: EndpointMode) -> Option<&EndpointConstructor> {
        match mode {
            EndpointMode::Listen => self.listen_constructor.as_ref(),
            EndpointMode::Dial => self.dial_constructor.as_ref(),
        }
    }

    pub fn is_supported(&self, mode: EndpointMode) -> bool {
        self.constructor_for(mode).is_some()
    }

    /// Validate `config` and build the matching endpoint. The endpoint is not
    /// started.
    pub fn create_endpoint(
        &self,
        config: &EndpointConfig,
        publisher: EventPublisher,
    ) -> DomainResult<Arc<dyn SorterEndpoint>> {
        config.validate()?;
        self.constructor_for(config.mode)
            .map(|constructor| constructor(config.clone(), publisher))
            .ok_or_else(|| {
                DomainError::InvalidEndpointConfig(format!(
                    "{} endpoint not registered",
                    config.mode
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{event_channel, EndpointKind, NullSorterEndpoint};

    #[test]
    fn test_empty_factory_rejects_every_mode() {
        let factory = SorterEndpointFactory::new();
        let (publisher, _receiver) = event_channel(1);

        assert!(!factory.is_supported(EndpointMode::Listen));
        let result = factory.create_endpoint(&EndpointConfig::default(), publisher);
        assert!(matches!(result, Err(DomainError::InvalidEndpointConfig(_))));
    }

    #[test]
    fn test_tcp_factory_builds_by_mode() {
        let factory = SorterEndpointFactory::with_tcp_endpoints();
        let (publisher, _receiver) = event_channel(1);

        let listen = factory
            .create_endpoint(&EndpointConfig::default(), publisher.clone())
            .unwrap();
        assert_eq!(listen.kind(), EndpointKind::Listen);

        let dial_config = EndpointConfig {
            mode: EndpointMode::Dial,
            host: "127.0.0.1".to_string(),
            port: 9100,
            ..Default::default()
        };
        let dial = factory.create_endpoint(&dial_config, publisher).unwrap();
        assert_eq!(dial.kind(), EndpointKind::Dial);
    }

    #[test]
    fn test_invalid_config_is_rejected_before_construction() {
        let mut factory = SorterEndpointFactory::new();
        factory.register_listen(|_, _| Arc::new(NullSorterEndpoint::new()));
        let (publisher, _receiver) = event_channel(1);

        let config = EndpointConfig {
            host: String::new(),
            ..Default::default()
        };
        assert!(factory.create_endpoint(&config, publisher).is_err());
    }
}
