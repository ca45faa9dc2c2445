use crate::domain::{
    event_channel, EndpointKind, EventPublisher, NullSorterEndpoint, SorterEndpoint,
    SorterEndpointFactory, SorterEvent,
};
use common::domain::{
    ChuteAssignment, DomainError, DomainResult, EndpointConfig, EndpointConfigRepository,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// Default capacity of the endpoint event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Clears the reload flag however the reload exits.
struct ReloadFlag<'a>(&'a AtomicBool);

impl<'a> ReloadFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        Self(flag)
    }
}

impl Drop for ReloadFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Stable facade over the single active sorter endpoint.
///
/// The active instance can be swapped at runtime by [`reload`](Self::reload).
/// `start`, `stop` and `reload` serialize on one async guard; sends never
/// wait on it and instead fail closed while a reload is in progress.
pub struct EndpointManager {
    config_repository: Arc<dyn EndpointConfigRepository>,
    factory: SorterEndpointFactory,
    default_config: EndpointConfig,
    active: RwLock<Arc<dyn SorterEndpoint>>,
    reload_guard: tokio::sync::Mutex<()>,
    reloading: AtomicBool,
    publisher: EventPublisher,
    receiver: Mutex<Option<mpsc::Receiver<SorterEvent>>>,
}

impl EndpointManager {
    /// `default_config` is used when the repository holds no configuration.
    pub fn new(
        config_repository: Arc<dyn EndpointConfigRepository>,
        factory: SorterEndpointFactory,
        default_config: EndpointConfig,
        event_buffer: usize,
    ) -> Self {
        let (publisher, receiver) = event_channel(event_buffer);
        Self {
            config_repository,
            factory,
            default_config,
            active: RwLock::new(Arc::new(NullSorterEndpoint::new())),
            reload_guard: tokio::sync::Mutex::new(()),
            reloading: AtomicBool::new(false),
            publisher,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Hand out the event stream. Only the first caller gets it.
    pub fn take_event_receiver(&self) -> Option<mpsc::Receiver<SorterEvent>> {
        self.receiver.lock().ok().and_then(|mut receiver| receiver.take())
    }

    pub fn current_kind(&self) -> EndpointKind {
        self.snapshot().kind()
    }

    pub fn is_connected(&self) -> bool {
        self.snapshot().is_connected()
    }

    pub fn is_reloading(&self) -> bool {
        self.reloading.load(Ordering::Acquire)
    }

    fn snapshot(&self) -> Arc<dyn SorterEndpoint> {
        match self.active.read() {
            Ok(active) => Arc::clone(&*active),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    fn replace_active(&self, endpoint: Arc<dyn SorterEndpoint>) -> Arc<dyn SorterEndpoint> {
        let mut active = match self.active.write() {
            Ok(active) => active,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *active, endpoint)
    }

    async fn load_config(&self) -> DomainResult<EndpointConfig> {
        match self.config_repository.get_endpoint_config().await? {
            Some(config) => Ok(config),
            None => {
                debug!("no stored endpoint config, using defaults");
                Ok(self.default_config.clone())
            }
        }
    }

    /// Load fresh config, build an endpoint and start it when enabled.
    async fn build_endpoint(&self) -> DomainResult<Arc<dyn SorterEndpoint>> {
        let config = self.load_config().await?;
        let endpoint = self
            .factory
            .create_endpoint(&config, self.publisher.clone())?;

        if !config.enabled {
            info!(mode = %config.mode, "endpoint disabled by configuration, not starting");
            return Ok(endpoint);
        }

        endpoint.start().await?;
        Ok(endpoint)
    }

    /// Like `build_endpoint`, but any failure yields the null endpoint.
    async fn build_or_null(&self) -> (Arc<dyn SorterEndpoint>, Option<DomainError>) {
        match self.build_endpoint().await {
            Ok(endpoint) => (endpoint, None),
            Err(e) => {
                error!(error = %e, "failed to bring up sorter endpoint, falling back to null endpoint");
                (Arc::new(NullSorterEndpoint::new()), Some(e))
            }
        }
    }

    /// Build and start the configured endpoint. A running endpoint is left
    /// as is.
    #[instrument(skip(self))]
    pub async fn start(&self) -> DomainResult<()> {
        let _guard = self.reload_guard.lock().await;

        if self.snapshot().kind() != EndpointKind::Null {
            debug!("endpoint already active");
            return Ok(());
        }

        let (endpoint, _) = self.build_or_null().await;
        info!(kind = %endpoint.kind(), "sorter endpoint active");
        self.replace_active(endpoint);
        Ok(())
    }

    /// Stop the active endpoint and fall back to the null endpoint.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> DomainResult<()> {
        let _guard = self.reload_guard.lock().await;

        let old = self.replace_active(Arc::new(NullSorterEndpoint::new()));
        if let Err(e) = old.stop().await {
            warn!(error = %e, kind = %old.kind(), "error stopping sorter endpoint");
        }
        info!("sorter endpoint stopped");
        Ok(())
    }

    /// Replace the active endpoint with one built from fresh configuration.
    ///
    /// The old instance is stopped before the new one starts, so a listen
    /// endpoint can rebind the same port. On failure the null endpoint is
    /// installed and the error returned.
    #[instrument(skip(self))]
    pub async fn reload(&self) -> DomainResult<()> {
        let _guard = self.reload_guard.lock().await;
        let _reloading = ReloadFlag::raise(&self.reloading);

        let old = self.snapshot();
        info!(kind = %old.kind(), "reloading sorter endpoint");
        if let Err(e) = old.stop().await {
            warn!(error = %e, kind = %old.kind(), "error stopping sorter endpoint during reload");
        }

        let (endpoint, failure) = self.build_or_null().await;
        let new_kind = endpoint.kind();
        let replaced = self.replace_active(endpoint);
        drop(replaced);
        drop(old);

        match failure {
            Some(e) => Err(e),
            None => {
                info!(kind = %new_kind, "sorter endpoint reloaded");
                Ok(())
            }
        }
    }

    /// Send through the active endpoint; `false` during a reload.
    pub async fn send_chute_assignment(&self, assignment: &ChuteAssignment) -> bool {
        if self.is_reloading() {
            warn!(
                parcel_id = %assignment.parcel_id,
                chute_id = %assignment.chute_id,
                "endpoint reload in progress, chute assignment not sent"
            );
            return false;
        }
        let endpoint = self.snapshot();
        endpoint.send_chute_assignment(assignment).await
    }
}
