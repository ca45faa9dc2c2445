use common::domain::DomainResult;
use futures::future::BoxFuture;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info_span, warn, Instrument};

const IDLE_POLL: Duration = Duration::from_millis(5);

/// One named side effect, run independently of its siblings.
pub struct BackgroundJob {
    name: &'static str,
    future: BoxFuture<'static, DomainResult<()>>,
}

impl BackgroundJob {
    pub fn new<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = DomainResult<()>> + Send + 'static,
    {
        Self {
            name,
            future: Box::pin(future),
        }
    }
}

/// Tracks fire-and-forget work so shutdown can wait for it.
#[derive(Debug, Clone, Default)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
        }
    }

    /// Run `jobs` concurrently for one parcel.
    ///
    /// A failing or panicking job is logged and does not affect the others.
    pub fn fan_out(&self, parcel_id: &str, jobs: Vec<BackgroundJob>) {
        if jobs.is_empty() {
            return;
        }

        let span = info_span!("parcel_side_effects", parcel_id = %parcel_id);
        let parcel_id = parcel_id.to_string();
        self.tracker.spawn(
            async move {
                let mut set = JoinSet::new();
                for job in jobs {
                    let name = job.name;
                    let future = job.future;
                    set.spawn(async move { (name, future.await) });
                }

                while let Some(joined) = set.join_next().await {
                    match joined {
                        Ok((name, Ok(()))) => debug!(parcel_id = %parcel_id, job = name, "background job finished"),
                        Ok((name, Err(e))) => {
                            warn!(parcel_id = %parcel_id, job = name, error = %e, "background job failed")
                        }
                        Err(e) => error!(parcel_id = %parcel_id, error = %e, "background job panicked"),
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Spawn a single tracked task.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(future);
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until no tracked task is running.
    ///
    /// Leaves the tracker open, so a concurrent `shutdown` is unaffected.
    pub async fn wait_idle(&self) {
        while !self.tracker.is_empty() {
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    /// Stop accepting work and wait up to `timeout` for in-flight tasks.
    ///
    /// Returns `false` if tasks were still running when the timeout elapsed.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tracker.close();
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    in_flight = self.tracker.len(),
                    "background tasks did not finish within timeout"
                );
                false
            }
        }
    }
}
