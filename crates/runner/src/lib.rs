//! Runs the long-lived processes of a service side by side and shuts them
//! down together.
//!
//! - every process gets a clone of one `CancellationToken`
//! - SIGINT/SIGTERM or the first failing process cancels the token
//! - closers run after all processes stopped, bounded by a timeout
//!
//! # Example
//!
//! ```no_run
//! use sortline_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Runner::new()
//!         .with_named_process("heartbeat", |ctx| async move {
//!             while !ctx.is_cancelled() {
//!                 tokio::select! {
//!                     _ = ctx.cancelled() => break,
//!                     _ = tokio::time::sleep(Duration::from_secs(1)) => {
//!                         tracing::info!("still alive");
//!                     }
//!                 }
//!             }
//!             Ok(())
//!         })
//!         .with_closer(|| async move { Ok(()) })
//!         .with_closer_timeout(Duration::from_secs(5))
//!         .run()
//!         .await;
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

type BoxFuture = Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>;

/// A process body: receives the shared cancellation token.
pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> BoxFuture + Send>;

/// A cleanup step run once every process has stopped.
pub type Closer = Box<dyn FnOnce() -> BoxFuture + Send>;

struct NamedProcess {
    name: String,
    process: AppProcess,
}

/// How the processes ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every process returned `Ok` or the token was cancelled externally
    Clean,
    /// A process failed before shutdown was requested
    Failed { process: String, error: anyhow::Error },
}

impl RunOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }
}

pub struct Runner {
    app_processes: Vec<NamedProcess>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// New runner with a 10 second closer timeout.
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Add an anonymous process.
    pub fn with_app_process<F, Fut>(self, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let index = self.app_processes.len();
        self.with_named_process(format!("process-{}", index), process)
    }

    /// Add a process whose name shows up in lifecycle logs.
    pub fn with_named_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.app_processes.push(NamedProcess {
            name: name.into(),
            process: Box::new(|token| Box::pin(process(token))),
        });
        self
    }

    /// Add a closer. All closers run concurrently after the processes stop,
    /// each one regardless of the others' results.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Use an externally owned token, e.g. to stop the runner from a test.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Run until a signal or failure, run closers, then exit the process.
    pub async fn run(self) {
        let token = self.cancellation_token.clone();
        spawn_signal_handlers(token);

        match self.run_until_stopped().await {
            RunOutcome::Clean => {
                tracing::info!("application exiting normally");
                std::process::exit(0);
            }
            RunOutcome::Failed { process, error } => {
                tracing::error!(process = %process, "application exiting with error: {:#}", error);
                std::process::exit(1);
            }
        }
    }

    /// Run processes until they all finish or the token is cancelled, then
    /// run the closers. Does not install signal handlers or exit.
    pub async fn run_until_stopped(self) -> RunOutcome {
        let token = self.cancellation_token;
        let mut join_set = JoinSet::new();

        for NamedProcess { name, process } in self.app_processes {
            let process_token = token.clone();
            join_set.spawn(async move {
                tracing::info!(process = %name, "starting app process");
                let result = process(process_token).await;
                (name, result)
            });
        }

        let mut outcome = RunOutcome::Clean;
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok((name, Ok(()))) => {
                    tracing::info!(process = %name, "app process stopped");
                }
                Ok((name, Err(error))) => {
                    if !token.is_cancelled() {
                        tracing::error!(process = %name, "app process error: {:#}", error);
                        outcome = RunOutcome::Failed {
                            process: name,
                            error,
                        };
                        token.cancel();
                    } else {
                        tracing::warn!(process = %name, "app process error during shutdown: {:#}", error);
                    }
                }
                Err(err) => {
                    tracing::error!("app process panicked: {}", err);
                    token.cancel();
                }
            }

            if token.is_cancelled() {
                break;
            }
        }

        // Cancellation reaches every process through the shared token; give
        // them the closer timeout to return before aborting
        if !join_set.is_empty() {
            let drained = tokio::time::timeout(self.closer_timeout, async {
                while let Some(result) = join_set.join_next().await {
                    if let Ok((name, _)) = result {
                        tracing::info!(process = %name, "app process stopped");
                    }
                }
            })
            .await;
            if drained.is_err() {
                tracing::warn!("app processes did not stop in time, aborting");
                join_set.shutdown().await;
            }
        }

        run_closers(self.closers, self.closer_timeout).await;
        outcome
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("received shutdown signal");
                ctrl_c_token.cancel();
            }
            Err(err) => {
                tracing::error!("error setting up signal handler: {}", err);
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("received SIGTERM signal");
                token.cancel();
            }
            Err(err) => {
                tracing::error!("error setting up SIGTERM handler: {}", err);
            }
        }
    });
}

async fn run_closers(closers: Vec<Closer>, closer_timeout: Duration) {
    if closers.is_empty() {
        return;
    }

    tracing::info!("running closers with timeout of {:?}", closer_timeout);

    let mut closer_set = JoinSet::new();
    for closer in closers {
        closer_set.spawn(async move { closer().await });
    }

    let result = tokio::time::timeout(closer_timeout, async {
        while let Some(result) = closer_set.join_next().await {
            match result {
                Ok(Ok(())) => tracing::debug!("closer completed"),
                Ok(Err(err)) => tracing::error!("closer error: {:#}", err),
                Err(err) => tracing::error!("closer panicked: {}", err),
            }
        }
    })
    .await;

    match result {
        Ok(()) => tracing::info!("all closers completed"),
        Err(_) => tracing::error!("closers timed out after {:?}", closer_timeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cancellation_stops_processes_and_runs_closers() {
        let closer_called = Arc::new(AtomicBool::new(false));
        let closer_flag = closer_called.clone();
        let token = CancellationToken::new();

        let runner = Runner::new()
            .with_named_process("waiter", |ctx| async move {
                ctx.cancelled().await;
                Ok(())
            })
            .with_closer(move || async move {
                closer_flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .with_cancellation_token(token.clone())
            .with_closer_timeout(Duration::from_secs(1));

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let outcome = runner.run_until_stopped().await;
        assert!(outcome.is_clean());
        assert!(closer_called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failing_process_cancels_the_rest() {
        let stopped = Arc::new(AtomicUsize::new(0));
        let stopped_clone = stopped.clone();

        let runner = Runner::new()
            .with_named_process("long-lived", move |ctx| async move {
                ctx.cancelled().await;
                stopped_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .with_named_process("broken", |_ctx| async move {
                Err(anyhow::anyhow!("listener bind failed"))
            })
            .with_closer_timeout(Duration::from_secs(1));

        match runner.run_until_stopped().await {
            RunOutcome::Failed { process, error } => {
                assert_eq!(process, "broken");
                assert!(error.to_string().contains("bind failed"));
            }
            RunOutcome::Clean => panic!("expected failure outcome"),
        }
        assert_eq!(stopped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closers_run_even_when_one_fails() {
        let ran = Arc::new(AtomicUsize::new(0));
        let first = ran.clone();
        let second = ran.clone();

        let token = CancellationToken::new();
        token.cancel();

        let outcome = Runner::new()
            .with_closer(move || async move {
                first.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("flush failed"))
            })
            .with_closer(move || async move {
                second.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .with_cancellation_token(token)
            .run_until_stopped()
            .await;

        assert!(outcome.is_clean());
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_closers_are_bounded_by_timeout() {
        let token = CancellationToken::new();
        token.cancel();

        let outcome = Runner::new()
            .with_closer(|| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .with_closer_timeout(Duration::from_millis(100))
            .with_cancellation_token(token)
            .run_until_stopped()
            .await;

        assert!(outcome.is_clean());
    }
}
