// MIT License - Copyright (c) 2026 Peter Wright
// Worker lifecycle supervision

//! Every long-running task of the gateway is a named worker started from a
//! factory. Each worker gets its own child of the supervisor's root
//! [`CancellationToken`], so one worker can be stopped or restarted
//! without disturbing the others, and cancelling the root stops them all.
//!
//! [`Supervisor::monitor`] polls liveness. A worker that ends on its own
//! (error, panic or an unexpected clean return) is restarted per its
//! [`RestartPolicy`]; when that is exhausted, or the worker is critical,
//! the supervisor trips its shutdown token. A worker that stayed up for
//! [`SupervisorSettings::restart_reset`] before dying starts over with a
//! full restart budget.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{BridgeError, Result};

pub type WorkerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Builds a fresh worker future for each (re)start.
pub type WorkerFactory = Arc<dyn Fn(CancellationToken) -> WorkerFuture + Send + Sync>;

/// Turn an async closure into a [`WorkerFactory`].
pub fn worker_fn<F, Fut>(f: F) -> WorkerFactory
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |cancel| Box::pin(f(cancel)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Restart up to `max_restarts` times, then escalate.
    Restart { max_restarts: u32 },
    /// Single-instance critical worker: its death shuts the gateway down.
    Escalate,
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub poll_interval: Duration,
    pub join_timeout: Duration,
    pub restart_reset: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            join_timeout: Duration::from_secs(10),
            restart_reset: Duration::from_secs(600),
        }
    }
}

struct Worker {
    factory: WorkerFactory,
    policy: RestartPolicy,
    cancel: CancellationToken,
    handle: JoinHandle<Result<()>>,
    started: Instant,
    restarts: u32,
}

pub struct Supervisor {
    root: CancellationToken,
    shutdown: CancellationToken,
    workers: Mutex<HashMap<String, Worker>>,
    settings: SupervisorSettings,
}

impl Supervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self {
            root: CancellationToken::new(),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(HashMap::new()),
            settings,
        }
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<String, Worker>> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cancelled when a worker dies beyond recovery.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn spawn(&self, factory: &WorkerFactory) -> (CancellationToken, JoinHandle<Result<()>>) {
        let cancel = self.root.child_token();
        let handle = tokio::spawn(factory(cancel.clone()));
        (cancel, handle)
    }

    pub fn start(&self, name: &str, policy: RestartPolicy, factory: WorkerFactory) -> Result<()> {
        let mut workers = self.workers();
        if workers.contains_key(name) {
            return Err(BridgeError::Worker {
                name: name.to_string(),
                details: "already running".into(),
            });
        }
        let (cancel, handle) = self.spawn(&factory);
        debug!("Worker {name} started");
        workers.insert(
            name.to_string(),
            Worker {
                factory,
                policy,
                cancel,
                handle,
                started: Instant::now(),
                restarts: 0,
            },
        );
        Ok(())
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.workers()
            .get(name)
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub fn worker_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop one worker. Returns `false` if it had to be aborted.
    pub async fn stop(&self, name: &str) -> bool {
        let worker = self.workers().remove(name);
        let Some(worker) = worker else {
            return true;
        };
        worker.cancel.cancel();
        join(name, worker.handle, Instant::now() + self.settings.join_timeout).await
    }

    /// Stop every worker, waiting up to the join timeout in total.
    /// Returns the names of workers that did not stop in time.
    pub async fn stop_all(&self) -> Vec<String> {
        info!("Stopping all workers");
        self.root.cancel();
        let workers: Vec<(String, Worker)> = self.workers().drain().collect();
        let deadline = Instant::now() + self.settings.join_timeout;

        let mut stragglers = Vec::new();
        for (name, worker) in workers {
            if !join(&name, worker.handle, deadline).await {
                stragglers.push(name);
            }
        }
        if !stragglers.is_empty() {
            warn!("{} workers did not shut down gracefully: {stragglers:?}", stragglers.len());
        }
        stragglers
    }

    /// Poll worker liveness until `cancel` fires or a worker dies beyond
    /// recovery.
    pub async fn monitor(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
            if !self.check_workers().await {
                self.shutdown.cancel();
                return;
            }
        }
    }

    /// Restart dead workers. Returns `false` if shutdown is required.
    async fn check_workers(&self) -> bool {
        let dead: Vec<(String, Worker)> = {
            let mut workers = self.workers();
            let names: Vec<String> = workers
                .iter()
                .filter(|(_, w)| w.handle.is_finished())
                .map(|(n, _)| n.clone())
                .collect();
            names
                .into_iter()
                .filter_map(|n| workers.remove(&n).map(|w| (n, w)))
                .collect()
        };

        let mut healthy = true;
        for (name, worker) in dead {
            match worker.handle.await {
                Ok(Ok(())) => error!("Worker {name} exited unexpectedly"),
                Ok(Err(e)) => error!("Worker {name} failed: {e}"),
                Err(e) => error!("Worker {name} panicked: {e}"),
            }

            let recent = if worker.started.elapsed() >= self.settings.restart_reset {
                0
            } else {
                worker.restarts
            };
            match worker.policy {
                RestartPolicy::Restart { max_restarts } if recent < max_restarts => {
                    let restarts = recent + 1;
                    warn!("Restarting worker {name} ({restarts}/{max_restarts})");
                    let (cancel, handle) = self.spawn(&worker.factory);
                    self.workers().insert(
                        name,
                        Worker {
                            factory: worker.factory,
                            policy: worker.policy,
                            cancel,
                            handle,
                            started: Instant::now(),
                            restarts,
                        },
                    );
                }
                RestartPolicy::Restart { .. } => {
                    error!("Worker {name} keeps dying, initiating shutdown");
                    healthy = false;
                }
                RestartPolicy::Escalate => {
                    error!("Critical worker {name} died, initiating shutdown");
                    healthy = false;
                }
            }
        }
        healthy
    }
}

/// Wait for a worker until `deadline`, aborting it if it overruns.
async fn join(name: &str, mut handle: JoinHandle<Result<()>>, deadline: Instant) -> bool {
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(Ok(()))) => {
            debug!("Worker {name} stopped");
            true
        }
        Ok(Ok(Err(e))) => {
            warn!("Worker {name} stopped with error: {e}");
            true
        }
        Ok(Err(e)) => {
            warn!("Worker {name} panicked during shutdown: {e}");
            true
        }
        Err(_) => {
            warn!("Worker {name} is still running, aborting");
            handle.abort();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn settings() -> SupervisorSettings {
        SupervisorSettings {
            poll_interval: Duration::from_secs(5),
            join_timeout: Duration::from_secs(2),
            restart_reset: Duration::from_secs(60),
        }
    }

    fn until_cancelled() -> WorkerFactory {
        worker_fn(|cancel: CancellationToken| async move {
            cancel.cancelled().await;
            Ok(())
        })
    }

    /// Counts starts; dies immediately with an error.
    fn dying(starts: Arc<AtomicU32>) -> WorkerFactory {
        worker_fn(move |_cancel| {
            let starts = Arc::clone(&starts);
            async move {
                starts.fetch_add(1, Ordering::SeqCst);
                Err(BridgeError::SerialClosed)
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_one_leaves_others_running() {
        let sup = Supervisor::new(settings());
        let policy = RestartPolicy::Restart { max_restarts: 3 };
        sup.start("serial", policy, until_cancelled()).unwrap();
        sup.start("drain", policy, until_cancelled()).unwrap();

        assert!(sup.stop("serial").await);
        assert!(!sup.is_running("serial"));
        assert!(sup.is_running("drain"));
        assert_eq!(sup.worker_names(), vec!["drain".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_name_rejected() {
        let sup = Supervisor::new(settings());
        sup.start("a", RestartPolicy::Escalate, until_cancelled()).unwrap();
        let err = sup
            .start("a", RestartPolicy::Escalate, until_cancelled())
            .unwrap_err();
        assert!(matches!(err, BridgeError::Worker { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_is_prompt() {
        let sup = Supervisor::new(settings());
        for name in ["a", "b", "c"] {
            sup.start(name, RestartPolicy::Escalate, until_cancelled()).unwrap();
        }
        let started = Instant::now();
        assert!(sup.stop_all().await.is_empty());
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(sup.worker_names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_reports_stragglers() {
        let sup = Supervisor::new(settings());
        sup.start("good", RestartPolicy::Escalate, until_cancelled()).unwrap();
        sup.start(
            "stuck",
            RestartPolicy::Escalate,
            worker_fn(|_cancel| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }),
        )
        .unwrap();

        let started = Instant::now();
        assert_eq!(sup.stop_all().await, vec!["stuck".to_string()]);
        assert!(started.elapsed() <= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_restarts_then_escalates() {
        let sup = Arc::new(Supervisor::new(settings()));
        let starts = Arc::new(AtomicU32::new(0));
        sup.start(
            "flaky",
            RestartPolicy::Restart { max_restarts: 2 },
            dying(Arc::clone(&starts)),
        )
        .unwrap();
        sup.start("steady", RestartPolicy::Escalate, until_cancelled())
            .unwrap();

        let cancel = CancellationToken::new();
        sup.monitor(cancel).await;

        // initial start plus two restarts, then shutdown
        assert_eq!(starts.load(Ordering::SeqCst), 3);
        assert!(sup.shutdown_token().is_cancelled());
        assert!(sup.is_running("steady"));
        sup.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_lived_worker_keeps_restart_budget() {
        let sup = Arc::new(Supervisor::new(settings()));
        let starts = Arc::new(AtomicU32::new(0));
        let s = Arc::clone(&starts);
        // dies every two minutes, well past the reset interval
        sup.start(
            "serial",
            RestartPolicy::Restart { max_restarts: 1 },
            worker_fn(move |_cancel| {
                s.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(120)).await;
                    Err(BridgeError::SerialClosed)
                }
            }),
        )
        .unwrap();

        let cancel = CancellationToken::new();
        let monitor = {
            let sup = Arc::clone(&sup);
            let cancel = cancel.clone();
            tokio::spawn(async move { sup.monitor(cancel).await })
        };
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(starts.load(Ordering::SeqCst) >= 4);
        assert!(!sup.shutdown_token().is_cancelled());

        cancel.cancel();
        monitor.await.unwrap();
        sup.stop_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_worker_escalates_immediately() {
        let sup = Supervisor::new(settings());
        let starts = Arc::new(AtomicU32::new(0));
        sup.start("drain", RestartPolicy::Escalate, dying(Arc::clone(&starts)))
            .unwrap();
        sup.monitor(CancellationToken::new()).await;
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(sup.shutdown_token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_worker_is_restarted() {
        let sup = Arc::new(Supervisor::new(settings()));
        let starts = Arc::new(AtomicU32::new(0));
        let s = Arc::clone(&starts);
        sup.start(
            "panicky",
            RestartPolicy::Restart { max_restarts: 5 },
            worker_fn(move |cancel: CancellationToken| {
                let n = s.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        panic!("first run fails");
                    }
                    cancel.cancelled().await;
                    Ok(())
                }
            }),
        )
        .unwrap();

        let cancel = CancellationToken::new();
        let monitor = {
            let sup = Arc::clone(&sup);
            let cancel = cancel.clone();
            tokio::spawn(async move { sup.monitor(cancel).await })
        };
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(starts.load(Ordering::SeqCst), 2);
        assert!(sup.is_running("panicky"));

        cancel.cancel();
        monitor.await.unwrap();
        assert!(!sup.shutdown_token().is_cancelled());
        sup.stop_all().await;
    }
}
