//! Time-driven monitoring: per-endpoint interval triggers feeding a
//! bounded worker pool.
//!
//! The scheduler owns the wall-clock and the runtime status map; it never
//! owns persisted data. One endpoint never runs concurrently with itself:
//! a trigger for an endpoint that is already queued or running is dropped.
//! Worker failures are isolated per endpoint — an error or panic while
//! checking one endpoint leaves the rest of the pass untouched.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;

use crate::alert::AlertDispatcher;
use crate::checker::{CheckMode, Checker};
use crate::endpoint::Endpoint;
use crate::error::{DriftWatchError, Result};

/// Runtime counters for one scheduled endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub id: String,
    pub enabled: bool,
    pub last_check: Option<DateTime<Utc>>,
    /// HTTP status of the last check; `None` before the first check or
    /// after a transport failure.
    pub last_status: Option<u16>,
    pub check_count: u64,
    pub error_count: u64,
}

/// Deep-copy snapshot of the scheduler.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub endpoints_scheduled: usize,
    pub last_check_at: Option<DateTime<Utc>>,
    pub endpoints: HashMap<String, EndpointStatus>,
}

/// Outcome of one synchronous pass.
#[derive(Debug, Clone, Serialize)]
pub struct CheckOnceReport {
    pub checked: usize,
    pub failed: usize,
}

/// State shared with worker and ticker tasks.
struct SchedulerContext {
    checker: Arc<Checker>,
    dispatcher: Arc<AlertDispatcher>,
    endpoints: RwLock<HashMap<String, Endpoint>>,
    status: RwLock<HashMap<String, EndpointStatus>>,
    /// Endpoint ids currently queued or running.
    pending: Mutex<HashSet<String>>,
    last_check_at: RwLock<Option<DateTime<Utc>>>,
}

/// Control-plane state, serialized through one lock.
#[derive(Default)]
struct Control {
    running: bool,
    started_at: Option<DateTime<Utc>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    job_tx: Option<mpsc::Sender<String>>,
    tickers: HashMap<String, JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

pub struct Scheduler {
    ctx: Arc<SchedulerContext>,
    control: Mutex<Control>,
    max_workers: usize,
}

impl Scheduler {
    pub fn new(
        checker: Arc<Checker>,
        dispatcher: Arc<AlertDispatcher>,
        max_workers: usize,
    ) -> Self {
        Self {
            ctx: Arc::new(SchedulerContext {
                checker,
                dispatcher,
                endpoints: RwLock::new(HashMap::new()),
                status: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashSet::new()),
                last_check_at: RwLock::new(None),
            }),
            control: Mutex::new(Control::default()),
            max_workers: max_workers.max(1),
        }
    }

    /// Register an endpoint for scheduling. Disabled endpoints are skipped.
    /// When the scheduler is running, a recurring trigger starts immediately.
    pub fn add_endpoint(&self, endpoint: Endpoint) -> Result<()> {
        if !endpoint.config.enabled {
            log::debug!("Endpoint '{}' is disabled, not scheduling", endpoint.id);
            return Ok(());
        }

        let id = endpoint.id.clone();
        let interval = endpoint.config.interval;
        self.ctx
            .status
            .write()
            .map_err(poisoned)?
            .insert(id.clone(), new_status(&id));
        self.ctx
            .endpoints
            .write()
            .map_err(poisoned)?
            .insert(id.clone(), endpoint);

        let mut control = self.control.lock().map_err(poisoned)?;
        if control.running {
            if let (Some(shutdown_tx), Some(job_tx)) = (&control.shutdown_tx, &control.job_tx) {
                let handle =
                    spawn_ticker(Arc::clone(&self.ctx), id.clone(), interval, shutdown_tx.subscribe(), job_tx.clone());
                if let Some(old) = control.tickers.insert(id, handle) {
                    old.abort();
                }
            }
        }
        Ok(())
    }

    /// Cancel an endpoint's trigger and drop its runtime status.
    pub fn remove_endpoint(&self, id: &str) -> Result<()> {
        let mut control = self.control.lock().map_err(poisoned)?;
        if let Some(handle) = control.tickers.remove(id) {
            handle.abort();
        }
        drop(control);
        self.ctx.endpoints.write().map_err(poisoned)?.remove(id);
        self.ctx.status.write().map_err(poisoned)?.remove(id);
        Ok(())
    }

    /// Start the worker pool and all registered triggers.
    pub fn start(&self) -> Result<()> {
        let mut control = self.control.lock().map_err(poisoned)?;
        if control.running {
            return Err(DriftWatchError::SchedulerState {
                state: "running".to_string(),
            });
        }

        let (shutdown_tx, _) = watch::channel(false);
        let (job_tx, job_rx) = mpsc::channel::<String>(256);
        let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));

        for worker_id in 0..self.max_workers {
            let ctx = Arc::clone(&self.ctx);
            let rx = Arc::clone(&job_rx);
            control.workers.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(id) = job else {
                        log::debug!("Worker {} draining complete", worker_id);
                        break;
                    };
                    // The slot was claimed when the job was enqueued.
                    process_job(&ctx, &id, false).await;
                }
            }));
        }

        let endpoints: Vec<(String, Duration)> = self
            .ctx
            .endpoints
            .read()
            .map_err(poisoned)?
            .values()
            .map(|e| (e.id.clone(), e.config.interval))
            .collect();
        for (id, interval) in endpoints {
            let handle = spawn_ticker(
                Arc::clone(&self.ctx),
                id.clone(),
                interval,
                shutdown_tx.subscribe(),
                job_tx.clone(),
            );
            control.tickers.insert(id, handle);
        }

        control.shutdown_tx = Some(shutdown_tx);
        control.job_tx = Some(job_tx);
        control.running = true;
        control.started_at = Some(Utc::now());
        log::info!(
            "Scheduler started: {} worker(s), {} endpoint(s)",
            self.max_workers,
            control.tickers.len()
        );
        Ok(())
    }

    /// Stop triggers, drain in-flight work for up to `drain`, then cancel
    /// whatever is still running.
    pub async fn stop(&self, drain: Duration) -> Result<()> {
        let workers = {
            let mut control = self.control.lock().map_err(poisoned)?;
            if !control.running {
                return Err(DriftWatchError::SchedulerState {
                    state: "stopped".to_string(),
                });
            }
            for (_, handle) in control.tickers.drain() {
                handle.abort();
            }
            if let Some(tx) = control.shutdown_tx.take() {
                let _ = tx.send(true);
            }
            // Dropping the sender lets workers drain the queue and exit.
            control.job_tx = None;
            std::mem::take(&mut control.workers)
        };

        let abort_handles: Vec<_> = workers.iter().map(|w| w.abort_handle()).collect();
        let drained = tokio::time::timeout(drain, futures_join_all(workers)).await;
        if drained.is_err() {
            log::warn!("Drain window elapsed; cancelling remaining workers");
            for handle in abort_handles {
                handle.abort();
            }
        }

        let mut control = self.control.lock().map_err(poisoned)?;
        control.running = false;
        control.started_at = None;
        log::info!("Scheduler stopped");
        Ok(())
    }

    /// One synchronous pass over all enabled endpoints through a pool of
    /// `max_workers`. Fails when nothing is enabled.
    pub async fn check_once(&self, timeout: Option<Duration>) -> Result<CheckOnceReport> {
        let endpoints: Vec<String> = self
            .ctx
            .endpoints
            .read()
            .map_err(poisoned)?
            .values()
            .filter(|e| e.config.enabled)
            .map(|e| e.id.clone())
            .collect();
        if endpoints.is_empty() {
            return Err(DriftWatchError::NoEndpoints);
        }

        let pass = self.run_pass(endpoints);
        match timeout {
            Some(t) => tokio::time::timeout(t, pass).await.map_err(|_| {
                DriftWatchError::RequestCancelled {
                    url: "<check pass>".to_string(),
                    reason: format!("pass did not finish within {:?}", t),
                }
            })?,
            None => pass.await,
        }
    }

    async fn run_pass(&self, endpoints: Vec<String>) -> Result<CheckOnceReport> {
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut handles = Vec::with_capacity(endpoints.len());

        for id in endpoints {
            let ctx = Arc::clone(&self.ctx);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                process_job(&ctx, &id, true).await
            }));
        }

        let mut checked = 0usize;
        let mut failed = 0usize;
        for handle in handles {
            match handle.await {
                Ok(true) => checked += 1,
                Ok(false) => {
                    checked += 1;
                    failed += 1;
                }
                Err(e) => {
                    log::error!("Check task failed to join: {}", e);
                    failed += 1;
                }
            }
        }
        Ok(CheckOnceReport { checked, failed })
    }

    /// Snapshot of the scheduler and per-endpoint counters.
    pub fn status(&self) -> Result<SchedulerStatus> {
        let control = self.control.lock().map_err(poisoned)?;
        let endpoints = self.ctx.status.read().map_err(poisoned)?.clone();
        Ok(SchedulerStatus {
            running: control.running,
            started_at: control.started_at,
            endpoints_scheduled: endpoints.len(),
            last_check_at: *self.ctx.last_check_at.read().map_err(poisoned)?,
            endpoints,
        })
    }
}

fn new_status(id: &str) -> EndpointStatus {
    EndpointStatus {
        id: id.to_string(),
        enabled: true,
        last_check: None,
        last_status: None,
        check_count: 0,
        error_count: 0,
    }
}

fn poisoned<T>(_: T) -> DriftWatchError {
    DriftWatchError::SystemError("scheduler lock poisoned".to_string())
}

/// Minimal join-all so the drain path doesn't need a futures dependency.
async fn futures_join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

fn spawn_ticker(
    ctx: Arc<SchedulerContext>,
    id: String,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    job_tx: mpsc::Sender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    enqueue(&ctx, &job_tx, &id);
                }
            }
        }
    })
}

/// Queue a check for `id` unless one is already queued or running.
fn enqueue(ctx: &SchedulerContext, job_tx: &mpsc::Sender<String>, id: &str) {
    let Ok(mut pending) = ctx.pending.lock() else {
        return;
    };
    if pending.contains(id) {
        log::debug!("'{}' already in flight, dropping trigger", id);
        return;
    }
    pending.insert(id.to_string());
    drop(pending);

    if let Err(e) = job_tx.try_send(id.to_string()) {
        log::warn!("Could not queue check for '{}': {}", id, e);
        if let Ok(mut pending) = ctx.pending.lock() {
            pending.remove(id);
        }
    }
}

/// Run one endpoint's check, updating counters and routing alerts.
/// Returns whether the check succeeded. Never propagates errors or panics.
///
/// `claim` is set by callers that did not reserve the endpoint's slot via
/// `enqueue`; when the endpoint is already queued or running the job is
/// dropped instead of double-running.
async fn process_job(ctx: &Arc<SchedulerContext>, id: &str, claim: bool) -> bool {
    if claim {
        let Ok(mut pending) = ctx.pending.lock() else {
            return false;
        };
        if !pending.insert(id.to_string()) {
            log::debug!("'{}' already in flight, dropping trigger", id);
            return true;
        }
    }

    let endpoint = match ctx.endpoints.read() {
        Ok(map) => map.get(id).cloned(),
        Err(_) => None,
    };
    let success = match endpoint {
        Some(endpoint) => {
            let checker = Arc::clone(&ctx.checker);
            let endpoint_task = endpoint.clone();
            // A panic inside the check surfaces as a JoinError and is
            // absorbed like any other per-endpoint failure.
            let joined = tokio::spawn(async move {
                checker
                    .run_check(&endpoint_task, None, CheckMode::Live)
                    .await
            })
            .await;

            match joined {
                Ok(Ok(outcome)) => {
                    record_success(ctx, id, outcome.run.response_status);
                    for drift in &outcome.drifts {
                        if let Err(e) = ctx.dispatcher.dispatch(drift).await {
                            log::warn!("Alert dispatch for '{}' failed: {}", id, e);
                        }
                    }
                    true
                }
                Ok(Err(e)) => {
                    log::warn!("Check failed for '{}': {}", id, e);
                    ctx.checker.record_failure(&endpoint, &e);
                    record_error(ctx, id);
                    false
                }
                Err(join_err) => {
                    let e = DriftWatchError::SystemError(format!(
                        "check task for '{}' aborted: {}",
                        id, join_err
                    ));
                    log::error!("{}", e);
                    ctx.checker.record_failure(&endpoint, &e);
                    record_error(ctx, id);
                    false
                }
            }
        }
        None => {
            log::debug!("'{}' no longer scheduled, skipping", id);
            true
        }
    };

    if let Ok(mut last) = ctx.last_check_at.write() {
        *last = Some(Utc::now());
    }
    if let Ok(mut pending) = ctx.pending.lock() {
        pending.remove(id);
    }
    success
}

fn record_success(ctx: &SchedulerContext, id: &str, status: u16) {
    if let Ok(mut map) = ctx.status.write() {
        let entry = map.entry(id.to_string()).or_insert_with(|| new_status(id));
        entry.last_check = Some(Utc::now());
        entry.last_status = Some(status);
        entry.check_count += 1;
    }
}

fn record_error(ctx: &SchedulerContext, id: &str) {
    if let Ok(mut map) = ctx.status.write() {
        let entry = map.entry(id.to_string()).or_insert_with(|| new_status(id));
        entry.last_check = Some(Utc::now());
        entry.last_status = None;
        entry.check_count += 1;
        entry.error_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::config::{AlertingConfig, GlobalConfig};
    use crate::http::HttpExecutor;
    use crate::storage::{MemoryStorage, Storage};

    async fn spawn_server(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{}", addr)
    }

    fn build_scheduler(storage: Arc<dyn Storage>, workers: usize) -> Scheduler {
        let global = GlobalConfig {
            retry_count: 0,
            retry_delay: Duration::from_millis(5),
            timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let checker = Arc::new(Checker::new(
            Arc::new(HttpExecutor::new("driftwatch-test").unwrap()),
            Arc::clone(&storage),
            global,
        ));
        let dispatcher = Arc::new(
            AlertDispatcher::new(&AlertingConfig::default(), storage).unwrap(),
        );
        Scheduler::new(checker, dispatcher, workers)
    }

    fn fast_endpoint(id: &str, url: &str) -> Endpoint {
        let mut endpoint = Endpoint::new(id, url);
        endpoint.config.interval = Duration::from_millis(50);
        endpoint.config.timeout = Duration::from_secs(1);
        endpoint.config.retry_count = 0;
        endpoint
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let scheduler = build_scheduler(storage, 2);
        scheduler.start().unwrap();
        assert!(matches!(
            scheduler.start().unwrap_err(),
            DriftWatchError::SchedulerState { .. }
        ));
        scheduler.stop(Duration::from_millis(200)).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_stopped_fails() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let scheduler = build_scheduler(storage, 2);
        assert!(scheduler
            .stop(Duration::from_millis(50))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_disabled_endpoint_not_scheduled() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let scheduler = build_scheduler(storage, 2);
        let mut endpoint = fast_endpoint("off", "http://127.0.0.1:9/x");
        endpoint.config.enabled = false;
        scheduler.add_endpoint(endpoint).unwrap();
        assert_eq!(scheduler.status().unwrap().endpoints_scheduled, 0);
    }

    #[tokio::test]
    async fn test_check_once_requires_endpoints() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let scheduler = build_scheduler(storage, 2);
        assert!(matches!(
            scheduler.check_once(None).await.unwrap_err(),
            DriftWatchError::NoEndpoints
        ));
    }

    #[tokio::test]
    async fn test_failure_isolation_across_endpoints() {
        let url = spawn_server(r#"{"ok":true}"#).await;
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let scheduler = build_scheduler(Arc::clone(&storage), 2);

        let good = fast_endpoint("good", &url);
        let bad = fast_endpoint("bad", "http://127.0.0.1:9/unreachable");
        storage.save_endpoint(&good).unwrap();
        storage.save_endpoint(&bad).unwrap();
        scheduler.add_endpoint(good).unwrap();
        scheduler.add_endpoint(bad).unwrap();

        let report = scheduler
            .check_once(Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.failed, 1);

        let status = scheduler.status().unwrap();
        let good_status = &status.endpoints["good"];
        assert_eq!(good_status.check_count, 1);
        assert_eq!(good_status.error_count, 0);
        assert_eq!(good_status.last_status, Some(200));

        let bad_status = &status.endpoints["bad"];
        assert_eq!(bad_status.error_count, 1);
        assert_eq!(bad_status.last_status, None);

        // The failed check was recorded with status 0.
        let history = storage
            .get_monitoring_history("bad", Duration::from_secs(3600))
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].response_status, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_live_loop_checks_repeatedly() {
        let url = spawn_server(r#"{"v":1}"#).await;
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let scheduler = build_scheduler(Arc::clone(&storage), 2);

        let endpoint = fast_endpoint("live", &url);
        storage.save_endpoint(&endpoint).unwrap();
        scheduler.add_endpoint(endpoint).unwrap();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        scheduler.stop(Duration::from_millis(500)).await.unwrap();

        let status = scheduler.status().unwrap();
        assert!(!status.running);
        assert!(status.endpoints["live"].check_count >= 2);
        assert!(status.last_check_at.is_some());

        let history = storage
            .get_monitoring_history("live", Duration::from_secs(3600))
            .unwrap();
        assert!(history.len() >= 2);
    }

    #[tokio::test]
    async fn test_status_snapshot_is_a_copy() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let scheduler = build_scheduler(storage, 2);
        scheduler
            .add_endpoint(fast_endpoint("a", "http://127.0.0.1:9/x"))
            .unwrap();

        let mut snapshot = scheduler.status().unwrap();
        snapshot
            .endpoints
            .get_mut("a")
            .unwrap()
            .check_count = 999;
        assert_eq!(scheduler.status().unwrap().endpoints["a"].check_count, 0);
    }

    #[tokio::test]
    async fn test_remove_endpoint_drops_status() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let scheduler = build_scheduler(storage, 2);
        scheduler
            .add_endpoint(fast_endpoint("a", "http://127.0.0.1:9/x"))
            .unwrap();
        assert_eq!(scheduler.status().unwrap().endpoints_scheduled, 1);
        scheduler.remove_endpoint("a").unwrap();
        assert_eq!(scheduler.status().unwrap().endpoints_scheduled, 0);
    }
}
