use crate::api::{ApiClient, ApiError};
use crate::metrics::{now_unix, Metrics};
use crate::snapshot::{MetricSnapshot, Statistics};
use crate::state::{DashboardState, TickOutcome};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// The two endpoints a poll cycle reads.
pub trait MetricsSource: Send + Sync + 'static {
    fn fetch_runtime_metrics(
        &self,
    ) -> impl Future<Output = Result<MetricSnapshot, ApiError>> + Send;
    fn fetch_system_metrics(&self) -> impl Future<Output = Result<Statistics, ApiError>> + Send;
}

impl MetricsSource for ApiClient {
    fn fetch_runtime_metrics(
        &self,
    ) -> impl Future<Output = Result<MetricSnapshot, ApiError>> + Send {
        ApiClient::fetch_runtime_metrics(self)
    }

    fn fetch_system_metrics(&self) -> impl Future<Output = Result<Statistics, ApiError>> + Send {
        self.fetch_statistics()
    }
}

/// Fetches both sources concurrently for a single pass; neither failure
/// affects the other.
pub async fn run_cycle<S: MetricsSource + ?Sized>(source: &S, tick: u64) -> TickOutcome {
    let (runtime, system) =
        tokio::join!(source.fetch_runtime_metrics(), source.fetch_system_metrics());
    TickOutcome {
        tick,
        runtime,
        system,
    }
}

pub struct MetricsPoller<S> {
    source: Arc<S>,
    state: Arc<RwLock<DashboardState>>,
    metrics: Arc<Metrics>,
    period: Duration,
}

impl<S: MetricsSource> MetricsPoller<S> {
    pub fn new(
        source: Arc<S>,
        state: Arc<RwLock<DashboardState>>,
        metrics: Arc<Metrics>,
        period: Duration,
    ) -> Self {
        Self {
            source,
            state,
            metrics,
            period,
        }
    }

    /// Spawns the polling task. Both sources are fetched immediately, then
    /// once per period; a fetch that overruns skips its own missed ticks.
    pub fn start(self) -> CancelHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        CancelHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(period_ms = self.period.as_millis() as u64, "poller started");

        let runtime = {
            let source = self.source.clone();
            self.poll_loop(
                "runtime",
                shutdown.clone(),
                move || {
                    let source = source.clone();
                    async move { source.fetch_runtime_metrics().await }
                },
                |state, tick, result| {
                    state.apply_runtime(tick, result, now_unix());
                },
            )
        };
        let system = {
            let source = self.source.clone();
            self.poll_loop(
                "system",
                shutdown,
                move || {
                    let source = source.clone();
                    async move { source.fetch_system_metrics().await }
                },
                |state, tick, result| {
                    state.apply_system(tick, result);
                },
            )
        };

        let (runtime_ticks, system_ticks) = tokio::join!(runtime, system);
        info!(runtime_ticks, system_ticks, "poller stopped");
    }

    /// Drives one source on its own ticker so a slow endpoint only delays
    /// itself. At most one fetch per source is in flight; each result is
    /// applied under the write lock as soon as it resolves.
    async fn poll_loop<T, Fut>(
        &self,
        source: &'static str,
        mut shutdown: watch::Receiver<bool>,
        fetch: impl Fn() -> Fut,
        apply: impl Fn(&mut DashboardState, u64, Result<T, ApiError>),
    ) -> u64
    where
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tick = 0_u64;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    tick += 1;
                    let result = tokio::select! {
                        _ = shutdown.changed() => {
                            debug!(source, tick, "discarding in-flight fetch");
                            break;
                        }
                        result = fetch() => result,
                    };
                    self.metrics.inc_poll(source, result.is_ok());

                    let mut guard = self.state.write().await;
                    apply(&mut *guard, tick, result);
                    self.metrics.update_from_state(&guard);
                }
            }
        }
        tick
    }
}

/// Owner of a running poller. `cancel` resolves only after the task has
/// exited, so no dashboard update can land afterwards. Dropping the handle
/// also stops the task at its next await point.
pub struct CancelHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CancelHandle {
    pub async fn cancel(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            if !err.is_cancelled() {
                warn!(error = %err, "poller task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ThresholdTable;
    use crate::state::tests::{metric, system};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedSource {
        runtime: Mutex<VecDeque<Result<MetricSnapshot, ApiError>>>,
        runtime_calls: AtomicUsize,
        system_calls: AtomicUsize,
        delay: Duration,
        system_delay: Duration,
        fail_system: bool,
    }

    impl ScriptedSource {
        fn with_runtime(results: Vec<Result<MetricSnapshot, ApiError>>) -> Self {
            Self {
                runtime: Mutex::new(results.into()),
                ..Self::default()
            }
        }
    }

    fn unavailable() -> ApiError {
        ApiError::Status {
            path: "/admin/metrics".to_string(),
            status: 502,
            data: json!({ "error": "bad gateway" }),
        }
    }

    impl MetricsSource for ScriptedSource {
        async fn fetch_runtime_metrics(&self) -> Result<MetricSnapshot, ApiError> {
            let n = self.runtime_calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.runtime.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(metric(n as i64, n as u64)))
        }

        async fn fetch_system_metrics(&self) -> Result<Statistics, ApiError> {
            self.system_calls.fetch_add(1, Ordering::SeqCst);
            if !self.system_delay.is_zero() {
                tokio::time::sleep(self.system_delay).await;
            }
            if self.fail_system {
                return Err(ApiError::Status {
                    path: "/admin/statistics".to_string(),
                    status: 500,
                    data: json!({}),
                });
            }
            Ok(Statistics {
                users: None,
                system: Some(system(25.0)),
            })
        }
    }

    fn shared_state() -> Arc<RwLock<DashboardState>> {
        Arc::new(RwLock::new(DashboardState::new(
            0,
            60,
            ThresholdTable::default(),
        )))
    }

    async fn wait_for(cond: impl Fn() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn run_cycle_isolates_failures() {
        let source = ScriptedSource {
            fail_system: true,
            ..ScriptedSource::default()
        };
        let outcome = run_cycle(&source, 9).await;
        assert_eq!(outcome.tick, 9);
        assert!(outcome.runtime.is_ok());
        assert!(outcome.system.is_err());
    }

    #[tokio::test]
    async fn first_cycle_runs_immediately_and_cancel_stops_polling() {
        let source = Arc::new(ScriptedSource::default());
        let state = shared_state();
        let metrics = Metrics::new().expect("metrics registry");
        let handle = MetricsPoller::new(
            source.clone(),
            state.clone(),
            metrics,
            Duration::from_secs(3600),
        )
        .start();

        let probe = state.clone();
        wait_for(|| probe.try_read().map(|s| s.series().len() == 1).unwrap_or(false)).await;
        assert_eq!(source.runtime_calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.system_calls.load(Ordering::SeqCst), 1);

        handle.cancel().await;
        let calls = source.runtime_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.runtime_calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn failures_then_success_append_once() {
        let source = Arc::new(ScriptedSource::with_runtime(vec![
            Err(unavailable()),
            Err(unavailable()),
            Err(unavailable()),
            Ok(metric(1_700_000_000, 7)),
        ]));
        let state = shared_state();
        let metrics = Metrics::new().expect("metrics registry");
        let handle = MetricsPoller::new(
            source.clone(),
            state.clone(),
            metrics,
            Duration::from_millis(20),
        )
        .start();

        let counter = source.clone();
        wait_for(|| counter.runtime_calls.load(Ordering::SeqCst) >= 4).await;
        let probe = state.clone();
        wait_for(|| {
            probe
                .try_read()
                .map(|s| s.latest_metrics().is_some())
                .unwrap_or(false)
        })
        .await;
        handle.cancel().await;

        let guard = state.read().await;
        assert_eq!(guard.error(), None);
        let labels = guard.series().snapshot().labels;
        assert_eq!(labels.first().map(String::as_str), Some("22:13:20"));
        assert!(labels.len() <= source.runtime_calls.load(Ordering::SeqCst) - 3);
    }

    #[tokio::test]
    async fn cancel_discards_in_flight_cycle() {
        let source = Arc::new(ScriptedSource {
            delay: Duration::from_millis(500),
            ..ScriptedSource::default()
        });
        let state = shared_state();
        let metrics = Metrics::new().expect("metrics registry");
        let handle = MetricsPoller::new(
            source.clone(),
            state.clone(),
            metrics,
            Duration::from_secs(3600),
        )
        .start();

        let counter = source.clone();
        wait_for(|| counter.runtime_calls.load(Ordering::SeqCst) == 1).await;
        handle.cancel().await;

        tokio::time::sleep(Duration::from_millis(600)).await;
        let guard = state.read().await;
        assert!(guard.series().is_empty());
        assert!(guard.latest_metrics().is_none());
    }

    #[tokio::test]
    async fn dropping_handle_stops_task() {
        let source = Arc::new(ScriptedSource::default());
        let state = shared_state();
        let metrics = Metrics::new().expect("metrics registry");
        let handle = MetricsPoller::new(
            source.clone(),
            state,
            metrics,
            Duration::from_millis(10),
        )
        .start();
        drop(handle);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let calls = source.runtime_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.runtime_calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn slow_system_fetch_does_not_hold_back_runtime_samples() {
        let source = Arc::new(ScriptedSource {
            system_delay: Duration::from_secs(5),
            ..ScriptedSource::default()
        });
        let state = shared_state();
        let metrics = Metrics::new().expect("metrics registry");
        let handle = MetricsPoller::new(
            source.clone(),
            state.clone(),
            metrics,
            Duration::from_millis(50),
        )
        .start();

        let probe = state.clone();
        wait_for(|| probe.try_read().map(|s| s.series().len() >= 5).unwrap_or(false)).await;
        assert_eq!(source.system_calls.load(Ordering::SeqCst), 1);
        assert!(state.read().await.latest_system().is_none());

        handle.cancel().await;
        assert!(source.runtime_calls.load(Ordering::SeqCst) >= 5);
    }

    #[tokio::test]
    async fn system_result_lands_without_waiting_for_runtime() {
        let source = Arc::new(ScriptedSource {
            delay: Duration::from_secs(5),
            ..ScriptedSource::default()
        });
        let state = shared_state();
        let metrics = Metrics::new().expect("metrics registry");
        let handle = MetricsPoller::new(
            source.clone(),
            state.clone(),
            metrics,
            Duration::from_secs(3600),
        )
        .start();

        let probe = state.clone();
        wait_for(|| {
            probe
                .try_read()
                .map(|s| s.latest_system().is_some())
                .unwrap_or(false)
        })
        .await;
        assert!(state.read().await.series().is_empty());
        handle.cancel().await;
    }
}
