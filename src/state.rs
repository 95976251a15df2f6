use crate::api::ApiError;
use crate::chart::{build_charts, ChartSpec};
use crate::classify::{
    bucket_status_codes, build_alerts, Alert, Severity, StatusBuckets, ThresholdTable,
};
use crate::series::{Channel, RollingSeries, SeriesSnapshot};
use crate::snapshot::{MetricSnapshot, Statistics, SystemSnapshot, UserStats};
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, warn};

pub const RUNTIME_ERROR_FALLBACK: &str = "failed to fetch metrics";

/// Results of one poll cycle, tagged with its tick number.
#[derive(Debug)]
pub struct TickOutcome {
    pub tick: u64,
    pub runtime: Result<MetricSnapshot, ApiError>,
    pub system: Result<Statistics, ApiError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DashboardStatus {
    Loading,
    Ok,
    Degraded,
}

/// Everything the dashboard shows. Owned by one view; only the poller writes.
#[derive(Debug, Clone)]
pub struct DashboardState {
    pub started_at_unix: i64,
    thresholds: ThresholdTable,
    series: RollingSeries,
    latest_metrics: Option<MetricSnapshot>,
    latest_system: Option<SystemSnapshot>,
    user_stats: Option<UserStats>,
    alerts: Vec<Alert>,
    error: Option<String>,
    last_runtime_tick: u64,
    last_system_tick: u64,
    last_success_unix: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub status: DashboardStatus,
    pub severity: Severity,
    pub error: Option<String>,
    pub started_at_unix: i64,
    pub last_success_unix: i64,
    pub metrics: Option<MetricSnapshot>,
    pub status_classes: Option<StatusBuckets>,
    pub system: Option<SystemSnapshot>,
    pub users: Option<UserStats>,
    pub alerts: Vec<Alert>,
    pub series: SeriesSnapshot,
    pub charts: Vec<ChartSpec>,
}

impl DashboardState {
    pub fn new(now_unix: i64, capacity: usize, thresholds: ThresholdTable) -> Self {
        Self {
            started_at_unix: now_unix,
            thresholds,
            series: RollingSeries::new(capacity),
            latest_metrics: None,
            latest_system: None,
            user_stats: None,
            alerts: Vec::new(),
            error: None,
            last_runtime_tick: 0,
            last_system_tick: 0,
            last_success_unix: 0,
        }
    }

    pub fn series(&self) -> &RollingSeries {
        &self.series
    }

    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn latest_metrics(&self) -> Option<&MetricSnapshot> {
        self.latest_metrics.as_ref()
    }

    pub fn latest_system(&self) -> Option<&SystemSnapshot> {
        self.latest_system.as_ref()
    }

    pub fn last_success_unix(&self) -> i64 {
        self.last_success_unix
    }

    pub fn status(&self) -> DashboardStatus {
        match (&self.latest_metrics, &self.error) {
            (None, _) => DashboardStatus::Loading,
            (Some(_), Some(_)) => DashboardStatus::Degraded,
            (Some(_), None) => DashboardStatus::Ok,
        }
    }

    /// Applies a whole cycle: system first so the appended sample sees the
    /// freshest resource gauges, then runtime.
    pub fn apply_tick(&mut self, outcome: TickOutcome, now_unix: i64) {
        self.apply_system(outcome.tick, outcome.system);
        self.apply_runtime(outcome.tick, outcome.runtime, now_unix);
    }

    /// Returns false when the result belongs to a tick that is not newer than
    /// the last one applied. Failures keep the previous system snapshot.
    pub fn apply_system(&mut self, tick: u64, result: Result<Statistics, ApiError>) -> bool {
        if tick <= self.last_system_tick {
            debug!(tick, last = self.last_system_tick, "dropping stale system result");
            return false;
        }
        self.last_system_tick = tick;

        match result {
            Ok(stats) => {
                self.latest_system = stats.system;
                if stats.users.is_some() {
                    self.user_stats = stats.users;
                }
            }
            Err(err) => {
                warn!(tick, error = %err, "system metrics unavailable, keeping previous values");
            }
        }
        self.recompute_alerts();
        true
    }

    /// On success appends exactly one sample and clears the error; on failure
    /// sets the error and leaves the series untouched.
    pub fn apply_runtime(
        &mut self,
        tick: u64,
        result: Result<MetricSnapshot, ApiError>,
        now_unix: i64,
    ) -> bool {
        if tick <= self.last_runtime_tick {
            debug!(tick, last = self.last_runtime_tick, "dropping stale runtime result");
            return false;
        }
        self.last_runtime_tick = tick;

        match result {
            Ok(snapshot) => {
                let values = sample_values(&snapshot, self.latest_system.as_ref());
                self.series.append(tick_label(snapshot.generated_at), &values);
                self.latest_metrics = Some(snapshot);
                self.error = None;
                self.last_success_unix = now_unix;
            }
            Err(err) => {
                warn!(tick, error = %err, "runtime metrics fetch failed");
                self.error = Some(err.display_message(RUNTIME_ERROR_FALLBACK));
            }
        }
        self.recompute_alerts();
        true
    }

    fn recompute_alerts(&mut self) {
        self.alerts = build_alerts(
            self.latest_metrics.as_ref(),
            self.latest_system.as_ref(),
            &self.thresholds,
        );
    }

    pub fn view(&self) -> DashboardView {
        let series = self.series.snapshot();
        DashboardView {
            status: self.status(),
            severity: Severity::overall(&self.alerts),
            error: self.error.clone(),
            started_at_unix: self.started_at_unix,
            last_success_unix: self.last_success_unix,
            status_classes: self
                .latest_metrics
                .as_ref()
                .map(|m| bucket_status_codes(&m.totals.by_status_15m)),
            metrics: self.latest_metrics.clone(),
            system: self.latest_system.clone(),
            users: self.user_stats.clone(),
            alerts: self.alerts.clone(),
            charts: build_charts(&series),
            series,
        }
    }
}

/// One value per channel for the tick. Resource channels are omitted while no
/// system snapshot exists so the store carries the previous sample forward.
fn sample_values(
    metric: &MetricSnapshot,
    system: Option<&SystemSnapshot>,
) -> HashMap<Channel, f64> {
    let mut values = HashMap::with_capacity(Channel::COUNT);
    if let Some(system) = system {
        values.insert(Channel::CpuPercent, system.cpu.percent);
        values.insert(Channel::MemoryPercent, system.memory.percent);
        values.insert(Channel::DiskPercent, system.disk.percent);
    }
    values.insert(Channel::Requests, metric.last_1m.requests as f64);
    values.insert(Channel::AvgResponseMs, metric.last_1m.avg_response_ms);

    let buckets = bucket_status_codes(&metric.totals.by_status_15m);
    values.insert(Channel::Status2xx, buckets.success as f64);
    values.insert(Channel::Status3xx, buckets.redirect as f64);
    values.insert(Channel::Status4xx, buckets.client_error as f64);
    values.insert(Channel::Status5xx, buckets.server_error as f64);
    values
}

/// `HH:MM:SS` (UTC) of the snapshot's generation time.
pub fn tick_label(generated_at: i64) -> String {
    let ts = UNIX_EPOCH + Duration::from_secs(generated_at.max(0) as u64);
    let full = humantime::format_rfc3339_seconds(ts).to_string();
    full.get(11..19).map(str::to_string).unwrap_or(full)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::classify::Gauge;
    use crate::snapshot::{CpuStat, ProcessStat, StorageStat, Totals, WindowStats};
    use serde_json::json;

    pub(crate) fn metric(generated_at: i64, requests_1m: u64) -> MetricSnapshot {
        MetricSnapshot {
            generated_at,
            totals: Totals {
                requests_15m: 200,
                active_users_15m: 3,
                active_users_1m: 1,
                online_clients_1m: 1,
                online_users_1m: 1,
                by_status_15m: [(200, 195), (404, 4), (500, 1)].into_iter().collect(),
            },
            last_1m: WindowStats {
                requests: requests_1m,
                errors: 0,
                avg_response_ms: 80.0,
                p95_response_ms: 150.0,
            },
            last_5m: WindowStats::default(),
        }
    }

    pub(crate) fn system(cpu: f64) -> SystemSnapshot {
        SystemSnapshot {
            cpu: CpuStat {
                percent: cpu,
                cores: 8,
            },
            memory: StorageStat {
                percent: 40.0,
                used_gb: 6.4,
                total_gb: 16.0,
            },
            disk: StorageStat {
                percent: 50.0,
                used_gb: 250.0,
                total_gb: 500.0,
            },
            process: ProcessStat { memory_mb: 128.0 },
        }
    }

    fn stats(cpu: f64) -> Statistics {
        Statistics {
            users: Some(UserStats {
                total: 10,
                active: 9,
                admins: 1,
                teachers: 2,
                students: 7,
            }),
            system: Some(system(cpu)),
        }
    }

    fn failure() -> ApiError {
        ApiError::Status {
            path: "/admin/metrics".to_string(),
            status: 503,
            data: json!({ "error": "backend down" }),
        }
    }

    fn state() -> DashboardState {
        DashboardState::new(0, 60, ThresholdTable::default())
    }

    #[test]
    fn starts_loading_without_alerts() {
        let state = state();
        assert_eq!(state.status(), DashboardStatus::Loading);
        assert!(state.alerts().is_empty());
        assert!(state.series().is_empty());
    }

    #[test]
    fn three_failures_then_success_adds_one_sample_and_clears_error() {
        let mut state = state();
        for tick in 1..=3 {
            state.apply_tick(
                TickOutcome {
                    tick,
                    runtime: Err(failure()),
                    system: Ok(stats(20.0)),
                },
                tick as i64,
            );
            assert_eq!(state.error(), Some("backend down"));
            assert_eq!(state.status(), DashboardStatus::Loading);
        }
        assert!(state.series().is_empty());

        state.apply_tick(
            TickOutcome {
                tick: 4,
                runtime: Ok(metric(1_700_000_000, 12)),
                system: Ok(stats(20.0)),
            },
            4,
        );
        assert_eq!(state.series().len(), 1);
        assert_eq!(state.error(), None);
        assert_eq!(state.status(), DashboardStatus::Ok);
        assert_eq!(state.series().latest(Channel::Requests), Some(12.0));
        assert_eq!(state.series().latest(Channel::CpuPercent), Some(20.0));
    }

    #[test]
    fn failure_after_success_is_degraded_and_keeps_last_values() {
        let mut state = state();
        state.apply_tick(
            TickOutcome {
                tick: 1,
                runtime: Ok(metric(10, 5)),
                system: Ok(stats(30.0)),
            },
            1,
        );
        state.apply_runtime(2, Err(failure()), 2);
        assert_eq!(state.status(), DashboardStatus::Degraded);
        assert_eq!(state.latest_metrics().map(|m| m.generated_at), Some(10));
        assert_eq!(state.series().len(), 1);
    }

    #[test]
    fn system_failure_keeps_previous_snapshot() {
        let mut state = state();
        assert!(state.apply_system(1, Ok(stats(55.0))));
        let err = ApiError::Status {
            path: "/admin/statistics".to_string(),
            status: 500,
            data: json!({}),
        };
        assert!(state.apply_system(2, Err(err)));
        assert_eq!(state.latest_system().map(|s| s.cpu.percent), Some(55.0));

        // error marker from the backend means no system data at all
        assert!(state.apply_system(
            3,
            Ok(Statistics {
                users: None,
                system: None
            })
        ));
        assert!(state.latest_system().is_none());
    }

    #[test]
    fn stale_ticks_are_dropped() {
        let mut state = state();
        assert!(state.apply_runtime(5, Ok(metric(50, 1)), 5));
        assert!(!state.apply_runtime(4, Ok(metric(40, 1)), 6));
        assert!(!state.apply_runtime(5, Err(failure()), 6));
        assert_eq!(state.series().len(), 1);
        assert_eq!(state.error(), None);
        assert_eq!(state.latest_metrics().map(|m| m.generated_at), Some(50));

        assert!(state.apply_system(7, Ok(stats(10.0))));
        assert!(!state.apply_system(6, Ok(stats(99.0))));
        assert_eq!(state.latest_system().map(|s| s.cpu.percent), Some(10.0));
    }

    #[test]
    fn alerts_follow_latest_snapshots() {
        let mut state = state();
        state.apply_tick(
            TickOutcome {
                tick: 1,
                runtime: Ok(metric(1, 1)),
                system: Ok(stats(95.0)),
            },
            1,
        );
        assert_eq!(state.alerts().len(), 1);
        assert_eq!(state.alerts()[0].gauge, Gauge::Cpu);

        state.apply_tick(
            TickOutcome {
                tick: 2,
                runtime: Ok(metric(2, 1)),
                system: Ok(stats(10.0)),
            },
            2,
        );
        assert!(state.alerts().is_empty());
    }

    #[test]
    fn resource_channels_carry_forward_without_system() {
        let mut state = state();
        state.apply_tick(
            TickOutcome {
                tick: 1,
                runtime: Ok(metric(1, 1)),
                system: Ok(stats(33.0)),
            },
            1,
        );
        state.apply_system(
            2,
            Ok(Statistics {
                users: None,
                system: None,
            }),
        );
        state.apply_runtime(2, Ok(metric(6, 2)), 2);

        let snapshot = state.series().snapshot();
        assert_eq!(snapshot.channel(Channel::CpuPercent), &[33.0, 33.0]);
        assert_eq!(snapshot.channel(Channel::Requests), &[1.0, 2.0]);
        assert_eq!(snapshot.channel(Channel::Status5xx), &[1.0, 1.0]);
    }

    #[test]
    fn view_exposes_charts_and_status_classes() {
        let mut state = state();
        state.apply_tick(
            TickOutcome {
                tick: 1,
                runtime: Ok(metric(1_700_000_000, 3)),
                system: Ok(stats(12.0)),
            },
            1,
        );
        let view = state.view();
        assert_eq!(view.status, DashboardStatus::Ok);
        assert_eq!(view.severity, Severity::Normal);
        assert_eq!(view.charts.len(), 3);
        assert_eq!(view.series.labels, vec!["22:13:20"]);
        let classes = view.status_classes.unwrap();
        assert_eq!(classes.client_error, 4);
        assert_eq!(view.users.unwrap().total, 10);
    }

    #[test]
    fn label_is_clock_time() {
        assert_eq!(tick_label(0), "00:00:00");
        assert_eq!(tick_label(3_725), "01:02:05");
    }
}
