use crate::classify::{bucket_status_codes, server_error_ratio, Severity};
use crate::state::DashboardState;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub adminmon_cpu_usage_percent: Gauge,
    pub adminmon_memory_usage_percent: Gauge,
    pub adminmon_disk_usage_percent: Gauge,
    pub adminmon_requests_15m: Gauge,
    pub adminmon_requests_1m: Gauge,
    pub adminmon_avg_response_ms: Gauge,
    pub adminmon_server_error_ratio_percent: Gauge,
    pub adminmon_active_users_15m: Gauge,
    pub adminmon_status_class_requests: GaugeVec,
    pub adminmon_alerts_active: GaugeVec,
    pub adminmon_series_length: Gauge,
    pub adminmon_last_success_timestamp_seconds: Gauge,
    pub adminmon_uptime_seconds: Gauge,
    pub adminmon_polls_total: CounterVec,
    pub adminmon_scrape_count_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let adminmon_cpu_usage_percent = Gauge::with_opts(opts!(
            "adminmon_cpu_usage_percent",
            "Backend host CPU usage in percent"
        ))?;
        let adminmon_memory_usage_percent = Gauge::with_opts(opts!(
            "adminmon_memory_usage_percent",
            "Backend host memory usage in percent"
        ))?;
        let adminmon_disk_usage_percent = Gauge::with_opts(opts!(
            "adminmon_disk_usage_percent",
            "Backend host disk usage in percent"
        ))?;
        let adminmon_requests_15m = Gauge::with_opts(opts!(
            "adminmon_requests_15m",
            "Requests served by the backend over the last 15 minutes"
        ))?;
        let adminmon_requests_1m = Gauge::with_opts(opts!(
            "adminmon_requests_1m",
            "Requests served by the backend over the last minute"
        ))?;
        let adminmon_avg_response_ms = Gauge::with_opts(opts!(
            "adminmon_avg_response_ms",
            "Average response time over the last minute in ms"
        ))?;
        let adminmon_server_error_ratio_percent = Gauge::with_opts(opts!(
            "adminmon_server_error_ratio_percent",
            "Share of 5xx responses in the 15 minute status histogram"
        ))?;
        let adminmon_active_users_15m = Gauge::with_opts(opts!(
            "adminmon_active_users_15m",
            "Distinct active users over the last 15 minutes"
        ))?;
        let adminmon_status_class_requests = GaugeVec::new(
            opts!(
                "adminmon_status_class_requests",
                "Requests over the last 15 minutes by status class"
            ),
            &["class"],
        )?;
        let adminmon_alerts_active = GaugeVec::new(
            opts!("adminmon_alerts_active", "Active alerts by severity"),
            &["severity"],
        )?;
        let adminmon_series_length = Gauge::with_opts(opts!(
            "adminmon_series_length",
            "Samples currently held in the rolling series"
        ))?;
        let adminmon_last_success_timestamp_seconds = Gauge::with_opts(opts!(
            "adminmon_last_success_timestamp_seconds",
            "Unix timestamp of the last successful runtime poll"
        ))?;
        let adminmon_uptime_seconds =
            Gauge::with_opts(opts!("adminmon_uptime_seconds", "Monitor uptime in seconds"))?;
        let adminmon_polls_total = CounterVec::new(
            opts!("adminmon_polls_total", "Poll results by source and outcome"),
            &["source", "outcome"],
        )?;
        let adminmon_scrape_count_total = Counter::with_opts(opts!(
            "adminmon_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;

        register(&registry, &adminmon_cpu_usage_percent)?;
        register(&registry, &adminmon_memory_usage_percent)?;
        register(&registry, &adminmon_disk_usage_percent)?;
        register(&registry, &adminmon_requests_15m)?;
        register(&registry, &adminmon_requests_1m)?;
        register(&registry, &adminmon_avg_response_ms)?;
        register(&registry, &adminmon_server_error_ratio_percent)?;
        register(&registry, &adminmon_active_users_15m)?;
        register(&registry, &adminmon_status_class_requests)?;
        register(&registry, &adminmon_alerts_active)?;
        register(&registry, &adminmon_series_length)?;
        register(&registry, &adminmon_last_success_timestamp_seconds)?;
        register(&registry, &adminmon_uptime_seconds)?;
        register(&registry, &adminmon_polls_total)?;
        register(&registry, &adminmon_scrape_count_total)?;

        Ok(Arc::new(Self {
            registry,
            adminmon_cpu_usage_percent,
            adminmon_memory_usage_percent,
            adminmon_disk_usage_percent,
            adminmon_requests_15m,
            adminmon_requests_1m,
            adminmon_avg_response_ms,
            adminmon_server_error_ratio_percent,
            adminmon_active_users_15m,
            adminmon_status_class_requests,
            adminmon_alerts_active,
            adminmon_series_length,
            adminmon_last_success_timestamp_seconds,
            adminmon_uptime_seconds,
            adminmon_polls_total,
            adminmon_scrape_count_total,
        }))
    }

    /// Mirrors the dashboard into the registry. Gauges keep their previous
    /// value while a source is unavailable, like the dashboard does.
    pub fn update_from_state(&self, state: &DashboardState) {
        if let Some(system) = state.latest_system() {
            self.adminmon_cpu_usage_percent.set(system.cpu.percent);
            self.adminmon_memory_usage_percent
                .set(system.memory.percent);
            self.adminmon_disk_usage_percent.set(system.disk.percent);
        }

        if let Some(m) = state.latest_metrics() {
            self.adminmon_requests_15m
                .set(m.totals.requests_15m as f64);
            self.adminmon_requests_1m.set(m.last_1m.requests as f64);
            self.adminmon_avg_response_ms.set(m.last_1m.avg_response_ms);
            self.adminmon_server_error_ratio_percent
                .set(server_error_ratio(m));
            self.adminmon_active_users_15m
                .set(m.totals.active_users_15m as f64);

            let buckets = bucket_status_codes(&m.totals.by_status_15m);
            for (class, count) in buckets.classes() {
                self.adminmon_status_class_requests
                    .with_label_values(&[class])
                    .set(count as f64);
            }
        }

        for severity in [Severity::Warning, Severity::Danger] {
            let active = state
                .alerts()
                .iter()
                .filter(|a| a.severity == severity)
                .count();
            self.adminmon_alerts_active
                .with_label_values(&[severity.as_str()])
                .set(active as f64);
        }

        self.adminmon_series_length
            .set(state.series().len() as f64);
        self.adminmon_last_success_timestamp_seconds
            .set(state.last_success_unix() as f64);

        let uptime = now_unix().saturating_sub(state.started_at_unix) as f64;
        self.adminmon_uptime_seconds.set(uptime);
    }

    pub fn inc_poll(&self, source: &str, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        self.adminmon_polls_total
            .with_label_values(&[source, outcome])
            .inc();
    }

    pub fn inc_scrape_count(&self) {
        self.adminmon_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
