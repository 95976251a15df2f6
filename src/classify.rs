use crate::snapshot::{MetricSnapshot, SystemSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Normal,
    Warning,
    Danger,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Normal => "normal",
            Severity::Warning => "warning",
            Severity::Danger => "danger",
        }
    }

    /// Worst severity among `alerts`, `Normal` when there are none.
    pub fn overall(alerts: &[Alert]) -> Severity {
        alerts
            .iter()
            .map(|a| a.severity)
            .max()
            .unwrap_or(Severity::Normal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub warning: f64,
    pub danger: f64,
}

impl Thresholds {
    pub const fn new(warning: f64, danger: f64) -> Self {
        Self { warning, danger }
    }
}

/// `danger` at or above the danger bound, `warning` at or above the warning
/// bound, otherwise `normal`.
pub fn classify(value: f64, thresholds: Thresholds) -> Severity {
    if !value.is_finite() {
        return Severity::Normal;
    }
    if value >= thresholds.danger {
        Severity::Danger
    } else if value >= thresholds.warning {
        Severity::Warning
    } else {
        Severity::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTable {
    #[serde(default = "default_cpu_percent")]
    pub cpu_percent: Thresholds,
    #[serde(default = "default_memory_percent")]
    pub memory_percent: Thresholds,
    #[serde(default = "default_disk_percent")]
    pub disk_percent: Thresholds,
    #[serde(default = "default_avg_response_ms")]
    pub avg_response_ms: Thresholds,
    #[serde(default = "default_error_5xx_ratio_percent")]
    pub error_5xx_ratio_percent: Thresholds,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            cpu_percent: default_cpu_percent(),
            memory_percent: default_memory_percent(),
            disk_percent: default_disk_percent(),
            avg_response_ms: default_avg_response_ms(),
            error_5xx_ratio_percent: default_error_5xx_ratio_percent(),
        }
    }
}

impl ThresholdTable {
    pub fn get(&self, gauge: Gauge) -> Thresholds {
        match gauge {
            Gauge::Cpu => self.cpu_percent,
            Gauge::Memory => self.memory_percent,
            Gauge::Disk => self.disk_percent,
            Gauge::AvgResponse => self.avg_response_ms,
            Gauge::ServerErrorRatio => self.error_5xx_ratio_percent,
        }
    }
}

const fn default_cpu_percent() -> Thresholds {
    Thresholds::new(70.0, 90.0)
}

const fn default_memory_percent() -> Thresholds {
    Thresholds::new(70.0, 90.0)
}

const fn default_disk_percent() -> Thresholds {
    Thresholds::new(80.0, 90.0)
}

const fn default_avg_response_ms() -> Thresholds {
    Thresholds::new(500.0, 1000.0)
}

const fn default_error_5xx_ratio_percent() -> Thresholds {
    Thresholds::new(1.0, 2.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gauge {
    Cpu,
    Memory,
    Disk,
    AvgResponse,
    ServerErrorRatio,
}

impl Gauge {
    /// Evaluation order of `build_alerts`.
    pub const ALL: [Gauge; 5] = [
        Gauge::Cpu,
        Gauge::Memory,
        Gauge::Disk,
        Gauge::AvgResponse,
        Gauge::ServerErrorRatio,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Gauge::Cpu => "CPU usage",
            Gauge::Memory => "Memory usage",
            Gauge::Disk => "Disk usage",
            Gauge::AvgResponse => "Average response time",
            Gauge::ServerErrorRatio => "5xx error ratio (15m)",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Gauge::AvgResponse => " ms",
            _ => "%",
        }
    }

    fn read(
        self,
        metric: Option<&MetricSnapshot>,
        system: Option<&SystemSnapshot>,
    ) -> Option<f64> {
        match self {
            Gauge::Cpu => system.map(|s| s.cpu.percent),
            Gauge::Memory => system.map(|s| s.memory.percent),
            Gauge::Disk => system.map(|s| s.disk.percent),
            Gauge::AvgResponse => metric.map(|m| m.last_1m.avg_response_ms),
            Gauge::ServerErrorRatio => metric.map(server_error_ratio),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub severity: Severity,
    pub gauge: Gauge,
    pub value: f64,
    pub message: String,
}

/// Alerts for every gauge at warning or above, in `Gauge::ALL` order.
/// Gauges whose source snapshot is missing are skipped.
pub fn build_alerts(
    metric: Option<&MetricSnapshot>,
    system: Option<&SystemSnapshot>,
    table: &ThresholdTable,
) -> Vec<Alert> {
    let mut out = Vec::new();
    for gauge in Gauge::ALL {
        let Some(value) = gauge.read(metric, system) else {
            continue;
        };
        let thresholds = table.get(gauge);
        let severity = classify(value, thresholds);
        let bound = match severity {
            Severity::Normal => continue,
            Severity::Warning => thresholds.warning,
            Severity::Danger => thresholds.danger,
        };
        out.push(Alert {
            severity,
            gauge,
            value,
            message: format!(
                "{}: {:.1}{} ({} threshold {}{})",
                gauge.title(),
                value,
                gauge.unit(),
                severity.as_str(),
                bound,
                gauge.unit()
            ),
        });
    }
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusBuckets {
    #[serde(rename = "2xx")]
    pub success: u64,
    #[serde(rename = "3xx")]
    pub redirect: u64,
    #[serde(rename = "4xx")]
    pub client_error: u64,
    #[serde(rename = "5xx")]
    pub server_error: u64,
}

impl StatusBuckets {
    pub fn total(&self) -> u64 {
        self.success
            .saturating_add(self.redirect)
            .saturating_add(self.client_error)
            .saturating_add(self.server_error)
    }

    /// `(class label, count)` pairs in ascending class order.
    pub fn classes(&self) -> [(&'static str, u64); 4] {
        [
            ("2xx", self.success),
            ("3xx", self.redirect),
            ("4xx", self.client_error),
            ("5xx", self.server_error),
        ]
    }
}

/// Sums raw per-code counts into status classes. Codes below 200 are ignored.
pub fn bucket_status_codes(by_status: &BTreeMap<u16, u64>) -> StatusBuckets {
    let mut buckets = StatusBuckets::default();
    for (&code, &count) in by_status {
        let slot = match code {
            200..=299 => &mut buckets.success,
            300..=399 => &mut buckets.redirect,
            400..=499 => &mut buckets.client_error,
            500.. => &mut buckets.server_error,
            _ => continue,
        };
        *slot = slot.saturating_add(count);
    }
    buckets
}

/// Share of 5xx responses among all 15-minute requests, in percent.
pub fn server_error_ratio(metric: &MetricSnapshot) -> f64 {
    let total = metric.totals.requests_15m;
    if total == 0 {
        return 0.0;
    }
    let errors = bucket_status_codes(&metric.totals.by_status_15m).server_error;
    (errors as f64 / total as f64) * 100.0
}
