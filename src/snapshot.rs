use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Runtime metrics as served by `GET /admin/metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub generated_at: i64,
    pub totals: Totals,
    pub last_1m: WindowStats,
    pub last_5m: WindowStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub requests_15m: u64,
    pub active_users_15m: u64,
    #[serde(default)]
    pub active_users_1m: u64,
    #[serde(default)]
    pub online_clients_1m: u64,
    #[serde(default)]
    pub online_users_1m: u64,
    #[serde(default)]
    pub by_status_15m: BTreeMap<u16, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub requests: u64,
    pub errors: u64,
    pub avg_response_ms: f64,
    pub p95_response_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub cpu: CpuStat,
    pub memory: StorageStat,
    pub disk: StorageStat,
    #[serde(default)]
    pub process: ProcessStat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuStat {
    pub percent: f64,
    #[serde(default)]
    pub cores: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageStat {
    pub percent: f64,
    #[serde(default)]
    pub used_gb: f64,
    #[serde(default)]
    pub total_gb: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessStat {
    #[serde(default)]
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub active: u64,
    #[serde(default)]
    pub admins: u64,
    #[serde(default)]
    pub teachers: u64,
    #[serde(default)]
    pub students: u64,
}

/// Parsed `GET /admin/statistics`. The system block is `None` when the
/// backend omitted it or reported `{ "error": ... }` in its place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    pub users: Option<UserStats>,
    pub system: Option<SystemSnapshot>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatisticsPayload {
    #[serde(default)]
    users: Option<UserStats>,
    #[serde(default)]
    metrics: Option<StatisticsMetrics>,
}

#[derive(Debug, Deserialize)]
struct StatisticsMetrics {
    #[serde(default)]
    system: Option<SystemPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SystemPayload {
    Failed {
        #[allow(dead_code)]
        error: serde_json::Value,
    },
    Ok(SystemSnapshot),
}

impl From<StatisticsPayload> for Statistics {
    fn from(value: StatisticsPayload) -> Self {
        let system = value
            .metrics
            .and_then(|m| m.system)
            .and_then(|payload| match payload {
                SystemPayload::Ok(snapshot) => Some(snapshot),
                SystemPayload::Failed { .. } => None,
            });
        Self {
            users: value.users,
            system,
        }
    }
}
