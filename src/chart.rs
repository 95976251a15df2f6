use crate::series::{Channel, SeriesSnapshot};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisKind {
    Percent,
    Linear,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisSpec {
    pub id: &'static str,
    pub kind: AxisKind,
    pub title: &'static str,
    pub min: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    pub position: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    pub key: Channel,
    pub label: &'static str,
    pub color: &'static str,
    pub axis: &'static str,
    pub data: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub id: &'static str,
    pub title: &'static str,
    pub labels: Vec<String>,
    pub axes: Vec<AxisSpec>,
    pub datasets: Vec<Dataset>,
}

struct SeriesStyle {
    channel: Channel,
    label: &'static str,
    color: &'static str,
    axis: &'static str,
}

const PERCENT_AXIS: AxisSpec = AxisSpec {
    id: "percent",
    kind: AxisKind::Percent,
    title: "%",
    min: 0.0,
    max: Some(100.0),
    position: "left",
};

const COUNT_AXIS: AxisSpec = AxisSpec {
    id: "count",
    kind: AxisKind::Linear,
    title: "requests",
    min: 0.0,
    max: None,
    position: "left",
};

const MS_AXIS: AxisSpec = AxisSpec {
    id: "ms",
    kind: AxisKind::Linear,
    title: "ms",
    min: 0.0,
    max: None,
    position: "right",
};

const RESOURCE_SERIES: [SeriesStyle; 3] = [
    SeriesStyle {
        channel: Channel::CpuPercent,
        label: "CPU %",
        color: "#ef4444",
        axis: "percent",
    },
    SeriesStyle {
        channel: Channel::MemoryPercent,
        label: "Memory %",
        color: "#3b82f6",
        axis: "percent",
    },
    SeriesStyle {
        channel: Channel::DiskPercent,
        label: "Disk %",
        color: "#10b981",
        axis: "percent",
    },
];

const TRAFFIC_SERIES: [SeriesStyle; 2] = [
    SeriesStyle {
        channel: Channel::Requests,
        label: "Requests (1m)",
        color: "#6366f1",
        axis: "count",
    },
    SeriesStyle {
        channel: Channel::AvgResponseMs,
        label: "Avg response (ms)",
        color: "#f59e0b",
        axis: "ms",
    },
];

const STATUS_SERIES: [SeriesStyle; 4] = [
    SeriesStyle {
        channel: Channel::Status2xx,
        label: "2xx",
        color: "#22c55e",
        axis: "count",
    },
    SeriesStyle {
        channel: Channel::Status3xx,
        label: "3xx",
        color: "#0ea5e9",
        axis: "count",
    },
    SeriesStyle {
        channel: Channel::Status4xx,
        label: "4xx",
        color: "#f97316",
        axis: "count",
    },
    SeriesStyle {
        channel: Channel::Status5xx,
        label: "5xx",
        color: "#dc2626",
        axis: "count",
    },
];

/// Resource, traffic and status-class charts over the shared label axis.
pub fn build_charts(snapshot: &SeriesSnapshot) -> Vec<ChartSpec> {
    vec![
        chart(
            snapshot,
            "resources",
            "System resources",
            vec![PERCENT_AXIS],
            &RESOURCE_SERIES,
        ),
        chart(
            snapshot,
            "traffic",
            "Traffic and latency",
            vec![COUNT_AXIS, MS_AXIS],
            &TRAFFIC_SERIES,
        ),
        chart(
            snapshot,
            "status_classes",
            "Status codes (15m)",
            vec![COUNT_AXIS],
            &STATUS_SERIES,
        ),
    ]
}

fn chart(
    snapshot: &SeriesSnapshot,
    id: &'static str,
    title: &'static str,
    axes: Vec<AxisSpec>,
    styles: &[SeriesStyle],
) -> ChartSpec {
    ChartSpec {
        id,
        title,
        labels: snapshot.labels.clone(),
        axes,
        datasets: styles
            .iter()
            .map(|s| Dataset {
                key: s.channel,
                label: s.label,
                color: s.color,
                axis: s.axis,
                data: snapshot.channel(s.channel).to_vec(),
            })
            .collect(),
    }
}

/// Unicode block sparkline scaled to the maximum of `values`.
pub fn sparkline(values: &[f64]) -> String {
    const BLOCKS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

    let max = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0_f64, f64::max);
    values
        .iter()
        .map(|v| {
            if max <= 0.0 || !v.is_finite() || *v <= 0.0 {
                return BLOCKS[0];
            }
            let idx = ((v / max) * (BLOCKS.len() - 1) as f64).round() as usize;
            BLOCKS[idx.min(BLOCKS.len() - 1)]
        })
        .collect()
}
