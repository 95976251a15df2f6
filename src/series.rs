use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Channel {
    #[serde(rename = "cpu_percent")]
    CpuPercent,
    #[serde(rename = "memory_percent")]
    MemoryPercent,
    #[serde(rename = "disk_percent")]
    DiskPercent,
    #[serde(rename = "requests")]
    Requests,
    #[serde(rename = "avg_response_ms")]
    AvgResponseMs,
    #[serde(rename = "status_2xx")]
    Status2xx,
    #[serde(rename = "status_3xx")]
    Status3xx,
    #[serde(rename = "status_4xx")]
    Status4xx,
    #[serde(rename = "status_5xx")]
    Status5xx,
}

impl Channel {
    pub const COUNT: usize = 9;

    pub const ALL: [Channel; Channel::COUNT] = [
        Channel::CpuPercent,
        Channel::MemoryPercent,
        Channel::DiskPercent,
        Channel::Requests,
        Channel::AvgResponseMs,
        Channel::Status2xx,
        Channel::Status3xx,
        Channel::Status4xx,
        Channel::Status5xx,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Point-in-time copy of every channel plus the shared label axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSnapshot {
    pub capacity: usize,
    pub labels: Vec<String>,
    pub values: BTreeMap<Channel, Vec<f64>>,
}

impl SeriesSnapshot {
    pub fn channel(&self, channel: Channel) -> &[f64] {
        self.values
            .get(&channel)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Fixed-capacity history where every channel and the label axis move in
/// lock-step: one sample per channel per `append`, FIFO eviction past capacity.
#[derive(Debug, Clone)]
pub struct RollingSeries {
    capacity: usize,
    labels: VecDeque<String>,
    channels: [VecDeque<f64>; Channel::COUNT],
}

impl RollingSeries {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            labels: VecDeque::with_capacity(capacity + 1),
            channels: std::array::from_fn(|_| VecDeque::with_capacity(capacity + 1)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[cfg(test)]
    pub fn latest(&self, channel: Channel) -> Option<f64> {
        self.channels[channel.index()].back().copied()
    }

    /// Appends one tick. Channels missing from `values` (or carrying a
    /// non-finite number) repeat their previous sample, or 0 on the first tick.
    pub fn append(&mut self, label: impl Into<String>, values: &HashMap<Channel, f64>) {
        for channel in Channel::ALL {
            let buf = &mut self.channels[channel.index()];
            let value = values
                .get(&channel)
                .copied()
                .filter(|v| v.is_finite())
                .or_else(|| buf.back().copied())
                .unwrap_or(0.0);
            buf.push_back(value);
        }
        self.labels.push_back(label.into());

        while self.labels.len() > self.capacity {
            self.labels.pop_front();
            for buf in &mut self.channels {
                buf.pop_front();
            }
        }
    }

    pub fn snapshot(&self) -> SeriesSnapshot {
        SeriesSnapshot {
            capacity: self.capacity(),
            labels: self.labels.iter().cloned().collect(),
            values: Channel::ALL
                .iter()
                .map(|c| (*c, self.channels[c.index()].iter().copied().collect()))
                .collect(),
        }
    }
}
