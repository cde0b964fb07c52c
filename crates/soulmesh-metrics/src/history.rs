//! Bounded, time-ordered history of recorded measurements.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// A single timestamped measurement.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: u64,
    pub value: f64,
}

/// Per-metric ring of recent samples. Once a metric holds `capacity`
/// samples, recording another evicts the oldest.
#[derive(Clone, Debug)]
pub struct MetricHistory {
    capacity: usize,
    series: HashMap<String, VecDeque<Sample>>,
}

impl MetricHistory {
    pub fn new(capacity: usize) -> Self {
        MetricHistory {
            capacity: capacity.max(1),
            series: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a sample. Out-of-order timestamps are inserted in place so
    /// each series stays sorted.
    pub fn record(&mut self, name: &str, timestamp: u64, value: f64) {
        let capacity = self.capacity;
        let series = self
            .series
            .entry(name.to_string())
            .or_insert_with(|| VecDeque::with_capacity(capacity));

        if series.len() == capacity {
            // Older than everything retained: it would be evicted immediately.
            if series.front().is_some_and(|s| timestamp < s.timestamp) {
                return;
            }
            series.pop_front();
        }

        let sample = Sample { timestamp, value };
        match series.back() {
            Some(last) if last.timestamp > timestamp => {
                let at = series.partition_point(|s| s.timestamp <= timestamp);
                series.insert(at, sample);
            }
            _ => series.push_back(sample),
        }
    }

    /// All retained samples, oldest first.
    pub fn samples(&self, name: &str) -> Vec<Sample> {
        self.series
            .get(name)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Samples taken at or after `since`.
    pub fn since(&self, name: &str, since: u64) -> Vec<Sample> {
        self.series
            .get(name)
            .map(|s| s.iter().filter(|x| x.timestamp >= since).copied().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, name: &str) -> Option<Sample> {
        self.series.get(name).and_then(|s| s.back().copied())
    }

    pub fn mean(&self, name: &str) -> Option<f64> {
        let series = self.series.get(name)?;
        if series.is_empty() {
            return None;
        }
        Some(series.iter().map(|s| s.value).sum::<f64>() / series.len() as f64)
    }

    /// Least-squares slope of value over time, in units per second.
    /// `None` with fewer than two samples or when all share a timestamp.
    pub fn trend(&self, name: &str) -> Option<f64> {
        let series = self.series.get(name)?;
        if series.len() < 2 {
            return None;
        }
        let origin = series.front()?.timestamp;
        let n = series.len() as f64;
        let xs = series.iter().map(|s| (s.timestamp - origin) as f64 / 1000.0);
        let mean_x = xs.clone().sum::<f64>() / n;
        let mean_y = series.iter().map(|s| s.value).sum::<f64>() / n;

        let (mut num, mut den) = (0.0, 0.0);
        for (x, s) in xs.zip(series.iter()) {
            num += (x - mean_x) * (s.value - mean_y);
            den += (x - mean_x) * (x - mean_x);
        }
        (den > 0.0).then(|| num / den)
    }

    pub fn metric_names(&self) -> impl Iterator<Item = &String> {
        self.series.keys()
    }
}
