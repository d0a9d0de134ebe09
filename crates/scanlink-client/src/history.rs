//! Server history sampler.
//!
//! Downsamples the `server_info` stream into one bounded series per server
//! address, suitable for trend charts.

use scanlink_core::ServerInfo;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(30);
pub const HISTORY_CAPACITY: usize = 100;

/// One point of a server's trend line.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Milliseconds since epoch when the sample was taken.
    pub timestamp: i64,
    pub cpu: i64,
    pub memory: i64,
    pub throughput: f64,
}

#[derive(Debug, Clone)]
pub struct ServerHistory {
    interval_ms: i64,
    capacity: usize,
    series: HashMap<String, VecDeque<Sample>>,
}

impl Default for ServerHistory {
    fn default() -> Self {
        Self::new(SAMPLE_INTERVAL, HISTORY_CAPACITY)
    }
}

impl ServerHistory {
    pub fn new(interval: Duration, capacity: usize) -> Self {
        Self {
            interval_ms: interval.as_millis() as i64,
            capacity: capacity.max(1),
            series: HashMap::new(),
        }
    }

    /// Record a snapshot taken at `now_ms`. A server gets a new sample only
    /// when `interval` has passed since its last one. Returns the number of
    /// samples appended.
    pub fn record(&mut self, servers: &[ServerInfo], now_ms: i64) -> usize {
        let mut appended = 0;
        for server in servers {
            let series = self.series.entry(server.ip.clone()).or_default();
            if let Some(last) = series.back() {
                if now_ms - last.timestamp < self.interval_ms {
                    continue;
                }
            }
            series.push_back(Sample {
                timestamp: now_ms,
                cpu: server.cpu,
                memory: server.memory,
                throughput: server.throughput(),
            });
            while series.len() > self.capacity {
                series.pop_front();
            }
            appended += 1;
        }
        appended
    }

    pub fn series(&self, ip: &str) -> Option<&VecDeque<Sample>> {
        self.series.get(ip)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}
