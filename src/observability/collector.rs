use super::{FetchMetrics, StreamMetrics};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct FetchSnapshot {
    pub key: String,
    pub chunks_fetched: u64,
    pub chunks_failed: u64,
    pub samples_received: u64,
    pub avg_latency_us: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSnapshot {
    pub session: String,
    pub packets: u64,
    pub decode_errors: u64,
    pub reconnects: u64,
    pub samples: u64,
}

#[derive(Clone, Default)]
pub struct MetricsCollector {
    fetches: HashMap<String, Arc<FetchMetrics>>,
    streams: HashMap<String, Arc<StreamMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metrics for `key`, created on first use so restarted gulpers accumulate
    pub fn fetch_metrics(&mut self, key: &str) -> Arc<FetchMetrics> {
        self.fetches
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(FetchMetrics::new(key)))
            .clone()
    }

    pub fn register_stream(&mut self, metrics: Arc<StreamMetrics>) {
        self.streams.insert(metrics.session().to_string(), metrics);
    }

    pub fn fetch_snapshot(&self) -> HashMap<String, FetchSnapshot> {
        self.fetches
            .iter()
            .map(|(key, m)| {
                (
                    key.clone(),
                    FetchSnapshot {
                        key: m.key().to_string(),
                        chunks_fetched: m.chunks_fetched(),
                        chunks_failed: m.chunks_failed(),
                        samples_received: m.samples_received(),
                        avg_latency_us: m.avg_latency_us(),
                    },
                )
            })
            .collect()
    }

    pub fn stream_snapshot(&self) -> HashMap<String, StreamSnapshot> {
        self.streams
            .iter()
            .map(|(session, m)| {
                (
                    session.clone(),
                    StreamSnapshot {
                        session: m.session().to_string(),
                        packets: m.packets(),
                        decode_errors: m.decode_errors(),
                        reconnects: m.reconnects(),
                        samples: m.samples(),
                    },
                )
            })
            .collect()
    }

    /// Take over every entry of `other` not already tracked here
    pub fn merge(&mut self, other: &MetricsCollector) {
        for (key, metrics) in &other.fetches {
            self.fetches.entry(key.clone()).or_insert_with(|| metrics.clone());
        }
        for (session, metrics) in &other.streams {
            self.streams.entry(session.clone()).or_insert_with(|| metrics.clone());
        }
    }

    pub fn get_fetch_metrics(&self, key: &str) -> Option<Arc<FetchMetrics>> {
        self.fetches.get(key).cloned()
    }

    pub fn get_stream_metrics(&self, session: &str) -> Option<Arc<StreamMetrics>> {
        self.streams.get(session).cloned()
    }
}
