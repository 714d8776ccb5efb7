use super::MetricsCollector;

pub struct MetricsReport {
    collector: MetricsCollector,
}

impl MetricsReport {
    pub fn new(collector: MetricsCollector) -> Self {
        Self { collector }
    }

    pub fn generate_report(&self) -> String {
        let mut fetches: Vec<_> = self.collector.fetch_snapshot().into_values().collect();
        let mut streams: Vec<_> = self.collector.stream_snapshot().into_values().collect();

        if fetches.is_empty() && streams.is_empty() {
            return "No activity recorded".to_string();
        }

        fetches.sort_by(|a, b| a.key.cmp(&b.key));
        streams.sort_by(|a, b| a.session.cmp(&b.session));

        let mut report = String::from("=== Acquisition Metrics ===\n");

        for m in &fetches {
            report.push_str(&format!(
                "\n[{}]\n  Chunks: {} ok, {} failed\n  Samples: {}\n  Avg Latency: {}μs\n",
                m.key, m.chunks_fetched, m.chunks_failed, m.samples_received, m.avg_latency_us
            ));
        }

        for m in &streams {
            report.push_str(&format!(
                "\n[{}]\n  Packets: {} ({} dropped)\n  Samples: {}\n  Reconnects: {}\n",
                m.session, m.packets, m.decode_errors, m.samples, m.reconnects
            ));
        }

        report
    }

    pub fn collector(&self) -> &MetricsCollector {
        &self.collector
    }
}
