use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters for one chunked-fetch key
pub struct FetchMetrics {
    key: String,
    chunks_fetched: AtomicU64,
    chunks_failed: AtomicU64,
    samples_received: AtomicU64,
    total_latency_us: AtomicU64,
    latency_samples: AtomicU64,
}

impl FetchMetrics {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            chunks_fetched: AtomicU64::new(0),
            chunks_failed: AtomicU64::new(0),
            samples_received: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            latency_samples: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn chunks_fetched(&self) -> u64 {
        self.chunks_fetched.load(Ordering::Relaxed)
    }

    pub fn chunks_failed(&self) -> u64 {
        self.chunks_failed.load(Ordering::Relaxed)
    }

    pub fn samples_received(&self) -> u64 {
        self.samples_received.load(Ordering::Relaxed)
    }

    pub fn record_chunk(&self, success: bool) {
        if success {
            self.chunks_fetched.fetch_add(1, Ordering::Relaxed);
        } else {
            self.chunks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_samples(&self, count: usize) {
        self.samples_received.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn start_fetch(&self) -> Instant {
        Instant::now()
    }

    pub fn finish_fetch(&self, start: Instant) {
        let latency_us = start.elapsed().as_micros() as u64;
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_latency_us(&self) -> u64 {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return 0;
        }
        self.total_latency_us.load(Ordering::Relaxed) / samples
    }
}

/// Counters for one streaming session
pub struct StreamMetrics {
    session: String,
    packets: AtomicU64,
    decode_errors: AtomicU64,
    reconnects: AtomicU64,
    samples: AtomicU64,
}

impl StreamMetrics {
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            packets: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            samples: AtomicU64::new(0),
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }

    pub fn record_packet(&self, samples: usize) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.samples.fetch_add(samples as u64, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }
}
