use super::entry::ChannelEntry;
use super::policy::CacheConfig;
use crate::core::helicorder::{self, BucketMap};
use crate::core::{ChannelKey, HelicorderRow, Wave};
use crate::error::WaveResult;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Aggregate cache occupancy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub channels: usize,
    pub segments: usize,
    pub bytes: usize,
    pub helicorder_rows: usize,
}

/// Process-wide store of raw waveform segments and helicorder summaries.
///
/// Each channel sits behind its own lock; the outer map lock is only held
/// long enough to resolve a channel's entry, so unrelated channels never
/// serialize on each other. Segments are shared as `Arc<Wave>`, which lets
/// a reader keep a segment alive even if eviction drops it mid-query.
pub struct TimeSeriesCache {
    channels: RwLock<HashMap<ChannelKey, Arc<RwLock<ChannelEntry>>>>,
    config: CacheConfig,
    clock: AtomicU64,
}

impl TimeSeriesCache {
    pub fn new(config: CacheConfig) -> WaveResult<Self> {
        config.validate()?;
        Ok(Self {
            channels: RwLock::new(HashMap::new()),
            config,
            clock: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn entry(&self, channel: &ChannelKey) -> Option<Arc<RwLock<ChannelEntry>>> {
        self.channels.read().get(channel).cloned()
    }

    fn entry_or_create(&self, channel: &ChannelKey) -> Arc<RwLock<ChannelEntry>> {
        if let Some(entry) = self.entry(channel) {
            return entry;
        }
        self.channels
            .write()
            .entry(channel.clone())
            .or_default()
            .clone()
    }

    /// Insert a buffer, merging it with any stored buffer it overlaps or abuts
    pub fn put(&self, channel: &ChannelKey, wave: Wave) {
        if wave.is_empty() {
            return;
        }

        let entry = self.entry_or_create(channel);
        let tick = self.tick();
        let evicted = entry.write().insert(
            wave,
            self.config.overlap_policy,
            self.config.helicorder_bucket_seconds,
            self.config.max_bytes_per_channel,
            tick,
        );

        if evicted > 0 {
            log::debug!("Evicted {} segment(s) from {}", evicted, channel);
        }
    }

    /// Cached samples best covering `[t1, t2)`, clipped to the range
    pub fn get_wave(&self, channel: &ChannelKey, t1: f64, t2: f64) -> Option<Wave> {
        let entry = self.entry(channel)?;
        let tick = self.tick();

        let segment = {
            let guard = entry.read();
            let best = guard.best_segment(t1, t2)?;
            best.touch(tick);
            best.wave.clone()
        };

        segment.subset(t1, t2)
    }

    /// Contiguous helicorder rows for `[t1, t2)`; gap buckets come back empty.
    ///
    /// Buckets without a stored summary are computed from raw segments
    /// without touching the stored state. `None` if nothing is known.
    pub fn get_helicorder(&self, channel: &ChannelKey, t1: f64, t2: f64) -> Option<Vec<HelicorderRow>> {
        let width = self.config.helicorder_bucket_seconds;
        let (first, last) = helicorder::bucket_span(t1, t2, width)?;
        let entry = self.entry(channel)?;
        let guard = entry.read();

        let mut buckets: BucketMap = guard
            .buckets
            .range(first..=last)
            .map(|(&k, &v)| (k, v))
            .collect();

        let mut computed = BucketMap::new();
        for seg in guard.segments.iter().filter(|s| s.wave.intersection(t1, t2) > 0.0) {
            helicorder::accumulate(&seg.wave, width, first, last, &mut computed);
        }
        drop(guard);

        for (k, v) in computed {
            buckets.entry(k).or_insert(v);
        }

        if buckets.is_empty() {
            return None;
        }
        Some(helicorder::rows_for(&buckets, width, first, last))
    }

    /// Spans covered by raw segments, ascending
    pub fn coverage(&self, channel: &ChannelKey) -> Vec<(f64, f64)> {
        self.entry(channel)
            .map(|entry| {
                entry
                    .read()
                    .segments
                    .iter()
                    .map(|s| (s.wave.start_time, s.wave.data_end()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Portions of `[t1, t2)` not covered by any raw segment
    pub fn missing_ranges(&self, channel: &ChannelKey, t1: f64, t2: f64) -> Vec<(f64, f64)> {
        let mut gaps = Vec::new();
        let mut cursor = t1;
        for (start, end) in self.coverage(channel) {
            if end <= cursor {
                continue;
            }
            if start >= t2 {
                break;
            }
            if start > cursor {
                gaps.push((cursor, start));
            }
            cursor = cursor.max(end);
        }
        if cursor < t2 {
            gaps.push((cursor, t2));
        }
        gaps
    }

    pub fn channels(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<ChannelKey> = self.channels.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn segment_count(&self, channel: &ChannelKey) -> usize {
        self.entry(channel).map(|e| e.read().segments.len()).unwrap_or(0)
    }

    pub fn memory_usage(&self, channel: &ChannelKey) -> usize {
        self.entry(channel).map(|e| e.read().bytes).unwrap_or(0)
    }

    pub fn stats(&self) -> CacheStats {
        let entries: Vec<_> = self.channels.read().values().cloned().collect();
        let mut stats = CacheStats {
            channels: entries.len(),
            ..Default::default()
        };
        for entry in entries {
            let guard = entry.read();
            stats.segments += guard.segments.len();
            stats.bytes += guard.bytes;
            stats.helicorder_rows += guard.buckets.len();
        }
        stats
    }
}
