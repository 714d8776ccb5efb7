use super::policy::OverlapPolicy;
use crate::core::helicorder::{self, BucketMap};
use crate::core::Wave;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One stored raw buffer plus its last access tick
pub(crate) struct Segment {
    pub wave: Arc<Wave>,
    last_access: AtomicU64,
}

impl Segment {
    fn new(wave: Arc<Wave>, tick: u64) -> Self {
        Self {
            wave,
            last_access: AtomicU64::new(tick),
        }
    }

    /// Callable under a shared lock
    pub fn touch(&self, tick: u64) {
        self.last_access.fetch_max(tick, Ordering::Relaxed);
    }

    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

/// Everything cached for one channel
#[derive(Default)]
pub(crate) struct ChannelEntry {
    /// Ascending by start time; same-rate segments never touch
    pub segments: Vec<Segment>,

    /// Stored helicorder rows: raw samples folded with `retained`
    pub buckets: BucketMap,

    /// Extents of evicted samples, kept until raw data covers the bucket again
    retained: BucketMap,

    pub bytes: usize,
}

const COVER_EPSILON: f64 = 1e-6;

impl ChannelEntry {
    /// Insert `wave`, stitching it to every same-rate segment it touches.
    ///
    /// Segments at another rate cannot share a grid, so the samples of the
    /// losing side that fall within the winner's sample span are cut out.
    /// Returns the number of segments evicted to stay under `max_bytes`.
    pub fn insert(
        &mut self,
        wave: Wave,
        policy: OverlapPolicy,
        bucket_width: f64,
        max_bytes: usize,
        tick: u64,
    ) -> usize {
        let (mut lo, mut hi) = (wave.start_time, wave.data_end());
        let pieces = match policy {
            OverlapPolicy::PreferNewer => {
                self.yield_to(&wave);
                vec![wave]
            }
            OverlapPolicy::PreferExisting => self.carve_against_stored(wave),
        };

        let mut inserted = Vec::new();
        for mut incoming in pieces {
            while let Some(pos) = self.segments.iter().position(|s| s.wave.touches(&incoming)) {
                let existing = self.remove_at(pos);
                incoming = match policy {
                    OverlapPolicy::PreferNewer => Wave::merge(&existing, &incoming),
                    OverlapPolicy::PreferExisting => Wave::merge(&incoming, &existing),
                };
            }

            lo = lo.min(incoming.start_time);
            hi = hi.max(incoming.data_end());
            let wave = Arc::new(incoming);
            inserted.push(wave.clone());
            self.push_sorted(Segment::new(wave, tick));
        }

        self.refresh_buckets(lo, hi, bucket_width);
        self.evict(max_bytes, &inserted, bucket_width)
    }

    /// Cut the samples under `winner` out of stored segments at another rate
    fn yield_to(&mut self, winner: &Wave) {
        let mut kept = Vec::with_capacity(self.segments.len());
        for seg in std::mem::take(&mut self.segments) {
            let Some(parts) = carve(&seg.wave, winner) else {
                kept.push(seg);
                continue;
            };
            self.bytes -= seg.wave.memory_size();
            let last_access = seg.last_access();
            for part in parts {
                self.bytes += part.memory_size();
                kept.push(Segment::new(Arc::new(part), last_access));
            }
        }
        kept.sort_by(|a, b| a.wave.start_time.total_cmp(&b.wave.start_time));
        self.segments = kept;
    }

    /// Pieces of `wave` left after removing every stored sample span at another rate
    fn carve_against_stored(&self, wave: Wave) -> Vec<Wave> {
        let mut pieces = vec![wave];
        for seg in &self.segments {
            pieces = pieces
                .into_iter()
                .flat_map(|piece| carve(&piece, &seg.wave).unwrap_or_else(|| vec![piece]))
                .collect();
        }
        pieces
    }

    /// Recompute stored rows for the buckets spanning `[t1, t2)` from raw segments
    fn refresh_buckets(&mut self, t1: f64, t2: f64, width: f64) {
        let Some((first, last)) = helicorder::bucket_span(t1, t2, width) else {
            return;
        };
        let (lo, hi) = (first as f64 * width, (last + 1) as f64 * width);

        let mut computed = BucketMap::new();
        for seg in self.segments.iter().filter(|s| s.wave.intersection(lo, hi) > 0.0) {
            helicorder::accumulate(&seg.wave, width, first, last, &mut computed);
        }

        for k in first..=last {
            if self.covers(k as f64 * width, (k + 1) as f64 * width) {
                self.retained.remove(&k);
            }
            if let Some(&extent) = self.retained.get(&k) {
                helicorder::merge_bucket(&mut computed, k, extent);
            }
            match computed.get(&k).copied() {
                Some(v) => {
                    self.buckets.insert(k, v);
                }
                None => {
                    self.buckets.remove(&k);
                }
            }
        }
    }

    /// Raw segments cover `[t1, t2)` without a gap
    fn covers(&self, t1: f64, t2: f64) -> bool {
        let mut cursor = t1;
        for seg in &self.segments {
            if seg.wave.data_end() <= cursor {
                continue;
            }
            if seg.wave.start_time > cursor + COVER_EPSILON {
                return false;
            }
            cursor = seg.wave.data_end();
            if cursor >= t2 - COVER_EPSILON {
                return true;
            }
        }
        false
    }

    fn remove_at(&mut self, index: usize) -> Arc<Wave> {
        let seg = self.segments.remove(index);
        self.bytes -= seg.wave.memory_size();
        seg.wave
    }

    fn push_sorted(&mut self, segment: Segment) {
        self.bytes += segment.wave.memory_size();
        let pos = self
            .segments
            .partition_point(|s| s.wave.start_time < segment.wave.start_time);
        self.segments.insert(pos, segment);
    }

    /// Drop least recently accessed segments until under budget, sparing `keep`.
    ///
    /// Evicted samples stay in `retained` so their helicorder rows survive.
    fn evict(&mut self, max_bytes: usize, keep: &[Arc<Wave>], width: f64) -> usize {
        let mut evicted = 0;
        while self.bytes > max_bytes {
            let victim = self
                .segments
                .iter()
                .enumerate()
                .filter(|(_, s)| !keep.iter().any(|k| Arc::ptr_eq(k, &s.wave)))
                .min_by_key(|(_, s)| s.last_access())
                .map(|(i, _)| i);

            let Some(i) = victim else {
                break;
            };
            let wave = self.remove_at(i);
            if let Some((first, last)) =
                helicorder::bucket_span(wave.start_time, wave.data_end(), width)
            {
                helicorder::accumulate(&wave, width, first, last, &mut self.retained);
            }
            evicted += 1;
        }
        evicted
    }

    /// Segment holding the most samples in `[t1, t2)`
    pub fn best_segment(&self, t1: f64, t2: f64) -> Option<&Segment> {
        self.segments
            .iter()
            .map(|s| (s, s.wave.count_in(t1, t2)))
            .filter(|(_, count)| *count > 0)
            .max_by_key(|(_, count)| *count)
            .map(|(s, _)| s)
    }
}

/// Parts of `loser` whose samples lie outside the sample span of `winner`.
///
/// `None` when the two share a rate or no sample of `loser` falls in that span.
fn carve(loser: &Wave, winner: &Wave) -> Option<Vec<Wave>> {
    if loser.same_rate(winner) || !loser.samples_overlap(winner) {
        return None;
    }
    let parts: Vec<Wave> = [loser.before(winner.start_time), loser.after(winner.end_time())]
        .into_iter()
        .flatten()
        .collect();
    if parts.iter().map(Wave::len).sum::<usize>() == loser.len() {
        return None;
    }
    Some(parts)
}
