use crate::error::{WaveError, WaveResult};
use serde::{Deserialize, Serialize};

/// Sentinel marking a missing sample inside an otherwise contiguous buffer
pub const NO_DATA: i32 = i32::MIN;

/// Relative tolerance when comparing sample rates of two buffers
const RATE_TOLERANCE: f64 = 1e-6;

/// Absolute slack (seconds) used when mapping times onto sample indices
const TIME_EPSILON: f64 = 1e-6;

/// Contiguous run of integer samples at a fixed rate
///
/// `end_time() == start_time + (len - 1) / sample_rate`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wave {
    /// Samples per second
    pub sample_rate: f64,

    /// Time of the first sample, seconds since the epoch
    pub start_time: f64,

    pub samples: Vec<i32>,
}

impl Wave {
    pub fn new(sample_rate: f64, start_time: f64, samples: Vec<i32>) -> WaveResult<Self> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(WaveError::decode(format!("Invalid sample rate: {}", sample_rate)));
        }
        if !start_time.is_finite() {
            return Err(WaveError::decode("Start time is not finite"));
        }

        Ok(Self {
            sample_rate,
            start_time,
            samples,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Seconds between two samples
    pub fn period(&self) -> f64 {
        1.0 / self.sample_rate
    }

    /// Time of the last sample
    pub fn end_time(&self) -> f64 {
        if self.samples.is_empty() {
            return self.start_time;
        }
        self.start_time + (self.samples.len() - 1) as f64 / self.sample_rate
    }

    /// Exclusive end of the span this buffer covers (one period past the last sample)
    pub fn data_end(&self) -> f64 {
        self.start_time + self.samples.len() as f64 / self.sample_rate
    }

    pub fn time_at(&self, index: usize) -> f64 {
        self.start_time + index as f64 / self.sample_rate
    }

    /// Bytes held by this buffer
    pub fn memory_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.samples.len() * std::mem::size_of::<i32>()
    }

    /// First index whose sample time is at or after `t`, clamped to the buffer
    fn ceil_index(&self, t: f64) -> usize {
        let idx = ((t - self.start_time) * self.sample_rate - TIME_EPSILON).ceil();
        idx.clamp(0.0, self.samples.len() as f64) as usize
    }

    /// First index whose sample time is strictly after `t`, clamped to the buffer
    fn after_index(&self, t: f64) -> usize {
        let idx = ((t - self.start_time) * self.sample_rate + TIME_EPSILON).floor() + 1.0;
        idx.clamp(0.0, self.samples.len() as f64) as usize
    }

    /// Number of samples whose time falls in `[t1, t2)`
    pub fn count_in(&self, t1: f64, t2: f64) -> usize {
        self.ceil_index(t2).saturating_sub(self.ceil_index(t1))
    }

    /// Samples strictly before `t`
    pub fn before(&self, t: f64) -> Option<Wave> {
        self.slice(0, self.ceil_index(t))
    }

    /// Samples strictly after `t`
    pub fn after(&self, t: f64) -> Option<Wave> {
        self.slice(self.after_index(t), self.samples.len())
    }

    fn slice(&self, i1: usize, i2: usize) -> Option<Wave> {
        if i1 >= i2 {
            return None;
        }
        Some(Wave {
            sample_rate: self.sample_rate,
            start_time: self.time_at(i1),
            samples: self.samples[i1..i2].to_vec(),
        })
    }

    /// Sample times of both buffers interleave or coincide
    pub fn samples_overlap(&self, other: &Wave) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start_time <= other.end_time()
            && other.start_time <= self.end_time()
    }

    pub fn same_rate(&self, other: &Wave) -> bool {
        (self.sample_rate - other.sample_rate).abs() <= self.sample_rate * RATE_TOLERANCE
    }

    /// Overlapping or abutting (gap of at most half a period) at the same rate
    pub fn touches(&self, other: &Wave) -> bool {
        if !self.same_rate(other) {
            return false;
        }
        let slack = self.period() * 0.5;
        other.start_time <= self.data_end() + slack && self.start_time <= other.data_end() + slack
    }

    /// Length in seconds of the overlap between this buffer and `[t1, t2)`
    pub fn intersection(&self, t1: f64, t2: f64) -> f64 {
        (self.data_end().min(t2) - self.start_time.max(t1)).max(0.0)
    }

    /// Samples whose time falls in `[t1, t2)`, or `None` if there are none
    pub fn subset(&self, t1: f64, t2: f64) -> Option<Wave> {
        self.slice(self.ceil_index(t1), self.ceil_index(t2))
    }

    /// Stitch two touching buffers onto one grid anchored at the earlier start.
    ///
    /// Where both carry a real sample, `winner` overrides `loser`. `NO_DATA`
    /// never overrides a real sample, and uncovered positions stay `NO_DATA`.
    pub fn merge(loser: &Wave, winner: &Wave) -> Wave {
        let sample_rate = loser.sample_rate;
        let start_time = loser.start_time.min(winner.start_time);
        let end = loser.data_end().max(winner.data_end());
        let len = ((end - start_time) * sample_rate).round().max(0.0) as usize;

        let mut samples = vec![NO_DATA; len];
        for wave in [loser, winner] {
            let offset = ((wave.start_time - start_time) * sample_rate).round() as usize;
            for (i, &s) in wave.samples.iter().enumerate() {
                if s == NO_DATA {
                    continue;
                }
                if let Some(slot) = samples.get_mut(offset + i) {
                    *slot = s;
                }
            }
        }

        Wave {
            sample_rate,
            start_time,
            samples,
        }
    }

    /// Minimum and maximum ignoring `NO_DATA`
    pub fn min_max(&self) -> Option<(i32, i32)> {
        self.samples
            .iter()
            .filter(|&&s| s != NO_DATA)
            .fold(None, |acc, &s| match acc {
                None => Some((s, s)),
                Some((lo, hi)) => Some((lo.min(s), hi.max(s))),
            })
    }

    pub fn has_gaps(&self) -> bool {
        self.samples.iter().any(|&s| s == NO_DATA)
    }

    /// Mean of the real samples
    pub fn mean(&self) -> Option<f64> {
        let (sum, count) = self
            .samples
            .iter()
            .filter(|&&s| s != NO_DATA)
            .fold((0i64, 0usize), |(sum, n), &s| (sum + s as i64, n + 1));
        if count == 0 {
            None
        } else {
            Some(sum as f64 / count as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wave(start: f64, samples: Vec<i32>) -> Wave {
        Wave::new(10.0, start, samples).unwrap()
    }

    #[test]
    fn test_end_time_invariant() {
        let w = wave(100.0, vec![1, 2, 3, 4, 5]);
        assert!((w.end_time() - 100.4).abs() < 1e-9);
        assert!((w.data_end() - 100.5).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_bad_rate() {
        assert!(Wave::new(0.0, 0.0, vec![]).is_err());
        assert!(Wave::new(f64::NAN, 0.0, vec![]).is_err());
    }

    #[test]
    fn test_subset_clips_to_range() {
        let w = wave(0.0, (0..20).collect());
        let sub = w.subset(0.5, 1.0).unwrap();
        assert_eq!(sub.samples, vec![5, 6, 7, 8, 9]);
        assert!((sub.start_time - 0.5).abs() < 1e-9);

        assert!(w.subset(5.0, 6.0).is_none());
    }

    #[test]
    fn test_merge_prefers_winner_on_overlap() {
        let old = wave(0.0, vec![1, 1, 1, 1]);
        let new = wave(0.2, vec![9, 9, 9, 9]);
        let merged = Wave::merge(&old, &new);
        assert_eq!(merged.samples, vec![1, 1, 9, 9, 9, 9]);
    }

    #[test]
    fn test_merge_keeps_real_samples_over_gaps() {
        let old = wave(0.0, vec![1, 2, 3]);
        let new = wave(0.0, vec![NO_DATA, 7, NO_DATA]);
        let merged = Wave::merge(&old, &new);
        assert_eq!(merged.samples, vec![1, 7, 3]);
    }

    #[test]
    fn test_touches_abutting_buffers() {
        let a = wave(0.0, vec![0; 10]);
        let b = wave(1.0, vec![0; 10]);
        let far = wave(5.0, vec![0; 10]);
        assert!(a.touches(&b));
        assert!(b.touches(&a));
        assert!(!a.touches(&far));
    }

    #[test]
    fn test_min_max_ignores_gaps() {
        let w = wave(0.0, vec![NO_DATA, -4, 7, NO_DATA]);
        assert_eq!(w.min_max(), Some((-4, 7)));
        assert!(w.has_gaps());
        assert_eq!(wave(0.0, vec![NO_DATA]).min_max(), None);
    }

    #[test]
    fn test_before_and_after_exclude_boundary_samples() {
        // 10 Hz: samples at 0.0, 0.1, ... 0.9
        let w = wave(0.0, (0..10).collect());
        assert_eq!(w.before(0.3).unwrap().samples, vec![0, 1, 2]);
        assert_eq!(w.before(0.35).unwrap().samples, vec![0, 1, 2, 3]);
        assert_eq!(w.after(0.6).unwrap().samples, vec![7, 8, 9]);
        assert_eq!(w.after(0.65).unwrap().samples, vec![7, 8, 9]);
        assert!(w.before(0.0).is_none());
        assert!(w.after(0.9).is_none());
    }

    #[test]
    fn test_samples_overlap_uses_sample_times() {
        let slow = Wave::new(1.0, 0.0, vec![0; 5]).unwrap(); // samples at 0..=4
        let fast = Wave::new(2.0, 4.3, vec![0; 4]).unwrap(); // samples at 4.3..=5.8
        let later = Wave::new(2.0, 4.5, vec![0; 2]).unwrap();
        assert!(slow.samples_overlap(&Wave::new(2.0, 3.9, vec![0; 2]).unwrap()));
        assert!(!slow.samples_overlap(&fast));
        assert!(!later.samples_overlap(&slow));
        assert_eq!(slow.count_in(1.0, 3.5), 3);
    }
}
