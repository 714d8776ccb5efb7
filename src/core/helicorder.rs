use super::wave::{Wave, NO_DATA};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Keeps samples that sit exactly on a bucket boundary in the later bucket
const BOUNDARY_EPSILON: f64 = 1e-6;

/// Min/max summary of one fixed-width time bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HelicorderRow {
    pub start_time: f64,
    pub duration: f64,
    pub min: Option<i32>,
    pub max: Option<i32>,
}

impl HelicorderRow {
    pub fn empty(start_time: f64, duration: f64) -> Self {
        Self {
            start_time,
            duration,
            min: None,
            max: None,
        }
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// True for a gap row
    pub fn is_empty(&self) -> bool {
        self.min.is_none()
    }
}

/// Bucket index containing time `t`
pub fn bucket_index(t: f64, width: f64) -> i64 {
    ((t + BOUNDARY_EPSILON) / width).floor() as i64
}

/// Min/max per bucket index, sparse
pub type BucketMap = BTreeMap<i64, (i32, i32)>;

/// Fold the samples of `wave` that fall in buckets `first..=last` into `buckets`
pub fn accumulate(wave: &Wave, width: f64, first: i64, last: i64, buckets: &mut BucketMap) {
    for (i, &sample) in wave.samples.iter().enumerate() {
        if sample == NO_DATA {
            continue;
        }
        let k = bucket_index(wave.time_at(i), width);
        if k < first {
            continue;
        }
        if k > last {
            break;
        }
        merge_bucket(buckets, k, (sample, sample));
    }
}

/// Widen the stored extent of bucket `k` by `(lo, hi)`
pub fn merge_bucket(buckets: &mut BucketMap, k: i64, (lo, hi): (i32, i32)) {
    buckets
        .entry(k)
        .and_modify(|(min, max)| {
            *min = (*min).min(lo);
            *max = (*max).max(hi);
        })
        .or_insert((lo, hi));
}

/// Expand a sparse bucket map into contiguous rows covering `first..=last`
pub fn rows_for(buckets: &BucketMap, width: f64, first: i64, last: i64) -> Vec<HelicorderRow> {
    (first..=last)
        .map(|k| {
            let start = k as f64 * width;
            match buckets.get(&k) {
                Some(&(min, max)) => HelicorderRow {
                    start_time: start,
                    duration: width,
                    min: Some(min),
                    max: Some(max),
                },
                None => HelicorderRow::empty(start, width),
            }
        })
        .collect()
}

/// Bucket range `first..=last` overlapping `[t1, t2)`
pub fn bucket_span(t1: f64, t2: f64, width: f64) -> Option<(i64, i64)> {
    if t2 <= t1 {
        return None;
    }
    let first = bucket_index(t1, width);
    let last = ((t2 - BOUNDARY_EPSILON) / width).ceil() as i64 - 1;
    Some((first, last.max(first)))
}
