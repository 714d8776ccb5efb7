use quakewave::cache::{CacheConfig, OverlapPolicy, TimeSeriesCache};
use quakewave::core::{ChannelKey, Wave, NO_DATA};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

fn wave(start: f64, samples: Vec<i32>) -> Wave {
    Wave::new(1.0, start, samples).unwrap()
}

fn cache() -> TimeSeriesCache {
    TimeSeriesCache::new(CacheConfig::default()).unwrap()
}

#[test]
fn test_merge_is_idempotent() {
    let cache = cache();
    let key = ChannelKey::from("test/ANMO BHZ IU 00");

    cache.put(&key, wave(0.0, (0..20).collect()));
    let once = cache.get_wave(&key, 0.0, 20.0).unwrap();
    cache.put(&key, wave(0.0, (0..20).collect()));
    let twice = cache.get_wave(&key, 0.0, 20.0).unwrap();

    assert_eq!(once, twice);
    assert_eq!(cache.segment_count(&key), 1);
    assert_eq!(cache.memory_usage(&key), once.memory_size());
}

#[test]
fn test_abutting_merge_is_order_independent() {
    let a = wave(0.0, (0..10).collect());
    let b = wave(10.0, (10..20).collect());
    let key = ChannelKey::from("test/A");

    let forward = cache();
    forward.put(&key, a.clone());
    forward.put(&key, b.clone());

    let backward = cache();
    backward.put(&key, b);
    backward.put(&key, a);

    let f = forward.get_wave(&key, 0.0, 20.0).unwrap();
    let r = backward.get_wave(&key, 0.0, 20.0).unwrap();
    assert_eq!(f, r);
    assert_eq!(f.samples, (0..20).collect::<Vec<_>>());
    assert_eq!(forward.segment_count(&key), 1);
    assert_eq!(backward.segment_count(&key), 1);
}

#[test]
fn test_half_period_gap_still_merges() {
    let cache = TimeSeriesCache::new(CacheConfig::default()).unwrap();
    let key = ChannelKey::from("test/A");
    cache.put(&key, Wave::new(10.0, 0.0, vec![1; 10]).unwrap());
    cache.put(&key, Wave::new(10.0, 1.04, vec![2; 10]).unwrap());
    assert_eq!(cache.segment_count(&key), 1);

    cache.put(&key, Wave::new(10.0, 5.0, vec![3; 10]).unwrap());
    assert_eq!(cache.segment_count(&key), 2);
}

#[test]
fn test_no_data_never_overrides_samples() {
    let cache = cache();
    let key = ChannelKey::from("test/A");

    cache.put(&key, wave(0.0, vec![1, 1, 1, 1]));
    cache.put(&key, wave(2.0, vec![NO_DATA, 9, 9]));

    let got = cache.get_wave(&key, 0.0, 5.0).unwrap();
    assert_eq!(got.samples, vec![1, 1, 1, 9, 9]);
}

#[test]
fn test_overlap_policies_pick_different_winners() {
    let key = ChannelKey::from("test/A");
    for (policy, expected) in [
        (OverlapPolicy::PreferNewer, vec![1, 1, 2, 2, 2]),
        (OverlapPolicy::PreferExisting, vec![1, 1, 1, 1, 2]),
    ] {
        let cache = TimeSeriesCache::new(CacheConfig {
            overlap_policy: policy,
            ..Default::default()
        })
        .unwrap();
        cache.put(&key, wave(0.0, vec![1; 4]));
        cache.put(&key, wave(2.0, vec![2; 3]));
        assert_eq!(cache.get_wave(&key, 0.0, 5.0).unwrap().samples, expected, "{:?}", policy);
    }
}

#[test]
fn test_helicorder_three_buckets() {
    let cache = TimeSeriesCache::new(CacheConfig {
        helicorder_bucket_seconds: 10.0,
        ..Default::default()
    })
    .unwrap();
    let key = ChannelKey::from("test/A");

    let mut samples = Vec::new();
    samples.extend(0..10);
    samples.extend((0..10).map(|i| -i));
    samples.extend((0..10).map(|i| 100 + i));
    cache.put(&key, wave(0.0, samples));

    let rows = cache.get_helicorder(&key, 0.0, 30.0).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!((rows[0].min, rows[0].max), (Some(0), Some(9)));
    assert_eq!((rows[1].min, rows[1].max), (Some(-9), Some(0)));
    assert_eq!((rows[2].min, rows[2].max), (Some(100), Some(109)));
    assert_eq!(rows[2].start_time, 20.0);
    assert_eq!(rows[2].duration, 10.0);
}

#[test]
fn test_helicorder_gap_rows() {
    let cache = TimeSeriesCache::new(CacheConfig {
        helicorder_bucket_seconds: 10.0,
        ..Default::default()
    })
    .unwrap();
    let key = ChannelKey::from("test/A");
    cache.put(&key, wave(0.0, vec![5; 10]));
    cache.put(&key, wave(20.0, vec![7; 10]));

    let rows = cache.get_helicorder(&key, 0.0, 30.0).unwrap();
    assert_eq!(rows.len(), 3);
    assert!(!rows[0].is_empty());
    assert!(rows[1].is_empty());
    assert_eq!(rows[2].max, Some(7));
}

#[test]
fn test_channels_are_independent_across_threads() {
    let cache = Arc::new(cache());
    let handles: Vec<_> = (0..8)
        .map(|n| {
            let cache = cache.clone();
            std::thread::spawn(move || {
                let key = ChannelKey::from_raw(format!("test/CH{}", n));
                for chunk in 0..50 {
                    cache.put(&key, wave(chunk as f64 * 10.0, vec![n; 10]));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = cache.stats();
    assert_eq!(stats.channels, 8);
    assert_eq!(stats.segments, 8);
    for n in 0..8 {
        let key = ChannelKey::from_raw(format!("test/CH{}", n));
        let got = cache.get_wave(&key, 0.0, 500.0).unwrap();
        assert_eq!(got.len(), 500);
        assert!(got.samples.iter().all(|&s| s == n));
    }
}

/// Run `f` on its own thread, failing the test if it does not return in time
fn within_deadline<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(Duration::from_secs(3))
        .expect("cache insert did not finish")
}

fn assert_coverage(got: &[(f64, f64)], want: &[(f64, f64)]) {
    assert_eq!(got.len(), want.len(), "coverage {:?}", got);
    for (g, w) in got.iter().zip(want) {
        assert!(
            (g.0 - w.0).abs() < 1e-9 && (g.1 - w.1).abs() < 1e-9,
            "coverage {:?}, expected {:?}",
            got,
            want
        );
    }
}

fn off_grid_fast() -> Wave {
    // 2 Hz samples at 4.3, 4.8, 5.3, 5.8: none on the 1 Hz grid
    Wave::new(2.0, 4.3, vec![7; 4]).unwrap()
}

#[test]
fn test_off_grid_newer_rate_keeps_all_its_samples() {
    let cache = within_deadline(|| {
        let cache = cache();
        let key = ChannelKey::from("test/ANMO BHZ IU 00");
        cache.put(&key, wave(0.0, vec![1; 10]));
        cache.put(&key, off_grid_fast());
        cache
    });
    let key = ChannelKey::from("test/ANMO BHZ IU 00");

    assert_coverage(&cache.coverage(&key), &[(0.0, 5.0), (4.3, 6.3), (6.0, 10.0)]);
    let got = cache.get_wave(&key, 4.3, 4.9).unwrap();
    assert_eq!(got.samples, vec![7, 7]);
    let got = cache.get_wave(&key, 6.0, 10.0).unwrap();
    assert_eq!(got.samples, vec![1; 4]);
}

#[test]
fn test_off_grid_existing_rate_is_not_displaced() {
    let cache = within_deadline(|| {
        let config = CacheConfig {
            overlap_policy: OverlapPolicy::PreferExisting,
            ..Default::default()
        };
        let cache = TimeSeriesCache::new(config).unwrap();
        let key = ChannelKey::from("test/ANMO BHZ IU 00");
        cache.put(&key, off_grid_fast());
        cache.put(&key, wave(0.0, vec![1; 10]));
        cache
    });
    let key = ChannelKey::from("test/ANMO BHZ IU 00");

    assert_coverage(&cache.coverage(&key), &[(0.0, 5.0), (4.3, 6.3), (6.0, 10.0)]);
    let got = cache.get_wave(&key, 4.3, 6.0).unwrap();
    assert_eq!(got.sample_rate, 2.0);
    assert_eq!(got.samples, vec![7; 4]);
    assert_eq!(cache.segment_count(&key), 3);
}
