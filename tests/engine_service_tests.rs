use crossbeam_channel::Receiver;
use quakewave::cache::{CacheConfig, TimeSeriesCache};
use quakewave::core::Scnl;
use quakewave::engine::{GulperConfig, GulperEvent, GulperListener, GulperRegistry, WaveService};
use quakewave::source::{DataSource, SimulatedConfig, SimulatedSource};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn setup(config: SimulatedConfig) -> (WaveService, Arc<SimulatedSource>) {
    let source = Arc::new(SimulatedSource::new(config).unwrap());
    let cache = Arc::new(
        TimeSeriesCache::new(CacheConfig {
            helicorder_bucket_seconds: 10.0,
            ..Default::default()
        })
        .unwrap(),
    );
    let service = WaveService::new(
        source.clone(),
        cache,
        Arc::new(GulperRegistry::new()),
        GulperConfig {
            chunk_seconds: 30.0,
            delay_ms: 0,
        },
    )
    .unwrap();
    (service, source)
}

fn channel() -> Scnl {
    Scnl::parse("SIM BHZ XX 00").unwrap()
}

async fn wait_stopped(rx: &Receiver<GulperEvent>) -> Vec<GulperEvent> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut events = Vec::new();
    loop {
        while let Ok(event) = rx.try_recv() {
            let stopped = matches!(event, GulperEvent::Stopped { .. });
            events.push(event);
            if stopped {
                return events;
            }
        }
        assert!(Instant::now() < deadline, "timed out waiting for Stopped");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_get_wave_backfills_through_gulper() {
    let (service, source) = setup(SimulatedConfig::default());
    let (listener, rx) = GulperListener::channel();

    let first = service.get_wave(&channel(), 0.0, 100.0, Some(&listener)).unwrap();
    assert!(first.is_none());
    assert!(service.registry().is_active(&service.channel_key(&channel())));

    let events = wait_stopped(&rx).await;
    let gulps = events
        .iter()
        .filter(|e| matches!(e, GulperEvent::Gulped { success: true, .. }))
        .count();
    assert_eq!(gulps, 4);
    assert_eq!(source.fetch_count(), 4);

    let wave = service.get_wave(&channel(), 0.0, 100.0, None).unwrap().unwrap();
    assert_eq!(wave.len(), 2000);
    assert_eq!(wave.start_time, 0.0);
    assert!(!wave.has_gaps());
    assert_eq!(service.cache().segment_count(&service.channel_key(&channel())), 1);
}

#[tokio::test]
async fn test_covered_range_starts_no_gulper() {
    let (service, source) = setup(SimulatedConfig::default());
    service.fetch_now(&channel(), 0.0, 60.0).await.unwrap();
    assert_eq!(source.fetch_count(), 1);

    let (listener, _rx) = GulperListener::channel();
    let wave = service.get_wave(&channel(), 10.0, 50.0, Some(&listener)).unwrap().unwrap();
    assert_eq!(wave.len(), 800);
    assert!(!service.registry().is_active(&service.channel_key(&channel())));
    assert_eq!(source.fetch_count(), 1);
}

#[tokio::test]
async fn test_gulper_only_fetches_missing_span() {
    let (service, source) = setup(SimulatedConfig::default());
    service.fetch_now(&channel(), 0.0, 30.0).await.unwrap();

    let (listener, rx) = GulperListener::channel();
    service.get_wave(&channel(), 0.0, 90.0, Some(&listener)).unwrap();
    let events = wait_stopped(&rx).await;

    let spans: Vec<(f64, f64)> = events
        .iter()
        .filter_map(|e| match e {
            GulperEvent::Gulped { start, end, .. } => Some((*start, *end)),
            _ => None,
        })
        .collect();
    assert_eq!(spans, vec![(30.0, 60.0), (60.0, 90.0)]);
    assert_eq!(source.fetch_count(), 3);
}

#[tokio::test]
async fn test_helicorder_rows_after_backfill() {
    let (service, _source) = setup(SimulatedConfig {
        amplitude: 500.0,
        ..Default::default()
    });
    let (listener, rx) = GulperListener::channel();

    assert!(service
        .get_helicorder(&channel(), 0.0, 60.0, Some(&listener))
        .unwrap()
        .is_none());
    wait_stopped(&rx).await;

    let rows = service.get_helicorder(&channel(), 0.0, 60.0, None).unwrap().unwrap();
    assert_eq!(rows.len(), 6);
    for row in &rows {
        assert_eq!(row.duration, 10.0);
        assert_eq!(row.max, Some(500));
        assert_eq!(row.min, Some(-500));
    }
}

#[tokio::test]
async fn test_release_kills_slow_gulper() {
    let (service, _source) = setup(SimulatedConfig {
        latency_ms: 20,
        ..Default::default()
    });
    let (listener, rx) = GulperListener::channel();

    service.get_wave(&channel(), 0.0, 3600.0, Some(&listener)).unwrap();
    assert!(service.release(&channel(), listener.id()));

    let events = wait_stopped(&rx).await;
    assert!(matches!(
        events.last(),
        Some(GulperEvent::Stopped { killed: true, .. })
    ));
    assert!(!service.release(&channel(), listener.id()));
}

#[tokio::test]
async fn test_failed_fetch_surfaces_from_fetch_now() {
    let (service, _source) = setup(SimulatedConfig {
        fail_every: 1,
        ..Default::default()
    });
    let err = service.fetch_now(&channel(), 0.0, 10.0).await.unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_unknown_channel_yields_nothing() {
    let (service, _source) = setup(SimulatedConfig::default());
    let other = Scnl::parse("NOPE BHZ XX").unwrap();
    assert!(service.fetch_now(&other, 0.0, 10.0).await.unwrap().is_none());

    let channels = service.list_channels().await.unwrap();
    assert_eq!(channels, vec![channel()]);
    assert_eq!(service.source().namespace(), "sim:sim");
}
