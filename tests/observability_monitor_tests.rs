use quakewave::observability::{MetricsCollector, MetricsReport, StreamMetrics};
use std::sync::Arc;

#[test]
fn test_monitor_report() {
    let mut collector = MetricsCollector::new();

    let gulp = collector.fetch_metrics("fdsn:service.iris.edu/ANMO BHZ IU 00");
    gulp.record_chunk(true);
    gulp.record_chunk(true);
    gulp.record_chunk(false);
    gulp.record_samples(3600);

    let stream = Arc::new(StreamMetrics::new("seedlink:localhost:18000"));
    stream.record_packet(412);
    stream.record_packet(400);
    stream.record_decode_error();
    stream.record_reconnect();
    collector.register_stream(stream);

    let report = MetricsReport::new(collector).generate_report();

    assert!(report.contains("fdsn:service.iris.edu/ANMO BHZ IU 00"));
    assert!(report.contains("Chunks: 2 ok, 1 failed"));
    assert!(report.contains("Samples: 3600"));
    assert!(report.contains("seedlink:localhost:18000"));
    assert!(report.contains("Packets: 2 (1 dropped)"));
    assert!(report.contains("Reconnects: 1"));
}

#[test]
fn test_empty_report() {
    let report = MetricsReport::new(MetricsCollector::new());
    assert_eq!(report.generate_report(), "No activity recorded");
}

#[test]
fn test_fetch_sections_sorted_by_key() {
    let mut collector = MetricsCollector::new();
    collector.fetch_metrics("sim:b/B").record_chunk(true);
    collector.fetch_metrics("sim:a/A").record_chunk(true);

    let report = MetricsReport::new(collector).generate_report();
    let a = report.find("[sim:a/A]").unwrap();
    let b = report.find("[sim:b/B]").unwrap();
    assert!(a < b);
}
