use anyhow::{Context, Result};
use quakewave::cache::TimeSeriesCache;
use quakewave::config::QuakewaveConfig;
use quakewave::engine::{GulperEvent, GulperListener, GulperRegistry, WaveService};
use quakewave::observability::{MetricsCollector, MetricsReport};
use quakewave::seedlink::SeedLinkClient;
use quakewave::source::FdsnSource;
use std::sync::Arc;
use std::time::Duration;

const STATS_INTERVAL: Duration = Duration::from_secs(30);
const BACKFILL_SECONDS: f64 = 3600.0;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => QuakewaveConfig::from_file(&path)?,
        None => {
            log::info!("No configuration file given, using defaults");
            QuakewaveConfig::default()
        }
    };
    let channels = config.channel_list()?;
    if channels.is_empty() {
        log::warn!("No channels configured; the session will idle until channels are added");
    }

    let cache = Arc::new(TimeSeriesCache::new(config.cache.clone())?);
    let mut collector = MetricsCollector::new();

    let mut client = SeedLinkClient::new(config.seedlink.clone(), cache.clone())
        .context("Failed to create SeedLink client")?;
    for channel in &channels {
        client.add_channel(channel);
    }
    collector.register_stream(client.metrics());
    client.start()?;

    // Backfill the last hour through FDSN while the live stream fills the present
    let registry = Arc::new(GulperRegistry::new());
    let (listener, events) = GulperListener::channel();
    let _service = match &config.fdsn {
        Some(fdsn) => {
            let source = Arc::new(FdsnSource::new(fdsn.clone())?);
            let service = WaveService::new(source, cache.clone(), registry.clone(), config.gulper.clone())?;
            let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
            for channel in &channels {
                service.get_wave(channel, now - BACKFILL_SECONDS, now, Some(&listener))?;
            }
            std::thread::spawn(move || {
                for event in events {
                    match event {
                        GulperEvent::Gulped { key, start, end, success: false } => {
                            log::warn!("Backfill of {} [{:.0}, {:.0}) failed", key, start, end)
                        }
                        GulperEvent::Stopped { key, killed } => {
                            log::info!("Backfill of {} finished (killed={})", key, killed)
                        }
                        _ => {}
                    }
                }
            });
            Some(service)
        }
        None => None,
    };

    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down");
                break;
            }
            _ = ticker.tick() => {
                let stats = cache.stats();
                log::info!(
                    "Cache: {} channel(s), {} segment(s), {} bytes, {} helicorder row(s); session {}",
                    stats.channels,
                    stats.segments,
                    stats.bytes,
                    stats.helicorder_rows,
                    client.state().name()
                );
                let mut report = collector.clone();
                report.merge(&registry.metrics());
                log::info!("\n{}", MetricsReport::new(report).generate_report());
            }
        }
    }

    client.stop().await?;
    Ok(())
}
