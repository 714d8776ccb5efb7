use super::gulper::{GulpFetcher, GulperConfig};
use super::listener::{GulperListener, ListenerId};
use super::registry::GulperRegistry;
use crate::cache::TimeSeriesCache;
use crate::core::{ChannelKey, HelicorderRow, Scnl, Wave};
use crate::error::WaveResult;
use crate::source::DataSource;
use async_trait::async_trait;
use std::sync::Arc;

/// Fetches one channel's chunks from a `DataSource` into the cache
pub struct SourceFetcher {
    source: Arc<dyn DataSource>,
    cache: Arc<TimeSeriesCache>,
    channel: Scnl,
    key: ChannelKey,
}

impl SourceFetcher {
    pub fn new(source: Arc<dyn DataSource>, cache: Arc<TimeSeriesCache>, channel: Scnl) -> Self {
        let key = source.channel_key(&channel);
        Self {
            source,
            cache,
            channel,
            key,
        }
    }

    pub fn key(&self) -> &ChannelKey {
        &self.key
    }
}

#[async_trait]
impl GulpFetcher for SourceFetcher {
    async fn fetch_chunk(&self, t1: f64, t2: f64) -> WaveResult<usize> {
        match self.source.fetch_range(&self.channel, t1, t2).await? {
            Some(wave) => {
                let samples = wave.len();
                self.cache.put(&self.key, wave);
                Ok(samples)
            }
            None => Ok(0),
        }
    }
}

/// Query front end: answers from the cache and backfills gaps through gulpers
pub struct WaveService {
    source: Arc<dyn DataSource>,
    cache: Arc<TimeSeriesCache>,
    registry: Arc<GulperRegistry>,
    gulper_config: GulperConfig,
}

impl WaveService {
    pub fn new(
        source: Arc<dyn DataSource>,
        cache: Arc<TimeSeriesCache>,
        registry: Arc<GulperRegistry>,
        gulper_config: GulperConfig,
    ) -> WaveResult<Self> {
        gulper_config.validate()?;
        Ok(Self {
            source,
            cache,
            registry,
            gulper_config,
        })
    }

    pub fn source(&self) -> &Arc<dyn DataSource> {
        &self.source
    }

    pub fn cache(&self) -> &Arc<TimeSeriesCache> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<GulperRegistry> {
        &self.registry
    }

    pub fn channel_key(&self, channel: &Scnl) -> ChannelKey {
        self.source.channel_key(channel)
    }

    /// Cached samples for `[t1, t2)`.
    ///
    /// With a listener, any uncovered portion is fetched in the background
    /// and the listener is told as chunks land; the call itself never waits.
    pub fn get_wave(
        &self,
        channel: &Scnl,
        t1: f64,
        t2: f64,
        listener: Option<&GulperListener>,
    ) -> WaveResult<Option<Wave>> {
        let key = self.channel_key(channel);
        if let Some(listener) = listener {
            self.request_missing(&key, channel, t1, t2, listener)?;
        }
        Ok(self.cache.get_wave(&key, t1, t2))
    }

    /// Helicorder rows for `[t1, t2)`, backfilling like `get_wave`
    pub fn get_helicorder(
        &self,
        channel: &Scnl,
        t1: f64,
        t2: f64,
        listener: Option<&GulperListener>,
    ) -> WaveResult<Option<Vec<HelicorderRow>>> {
        let key = self.channel_key(channel);
        if let Some(listener) = listener {
            self.request_missing(&key, channel, t1, t2, listener)?;
        }
        Ok(self.cache.get_helicorder(&key, t1, t2))
    }

    fn request_missing(
        &self,
        key: &ChannelKey,
        channel: &Scnl,
        t1: f64,
        t2: f64,
        listener: &GulperListener,
    ) -> WaveResult<()> {
        let missing = self.cache.missing_ranges(key, t1, t2);
        let (Some(first), Some(last)) = (missing.first(), missing.last()) else {
            return Ok(());
        };

        let fetcher = Arc::new(SourceFetcher::new(
            self.source.clone(),
            self.cache.clone(),
            channel.clone(),
        ));
        self.registry.request_gulper(
            key,
            listener.clone(),
            fetcher,
            first.0,
            last.1,
            &self.gulper_config,
        )
    }

    /// Detach a listener from the channel's gulper
    pub fn release(&self, channel: &Scnl, listener: ListenerId) -> bool {
        self.registry.kill_gulper(&self.channel_key(channel), listener)
    }

    /// Fetch `[t1, t2)` directly, cache it and return the cached view
    pub async fn fetch_now(&self, channel: &Scnl, t1: f64, t2: f64) -> WaveResult<Option<Wave>> {
        let fetcher = SourceFetcher::new(self.source.clone(), self.cache.clone(), channel.clone());
        fetcher.fetch_chunk(t1, t2).await?;
        Ok(self.cache.get_wave(fetcher.key(), t1, t2))
    }

    pub async fn list_channels(&self) -> WaveResult<Vec<Scnl>> {
        self.source.list_channels().await
    }
}
