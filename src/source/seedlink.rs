use super::registry::SourceKind;
use super::{DataSource, SourceResult};
use crate::cache::{CacheConfig, TimeSeriesCache};
use crate::core::{Scnl, Wave};
use crate::error::{WaveError, WaveResult};
use crate::resilience::ReconnectStrategy;
use crate::seedlink::{SeedLinkClient, SeedLinkConfig};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct SeedLinkSourceParams {
    #[serde(flatten)]
    config: SeedLinkConfig,
    #[serde(default = "default_replay_timeout")]
    replay_timeout_ms: u64,
}

fn default_replay_timeout() -> u64 {
    60_000
}

/// Archive access through bounded SeedLink replays.
///
/// Keys share the live session's namespace, so replayed and streamed
/// samples for a channel land in the same cache entry.
pub struct SeedLinkSource {
    namespace: String,
    config: SeedLinkConfig,
    replay_timeout: Duration,
}

impl SeedLinkSource {
    pub fn new(config: SeedLinkConfig, replay_timeout: Duration) -> WaveResult<Self> {
        config.validate()?;
        Ok(Self {
            namespace: config.namespace(),
            config: SeedLinkConfig {
                begin: None,
                end: None,
                // A failed replay is reported to the caller instead of retried
                reconnect: ReconnectStrategy::Never,
                ..config
            },
            replay_timeout,
        })
    }

    pub fn from_config(params: &Value) -> WaveResult<Arc<dyn DataSource>> {
        let params: SeedLinkSourceParams = serde_json::from_value(params.clone())
            .map_err(|e| WaveError::config(format!("Invalid SeedLink source config: {}", e)))?;
        Ok(Arc::new(Self::new(
            params.config,
            Duration::from_millis(params.replay_timeout_ms),
        )?))
    }
}

#[async_trait]
impl DataSource for SeedLinkSource {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn fetch_range(&self, channel: &Scnl, t1: f64, t2: f64) -> SourceResult<Option<Wave>> {
        let store = Arc::new(TimeSeriesCache::new(CacheConfig {
            max_bytes_per_channel: usize::MAX,
            ..Default::default()
        })?);
        let mut client = SeedLinkClient::replay(self.config.clone(), store.clone(), t1, t2)?;
        client.add_channel(channel);
        client.start()?;

        match tokio::time::timeout(self.replay_timeout, client.wait()).await {
            Ok(result) => result?,
            Err(_) => {
                client.stop().await?;
                return Err(WaveError::transport(format!(
                    "Replay of {} [{}, {}) timed out",
                    channel, t1, t2
                )));
            }
        }

        Ok(store.get_wave(&client.channel_key(channel), t1, t2))
    }

    async fn list_channels(&self) -> SourceResult<Vec<Scnl>> {
        let store = Arc::new(TimeSeriesCache::new(CacheConfig::default())?);
        SeedLinkClient::new(self.config.clone(), store)?
            .list_streams()
            .await
    }
}

inventory::submit! {
    SourceKind {
        name: "seedlink",
        description: "Bounded SeedLink replays",
        factory: SeedLinkSource::from_config,
    }
}
