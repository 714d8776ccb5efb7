use crate::core::{ChannelKey, Scnl, Wave};
use crate::error::WaveResult;
use async_trait::async_trait;

pub type SourceResult<T> = WaveResult<T>;

/// Request/response access to archived waveforms
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Prefix of every channel key this source produces
    fn namespace(&self) -> &str;

    /// Samples for `[t1, t2)`, or `None` if the source has nothing there
    async fn fetch_range(&self, channel: &Scnl, t1: f64, t2: f64) -> SourceResult<Option<Wave>>;

    async fn list_channels(&self) -> SourceResult<Vec<Scnl>>;

    fn channel_key(&self, channel: &Scnl) -> ChannelKey {
        ChannelKey::new(self.namespace(), channel)
    }
}
