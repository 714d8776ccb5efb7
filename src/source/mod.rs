//! Request/response waveform sources

pub mod channel_list;
pub mod fdsn;
pub mod file;
pub mod registry;
pub mod seedlink;
pub mod simulated;
pub mod traits;

pub use channel_list::ChannelListFile;
pub use fdsn::{FdsnConfig, FdsnSource};
pub use file::FileSource;
pub use registry::{SourceFactory, SourceKind, SourceRegistry};
pub use seedlink::SeedLinkSource;
pub use simulated::{SimulatedConfig, SimulatedSource};
pub use traits::{DataSource, SourceResult};

use crate::cache::{CacheConfig, TimeSeriesCache};
use crate::core::{ChannelKey, Scnl, Wave};
use crate::error::WaveResult;
use crate::seedlink::DecodedRecord;

/// Merge the records of one channel and clip them to `[t1, t2)`
pub(crate) fn assemble_records(
    records: &[DecodedRecord],
    channel: &Scnl,
    t1: f64,
    t2: f64,
) -> WaveResult<Option<Wave>> {
    let scratch = TimeSeriesCache::new(CacheConfig {
        max_bytes_per_channel: usize::MAX,
        ..Default::default()
    })?;
    let key = ChannelKey::from_raw("scratch");

    for record in records.iter().filter(|r| r.header.scnl() == *channel) {
        match record.to_wave() {
            Ok(Some(wave)) => scratch.put(&key, wave),
            Ok(None) => {}
            Err(e) => log::debug!("Skipping record {}: {}", record.header.sequence, e),
        }
    }
    Ok(scratch.get_wave(&key, t1, t2))
}
