use super::registry::SourceKind;
use super::{DataSource, SourceResult};
use crate::cache::{CacheConfig, TimeSeriesCache};
use crate::core::{ChannelKey, Scnl, Wave};
use crate::error::{WaveError, WaveResult};
use crate::seedlink::miniseed;
use async_trait::async_trait;
use memmap2::Mmap;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct FileSourceParams {
    #[serde(default = "default_name")]
    name: String,
    paths: Vec<PathBuf>,
}

fn default_name() -> String {
    "local".to_string()
}

/// Waveforms decoded from miniSEED files at construction.
///
/// Records are merged per channel in an unbounded private store, so
/// overlapping or out-of-order files resolve the same way the cache does.
pub struct FileSource {
    namespace: String,
    store: TimeSeriesCache,
    channels: BTreeSet<Scnl>,
    files: Vec<PathBuf>,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(name: &str, paths: &[P]) -> WaveResult<Self> {
        if paths.is_empty() {
            return Err(WaveError::config("File source needs at least one path"));
        }

        let store = TimeSeriesCache::new(CacheConfig {
            max_bytes_per_channel: usize::MAX,
            ..Default::default()
        })?;
        let mut source = Self {
            namespace: format!("file:{}", name),
            store,
            channels: BTreeSet::new(),
            files: Vec::new(),
        };

        for path in paths {
            let path = path.as_ref();
            let loaded = source.load(path)?;
            log::info!("Loaded {} record(s) from {}", loaded, path.display());
            source.files.push(path.to_path_buf());
        }
        Ok(source)
    }

    pub fn from_config(params: &Value) -> WaveResult<Arc<dyn DataSource>> {
        let params: FileSourceParams = serde_json::from_value(params.clone())
            .map_err(|e| WaveError::config(format!("Invalid file source config: {}", e)))?;
        Ok(Arc::new(Self::open(&params.name, &params.paths)?))
    }

    fn load(&mut self, path: &Path) -> WaveResult<usize> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(0);
        }
        // The file is only read while the map is alive
        let map = unsafe { Mmap::map(&file)? };

        let records = miniseed::decode_all(&map);
        let mut loaded = 0;
        for record in &records {
            let wave = match record.to_wave() {
                Ok(Some(wave)) => wave,
                Ok(None) => continue,
                Err(e) => {
                    log::debug!("Skipping record in {}: {}", path.display(), e);
                    continue;
                }
            };
            let scnl = record.header.scnl();
            self.store.put(&ChannelKey::new(&self.namespace, &scnl), wave);
            self.channels.insert(scnl);
            loaded += 1;
        }
        Ok(loaded)
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Spans available for a channel
    pub fn coverage(&self, channel: &Scnl) -> Vec<(f64, f64)> {
        self.store.coverage(&self.channel_key(channel))
    }
}

#[async_trait]
impl DataSource for FileSource {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn fetch_range(&self, channel: &Scnl, t1: f64, t2: f64) -> SourceResult<Option<Wave>> {
        Ok(self.store.get_wave(&self.channel_key(channel), t1, t2))
    }

    async fn list_channels(&self) -> SourceResult<Vec<Scnl>> {
        Ok(self.channels.iter().cloned().collect())
    }
}

inventory::submit! {
    SourceKind {
        name: "file",
        description: "miniSEED files read through a memory map",
        factory: FileSource::from_config,
    }
}
