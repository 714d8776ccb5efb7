use super::registry::SourceKind;
use super::{DataSource, SourceResult};
use crate::core::{Scnl, Wave};
use crate::error::{WaveError, WaveResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    pub name: String,

    /// `STA CHA NET [LOC]` entries
    pub channels: Vec<String>,

    pub sample_rate: f64,
    pub frequency: f64,
    pub amplitude: f64,

    /// Artificial delay per fetch
    pub latency_ms: u64,

    /// Archive extent; nothing is returned outside it
    pub available_from: Option<f64>,
    pub available_to: Option<f64>,

    /// Every Nth fetch fails with a transport error; 0 disables
    pub fail_every: u64,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            name: "sim".to_string(),
            channels: vec!["SIM BHZ XX 00".to_string()],
            sample_rate: 20.0,
            frequency: 0.5,
            amplitude: 1000.0,
            latency_ms: 0,
            available_from: None,
            available_to: None,
            fail_every: 0,
        }
    }
}

/// Deterministic sine-wave archive.
///
/// Sample `k` of a channel is always the same value, so repeated or
/// overlapping fetches agree exactly.
pub struct SimulatedSource {
    namespace: String,
    config: SimulatedConfig,
    channels: Vec<Scnl>,
    fetches: AtomicU64,
}

impl SimulatedSource {
    pub fn new(config: SimulatedConfig) -> WaveResult<Self> {
        if !config.sample_rate.is_finite() || config.sample_rate <= 0.0 {
            return Err(WaveError::config(format!(
                "Simulated sample rate must be positive, got {}",
                config.sample_rate
            )));
        }
        let channels = config
            .channels
            .iter()
            .map(|c| Scnl::parse(c))
            .collect::<WaveResult<Vec<_>>>()?;

        Ok(Self {
            namespace: format!("sim:{}", config.name),
            config,
            channels,
            fetches: AtomicU64::new(0),
        })
    }

    pub fn from_config(params: &Value) -> WaveResult<Arc<dyn DataSource>> {
        let config: SimulatedConfig = serde_json::from_value(params.clone())
            .map_err(|e| WaveError::config(format!("Invalid simulated source config: {}", e)))?;
        Ok(Arc::new(Self::new(config)?))
    }

    /// Number of `fetch_range` calls so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    fn sample(&self, channel_index: usize, k: i64) -> i32 {
        let t = k as f64 / self.config.sample_rate;
        let phase = channel_index as f64 * 0.7;
        (self.config.amplitude * (2.0 * PI * self.config.frequency * t + phase).sin()).round() as i32
    }

    fn generate(&self, channel_index: usize, t1: f64, t2: f64) -> Option<Wave> {
        let t1 = self.config.available_from.map_or(t1, |from| t1.max(from));
        let t2 = self.config.available_to.map_or(t2, |to| t2.min(to));
        let rate = self.config.sample_rate;

        let first = (t1 * rate - 1e-6).ceil() as i64;
        let last = (t2 * rate - 1e-6).ceil() as i64;
        if last <= first {
            return None;
        }

        let samples = (first..last).map(|k| self.sample(channel_index, k)).collect();
        Wave::new(rate, first as f64 / rate, samples).ok()
    }
}

#[async_trait]
impl DataSource for SimulatedSource {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn fetch_range(&self, channel: &Scnl, t1: f64, t2: f64) -> SourceResult<Option<Wave>> {
        let n = self.fetches.fetch_add(1, Ordering::Relaxed) + 1;
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
        if self.config.fail_every > 0 && n % self.config.fail_every == 0 {
            return Err(WaveError::transport(format!("Simulated failure on fetch {}", n)));
        }

        Ok(self
            .channels
            .iter()
            .position(|c| c == channel)
            .and_then(|index| self.generate(index, t1, t2)))
    }

    async fn list_channels(&self) -> SourceResult<Vec<Scnl>> {
        Ok(self.channels.clone())
    }
}

inventory::submit! {
    SourceKind {
        name: "simulated",
        description: "Deterministic synthetic sine waves",
        factory: SimulatedSource::from_config,
    }
}
