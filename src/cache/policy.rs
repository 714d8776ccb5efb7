use crate::error::{WaveError, WaveResult};
use serde::{Deserialize, Serialize};

/// Which samples survive when two buffers cover the same time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// The buffer inserted last wins (streaming re-deliveries are authoritative)
    #[default]
    PreferNewer,
    /// Samples already in the cache are kept
    PreferExisting,
}

/// Cache sizing and downsampling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Upper bound on raw sample bytes held per channel
    pub max_bytes_per_channel: usize,

    /// Width of one helicorder bucket in seconds
    pub helicorder_bucket_seconds: f64,

    pub overlap_policy: OverlapPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes_per_channel: 64 * 1024 * 1024,
            helicorder_bucket_seconds: 10.0,
            overlap_policy: OverlapPolicy::PreferNewer,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> WaveResult<()> {
        if self.max_bytes_per_channel == 0 {
            return Err(WaveError::config("max_bytes_per_channel must be non-zero"));
        }
        if !self.helicorder_bucket_seconds.is_finite() || self.helicorder_bucket_seconds <= 0.0 {
            return Err(WaveError::config(format!(
                "helicorder_bucket_seconds must be positive, got {}",
                self.helicorder_bucket_seconds
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_json_names() {
        let json = serde_json::to_string(&OverlapPolicy::PreferExisting).unwrap();
        assert_eq!(json, "\"prefer_existing\"");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: CacheConfig =
            serde_json::from_value(serde_json::json!({"helicorder_bucket_seconds": 30.0})).unwrap();
        assert_eq!(config.helicorder_bucket_seconds, 30.0);
        assert_eq!(config.overlap_policy, OverlapPolicy::PreferNewer);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_bucket() {
        let config = CacheConfig {
            helicorder_bucket_seconds: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
