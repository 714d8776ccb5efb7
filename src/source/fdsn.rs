use super::registry::SourceKind;
use super::{assemble_records, DataSource, SourceResult};
use crate::core::{Scnl, Wave, EMPTY_LOCATION};
use crate::error::{WaveError, WaveResult};
use crate::seedlink::miniseed;
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// FDSN web service endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FdsnConfig {
    pub base_url: String,
    pub timeout_ms: u64,

    /// Filters for channel listing; `None` means all
    pub network: Option<String>,
    pub station: Option<String>,
    pub channel: Option<String>,
}

impl Default for FdsnConfig {
    fn default() -> Self {
        Self {
            base_url: "https://service.iris.edu".to_string(),
            timeout_ms: 30_000,
            network: None,
            station: None,
            channel: None,
        }
    }
}

impl FdsnConfig {
    pub fn validate(&self) -> WaveResult<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(WaveError::config(format!(
                "FDSN base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.timeout_ms == 0 {
            return Err(WaveError::config("FDSN timeout_ms must be positive"));
        }
        Ok(())
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// Host part of the base URL, used as the key namespace
    fn host(&self) -> &str {
        let rest = self.base().split_once("://").map_or(self.base(), |(_, r)| r);
        rest.split('/').next().unwrap_or(rest)
    }
}

/// ISO 8601 time with microseconds, as FDSN services expect
pub fn format_fdsn_time(t: f64) -> WaveResult<String> {
    let secs = t.floor();
    let micros = ((t - secs) * 1e6).round().min(999_999.0) as u32;
    DateTime::from_timestamp(secs as i64, micros * 1000)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string())
        .ok_or_else(|| WaveError::config(format!("Time {} out of range", t)))
}

/// Channels from a `format=text` station response at channel level
pub fn parse_channel_text(text: &str) -> Vec<Scnl> {
    let mut channels: Vec<Scnl> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('|').collect();
            match fields.as_slice() {
                [net, sta, loc, cha, ..] => Some(Scnl::new(*sta, *cha, *net, *loc)),
                _ => {
                    log::debug!("Skipping station line '{}'", line);
                    None
                }
            }
        })
        .collect();
    channels.sort();
    channels.dedup();
    channels
}

/// Archive access through FDSN dataselect and station services
pub struct FdsnSource {
    namespace: String,
    config: FdsnConfig,
    client: reqwest::Client,
}

impl FdsnSource {
    pub fn new(config: FdsnConfig) -> WaveResult<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            namespace: format!("fdsn:{}", config.host()),
            config,
            client,
        })
    }

    pub fn from_config(params: &Value) -> WaveResult<Arc<dyn DataSource>> {
        let config: FdsnConfig = serde_json::from_value(params.clone())
            .map_err(|e| WaveError::config(format!("Invalid FDSN config: {}", e)))?;
        Ok(Arc::new(Self::new(config)?))
    }

    /// Dataselect query; a blank location goes out as `--`, never as `loc=`
    pub fn dataselect_url(&self, channel: &Scnl, t1: f64, t2: f64) -> WaveResult<String> {
        let location = match channel.location.trim() {
            "" => EMPTY_LOCATION,
            loc => loc,
        };
        Ok(format!(
            "{}/fdsnws/dataselect/1/query?net={}&sta={}&loc={}&cha={}&starttime={}&endtime={}",
            self.config.base(),
            channel.network,
            channel.station,
            location,
            channel.channel,
            format_fdsn_time(t1)?,
            format_fdsn_time(t2)?
        ))
    }

    pub fn station_url(&self) -> String {
        let mut url = format!(
            "{}/fdsnws/station/1/query?level=channel&format=text",
            self.config.base()
        );
        for (name, value) in [
            ("net", &self.config.network),
            ("sta", &self.config.station),
            ("cha", &self.config.channel),
        ] {
            if let Some(value) = value {
                url.push_str(&format!("&{}={}", name, value));
            }
        }
        url
    }
}

#[async_trait]
impl DataSource for FdsnSource {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn fetch_range(&self, channel: &Scnl, t1: f64, t2: f64) -> SourceResult<Option<Wave>> {
        let url = self.dataselect_url(channel, t1, t2)?;
        log::debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => {
                return Err(WaveError::transport(format!("dataselect returned HTTP {}", status)))
            }
            _ => {}
        }

        let body = response.bytes().await?;
        let records = miniseed::decode_all(&body);
        assemble_records(&records, channel, t1, t2)
    }

    async fn list_channels(&self) -> SourceResult<Vec<Scnl>> {
        let url = self.station_url();
        log::debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(Vec::new()),
            status if !status.is_success() => Err(WaveError::transport(format!(
                "station service returned HTTP {}",
                status
            ))),
            _ => Ok(parse_channel_text(&response.text().await?)),
        }
    }
}

inventory::submit! {
    SourceKind {
        name: "fdsn",
        description: "FDSN dataselect and station web services",
        factory: FdsnSource::from_config,
    }
}
