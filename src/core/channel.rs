use crate::error::{WaveError, WaveResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Location code used when a stream has none
pub const EMPTY_LOCATION: &str = "--";

/// Station, channel, network, location tuple identifying one instrument stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scnl {
    pub station: String,
    pub channel: String,
    pub network: String,
    pub location: String,
}

impl Scnl {
    pub fn new(
        station: impl Into<String>,
        channel: impl Into<String>,
        network: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        let location = location.into();
        let location = match location.trim() {
            "" => EMPTY_LOCATION.to_string(),
            loc => loc.to_string(),
        };

        Self {
            station: station.into().trim().to_string(),
            channel: channel.into().trim().to_string(),
            network: network.into().trim().to_string(),
            location,
        }
    }

    /// Parse the `STA CHA NET [LOC]` form produced by `Display`
    pub fn parse(s: &str) -> WaveResult<Self> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        match parts.as_slice() {
            [sta, cha, net] => Ok(Self::new(*sta, *cha, *net, "")),
            [sta, cha, net, loc] => Ok(Self::new(*sta, *cha, *net, *loc)),
            _ => Err(WaveError::config(format!("Invalid channel identifier: '{}'", s))),
        }
    }

    /// Location code as sent on the wire (blank instead of `--`)
    pub fn wire_location(&self) -> &str {
        if self.location == EMPTY_LOCATION {
            ""
        } else {
            &self.location
        }
    }
}

impl fmt::Display for Scnl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.station, self.channel, self.network, self.location
        )
    }
}

/// Opaque cache and registry key, namespaced by source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelKey(String);

impl ChannelKey {
    pub fn new(namespace: &str, scnl: &Scnl) -> Self {
        Self(format!("{}/{}", namespace, scnl))
    }

    /// Wrap an already-formed key
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn namespace(&self) -> Option<&str> {
        self.0.split_once('/').map(|(ns, _)| ns)
    }

    /// Recover the SCNL part of a namespaced key
    pub fn scnl(&self) -> Option<Scnl> {
        self.0
            .split_once('/')
            .and_then(|(_, rest)| Scnl::parse(rest).ok())
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
