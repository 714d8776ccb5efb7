use crate::core::Scnl;
use crate::error::{WaveError, WaveResult};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Data-stream type suffix appended to every SELECT
const DATA_TYPE: &str = "D";

/// Channels currently subscribed, grouped by station.
///
/// Renders as `STA_NET:LOCCHA LOCCHA,STA_NET:LOCCHA`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorSet {
    // (station, network) -> channels
    stations: BTreeMap<(String, String), BTreeSet<Scnl>>,
}

impl SelectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the set changed
    pub fn add(&mut self, scnl: &Scnl) -> bool {
        self.stations
            .entry((scnl.station.clone(), scnl.network.clone()))
            .or_default()
            .insert(scnl.clone())
    }

    /// Returns true if the set changed
    pub fn remove(&mut self, scnl: &Scnl) -> bool {
        let station = (scnl.station.clone(), scnl.network.clone());
        let Some(channels) = self.stations.get_mut(&station) else {
            return false;
        };
        let removed = channels.remove(scnl);
        if channels.is_empty() {
            self.stations.remove(&station);
        }
        removed
    }

    pub fn contains(&self, scnl: &Scnl) -> bool {
        self.stations
            .get(&(scnl.station.clone(), scnl.network.clone()))
            .is_some_and(|c| c.contains(scnl))
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    pub fn channels(&self) -> Vec<Scnl> {
        self.stations.values().flatten().cloned().collect()
    }

    /// `(station, network, channels)` in a stable order
    pub fn stations(&self) -> impl Iterator<Item = (&str, &str, &BTreeSet<Scnl>)> {
        self.stations
            .iter()
            .map(|((sta, net), channels)| (sta.as_str(), net.as_str(), channels))
    }

    /// Argument of the SELECT command for one channel, e.g. `00BHZ.D`
    pub fn select_arg(scnl: &Scnl) -> String {
        format!("{}{}.{}", scnl.wire_location(), scnl.channel, DATA_TYPE)
    }

    /// Parse the string form produced by `Display`
    pub fn parse(s: &str) -> WaveResult<Self> {
        let mut set = Self::new();
        for station in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (id, selects) = station
                .split_once(':')
                .ok_or_else(|| WaveError::config(format!("Missing ':' in selector '{}'", station)))?;
            let (sta, net) = id
                .split_once('_')
                .ok_or_else(|| WaveError::config(format!("Missing '_' in station id '{}'", id)))?;

            for select in selects.split_whitespace() {
                let select = select.split('.').next().unwrap_or(select);
                if select.len() < 3 {
                    return Err(WaveError::config(format!("Invalid selector '{}'", select)));
                }
                let (loc, cha) = select.split_at(select.len() - 3);
                set.add(&Scnl::new(sta, cha, net, loc));
            }
        }
        Ok(set)
    }
}

impl fmt::Display for SelectorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (sta, net, channels) in self.stations() {
            if !first {
                write!(f, ",")?;
            }
            first = false;

            let selects: Vec<String> = channels
                .iter()
                .map(|c| format!("{}{}", c.wire_location(), c.channel))
                .collect();
            write!(f, "{}_{}:{}", sta, net, selects.join(" "))?;
        }
        Ok(())
    }
}
