use crate::core::Scnl;
use crate::error::WaveResult;
use std::fs;
use std::path::Path;

/// Plain-text channel list, one `STA CHA NET LOC` per line.
///
/// Blank lines and lines starting with `#` are ignored.
pub struct ChannelListFile;

impl ChannelListFile {
    pub fn parse(text: &str) -> WaveResult<Vec<Scnl>> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(Scnl::parse)
            .collect()
    }

    pub fn render(channels: &[Scnl]) -> String {
        channels.iter().map(|c| format!("{}\n", c)).collect()
    }

    pub fn read(path: impl AsRef<Path>) -> WaveResult<Vec<Scnl>> {
        Self::parse(&fs::read_to_string(path)?)
    }

    pub fn write(path: impl AsRef<Path>, channels: &[Scnl]) -> WaveResult<()> {
        fs::write(path, Self::render(channels))?;
        Ok(())
    }
}
