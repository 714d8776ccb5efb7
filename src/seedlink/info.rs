use crate::core::Scnl;
use crate::error::{WaveError, WaveResult};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Detail level of an `INFO` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoLevel {
    Id,
    Capabilities,
    Stations,
    Streams,
    Gaps,
    Connections,
    All,
}

impl InfoLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "ID",
            Self::Capabilities => "CAPABILITIES",
            Self::Stations => "STATIONS",
            Self::Streams => "STREAMS",
            Self::Gaps => "GAPS",
            Self::Connections => "CONNECTIONS",
            Self::All => "ALL",
        }
    }
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> WaveResult<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| WaveError::decode(format!("Bad INFO attribute: {}", e)))?;
        if attr.key.as_ref() == name {
            return Ok(Some(String::from_utf8_lossy(&attr.value).into_owned()));
        }
    }
    Ok(None)
}

/// Extract data streams from an `INFO STREAMS` document.
///
/// Streams whose type is not `D` (event, calibration, log) are skipped.
pub fn parse_stream_list(xml: &str) -> WaveResult<Vec<Scnl>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut streams = Vec::new();
    let mut station: Option<(String, String)> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| WaveError::decode(format!("Malformed INFO document: {}", e)))?;

        match event {
            Event::Start(e) | Event::Empty(e) => match e.name().as_ref() {
                b"station" => {
                    let name = attribute(&e, b"name")?.unwrap_or_default();
                    let network = attribute(&e, b"network")?.unwrap_or_default();
                    station = Some((name, network));
                }
                b"stream" => {
                    let Some((name, network)) = &station else {
                        continue;
                    };
                    if attribute(&e, b"type")?.is_some_and(|t| t != "D") {
                        continue;
                    }
                    let Some(channel) = attribute(&e, b"seedname")? else {
                        continue;
                    };
                    let location = attribute(&e, b"location")?.unwrap_or_default();
                    streams.push(Scnl::new(name.as_str(), channel, network.as_str(), location));
                }
                _ => {}
            },
            Event::End(e) if e.name().as_ref() == b"station" => station = None,
            Event::Eof => break,
            _ => {}
        }
    }

    streams.sort();
    streams.dedup();
    Ok(streams)
}
