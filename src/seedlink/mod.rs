//! SeedLink v3 streaming client and miniSEED decoding

pub mod client;
pub mod decoder;
pub mod info;
pub mod miniseed;
pub mod protocol;
pub mod selector;
pub mod state;
pub mod steim;

pub use client::{SeedLinkClient, SeedLinkConfig, SessionMode, WaveUpdate};
pub use decoder::PacketDecoder;
pub use info::{parse_stream_list, InfoLevel};
pub use miniseed::{DecodedRecord, Encoding, RecordBuilder, RecordHeader};
pub use selector::SelectorSet;
pub use state::SessionState;
