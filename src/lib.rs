//! Seismic waveform acquisition: a SeedLink streaming client, chunked
//! background fetching from archive sources and a shared time-series cache
//! with helicorder summaries.

pub mod cache;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod observability;
pub mod resilience;
pub mod seedlink;
pub mod source;

pub use error::{WaveError, WaveResult};
