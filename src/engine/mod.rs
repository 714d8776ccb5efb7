//! Chunked background fetching and the query facade

pub mod gulper;
pub mod idle;
pub mod listener;
pub mod registry;
pub mod service;

pub use gulper::{FnFetcher, GulpFetcher, Gulper, GulperConfig};
pub use idle::{GulpWatchdog, IdlePolicy, IdleTimeout, KeepAlive};
pub use listener::{GulperEvent, GulperListener, ListenerId};
pub use registry::GulperRegistry;
pub use service::{SourceFetcher, WaveService};
