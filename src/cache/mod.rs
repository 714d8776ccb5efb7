mod entry;
pub mod policy;
pub mod time_series;

pub use policy::{CacheConfig, OverlapPolicy};
pub use time_series::{CacheStats, TimeSeriesCache};
