pub mod collector;
pub mod metrics;
pub mod monitor;

pub use collector::{FetchSnapshot, MetricsCollector, StreamSnapshot};
pub use metrics::{FetchMetrics, StreamMetrics};
pub use monitor::MetricsReport;
