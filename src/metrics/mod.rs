mod aggregator;
mod telemetry;

pub use aggregator::{MetricsAggregator, NetworkSample, SmoothedMetrics, DEFAULT_WINDOW_SIZE};
pub use telemetry::TelemetryReport;
