pub mod config;
pub mod control;
pub mod controller;
pub mod emitter;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod quality;
pub mod source;

pub use config::FlowcastConfig;
pub use control::{dispatch, handle_line, ControlRequest, ControlResponse};
pub use controller::{ComponentState, ControlMode, MetricsReport, SourceFeed, StreamController, StreamInfo};
pub use emitter::{BroadcastSink, EmitterStats, FrameEmitter, FrameProvider, FrameSink, LoggingSink};
pub use error::{FlowcastError, Result};
pub use frame::{EncodedFrame, FrameData, FrameFormat};
pub use metrics::{MetricsAggregator, NetworkSample, SmoothedMetrics, TelemetryReport};
pub use quality::{QualityDecisionEngine, QualityLevel, QualityThreshold};
pub use source::{CaptureBackend, Reconfigure, SourceInfo, SourceKind, StreamSource};
