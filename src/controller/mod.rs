mod adaptive;
mod feed;
mod orchestrator;
mod shutdown;
mod state;
mod types;


pub use crate::source::SourceKind;
pub use feed::SourceFeed;
pub use orchestrator::StreamController;
pub use types::{ComponentState, ControlMode, MetricsReport, StreamInfo};
