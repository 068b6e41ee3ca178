mod frame_emitter;
mod sink;
mod stats;
mod stream;


pub use frame_emitter::{EmitterHandle, FrameEmitter};
pub use sink::{BroadcastSink, DeliveredFrame, FrameProvider, FrameSink, LoggingSink};
pub use stats::EmitterStats;
pub use stream::{frame_stream, mjpeg_part, mjpeg_stream, MJPEG_BOUNDARY};
