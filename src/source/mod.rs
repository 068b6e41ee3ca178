mod backend;
mod device;
mod file;
mod pacing;
mod stream_source;
mod test_pattern;

#[cfg(all(feature = "gstreamer", target_os = "linux"))]
mod gst;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod tests;

pub use backend::{backend_from_config, CaptureBackend, CaptureHandle};
pub use device::DeviceSource;
pub use file::FileSource;
pub use pacing::FramePacer;
pub use stream_source::{Reconfigure, SourceInfo, SourceKind, StreamSource};
pub use test_pattern::TestPatternBackend;

#[cfg(all(feature = "gstreamer", target_os = "linux"))]
pub use gst::GstBackend;

use crate::frame::{EncodedFrame, FrameData, FrameProcessor};
use crate::quality::QualityLevel;
use bytes::Bytes;
use tracing::warn;

/// Resize and JPEG-encode a raw frame; failures are logged and yield `None`
fn encode_frame(
    frame: &FrameData,
    sequence: u64,
    source: SourceKind,
    quality: QualityLevel,
    resolution: (u32, u32),
    jpeg_quality: u8,
) -> Option<EncodedFrame> {
    match FrameProcessor::process(frame, resolution, jpeg_quality) {
        Ok(jpeg) => Some(EncodedFrame {
            sequence,
            frame_index: frame.index,
            timestamp: frame.timestamp,
            width: resolution.0,
            height: resolution.1,
            quality,
            source,
            data: Bytes::from(jpeg),
        }),
        Err(e) => {
            warn!("Dropping frame {}: {}", frame.index, e);
            None
        }
    }
}
