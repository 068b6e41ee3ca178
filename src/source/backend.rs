use crate::config::{BackendKind, CaptureConfig};
use crate::error::{CaptureError, FlowcastError, Result};
use crate::frame::FrameData;
use std::sync::Arc;

/// An open capture resource (decoder pipeline or device).
///
/// Dropping the handle releases the underlying resource, so ownership of the
/// box is the single source of truth for "is it open".
pub trait CaptureHandle: Send {
    /// Read the next frame; `Ok(None)` signals end of stream
    fn read(&mut self) -> std::result::Result<Option<FrameData>, CaptureError>;

    /// Position the stream so the next read returns `frame_index`
    fn seek(&mut self, frame_index: u64) -> std::result::Result<(), CaptureError>;

    /// Index of the frame the next read will return
    fn position(&self) -> u64;

    /// Total frames for finite streams, `None` for live devices
    fn frame_count(&self) -> Option<u64>;

    /// Native frame size reported by the resource
    fn resolution(&self) -> (u32, u32);
}

/// Opens capture handles for files and devices
pub trait CaptureBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn open_file(&self, path: &str) -> std::result::Result<Box<dyn CaptureHandle>, CaptureError>;

    fn open_device(
        &self,
        index: u32,
        resolution: (u32, u32),
        fps: u32,
    ) -> std::result::Result<Box<dyn CaptureHandle>, CaptureError>;
}

/// Build the backend selected in the configuration
pub fn backend_from_config(config: &CaptureConfig) -> Result<Arc<dyn CaptureBackend>> {
    match config.backend {
        BackendKind::TestPattern => Ok(Arc::new(super::TestPatternBackend::new(
            config.test_pattern_frames,
            config.test_pattern_resolution,
        ))),
        #[cfg(all(feature = "gstreamer", target_os = "linux"))]
        BackendKind::Gstreamer => Ok(Arc::new(super::gst::GstBackend::new()?)),
        #[cfg(not(all(feature = "gstreamer", target_os = "linux")))]
        BackendKind::Gstreamer => Err(FlowcastError::Config(config::ConfigError::Message(
            "The gstreamer capture backend requires the 'gstreamer' feature on Linux".to_string(),
        ))),
    }
}
