use super::backend::{CaptureBackend, CaptureHandle};
use super::encode_frame;
use super::pacing::FramePacer;
use super::stream_source::{Reconfigure, SourceInfo, SourceKind};
use crate::config::DeviceConfig;
use crate::error::{CaptureError, Result};
use crate::frame::EncodedFrame;
use crate::quality::{QualityLevel, QualityTable, ThresholdTable};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

struct DeviceState {
    handle: Option<Box<dyn CaptureHandle>>,
    quality: QualityLevel,
    resolution: (u32, u32),
    pacer: FramePacer,
    sequence: u64,
}

/// Live capture device. A resolution change always reopens the device.
pub struct DeviceSource {
    config: DeviceConfig,
    thresholds: ThresholdTable,
    jpeg_quality: QualityTable<u8>,
    backend: Arc<dyn CaptureBackend>,
    state: Mutex<DeviceState>,
}

impl DeviceSource {
    /// Open the device at the resolution of `level`; failure here is fatal
    pub fn open(
        config: DeviceConfig,
        thresholds: ThresholdTable,
        jpeg_quality: QualityTable<u8>,
        backend: Arc<dyn CaptureBackend>,
        level: QualityLevel,
    ) -> Result<Self> {
        let resolution = thresholds.get(level).resolution;
        let handle = backend.open_device(config.index, resolution, config.fps)?;

        info!(
            "Opened capture device {} via {} at {}x{} @ {}fps",
            config.index,
            backend.name(),
            resolution.0,
            resolution.1,
            config.fps
        );

        let state = DeviceState {
            handle: Some(handle),
            quality: level,
            resolution,
            pacer: FramePacer::new(config.fps),
            sequence: 0,
        };

        Ok(Self {
            config,
            thresholds,
            jpeg_quality,
            backend,
            state: Mutex::new(state),
        })
    }

    fn open_handle(
        &self,
        resolution: (u32, u32),
    ) -> std::result::Result<Box<dyn CaptureHandle>, CaptureError> {
        self.backend
            .open_device(self.config.index, resolution, self.config.fps)
    }

    pub fn set_quality(&self, level: QualityLevel) -> Reconfigure {
        let mut state = self.state.lock();
        let open = state.handle.is_some();
        if open && level == state.quality {
            return Reconfigure::Unchanged;
        }

        let resolution = self.thresholds.get(level).resolution;
        if open && resolution == state.resolution {
            debug!(
                "Device {} already at {}x{}, skipping reopen",
                self.config.index, resolution.0, resolution.1
            );
            state.quality = level;
            return Reconfigure::Relabelled;
        }

        let previous = state.resolution;

        // The device must be closed before it can be opened again
        state.handle = None;

        match self.open_handle(resolution) {
            Ok(handle) => {
                info!(
                    "Device {} quality {} -> {} ({}x{})",
                    self.config.index, state.quality, level, resolution.0, resolution.1
                );
                state.handle = Some(handle);
                state.quality = level;
                state.resolution = resolution;
                state.pacer.reset();
                Reconfigure::Reopened
            }
            Err(e) => {
                warn!(
                    "Failed to reopen device {} at {}x{}: {}",
                    self.config.index, resolution.0, resolution.1, e
                );
                match self.open_handle(previous) {
                    Ok(handle) => {
                        warn!(
                            "Device {} restored at {}x{}",
                            self.config.index, previous.0, previous.1
                        );
                        state.handle = Some(handle);
                        Reconfigure::Retained
                    }
                    Err(e) => {
                        warn!(
                            "Failed to restore device {}: {}; no frames available",
                            self.config.index, e
                        );
                        Reconfigure::Unavailable
                    }
                }
            }
        }
    }

    pub fn read_frame(&self) -> Option<EncodedFrame> {
        let mut state = self.state.lock();
        let now = Instant::now();
        if !state.pacer.is_due(now) {
            return None;
        }

        let handle = state.handle.as_mut()?;
        let frame = match handle.read() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("Device {} returned no frame", self.config.index);
                return None;
            }
            Err(e) => {
                warn!("Failed to read from device {}: {}", self.config.index, e);
                return None;
            }
        };
        state.pacer.mark(now);

        trace!("Captured frame {} from device {}", frame.index, self.config.index);
        state.sequence += 1;
        encode_frame(
            &frame,
            state.sequence,
            SourceKind::Device,
            state.quality,
            state.resolution,
            *self.jpeg_quality.get(state.quality),
        )
    }

    /// Close the device; returns whether it was open
    pub fn release(&self) -> bool {
        let mut state = self.state.lock();
        match state.handle.take() {
            Some(handle) => {
                drop(handle);
                info!("Released capture device {}", self.config.index);
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().handle.is_some()
    }

    pub fn info(&self) -> SourceInfo {
        let state = self.state.lock();
        SourceInfo::Device {
            device_id: self.config.index,
            width: state.resolution.0,
            height: state.resolution.1,
            quality: state.quality,
            available: state.handle.is_some(),
        }
    }
}
