use super::backend::{CaptureBackend, CaptureHandle};
use super::pacing::FramePacer;
use super::stream_source::{Reconfigure, SourceInfo, SourceKind};
use super::encode_frame;
use crate::config::FileConfig;
use crate::error::{CaptureError, FlowcastError, Result};
use crate::frame::{EncodedFrame, FrameData};
use crate::quality::{QualityLevel, QualityTable, ThresholdTable};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

struct FileState {
    handle: Option<Box<dyn CaptureHandle>>,
    path: String,
    quality: QualityLevel,
    resolution: (u32, u32),
    total_frames: u64,
    current_frame_index: u64,
    is_playing: bool,
    playback_speed: f64,
    pacer: FramePacer,
    sequence: u64,
}

impl FileState {
    /// Read the next raw frame, looping back to frame 0 at end of stream
    fn next_raw(&mut self) -> std::result::Result<Option<FrameData>, CaptureError> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(None);
        };

        if let Some(frame) = handle.read()? {
            self.current_frame_index = handle.position();
            return Ok(Some(frame));
        }

        debug!("End of '{}' reached, looping back to frame 0", self.path);
        handle.seek(0)?;
        self.current_frame_index = 0;

        let frame = handle.read()?;
        self.current_frame_index = handle.position();
        Ok(frame)
    }
}

/// Plays a video file, one tier file per quality level.
///
/// Every mutating operation and every frame read takes the same lock, so a
/// reader never sees a frame produced by a half-swapped handle.
pub struct FileSource {
    config: FileConfig,
    thresholds: ThresholdTable,
    jpeg_quality: QualityTable<u8>,
    backend: Arc<dyn CaptureBackend>,
    state: Mutex<FileState>,
}

impl FileSource {
    /// Open the file for `level`; failure here is fatal
    pub fn open(
        config: FileConfig,
        thresholds: ThresholdTable,
        jpeg_quality: QualityTable<u8>,
        backend: Arc<dyn CaptureBackend>,
        level: QualityLevel,
    ) -> Result<Self> {
        let path = config.path_for(level);
        let handle = backend.open_file(&path)?;
        let total_frames = handle.frame_count().unwrap_or(0);

        info!(
            "Opened video file '{}' via {} ({} frames, quality {})",
            path,
            backend.name(),
            total_frames,
            level
        );

        let state = FileState {
            handle: Some(handle),
            path,
            quality: level,
            resolution: thresholds.get(level).resolution,
            total_frames,
            current_frame_index: 0,
            is_playing: true,
            playback_speed: 1.0,
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

    /// Switch to the tier file of `level`, keeping the playback position
    pub fn set_quality(&self, level: QualityLevel) -> Reconfigure {
        let mut state = self.state.lock();
        self.reconfigure(&mut state, level)
    }

    fn reconfigure(&self, state: &mut FileState, level: QualityLevel) -> Reconfigure {
        let open = state.handle.is_some();
        if open && level == state.quality {
            return Reconfigure::Unchanged;
        }

        let resolution = self.thresholds.get(level).resolution;
        if open && resolution == state.resolution {
            debug!(
                "File source already at {}x{}, relabelling {} -> {}",
                resolution.0, resolution.1, state.quality, level
            );
            state.quality = level;
            return Reconfigure::Relabelled;
        }

        let previous_path = state.path.clone();
        let position = state.current_frame_index;

        // Close before opening so two decoders never coexist
        state.handle = None;

        let path = self.config.path_for(level);
        match self.open_at(&path, position) {
            Ok((handle, total_frames)) => {
                info!(
                    "File source quality {} -> {} ({}x{}, '{}')",
                    state.quality, level, resolution.0, resolution.1, path
                );
                state.handle = Some(handle);
                state.path = path;
                state.quality = level;
                state.resolution = resolution;
                state.total_frames = total_frames;
                state.current_frame_index = position.min(total_frames.saturating_sub(1));
                state.pacer.reset();
                Reconfigure::Reopened
            }
            Err(e) => {
                warn!("Failed to open '{}' for quality {}: {}", path, level, e);
                match self.open_at(&previous_path, position) {
                    Ok((handle, total_frames)) => {
                        warn!("Restored previous file '{}'", previous_path);
                        state.handle = Some(handle);
                        state.total_frames = total_frames;
                        Reconfigure::Retained
                    }
                    Err(e) => {
                        warn!(
                            "Failed to restore '{}': {}; file source has no frames",
                            previous_path, e
                        );
                        Reconfigure::Unavailable
                    }
                }
            }
        }
    }

    fn open_at(
        &self,
        path: &str,
        position: u64,
    ) -> std::result::Result<(Box<dyn CaptureHandle>, u64), CaptureError> {
        let mut handle = self.backend.open_file(path)?;
        let total_frames = handle.frame_count().unwrap_or(0);
        let target = position.min(total_frames.saturating_sub(1));
        if target > 0 {
            handle.seek(target)?;
        }
        Ok((handle, total_frames))
    }

    /// Reopen after the source was released, restoring the frame position
    pub fn reopen(&self, level: QualityLevel) -> Result<()> {
        let mut state = self.state.lock();
        if state.handle.is_some() {
            self.reconfigure(&mut state, level);
            return Ok(());
        }

        let path = self.config.path_for(level);
        let (handle, total_frames) = self.open_at(&path, state.current_frame_index)?;

        info!("Reopened video file '{}' at quality {}", path, level);
        state.handle = Some(handle);
        state.path = path;
        state.quality = level;
        state.resolution = self.thresholds.get(level).resolution;
        state.total_frames = total_frames;
        state.current_frame_index = state.current_frame_index.min(total_frames.saturating_sub(1));
        state.pacer.reset();
        Ok(())
    }

    /// Next frame if one is due; `None` when paused, not yet due or unavailable
    pub fn read_frame(&self) -> Option<EncodedFrame> {
        let mut state = self.state.lock();
        if !state.is_playing || state.handle.is_none() {
            return None;
        }

        let now = Instant::now();
        if !state.pacer.is_due(now) {
            return None;
        }

        for _ in 0..state.pacer.frames_to_skip() {
            if let Err(e) = state.next_raw() {
                warn!("Failed to skip frame in '{}': {}", state.path, e);
                return None;
            }
        }

        let frame = match state.next_raw() {
            Ok(Some(frame)) => frame,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read frame from '{}': {}", state.path, e);
                return None;
            }
        };
        state.pacer.mark(now);

        trace!("Read frame {} from '{}'", frame.index, state.path);
        state.sequence += 1;
        encode_frame(
            &frame,
            state.sequence,
            SourceKind::File,
            state.quality,
            state.resolution,
            *self.jpeg_quality.get(state.quality),
        )
    }

    /// Jump to `position` in `[0, 1]`; returns the resulting frame index
    pub fn seek(&self, position: f64) -> Result<u64> {
        if !position.is_finite() {
            return Err(FlowcastError::invalid(
                "position",
                format!("seek position must be a finite number (got {})", position),
            ));
        }

        let mut state = self.state.lock();
        let last = state.total_frames.saturating_sub(1);
        let index = ((position.clamp(0.0, 1.0) * state.total_frames as f64).round() as u64).min(last);

        if let Some(handle) = state.handle.as_mut() {
            handle.seek(index)?;
        }
        state.current_frame_index = index;
        state.pacer.reset();

        debug!("Seeked '{}' to frame {}/{}", state.path, index, state.total_frames);
        Ok(index)
    }

    pub fn set_playing(&self, playing: bool) {
        let mut state = self.state.lock();
        if state.is_playing != playing {
            info!("File playback {}", if playing { "resumed" } else { "paused" });
            state.is_playing = playing;
            state.pacer.reset();
        }
    }

    pub fn set_speed(&self, speed: f64) -> Result<()> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(FlowcastError::invalid(
                "speed",
                format!("playback speed must be a positive number (got {})", speed),
            ));
        }

        let mut state = self.state.lock();
        state.playback_speed = speed;
        state.pacer.set_speed(speed);
        info!("File playback speed set to {}x", speed);
        Ok(())
    }

    /// Close the decoder; returns whether one was open
    pub fn release(&self) -> bool {
        let mut state = self.state.lock();
        match state.handle.take() {
            Some(handle) => {
                drop(handle);
                info!("Released video file '{}'", state.path);
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().handle.is_some()
    }

    pub fn current_frame_index(&self) -> u64 {
        self.state.lock().current_frame_index
    }

    pub fn info(&self) -> SourceInfo {
        let state = self.state.lock();
        SourceInfo::File {
            path: state.path.clone(),
            width: state.resolution.0,
            height: state.resolution.1,
            quality: state.quality,
            available: state.handle.is_some(),
            total_frames: state.total_frames,
            current_frame: state.current_frame_index,
            is_playing: state.is_playing,
            playback_speed: state.playback_speed,
            buffer_size: 0,
        }
    }
}
