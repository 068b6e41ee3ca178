use super::backend::{CaptureBackend, CaptureHandle};
use crate::error::CaptureError;
use crate::frame::{FrameData, FrameFormat};
use gstreamer::prelude::*;
use gstreamer::{ClockTime, Pipeline, SeekFlags, State};
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::time::SystemTime;
use tracing::{debug, info, trace, warn};

const STATE_CHANGE_TIMEOUT: ClockTime = ClockTime::from_seconds(5);
const PULL_TIMEOUT: ClockTime = ClockTime::from_mseconds(500);
const DEFAULT_FILE_FPS: f64 = 30.0;

/// GStreamer pipelines: `decodebin` for files, `v4l2src` MJPEG for cameras
pub struct GstBackend;

impl GstBackend {
    pub fn new() -> crate::error::Result<Self> {
        gstreamer::init().map_err(|e| CaptureError::Backend {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;
        info!("GStreamer capture backend initialized");
        Ok(Self)
    }
}

impl CaptureBackend for GstBackend {
    fn name(&self) -> &'static str {
        "gstreamer"
    }

    fn open_file(&self, path: &str) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        if !std::path::Path::new(path).is_file() {
            return Err(CaptureError::FileOpen {
                path: path.to_string(),
                details: "no such file".to_string(),
            });
        }

        let desc = format!(
            "filesrc location=\"{}\" ! decodebin ! videoconvert ! \
             video/x-raw,format=RGB ! \
             appsink name=sink sync=false max-buffers=4 drop=false enable-last-sample=false",
            path
        );

        GstHandle::start(&desc, FrameFormat::Rgb24, true)
            .map(|handle| Box::new(handle) as Box<dyn CaptureHandle>)
            .map_err(|details| CaptureError::FileOpen {
                path: path.to_string(),
                details,
            })
    }

    fn open_device(
        &self,
        index: u32,
        resolution: (u32, u32),
        fps: u32,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        let desc = format!(
            "v4l2src device=/dev/video{} io-mode=mmap do-timestamp=true ! \
             image/jpeg,width={},height={},framerate={}/1 ! \
             queue max-size-buffers=4 leaky=downstream ! \
             appsink name=sink sync=false max-buffers=2 drop=true enable-last-sample=false",
            index, resolution.0, resolution.1, fps
        );

        GstHandle::start(&desc, FrameFormat::Mjpeg, false)
            .map(|handle| Box::new(handle) as Box<dyn CaptureHandle>)
            .map_err(|details| CaptureError::DeviceOpen {
                device: index,
                details,
            })
    }
}

/// A running pipeline ending in an appsink
pub struct GstHandle {
    pipeline: Pipeline,
    appsink: AppSink,
    format: FrameFormat,
    resolution: (u32, u32),
    fps: f64,
    frame_count: Option<u64>,
    position: u64,
}

impl GstHandle {
    fn start(desc: &str, format: FrameFormat, finite: bool) -> Result<Self, String> {
        debug!("Creating GStreamer pipeline: {}", desc);

        let pipeline = gstreamer::parse::launch(desc)
            .map_err(|e| format!("Failed to create pipeline: {}", e))?
            .downcast::<Pipeline>()
            .map_err(|_| "Failed to downcast to Pipeline".to_string())?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| "Pipeline has no appsink".to_string())?
            .dynamic_cast::<AppSink>()
            .map_err(|_| "Sink element is not an appsink".to_string())?;

        // Preroll so caps and duration are known before the first read
        pipeline
            .set_state(State::Paused)
            .map_err(|e| format!("Failed to pause pipeline: {}", e))?;
        let (result, _, _) = pipeline.state(STATE_CHANGE_TIMEOUT);
        if let Err(e) = result {
            let _ = pipeline.set_state(State::Null);
            return Err(format!("Pipeline did not preroll: {}", e));
        }

        let Some(preroll) = appsink.try_pull_preroll(STATE_CHANGE_TIMEOUT) else {
            let _ = pipeline.set_state(State::Null);
            return Err("No preroll sample".to_string());
        };
        let (resolution, fps) = match sample_geometry(&preroll) {
            Some(geometry) => geometry,
            None => {
                let _ = pipeline.set_state(State::Null);
                return Err("Could not read frame size from caps".to_string());
            }
        };
        let fps = if fps > 0.0 { fps } else { DEFAULT_FILE_FPS };

        let frame_count = if finite {
            pipeline
                .query_duration::<ClockTime>()
                .map(|duration| (duration.nseconds() as f64 / 1e9 * fps).round() as u64)
        } else {
            None
        };

        pipeline
            .set_state(State::Playing)
            .map_err(|e| format!("Failed to start pipeline: {}", e))?;

        info!(
            "GStreamer pipeline running at {}x{} ({:.2} fps, {:?} frames)",
            resolution.0, resolution.1, fps, frame_count
        );

        Ok(Self {
            pipeline,
            appsink,
            format,
            resolution,
            fps,
            frame_count,
            position: 0,
        })
    }
}

fn sample_geometry(sample: &gstreamer::Sample) -> Option<((u32, u32), f64)> {
    let caps = sample.caps()?;
    if let Ok(info) = VideoInfo::from_caps(caps) {
        let rate = info.fps();
        let fps = if rate.denom() > 0 {
            rate.numer() as f64 / rate.denom() as f64
        } else {
            0.0
        };
        return Some(((info.width(), info.height()), fps));
    }

    // Compressed caps (image/jpeg) carry the size as plain fields
    let structure = caps.structure(0)?;
    let width = structure.get::<i32>("width").ok()?;
    let height = structure.get::<i32>("height").ok()?;
    let fps = structure
        .get::<gstreamer::Fraction>("framerate")
        .ok()
        .filter(|rate| rate.denom() > 0)
        .map(|rate| rate.numer() as f64 / rate.denom() as f64)
        .unwrap_or(0.0);
    Some(((width as u32, height as u32), fps))
}

impl CaptureHandle for GstHandle {
    fn read(&mut self) -> Result<Option<FrameData>, CaptureError> {
        let Some(sample) = self.appsink.try_pull_sample(PULL_TIMEOUT) else {
            if self.appsink.is_eos() {
                return Ok(None);
            }
            return Err(CaptureError::Read {
                details: "Timed out waiting for a sample".to_string(),
            });
        };

        let buffer = sample.buffer().ok_or_else(|| CaptureError::Read {
            details: "No buffer in sample".to_string(),
        })?;
        let map = buffer.map_readable().map_err(|e| CaptureError::Read {
            details: format!("Failed to map buffer: {}", e),
        })?;

        let (width, height) = sample_geometry(&sample)
            .map(|(resolution, _)| resolution)
            .unwrap_or(self.resolution);

        let index = self.position;
        self.position += 1;
        trace!("Pulled frame {} ({}x{}, {} bytes)", index, width, height, map.len());

        Ok(Some(FrameData::new(
            index,
            SystemTime::now(),
            map.as_slice().to_vec(),
            width,
            height,
            self.format,
        )))
    }

    fn seek(&mut self, frame_index: u64) -> Result<(), CaptureError> {
        if self.frame_count.is_none() {
            return Err(CaptureError::Seek {
                details: "live device streams cannot seek".to_string(),
            });
        }

        let target = ClockTime::from_nseconds((frame_index as f64 / self.fps * 1e9) as u64);
        self.pipeline
            .seek_simple(SeekFlags::FLUSH | SeekFlags::ACCURATE, target)
            .map_err(|e| CaptureError::Seek {
                details: format!("Seek to frame {} failed: {}", frame_index, e),
            })?;
        self.position = frame_index;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn frame_count(&self) -> Option<u64> {
        self.frame_count
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }
}

impl Drop for GstHandle {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(State::Null) {
            warn!("Failed to stop GStreamer pipeline: {}", e);
        }
    }
}
