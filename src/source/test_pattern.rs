use super::backend::{CaptureBackend, CaptureHandle};
use crate::error::CaptureError;
use crate::frame::{FrameData, FrameFormat};
use std::time::SystemTime;
use tracing::{debug, trace};

/// Backend that synthesizes frames instead of decoding real media.
///
/// Files are finite streams of `frame_count` frames at `native_resolution`;
/// devices are endless streams at the requested resolution.
#[derive(Debug, Clone)]
pub struct TestPatternBackend {
    frame_count: u64,
    native_resolution: (u32, u32),
}

impl TestPatternBackend {
    pub fn new(frame_count: u64, native_resolution: (u32, u32)) -> Self {
        Self {
            frame_count,
            native_resolution,
        }
    }
}

impl CaptureBackend for TestPatternBackend {
    fn name(&self) -> &'static str {
        "test_pattern"
    }

    fn open_file(&self, path: &str) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        if path.trim().is_empty() {
            return Err(CaptureError::FileOpen {
                path: path.to_string(),
                details: "empty path".to_string(),
            });
        }
        if self.frame_count == 0 {
            return Err(CaptureError::FileOpen {
                path: path.to_string(),
                details: "test pattern has no frames".to_string(),
            });
        }

        debug!(
            "Opened test pattern file '{}' ({} frames at {}x{})",
            path, self.frame_count, self.native_resolution.0, self.native_resolution.1
        );
        Ok(Box::new(TestPatternHandle::new(
            self.native_resolution,
            Some(self.frame_count),
        )))
    }

    fn open_device(
        &self,
        index: u32,
        resolution: (u32, u32),
        fps: u32,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        if resolution.0 == 0 || resolution.1 == 0 {
            return Err(CaptureError::DeviceOpen {
                device: index,
                details: format!("invalid resolution {}x{}", resolution.0, resolution.1),
            });
        }

        debug!(
            "Opened test pattern device {} at {}x{} @ {}fps",
            index, resolution.0, resolution.1, fps
        );
        Ok(Box::new(TestPatternHandle::new(resolution, None)))
    }
}

/// Generated RGB24 frame stream
pub struct TestPatternHandle {
    width: u32,
    height: u32,
    position: u64,
    frame_count: Option<u64>,
}

impl TestPatternHandle {
    fn new(resolution: (u32, u32), frame_count: Option<u64>) -> Self {
        Self {
            width: resolution.0,
            height: resolution.1,
            position: 0,
            frame_count,
        }
    }

    fn render(&self, index: u64) -> Vec<u8> {
        // Colour sweeps with the frame index so consecutive frames differ
        let color = [(index % 256) as u8, 128u8, (255 - index % 256) as u8];
        let pixels = self.width as usize * self.height as usize;
        let mut data = Vec::with_capacity(pixels * 3);
        for _ in 0..pixels {
            data.extend_from_slice(&color);
        }
        data
    }
}

impl CaptureHandle for TestPatternHandle {
    fn read(&mut self) -> Result<Option<FrameData>, CaptureError> {
        if let Some(count) = self.frame_count {
            if self.position >= count {
                return Ok(None);
            }
        }

        let index = self.position;
        self.position += 1;
        trace!("Generated test pattern frame {} ({}x{})", index, self.width, self.height);

        Ok(Some(FrameData::new(
            index,
            SystemTime::now(),
            self.render(index),
            self.width,
            self.height,
            FrameFormat::Rgb24,
        )))
    }

    fn seek(&mut self, frame_index: u64) -> Result<(), CaptureError> {
        match self.frame_count {
            Some(count) if frame_index >= count => Err(CaptureError::Seek {
                details: format!("frame {} beyond end of stream ({} frames)", frame_index, count),
            }),
            Some(_) => {
                self.position = frame_index;
                Ok(())
            }
            None => Err(CaptureError::Seek {
                details: "live device streams cannot seek".to_string(),
            }),
        }
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn frame_count(&self) -> Option<u64> {
        self.frame_count
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stream_ends_after_frame_count() {
        let backend = TestPatternBackend::new(3, (8, 4));
        let mut handle = backend.open_file("clip_360.mp4").unwrap();

        for expected in 0..3 {
            let frame = handle.read().unwrap().unwrap();
            assert_eq!(frame.index, expected);
            assert!(frame.validate_size());
        }
        assert!(handle.read().unwrap().is_none());

        handle.seek(1).unwrap();
        assert_eq!(handle.read().unwrap().unwrap().index, 1);
        assert!(handle.seek(3).is_err());
    }

    #[test]
    fn test_device_stream_is_live() {
        let backend = TestPatternBackend::new(3, (8, 4));
        let mut handle = backend.open_device(0, (16, 9), 30).unwrap();

        assert_eq!(handle.frame_count(), None);
        assert_eq!(handle.resolution(), (16, 9));
        for _ in 0..10 {
            assert!(handle.read().unwrap().is_some());
        }
        assert!(handle.seek(0).is_err());
    }

    #[test]
    fn test_invalid_open_requests() {
        let backend = TestPatternBackend::new(3, (8, 4));
        assert!(matches!(backend.open_file(""), Err(CaptureError::FileOpen { .. })));
        assert!(matches!(
            backend.open_device(2, (0, 0), 30),
            Err(CaptureError::DeviceOpen { device: 2, .. })
        ));
        assert!(TestPatternBackend::new(0, (8, 4)).open_file("a.mp4").is_err());
    }
}
