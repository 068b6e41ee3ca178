//! Instrumented backend shared by the source and controller tests.

use super::backend::{CaptureBackend, CaptureHandle};
use super::TestPatternBackend;
use crate::config::{DeviceConfig, FileConfig};
use crate::error::CaptureError;
use crate::frame::FrameData;
use crate::quality::{QualityTable, ThresholdTable};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct Counters {
    pub file_opens: AtomicUsize,
    pub device_opens: AtomicUsize,
    pub releases: AtomicUsize,
    pub open_devices: AtomicUsize,
    pub max_open_devices: AtomicUsize,
    pub open_files: AtomicUsize,
}

/// Test pattern backend that counts opens and releases and can be told to fail
pub struct CountingBackend {
    inner: TestPatternBackend,
    pub counters: Arc<Counters>,
    failing_paths: Mutex<HashSet<String>>,
    fail_devices: AtomicBool,
}

impl CountingBackend {
    pub fn new(frame_count: u64) -> Arc<Self> {
        Arc::new(Self {
            inner: TestPatternBackend::new(frame_count, (32, 18)),
            counters: Arc::new(Counters::default()),
            failing_paths: Mutex::new(HashSet::new()),
            fail_devices: AtomicBool::new(false),
        })
    }

    pub fn fail_path(&self, path: &str) {
        self.failing_paths.lock().insert(path.to_string());
    }

    pub fn clear_failing_paths(&self) {
        self.failing_paths.lock().clear();
    }

    pub fn fail_devices(&self, fail: bool) {
        self.fail_devices.store(fail, Ordering::SeqCst);
    }

    pub fn file_opens(&self) -> usize {
        self.counters.file_opens.load(Ordering::SeqCst)
    }

    pub fn device_opens(&self) -> usize {
        self.counters.device_opens.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.counters.releases.load(Ordering::SeqCst)
    }

    pub fn open_handles(&self) -> usize {
        self.counters.open_files.load(Ordering::SeqCst) + self.open_devices()
    }

    pub fn open_devices(&self) -> usize {
        self.counters.open_devices.load(Ordering::SeqCst)
    }

    pub fn max_open_devices(&self) -> usize {
        self.counters.max_open_devices.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for CountingBackend {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn open_file(&self, path: &str) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        if self.failing_paths.lock().contains(path) {
            return Err(CaptureError::FileOpen {
                path: path.to_string(),
                details: "injected failure".to_string(),
            });
        }

        let inner = self.inner.open_file(path)?;
        self.counters.file_opens.fetch_add(1, Ordering::SeqCst);
        self.counters.open_files.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountedHandle {
            inner,
            counters: Arc::clone(&self.counters),
            device: false,
        }))
    }

    fn open_device(
        &self,
        index: u32,
        resolution: (u32, u32),
        fps: u32,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        if self.fail_devices.load(Ordering::SeqCst) {
            return Err(CaptureError::DeviceOpen {
                device: index,
                details: "injected failure".to_string(),
            });
        }

        let inner = self.inner.open_device(index, resolution, fps)?;
        self.counters.device_opens.fetch_add(1, Ordering::SeqCst);
        let open = self.counters.open_devices.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_open_devices.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(CountedHandle {
            inner,
            counters: Arc::clone(&self.counters),
            device: true,
        }))
    }
}

struct CountedHandle {
    inner: Box<dyn CaptureHandle>,
    counters: Arc<Counters>,
    device: bool,
}

impl CaptureHandle for CountedHandle {
    fn read(&mut self) -> Result<Option<FrameData>, CaptureError> {
        self.inner.read()
    }

    fn seek(&mut self, frame_index: u64) -> Result<(), CaptureError> {
        self.inner.seek(frame_index)
    }

    fn position(&self) -> u64 {
        self.inner.position()
    }

    fn frame_count(&self) -> Option<u64> {
        self.inner.frame_count()
    }

    fn resolution(&self) -> (u32, u32) {
        self.inner.resolution()
    }
}

impl Drop for CountedHandle {
    fn drop(&mut self) {
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
        if self.device {
            self.counters.open_devices.fetch_sub(1, Ordering::SeqCst);
        } else {
            self.counters.open_files.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Small distinct resolutions so tests encode quickly
pub fn small_thresholds() -> ThresholdTable {
    let mut table = ThresholdTable::default();
    table.low.resolution = (16, 9);
    table.medium.resolution = (32, 18);
    table.high.resolution = (48, 27);
    table
}

pub fn jpeg_quality() -> QualityTable<u8> {
    QualityTable::new(70, 85, 95)
}

pub fn file_config() -> FileConfig {
    FileConfig {
        path_template: "clip_{tier}.mp4".to_string(),
        // Fast enough that a frame is due on almost every poll
        fps: 1000,
        ..FileConfig::default()
    }
}

pub fn device_config() -> DeviceConfig {
    DeviceConfig { index: 0, fps: 1000 }
}
