use super::{DeviceSource, FileSource};
use crate::error::{FlowcastError, Result};
use crate::frame::EncodedFrame;
use crate::quality::QualityLevel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which kind of source produces frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[serde(alias = "video")]
    File,
    #[serde(alias = "camera")]
    Device,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::File => "file",
            SourceKind::Device => "device",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = FlowcastError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "video" => Ok(SourceKind::File),
            "device" | "camera" => Ok(SourceKind::Device),
            other => Err(FlowcastError::invalid(
                "source",
                format!("unknown source kind '{}' (expected file or device)", other),
            )),
        }
    }
}

/// Outcome of a quality change on a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Reconfigure {
    /// Requested level was already active
    Unchanged,
    /// Resolution matched, only the label and encode quality changed
    Relabelled,
    /// The capture handle was swapped for one at the new resolution
    Reopened,
    /// Opening the new configuration failed, the previous one was restored
    Retained,
    /// Neither the new nor the previous configuration could be opened
    Unavailable,
}

impl Reconfigure {
    /// Whether the source now holds the requested level
    pub fn is_applied(&self) -> bool {
        matches!(
            self,
            Reconfigure::Unchanged | Reconfigure::Relabelled | Reconfigure::Reopened
        )
    }
}

/// Serializable snapshot of a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum SourceInfo {
    File {
        path: String,
        width: u32,
        height: u32,
        quality: QualityLevel,
        available: bool,
        total_frames: u64,
        current_frame: u64,
        is_playing: bool,
        playback_speed: f64,
        buffer_size: usize,
    },
    Device {
        device_id: u32,
        width: u32,
        height: u32,
        quality: QualityLevel,
        available: bool,
    },
}

impl SourceInfo {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceInfo::File { .. } => SourceKind::File,
            SourceInfo::Device { .. } => SourceKind::Device,
        }
    }

    pub fn quality(&self) -> QualityLevel {
        match self {
            SourceInfo::File { quality, .. } | SourceInfo::Device { quality, .. } => *quality,
        }
    }

    pub fn resolution(&self) -> (u32, u32) {
        match self {
            SourceInfo::File { width, height, .. } | SourceInfo::Device { width, height, .. } => {
                (*width, *height)
            }
        }
    }
}

/// A frame producer: a video file or a live capture device
pub enum StreamSource {
    File(FileSource),
    Device(DeviceSource),
}

impl StreamSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            StreamSource::File(_) => SourceKind::File,
            StreamSource::Device(_) => SourceKind::Device,
        }
    }

    pub fn set_quality(&self, level: QualityLevel) -> Reconfigure {
        match self {
            StreamSource::File(source) => source.set_quality(level),
            StreamSource::Device(source) => source.set_quality(level),
        }
    }

    pub fn read_frame(&self) -> Option<EncodedFrame> {
        match self {
            StreamSource::File(source) => source.read_frame(),
            StreamSource::Device(source) => source.read_frame(),
        }
    }

    pub fn info(&self) -> SourceInfo {
        match self {
            StreamSource::File(source) => source.info(),
            StreamSource::Device(source) => source.info(),
        }
    }

    /// Close the capture handle; returns whether one was open
    pub fn release(&self) -> bool {
        match self {
            StreamSource::File(source) => source.release(),
            StreamSource::Device(source) => source.release(),
        }
    }

    pub fn is_open(&self) -> bool {
        match self {
            StreamSource::File(source) => source.is_open(),
            StreamSource::Device(source) => source.is_open(),
        }
    }

    pub fn quality(&self) -> QualityLevel {
        self.info().quality()
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.info().resolution()
    }

    pub fn as_file(&self) -> Option<&FileSource> {
        match self {
            StreamSource::File(source) => Some(source),
            StreamSource::Device(_) => None,
        }
    }

    /// File source for a playback operation, or an unsupported-operation error
    pub fn playback(&self, operation: &str) -> Result<&FileSource> {
        self.as_file()
            .ok_or_else(|| FlowcastError::unsupported(operation, self.kind().as_str()))
    }
}
