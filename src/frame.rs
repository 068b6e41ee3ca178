use crate::error::ProcessingError;
use crate::quality::QualityLevel;
use crate::source::SourceKind;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// Pixel layout of a raw captured frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Motion JPEG format - compressed JPEG frames
    Mjpeg,
    /// RGB24 format - uncompressed RGB data
    Rgb24,
}

impl FrameFormat {
    /// Get bytes per pixel for the format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Mjpeg => 0, // Variable size, compressed
            FrameFormat::Rgb24 => 3,
        }
    }

    /// Check if format is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameFormat::Mjpeg)
    }
}

/// A decoded unit as delivered by a capture handle
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Position of the frame within its stream
    pub index: u64,
    /// Timestamp when frame was captured
    pub timestamp: SystemTime,
    /// Raw frame data (shared ownership for efficiency)
    pub data: Arc<Vec<u8>>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frame format
    pub format: FrameFormat,
}

impl FrameData {
    pub fn new(
        index: u64,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            index,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    /// Get the expected frame size for uncompressed formats
    pub fn expected_size(&self) -> Option<usize> {
        if self.format.is_compressed() {
            None
        } else {
            Some(self.width as usize * self.height as usize * self.format.bytes_per_pixel())
        }
    }

    /// Validate frame data size against expected size
    pub fn validate_size(&self) -> bool {
        match self.expected_size() {
            Some(expected) => self.data.len() == expected,
            None => true,
        }
    }
}

/// JPEG payload handed to the transport
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Monotonic sequence number assigned by the producing source
    pub sequence: u64,
    /// Index of the frame within the source stream
    pub frame_index: u64,
    pub timestamp: SystemTime,
    pub width: u32,
    pub height: u32,
    /// Quality level the frame was produced at
    pub quality: QualityLevel,
    /// Kind of source that produced the frame
    pub source: SourceKind,
    /// JPEG bytes
    pub data: Bytes,
}

impl EncodedFrame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Frame age in milliseconds
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Frame processing utilities
pub struct FrameProcessor;

impl FrameProcessor {
    /// Decode a raw frame into RGB pixels
    pub fn decode(frame: &FrameData) -> Result<RgbImage, ProcessingError> {
        match frame.format {
            FrameFormat::Mjpeg => image::load_from_memory(&frame.data)
                .map(|img| img.to_rgb8())
                .map_err(|e| ProcessingError::Decode {
                    details: format!("JPEG decode failed for frame {}: {}", frame.index, e),
                }),
            FrameFormat::Rgb24 => {
                if !frame.validate_size() {
                    return Err(ProcessingError::InvalidFrame {
                        details: format!(
                            "RGB24 frame {} has {} bytes, expected {:?}",
                            frame.index,
                            frame.data.len(),
                            frame.expected_size()
                        ),
                    });
                }
                RgbImage::from_raw(frame.width, frame.height, frame.data.as_ref().clone()).ok_or_else(
                    || ProcessingError::InvalidFrame {
                        details: format!("RGB24 frame {} buffer does not fit dimensions", frame.index),
                    },
                )
            }
        }
    }

    /// Resize to `resolution` unless the image already has that size
    pub fn resize(image: RgbImage, resolution: (u32, u32)) -> RgbImage {
        if image.dimensions() == resolution {
            image
        } else {
            imageops::resize(&image, resolution.0, resolution.1, FilterType::Triangle)
        }
    }

    /// Encode RGB pixels as JPEG at the given quality (1-100)
    pub fn encode_jpeg(image: &RgbImage, jpeg_quality: u8) -> Result<Vec<u8>, ProcessingError> {
        let mut buf = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, jpeg_quality.clamp(1, 100));
        encoder
            .encode_image(image)
            .map_err(|e| ProcessingError::JpegEncoding {
                details: e.to_string(),
            })?;
        Ok(buf)
    }

    /// Decode, resize and re-encode a raw frame for streaming
    pub fn process(
        frame: &FrameData,
        resolution: (u32, u32),
        jpeg_quality: u8,
    ) -> Result<Vec<u8>, ProcessingError> {
        let decoded = Self::decode(frame)?;
        let resized = Self::resize(decoded, resolution);
        Self::encode_jpeg(&resized, jpeg_quality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgb_frame(width: u32, height: u32) -> FrameData {
        let data = (0..width * height * 3).map(|i| (i % 251) as u8).collect();
        FrameData::new(7, SystemTime::now(), data, width, height, FrameFormat::Rgb24)
    }

    #[test]
    fn test_frame_format_properties() {
        assert_eq!(FrameFormat::Mjpeg.bytes_per_pixel(), 0);
        assert_eq!(FrameFormat::Rgb24.bytes_per_pixel(), 3);
        assert!(FrameFormat::Mjpeg.is_compressed());
        assert!(!FrameFormat::Rgb24.is_compressed());
    }

    #[test]
    fn test_frame_size_validation() {
        assert!(rgb_frame(16, 8).validate_size());

        let invalid = FrameData::new(2, SystemTime::now(), vec![0u8; 100], 640, 480, FrameFormat::Rgb24);
        assert!(!invalid.validate_size());
        assert!(matches!(
            FrameProcessor::decode(&invalid),
            Err(ProcessingError::InvalidFrame { .. })
        ));

        let mjpeg = FrameData::new(3, SystemTime::now(), vec![0u8; 5000], 640, 480, FrameFormat::Mjpeg);
        assert!(mjpeg.validate_size());
    }

    #[test]
    fn test_process_resizes_and_encodes() {
        let jpeg = FrameProcessor::process(&rgb_frame(32, 18), (64, 36), 85).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 36));
    }

    #[test]
    fn test_mjpeg_input_is_decoded() {
        let jpeg = FrameProcessor::process(&rgb_frame(40, 20), (40, 20), 90).unwrap();
        let mjpeg = FrameData::new(1, SystemTime::now(), jpeg, 40, 20, FrameFormat::Mjpeg);

        let out = FrameProcessor::process(&mjpeg, (20, 10), 70).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (20, 10));
    }

    #[test]
    fn test_corrupt_mjpeg_is_rejected() {
        let garbage = FrameData::new(1, SystemTime::now(), vec![1, 2, 3], 4, 4, FrameFormat::Mjpeg);
        assert!(matches!(
            FrameProcessor::decode(&garbage),
            Err(ProcessingError::Decode { .. })
        ));
    }

    #[test]
    fn test_higher_jpeg_quality_produces_larger_output() {
        let frame = rgb_frame(64, 64);
        let low = FrameProcessor::process(&frame, (64, 64), 30).unwrap();
        let high = FrameProcessor::process(&frame, (64, 64), 95).unwrap();
        assert!(high.len() > low.len());
    }
}
