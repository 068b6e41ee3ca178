use crate::error::FlowcastError;
use crate::metrics::SmoothedMetrics;
use config::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Streaming quality presets, ordered `Low < Medium < High`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    Low,
    Medium,
    High,
}

impl QualityLevel {
    /// All levels from lowest to highest
    pub const ALL: [QualityLevel; 3] = [QualityLevel::Low, QualityLevel::Medium, QualityLevel::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityLevel::Low => "low",
            QualityLevel::Medium => "medium",
            QualityLevel::High => "high",
        }
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityLevel {
    type Err = FlowcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(QualityLevel::Low),
            "medium" => Ok(QualityLevel::Medium),
            "high" => Ok(QualityLevel::High),
            other => Err(FlowcastError::invalid(
                "quality",
                format!("unknown quality level '{}' (expected low, medium or high)", other),
            )),
        }
    }
}

/// One value per quality level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityTable<T> {
    pub low: T,
    pub medium: T,
    pub high: T,
}

impl<T> QualityTable<T> {
    pub fn new(low: T, medium: T, high: T) -> Self {
        Self { low, medium, high }
    }

    pub fn get(&self, level: QualityLevel) -> &T {
        match level {
            QualityLevel::Low => &self.low,
            QualityLevel::Medium => &self.medium,
            QualityLevel::High => &self.high,
        }
    }

    pub fn get_mut(&mut self, level: QualityLevel) -> &mut T {
        match level {
            QualityLevel::Low => &mut self.low,
            QualityLevel::Medium => &mut self.medium,
            QualityLevel::High => &mut self.high,
        }
    }

    /// Entries from lowest to highest level
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (QualityLevel, &T)> {
        QualityLevel::ALL.into_iter().map(move |level| (level, self.get(level)))
    }
}

/// Resolution, bitrate and admission limits for one quality level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityThreshold {
    /// Target frame size (width, height)
    pub resolution: (u32, u32),
    /// Nominal bitrate in Kbps
    pub bitrate_kbps: u32,
    /// Minimum bandwidth in Mbps
    pub min_bandwidth: f64,
    /// Maximum latency in ms
    pub max_latency: f64,
    /// Maximum packet loss in percent
    pub max_packet_loss: f64,
}

impl QualityThreshold {
    /// Whether all three limits are satisfied by the given metrics
    pub fn is_met_by(&self, metrics: &SmoothedMetrics) -> bool {
        metrics.bandwidth >= self.min_bandwidth
            && metrics.latency <= self.max_latency
            && metrics.packet_loss <= self.max_packet_loss
    }
}

pub type ThresholdTable = QualityTable<QualityThreshold>;

impl Default for ThresholdTable {
    fn default() -> Self {
        QualityTable {
            low: QualityThreshold {
                resolution: (640, 360),
                bitrate_kbps: 500,
                min_bandwidth: 0.0,
                max_latency: 500.0,
                max_packet_loss: 10.0,
            },
            medium: QualityThreshold {
                resolution: (1280, 720),
                bitrate_kbps: 1500,
                min_bandwidth: 2.0,
                max_latency: 150.0,
                max_packet_loss: 5.0,
            },
            high: QualityThreshold {
                resolution: (1920, 1080),
                bitrate_kbps: 3000,
                min_bandwidth: 5.0,
                max_latency: 75.0,
                max_packet_loss: 2.0,
            },
        }
    }
}

/// Check a threshold table for usable values and the low→high tightening rule
pub fn validate_thresholds(table: &ThresholdTable) -> Result<(), ConfigError> {
    for (level, threshold) in table.iter() {
        let (width, height) = threshold.resolution;
        if width == 0 || height == 0 {
            return Err(ConfigError::Message(format!(
                "Quality '{}' resolution must be greater than 0",
                level
            )));
        }

        let limits = [
            ("min_bandwidth", threshold.min_bandwidth),
            ("max_latency", threshold.max_latency),
            ("max_packet_loss", threshold.max_packet_loss),
        ];
        for (name, value) in limits {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Message(format!(
                    "Quality '{}' {} must be a finite, non-negative number (got {})",
                    level, name, value
                )));
            }
        }
    }

    let pairs = [
        (QualityLevel::Low, QualityLevel::Medium),
        (QualityLevel::Medium, QualityLevel::High),
    ];
    for (lower, higher) in pairs {
        let lo = table.get(lower);
        let hi = table.get(higher);

        if hi.min_bandwidth < lo.min_bandwidth {
            return Err(ConfigError::Message(format!(
                "Quality '{}' min_bandwidth ({}) must not be below '{}' ({})",
                higher, hi.min_bandwidth, lower, lo.min_bandwidth
            )));
        }
        if hi.max_latency > lo.max_latency {
            return Err(ConfigError::Message(format!(
                "Quality '{}' max_latency ({}) must not exceed '{}' ({})",
                higher, hi.max_latency, lower, lo.max_latency
            )));
        }
        if hi.max_packet_loss > lo.max_packet_loss {
            return Err(ConfigError::Message(format!(
                "Quality '{}' max_packet_loss ({}) must not exceed '{}' ({})",
                higher, hi.max_packet_loss, lower, lo.max_packet_loss
            )));
        }
    }

    Ok(())
}
