use crate::error::FlowcastError;
use crate::metrics::SmoothedMetrics;
use crate::quality::QualityLevel;
use crate::source::SourceInfo;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Who decides the quality level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    Manual,
    Adaptive,
}

impl ControlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlMode::Manual => "manual",
            ControlMode::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlMode {
    type Err = FlowcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(ControlMode::Manual),
            "adaptive" | "auto" => Ok(ControlMode::Adaptive),
            other => Err(FlowcastError::invalid(
                "mode",
                format!("unknown control mode '{}' (expected manual or adaptive)", other),
            )),
        }
    }
}

/// Snapshot handed to transports alongside each frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    #[serde(flatten)]
    pub source: SourceInfo,
    pub control_mode: ControlMode,
    /// Smoothed telemetry, only reported in adaptive mode
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub network_metrics: Option<SmoothedMetrics>,
    pub bitrate_kbps: u32,
}

/// Smoothed telemetry together with the quality it currently maps to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub bandwidth: f64,
    pub latency: f64,
    pub packet_loss: f64,
    pub current_quality: QualityLevel,
    pub resolution: (u32, u32),
    pub bitrate_kbps: u32,
    pub samples: usize,
}

/// Lifecycle of the controller's background tasks
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentState {
    Stopped,
    Running,
    Stopping,
    Failed,
}
