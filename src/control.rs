//! Line-oriented JSON control interface.
//!
//! Each request is one JSON object tagged by `op`; each response carries an
//! explicit `success` flag with either `data` or `error`.

use crate::controller::{ControlMode, SourceKind, StreamController};
use crate::error::{FlowcastError, Result};
use crate::metrics::TelemetryReport;
use crate::quality::QualityLevel;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

fn default_history_limit() -> usize {
    10
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    GetMetrics,
    RecordMetrics(TelemetryReport),
    SetQuality {
        quality: String,
    },
    SetSource {
        source: String,
    },
    SetControlMode {
        mode: String,
    },
    Seek {
        position: f64,
    },
    SetPlaying {
        playing: bool,
    },
    SetSpeed {
        speed: f64,
    },
    GetStreamInfo,
    GetQualityHistory {
        #[serde(default = "default_history_limit")]
        limit: usize,
    },
}

impl ControlRequest {
    pub fn name(&self) -> &'static str {
        match self {
            ControlRequest::GetMetrics => "get_metrics",
            ControlRequest::RecordMetrics(_) => "record_metrics",
            ControlRequest::SetQuality { .. } => "set_quality",
            ControlRequest::SetSource { .. } => "set_source",
            ControlRequest::SetControlMode { .. } => "set_control_mode",
            ControlRequest::Seek { .. } => "seek",
            ControlRequest::SetPlaying { .. } => "set_playing",
            ControlRequest::SetSpeed { .. } => "set_speed",
            ControlRequest::GetStreamInfo => "get_stream_info",
            ControlRequest::GetQualityHistory { .. } => "get_quality_history",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl ControlResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| FlowcastError::system(format!("Failed to serialize response: {}", e)))
}

async fn execute(controller: &StreamController, request: ControlRequest) -> Result<Value> {
    match request {
        ControlRequest::GetMetrics => to_value(&controller.get_metrics()),
        ControlRequest::RecordMetrics(report) => to_value(&controller.record_metrics(report)),
        ControlRequest::SetQuality { quality } => {
            let level: QualityLevel = quality.parse()?;
            let outcome = controller.set_quality(level).await?;
            let metrics = controller.get_metrics();
            Ok(json!({
                "requested": level,
                "quality": metrics.current_quality,
                "resolution": metrics.resolution,
                "bitrate_kbps": metrics.bitrate_kbps,
                "outcome": outcome,
            }))
        }
        ControlRequest::SetSource { source } => {
            let kind: SourceKind = source.parse()?;
            let changed = controller.set_source(kind).await?;
            Ok(json!({ "source": kind, "changed": changed }))
        }
        ControlRequest::SetControlMode { mode } => {
            let mode: ControlMode = mode.parse()?;
            let changed = controller.set_control_mode(mode).await?;
            Ok(json!({ "mode": mode, "changed": changed }))
        }
        ControlRequest::Seek { position } => {
            let frame = controller.seek(position).await?;
            Ok(json!({ "current_frame": frame }))
        }
        ControlRequest::SetPlaying { playing } => {
            controller.set_playing(playing).await?;
            Ok(json!({ "is_playing": playing }))
        }
        ControlRequest::SetSpeed { speed } => {
            controller.set_speed(speed).await?;
            Ok(json!({ "playback_speed": speed }))
        }
        ControlRequest::GetStreamInfo => to_value(&controller.get_stream_info().await?),
        ControlRequest::GetQualityHistory { limit } => {
            let history = controller.get_quality_history(limit);
            Ok(json!({ "history": history }))
        }
    }
}

/// Run one request against the controller
pub async fn dispatch(controller: &StreamController, request: ControlRequest) -> ControlResponse {
    let name = request.name();
    debug!("Control request: {}", name);

    match execute(controller, request).await {
        Ok(data) => ControlResponse::ok(data),
        Err(e) => {
            if e.is_validation() {
                debug!("Rejected {}: {}", name, e);
            } else {
                warn!("Control request {} failed: {}", name, e);
            }
            ControlResponse::failure(e.to_string())
        }
    }
}

/// Parse and run one JSON request line
pub async fn handle_line(controller: &StreamController, line: &str) -> ControlResponse {
    match serde_json::from_str::<ControlRequest>(line) {
        Ok(request) => dispatch(controller, request).await,
        Err(e) => ControlResponse::failure(format!("Invalid request: {}", e)),
    }
}
