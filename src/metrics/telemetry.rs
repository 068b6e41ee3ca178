use super::aggregator::NetworkSample;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Telemetry as reported by a client or network monitor, before validation.
///
/// Fields are kept loosely typed so that a malformed value only degrades
/// that field to its worst case instead of rejecting the whole report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReport {
    #[serde(default)]
    pub bandwidth: Option<Value>,
    #[serde(default)]
    pub latency: Option<Value>,
    #[serde(default)]
    pub packet_loss: Option<Value>,
}

impl TelemetryReport {
    pub fn from_values(bandwidth: f64, latency: f64, packet_loss: f64) -> Self {
        Self {
            bandwidth: Some(Value::from(bandwidth)),
            latency: Some(Value::from(latency)),
            packet_loss: Some(Value::from(packet_loss)),
        }
    }

    /// Coerce into a sample; missing or invalid fields take worst-case values
    pub fn into_sample(self) -> NetworkSample {
        let worst = NetworkSample::WORST_CASE;

        NetworkSample {
            bandwidth: coerce("bandwidth", self.bandwidth.as_ref(), worst.bandwidth, None),
            latency: coerce("latency", self.latency.as_ref(), worst.latency, None),
            packet_loss: coerce(
                "packet_loss",
                self.packet_loss.as_ref(),
                worst.packet_loss,
                Some(100.0),
            ),
        }
    }
}

fn coerce(field: &str, value: Option<&Value>, worst: f64, max: Option<f64>) -> f64 {
    let parsed = match value {
        None | Some(Value::Null) => return worst,
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };

    match parsed {
        Some(v) if v.is_finite() && v >= 0.0 => match max {
            Some(max) if v > max => {
                warn!("Telemetry {} out of range ({}), using worst case", field, v);
                worst
            }
            _ => v,
        },
        _ => {
            warn!("Invalid telemetry {}: {:?}, using worst case", field, value);
            worst
        }
    }
}
