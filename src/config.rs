use crate::controller::{ControlMode, SourceKind};
use crate::error::Result;
use crate::quality::{validate_thresholds, QualityLevel, QualityTable, ThresholdTable};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Placeholder replaced by the per-quality tier suffix in file paths
pub const TIER_PLACEHOLDER: &str = "{tier}";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct FlowcastConfig {
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub encoding: EncodingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub file: FileConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub emitter: EmitterConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QualityConfig {
    /// Level used until the first decision is made
    #[serde(default = "default_quality_level")]
    pub default_level: QualityLevel,

    /// Minimum time between two adaptive changes, in seconds
    #[serde(default = "default_stability_period_secs")]
    pub stability_period_secs: f64,

    /// Resolution, bitrate and admission limits per level
    #[serde(default)]
    pub thresholds: ThresholdTable,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EncodingConfig {
    /// JPEG quality (1-100) used for each level
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: QualityTable<u8>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MetricsConfig {
    /// Number of samples averaged by the aggregator
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ControllerConfig {
    /// Adaptive loop poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_initial_mode")]
    pub initial_mode: ControlMode,

    #[serde(default = "default_initial_source")]
    pub initial_source: SourceKind,

    /// Per-task join timeout during shutdown, in seconds
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FileConfig {
    /// Video path; `{tier}` is replaced with the tier of the current level
    #[serde(default = "default_path_template")]
    pub path_template: String,

    /// Tier suffix per level (e.g. "720" for `clip_720.mp4`)
    #[serde(default = "default_tiers")]
    pub tiers: QualityTable<String>,

    /// Nominal playback frame rate
    #[serde(default = "default_fps")]
    pub fps: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DeviceConfig {
    /// Camera device index (e.g., 0 for /dev/video0)
    #[serde(default)]
    pub index: u32,

    #[serde(default = "default_fps")]
    pub fps: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmitterConfig {
    /// Sleep between polls when no frame is due, in milliseconds
    #[serde(default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,

    /// Capacity of the broadcast sink channel
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    /// Interval between emitter statistics log lines, in seconds
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Generated frames, no media or hardware required
    TestPattern,
    /// GStreamer pipelines (requires the `gstreamer` feature)
    Gstreamer,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptureConfig {
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// Length of generated "files" for the test pattern backend
    #[serde(default = "default_test_pattern_frames")]
    pub test_pattern_frames: u64,

    /// Native size of generated "files" for the test pattern backend
    #[serde(default = "default_test_pattern_resolution")]
    pub test_pattern_resolution: (u32, u32),
}

impl QualityConfig {
    pub fn stability_period(&self) -> Duration {
        Duration::from_secs_f64(self.stability_period_secs.max(0.0))
    }
}

impl ControllerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl FileConfig {
    /// Concrete path of the file backing `level`
    pub fn path_for(&self, level: QualityLevel) -> String {
        self.path_template
            .replace(TIER_PLACEHOLDER, self.tiers.get(level))
    }
}

impl EmitterConfig {
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

impl FlowcastConfig {
    /// Load configuration from defaults, an optional file and `FLOWCAST__*` variables
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigError> {
        Self::load_with_env(
            path,
            Environment::with_prefix("FLOWCAST")
                .separator("__")
                .try_parsing(true),
        )
    }

    fn load_with_env<P: AsRef<Path>>(
        path: P,
        environment: Environment,
    ) -> std::result::Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .add_source(Config::try_from(&FlowcastConfig::default())?)
            .add_source(File::with_name(&path_str).required(false))
            .add_source(environment)
            .build()?;

        let config: FlowcastConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        validate_thresholds(&self.quality.thresholds)?;

        if !self.quality.stability_period_secs.is_finite() || self.quality.stability_period_secs < 0.0 {
            return Err(ConfigError::Message(
                "Quality stability_period_secs must be a finite, non-negative number".to_string(),
            ));
        }

        for (level, quality) in self.encoding.jpeg_quality.iter() {
            if !(1..=100).contains(quality) {
                return Err(ConfigError::Message(format!(
                    "JPEG quality for '{}' must be between 1 and 100",
                    level
                )));
            }
        }

        if self.metrics.window_size == 0 {
            return Err(ConfigError::Message(
                "Metrics window_size must be greater than 0".to_string(),
            ));
        }

        if self.controller.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Controller poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.controller.shutdown_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Controller shutdown_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.file.path_template.trim().is_empty() {
            return Err(ConfigError::Message(
                "File path_template must not be empty".to_string(),
            ));
        }

        if self.file.tiers.iter().any(|(_, tier)| tier.trim().is_empty()) {
            return Err(ConfigError::Message(
                "File tiers must not be empty".to_string(),
            ));
        }

        if self.file.fps == 0 || self.device.fps == 0 {
            return Err(ConfigError::Message(
                "File and device fps must be greater than 0".to_string(),
            ));
        }

        if self.emitter.broadcast_capacity == 0 {
            return Err(ConfigError::Message(
                "Emitter broadcast_capacity must be greater than 0".to_string(),
            ));
        }

        if self.capture.test_pattern_frames == 0 {
            return Err(ConfigError::Message(
                "Capture test_pattern_frames must be greater than 0".to_string(),
            ));
        }

        let (width, height) = self.capture.test_pattern_resolution;
        if width == 0 || height == 0 {
            return Err(ConfigError::Message(
                "Capture test_pattern_resolution must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            default_level: default_quality_level(),
            stability_period_secs: default_stability_period_secs(),
            thresholds: ThresholdTable::default(),
        }
    }
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            initial_mode: default_initial_mode(),
            initial_source: default_initial_source(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path_template: default_path_template(),
            tiers: default_tiers(),
            fps: default_fps(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            index: 0,
            fps: default_fps(),
        }
    }
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            idle_backoff_ms: default_idle_backoff_ms(),
            broadcast_capacity: default_broadcast_capacity(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            test_pattern_frames: default_test_pattern_frames(),
            test_pattern_resolution: default_test_pattern_resolution(),
        }
    }
}

// Default value functions
fn default_quality_level() -> QualityLevel {
    QualityLevel::Medium
}
fn default_stability_period_secs() -> f64 {
    2.0
}
fn default_jpeg_quality() -> QualityTable<u8> {
    QualityTable::new(70, 85, 95)
}

fn default_window_size() -> usize {
    crate::metrics::DEFAULT_WINDOW_SIZE
}

fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_initial_mode() -> ControlMode {
    ControlMode::Manual
}
fn default_initial_source() -> SourceKind {
    SourceKind::File
}
fn default_shutdown_timeout_secs() -> u64 {
    5
}

fn default_path_template() -> String {
    "videos/sample_{tier}.mp4".to_string()
}
fn default_tiers() -> QualityTable<String> {
    QualityTable::new("240".to_string(), "360".to_string(), "720".to_string())
}
fn default_fps() -> u32 {
    30
}

fn default_idle_backoff_ms() -> u64 {
    5
}
fn default_broadcast_capacity() -> usize {
    16
}
fn default_stats_interval_secs() -> u64 {
    30
}

fn default_backend() -> BackendKind {
    BackendKind::TestPattern
}
fn default_test_pattern_frames() -> u64 {
    300
}
fn default_test_pattern_resolution() -> (u32, u32) {
    (640, 360)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env_from(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::with_prefix("FLOWCAST")
            .separator("__")
            .try_parsing(true)
            .source(Some(map))
    }

    #[test]
    fn test_default_config() {
        let config = FlowcastConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.quality.default_level, QualityLevel::Medium);
        assert_eq!(config.quality.stability_period(), Duration::from_secs(2));
        assert_eq!(config.encoding.jpeg_quality, QualityTable::new(70, 85, 95));
        assert_eq!(config.controller.poll_interval(), Duration::from_secs(2));
        assert_eq!(config.emitter.idle_backoff(), Duration::from_millis(5));
    }

    #[test]
    fn test_path_for_uses_tier() {
        let config = FileConfig::default();
        assert_eq!(config.path_for(QualityLevel::Low), "videos/sample_240.mp4");
        assert_eq!(config.path_for(QualityLevel::High), "videos/sample_720.mp4");
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");

        let config = FlowcastConfig::load_with_env(&path, env_from(&[])).unwrap();
        assert_eq!(config.metrics.window_size, 10);
        assert_eq!(config.quality.thresholds, ThresholdTable::default());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[quality]
default_level = "high"
stability_period_secs = 0.5

[quality.thresholds.low]
resolution = [320, 180]
bitrate_kbps = 250
min_bandwidth = 0.0
max_latency = 600.0
max_packet_loss = 15.0

[controller]
initial_mode = "adaptive"
initial_source = "camera"

[file]
path_template = "/srv/media/demo_{{tier}}.mp4"
"#
        )
        .unwrap();

        let config = FlowcastConfig::load_with_env(file.path(), env_from(&[])).unwrap();
        assert_eq!(config.quality.default_level, QualityLevel::High);
        assert_eq!(config.quality.stability_period(), Duration::from_millis(500));
        assert_eq!(config.quality.thresholds.low.resolution, (320, 180));
        // untouched levels keep their defaults
        assert_eq!(config.quality.thresholds.high.resolution, (1920, 1080));
        assert_eq!(config.controller.initial_mode, ControlMode::Adaptive);
        assert_eq!(config.controller.initial_source, SourceKind::Device);
        assert_eq!(config.file.path_for(QualityLevel::Medium), "/srv/media/demo_360.mp4");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_environment_variable_override() {
        let dir = tempfile::tempdir().unwrap();
        let env = env_from(&[
            ("FLOWCAST__METRICS__WINDOW_SIZE", "4"),
            ("FLOWCAST__DEVICE__INDEX", "2"),
        ]);

        let config = FlowcastConfig::load_with_env(dir.path().join("none.toml"), env).unwrap();
        assert_eq!(config.metrics.window_size, 4);
        assert_eq!(config.device.index, 2);
    }

    #[test]
    fn test_config_validation() {
        let mut config = FlowcastConfig::default();

        config.quality.thresholds.high.min_bandwidth = 1.0;
        assert!(config.validate().is_err());
        config.quality.thresholds = ThresholdTable::default();

        config.encoding.jpeg_quality.low = 0;
        assert!(config.validate().is_err());
        config.encoding.jpeg_quality.low = 70;

        config.metrics.window_size = 0;
        assert!(config.validate().is_err());
        config.metrics.window_size = 10;

        config.quality.stability_period_secs = f64::NAN;
        assert!(config.validate().is_err());
        config.quality.stability_period_secs = 2.0;

        config.file.fps = 0;
        assert!(config.validate().is_err());
        config.file.fps = 30;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let rendered = FlowcastConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[quality.thresholds.medium]"));

        let parsed: FlowcastConfig = toml::from_str(&rendered).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.file.path_template, "videos/sample_{tier}.mp4");
    }
}
