use super::adaptive::AdaptiveTask;
use super::feed::SourceFeed;
use super::types::{ComponentState, ControlMode, MetricsReport, StreamInfo};
use crate::config::FlowcastConfig;
use crate::emitter::{EmitterHandle, FrameEmitter, FrameSink};
use crate::error::{FlowcastError, Result};
use crate::frame::EncodedFrame;
use crate::metrics::{MetricsAggregator, NetworkSample, SmoothedMetrics, TelemetryReport};
use crate::quality::{QualityChange, QualityDecisionEngine, QualityLevel};
use crate::source::{
    backend_from_config, CaptureBackend, DeviceSource, FileSource, Reconfigure, SourceKind,
    StreamSource,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Owns the active source and the control mode, and drives quality changes
/// from either manual requests or the adaptive loop.
pub struct StreamController {
    pub(super) config: FlowcastConfig,
    pub(super) backend: Arc<dyn CaptureBackend>,
    pub(super) feed: SourceFeed,
    /// The file source survives swaps to the device and is reopened on return
    pub(super) file_source: Arc<StreamSource>,

    // Lifecycle management
    pub(super) adaptive_task: Mutex<Option<AdaptiveTask>>,
    pub(super) emitters: Mutex<Vec<EmitterHandle>>,
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) cancellation_token: CancellationToken,
    pub(super) shut_down: AtomicBool,
}

impl StreamController {
    /// Create a controller with the capture backend selected in `config`
    pub async fn new(config: FlowcastConfig) -> Result<Self> {
        let backend = backend_from_config(&config.capture)?;
        Self::with_backend(config, backend).await
    }

    /// Create a controller on an explicit capture backend.
    ///
    /// The file source is always opened; the device is only opened when it is
    /// the initial source. Any open failure here is returned.
    pub async fn with_backend(
        config: FlowcastConfig,
        backend: Arc<dyn CaptureBackend>,
    ) -> Result<Self> {
        config.validate()?;

        let engine = QualityDecisionEngine::from_config(&config.quality)?;
        let level = engine.current_quality();
        let metrics = Arc::new(MetricsAggregator::new(config.metrics.window_size));

        let file_source = {
            let file_config = config.file.clone();
            let thresholds = config.quality.thresholds.clone();
            let jpeg_quality = config.encoding.jpeg_quality.clone();
            let backend = Arc::clone(&backend);
            tokio::task::spawn_blocking(move || {
                FileSource::open(file_config, thresholds, jpeg_quality, backend, level)
            })
            .await
            .map_err(|e| FlowcastError::system(format!("File source open task failed: {}", e)))??
        };
        let file_source = Arc::new(StreamSource::File(file_source));

        let initial = match config.controller.initial_source {
            SourceKind::File => Arc::clone(&file_source),
            SourceKind::Device => {
                file_source.release();
                let device = Self::open_device(&config, &backend, level).await?;
                Arc::new(StreamSource::Device(device))
            }
        };

        info!(
            "Stream controller initialized: source={}, quality={}, backend={}",
            initial.kind(),
            level,
            backend.name()
        );

        let cancellation_token = CancellationToken::new();
        Ok(Self {
            feed: SourceFeed {
                active: Arc::new(tokio::sync::RwLock::new(initial)),
                engine: Arc::new(parking_lot::Mutex::new(engine)),
                metrics,
                mode: Arc::new(RwLock::new(ControlMode::Manual)),
                applied: Arc::new(parking_lot::Mutex::new(Some(level))),
                shutdown: cancellation_token.clone(),
            },
            config,
            backend,
            file_source,
            adaptive_task: Mutex::new(None),
            emitters: Mutex::new(Vec::new()),
            component_states: Arc::new(Mutex::new(HashMap::new())),
            cancellation_token,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Enter the configured initial control mode
    pub async fn start(&self) -> Result<()> {
        let mode = self.config.controller.initial_mode;
        self.set_control_mode(mode).await?;
        info!("Stream controller started in {} mode", mode);
        Ok(())
    }

    async fn open_device(
        config: &FlowcastConfig,
        backend: &Arc<dyn CaptureBackend>,
        level: QualityLevel,
    ) -> Result<DeviceSource> {
        let device_config = config.device.clone();
        let thresholds = config.quality.thresholds.clone();
        let jpeg_quality = config.encoding.jpeg_quality.clone();
        let backend = Arc::clone(backend);

        tokio::task::spawn_blocking(move || {
            DeviceSource::open(device_config, thresholds, jpeg_quality, backend, level)
        })
        .await
        .map_err(|e| FlowcastError::system(format!("Device open task failed: {}", e)))?
    }

    /// Make `kind` ready to produce frames at `level`
    async fn activate(&self, kind: SourceKind, level: QualityLevel) -> Result<Arc<StreamSource>> {
        match kind {
            SourceKind::File => {
                let file_source = Arc::clone(&self.file_source);
                tokio::task::spawn_blocking(move || match file_source.as_file() {
                    Some(file) => file.reopen(level),
                    None => Err(FlowcastError::system("file source slot holds a device")),
                })
                .await
                .map_err(|e| FlowcastError::system(format!("File reopen task failed: {}", e)))??;
                Ok(Arc::clone(&self.file_source))
            }
            SourceKind::Device => {
                let device = Self::open_device(&self.config, &self.backend, level).await?;
                Ok(Arc::new(StreamSource::Device(device)))
            }
        }
    }

    /// Switch the active source.
    ///
    /// Waits for in-flight reads, releases the current handle, then opens the
    /// target at the engine's current quality. If the target cannot be opened
    /// the previous source is reactivated and the error is returned.
    pub async fn set_source(&self, kind: SourceKind) -> Result<bool> {
        let mut active = self.feed.active.write().await;
        if self.cancellation_token.is_cancelled() {
            return Err(FlowcastError::component(
                "source",
                "cannot set source: controller is shut down",
            ));
        }
        if active.kind() == kind {
            return Ok(false);
        }

        let previous = Arc::clone(&active);
        let previous_kind = previous.kind();
        let level = self.feed.engine.lock().current_quality();

        let released = {
            let previous = Arc::clone(&previous);
            tokio::task::spawn_blocking(move || previous.release())
                .await
                .map_err(|e| FlowcastError::system(format!("Source release task failed: {}", e)))?
        };
        info!(
            "Switching source {} -> {} (previous handle released: {})",
            previous_kind, kind, released
        );

        match self.activate(kind, level).await {
            Ok(source) => {
                *active = source;
                *self.feed.applied.lock() = Some(level);
                info!("Active source is now {} at quality {}", kind, level);
                Ok(true)
            }
            Err(e) => {
                error!("Failed to activate {} source: {}", kind, e);
                match self.activate(previous_kind, level).await {
                    Ok(source) => {
                        *active = source;
                        *self.feed.applied.lock() = Some(level);
                        warn!("Reactivated previous {} source", previous_kind);
                    }
                    Err(restore) => {
                        *self.feed.applied.lock() = None;
                        error!(
                            "Failed to reactivate {} source: {}; no frames available",
                            previous_kind, restore
                        );
                    }
                }
                Err(e)
            }
        }
    }

    pub async fn source_kind(&self) -> SourceKind {
        self.feed.active.read().await.kind()
    }

    pub fn control_mode(&self) -> ControlMode {
        self.feed.control_mode()
    }

    /// Change who decides quality; returns whether the mode changed.
    ///
    /// The mode flag and the loop's lifecycle change under the same
    /// `adaptive_task` lock, so concurrent calls settle on a consistent pair.
    pub async fn set_control_mode(&self, mode: ControlMode) -> Result<bool> {
        let mut slot = self.adaptive_task.lock().await;
        if self.cancellation_token.is_cancelled() {
            return Err(FlowcastError::component(
                "adaptive",
                "cannot set control mode: controller is shut down",
            ));
        }

        let previous = std::mem::replace(&mut *self.feed.mode.write(), mode);
        if previous == mode {
            // Still make sure the loop exists when adaptive was requested
            if mode == ControlMode::Adaptive {
                self.start_adaptive_loop(&mut slot).await?;
            }
            return Ok(false);
        }

        info!("Control mode {} -> {}", previous, mode);
        match mode {
            ControlMode::Adaptive => self.start_adaptive_loop(&mut slot).await?,
            ControlMode::Manual => self.stop_adaptive_loop(&mut slot).await,
        }
        Ok(true)
    }

    /// Apply a quality level to the active source and record it as a manual
    /// change. The engine only follows when the source took the level.
    pub async fn set_quality(&self, level: QualityLevel) -> Result<Reconfigure> {
        let (outcome, held) = self.feed.apply_quality(level).await?;
        if !outcome.is_applied() {
            warn!("Manual quality {} not applied, source holds {}", level, held);
            return Ok(outcome);
        }
        if self.feed.engine.lock().force(level, Instant::now()) {
            info!("Quality manually set to {}", level);
        }
        Ok(outcome)
    }

    /// Seek the active file to `position` in `[0, 1]`; returns the frame index
    pub async fn seek(&self, position: f64) -> Result<u64> {
        self.feed
            .mutate_active("seek", move |source| source.playback("seek")?.seek(position))
            .await?
    }

    pub async fn set_playing(&self, playing: bool) -> Result<()> {
        self.feed
            .mutate_active("set playing", move |source| {
                source.playback("set_playing")?.set_playing(playing);
                Ok(())
            })
            .await?
    }

    pub async fn set_speed(&self, speed: f64) -> Result<()> {
        self.feed
            .mutate_active("set speed", move |source| source.playback("set_speed")?.set_speed(speed))
            .await?
    }

    pub async fn get_stream_info(&self) -> Result<StreamInfo> {
        self.feed.stream_info().await
    }

    pub fn get_metrics(&self) -> MetricsReport {
        let smoothed = self.feed.metrics.current();
        let engine = self.feed.engine.lock();
        let level = engine.current_quality();

        MetricsReport {
            bandwidth: smoothed.bandwidth,
            latency: smoothed.latency,
            packet_loss: smoothed.packet_loss,
            current_quality: level,
            resolution: engine.resolution_of(level),
            bitrate_kbps: engine.bitrate_of(level),
            samples: self.feed.metrics.len(),
        }
    }

    /// Most recent quality changes, oldest first
    pub fn get_quality_history(&self, limit: usize) -> Vec<QualityChange> {
        self.feed.engine.lock().history(limit)
    }

    /// Ingest a telemetry report; invalid fields count as worst case
    pub fn record_metrics(&self, report: TelemetryReport) -> SmoothedMetrics {
        self.record_sample(report.into_sample())
    }

    pub fn record_sample(&self, sample: NetworkSample) -> SmoothedMetrics {
        self.feed.metrics.record(sample);
        self.feed.metrics.current()
    }

    pub async fn read_frame(&self) -> Option<EncodedFrame> {
        self.feed.read_frame().await
    }

    pub fn metrics(&self) -> Arc<MetricsAggregator> {
        Arc::clone(&self.feed.metrics)
    }

    /// Handle on the active source for frame consumers
    pub fn feed(&self) -> SourceFeed {
        self.feed.clone()
    }

    /// Start a frame emitter delivering to `sink`
    pub async fn spawn_emitter(&self, sink: Arc<dyn FrameSink>) -> Result<Uuid> {
        if self.cancellation_token.is_cancelled() {
            return Err(FlowcastError::component(
                "emitter",
                "controller is shutting down",
            ));
        }

        let handle = FrameEmitter::new(
            Arc::new(self.feed.clone()),
            sink,
            self.config.emitter.clone(),
        )
        .spawn(self.cancellation_token.child_token());
        let id = handle.id();

        self.set_component_state(&format!("emitter-{}", id), ComponentState::Running)
            .await;
        self.emitters.lock().await.push(handle);
        Ok(id)
    }

    /// Stop one emitter; returns whether it existed
    pub async fn stop_emitter(&self, id: Uuid) -> bool {
        let handle = {
            let mut emitters = self.emitters.lock().await;
            match emitters.iter().position(|handle| handle.id() == id) {
                Some(index) => emitters.swap_remove(index),
                None => return false,
            }
        };

        let name = format!("emitter-{}", id);
        let state = match handle.stop(self.config.controller.shutdown_timeout()).await {
            Ok(_) => ComponentState::Stopped,
            Err(e) => {
                warn!("{}", e);
                ComponentState::Failed
            }
        };
        self.set_component_state(&name, state).await;
        true
    }

    pub async fn emitter_count(&self) -> usize {
        self.emitters.lock().await.len()
    }
}
