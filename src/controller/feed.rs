use super::types::{ControlMode, StreamInfo};
use crate::emitter::{DeliveredFrame, FrameProvider};
use crate::error::{FlowcastError, Result};
use crate::frame::EncodedFrame;
use crate::metrics::MetricsAggregator;
use crate::quality::{QualityDecisionEngine, QualityLevel};
use crate::source::{Reconfigure, SourceInfo, StreamSource};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared view of the active source used by emitters and the adaptive loop.
///
/// Readers hold the active-source read lock for the whole duration of a
/// source call, so a swap (write lock) waits for in-flight reads.
#[derive(Clone)]
pub struct SourceFeed {
    pub(super) active: Arc<tokio::sync::RwLock<Arc<StreamSource>>>,
    pub(super) engine: Arc<Mutex<QualityDecisionEngine>>,
    pub(super) metrics: Arc<MetricsAggregator>,
    pub(super) mode: Arc<RwLock<ControlMode>>,
    /// Level the active source is known to hold; `None` while it has no
    /// working capture handle
    pub(super) applied: Arc<Mutex<Option<QualityLevel>>>,
    /// Cancelled once the controller shuts down
    pub(super) shutdown: CancellationToken,
}

impl SourceFeed {
    /// Run a (possibly blocking) read-only call against the active source
    pub(super) async fn with_active<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&StreamSource) -> T + Send + 'static,
    {
        let guard = Arc::clone(&self.active).read_owned().await;
        tokio::task::spawn_blocking(move || f(&guard))
            .await
            .map_err(|e| FlowcastError::component("source", format!("source task failed: {}", e)))
    }

    /// Like [`with_active`](Self::with_active), but refused once shutdown has
    /// begun. The check happens under the read lock, and shutdown releases
    /// handles under the write lock, so nothing can reopen a released handle.
    pub(super) async fn mutate_active<T, F>(&self, operation: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&StreamSource) -> T + Send + 'static,
    {
        let guard = Arc::clone(&self.active).read_owned().await;
        if self.shutdown.is_cancelled() {
            return Err(FlowcastError::component(
                "source",
                format!("cannot {}: controller is shut down", operation),
            ));
        }
        tokio::task::spawn_blocking(move || f(&guard))
            .await
            .map_err(|e| FlowcastError::component("source", format!("source task failed: {}", e)))
    }

    /// Push `level` into the active source; returns the outcome and the level
    /// the source is labelled with afterwards.
    ///
    /// `applied` follows what the source actually holds: the new level on
    /// success, the kept level when the previous configuration was restored,
    /// and `None` when the source was left without a handle.
    pub(super) async fn apply_quality(
        &self,
        level: QualityLevel,
    ) -> Result<(Reconfigure, QualityLevel)> {
        let (outcome, held) = self
            .mutate_active("set quality", move |source| {
                let outcome = source.set_quality(level);
                (outcome, source.quality())
            })
            .await?;

        let mut applied = self.applied.lock();
        match outcome {
            Reconfigure::Unchanged => {
                debug!("Active source already at {}", level);
                *applied = Some(level);
            }
            Reconfigure::Relabelled | Reconfigure::Reopened => {
                info!("Applied quality {} to active source", level);
                *applied = Some(level);
            }
            Reconfigure::Retained => {
                warn!("Quality {} could not be applied, source kept {}", level, held);
                *applied = Some(held);
            }
            Reconfigure::Unavailable => {
                warn!("Quality {} could not be applied, source has no frames", level);
                *applied = None;
            }
        }
        Ok((outcome, held))
    }

    pub fn control_mode(&self) -> ControlMode {
        *self.mode.read()
    }

    pub async fn read_frame(&self) -> Option<EncodedFrame> {
        match self.with_active(|source| source.read_frame()).await {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Frame read failed: {}", e);
                None
            }
        }
    }

    fn snapshot(&self, source: SourceInfo) -> StreamInfo {
        let control_mode = self.control_mode();
        let network_metrics = match control_mode {
            ControlMode::Adaptive => Some(self.metrics.current()),
            ControlMode::Manual => None,
        };
        let bitrate_kbps = self.engine.lock().bitrate_of(source.quality());

        StreamInfo {
            source,
            control_mode,
            network_metrics,
            bitrate_kbps,
        }
    }

    pub async fn stream_info(&self) -> Result<StreamInfo> {
        let source = self.with_active(|source| source.info()).await?;
        Ok(self.snapshot(source))
    }
}

#[async_trait]
impl FrameProvider for SourceFeed {
    async fn next_frame(&self) -> Option<EncodedFrame> {
        self.read_frame().await
    }

    async fn stream_info(&self) -> Result<StreamInfo> {
        SourceFeed::stream_info(self).await
    }

    /// Frame and source info are taken under one read guard, so a swap can
    /// never pair a frame with the other source's info
    async fn next_delivery(&self) -> Result<Option<DeliveredFrame>> {
        let read = self
            .with_active(|source| source.read_frame().map(|frame| (frame, source.info())))
            .await?;

        Ok(read.map(|(frame, source)| DeliveredFrame {
            frame,
            info: self.snapshot(source),
        }))
    }
}
