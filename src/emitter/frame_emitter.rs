use super::sink::{DeliveredFrame, FrameProvider, FrameSink};
use super::stats::EmitterStats;
use crate::config::EmitterConfig;
use crate::error::{FlowcastError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Continuously moves frames from a provider to one sink.
///
/// The emitter never waits on the source: when no frame is due it sleeps the
/// idle backoff and polls again.
pub struct FrameEmitter {
    id: Uuid,
    provider: Arc<dyn FrameProvider>,
    sink: Arc<dyn FrameSink>,
    config: EmitterConfig,
    stats: Arc<Mutex<EmitterStats>>,
}

impl FrameEmitter {
    pub fn new(
        provider: Arc<dyn FrameProvider>,
        sink: Arc<dyn FrameSink>,
        config: EmitterConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider,
            sink,
            config,
            stats: Arc::new(Mutex::new(EmitterStats::started())),
        }
    }

    /// Run on a new task until `token` is cancelled or the sink closes
    pub fn spawn(self, token: CancellationToken) -> EmitterHandle {
        let id = self.id;
        let stats = Arc::clone(&self.stats);
        let task_token = token.clone();
        let join = tokio::spawn(async move { self.run(task_token).await });

        EmitterHandle {
            id,
            token,
            join,
            stats,
        }
    }

    async fn run(self, token: CancellationToken) {
        let backoff = self.config.idle_backoff();
        let stats_interval = Duration::from_secs(self.config.stats_interval_secs.max(1));
        let mut last_report = Instant::now();

        info!("Emitter {} started for sink '{}'", self.id, self.sink.name());

        loop {
            if token.is_cancelled() {
                break;
            }
            if self.sink.is_closed() {
                info!("Sink '{}' closed, stopping emitter {}", self.sink.name(), self.id);
                break;
            }

            match self.provider.next_delivery().await {
                Ok(Some(DeliveredFrame { frame, info })) => {
                    match self.sink.send_frame(&frame, &info).await {
                        Ok(()) => self.stats.lock().update_frame_stats(frame.len()),
                        Err(e) => {
                            warn!("Emitter {} failed to deliver frame {}: {}", self.id, frame.sequence, e);
                            self.stats.lock().record_failed_frame();
                        }
                    }
                }
                Err(e) => {
                    warn!("Emitter {} could not read stream info: {}", self.id, e);
                    self.stats.lock().record_failed_frame();
                }
                Ok(None) => {
                    self.stats.lock().record_idle_poll();
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }

            if last_report.elapsed() >= stats_interval {
                let stats = self.stats.lock().clone();
                info!(
                    "Emitter {} stats: {} frames, {:.1} FPS, {:.2} MB sent, {} failed",
                    self.id,
                    stats.frames_sent,
                    stats.average_fps(),
                    stats.bytes_sent as f64 / 1_048_576.0,
                    stats.frames_failed
                );
                last_report = Instant::now();
            }
        }

        debug!("Emitter {} loop exited", self.id);
    }
}

/// Control handle of a running emitter
pub struct EmitterHandle {
    id: Uuid,
    token: CancellationToken,
    join: JoinHandle<()>,
    stats: Arc<Mutex<EmitterStats>>,
}

impl EmitterHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn stats(&self) -> EmitterStats {
        self.stats.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// Cancel and wait up to `limit` for the loop to exit
    pub async fn stop(self, limit: Duration) -> Result<EmitterStats> {
        self.token.cancel();
        match timeout(limit, self.join).await {
            Ok(Ok(())) => {
                info!("Emitter {} stopped", self.id);
                Ok(self.stats.lock().clone())
            }
            Ok(Err(e)) => Err(FlowcastError::component(
                "emitter",
                format!("emitter {} panicked: {}", self.id, e),
            )),
            Err(_) => Err(FlowcastError::component(
                "emitter",
                format!("emitter {} stop timeout", self.id),
            )),
        }
    }
}
