use super::feed::SourceFeed;
use super::types::{ComponentState, ControlMode};
use super::StreamController;
use crate::error::{FlowcastError, Result};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A running adaptive loop
pub(super) struct AdaptiveTask {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl AdaptiveTask {
    fn is_running(&self) -> bool {
        !self.join.is_finished()
    }

    /// Cancel and wait up to `limit` for the loop to exit
    pub(super) async fn stop(self, limit: Duration) -> Result<()> {
        self.token.cancel();
        match timeout(limit, self.join).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(FlowcastError::component(
                "adaptive",
                format!("adaptive loop panicked: {}", e),
            )),
            Err(_) => Err(FlowcastError::component(
                "adaptive",
                "adaptive loop stop timeout",
            )),
        }
    }
}

/// Poll metrics through the engine and push changed levels into the source
async fn run_adaptive_loop(feed: SourceFeed, poll_interval: Duration, token: CancellationToken) {
    info!("Adaptive quality loop started (poll interval {:?})", poll_interval);

    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        if feed.control_mode() != ControlMode::Adaptive {
            break;
        }

        let metrics = feed.metrics.current();
        let decided = feed.engine.lock().decide(&metrics, Instant::now());
        let applied = *feed.applied.lock();

        match applied {
            Some(level) if level == decided => {
                debug!("Adaptive loop: staying at {} ({:?})", decided, metrics);
                continue;
            }
            Some(level) => info!(
                "Adaptive loop: {} -> {} (bandwidth {} Mbps, latency {} ms, loss {}%)",
                level, decided, metrics.bandwidth, metrics.latency, metrics.packet_loss
            ),
            None => info!("Adaptive loop: source has no frames, retrying at {}", decided),
        }

        match feed.apply_quality(decided).await {
            Ok((outcome, _)) if outcome.is_applied() => {}
            Ok((outcome, held)) => {
                // Keep the engine on the level the source actually holds
                debug!("Adaptive quality {} not applied ({:?})", decided, outcome);
                feed.engine.lock().fall_back(held, Instant::now());
            }
            Err(e) => error!("Failed to apply adaptive quality {}: {}", decided, e),
        }
    }

    info!("Adaptive quality loop stopped");
}

impl StreamController {
    /// Spawn the adaptive loop into `slot` unless one is already running.
    /// Callers hold the `adaptive_task` lock.
    pub(super) async fn start_adaptive_loop(&self, slot: &mut Option<AdaptiveTask>) -> Result<()> {
        if self.cancellation_token.is_cancelled() {
            return Err(FlowcastError::component(
                "adaptive",
                "controller is shutting down",
            ));
        }

        if slot.as_ref().is_some_and(AdaptiveTask::is_running) {
            return Ok(());
        }

        let token = self.cancellation_token.child_token();
        let join = tokio::spawn(run_adaptive_loop(
            self.feed.clone(),
            self.config.controller.poll_interval(),
            token.clone(),
        ));
        *slot = Some(AdaptiveTask { token, join });

        self.set_component_state("adaptive", ComponentState::Running)
            .await;
        Ok(())
    }

    /// Cancel the loop held in `slot` and wait for it to exit
    pub(super) async fn stop_adaptive_loop(&self, slot: &mut Option<AdaptiveTask>) {
        let Some(task) = slot.take() else {
            return;
        };

        self.set_component_state("adaptive", ComponentState::Stopping)
            .await;
        match task.stop(self.config.controller.shutdown_timeout()).await {
            Ok(()) => {
                self.set_component_state("adaptive", ComponentState::Stopped)
                    .await
            }
            Err(e) => {
                warn!("{}", e);
                self.set_component_state("adaptive", ComponentState::Failed)
                    .await
            }
        }
    }

    pub async fn adaptive_loop_running(&self) -> bool {
        self.adaptive_task
            .lock()
            .await
            .as_ref()
            .is_some_and(AdaptiveTask::is_running)
    }
}
