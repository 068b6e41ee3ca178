use super::{ComponentState, StreamController};
use crate::error::{FlowcastError, Result};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info};

impl StreamController {
    /// Stop every task and release every capture handle.
    ///
    /// Returns the process exit code: 0 when everything stopped within its
    /// timeout, 1 otherwise. Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<i32> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(0);
        }

        info!("Beginning graceful shutdown");

        // Cancel all background tasks
        self.cancellation_token.cancel();

        let limit = self.config.controller.shutdown_timeout();
        let mut exit_code = 0;

        let emitters: Vec<_> = self.emitters.lock().await.drain(..).collect();
        for handle in emitters {
            let name = format!("emitter-{}", handle.id());
            match handle.stop(limit).await {
                Ok(stats) => {
                    info!(
                        "{} stopped after {} frames ({} bytes)",
                        name, stats.frames_sent, stats.bytes_sent
                    );
                    self.set_component_state(&name, ComponentState::Stopped)
                        .await;
                }
                Err(e) => {
                    error!("Error stopping {}: {}", name, e);
                    self.set_component_state(&name, ComponentState::Failed)
                        .await;
                    exit_code = 1;
                }
            }
        }

        let adaptive = self.adaptive_task.lock().await.take();
        if let Some(task) = adaptive {
            match task.stop(limit).await {
                Ok(()) => {
                    self.set_component_state("adaptive", ComponentState::Stopped)
                        .await
                }
                Err(e) => {
                    error!("Error stopping adaptive loop: {}", e);
                    self.set_component_state("adaptive", ComponentState::Failed)
                        .await;
                    exit_code = 1;
                }
            }
        }

        if let Err(e) = self.release_sources().await {
            error!("Error releasing sources: {}", e);
            exit_code = 1;
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    /// Release the active source and the retained file source
    async fn release_sources(&self) -> Result<()> {
        let active = self.feed.active.write().await;
        let sources = [Arc::clone(&active), Arc::clone(&self.file_source)];

        let released = tokio::task::spawn_blocking(move || {
            sources
                .iter()
                .filter(|source| source.release())
                .map(|source| source.kind())
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| FlowcastError::system(format!("Source release task failed: {}", e)))?;

        drop(active);
        info!("Released capture handles: {:?}", released);
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}
