use super::level::{validate_thresholds, QualityLevel, QualityThreshold, ThresholdTable};
use crate::config::QualityConfig;
use crate::error::Result;
use crate::metrics::SmoothedMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Maximum number of retained quality changes
pub const HISTORY_CAPACITY: usize = 100;

/// What caused a quality change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeReason {
    Initial,
    Adaptive,
    Manual,
    /// A decided level could not be applied and the source kept another one
    Fallback,
}

/// A recorded quality change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityChange {
    pub level: QualityLevel,
    pub reason: ChangeReason,
    pub at: DateTime<Utc>,
}

/// Mutable decision state, owned by a single engine
#[derive(Debug, Clone)]
pub struct QualityDecisionState {
    pub current_quality: QualityLevel,
    pub last_change_time: Instant,
    history: VecDeque<QualityChange>,
}

impl QualityDecisionState {
    fn new(initial: QualityLevel, now: Instant) -> Self {
        let mut history = VecDeque::with_capacity(HISTORY_CAPACITY);
        history.push_back(QualityChange {
            level: initial,
            reason: ChangeReason::Initial,
            at: Utc::now(),
        });

        Self {
            current_quality: initial,
            last_change_time: now,
            history,
        }
    }

    fn apply(&mut self, level: QualityLevel, reason: ChangeReason, now: Instant) {
        self.current_quality = level;
        self.last_change_time = now;
        self.history.push_back(QualityChange {
            level,
            reason,
            at: Utc::now(),
        });
        while self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }
    }
}

/// Turns smoothed network metrics into a stable quality level.
///
/// The candidate level is the highest one whose thresholds are all met, with
/// `low` as the floor. A candidate that differs from the current level is only
/// applied once `stability_period` has elapsed since the previous change, so
/// noise around a threshold cannot make the stream oscillate.
#[derive(Debug, Clone)]
pub struct QualityDecisionEngine {
    thresholds: ThresholdTable,
    stability_period: Duration,
    state: QualityDecisionState,
}

impl QualityDecisionEngine {
    /// Create an engine; fails if the threshold table is inconsistent
    pub fn new(
        thresholds: ThresholdTable,
        stability_period: Duration,
        initial: QualityLevel,
        now: Instant,
    ) -> Result<Self> {
        validate_thresholds(&thresholds)?;

        info!(
            "Quality decision engine initialized at '{}' (stability period {:?})",
            initial, stability_period
        );

        Ok(Self {
            thresholds,
            stability_period,
            state: QualityDecisionState::new(initial, now),
        })
    }

    pub fn from_config(config: &QualityConfig) -> Result<Self> {
        Self::new(
            config.thresholds.clone(),
            config.stability_period(),
            config.default_level,
            Instant::now(),
        )
    }

    /// Highest level whose thresholds are met, ignoring hysteresis
    pub fn candidate_for(&self, metrics: &SmoothedMetrics) -> QualityLevel {
        self.thresholds
            .iter()
            .rev()
            .find(|(_, threshold)| threshold.is_met_by(metrics))
            .map(|(level, _)| level)
            .unwrap_or(QualityLevel::Low)
    }

    /// Decide the quality for `metrics` observed at `now`
    pub fn decide(&mut self, metrics: &SmoothedMetrics, now: Instant) -> QualityLevel {
        let candidate = self.candidate_for(metrics);
        let current = self.state.current_quality;

        if candidate == current {
            return current;
        }

        let elapsed = now.saturating_duration_since(self.state.last_change_time);
        if elapsed >= self.stability_period {
            info!(
                "Quality change: {} -> {} (bandwidth {} Mbps, latency {} ms, loss {}%)",
                current, candidate, metrics.bandwidth, metrics.latency, metrics.packet_loss
            );
            self.state.apply(candidate, ChangeReason::Adaptive, now);
            candidate
        } else {
            debug!(
                "Quality change {} -> {} suppressed: {:.2}s < {:.2}s stability period",
                current,
                candidate,
                elapsed.as_secs_f64(),
                self.stability_period.as_secs_f64()
            );
            current
        }
    }

    /// Set the level directly, bypassing the stability period.
    ///
    /// Returns `true` if the level changed.
    pub fn force(&mut self, level: QualityLevel, now: Instant) -> bool {
        if level == self.state.current_quality {
            return false;
        }

        info!(
            "Manually setting quality: {} -> {}",
            self.state.current_quality, level
        );
        self.state.apply(level, ChangeReason::Manual, now);
        true
    }

    /// Record that the source ended up at `level` instead of the decided one.
    ///
    /// Restarts the stability period, so a failed level is retried no sooner
    /// than one period later. Returns `true` if the level changed.
    pub fn fall_back(&mut self, level: QualityLevel, now: Instant) -> bool {
        if level == self.state.current_quality {
            return false;
        }

        warn!(
            "Quality {} could not be applied, falling back to {}",
            self.state.current_quality, level
        );
        self.state.apply(level, ChangeReason::Fallback, now);
        true
    }

    pub fn current_quality(&self) -> QualityLevel {
        self.state.current_quality
    }

    pub fn last_change_time(&self) -> Instant {
        self.state.last_change_time
    }

    pub fn stability_period(&self) -> Duration {
        self.stability_period
    }

    pub fn thresholds(&self) -> &ThresholdTable {
        &self.thresholds
    }

    pub fn threshold_of(&self, level: QualityLevel) -> &QualityThreshold {
        self.thresholds.get(level)
    }

    pub fn resolution_of(&self, level: QualityLevel) -> (u32, u32) {
        self.thresholds.get(level).resolution
    }

    pub fn bitrate_of(&self, level: QualityLevel) -> u32 {
        self.thresholds.get(level).bitrate_kbps
    }

    /// Most recent `limit` changes, oldest first
    pub fn history(&self, limit: usize) -> Vec<QualityChange> {
        let skip = self.state.history.len().saturating_sub(limit);
        self.state.history.iter().skip(skip).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.state.history.len()
    }
}
