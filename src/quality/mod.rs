mod engine;
mod level;

pub use engine::{ChangeReason, QualityChange, QualityDecisionEngine, QualityDecisionState, HISTORY_CAPACITY};
pub use level::{validate_thresholds, QualityLevel, QualityTable, QualityThreshold, ThresholdTable};
