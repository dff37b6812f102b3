//! Tier 2: per-target predictor pool, expiration sweep and time-decay
//! weighted threshold evaluation.

#[allow(clippy::module_inception)]
mod pool;
mod threshold;

pub use pool::{PredictorPool, PredictorStats};
pub use threshold::{decay_weight, evaluate, ThresholdEvaluation};
