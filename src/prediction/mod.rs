//! Tier 3: prediction generation, refresh, sizing and audit snapshots.

mod generator;
mod sizing;
mod snapshot;

pub use generator::{
    build_generation_context, eligible_analysts, should_refresh, GenerationContext,
    PredictionGenerator,
};
pub use sizing::{recommended_quantity, risk_fraction, stop_distance, PositionSizing, SYSTEM_USER};
pub use snapshot::{build_llm_ensemble, SnapshotContext, SnapshotWriter};
