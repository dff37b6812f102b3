//! Core data model: targets, articles, signals, predictors, predictions.
//!
//! Every loose direction/magnitude string from upstream normalizes into the
//! closed enums here at ingress; storage and pipeline code only ever handle
//! the typed forms.

mod article;
mod direction;
mod market;
mod prediction;
mod predictor;
mod signal;
mod snapshot;
mod subscription;
mod target;

pub use article::{content_hash_of, fingerprint_of, Article};
pub use direction::{Direction, Magnitude, TrendDirection};
pub use market::TargetSnapshot;
pub use prediction::{
    ContextVersionIds, Prediction, PredictionPatch, PredictionStatus, ARBITRATOR_SLUG,
};
pub use predictor::{Predictor, PredictorStatus};
pub use signal::{Signal, SignalMetadata};
pub use snapshot::{PredictionSnapshot, PredictorCapture, TimelineEvent};
pub use subscription::SourceSubscription;
pub use target::{Target, TargetType, TEST_SYMBOL_PREFIX};
