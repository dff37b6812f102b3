//! Tier 1: article ingestion into signals and gated predictors.

mod filter;
mod ingestor;

pub use filter::{is_relevant, passes_keyword_filter, passes_test_routing};
pub use ingestor::{ProcessSummary, SignalIngestor};
