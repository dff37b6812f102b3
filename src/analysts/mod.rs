//! Analyst roles, fork-scoped context versions and the registry.

mod registry;
mod types;

pub use registry::{synthesize_arbitrator_version, AnalystRegistry};
pub use types::{Analyst, AnalystContextVersion, ForkType, Learning, PerformanceStatus};
