//! # sentinel-core
//!
//! Event-driven prediction pipeline for financial targets. External
//! crawlers deposit articles; the core turns them into weighted directional
//! opinions ("predictors") through an ensemble of LLM-backed analyst roles
//! and, once a per-target threshold is met, emits a timestamped prediction
//! backed by an immutable audit snapshot.
//!
//! ## Core Components
//!
//! - **Ingest (Tier 1)**: relevance filtering, ensemble scoring, predictor
//!   creation
//! - **Pool (Tier 2)**: per-target active set, expiry sweep, time-decay
//!   weighted threshold evaluation
//! - **Prediction (Tier 3)**: three-way fork ensemble, per-analyst and
//!   arbitrator rows, refresh-on-shift, snapshots
//! - **Resilience**: bounded retries with jittered backoff and per-service
//!   health tracking
//! - **LLM**: tier resolution, usage limiting and local-provider fallback
//!
//! ## Example
//!
//! ```rust,ignore
//! use sentinel_core::{Pipeline, SqliteStore, GenerationContext};
//! use std::sync::Arc;
//!
//! let store = Arc::new(SqliteStore::open("pipeline.db")?);
//! let pipeline = Pipeline::builder(store)
//!     .with_provider(my_llm_provider)
//!     .build();
//!
//! let summary = pipeline.ingestor.process_subscription("sub-1", None).await?;
//! let prediction = pipeline
//!     .generator
//!     .attempt_prediction_generation(&GenerationContext::system(), "target-1", None)
//!     .await?;
//! ```

pub mod analysts;
pub mod clock;
pub mod config;
pub mod crawler;
pub mod domain;
pub mod ensemble;
pub mod error;
pub mod events;
pub mod ingest;
pub mod llm;
pub mod outcome;
pub mod pipeline;
pub mod pool;
pub mod prediction;
pub mod repo;
pub mod resilience;
pub mod store;

// Re-exports for convenience
pub use analysts::{
    synthesize_arbitrator_version, Analyst, AnalystContextVersion, AnalystRegistry, ForkType,
    Learning, PerformanceStatus,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    AggregationMethod, EnsembleOptions, GenerationConfig, IngestConfig, PipelineConfig,
    ThresholdConfig, TierPreference,
};
pub use crawler::{
    validate_scrape_url, CrawlerBridge, HttpCrawler, ScrapeData, ScrapeOptions, ScrapeOutcome,
    StaticCrawler,
};
pub use domain::{
    content_hash_of, fingerprint_of, Article, ContextVersionIds, Direction, Magnitude,
    Prediction, PredictionPatch, PredictionSnapshot, PredictionStatus, Predictor,
    PredictorCapture, PredictorStatus, Signal, SignalMetadata, SourceSubscription, Target,
    TargetSnapshot, TargetType, TimelineEvent, TrendDirection, ARBITRATOR_SLUG,
    TEST_SYMBOL_PREFIX,
};
pub use ensemble::{
    aggregate, agreement_fraction, build_prompt, extract_json_object, parse_assessment,
    AggregatedOutcome, Assessment, EnsembleEngine, EnsembleInput, EnsembleResult, ForkAgreement,
    ParsedAssessment, PromptPair, ThreeWayForkResult, WeightedVote,
};
pub use error::{Error, Result};
pub use events::{
    EventBus, EventSink, MemoryEventSink, PipelineEvent, PipelineEventType, TracingEventSink,
};
pub use ingest::{ProcessSummary, SignalIngestor};
pub use llm::{
    builtin_default, estimate_tokens, estimated_output_tokens, GatewayRequest, GatewayResponse,
    LlmAssignment, LlmGateway, LlmProvider, LlmResponse, LocalHttpProvider, LocalProviderConfig,
    ModelTier, ProviderKind, ResolutionSource, ScriptedProvider, TierOverrides, TierResolution,
    TierResolver, TokenBudgetLimiter, UnlimitedUsage, UsageDecision, UsageLimiter, UsageReport,
    UsageTally, BUILTIN_LOCAL_MODEL, DEFAULT_LLM_MODEL_ENV,
};
pub use outcome::{OutcomeRecorder, PredictionOutcome};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use pool::{decay_weight, PredictorPool, PredictorStats, ThresholdEvaluation};
pub use prediction::{
    build_generation_context, build_llm_ensemble, eligible_analysts, recommended_quantity,
    risk_fraction, should_refresh, stop_distance, GenerationContext, PositionSizing,
    PredictionGenerator, SnapshotContext, SnapshotWriter, SYSTEM_USER,
};
pub use repo::{
    AnalystRepository, ArticleRepository, LearningRepository, PositionRequest, PositionsPort,
    PredictionQueryOptions, PredictionRepository, PredictorRepository, PriceSource,
    SignalRepository, SnapshotRepository, SourceSubscriptionRepository, TargetRepository,
    TargetSnapshotRepository, UnpricedSource,
};
pub use resilience::{HealthRegistry, HealthReport, HealthStatus, Retrier, RetryConfig};
pub use store::SqliteStore;
