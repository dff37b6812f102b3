//! Pipeline composition site.
//!
//! Every component takes its collaborators through constructor parameters;
//! this module is the single place that wires them together. Embedders with
//! their own storage or providers can reuse the individual constructors
//! directly.

use std::sync::Arc;

use crate::analysts::AnalystRegistry;
use crate::clock::{Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::crawler::CrawlerBridge;
use crate::ensemble::EnsembleEngine;
use crate::events::{EventBus, EventSink, TracingEventSink};
use crate::ingest::SignalIngestor;
use crate::llm::{LlmGateway, LlmProvider, TierResolver, UnlimitedUsage, UsageLimiter};
use crate::outcome::OutcomeRecorder;
use crate::pool::PredictorPool;
use crate::prediction::{PredictionGenerator, SnapshotWriter};
use crate::repo::{PositionsPort, PriceSource, UnpricedSource};
use crate::resilience::{HealthRegistry, Retrier};
use crate::store::SqliteStore;

/// Builder wiring the sqlite store into a complete pipeline.
pub struct PipelineBuilder {
    store: Arc<SqliteStore>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    config: PipelineConfig,
    resolver: TierResolver,
    limiter: Arc<dyn UsageLimiter>,
    providers: Vec<Arc<dyn LlmProvider>>,
    crawler: Option<Arc<dyn CrawlerBridge>>,
    positions: Option<Arc<dyn PositionsPort>>,
    price_source: Arc<dyn PriceSource>,
}

impl PipelineBuilder {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            sink: Arc::new(TracingEventSink),
            config: PipelineConfig::default(),
            resolver: TierResolver::new(),
            limiter: Arc::new(UnlimitedUsage::new()),
            providers: Vec::new(),
            crawler: None,
            positions: None,
            price_source: Arc::new(UnpricedSource),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_tier_resolver(mut self, resolver: TierResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_usage_limiter(mut self, limiter: Arc<dyn UsageLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_crawler(mut self, crawler: Arc<dyn CrawlerBridge>) -> Self {
        self.crawler = Some(crawler);
        self
    }

    pub fn with_positions(mut self, positions: Arc<dyn PositionsPort>) -> Self {
        self.positions = Some(positions);
        self
    }

    pub fn with_price_source(mut self, price_source: Arc<dyn PriceSource>) -> Self {
        self.price_source = price_source;
        self
    }

    pub fn build(self) -> Pipeline {
        let health = Arc::new(HealthRegistry::new());
        let retrier = Retrier::new(health.clone());
        let events = Arc::new(EventBus::new(self.sink, self.clock.clone()));

        let mut gateway = LlmGateway::new(
            self.resolver,
            self.limiter.clone(),
            retrier.clone(),
            self.config.retry.clone(),
        );
        for provider in self.providers {
            gateway = gateway.with_provider(provider);
        }
        let gateway = Arc::new(gateway);

        let registry = Arc::new(AnalystRegistry::new(self.store.clone()));
        let engine = Arc::new(EnsembleEngine::new(
            gateway.clone(),
            registry.clone(),
            self.store.clone(),
        ));

        let pool = Arc::new(PredictorPool::new(
            self.store.clone(),
            events.clone(),
            self.clock.clone(),
            self.config.threshold.clone(),
        ));

        let snapshot_writer = SnapshotWriter::new(self.store.clone(), self.clock.clone());
        let mut generator = PredictionGenerator::new(
            self.store.clone(),
            self.store.clone(),
            pool.clone(),
            engine.clone(),
            registry.clone(),
            snapshot_writer,
            self.store.clone(),
            self.price_source,
            events.clone(),
            self.clock.clone(),
            self.config.generation.clone(),
            self.config.threshold.clone(),
            self.config.ensemble.clone(),
        );
        if let Some(positions) = self.positions {
            generator = generator.with_positions(positions);
        }

        let mut ingestor = SignalIngestor::new(
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            engine.clone(),
            retrier.clone(),
            self.clock.clone(),
            self.config.ingest.clone(),
            self.config.ensemble.clone(),
        )
        .with_retry_config(self.config.retry.clone());
        if let Some(crawler) = self.crawler {
            ingestor = ingestor.with_crawler(crawler);
        }

        let outcomes = OutcomeRecorder::new(self.store.clone(), self.clock.clone());

        Pipeline {
            ingestor: Arc::new(ingestor),
            pool,
            generator: Arc::new(generator),
            outcomes: Arc::new(outcomes),
            engine,
            registry,
            gateway,
            events,
            health,
            usage: self.limiter,
            retrier,
            store: self.store,
        }
    }
}

/// The assembled pipeline.
pub struct Pipeline {
    pub ingestor: Arc<SignalIngestor>,
    pub pool: Arc<PredictorPool>,
    pub generator: Arc<PredictionGenerator>,
    pub outcomes: Arc<OutcomeRecorder>,
    pub engine: Arc<EnsembleEngine>,
    pub registry: Arc<AnalystRegistry>,
    pub gateway: Arc<LlmGateway>,
    pub events: Arc<EventBus>,
    pub health: Arc<HealthRegistry>,
    pub usage: Arc<dyn UsageLimiter>,
    pub retrier: Retrier,
    pub store: Arc<SqliteStore>,
}

impl Pipeline {
    pub fn builder(store: Arc<SqliteStore>) -> PipelineBuilder {
        PipelineBuilder::new(store)
    }
}
