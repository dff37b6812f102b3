//! Tier 1: article → signal → predictor.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::{EnsembleOptions, IngestConfig};
use crate::crawler::{CrawlerBridge, ScrapeOptions};
use crate::domain::{
    Article, Direction, Predictor, Signal, SignalMetadata, SourceSubscription, Target,
};
use crate::ensemble::{EnsembleEngine, EnsembleInput, EnsembleResult};
use crate::error::{Error, Result};
use crate::repo::{
    PredictorRepository, SignalRepository, SourceSubscriptionRepository, TargetRepository,
};
use crate::resilience::{Retrier, RetryConfig};

use super::filter::{is_relevant, passes_keyword_filter, passes_test_routing};

/// Service label the crawler bridge reports health under.
const CRAWLER_SERVICE: &str = "firecrawl";

/// Outcome of one batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSummary {
    /// Originating subscription, or `all` for target-centric runs.
    pub subscription_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub articles_processed: usize,
    pub predictors_created: usize,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ProcessSummary {
    fn new(subscription_id: impl Into<String>, target_id: Option<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            target_id,
            articles_processed: 0,
            predictors_created: 0,
            errors: Vec::new(),
        }
    }

    fn absorb(&mut self, other: ProcessSummary) {
        self.articles_processed += other.articles_processed;
        self.predictors_created += other.predictors_created;
        self.errors.extend(other.errors);
    }
}

/// Tier-1 ingestor: pulls new articles per subscription, filters them,
/// runs the single-fork ensemble and creates gated predictors.
pub struct SignalIngestor {
    subscriptions: Arc<dyn SourceSubscriptionRepository>,
    targets: Arc<dyn TargetRepository>,
    signals: Arc<dyn SignalRepository>,
    predictors: Arc<dyn PredictorRepository>,
    engine: Arc<EnsembleEngine>,
    crawler: Option<Arc<dyn CrawlerBridge>>,
    retrier: Retrier,
    retry_config: RetryConfig,
    clock: Arc<dyn Clock>,
    config: IngestConfig,
    ensemble_options: EnsembleOptions,
}

impl SignalIngestor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        subscriptions: Arc<dyn SourceSubscriptionRepository>,
        targets: Arc<dyn TargetRepository>,
        signals: Arc<dyn SignalRepository>,
        predictors: Arc<dyn PredictorRepository>,
        engine: Arc<EnsembleEngine>,
        retrier: Retrier,
        clock: Arc<dyn Clock>,
        config: IngestConfig,
        ensemble_options: EnsembleOptions,
    ) -> Self {
        Self {
            subscriptions,
            targets,
            signals,
            predictors,
            engine,
            crawler: None,
            retrier,
            retry_config: RetryConfig::default(),
            clock,
            config,
            ensemble_options,
        }
    }

    /// Attach a crawler bridge used to backfill empty article bodies.
    pub fn with_crawler(mut self, crawler: Arc<dyn CrawlerBridge>) -> Self {
        self.crawler = Some(crawler);
        self
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Process one subscription's new articles since its watermark.
    pub async fn process_subscription(
        &self,
        subscription_id: &str,
        limit: Option<usize>,
    ) -> Result<ProcessSummary> {
        let subscription = self.subscriptions.find_by_id(subscription_id).await?;
        let target = self.targets.find_by_id(&subscription.target_id).await?;
        self.process_one_subscription(&subscription, &target, limit)
            .await
    }

    /// Process every active subscription feeding one target, advancing each
    /// watermark independently.
    pub async fn process_target(
        &self,
        target_id: &str,
        limit: Option<usize>,
    ) -> Result<ProcessSummary> {
        let target = self.targets.find_by_id(target_id).await?;
        let subscriptions = self.subscriptions.find_active_by_target(target_id).await?;

        let mut summary = ProcessSummary::new("all", Some(target_id.to_string()));
        for subscription in &subscriptions {
            let sub_summary = self
                .process_one_subscription(subscription, &target, limit)
                .await?;
            summary.absorb(sub_summary);
        }
        Ok(summary)
    }

    async fn process_one_subscription(
        &self,
        subscription: &SourceSubscription,
        target: &Target,
        limit: Option<usize>,
    ) -> Result<ProcessSummary> {
        let limit = limit
            .or(subscription.default_limit)
            .unwrap_or(self.config.default_limit);

        let articles = self
            .subscriptions
            .get_new_articles(subscription, limit)
            .await?;

        let mut summary =
            ProcessSummary::new(subscription.id.clone(), Some(target.id.clone()));
        if articles.is_empty() {
            return Ok(summary);
        }

        // Repository order is ascending first_seen_at; keep the max for the
        // watermark advance after the batch.
        let max_seen = articles
            .iter()
            .map(|a| a.first_seen_at)
            .max()
            .unwrap_or_else(|| self.clock.now());

        for article in &articles {
            summary.articles_processed += 1;
            match self.process_article(subscription, target, article).await {
                Ok(created) => {
                    if created {
                        summary.predictors_created += 1;
                    }
                }
                Err(error) => summary
                    .errors
                    .push(format!("article {}: {}", article.id, error)),
            }
        }

        // Advance only when the batch actually processed articles; the
        // repository keeps the watermark monotonic.
        self.subscriptions
            .update_watermark(&subscription.id, max_seen)
            .await?;

        info!(
            subscription = %subscription.id,
            target = %target.id,
            articles = summary.articles_processed,
            predictors = summary.predictors_created,
            errors = summary.errors.len(),
            "processed ingestion batch"
        );
        Ok(summary)
    }

    /// Handle one article. Returns true when a predictor was created.
    async fn process_article(
        &self,
        subscription: &SourceSubscription,
        target: &Target,
        article: &Article,
    ) -> Result<bool> {
        if !passes_keyword_filter(
            article,
            &subscription.keywords_include,
            &subscription.keywords_exclude,
        ) {
            debug!(article = %article.id, "keyword filter rejected article");
            return Ok(false);
        }
        if !passes_test_routing(article, target) {
            debug!(article = %article.id, target = %target.id, "test routing skipped article");
            return Ok(false);
        }

        let article = self.ensure_body(article).await?;
        if !is_relevant(&article, target) {
            debug!(article = %article.id, target = %target.symbol, "article not relevant");
            return Ok(false);
        }

        // Idempotency: a signal for this (target, content) already exists,
        // so redelivery changes nothing.
        if self
            .signals
            .exists(&target.id, &article.content_hash)
            .await?
        {
            debug!(article = %article.id, "duplicate content, skipping");
            return Ok(false);
        }

        let input = EnsembleInput::new(target.id.clone(), article.body().to_string())
            .with_metadata(json!({
                "headline": article.title,
                "key_phrases": article.key_phrases,
                "url": article.url,
            }));

        // An ensemble failure downgrades the signal to neutral and emits no
        // predictor; the error still reaches the batch summary.
        let (direction, ensemble, ensemble_error) = match self
            .engine
            .run_ensemble(target, &input, &self.ensemble_options, "tier1.scan")
            .await
        {
            Ok(result) => (result.aggregated.direction, Some(result), None),
            Err(error) => (Direction::Neutral, None, Some(error)),
        };

        self.record_signal(target, &article, direction).await?;

        let Some(ensemble) = ensemble else {
            return Err(ensemble_error.unwrap_or_else(|| Error::Internal("ensemble missing".into())));
        };

        if ensemble.aggregated.confidence < self.config.min_confidence
            || ensemble.aggregated.consensus_strength < self.config.min_consensus
        {
            debug!(
                article = %article.id,
                confidence = ensemble.aggregated.confidence,
                consensus = ensemble.aggregated.consensus_strength,
                "ensemble below predictor gate"
            );
            return Ok(false);
        }

        // A racing redelivery may have produced the predictor between the
        // signal check and here.
        if self
            .predictors
            .exists_for_article(&target.id, &article.id)
            .await?
        {
            return Ok(false);
        }

        let predictor = self.build_predictor(target, &article, &ensemble);
        self.predictors.create(&predictor).await?;
        debug!(
            article = %article.id,
            predictor = %predictor.id,
            direction = %predictor.direction,
            strength = predictor.strength,
            "created predictor"
        );
        Ok(true)
    }

    /// Backfill an empty body through the crawler bridge, when configured.
    async fn ensure_body(&self, article: &Article) -> Result<Article> {
        if !article.body().is_empty() {
            return Ok(article.clone());
        }
        let Some(crawler) = &self.crawler else {
            return Ok(article.clone());
        };

        let options = ScrapeOptions::default();
        let outcome = self
            .retrier
            .execute_with_retry(CRAWLER_SERVICE, &self.retry_config, || {
                crawler.scrape(&article.url, &options)
            })
            .await?;

        let mut filled = article.clone();
        if let Some(data) = outcome.data {
            filled.content = data.markdown.or(data.html);
        }
        Ok(filled)
    }

    async fn record_signal(
        &self,
        target: &Target,
        article: &Article,
        direction: Direction,
    ) -> Result<()> {
        let mut signal = Signal::new(
            target.id.clone(),
            article.source_id.clone(),
            article.url.clone(),
            article.body().to_string(),
            direction,
            self.clock.now(),
        )
        .with_metadata(SignalMetadata {
            headline: Some(article.title.clone()),
            key_phrases: article.key_phrases.clone(),
            content_hash: Some(article.content_hash.clone()),
            extra: Default::default(),
        });
        signal.is_test = article.is_test;
        self.signals.create(&signal).await
    }

    fn build_predictor(
        &self,
        target: &Target,
        article: &Article,
        ensemble: &EnsembleResult,
    ) -> Predictor {
        // Attribute the predictor to the strongest voice agreeing with the
        // aggregate; fall back to the ensemble itself.
        let slug = ensemble
            .voting_assessments()
            .filter(|a| a.direction == ensemble.aggregated.direction)
            .max_by(|a, b| {
                (a.effective_weight * a.confidence)
                    .partial_cmp(&(b.effective_weight * b.confidence))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|a| a.analyst.clone())
            .unwrap_or_else(|| "ensemble".to_string());

        let strength = (ensemble.aggregated.confidence * 10.0).round().clamp(1.0, 10.0) as u8;

        Predictor::new(
            target.id.clone(),
            article.id.clone(),
            slug,
            ensemble.aggregated.direction,
            strength,
            ensemble.aggregated.confidence,
            ensemble.aggregated.reasoning.clone(),
            self.clock.now(),
            self.config.predictor_ttl_hours,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysts::{Analyst, AnalystRegistry};
    use crate::clock::ManualClock;
    use crate::domain::TargetType;
    use crate::llm::{
        LlmGateway, LlmProvider, ModelTier, ProviderKind, ScriptedProvider, TierResolver,
        UnlimitedUsage,
    };
    use crate::resilience::HealthRegistry;
    use crate::store::SqliteStore;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    struct Fixture {
        store: Arc<SqliteStore>,
        provider: Arc<ScriptedProvider>,
        ingestor: SignalIngestor,
        clock: Arc<ManualClock>,
        target: Target,
        subscription: SourceSubscription,
    }

    /// Millisecond-precise base instant; sqlite timestamps round-trip at
    /// millisecond precision.
    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    /// Tier overrides routing every tier to the scripted local provider.
    fn all_local() -> crate::llm::TierOverrides {
        let mut overrides = crate::llm::TierOverrides::new();
        for tier in ModelTier::ALL {
            overrides = overrides.with_tier(
                tier,
                crate::llm::LlmAssignment::new(ProviderKind::Local, "scripted"),
            );
        }
        overrides
    }

    async fn fixture() -> Fixture {
        let now = base_time();
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(now));

        let target = Target::new("u-1", "AAPL", "Apple Inc.", TargetType::Equity);
        store.save_target(&target).unwrap();
        store
            .save_analyst(&Analyst::new(
                "technical-analyst",
                "Technical Analyst",
                "momentum lens",
                1.0,
                ModelTier::Silver,
            ))
            .unwrap();

        let subscription = SourceSubscription::new("src-1", target.id.clone());
        store.save_subscription(&subscription).unwrap();

        let provider = Arc::new(ScriptedProvider::new(
            ProviderKind::Local,
            r#"{"direction": "bullish", "confidence": 0.8, "reasoning": "beat"}"#,
        ));
        let retrier = Retrier::new(Arc::new(HealthRegistry::new()));
        let gateway = Arc::new(
            LlmGateway::new(
                TierResolver::new().with_agent_overrides(all_local()),
                Arc::new(UnlimitedUsage::new()),
                retrier.clone(),
                RetryConfig::default().with_max_retries(0),
            )
            .with_provider(provider.clone() as Arc<dyn LlmProvider>),
        );

        let registry = Arc::new(AnalystRegistry::new(store.clone()));
        let engine = Arc::new(EnsembleEngine::new(gateway, registry, store.clone()));

        let ingestor = SignalIngestor::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            engine,
            retrier,
            clock.clone(),
            IngestConfig::default(),
            EnsembleOptions::default(),
        );

        Fixture {
            store,
            provider,
            ingestor,
            clock,
            target,
            subscription,
        }
    }

    fn article(seen: chrono::DateTime<Utc>, title: &str, body: &str) -> Article {
        Article::new("src-1", "https://news.example/a", title, Some(body.into()), seen)
    }

    #[tokio::test]
    async fn test_happy_path_creates_signal_and_predictor() {
        let f = fixture().await;
        let now = f.clock.now();
        crate::repo::ArticleRepository::insert(
            f.store.as_ref(),
            &article(now, "AAPL beats estimates", "Apple Inc. raised guidance."),
        )
        .await
        .unwrap();

        let summary = f
            .ingestor
            .process_subscription(&f.subscription.id, None)
            .await
            .unwrap();

        assert_eq!(summary.articles_processed, 1);
        assert_eq!(summary.predictors_created, 1);
        assert!(summary.errors.is_empty());

        let active = crate::repo::PredictorRepository::find_active_by_target(
            f.store.as_ref(),
            &f.target.id,
        )
        .await
        .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].direction, Direction::Bullish);
        assert_eq!(active[0].strength, 8);

        // Watermark advanced to the article's first_seen_at.
        let sub = crate::repo::SourceSubscriptionRepository::find_by_id(
            f.store.as_ref(),
            &f.subscription.id,
        )
        .await
        .unwrap();
        assert_eq!(sub.last_processed_at, Some(now));
    }

    #[tokio::test]
    async fn test_idempotent_reingestion() {
        // Scenario S5: the second run re-reads the boundary article but
        // creates nothing new and leaves the watermark unchanged.
        let f = fixture().await;
        let now = f.clock.now();
        crate::repo::ArticleRepository::insert(
            f.store.as_ref(),
            &article(now, "AAPL beats estimates", "Apple Inc. raised guidance."),
        )
        .await
        .unwrap();

        let first = f
            .ingestor
            .process_subscription(&f.subscription.id, None)
            .await
            .unwrap();
        assert_eq!(first.predictors_created, 1);

        let second = f
            .ingestor
            .process_subscription(&f.subscription.id, None)
            .await
            .unwrap();
        assert_eq!(second.articles_processed, 1);
        assert_eq!(second.predictors_created, 0);
        assert!(second.errors.is_empty());

        let sub = crate::repo::SourceSubscriptionRepository::find_by_id(
            f.store.as_ref(),
            &f.subscription.id,
        )
        .await
        .unwrap();
        assert_eq!(sub.last_processed_at, Some(now));
    }

    #[tokio::test]
    async fn test_irrelevant_article_creates_nothing() {
        let f = fixture().await;
        crate::repo::ArticleRepository::insert(
            f.store.as_ref(),
            &article(f.clock.now(), "Banana futures rally", "nothing about the target"),
        )
        .await
        .unwrap();

        let summary = f
            .ingestor
            .process_subscription(&f.subscription.id, None)
            .await
            .unwrap();
        assert_eq!(summary.articles_processed, 1);
        assert_eq!(summary.predictors_created, 0);
        assert_eq!(f.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_test_article_does_not_reach_production_target() {
        let f = fixture().await;
        crate::repo::ArticleRepository::insert(
            f.store.as_ref(),
            &article(f.clock.now(), "AAPL synthetic scenario", "Apple Inc. test").as_test(),
        )
        .await
        .unwrap();

        let summary = f
            .ingestor
            .process_subscription(&f.subscription.id, None)
            .await
            .unwrap();
        assert_eq!(summary.predictors_created, 0);
        assert_eq!(f.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_low_confidence_gate_blocks_predictor() {
        let f = fixture().await;
        f.provider
            .push_response(r#"{"direction": "bullish", "confidence": 0.3, "reasoning": "weak"}"#);
        crate::repo::ArticleRepository::insert(
            f.store.as_ref(),
            &article(f.clock.now(), "AAPL drifting", "Apple Inc. unchanged."),
        )
        .await
        .unwrap();

        let summary = f
            .ingestor
            .process_subscription(&f.subscription.id, None)
            .await
            .unwrap();
        assert_eq!(summary.predictors_created, 0);
        // The signal still landed.
        let signals = crate::repo::SignalRepository::find_by_target(
            f.store.as_ref(),
            &f.target.id,
            10,
        )
        .await
        .unwrap();
        assert_eq!(signals.len(), 1);
    }

    #[tokio::test]
    async fn test_watermark_advances_per_subscription_on_target_runs() {
        let f = fixture().await;
        let now = f.clock.now();

        // A second source feeding the same target.
        let other_sub =
            SourceSubscription::new("src-2", f.target.id.clone());
        f.store.save_subscription(&other_sub).unwrap();

        crate::repo::ArticleRepository::insert(
            f.store.as_ref(),
            &article(now, "AAPL beats estimates", "Apple Inc. raised guidance."),
        )
        .await
        .unwrap();
        let late = now + Duration::hours(2);
        crate::repo::ArticleRepository::insert(
            f.store.as_ref(),
            &Article::new("src-2", "https://news.example/b", "AAPL follow-up", Some("Apple Inc. again.".into()), late),
        )
        .await
        .unwrap();

        let summary = f.ingestor.process_target(&f.target.id, None).await.unwrap();
        assert_eq!(summary.subscription_id, "all");
        assert_eq!(summary.articles_processed, 2);

        let sub1 = crate::repo::SourceSubscriptionRepository::find_by_id(
            f.store.as_ref(),
            &f.subscription.id,
        )
        .await
        .unwrap();
        let sub2 = crate::repo::SourceSubscriptionRepository::find_by_id(
            f.store.as_ref(),
            &other_sub.id,
        )
        .await
        .unwrap();
        assert_eq!(sub1.last_processed_at, Some(now));
        assert_eq!(sub2.last_processed_at, Some(late));
    }
}
