//! SQLite-backed implementation of every repository contract.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::analysts::{Analyst, AnalystContextVersion, ForkType, Learning, PerformanceStatus};
use crate::domain::{
    Article, ContextVersionIds, Direction, Magnitude, Prediction, PredictionPatch,
    PredictionSnapshot, PredictionStatus, Predictor, PredictorStatus, Signal, SignalMetadata,
    SourceSubscription, Target, TargetSnapshot, TargetType, TrendDirection,
};
use crate::error::{Error, Result};
use crate::llm::{ModelTier, TierOverrides};
use crate::repo::{
    AnalystRepository, ArticleRepository, LearningRepository, PredictionQueryOptions,
    PredictionRepository, PredictorRepository, SignalRepository, SnapshotRepository,
    SourceSubscriptionRepository, TargetRepository, TargetSnapshotRepository,
};

use super::schema::{initialize_schema, is_initialized};

/// Fixed-width RFC3339 with millisecond precision; lexicographic order
/// equals chronological order, which the watermark queries rely on.
fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn conv_err(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn parse_ts(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conv_err(format!("invalid timestamp '{raw}': {e}")))
}

fn parse_json<T: serde::de::DeserializeOwned>(raw: Option<String>) -> rusqlite::Result<Option<T>> {
    match raw {
        None => Ok(None),
        Some(raw) if raw.is_empty() => Ok(None),
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| conv_err(format!("invalid json column: {e}"))),
    }
}

fn direction_from_sql(raw: &str) -> rusqlite::Result<Direction> {
    match raw {
        "bullish" => Ok(Direction::Bullish),
        "bearish" => Ok(Direction::Bearish),
        "neutral" => Ok(Direction::Neutral),
        other => Err(conv_err(format!("invalid direction '{other}'"))),
    }
}

fn trend_from_sql(raw: &str) -> rusqlite::Result<TrendDirection> {
    match raw {
        "up" => Ok(TrendDirection::Up),
        "down" => Ok(TrendDirection::Down),
        "flat" => Ok(TrendDirection::Flat),
        other => Err(conv_err(format!("invalid trend direction '{other}'"))),
    }
}

fn magnitude_from_sql(raw: &str) -> rusqlite::Result<Magnitude> {
    match raw {
        "small" => Ok(Magnitude::Small),
        "medium" => Ok(Magnitude::Medium),
        "large" => Ok(Magnitude::Large),
        other => Err(conv_err(format!("invalid magnitude '{other}'"))),
    }
}

fn predictor_status_from_sql(raw: &str) -> rusqlite::Result<PredictorStatus> {
    match raw {
        "active" => Ok(PredictorStatus::Active),
        "consumed" => Ok(PredictorStatus::Consumed),
        "expired" => Ok(PredictorStatus::Expired),
        other => Err(conv_err(format!("invalid predictor status '{other}'"))),
    }
}

fn prediction_status_from_sql(raw: &str) -> rusqlite::Result<PredictionStatus> {
    match raw {
        "active" => Ok(PredictionStatus::Active),
        "resolved" => Ok(PredictionStatus::Resolved),
        "expired" => Ok(PredictionStatus::Expired),
        "cancelled" => Ok(PredictionStatus::Cancelled),
        other => Err(conv_err(format!("invalid prediction status '{other}'"))),
    }
}

fn target_type_from_sql(raw: &str) -> rusqlite::Result<TargetType> {
    match raw {
        "equity" => Ok(TargetType::Equity),
        "crypto" => Ok(TargetType::Crypto),
        "forex" => Ok(TargetType::Forex),
        "commodity" => Ok(TargetType::Commodity),
        "other" => Ok(TargetType::Other),
        other => Err(conv_err(format!("invalid target type '{other}'"))),
    }
}

fn tier_from_sql(raw: &str) -> rusqlite::Result<ModelTier> {
    match raw {
        "bronze" => Ok(ModelTier::Bronze),
        "silver" => Ok(ModelTier::Silver),
        "gold" => Ok(ModelTier::Gold),
        "platinum" => Ok(ModelTier::Platinum),
        other => Err(conv_err(format!("invalid tier '{other}'"))),
    }
}

fn fork_from_sql(raw: &str) -> rusqlite::Result<ForkType> {
    match raw {
        "user" => Ok(ForkType::User),
        "ai" => Ok(ForkType::Ai),
        "arbitrator" => Ok(ForkType::Arbitrator),
        other => Err(conv_err(format!("invalid fork type '{other}'"))),
    }
}

fn performance_from_sql(raw: &str) -> rusqlite::Result<PerformanceStatus> {
    match raw {
        "active" => Ok(PerformanceStatus::Active),
        "probation" => Ok(PerformanceStatus::Probation),
        "suspended" => Ok(PerformanceStatus::Suspended),
        other => Err(conv_err(format!("invalid performance status '{other}'"))),
    }
}

fn is_constraint_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// SQLite-backed pipeline store.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::storage(e.to_string()))?;
        if !is_initialized(&conn) {
            initialize_schema(&conn).map_err(|e| Error::storage(e.to_string()))?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::storage(e.to_string()))?;
        initialize_schema(&conn).map_err(|e| Error::storage(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        f(&conn).map_err(|e| Error::storage(e.to_string()))
    }

    // ==================== Seeding / admin writes ====================

    /// Insert or replace a target.
    pub fn save_target(&self, target: &Target) -> Result<()> {
        let overrides = target
            .llm_overrides
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO targets (
                    id, universe_id, symbol, name, target_type, is_active, llm_overrides
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    target.id,
                    target.universe_id,
                    target.symbol,
                    target.name,
                    target.target_type.to_string(),
                    target.is_active,
                    overrides,
                ],
            )?;
            Ok(())
        })
    }

    /// Insert or replace a source subscription.
    pub fn save_subscription(&self, subscription: &SourceSubscription) -> Result<()> {
        let include = serde_json::to_string(&subscription.keywords_include)?;
        let exclude = serde_json::to_string(&subscription.keywords_exclude)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO source_subscriptions (
                    id, source_id, target_id, keywords_include, keywords_exclude,
                    last_processed_at, is_active, default_limit
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    subscription.id,
                    subscription.source_id,
                    subscription.target_id,
                    include,
                    exclude,
                    subscription.last_processed_at.map(ts),
                    subscription.is_active,
                    subscription.default_limit.map(|l| l as i64),
                ],
            )?;
            Ok(())
        })
    }

    /// Insert or replace an analyst.
    pub fn save_analyst(&self, analyst: &Analyst) -> Result<()> {
        let status = match analyst.performance_status {
            PerformanceStatus::Active => "active",
            PerformanceStatus::Probation => "probation",
            PerformanceStatus::Suspended => "suspended",
        };
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO analysts (
                    id, slug, name, perspective, default_weight, tier,
                    performance_status, is_active
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    analyst.id,
                    analyst.slug,
                    analyst.name,
                    analyst.perspective,
                    analyst.default_weight,
                    analyst.tier.to_string(),
                    status,
                    analyst.is_active,
                ],
            )?;
            Ok(())
        })
    }

    /// Pin an analyst to a target. Targets with no pins inherit every
    /// active analyst.
    pub fn assign_analyst_to_target(&self, analyst_id: &str, target_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO analyst_assignments (analyst_id, target_id)
                 VALUES (?1, ?2)",
                params![analyst_id, target_id],
            )?;
            Ok(())
        })
    }

    // ==================== Row mappers ====================

    fn row_to_target(row: &Row<'_>) -> rusqlite::Result<Target> {
        let target_type: String = row.get(4)?;
        let overrides: Option<TierOverrides> = parse_json(row.get(6)?)?;
        Ok(Target {
            id: row.get(0)?,
            universe_id: row.get(1)?,
            symbol: row.get(2)?,
            name: row.get(3)?,
            target_type: target_type_from_sql(&target_type)?,
            is_active: row.get(5)?,
            llm_overrides: overrides,
        })
    }

    fn row_to_article(row: &Row<'_>) -> rusqlite::Result<Article> {
        let first_seen: String = row.get(6)?;
        let key_phrases: Option<Vec<String>> = parse_json(row.get(9)?)?;
        Ok(Article {
            id: row.get(0)?,
            source_id: row.get(1)?,
            url: row.get(2)?,
            title: row.get(3)?,
            content: row.get(4)?,
            summary: row.get(5)?,
            first_seen_at: parse_ts(&first_seen)?,
            content_hash: row.get(7)?,
            fingerprint_hash: row.get(8)?,
            key_phrases: key_phrases.unwrap_or_default(),
            is_test: row.get(10)?,
        })
    }

    fn row_to_signal(row: &Row<'_>) -> rusqlite::Result<Signal> {
        let direction: String = row.get(5)?;
        let detected_at: String = row.get(6)?;
        let metadata: Option<SignalMetadata> = parse_json(row.get(7)?)?;
        Ok(Signal {
            id: row.get(0)?,
            target_id: row.get(1)?,
            source_id: row.get(2)?,
            url: row.get(3)?,
            content: row.get(4)?,
            direction: direction_from_sql(&direction)?,
            detected_at: parse_ts(&detected_at)?,
            metadata: metadata.unwrap_or_default(),
            is_test: row.get(8)?,
        })
    }

    fn row_to_predictor(row: &Row<'_>) -> rusqlite::Result<Predictor> {
        let direction: String = row.get(4)?;
        let status: String = row.get(8)?;
        let expires_at: String = row.get(10)?;
        let created_at: String = row.get(11)?;
        Ok(Predictor {
            id: row.get(0)?,
            target_id: row.get(1)?,
            article_id: row.get(2)?,
            analyst_slug: row.get(3)?,
            direction: direction_from_sql(&direction)?,
            strength: row.get::<_, i64>(5)? as u8,
            confidence: row.get(6)?,
            reasoning: row.get(7)?,
            status: predictor_status_from_sql(&status)?,
            consumed_by_prediction_id: row.get(9)?,
            expires_at: parse_ts(&expires_at)?,
            created_at: parse_ts(&created_at)?,
        })
    }

    fn row_to_prediction(row: &Row<'_>) -> rusqlite::Result<Prediction> {
        let direction: String = row.get(2)?;
        let magnitude: String = row.get(3)?;
        let expires_at: String = row.get(6)?;
        let predicted_at: String = row.get(7)?;
        let updated_at: String = row.get(8)?;
        let analyst_ensemble: Option<Value> = parse_json(row.get(10)?)?;
        let llm_ensemble: Option<Value> = parse_json(row.get(11)?)?;
        let status: String = row.get(12)?;
        let context_versions: Option<ContextVersionIds> = parse_json(row.get(15)?)?;
        Ok(Prediction {
            id: row.get(0)?,
            target_id: row.get(1)?,
            direction: trend_from_sql(&direction)?,
            magnitude: magnitude_from_sql(&magnitude)?,
            confidence: row.get(4)?,
            timeframe_hours: row.get(5)?,
            expires_at: parse_ts(&expires_at)?,
            predicted_at: parse_ts(&predicted_at)?,
            updated_at: parse_ts(&updated_at)?,
            reasoning: row.get(9)?,
            analyst_ensemble: analyst_ensemble.unwrap_or(Value::Null),
            llm_ensemble: llm_ensemble.unwrap_or(Value::Null),
            status: prediction_status_from_sql(&status)?,
            analyst_slug: row.get(13)?,
            is_arbitrator: row.get(14)?,
            context_versions: context_versions.unwrap_or_default(),
            is_test: row.get(16)?,
        })
    }

    fn row_to_subscription(row: &Row<'_>) -> rusqlite::Result<SourceSubscription> {
        let include: Option<Vec<String>> = parse_json(row.get(3)?)?;
        let exclude: Option<Vec<String>> = parse_json(row.get(4)?)?;
        let watermark: Option<String> = row.get(5)?;
        Ok(SourceSubscription {
            id: row.get(0)?,
            source_id: row.get(1)?,
            target_id: row.get(2)?,
            keywords_include: include.unwrap_or_default(),
            keywords_exclude: exclude.unwrap_or_default(),
            last_processed_at: watermark.as_deref().map(parse_ts).transpose()?,
            is_active: row.get(6)?,
            default_limit: row.get::<_, Option<i64>>(7)?.map(|l| l as usize),
        })
    }

    fn row_to_analyst(row: &Row<'_>) -> rusqlite::Result<Analyst> {
        let tier: String = row.get(5)?;
        let status: String = row.get(6)?;
        Ok(Analyst {
            id: row.get(0)?,
            slug: row.get(1)?,
            name: row.get(2)?,
            perspective: row.get(3)?,
            default_weight: row.get(4)?,
            tier: tier_from_sql(&tier)?,
            performance_status: performance_from_sql(&status)?,
            is_active: row.get(7)?,
        })
    }

    fn row_to_context_version(row: &Row<'_>) -> rusqlite::Result<AnalystContextVersion> {
        let fork: String = row.get(2)?;
        let instructions: Option<HashMap<ModelTier, String>> = parse_json(row.get(4)?)?;
        let created_at: String = row.get(10)?;
        Ok(AnalystContextVersion {
            id: row.get(0)?,
            analyst_id: row.get(1)?,
            fork_type: fork_from_sql(&fork)?,
            perspective: row.get(3)?,
            tier_instructions: instructions.unwrap_or_default(),
            default_weight: row.get(5)?,
            version_number: row.get::<_, i64>(6)? as u32,
            is_current: row.get(7)?,
            agent_journal: row.get(8)?,
            changed_by: row.get(9)?,
            created_at: parse_ts(&created_at)?,
        })
    }

    fn row_to_learning(row: &Row<'_>) -> rusqlite::Result<Learning> {
        let created_at: String = row.get(4)?;
        Ok(Learning {
            id: row.get(0)?,
            analyst_id: row.get(1)?,
            target_id: row.get(2)?,
            content: row.get(3)?,
            created_at: parse_ts(&created_at)?,
        })
    }

    fn row_to_target_snapshot(row: &Row<'_>) -> rusqlite::Result<TargetSnapshot> {
        let price_at: String = row.get(7)?;
        Ok(TargetSnapshot {
            target_id: row.get(0)?,
            price: row.get(1)?,
            open: row.get(2)?,
            high: row.get(3)?,
            low: row.get(4)?,
            volume: row.get(5)?,
            change_24h_pct: row.get(6)?,
            price_at: parse_ts(&price_at)?,
        })
    }
}

const TARGET_COLS: &str = "id, universe_id, symbol, name, target_type, is_active, llm_overrides";
const ARTICLE_COLS: &str = "id, source_id, url, title, content, summary, first_seen_at, \
                            content_hash, fingerprint_hash, key_phrases, is_test";
const SIGNAL_COLS: &str =
    "id, target_id, source_id, url, content, direction, detected_at, metadata, is_test";
const PREDICTOR_COLS: &str = "id, target_id, article_id, analyst_slug, direction, strength, \
                              confidence, reasoning, status, consumed_by_prediction_id, \
                              expires_at, created_at";
const PREDICTION_COLS: &str = "id, target_id, direction, magnitude, confidence, timeframe_hours, \
                               expires_at, predicted_at, updated_at, reasoning, analyst_ensemble, \
                               llm_ensemble, status, analyst_slug, is_arbitrator, \
                               context_versions, is_test";
const SUBSCRIPTION_COLS: &str = "id, source_id, target_id, keywords_include, keywords_exclude, \
                                 last_processed_at, is_active, default_limit";
const ANALYST_COLS: &str =
    "id, slug, name, perspective, default_weight, tier, performance_status, is_active";
const CONTEXT_VERSION_COLS: &str = "id, analyst_id, fork_type, perspective, tier_instructions, \
                                    default_weight, version_number, is_current, agent_journal, \
                                    changed_by, created_at";

#[async_trait]
impl TargetRepository for SqliteStore {
    async fn find_by_id(&self, id: &str) -> Result<Target> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {TARGET_COLS} FROM targets WHERE id = ?1"),
                params![id],
                Self::row_to_target,
            )
            .optional()
        })?
        .ok_or_else(|| Error::not_found("target", id))
    }

    async fn find_all_active(&self) -> Result<Vec<Target>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TARGET_COLS} FROM targets WHERE is_active = 1 ORDER BY symbol"
            ))?;
            let rows = stmt.query_map([], Self::row_to_target)?;
            rows.collect()
        })
    }

    async fn find_by_symbol(&self, universe_id: &str, symbol: &str) -> Result<Option<Target>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {TARGET_COLS} FROM targets WHERE universe_id = ?1 AND symbol = ?2"
                ),
                params![universe_id, symbol],
                Self::row_to_target,
            )
            .optional()
        })
    }

    async fn find_active_by_universe(&self, universe_id: &str) -> Result<Vec<Target>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TARGET_COLS} FROM targets
                 WHERE universe_id = ?1 AND is_active = 1 ORDER BY symbol"
            ))?;
            let rows = stmt.query_map(params![universe_id], Self::row_to_target)?;
            rows.collect()
        })
    }
}

#[async_trait]
impl ArticleRepository for SqliteStore {
    async fn insert(&self, article: &Article) -> Result<bool> {
        let key_phrases = serde_json::to_string(&article.key_phrases)?;
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO articles (
                    id, source_id, url, title, content, summary, first_seen_at,
                    content_hash, fingerprint_hash, key_phrases, is_test
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    article.id,
                    article.source_id,
                    article.url,
                    article.title,
                    article.content,
                    article.summary,
                    ts(article.first_seen_at),
                    article.content_hash,
                    article.fingerprint_hash,
                    key_phrases,
                    article.is_test,
                ],
            )?;
            Ok(inserted > 0)
        })
    }

    async fn find_by_id(&self, id: &str) -> Result<Article> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {ARTICLE_COLS} FROM articles WHERE id = ?1"),
                params![id],
                Self::row_to_article,
            )
            .optional()
        })?
        .ok_or_else(|| Error::not_found("article", id))
    }
}

#[async_trait]
impl PredictorRepository for SqliteStore {
    async fn create(&self, predictor: &Predictor) -> Result<()> {
        let status = predictor.status.to_string();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO predictors (
                    id, target_id, article_id, analyst_slug, direction, strength,
                    confidence, reasoning, status, consumed_by_prediction_id,
                    expires_at, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    predictor.id,
                    predictor.target_id,
                    predictor.article_id,
                    predictor.analyst_slug,
                    predictor.direction.to_string(),
                    predictor.strength as i64,
                    predictor.confidence,
                    predictor.reasoning,
                    status,
                    predictor.consumed_by_prediction_id,
                    ts(predictor.expires_at),
                    ts(predictor.created_at),
                ],
            )?;
            Ok(())
        })
    }

    async fn find_active_by_target(&self, target_id: &str) -> Result<Vec<Predictor>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PREDICTOR_COLS} FROM predictors
                 WHERE target_id = ?1 AND status = 'active' AND scenario_id IS NULL
                 ORDER BY created_at ASC, id ASC"
            ))?;
            let rows = stmt.query_map(params![target_id], Self::row_to_predictor)?;
            rows.collect()
        })
    }

    async fn expire_old_predictors(&self, target_id: &str, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE predictors SET status = 'expired'
                 WHERE target_id = ?1 AND status = 'active' AND expires_at < ?2",
                params![target_id, ts(now)],
            )
        })
    }

    async fn consume_predictor(&self, id: &str, prediction_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE predictors
                 SET status = 'consumed', consumed_by_prediction_id = ?2
                 WHERE id = ?1 AND status = 'active'",
                params![id, prediction_id],
            )?;
            Ok(changed > 0)
        })
    }

    async fn find_by_ids(&self, ids: &[String]) -> Result<Vec<Predictor>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{i}")).collect();
            let sql = format!(
                "SELECT {PREDICTOR_COLS} FROM predictors WHERE id IN ({})
                 ORDER BY created_at ASC",
                placeholders.join(",")
            );
            let mut stmt = conn.prepare(&sql)?;
            let refs: Vec<&dyn rusqlite::ToSql> =
                ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();
            let rows = stmt.query_map(refs.as_slice(), Self::row_to_predictor)?;
            rows.collect()
        })
    }

    async fn exists_for_article(&self, target_id: &str, article_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM predictors
                 WHERE target_id = ?1 AND article_id = ?2",
                params![target_id, article_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    async fn create_test_copy(
        &self,
        predictor: &Predictor,
        scenario_id: &str,
    ) -> Result<Predictor> {
        let mut copy = predictor.clone();
        copy.id = uuid::Uuid::new_v4().to_string();
        copy.status = PredictorStatus::Active;
        copy.consumed_by_prediction_id = None;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO predictors (
                    id, target_id, article_id, analyst_slug, direction, strength,
                    confidence, reasoning, status, consumed_by_prediction_id,
                    expires_at, created_at, scenario_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    copy.id,
                    copy.target_id,
                    copy.article_id,
                    copy.analyst_slug,
                    copy.direction.to_string(),
                    copy.strength as i64,
                    copy.confidence,
                    copy.reasoning,
                    copy.status.to_string(),
                    copy.consumed_by_prediction_id,
                    ts(copy.expires_at),
                    ts(copy.created_at),
                    scenario_id,
                ],
            )?;
            Ok(())
        })?;
        Ok(copy)
    }
}

#[async_trait]
impl PredictionRepository for SqliteStore {
    async fn create(&self, prediction: &Prediction) -> Result<()> {
        let analyst_ensemble = serde_json::to_string(&prediction.analyst_ensemble)?;
        let llm_ensemble = serde_json::to_string(&prediction.llm_ensemble)?;
        let context_versions = serde_json::to_string(&prediction.context_versions)?;

        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        let outcome = conn.execute(
            "INSERT INTO predictions (
                id, target_id, direction, magnitude, confidence, timeframe_hours,
                expires_at, predicted_at, updated_at, reasoning, analyst_ensemble,
                llm_ensemble, status, analyst_slug, is_arbitrator, context_versions,
                is_test
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                prediction.id,
                prediction.target_id,
                prediction.direction.to_string(),
                prediction.magnitude.to_string(),
                prediction.confidence,
                prediction.timeframe_hours,
                ts(prediction.expires_at),
                ts(prediction.predicted_at),
                ts(prediction.updated_at),
                prediction.reasoning,
                analyst_ensemble,
                llm_ensemble,
                prediction.status.to_string(),
                prediction.analyst_slug,
                prediction.is_arbitrator,
                context_versions,
                prediction.is_test,
            ],
        );

        match outcome {
            Ok(_) => Ok(()),
            Err(error) if is_constraint_violation(&error) => Err(Error::conflict(format!(
                "active prediction already exists for target {} analyst {}",
                prediction.target_id, prediction.analyst_slug
            ))),
            Err(error) => Err(Error::storage(error.to_string())),
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Prediction> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {PREDICTION_COLS} FROM predictions WHERE id = ?1"),
                params![id],
                Self::row_to_prediction,
            )
            .optional()
        })?
        .ok_or_else(|| Error::not_found("prediction", id))
    }

    async fn update(&self, id: &str, patch: &PredictionPatch) -> Result<()> {
        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(direction) = patch.direction {
            sets.push(format!("direction = ?{}", sets.len() + 2));
            values.push(Box::new(direction.to_string()));
        }
        if let Some(magnitude) = patch.magnitude {
            sets.push(format!("magnitude = ?{}", sets.len() + 2));
            values.push(Box::new(magnitude.to_string()));
        }
        if let Some(confidence) = patch.confidence {
            sets.push(format!("confidence = ?{}", sets.len() + 2));
            values.push(Box::new(confidence));
        }
        if let Some(ref reasoning) = patch.reasoning {
            sets.push(format!("reasoning = ?{}", sets.len() + 2));
            values.push(Box::new(reasoning.clone()));
        }
        if let Some(status) = patch.status {
            sets.push(format!("status = ?{}", sets.len() + 2));
            values.push(Box::new(status.to_string()));
        }
        if let Some(updated_at) = patch.updated_at {
            sets.push(format!("updated_at = ?{}", sets.len() + 2));
            values.push(Box::new(ts(updated_at)));
        }
        if sets.is_empty() {
            return Ok(());
        }

        let changed = self.with_conn(|conn| {
            let sql = format!("UPDATE predictions SET {} WHERE id = ?1", sets.join(", "));
            let mut refs: Vec<&dyn rusqlite::ToSql> = vec![&id as &dyn rusqlite::ToSql];
            refs.extend(values.iter().map(|v| v.as_ref()));
            conn.execute(&sql, refs.as_slice())
        })?;
        if changed == 0 {
            return Err(Error::not_found("prediction", id));
        }
        Ok(())
    }

    async fn update_analyst_ensemble(&self, id: &str, ensemble: &Value) -> Result<()> {
        let payload = serde_json::to_string(ensemble)?;
        let changed = self.with_conn(|conn| {
            conn.execute(
                "UPDATE predictions SET analyst_ensemble = ?2 WHERE id = ?1",
                params![id, payload],
            )
        })?;
        if changed == 0 {
            return Err(Error::not_found("prediction", id));
        }
        Ok(())
    }

    async fn find_by_target(
        &self,
        target_id: &str,
        status: Option<PredictionStatus>,
        options: &PredictionQueryOptions,
    ) -> Result<Vec<Prediction>> {
        self.with_conn(|conn| {
            let mut sql = format!(
                "SELECT {PREDICTION_COLS} FROM predictions WHERE target_id = ?1"
            );
            let mut values: Vec<Box<dyn rusqlite::ToSql>> =
                vec![Box::new(target_id.to_string())];

            if let Some(status) = status {
                values.push(Box::new(status.to_string()));
                sql.push_str(&format!(" AND status = ?{}", values.len()));
            }
            if options.test_data_only {
                sql.push_str(" AND is_test = 1");
            } else if !options.include_test_data {
                sql.push_str(" AND is_test = 0");
            }
            if let Some(ref scenario) = options.test_scenario_id {
                values.push(Box::new(scenario.clone()));
                sql.push_str(&format!(" AND test_scenario_id = ?{}", values.len()));
            }
            sql.push_str(" ORDER BY predicted_at ASC, id ASC");

            let mut stmt = conn.prepare(&sql)?;
            let refs: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
            let rows = stmt.query_map(refs.as_slice(), Self::row_to_prediction)?;
            rows.collect()
        })
    }
}

#[async_trait]
impl SignalRepository for SqliteStore {
    async fn create(&self, signal: &Signal) -> Result<()> {
        let metadata = serde_json::to_string(&signal.metadata)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO signals (
                    id, target_id, source_id, url, content, direction, detected_at,
                    metadata, is_test
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    signal.id,
                    signal.target_id,
                    signal.source_id,
                    signal.url,
                    signal.content,
                    signal.direction.to_string(),
                    ts(signal.detected_at),
                    metadata,
                    signal.is_test,
                ],
            )?;
            Ok(())
        })
    }

    async fn exists(&self, target_id: &str, content_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM signals
                 WHERE target_id = ?1
                   AND json_extract(metadata, '$.content_hash') = ?2",
                params![target_id, content_hash],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    async fn find_by_target(&self, target_id: &str, limit: usize) -> Result<Vec<Signal>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SIGNAL_COLS} FROM signals WHERE target_id = ?1
                 ORDER BY detected_at DESC LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![target_id, limit as i64], Self::row_to_signal)?;
            rows.collect()
        })
    }
}

#[async_trait]
impl SourceSubscriptionRepository for SqliteStore {
    async fn find_by_id(&self, id: &str) -> Result<SourceSubscription> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {SUBSCRIPTION_COLS} FROM source_subscriptions WHERE id = ?1"),
                params![id],
                Self::row_to_subscription,
            )
            .optional()
        })?
        .ok_or_else(|| Error::not_found("subscription", id))
    }

    async fn find_active_by_target(&self, target_id: &str) -> Result<Vec<SourceSubscription>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SUBSCRIPTION_COLS} FROM source_subscriptions
                 WHERE target_id = ?1 AND is_active = 1 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![target_id], Self::row_to_subscription)?;
            rows.collect()
        })
    }

    async fn update_watermark(&self, id: &str, processed_at: DateTime<Utc>) -> Result<()> {
        // Monotonic: never move backwards.
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE source_subscriptions SET last_processed_at = ?2
                 WHERE id = ?1
                   AND (last_processed_at IS NULL OR last_processed_at <= ?2)",
                params![id, ts(processed_at)],
            )?;
            Ok(())
        })
    }

    async fn get_new_articles(
        &self,
        subscription: &SourceSubscription,
        limit: usize,
    ) -> Result<Vec<Article>> {
        self.with_conn(|conn| {
            // Inclusive lower bound: at-least-once redelivery of the
            // boundary article is handled by downstream dedup.
            let mut stmt = conn.prepare(&format!(
                "SELECT {ARTICLE_COLS} FROM articles
                 WHERE source_id = ?1 AND (?2 IS NULL OR first_seen_at >= ?2)
                 ORDER BY first_seen_at ASC, id ASC LIMIT ?3"
            ))?;
            let watermark = subscription.last_processed_at.map(ts);
            let rows = stmt.query_map(
                params![subscription.source_id, watermark, limit as i64],
                Self::row_to_article,
            )?;
            rows.collect()
        })
    }
}

#[async_trait]
impl SnapshotRepository for SqliteStore {
    async fn create(&self, snapshot: &PredictionSnapshot) -> Result<()> {
        let payload = serde_json::to_string(snapshot)?;

        let conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock connection: {}", e)))?;
        let outcome = conn.execute(
            "INSERT INTO prediction_snapshots (id, prediction_id, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                snapshot.id,
                snapshot.prediction_id,
                payload,
                ts(snapshot.created_at),
            ],
        );
        match outcome {
            Ok(_) => Ok(()),
            Err(error) if is_constraint_violation(&error) => Err(Error::conflict(format!(
                "snapshot already exists for prediction {}",
                snapshot.prediction_id
            ))),
            Err(error) => Err(Error::storage(error.to_string())),
        }
    }

    async fn find_by_prediction(&self, prediction_id: &str) -> Result<Option<PredictionSnapshot>> {
        let payload: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT payload FROM prediction_snapshots WHERE prediction_id = ?1",
                params![prediction_id],
                |row| row.get(0),
            )
            .optional()
        })?;
        payload
            .map(|raw| serde_json::from_str(&raw).map_err(Error::from))
            .transpose()
    }
}

#[async_trait]
impl AnalystRepository for SqliteStore {
    async fn find_active_for_target(&self, target_id: &str) -> Result<Vec<Analyst>> {
        self.with_conn(|conn| {
            let pinned: i64 = conn.query_row(
                "SELECT COUNT(*) FROM analyst_assignments WHERE target_id = ?1",
                params![target_id],
                |row| row.get(0),
            )?;
            let sql = if pinned > 0 {
                format!(
                    "SELECT {ANALYST_COLS} FROM analysts
                     WHERE is_active = 1 AND id IN (
                        SELECT analyst_id FROM analyst_assignments WHERE target_id = ?1
                     ) ORDER BY slug"
                )
            } else {
                format!(
                    "SELECT {ANALYST_COLS} FROM analysts
                     WHERE is_active = 1 AND ?1 = ?1 ORDER BY slug"
                )
            };
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![target_id], Self::row_to_analyst)?;
            rows.collect()
        })
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<Analyst>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {ANALYST_COLS} FROM analysts WHERE slug = ?1"),
                params![slug],
                Self::row_to_analyst,
            )
            .optional()
        })
    }

    async fn current_context_version(
        &self,
        analyst_id: &str,
        fork: ForkType,
    ) -> Result<Option<AnalystContextVersion>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {CONTEXT_VERSION_COLS} FROM analyst_context_versions
                     WHERE analyst_id = ?1 AND fork_type = ?2 AND is_current = 1"
                ),
                params![analyst_id, fork.to_string()],
                Self::row_to_context_version,
            )
            .optional()
        })
    }

    async fn all_current_context_versions(
        &self,
        fork: ForkType,
    ) -> Result<HashMap<String, AnalystContextVersion>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONTEXT_VERSION_COLS} FROM analyst_context_versions
                 WHERE fork_type = ?1 AND is_current = 1"
            ))?;
            let rows = stmt.query_map(params![fork.to_string()], Self::row_to_context_version)?;
            let mut map = HashMap::new();
            for row in rows {
                let version = row?;
                map.insert(version.analyst_id.clone(), version);
            }
            Ok(map)
        })
    }

    async fn create_context_version(&self, version: &AnalystContextVersion) -> Result<()> {
        let instructions = serde_json::to_string(&version.tier_instructions)?;
        self.with_conn(|conn| {
            // Supersede-then-insert under one transaction so exactly one
            // row stays current per (analyst, fork).
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "UPDATE analyst_context_versions SET is_current = 0
                 WHERE analyst_id = ?1 AND fork_type = ?2 AND is_current = 1",
                params![version.analyst_id, version.fork_type.to_string()],
            )?;
            tx.execute(
                "INSERT INTO analyst_context_versions (
                    id, analyst_id, fork_type, perspective, tier_instructions,
                    default_weight, version_number, is_current, agent_journal,
                    changed_by, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?9, ?10)",
                params![
                    version.id,
                    version.analyst_id,
                    version.fork_type.to_string(),
                    version.perspective,
                    instructions,
                    version.default_weight,
                    version.version_number as i64,
                    version.agent_journal,
                    version.changed_by,
                    ts(version.created_at),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
    }
}

#[async_trait]
impl LearningRepository for SqliteStore {
    async fn find_for_analyst(
        &self,
        analyst_id: &str,
        target_id: Option<&str>,
    ) -> Result<Vec<Learning>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, analyst_id, target_id, content, created_at FROM learnings
                 WHERE analyst_id = ?1 AND (target_id IS NULL OR target_id = ?2)
                 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map(params![analyst_id, target_id], Self::row_to_learning)?;
            rows.collect()
        })
    }

    async fn create(&self, learning: &Learning) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO learnings (id, analyst_id, target_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    learning.id,
                    learning.analyst_id,
                    learning.target_id,
                    learning.content,
                    ts(learning.created_at),
                ],
            )?;
            Ok(())
        })
    }
}

#[async_trait]
impl TargetSnapshotRepository for SqliteStore {
    async fn latest(&self, target_id: &str) -> Result<Option<TargetSnapshot>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT target_id, price, open, high, low, volume, change_24h_pct, price_at
                 FROM target_snapshots WHERE target_id = ?1
                 ORDER BY price_at DESC, rowid_pk DESC LIMIT 1",
                params![target_id],
                Self::row_to_target_snapshot,
            )
            .optional()
        })
    }

    async fn record(&self, snapshot: &TargetSnapshot) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO target_snapshots (
                    target_id, price, open, high, low, volume, change_24h_pct, price_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    snapshot.target_id,
                    snapshot.price,
                    snapshot.open,
                    snapshot.high,
                    snapshot.low,
                    snapshot.volume,
                    snapshot.change_24h_pct,
                    ts(snapshot.price_at),
                ],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn target() -> Target {
        Target::new("u-1", "AAPL", "Apple Inc.", TargetType::Equity)
    }

    /// Millisecond-precise instant; stored timestamps round-trip exactly.
    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_target_roundtrip_and_not_found() {
        let store = SqliteStore::in_memory().unwrap();
        let t = target();
        store.save_target(&t).unwrap();

        let loaded = TargetRepository::find_by_id(&store, &t.id).await.unwrap();
        assert_eq!(loaded, t);

        let missing = TargetRepository::find_by_id(&store, "nope").await;
        assert!(matches!(missing, Err(Error::NotFound { kind: "target", .. })));
    }

    #[tokio::test]
    async fn test_article_dedup_on_source_and_hash() {
        let store = SqliteStore::in_memory().unwrap();
        let article = Article::new("src-1", "https://x/a", "Title", Some("body".into()), Utc::now());

        assert!(ArticleRepository::insert(&store, &article).await.unwrap());

        // A second article with the same (source, content) is ignored even
        // though its id differs.
        let dup = Article::new("src-1", "https://x/b", "Title", Some("body".into()), Utc::now());
        assert!(!ArticleRepository::insert(&store, &dup).await.unwrap());

        // The same content from a different source is a new row.
        let other = Article::new("src-2", "https://x/a", "Title", Some("body".into()), Utc::now());
        assert!(ArticleRepository::insert(&store, &other).await.unwrap());
    }

    #[tokio::test]
    async fn test_predictor_lifecycle() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();
        let p = Predictor::new(
            "t-1", "a-1", "tech", Direction::Bullish, 8, 0.8, "r", now, 48,
        );
        PredictorRepository::create(&store, &p).await.unwrap();

        assert!(store.exists_for_article("t-1", "a-1").await.unwrap());
        assert!(!store.exists_for_article("t-1", "a-2").await.unwrap());

        // Consume once, then idempotently.
        assert!(store.consume_predictor(&p.id, "pred-1").await.unwrap());
        assert!(!store.consume_predictor(&p.id, "pred-2").await.unwrap());

        let rows = store.find_by_ids(&[p.id.clone()]).await.unwrap();
        assert_eq!(rows[0].status, PredictorStatus::Consumed);
        assert_eq!(rows[0].consumed_by_prediction_id.as_deref(), Some("pred-1"));
    }

    #[tokio::test]
    async fn test_expire_sweep_only_hits_overdue_active_rows() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();
        let fresh = Predictor::new("t-1", "a-1", "s", Direction::Bullish, 5, 0.5, "r", now, 48);
        let stale = Predictor::new(
            "t-1", "a-2", "s", Direction::Bullish, 5, 0.5, "r",
            now - Duration::hours(72), 48,
        );
        PredictorRepository::create(&store, &fresh).await.unwrap();
        PredictorRepository::create(&store, &stale).await.unwrap();

        let swept = store.expire_old_predictors("t-1", now).await.unwrap();
        assert_eq!(swept, 1);
        let active = PredictorRepository::find_active_by_target(&store, "t-1")
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, fresh.id);

        // Idempotent re-sweep.
        assert_eq!(store.expire_old_predictors("t-1", now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_test_copy_is_scenario_scoped() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();
        let p = Predictor::new("t-1", "a-1", "s", Direction::Bullish, 5, 0.5, "r", now, 48);
        PredictorRepository::create(&store, &p).await.unwrap();

        let copy = store.create_test_copy(&p, "scenario-1").await.unwrap();
        assert_ne!(copy.id, p.id);

        // Scenario copies stay out of the production active set.
        let active = PredictorRepository::find_active_by_target(&store, "t-1")
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, p.id);
    }

    #[tokio::test]
    async fn test_duplicate_active_prediction_is_conflict() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();
        let one = Prediction::new(
            "t-1", "tech", TrendDirection::Up, Magnitude::Medium, 0.7, 24, "r", now,
        );
        let two = Prediction::new(
            "t-1", "tech", TrendDirection::Down, Magnitude::Small, 0.6, 24, "r", now,
        );
        PredictionRepository::create(&store, &one).await.unwrap();

        let result = PredictionRepository::create(&store, &two).await;
        assert!(matches!(result, Err(Error::Conflict(_))));

        // A different slug coexists.
        let other = Prediction::new(
            "t-1", "macro", TrendDirection::Up, Magnitude::Medium, 0.7, 24, "r", now,
        );
        PredictionRepository::create(&store, &other).await.unwrap();
    }

    #[tokio::test]
    async fn test_prediction_patch_and_query_options() {
        let store = SqliteStore::in_memory().unwrap();
        let now = base_time();
        let mut p = Prediction::new(
            "t-1", "arbitrator", TrendDirection::Up, Magnitude::Medium, 0.7, 24, "r", now,
        );
        p.analyst_ensemble = serde_json::json!({"predictor_count": 3});
        PredictionRepository::create(&store, &p).await.unwrap();

        let test_row = Prediction::new(
            "t-1", "tech", TrendDirection::Up, Magnitude::Small, 0.6, 24, "r", now,
        )
        .as_test();
        PredictionRepository::create(&store, &test_row).await.unwrap();

        // Default query excludes test rows.
        let rows = PredictionRepository::find_by_target(
            &store,
            "t-1",
            Some(PredictionStatus::Active),
            &PredictionQueryOptions::new(),
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, p.id);

        let rows = PredictionRepository::find_by_target(
            &store,
            "t-1",
            None,
            &PredictionQueryOptions::new().including_test_data(),
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 2);

        let rows = PredictionRepository::find_by_target(
            &store,
            "t-1",
            None,
            &PredictionQueryOptions::new().test_data_only(),
        )
        .await
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, test_row.id);

        // Patch application.
        let later = now + Duration::hours(1);
        store
            .update(
                &p.id,
                &PredictionPatch::new()
                    .direction(TrendDirection::Down)
                    .confidence(0.8)
                    .status(PredictionStatus::Resolved)
                    .updated_at(later),
            )
            .await
            .unwrap();
        let loaded = PredictionRepository::find_by_id(&store, &p.id).await.unwrap();
        assert_eq!(loaded.direction, TrendDirection::Down);
        assert_eq!(loaded.confidence, 0.8);
        assert_eq!(loaded.status, PredictionStatus::Resolved);
        assert_eq!(loaded.updated_at, later);
        assert_eq!(loaded.analyst_ensemble["predictor_count"], 3);
    }

    #[tokio::test]
    async fn test_watermark_is_monotonic() {
        let store = SqliteStore::in_memory().unwrap();
        let sub = SourceSubscription::new("src-1", "t-1");
        store.save_subscription(&sub).unwrap();
        let now = Utc::now();

        store.update_watermark(&sub.id, now).await.unwrap();
        let loaded = SourceSubscriptionRepository::find_by_id(&store, &sub.id).await.unwrap();
        assert_eq!(loaded.last_processed_at.map(ts), Some(ts(now)));

        // An earlier timestamp never wins.
        store
            .update_watermark(&sub.id, now - Duration::hours(5))
            .await
            .unwrap();
        let loaded = SourceSubscriptionRepository::find_by_id(&store, &sub.id).await.unwrap();
        assert_eq!(loaded.last_processed_at.map(ts), Some(ts(now)));
    }

    #[tokio::test]
    async fn test_get_new_articles_orders_and_bounds() {
        let store = SqliteStore::in_memory().unwrap();
        let base = Utc::now();
        let mut sub = SourceSubscription::new("src-1", "t-1");

        for hour in [3, 1, 2] {
            let article = Article::new(
                "src-1",
                format!("https://x/{hour}"),
                format!("article {hour}"),
                Some(format!("body {hour}")),
                base + Duration::hours(hour),
            );
            ArticleRepository::insert(&store, &article).await.unwrap();
        }

        let articles = store.get_new_articles(&sub, 10).await.unwrap();
        let hours: Vec<String> = articles.iter().map(|a| a.title.clone()).collect();
        assert_eq!(hours, vec!["article 1", "article 2", "article 3"]);

        // Watermark is inclusive, so the boundary article reappears.
        sub.last_processed_at = Some(base + Duration::hours(2));
        let articles = store.get_new_articles(&sub, 10).await.unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].title, "article 2");

        let articles = store.get_new_articles(&sub, 1).await.unwrap();
        assert_eq!(articles.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_write_once() {
        let store = SqliteStore::in_memory().unwrap();
        let snapshot = PredictionSnapshot::new("pred-1", Utc::now());
        SnapshotRepository::create(&store, &snapshot).await.unwrap();

        let again = PredictionSnapshot::new("pred-1", Utc::now());
        assert!(matches!(
            SnapshotRepository::create(&store, &again).await,
            Err(Error::Conflict(_))
        ));

        let loaded = store.find_by_prediction("pred-1").await.unwrap().unwrap();
        assert_eq!(loaded.id, snapshot.id);
        assert!(store.find_by_prediction("pred-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_analyst_assignment_semantics() {
        let store = SqliteStore::in_memory().unwrap();
        let a = Analyst::new("tech", "Tech", "p", 1.0, ModelTier::Silver);
        let b = Analyst::new("macro", "Macro", "p", 1.0, ModelTier::Gold);
        store.save_analyst(&a).unwrap();
        store.save_analyst(&b).unwrap();

        // No pins: every active analyst applies.
        let set = store.find_active_for_target("t-1").await.unwrap();
        assert_eq!(set.len(), 2);

        // Pinning narrows the set for that target only.
        store.assign_analyst_to_target(&a.id, "t-1").unwrap();
        let set = store.find_active_for_target("t-1").await.unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].slug, "tech");
        assert_eq!(store.find_active_for_target("t-2").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_context_version_supersession() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();
        let v1 = AnalystContextVersion::new("an-1", ForkType::User, "v1", 1.0, 1, "user", now);
        store.create_context_version(&v1).await.unwrap();

        let v2 = AnalystContextVersion::new("an-1", ForkType::User, "v2", 1.1, 2, "user", now)
            .with_tier_instruction(ModelTier::Gold, "dig deeper");
        store.create_context_version(&v2).await.unwrap();

        let current = store
            .current_context_version("an-1", ForkType::User)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.perspective, "v2");
        assert_eq!(current.version_number, 2);
        assert_eq!(current.tier_instructions[&ModelTier::Gold], "dig deeper");

        // A different fork keeps its own chain.
        let ai = AnalystContextVersion::new("an-1", ForkType::Ai, "ai-v1", 0.9, 1, "agent", now);
        store.create_context_version(&ai).await.unwrap();
        let all = store.all_current_context_versions(ForkType::User).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["an-1"].perspective, "v2");
    }

    #[tokio::test]
    async fn test_learnings_scoping() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();
        LearningRepository::create(&store, &Learning::new("an-1", None, "global lesson", now))
            .await
            .unwrap();
        LearningRepository::create(
            &store,
            &Learning::new("an-1", Some("t-1".into()), "target lesson", now),
        )
        .await
        .unwrap();
        LearningRepository::create(
            &store,
            &Learning::new("an-1", Some("t-2".into()), "other target", now),
        )
        .await
        .unwrap();

        let learnings = store.find_for_analyst("an-1", Some("t-1")).await.unwrap();
        let contents: Vec<&str> = learnings.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(contents, vec!["global lesson", "target lesson"]);
    }

    #[tokio::test]
    async fn test_latest_target_snapshot() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();
        store
            .record(&TargetSnapshot::new("t-1", 100.0, now - Duration::hours(2)))
            .await
            .unwrap();
        store
            .record(&TargetSnapshot::new("t-1", 105.0, now))
            .await
            .unwrap();

        let latest = store.latest("t-1").await.unwrap().unwrap();
        assert_eq!(latest.price, 105.0);
        assert!(store.latest("t-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.save_target(&target()).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.find_all_active().await.unwrap().len(), 1);
    }
}
