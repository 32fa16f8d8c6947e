//! SQLite persistence for tickers, analyses, syntheses, recommendations,
//! the scrape cache, and settings.
//!
//! All analysis/synthesis writes are row-appends; "current" state is the
//! most recent row per symbol. The store owns every durable row — the
//! orchestrator and backtester keep no state between invocations.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use scrape_client::ScrapeCache;
use signal_core::{
    AnalysisRecord, Confidence, Market, RecommendationRecord, SignalCategory, SignalError,
    SynthesisRecord, Ticker,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};


/// How long a cached per-category analysis stays reusable.
pub const ANALYSIS_FRESHNESS_HOURS: i64 = 24;

/// Default TTL for cached scrape bodies.
pub const SCRAPE_CACHE_TTL_HOURS: i64 = 24;

fn db_err(e: sqlx::Error) -> SignalError {
    SignalError::DatabaseError(e.to_string())
}

/// Parse the TEXT datetimes SQLite's `datetime('now')` produces, falling
/// back to RFC 3339 for externally written rows.
fn parse_db_datetime(s: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .or_else(|_| s.parse::<DateTime<Utc>>())
        .unwrap_or_else(|_| {
            tracing::warn!("Unparseable datetime in database: {:?}", s);
            Utc::now()
        })
}

// ---------------------------------------------------------------------------
// Row types — TEXT dates as stored, converted at the boundary
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct TickerRow {
    symbol: String,
    name: String,
    sector: Option<String>,
    market: String,
    resolved_symbol: Option<String>,
    added_at: Option<String>,
}

impl TickerRow {
    fn into_ticker(self) -> Ticker {
        Ticker {
            symbol: self.symbol,
            name: self.name,
            sector: self.sector,
            market: Market::parse(&self.market),
            resolved_symbol: self.resolved_symbol,
            added_at: self.added_at.as_deref().map(parse_db_datetime),
        }
    }
}

#[derive(Debug, FromRow)]
struct AnalysisRow {
    id: i64,
    symbol: String,
    category: String,
    score: f64,
    confidence: String,
    narrative: Option<String>,
    raw_data: Option<String>,
    input_hash: Option<String>,
    created_at: String,
}

impl AnalysisRow {
    fn into_record(self) -> Option<AnalysisRecord> {
        let Some(category) = SignalCategory::parse(&self.category) else {
            tracing::warn!("Skipping analysis row with unknown category {:?}", self.category);
            return None;
        };
        Some(AnalysisRecord {
            id: self.id,
            symbol: self.symbol,
            category,
            score: self.score,
            confidence: Confidence::parse(&self.confidence).unwrap_or(Confidence::Low),
            narrative: self.narrative.unwrap_or_default(),
            raw_data: self.raw_data,
            input_hash: self.input_hash,
            created_at: parse_db_datetime(&self.created_at),
        })
    }
}

#[derive(Debug, FromRow)]
struct SynthesisRow {
    id: i64,
    symbol: String,
    overall_score: f64,
    recommendation: String,
    narrative: Option<String>,
    signal_scores: Option<String>,
    created_at: String,
}

impl SynthesisRow {
    fn into_record(self) -> SynthesisRecord {
        SynthesisRecord {
            id: self.id,
            symbol: self.symbol,
            overall_score: self.overall_score,
            recommendation: self.recommendation,
            narrative: self.narrative.unwrap_or_default(),
            signal_scores: self.signal_scores.unwrap_or_default(),
            created_at: parse_db_datetime(&self.created_at),
        }
    }
}

#[derive(Debug, FromRow)]
struct RecommendationRow {
    id: i64,
    symbol: String,
    recommendation: String,
    overall_score: f64,
    price_at_rec: Option<f64>,
    created_at: String,
}

impl RecommendationRow {
    fn into_record(self) -> RecommendationRecord {
        RecommendationRecord {
            id: self.id,
            symbol: self.symbol,
            recommendation: self.recommendation,
            overall_score: self.overall_score,
            price_at_rec: self.price_at_rec,
            created_at: parse_db_datetime(&self.created_at),
        }
    }
}

/// One row of the ticker overview: ticker columns joined with the latest
/// synthesis, if any.
#[derive(Debug, Clone, FromRow)]
pub struct DashboardRow {
    pub symbol: String,
    pub name: String,
    pub sector: Option<String>,
    pub market: String,
    pub overall_score: Option<f64>,
    pub recommendation: Option<String>,
    pub last_refreshed: Option<String>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) a database file and ensure the schema.
    pub async fn connect(db_path: &str) -> Result<Self, SignalError> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| SignalError::DatabaseError(e.to_string()))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory database for tests. A single connection, since every
    /// SQLite memory connection is its own database.
    pub async fn in_memory() -> Result<Self, SignalError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(db_err)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Raw pool access for callers that need bespoke queries (bulk
    /// imports, fixtures).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<(), SignalError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS tickers (
                symbol TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                sector TEXT,
                market TEXT NOT NULL DEFAULT 'US',
                resolved_symbol TEXT,
                added_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            "CREATE TABLE IF NOT EXISTS analyses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL REFERENCES tickers(symbol) ON DELETE CASCADE,
                category TEXT NOT NULL,
                score REAL NOT NULL,
                confidence TEXT NOT NULL,
                narrative TEXT,
                raw_data TEXT,
                input_hash TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            "CREATE TABLE IF NOT EXISTS syntheses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL REFERENCES tickers(symbol) ON DELETE CASCADE,
                overall_score REAL NOT NULL,
                recommendation TEXT NOT NULL,
                narrative TEXT,
                signal_scores TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            "CREATE TABLE IF NOT EXISTS recommendations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL REFERENCES tickers(symbol) ON DELETE CASCADE,
                recommendation TEXT NOT NULL,
                overall_score REAL NOT NULL,
                price_at_rec REAL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            "CREATE TABLE IF NOT EXISTS scrape_cache (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                content TEXT,
                fetched_at TEXT NOT NULL DEFAULT (datetime('now')),
                expires_at TEXT NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            "CREATE INDEX IF NOT EXISTS idx_analyses_symbol ON analyses (symbol)",
            "CREATE INDEX IF NOT EXISTS idx_syntheses_symbol ON syntheses (symbol)",
            "CREATE INDEX IF NOT EXISTS idx_scrape_cache_url ON scrape_cache (url)",
            "CREATE INDEX IF NOT EXISTS idx_recommendations_symbol ON recommendations (symbol)",
            "CREATE INDEX IF NOT EXISTS idx_recommendations_created_at ON recommendations (created_at)",
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    // -- tickers ------------------------------------------------------------

    pub async fn add_ticker(
        &self,
        symbol: &str,
        name: &str,
        sector: Option<&str>,
        market: Market,
        resolved_symbol: Option<&str>,
    ) -> Result<(), SignalError> {
        sqlx::query(
            "INSERT OR IGNORE INTO tickers (symbol, name, sector, market, resolved_symbol)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(symbol.to_uppercase())
        .bind(name)
        .bind(sector)
        .bind(market.as_str())
        .bind(resolved_symbol)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn update_ticker_resolution(
        &self,
        symbol: &str,
        resolved_symbol: &str,
        market: Market,
    ) -> Result<(), SignalError> {
        sqlx::query("UPDATE tickers SET resolved_symbol = ?, market = ? WHERE symbol = ?")
            .bind(resolved_symbol)
            .bind(market.as_str())
            .bind(symbol.to_uppercase())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn remove_ticker(&self, symbol: &str) -> Result<(), SignalError> {
        sqlx::query("DELETE FROM tickers WHERE symbol = ?")
            .bind(symbol.to_uppercase())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn list_tickers(&self) -> Result<Vec<Ticker>, SignalError> {
        let rows: Vec<TickerRow> = sqlx::query_as("SELECT * FROM tickers ORDER BY symbol")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(TickerRow::into_ticker).collect())
    }

    pub async fn get_ticker(&self, symbol: &str) -> Result<Option<Ticker>, SignalError> {
        let row: Option<TickerRow> = sqlx::query_as("SELECT * FROM tickers WHERE symbol = ?")
            .bind(symbol.to_uppercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(TickerRow::into_ticker))
    }

    // -- analyses -----------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn save_analysis(
        &self,
        symbol: &str,
        category: SignalCategory,
        score: f64,
        confidence: Confidence,
        narrative: &str,
        raw_data: &str,
        input_hash: &str,
    ) -> Result<(), SignalError> {
        sqlx::query(
            "INSERT INTO analyses (symbol, category, score, confidence, narrative, raw_data, input_hash)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(symbol.to_uppercase())
        .bind(category.as_str())
        .bind(score)
        .bind(confidence.as_str())
        .bind(narrative)
        .bind(raw_data)
        .bind(input_hash)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Most recent analysis matching `(symbol, category, input_hash)` inside
    /// the freshness window, if any.
    pub async fn get_cached_analysis(
        &self,
        symbol: &str,
        category: SignalCategory,
        input_hash: &str,
    ) -> Result<Option<AnalysisRecord>, SignalError> {
        let row: Option<AnalysisRow> = sqlx::query_as(
            "SELECT * FROM analyses
             WHERE symbol = ? AND category = ? AND input_hash = ?
               AND created_at >= datetime('now', ?)
             ORDER BY id DESC LIMIT 1",
        )
        .bind(symbol.to_uppercase())
        .bind(category.as_str())
        .bind(input_hash)
        .bind(format!("-{ANALYSIS_FRESHNESS_HOURS} hours"))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.and_then(AnalysisRow::into_record))
    }

    /// All analyses belonging to a symbol's most recent run batch.
    pub async fn get_latest_analyses(&self, symbol: &str) -> Result<Vec<AnalysisRecord>, SignalError> {
        let rows: Vec<AnalysisRow> = sqlx::query_as(
            "SELECT * FROM analyses WHERE symbol = ? AND created_at = (
                SELECT MAX(created_at) FROM analyses WHERE symbol = ?
            )",
        )
        .bind(symbol.to_uppercase())
        .bind(symbol.to_uppercase())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().filter_map(AnalysisRow::into_record).collect())
    }

    // -- syntheses ----------------------------------------------------------

    pub async fn save_synthesis(
        &self,
        symbol: &str,
        overall_score: f64,
        recommendation: &str,
        narrative: &str,
        signal_scores: &str,
    ) -> Result<(), SignalError> {
        sqlx::query(
            "INSERT INTO syntheses (symbol, overall_score, recommendation, narrative, signal_scores)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(symbol.to_uppercase())
        .bind(overall_score)
        .bind(recommendation)
        .bind(narrative)
        .bind(signal_scores)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_latest_synthesis(
        &self,
        symbol: &str,
    ) -> Result<Option<SynthesisRecord>, SignalError> {
        let row: Option<SynthesisRow> =
            sqlx::query_as("SELECT * FROM syntheses WHERE symbol = ? ORDER BY id DESC LIMIT 1")
                .bind(symbol.to_uppercase())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row.map(SynthesisRow::into_record))
    }

    pub async fn get_synthesis_history(
        &self,
        symbol: &str,
        limit: i64,
    ) -> Result<Vec<SynthesisRecord>, SignalError> {
        let rows: Vec<SynthesisRow> =
            sqlx::query_as("SELECT * FROM syntheses WHERE symbol = ? ORDER BY id DESC LIMIT ?")
                .bind(symbol.to_uppercase())
                .bind(limit)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(rows.into_iter().map(SynthesisRow::into_record).collect())
    }

    // -- recommendations ----------------------------------------------------

    pub async fn save_recommendation(
        &self,
        symbol: &str,
        recommendation: &str,
        overall_score: f64,
        price_at_rec: Option<f64>,
    ) -> Result<(), SignalError> {
        sqlx::query(
            "INSERT INTO recommendations (symbol, recommendation, overall_score, price_at_rec)
             VALUES (?, ?, ?, ?)",
        )
        .bind(symbol.to_uppercase())
        .bind(recommendation)
        .bind(overall_score)
        .bind(price_at_rec)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_recommendations(
        &self,
        symbol: Option<&str>,
    ) -> Result<Vec<RecommendationRecord>, SignalError> {
        let rows: Vec<RecommendationRow> = match symbol {
            Some(symbol) => {
                sqlx::query_as(
                    "SELECT * FROM recommendations WHERE symbol = ? ORDER BY created_at",
                )
                .bind(symbol.to_uppercase())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as("SELECT * FROM recommendations ORDER BY created_at")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(db_err)?;
        Ok(rows.into_iter().map(RecommendationRow::into_record).collect())
    }

    // -- scrape cache -------------------------------------------------------

    pub async fn get_cached_scrape(&self, url: &str) -> Result<Option<String>, SignalError> {
        let content: Option<(Option<String>,)> = sqlx::query_as(
            "SELECT content FROM scrape_cache
             WHERE url = ? AND expires_at > datetime('now')
             ORDER BY fetched_at DESC LIMIT 1",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(content.and_then(|(c,)| c))
    }

    pub async fn save_scrape_cache(
        &self,
        url: &str,
        content: &str,
        ttl_hours: i64,
    ) -> Result<(), SignalError> {
        sqlx::query(
            "INSERT INTO scrape_cache (url, content, expires_at)
             VALUES (?, ?, datetime('now', ?))",
        )
        .bind(url)
        .bind(content)
        .bind(format!("{ttl_hours:+} hours"))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    // -- settings -----------------------------------------------------------

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, SignalError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), SignalError> {
        sqlx::query(
            "INSERT INTO settings (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                 updated_at = datetime('now')",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Configured scoring weights, or the default table when none are set
    /// or the stored value is unreadable.
    pub async fn get_scoring_weights(&self) -> Result<HashMap<String, f64>, SignalError> {
        match self.get_setting("scoring_weights").await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(weights) => Ok(weights),
                Err(e) => {
                    tracing::warn!("Stored scoring weights unreadable ({}), using defaults", e);
                    Ok(scoring::default_weights())
                }
            },
            None => Ok(scoring::default_weights()),
        }
    }

    pub async fn set_scoring_weights(
        &self,
        weights: &HashMap<String, f64>,
    ) -> Result<(), SignalError> {
        let raw = serde_json::to_string(weights)
            .map_err(|e| SignalError::InvalidData(e.to_string()))?;
        self.set_setting("scoring_weights", &raw).await
    }

    pub async fn get_active_preset(&self) -> Result<Option<String>, SignalError> {
        self.get_setting("scoring_preset").await
    }

    pub async fn set_active_preset(&self, preset: &str) -> Result<(), SignalError> {
        self.set_setting("scoring_preset", preset).await
    }

    // -- dashboard ----------------------------------------------------------

    /// Tickers joined with their most recent synthesis, best score first.
    pub async fn get_dashboard_rows(&self) -> Result<Vec<DashboardRow>, SignalError> {
        sqlx::query_as(
            "SELECT t.symbol, t.name, t.sector, t.market,
                    s.overall_score, s.recommendation, s.created_at AS last_refreshed
             FROM tickers t
             LEFT JOIN syntheses s ON t.symbol = s.symbol
               AND s.id = (SELECT MAX(id) FROM syntheses WHERE symbol = t.symbol)
             ORDER BY s.overall_score DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }
}

#[async_trait]
impl ScrapeCache for Store {
    async fn get_cached(&self, url: &str) -> Result<Option<String>, SignalError> {
        self.get_cached_scrape(url).await
    }

    async fn save(&self, url: &str, content: &str) -> Result<(), SignalError> {
        self.save_scrape_cache(url, content, SCRAPE_CACHE_TTL_HOURS).await
    }
}
