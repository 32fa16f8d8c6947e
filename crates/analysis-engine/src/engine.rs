//! The per-ticker analysis pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use data_store::Store;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use signal_core::{
    Confidence, DataMap, InsiderSource, Market, MarketDataSource, NewsSource, ProgressEvent,
    ReasoningProvider, SectorSource, SignalCategory, SignalError,
};
use tokio::sync::mpsc;

use crate::prompts;
use crate::validate::{validate_signal_result, MAX_SCORE, MIN_SCORE};

/// Deterministic digest of a category's input data. serde_json keeps object
/// keys sorted, so equal payloads hash equally regardless of construction
/// order.
pub fn content_hash(data: &Value) -> String {
    let canonical = serde_json::to_string(data).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// Auxiliary signal sources, each independently fetchable and failable.
/// Insider activity is routed by market: UK tickers use `uk_insider`.
pub struct AuxSources {
    pub insider: Arc<dyn InsiderSource>,
    pub uk_insider: Arc<dyn InsiderSource>,
    pub news: Arc<dyn NewsSource>,
    pub sector: Arc<dyn SectorSource>,
}

struct CategoryRun<'a> {
    category: SignalCategory,
    data: &'a Value,
    prompt: String,
    cached_step: String,
    analyzing_step: String,
    default_narrative: &'static str,
}

/// Drives the end-to-end analysis pipeline for one ticker, emitting
/// progress events and persisting results through the store. Holds no
/// state between invocations; safe to call concurrently for different
/// tickers.
pub struct AnalysisEngine {
    store: Arc<Store>,
    llm: Arc<dyn ReasoningProvider>,
    data_source: Arc<dyn MarketDataSource>,
    sources: AuxSources,
}

async fn emit(progress: &mpsc::Sender<ProgressEvent>, event: ProgressEvent) {
    // A dropped receiver abandons the stream; the pipeline still runs to
    // completion and its results are simply discarded by the caller.
    if progress.send(event).await.is_err() {
        tracing::debug!("Progress receiver dropped, continuing pipeline");
    }
}

impl AnalysisEngine {
    pub fn new(
        store: Arc<Store>,
        llm: Arc<dyn ReasoningProvider>,
        data_source: Arc<dyn MarketDataSource>,
        sources: AuxSources,
    ) -> Self {
        Self {
            store,
            llm,
            data_source,
            sources,
        }
    }

    /// Run the full pipeline for `symbol`, streaming progress events into
    /// `progress`. The sequence terminates with a `done=true` event; on an
    /// unknown ticker that is the only event. Store failures propagate.
    pub async fn analyze_ticker(
        &self,
        symbol: &str,
        progress: &mpsc::Sender<ProgressEvent>,
    ) -> Result<(), SignalError> {
        // Memoized source data must never cross pipeline runs.
        self.data_source.reset_session();

        let Some(ticker) = self.store.get_ticker(symbol).await? else {
            emit(progress, ProgressEvent::terminal(symbol, "error")).await;
            return Ok(());
        };
        let symbol = ticker.symbol.clone();
        let sector = ticker.sector.clone();
        let mut market = ticker.market;

        let mut all_scraped = Map::new();
        let mut signal_results = Map::new();

        // One-time symbol resolution; failure is non-fatal.
        let mut resolved = ticker
            .resolved_symbol
            .clone()
            .unwrap_or_else(|| symbol.clone());
        if ticker.resolved_symbol.is_none() && self.data_source.supports_resolution() {
            match self.data_source.resolve_symbol(&symbol, market).await {
                Ok((resolved_symbol, resolved_market)) => {
                    self.store
                        .update_ticker_resolution(&symbol, &resolved_symbol, resolved_market)
                        .await?;
                    resolved = resolved_symbol;
                    market = resolved_market;
                }
                Err(e) => {
                    tracing::warn!("Could not resolve symbol {}, using as-is: {}", symbol, e);
                }
            }
        }

        // 1. Primary data (fundamentals + technicals + analyst + news).
        emit(
            progress,
            ProgressEvent::stage(
                &symbol,
                "Fetching market data...",
                Some(SignalCategory::Fundamentals),
            ),
        )
        .await;
        let (fundamentals, technicals, analyst, provider_news) =
            match self.fetch_primary(&resolved).await {
                Ok(data) => data,
                Err(e) => {
                    tracing::error!("Data provider fetch failed for {}: {}", symbol, e);
                    (DataMap::new(), DataMap::new(), DataMap::new(), Vec::new())
                }
            };
        let primary = json!({
            "fundamentals": fundamentals,
            "analyst": analyst,
            "technicals": technicals,
            "news": provider_news,
        });
        all_scraped.insert("primary".to_string(), primary.clone());

        // 2. Insider activity, routed by market.
        emit(
            progress,
            ProgressEvent::stage(
                &symbol,
                "Scraping insider data...",
                Some(SignalCategory::InsiderActivity),
            ),
        )
        .await;
        let insider_source = if market == Market::Uk {
            &self.sources.uk_insider
        } else {
            &self.sources.insider
        };
        let insider_data = match insider_source.scrape(&symbol).await {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("Insider scrape failed for {}: {}", symbol, e);
                json!({ "insider_trades": [] })
            }
        };
        all_scraped.insert("insider".to_string(), insider_data.clone());

        // 3. News.
        emit(
            progress,
            ProgressEvent::stage(&symbol, "Scraping news...", Some(SignalCategory::Sentiment)),
        )
        .await;
        let news_data = match self.sources.news.scrape(&symbol).await {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("News scrape failed for {}: {}", symbol, e);
                json!({ "news_articles": [] })
            }
        };
        all_scraped.insert("news".to_string(), news_data.clone());

        // 4. Sector context.
        emit(
            progress,
            ProgressEvent::stage(
                &symbol,
                "Scraping sector data...",
                Some(SignalCategory::SectorContext),
            ),
        )
        .await;
        let sector_data = match self
            .sources
            .sector
            .scrape(&symbol, sector.as_deref(), market)
            .await
        {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("Sector scrape failed for {}: {}", symbol, e);
                json!({ "sector_performance": [], "sector_news": [] })
            }
        };
        all_scraped.insert("sector".to_string(), sector_data.clone());

        // 5. Per-category scoring, fixed order. The sentiment slice folds
        // provider-native news in next to the scraped articles.
        let mut sentiment_input = match &news_data {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        sentiment_input.insert(
            "provider_news".to_string(),
            primary.get("news").cloned().unwrap_or(json!([])),
        );

        let empty = json!({});
        let primary_runs: [(SignalCategory, Value, fn(&str, &Value) -> String); 5] = [
            (
                SignalCategory::Fundamentals,
                primary.get("fundamentals").cloned().unwrap_or_else(|| empty.clone()),
                prompts::fundamentals_prompt,
            ),
            (
                SignalCategory::AnalystConsensus,
                primary.get("analyst").cloned().unwrap_or_else(|| empty.clone()),
                prompts::analyst_prompt,
            ),
            (
                SignalCategory::InsiderActivity,
                insider_data.clone(),
                prompts::insider_prompt,
            ),
            (
                SignalCategory::Technicals,
                primary.get("technicals").cloned().unwrap_or_else(|| empty.clone()),
                prompts::technicals_prompt,
            ),
            (
                SignalCategory::Sentiment,
                Value::Object(sentiment_input),
                prompts::sentiment_prompt,
            ),
        ];

        for (category, data, prompt_fn) in primary_runs {
            let entry = self
                .score_category(
                    &symbol,
                    CategoryRun {
                        category,
                        data: &data,
                        prompt: prompt_fn(&symbol, &data),
                        cached_step: format!("Using cached {category}..."),
                        analyzing_step: format!("Analyzing {category}..."),
                        default_narrative: "Analysis unavailable.",
                    },
                    progress,
                )
                .await?;
            signal_results.insert(category.as_str().to_string(), Value::Object(entry));
        }

        // 6. Sector-context scoring, keyed on the sector data alone.
        let sector_entry = self
            .score_category(
                &symbol,
                CategoryRun {
                    category: SignalCategory::SectorContext,
                    data: &sector_data,
                    prompt: prompts::sector_prompt(
                        &symbol,
                        sector.as_deref().unwrap_or("Unknown"),
                        &sector_data,
                    ),
                    cached_step: "Using cached sector context...".to_string(),
                    analyzing_step: "Analyzing sector context...".to_string(),
                    default_narrative: "",
                },
                progress,
            )
            .await?;
        signal_results.insert(
            SignalCategory::SectorContext.as_str().to_string(),
            Value::Object(sector_entry),
        );

        // 7. Risk assessment, keyed on the entire aggregated payload: any
        // upstream data change invalidates the risk cache.
        let all_scraped = Value::Object(all_scraped);
        let risk_entry = self
            .score_category(
                &symbol,
                CategoryRun {
                    category: SignalCategory::RiskAssessment,
                    data: &all_scraped,
                    prompt: prompts::risk_prompt(&symbol, &all_scraped),
                    cached_step: "Using cached risk assessment...".to_string(),
                    analyzing_step: "Analyzing risk...".to_string(),
                    default_narrative: "",
                },
                progress,
            )
            .await?;
        signal_results.insert(
            SignalCategory::RiskAssessment.as_str().to_string(),
            Value::Object(risk_entry),
        );

        // 8. Synthesis — always re-runs, never cached.
        emit(
            progress,
            ProgressEvent::stage(&symbol, "Generating overall recommendation...", None),
        )
        .await;
        let synthesis_prompt =
            prompts::synthesis_prompt(&symbol, &Value::Object(signal_results.clone()));
        let synthesis = self.llm.analyze(&synthesis_prompt).await;

        let scores: HashMap<String, f64> = signal_results
            .iter()
            .filter_map(|(category, entry)| {
                entry
                    .get("score")
                    .and_then(Value::as_f64)
                    .map(|score| (category.clone(), score))
            })
            .collect();
        // Snapshot serialized from the sorted map so equal runs produce
        // byte-identical rows.
        let mut score_snapshot = Map::new();
        for (category, score) in &scores {
            score_snapshot.insert(category.clone(), json!(score));
        }
        let weights = self.store.get_scoring_weights().await?;

        let raw_overall = synthesis
            .get("overall_score")
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite())
            .unwrap_or_else(|| scoring::weighted_score(&scores, Some(&weights)));
        let overall_score = raw_overall.clamp(MIN_SCORE, MAX_SCORE);
        if overall_score != raw_overall {
            tracing::warn!(
                "Overall score {} out of range [-10, +10], clamped to {}",
                raw_overall,
                overall_score
            );
        }

        let recommendation = synthesis
            .get("recommendation")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| {
                scoring::score_to_recommendation(overall_score)
                    .as_str()
                    .to_string()
            });

        let mut narrative = synthesis
            .get("narrative")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        if let Some(entry_strategy) = synthesis.get("entry_strategy").and_then(Value::as_str) {
            if !entry_strategy.is_empty() {
                narrative.push_str("\n\n## Entry Strategy\n\n");
                narrative.push_str(entry_strategy);
            }
        }

        let signal_scores = serde_json::to_string(&score_snapshot)
            .map_err(|e| SignalError::InvalidData(e.to_string()))?;
        self.store
            .save_synthesis(&symbol, overall_score, &recommendation, &narrative, &signal_scores)
            .await?;

        // Capture a backtest row; a missing price marks it not backtestable.
        let price_at_rec = match self.data_source.get_current_price(&resolved).await {
            Ok(price) => price,
            Err(e) => {
                tracing::warn!("Price capture failed for {}: {}", symbol, e);
                None
            }
        };
        self.store
            .save_recommendation(&symbol, &recommendation, overall_score, price_at_rec)
            .await?;

        emit(progress, ProgressEvent::terminal(&symbol, "Complete")).await;
        Ok(())
    }

    /// All four primary fetches as one unit: any failure degrades the whole
    /// stage to empty data at the call site.
    async fn fetch_primary(
        &self,
        resolved: &str,
    ) -> Result<(DataMap, DataMap, DataMap, Vec<Value>), SignalError> {
        let fundamentals = self.data_source.get_fundamentals(resolved).await?;
        let technicals = self.data_source.get_technicals(resolved).await?;
        let analyst = self.data_source.get_analyst_data(resolved).await?;
        let news = self.data_source.get_news(resolved).await?;
        Ok((fundamentals, technicals, analyst, news))
    }

    /// Cache-or-invoke for one category: hash the input, reuse a fresh
    /// cached analysis when one exists, otherwise invoke the provider,
    /// validate, persist, and return the signal entry.
    async fn score_category(
        &self,
        symbol: &str,
        run: CategoryRun<'_>,
        progress: &mpsc::Sender<ProgressEvent>,
    ) -> Result<Map<String, Value>, SignalError> {
        let input_hash = content_hash(run.data);

        if let Some(cached) = self
            .store
            .get_cached_analysis(symbol, run.category, &input_hash)
            .await?
        {
            emit(
                progress,
                ProgressEvent::stage(symbol, run.cached_step, Some(run.category)),
            )
            .await;
            let mut entry = Map::new();
            entry.insert("score".to_string(), json!(cached.score));
            entry.insert("confidence".to_string(), json!(cached.confidence.as_str()));
            entry.insert("narrative".to_string(), json!(cached.narrative));
            if run.category == SignalCategory::RiskAssessment {
                entry.insert("bull_case".to_string(), json!(""));
                entry.insert("bear_case".to_string(), json!(""));
            }
            return Ok(entry);
        }

        emit(
            progress,
            ProgressEvent::stage(symbol, run.analyzing_step, Some(run.category)),
        )
        .await;
        let result = validate_signal_result(&self.llm.analyze(&run.prompt).await);

        let score = result.get("score").and_then(Value::as_f64).unwrap_or(0.0);
        let confidence = result
            .get("confidence")
            .and_then(Value::as_str)
            .and_then(Confidence::parse)
            .unwrap_or(Confidence::Low);
        let mut narrative = result
            .get("narrative")
            .and_then(Value::as_str)
            .unwrap_or(run.default_narrative)
            .to_string();

        if run.category == SignalCategory::Technicals {
            append_technical_levels(&mut narrative, &result);
        }

        let raw_data = serde_json::to_string(run.data)
            .map_err(|e| SignalError::InvalidData(e.to_string()))?;
        self.store
            .save_analysis(
                symbol,
                run.category,
                score,
                confidence,
                &narrative,
                &raw_data,
                &input_hash,
            )
            .await?;

        let mut entry = Map::new();
        entry.insert("score".to_string(), json!(score));
        entry.insert("confidence".to_string(), json!(confidence.as_str()));
        entry.insert("narrative".to_string(), json!(narrative));
        if run.category == SignalCategory::RiskAssessment {
            entry.insert(
                "bull_case".to_string(),
                result.get("bull_case").cloned().unwrap_or(json!("")),
            );
            entry.insert(
                "bear_case".to_string(),
                result.get("bear_case").cloned().unwrap_or(json!("")),
            );
        }
        Ok(entry)
    }
}

/// Fold support/resistance/entry/stop-loss fields from a technicals result
/// into its narrative as formatted sections.
fn append_technical_levels(narrative: &mut String, result: &Value) {
    let mut extras: Vec<String> = Vec::new();

    for (key, label) in [
        ("support_levels", "**Support Levels:**"),
        ("resistance_levels", "**Resistance Levels:**"),
    ] {
        if let Some(levels) = result.get(key).and_then(Value::as_array) {
            let items: Vec<&str> = levels.iter().filter_map(Value::as_str).collect();
            if !items.is_empty() {
                extras.push(format!("{label} {}", items.join(" | ")));
            }
        }
    }

    for (key, label) in [
        ("entry_price", "**Suggested Entry:**"),
        ("stop_loss", "**Stop-Loss:**"),
    ] {
        if let Some(value) = result.get(key).and_then(Value::as_str) {
            if !value.is_empty() {
                extras.push(format!("{label} {value}"));
            }
        }
    }

    if !extras.is_empty() {
        narrative.push_str("\n\n");
        narrative.push_str(&extras.join("\n\n"));
    }
}

#[cfg(test)]
mod hash_tests {
    use super::*;

    #[test]
    fn equal_payloads_hash_equally_regardless_of_key_order() {
        let a = json!({ "alpha": 1, "beta": { "x": [1, 2] } });
        let b = json!({ "beta": { "x": [1, 2] }, "alpha": 1 });
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn any_byte_change_changes_the_hash() {
        let a = json!({ "alpha": 1 });
        let b = json!({ "alpha": 2 });
        let c = json!({ "alpha": "1" });
        assert_ne!(content_hash(&a), content_hash(&b));
        assert_ne!(content_hash(&a), content_hash(&c));
    }

    #[test]
    fn hash_is_hex_sha256() {
        let hash = content_hash(&json!({}));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
