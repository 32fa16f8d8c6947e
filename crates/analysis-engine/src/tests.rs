use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use data_store::Store;
use serde_json::{json, Value};
use signal_core::{
    DataMap, InsiderSource, Market, MarketDataSource, NewsSource, ProgressEvent,
    ReasoningProvider, SectorSource, SignalCategory, SignalError,
};
use tokio::sync::mpsc;

use crate::engine::{content_hash, AnalysisEngine, AuxSources};

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Reasoning provider stub: counts calls, answers by prompt substring.
struct StubProvider {
    calls: AtomicUsize,
    responses: Vec<(String, Value)>,
    default: Value,
}

impl StubProvider {
    fn scoring(score: f64) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            responses: Vec::new(),
            default: json!({
                "score": score,
                "confidence": "high",
                "narrative": "Category narrative.",
            }),
        }
    }

    fn erroring() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            responses: Vec::new(),
            default: json!({ "error": "CLI exploded" }),
        }
    }

    fn with_response(mut self, prompt_pattern: &str, response: Value) -> Self {
        self.responses.push((prompt_pattern.to_string(), response));
        self
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningProvider for StubProvider {
    async fn analyze(&self, prompt: &str) -> Value {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for (pattern, response) in &self.responses {
            if prompt.contains(pattern.as_str()) {
                return response.clone();
            }
        }
        self.default.clone()
    }
}

/// Synthesis prompts carry this phrase; category prompts do not.
const SYNTHESIS_PATTERN: &str = "Synthesize all signals";

#[derive(Clone)]
struct StubMarket {
    fundamentals: DataMap,
    technicals: DataMap,
    analyst: DataMap,
    news: Vec<Value>,
    price: Option<f64>,
    fail: bool,
    resolution: Option<(String, Market)>,
    resolution_fails: bool,
}

impl StubMarket {
    fn healthy() -> Self {
        let mut fundamentals = DataMap::new();
        fundamentals.insert("P/E".to_string(), json!("29.90"));
        let mut technicals = DataMap::new();
        technicals.insert("RSI (14)".to_string(), json!("44.60"));
        let mut analyst = DataMap::new();
        analyst.insert("Target Price".to_string(), json!("250.00"));
        Self {
            fundamentals,
            technicals,
            analyst,
            news: vec![json!({ "title": "Earnings beat" })],
            price: Some(230.0),
            fail: false,
            resolution: None,
            resolution_fails: false,
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::healthy()
        }
    }

    fn check(&self) -> Result<(), SignalError> {
        if self.fail {
            Err(SignalError::ApiError("provider down".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MarketDataSource for StubMarket {
    async fn get_fundamentals(&self, _symbol: &str) -> Result<DataMap, SignalError> {
        self.check()?;
        Ok(self.fundamentals.clone())
    }

    async fn get_technicals(&self, _symbol: &str) -> Result<DataMap, SignalError> {
        self.check()?;
        Ok(self.technicals.clone())
    }

    async fn get_analyst_data(&self, _symbol: &str) -> Result<DataMap, SignalError> {
        self.check()?;
        Ok(self.analyst.clone())
    }

    async fn get_news(&self, _symbol: &str) -> Result<Vec<Value>, SignalError> {
        self.check()?;
        Ok(self.news.clone())
    }

    fn supports_resolution(&self) -> bool {
        self.resolution.is_some() || self.resolution_fails
    }

    async fn resolve_symbol(
        &self,
        raw_symbol: &str,
        _preferred_market: Market,
    ) -> Result<(String, Market), SignalError> {
        if let Some(resolution) = &self.resolution {
            Ok(resolution.clone())
        } else {
            Err(SignalError::SymbolNotFound(raw_symbol.to_string()))
        }
    }

    async fn get_historical_price(
        &self,
        _symbol: &str,
        _date: chrono::NaiveDate,
    ) -> Result<Option<f64>, SignalError> {
        Ok(None)
    }

    async fn get_current_price(&self, _symbol: &str) -> Result<Option<f64>, SignalError> {
        self.check()?;
        Ok(self.price)
    }
}

/// One stub for all three auxiliary traits.
#[derive(Clone)]
struct StubAux {
    value: Value,
    fail: bool,
}

impl StubAux {
    fn ok(value: Value) -> Arc<Self> {
        Arc::new(Self { value, fail: false })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            value: Value::Null,
            fail: true,
        })
    }

    fn result(&self) -> Result<Value, SignalError> {
        if self.fail {
            Err(SignalError::ApiError("scrape failed".to_string()))
        } else {
            Ok(self.value.clone())
        }
    }
}

#[async_trait]
impl InsiderSource for StubAux {
    async fn scrape(&self, _symbol: &str) -> Result<Value, SignalError> {
        self.result()
    }
}

#[async_trait]
impl NewsSource for StubAux {
    async fn scrape(&self, _symbol: &str) -> Result<Value, SignalError> {
        self.result()
    }
}

#[async_trait]
impl SectorSource for StubAux {
    async fn scrape(
        &self,
        _symbol: &str,
        _sector: Option<&str>,
        _market: Market,
    ) -> Result<Value, SignalError> {
        self.result()
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn default_aux() -> AuxSources {
    AuxSources {
        insider: StubAux::ok(json!({ "insider_trades": [{ "insider": "CEO", "type": "buy" }] })),
        uk_insider: StubAux::ok(json!({ "insider_trades": [{ "source": "uk-register" }] })),
        news: StubAux::ok(json!({ "news_articles": [{ "title": "Upgrade" }] })),
        sector: StubAux::ok(json!({ "sector_performance": ["+1.2%"], "sector_news": [] })),
    }
}

fn failing_aux() -> AuxSources {
    AuxSources {
        insider: StubAux::failing(),
        uk_insider: StubAux::failing(),
        news: StubAux::failing(),
        sector: StubAux::failing(),
    }
}

async fn store_with_aapl() -> Arc<Store> {
    let store = Arc::new(Store::in_memory().await.unwrap());
    store
        .add_ticker("AAPL", "Apple Inc.", Some("Technology"), Market::Us, None)
        .await
        .unwrap();
    store
}

fn engine(
    store: &Arc<Store>,
    provider: &Arc<StubProvider>,
    market: StubMarket,
    aux: AuxSources,
) -> AnalysisEngine {
    AnalysisEngine::new(store.clone(), provider.clone(), Arc::new(market), aux)
}

async fn run(engine: &AnalysisEngine, symbol: &str) -> Vec<ProgressEvent> {
    let (tx, mut rx) = mpsc::channel(64);
    engine.analyze_ticker(symbol, &tx).await.unwrap();
    drop(tx);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_ticker_emits_single_terminal_error() {
    let store = Arc::new(Store::in_memory().await.unwrap());
    let provider = Arc::new(StubProvider::scoring(5.0));
    let engine = engine(&store, &provider, StubMarket::healthy(), default_aux());

    let events = run(&engine, "GHOST").await;
    assert_eq!(events.len(), 1);
    assert!(events[0].done);
    assert_eq!(events[0].step, "error");
    assert_eq!(provider.call_count(), 0);
    assert!(store.get_latest_synthesis("GHOST").await.unwrap().is_none());
}

#[tokio::test]
async fn pipeline_completes_and_persists() {
    let store = store_with_aapl().await;
    let provider = Arc::new(StubProvider::scoring(5.0).with_response(
        SYNTHESIS_PATTERN,
        json!({
            "overall_score": 6.0,
            "recommendation": "buy",
            "narrative": "Strong across the board.",
        }),
    ));
    let engine = engine(&store, &provider, StubMarket::healthy(), default_aux());

    let events = run(&engine, "AAPL").await;

    let steps: Vec<&str> = events.iter().map(|e| e.step.as_str()).collect();
    assert_eq!(
        steps,
        vec![
            "Fetching market data...",
            "Scraping insider data...",
            "Scraping news...",
            "Scraping sector data...",
            "Analyzing fundamentals...",
            "Analyzing analyst_consensus...",
            "Analyzing insider_activity...",
            "Analyzing technicals...",
            "Analyzing sentiment...",
            "Analyzing sector context...",
            "Analyzing risk...",
            "Generating overall recommendation...",
            "Complete",
        ]
    );
    assert!(events.last().unwrap().done);
    assert!(events[..events.len() - 1].iter().all(|e| !e.done));
    assert_eq!(events[4].category, Some(SignalCategory::Fundamentals));
    assert_eq!(events[11].category, None);

    // 7 category calls + 1 synthesis call.
    assert_eq!(provider.call_count(), 8);

    let synthesis = store.get_latest_synthesis("AAPL").await.unwrap().unwrap();
    assert_eq!(synthesis.overall_score, 6.0);
    assert_eq!(synthesis.recommendation, "buy");
    assert_eq!(synthesis.narrative, "Strong across the board.");
    let scores: std::collections::HashMap<String, f64> =
        serde_json::from_str(&synthesis.signal_scores).unwrap();
    assert_eq!(scores.len(), 7);
    assert!(scores.values().all(|s| *s == 5.0));

    let recs = store.get_recommendations(Some("AAPL")).await.unwrap();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].recommendation, "buy");
    assert_eq!(recs[0].price_at_rec, Some(230.0));
}

#[tokio::test]
async fn pipeline_terminates_despite_total_upstream_failure() {
    let store = store_with_aapl().await;
    let provider = Arc::new(StubProvider::erroring());
    let engine = engine(&store, &provider, StubMarket::failing(), failing_aux());

    let events = run(&engine, "AAPL").await;
    assert!(events.last().unwrap().done);
    assert_eq!(events.last().unwrap().step, "Complete");

    // Every category degraded to score 0 / low confidence, synthesis fell
    // back to the weighted computation.
    let synthesis = store.get_latest_synthesis("AAPL").await.unwrap().unwrap();
    assert_eq!(synthesis.overall_score, 0.0);
    assert_eq!(synthesis.recommendation, "hold");

    // Price capture failed too, so the backtest row is not backtestable.
    let recs = store.get_recommendations(Some("AAPL")).await.unwrap();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].price_at_rec, None);
}

#[tokio::test]
async fn each_single_stage_failure_still_terminates() {
    for failing_stage in 0..4 {
        let store = store_with_aapl().await;
        let provider = Arc::new(StubProvider::scoring(2.0));
        let market = if failing_stage == 0 {
            StubMarket::failing()
        } else {
            StubMarket::healthy()
        };
        let aux = AuxSources {
            insider: if failing_stage == 1 {
                StubAux::failing()
            } else {
                StubAux::ok(json!({ "insider_trades": [] }))
            },
            uk_insider: StubAux::failing(),
            news: if failing_stage == 2 {
                StubAux::failing()
            } else {
                StubAux::ok(json!({ "news_articles": [] }))
            },
            sector: if failing_stage == 3 {
                StubAux::failing()
            } else {
                StubAux::ok(json!({ "sector_performance": [], "sector_news": [] }))
            },
        };
        let engine = engine(&store, &provider, market, aux);

        let events = run(&engine, "AAPL").await;
        assert!(events.last().unwrap().done, "stage {failing_stage}");
        let history = store.get_synthesis_history("AAPL", 10).await.unwrap();
        assert_eq!(history.len(), 1, "stage {failing_stage}");
    }
}

#[tokio::test]
async fn second_run_with_identical_data_hits_the_cache() {
    let store = store_with_aapl().await;
    let provider = Arc::new(StubProvider::scoring(4.0));
    let engine = engine(&store, &provider, StubMarket::healthy(), default_aux());

    run(&engine, "AAPL").await;
    assert_eq!(provider.call_count(), 8);

    let events = run(&engine, "AAPL").await;
    // Only the synthesis re-runs; every category came from cache.
    assert_eq!(provider.call_count(), 9);
    let cached_steps: Vec<&str> = events
        .iter()
        .filter(|e| e.step.starts_with("Using cached"))
        .map(|e| e.step.as_str())
        .collect();
    assert_eq!(cached_steps.len(), 7);
    assert!(cached_steps.contains(&"Using cached fundamentals..."));
    assert!(cached_steps.contains(&"Using cached sector context..."));
    assert!(cached_steps.contains(&"Using cached risk assessment..."));

    // The cached run reproduces the first run's scores exactly.
    let history = store.get_synthesis_history("AAPL", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].overall_score, history[1].overall_score);
    assert_eq!(history[0].signal_scores, history[1].signal_scores);
}

#[tokio::test]
async fn changed_category_data_invalidates_its_cache_and_the_risk_cache() {
    let store = store_with_aapl().await;
    let provider = Arc::new(StubProvider::scoring(4.0));
    let market = StubMarket::healthy();
    let first = engine(&store, &provider, market.clone(), default_aux());
    run(&first, "AAPL").await;
    assert_eq!(provider.call_count(), 8);

    let mut changed = market;
    changed
        .fundamentals
        .insert("P/E".to_string(), json!("31.10"));
    let second = engine(&store, &provider, changed, default_aux());
    run(&second, "AAPL").await;

    // Fresh calls: fundamentals (its own hash changed), risk assessment
    // (keyed on the whole payload), and the always-fresh synthesis.
    assert_eq!(provider.call_count(), 11);
}

#[tokio::test]
async fn technicals_result_levels_are_folded_into_the_narrative() {
    let store = store_with_aapl().await;
    let provider = Arc::new(StubProvider::scoring(3.0).with_response(
        "technical indicators for",
        json!({
            "score": 2.0,
            "confidence": "medium",
            "narrative": "Uptrend intact.",
            "support_levels": ["$100 - SMA50", "$95 - 52W Low"],
            "resistance_levels": ["$120 - 52W High"],
            "entry_price": "$105-$108",
            "stop_loss": "$95",
        }),
    ));
    let market = StubMarket::healthy();
    let technicals_input = Value::Object(market.technicals.clone());
    let engine = engine(&store, &provider, market, default_aux());

    run(&engine, "AAPL").await;

    let cached = store
        .get_cached_analysis("AAPL", SignalCategory::Technicals, &content_hash(&technicals_input))
        .await
        .unwrap()
        .expect("technicals analysis persisted");
    assert!(cached.narrative.starts_with("Uptrend intact."));
    assert!(cached
        .narrative
        .contains("**Support Levels:** $100 - SMA50 | $95 - 52W Low"));
    assert!(cached.narrative.contains("**Resistance Levels:** $120 - 52W High"));
    assert!(cached.narrative.contains("**Suggested Entry:** $105-$108"));
    assert!(cached.narrative.contains("**Stop-Loss:** $95"));
}

#[tokio::test]
async fn synthesis_omissions_fall_back_to_the_scoring_module() {
    let store = store_with_aapl().await;
    let provider = Arc::new(
        StubProvider::scoring(5.0)
            .with_response(SYNTHESIS_PATTERN, json!({ "narrative": "All good." })),
    );
    let engine = engine(&store, &provider, StubMarket::healthy(), default_aux());

    run(&engine, "AAPL").await;

    // Weighted average of a constant 5.0 across all categories is 5.0,
    // which maps to "buy".
    let synthesis = store.get_latest_synthesis("AAPL").await.unwrap().unwrap();
    assert_eq!(synthesis.overall_score, 5.0);
    assert_eq!(synthesis.recommendation, "buy");
    assert_eq!(synthesis.narrative, "All good.");
}

#[tokio::test]
async fn synthesis_score_is_clamped_and_recommendation_passes_through() {
    let store = store_with_aapl().await;
    let provider = Arc::new(StubProvider::scoring(5.0).with_response(
        SYNTHESIS_PATTERN,
        json!({
            "overall_score": 42.0,
            "recommendation": "strong buy",
            "narrative": "Moonshot.",
            "entry_strategy": "Scale in below **$200**.",
        }),
    ));
    let engine = engine(&store, &provider, StubMarket::healthy(), default_aux());

    run(&engine, "AAPL").await;

    let synthesis = store.get_latest_synthesis("AAPL").await.unwrap().unwrap();
    assert_eq!(synthesis.overall_score, 10.0);
    // Provider-supplied labels are persisted verbatim.
    assert_eq!(synthesis.recommendation, "strong buy");
    assert!(synthesis.narrative.contains("Moonshot."));
    assert!(synthesis
        .narrative
        .contains("## Entry Strategy\n\nScale in below **$200**."));
}

#[tokio::test]
async fn uk_ticker_routes_to_the_uk_insider_source() {
    let store = Arc::new(Store::in_memory().await.unwrap());
    store
        .add_ticker("VOD", "Vodafone", Some("Telecom"), Market::Uk, Some("VOD.L"))
        .await
        .unwrap();
    let provider = Arc::new(StubProvider::scoring(1.0));
    let engine = engine(&store, &provider, StubMarket::healthy(), default_aux());

    run(&engine, "VOD").await;

    let uk_payload = json!({ "insider_trades": [{ "source": "uk-register" }] });
    let cached = store
        .get_cached_analysis("VOD", SignalCategory::InsiderActivity, &content_hash(&uk_payload))
        .await
        .unwrap();
    assert!(cached.is_some(), "UK insider payload should be what was scored");
}

#[tokio::test]
async fn successful_resolution_is_persisted() {
    let store = store_with_aapl().await;
    let provider = Arc::new(StubProvider::scoring(1.0));
    let mut market = StubMarket::healthy();
    market.resolution = Some(("AAPL.L".to_string(), Market::Uk));
    let engine = engine(&store, &provider, market, default_aux());

    run(&engine, "AAPL").await;

    let ticker = store.get_ticker("AAPL").await.unwrap().unwrap();
    assert_eq!(ticker.resolved_symbol.as_deref(), Some("AAPL.L"));
    assert_eq!(ticker.market, Market::Uk);
}

#[tokio::test]
async fn failed_resolution_is_non_fatal() {
    let store = store_with_aapl().await;
    let provider = Arc::new(StubProvider::scoring(1.0));
    let mut market = StubMarket::healthy();
    market.resolution_fails = true;
    let engine = engine(&store, &provider, market, default_aux());

    let events = run(&engine, "AAPL").await;
    assert!(events.last().unwrap().done);

    let ticker = store.get_ticker("AAPL").await.unwrap().unwrap();
    assert!(ticker.resolved_symbol.is_none());
    assert!(store.get_latest_synthesis("AAPL").await.unwrap().is_some());
}

#[tokio::test]
async fn dropped_receiver_does_not_abort_the_pipeline() {
    let store = store_with_aapl().await;
    let provider = Arc::new(StubProvider::scoring(5.0));
    let engine = engine(&store, &provider, StubMarket::healthy(), default_aux());

    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    engine.analyze_ticker("AAPL", &tx).await.unwrap();

    assert!(store.get_latest_synthesis("AAPL").await.unwrap().is_some());
}
