//! Command-line interface for the stock selector.

mod sources;

use std::collections::HashMap;
use std::sync::Arc;

use analysis_engine::{AnalysisEngine, AuxSources};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use data_store::Store;
use insider_client::FmpInsiderSource;
use scrape_client::{ScrapeCache, ScrapeClient};
use signal_core::{Market, ProgressEvent, ReasoningProvider};
use tokio::sync::mpsc;
use yahoo_client::YahooClient;

use crate::sources::DisabledSectorSource;

#[derive(Parser)]
#[command(name = "stock-selector")]
#[command(about = "Multi-signal stock analysis with LLM scoring", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Track a new ticker
    Add {
        symbol: String,
        /// Company display name
        #[arg(long)]
        name: String,
        #[arg(long)]
        sector: Option<String>,
        /// Listing market: US or UK
        #[arg(long, default_value = "US")]
        market: String,
    },
    /// Stop tracking a ticker (removes all its history)
    Remove { symbol: String },
    /// List tracked tickers with their latest recommendation
    List,
    /// Run the full analysis pipeline for one or more tickers
    Analyze { symbols: Vec<String> },
    /// Show the latest synthesis for a ticker
    Show { symbol: String },
    /// Evaluate historical recommendations against observed prices
    Backtest { symbol: Option<String> },
    /// Inspect or configure scoring weights
    Weights {
        #[command(subcommand)]
        command: WeightsCommand,
    },
}

#[derive(Subcommand)]
enum WeightsCommand {
    /// Show the active weights and preset
    Show,
    /// Set custom weights from a JSON object of category -> weight
    Set { json: String },
    /// Activate a named preset (balanced/growth/value/income/momentum)
    Preset { name: String },
}

struct App {
    store: Arc<Store>,
    engine: AnalysisEngine,
    market_data: Arc<YahooClient>,
}

async fn build_app() -> anyhow::Result<App> {
    let db_path =
        std::env::var("STOCK_SELECTOR_DB").unwrap_or_else(|_| "data/stock_selector.db".to_string());
    let backend = std::env::var("STOCK_SELECTOR_LLM")
        .unwrap_or_else(|_| "codex".to_string())
        .to_lowercase();

    let store = Arc::new(Store::connect(&db_path).await?);
    let llm: Arc<dyn ReasoningProvider> = Arc::from(llm_client::create_provider(&backend)?);
    let market_data = Arc::new(YahooClient::new());

    let scrape = Arc::new(ScrapeClient::new(Some(
        store.clone() as Arc<dyn ScrapeCache>
    )));
    let insider = Arc::new(FmpInsiderSource::new(
        scrape,
        std::env::var("FMP_API_KEY").unwrap_or_default(),
    ));
    if !insider.available() {
        tracing::warn!("FMP_API_KEY not set; insider activity will be empty");
    }

    let engine = AnalysisEngine::new(
        store.clone(),
        llm,
        market_data.clone(),
        AuxSources {
            insider: insider.clone(),
            uk_insider: insider,
            news: market_data.clone(),
            sector: Arc::new(DisabledSectorSource),
        },
    );

    Ok(App {
        store,
        engine,
        market_data,
    })
}

/// Run one ticker's pipeline, printing progress events as they stream.
async fn analyze_one(engine: &AnalysisEngine, symbol: &str) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<ProgressEvent>(32);

    let pipeline = async {
        let result = engine.analyze_ticker(symbol, &tx).await;
        drop(tx);
        result
    };
    let printer = async {
        while let Some(event) = rx.recv().await {
            if event.done && event.step == "error" {
                println!("{}: ticker not found (add it first)", event.symbol);
            } else {
                match event.category {
                    Some(category) => println!("[{}] {} ({category})", event.symbol, event.step),
                    None => println!("[{}] {}", event.symbol, event.step),
                }
            }
        }
    };

    let (result, ()) = tokio::join!(pipeline, printer);
    result.with_context(|| format!("analysis failed for {symbol}"))?;
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let app = build_app().await?;

    match cli.command {
        Command::Add {
            symbol,
            name,
            sector,
            market,
        } => {
            app.store
                .add_ticker(
                    &symbol,
                    &name,
                    sector.as_deref(),
                    Market::parse(&market),
                    None,
                )
                .await?;
            println!("Tracking {}", symbol.to_uppercase());
        }

        Command::Remove { symbol } => {
            app.store.remove_ticker(&symbol).await?;
            println!("Removed {} and all its history", symbol.to_uppercase());
        }

        Command::List => {
            let rows = app.store.get_dashboard_rows().await?;
            if rows.is_empty() {
                println!("No tickers tracked yet. Use `stock-selector add`.");
                return Ok(());
            }
            println!(
                "{:<8} {:<28} {:<6} {:>7}  {:<6} {}",
                "SYMBOL", "NAME", "MKT", "SCORE", "REC", "LAST REFRESHED"
            );
            for row in rows {
                println!(
                    "{:<8} {:<28} {:<6} {:>7}  {:<6} {}",
                    row.symbol,
                    row.name,
                    row.market,
                    row.overall_score
                        .map(|s| format!("{s:+.2}"))
                        .unwrap_or_else(|| "-".to_string()),
                    row.recommendation.as_deref().unwrap_or("-"),
                    row.last_refreshed.as_deref().unwrap_or("never"),
                );
            }
        }

        Command::Analyze { symbols } => {
            if symbols.is_empty() {
                bail!("pass at least one symbol to analyze");
            }
            for symbol in symbols {
                analyze_one(&app.engine, &symbol).await?;
            }
        }

        Command::Show { symbol } => {
            match app.store.get_latest_synthesis(&symbol).await? {
                Some(synthesis) => {
                    println!(
                        "{}  score {:+.2}  {}  ({})",
                        synthesis.symbol,
                        synthesis.overall_score,
                        synthesis.recommendation.to_uppercase(),
                        synthesis.created_at.format("%Y-%m-%d %H:%M UTC"),
                    );
                    println!("\n{}", synthesis.narrative);
                }
                None => println!("No analysis yet for {}", symbol.to_uppercase()),
            }
        }

        Command::Backtest { symbol } => {
            let summary = backtest_evaluator::run_backtest(
                &app.store,
                app.market_data.as_ref(),
                symbol.as_deref(),
            )
            .await?;

            println!(
                "{} recommendations, {} correct on at least one horizon\n",
                summary.total, summary.correct
            );
            for (horizon, bucket) in &summary.hit_rates {
                println!(
                    "{horizon:>4}d: {:>3}/{:<3} correct ({:.1}%)",
                    bucket.correct, bucket.total, bucket.rate
                );
            }
            for result in &summary.results {
                let outcomes: Vec<String> = result
                    .outcomes
                    .iter()
                    .map(|(h, o)| {
                        format!(
                            "{h}d {:+.2}% {}",
                            o.pct_change,
                            if o.correct { "✓" } else { "✗" }
                        )
                    })
                    .collect();
                println!(
                    "{:<8} {:<4} @ {:<8.2} {}  [{}]",
                    result.symbol,
                    result.recommendation,
                    result.price_at_rec,
                    result.created_at.format("%Y-%m-%d"),
                    outcomes.join(", "),
                );
            }
        }

        Command::Weights { command } => match command {
            WeightsCommand::Show => {
                let weights = app.store.get_scoring_weights().await?;
                let preset = app.store.get_active_preset().await?;
                println!("Active preset: {}", preset.as_deref().unwrap_or("custom"));
                let mut entries: Vec<_> = weights.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                for (category, weight) in entries {
                    println!("{category:<20} {:>5.1}%", weight * 100.0);
                }
            }
            WeightsCommand::Set { json } => {
                let weights: HashMap<String, f64> =
                    serde_json::from_str(&json).context("weights must be a JSON object")?;
                let (valid, message) = scoring::validate_weights(&weights);
                if !valid {
                    bail!("invalid weights: {message}");
                }
                app.store.set_scoring_weights(&weights).await?;
                app.store.set_active_preset("custom").await?;
                println!("Weights updated");
            }
            WeightsCommand::Preset { name } => {
                let Some(preset) = scoring::preset(&name) else {
                    let known: Vec<&str> =
                        scoring::SCORING_PRESETS.iter().map(|p| p.key).collect();
                    bail!("unknown preset '{name}' (known: {})", known.join(", "));
                };
                app.store.set_scoring_weights(&preset.weights()).await?;
                app.store.set_active_preset(preset.key).await?;
                println!("{} preset activated: {}", preset.name, preset.description);
            }
        },
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    run().await
}
