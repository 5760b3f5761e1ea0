use anyhow::{bail, Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::backfill::BackfillService;
use crate::config::Config;
use crate::data::{FailedSymbolCache, PriceStore, ProviderChain};
use crate::health::HealthMonitor;
use crate::outcomes::{OutcomeCalculator, OutcomeStore};
use crate::registry::{TickerRegistry, TickerStatus};

fn build_chain(config: &Config) -> Result<Arc<ProviderChain>> {
    let chain = ProviderChain::from_config(config).context("Failed to build provider chain")?;
    Ok(Arc::new(chain))
}

/// Backfill prices then compute outcomes, in sequence. Individual symbol
/// failures are logged and skipped; only an unrecoverable top-level
/// failure exits non-zero.
pub async fn auto_pipeline(pool: PgPool, config: Config, days_back: u32, limit: i64) -> Result<()> {
    let chain = build_chain(&config)?;
    let registry = TickerRegistry::new(pool.clone());
    let prices = PriceStore::new(pool.clone());
    let outcomes = OutcomeStore::new(pool.clone());
    let failed = Arc::new(FailedSymbolCache::new());

    let service = BackfillService::new(
        chain.clone(),
        prices.clone(),
        registry.clone(),
        failed.clone(),
    );

    // Step 1: re-register symbols from recent predictions. This is the
    // backstop for reactive triggers lost to crashes or queue overflow.
    let recent = outcomes.recent_predictions(days_back).await?;
    let mut registered_new = 0;
    for prediction in &recent {
        let symbols: Vec<String> = prediction.assets.iter().map(|a| a.symbol.clone()).collect();
        let outcome = registry.register(&symbols, Some(prediction.id)).await?;
        registered_new += outcome.newly_registered.len();
    }
    info!(
        "Scanned {} recent predictions, {} newly registered symbols",
        recent.len(),
        registered_new
    );

    // Step 2: backfill price history for all active symbols
    let active = registry.list_active().await?;
    let backfill_summary = service.backfill_symbols(&active, days_back).await;

    // Step 3: outcome sweep
    let calculator = OutcomeCalculator::new(
        outcomes,
        prices,
        registry,
        failed,
        config.outcomes.clone(),
    );
    let outcome_summary = calculator.calculate_all(limit).await?;

    println!("\n=== Auto Pipeline Summary ===");
    println!("Predictions scanned:   {}", recent.len());
    println!("Symbols registered:    {}", registered_new);
    println!(
        "Prices: {} symbols processed, {} fetched, {} up to date, {} no data, {} failures ({} records)",
        backfill_summary.symbols_processed,
        backfill_summary.symbols_fetched,
        backfill_summary.symbols_up_to_date,
        backfill_summary.symbols_no_data,
        backfill_summary.failures,
        backfill_summary.records_upserted
    );
    println!(
        "Outcomes: {} predictions, {} pairs updated ({} complete), {} awaiting prices, {} failures",
        outcome_summary.predictions_seen,
        outcome_summary.pairs_updated,
        outcome_summary.pairs_completed,
        outcome_summary.pairs_awaiting_prices,
        outcome_summary.failures
    );
    println!("Pipeline completed successfully");

    Ok(())
}

/// Backfill daily history for the given symbols (or all active ones)
pub async fn backfill_prices(
    pool: PgPool,
    config: Config,
    symbols: Vec<String>,
    days_back: u32,
) -> Result<()> {
    let chain = build_chain(&config)?;
    let registry = TickerRegistry::new(pool.clone());
    let prices = PriceStore::new(pool.clone());
    let failed = Arc::new(FailedSymbolCache::new());

    let service = BackfillService::new(chain, prices, registry.clone(), failed);

    let targets = if symbols.is_empty() {
        registry.list_active().await?
    } else {
        // Explicit symbols are registered first so coverage metadata has
        // a row to land on
        registry.register(&symbols, None).await?;
        symbols
    };

    if targets.is_empty() {
        println!("No symbols to backfill");
        return Ok(());
    }

    let summary = service.backfill_symbols(&targets, days_back).await;

    println!("\n=== Price Backfill Summary ===");
    println!("Symbols processed: {}", summary.symbols_processed);
    println!("Fetched:           {}", summary.symbols_fetched);
    println!("Up to date:        {}", summary.symbols_up_to_date);
    println!("No data (invalid): {}", summary.symbols_no_data);
    println!("Skipped:           {}", summary.symbols_skipped);
    println!("Failures:          {}", summary.failures);
    println!("Records upserted:  {}", summary.records_upserted);

    Ok(())
}

/// Probe providers and audit data freshness
pub async fn health_check(
    pool: PgPool,
    config: Config,
    providers: bool,
    freshness: bool,
    alert: bool,
    json: bool,
) -> Result<()> {
    let chain = build_chain(&config)?;
    let registry = TickerRegistry::new(pool);

    // Neither flag means both checks
    let (check_providers, check_freshness) = if !providers && !freshness {
        (true, true)
    } else {
        (providers, freshness)
    };

    let monitor = HealthMonitor::new(chain, registry, config.health.clone());
    let report = monitor
        .run_health_check(check_providers, check_freshness)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("\n=== Health Report ({}) ===", report.generated_at);
        for provider in &report.providers {
            let state = if provider.reachable { "reachable" } else { "UNREACHABLE" };
            let latency = provider
                .latency_ms
                .map(|ms| format!("{} ms", ms))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "  provider {:<10} {:<12} latency: {:<8} calls: {} ok / {} failed{}",
                provider.name,
                state,
                latency,
                provider.stats.successes,
                provider.stats.failures,
                if provider.degraded { "  [DEGRADED]" } else { "" }
            );
            if let Some(err) = &provider.error {
                println!("    error: {}", err);
            }
        }
        for symbol in report.freshness.iter().filter(|f| f.stale) {
            match (symbol.price_data_end, symbol.trading_days_behind) {
                (Some(end), Some(behind)) => println!(
                    "  stale: {} last price {} ({} trading days behind)",
                    symbol.symbol, end, behind
                ),
                _ => println!("  stale: {} has no price data", symbol.symbol),
            }
        }
        println!(
            "Overall: {} ({} stale symbols)",
            if report.healthy { "HEALTHY" } else { "UNHEALTHY" },
            report.stale_symbols
        );
    }

    if alert && !report.healthy {
        bail!("Health check failed: system unhealthy");
    }

    Ok(())
}

/// List registry entries with lifecycle stats
pub async fn ticker_registry(pool: PgPool, status: String) -> Result<()> {
    let registry = TickerRegistry::new(pool);

    let filter = match status.to_lowercase().as_str() {
        "all" => None,
        other => match TickerStatus::parse(other) {
            Some(s) => Some(s),
            None => bail!("Unknown status filter '{}' (use active|inactive|invalid|all)", other),
        },
    };

    let entries = registry.list(filter).await?;
    let stats = registry.stats().await?;

    println!("\n=== Ticker Registry ===");
    for entry in &entries {
        let coverage = match (entry.price_data_start, entry.price_data_end) {
            (Some(start), Some(end)) => {
                format!("{} to {} ({} records)", start, end, entry.total_price_records)
            }
            _ => "no price data".to_string(),
        };
        println!(
            "  {:<10} {:<10} first seen {}  {}{}",
            entry.symbol,
            entry.status.to_string(),
            entry.first_seen_date,
            coverage,
            entry
                .status_reason
                .as_deref()
                .map(|r| format!("  [{}]", r))
                .unwrap_or_default()
        );
    }
    println!(
        "Total: {} ({} active, {} inactive, {} invalid)",
        stats.total, stats.active, stats.inactive, stats.invalid
    );

    Ok(())
}

/// Manually register symbols
pub async fn register_tickers(pool: PgPool, symbols: Vec<String>) -> Result<()> {
    let registry = TickerRegistry::new(pool);
    let outcome = registry.register(&symbols, None).await?;

    for symbol in &outcome.newly_registered {
        println!("Registered {}", symbol);
    }
    for symbol in &outcome.already_known {
        println!("Already known: {}", symbol);
    }
    for symbol in &outcome.skipped {
        warn!("Skipped malformed symbol {:?}", symbol);
        println!("Skipped malformed symbol: {:?}", symbol);
    }

    println!(
        "{} new, {} known, {} skipped",
        outcome.newly_registered.len(),
        outcome.already_known.len(),
        outcome.skipped.len()
    );

    Ok(())
}

/// Run migrations on demand
pub async fn migrate(pool: PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    println!("Migrations completed successfully");
    Ok(())
}
