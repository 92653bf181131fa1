// =============================================================================
// Meridian — Main Entry Point
// =============================================================================
//
// The engine starts in dry-run mode by default. Live order routing requires
// both `execution.mode = "live"` and the `enable_real_orders` latch, plus a
// broker transport implementing `BrokerGateway` — the bundled gateway is the
// deterministic simulator, so live mode refuses to start here.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod broker;
mod config;
mod decision;
mod errors;
mod executor;
mod exit_planner;
mod gates;
mod guards;
mod htf;
mod indicators;
mod journal;
mod market_data;
mod onboarding;
mod pipeline;
mod risk;
mod session;
mod session_filter;
mod structure;
mod types;

use std::collections::HashMap;

use anyhow::bail;
use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::broker::{BrokerGateway, SimBroker};
use crate::config::EngineConfig;
use crate::market_data::{BarSeries, CsvReplay, MarketData, SyntheticFeed};
use crate::pipeline::TradingPipeline;
use crate::types::ExecutionMode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║          Meridian Decision Engine — Starting Up          ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("MERIDIAN_CONFIG").unwrap_or_else(|_| "meridian.json".to_string());
    let mut config = EngineConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        EngineConfig::default()
    });

    // Override symbols from env if available.
    if let Ok(symbols) = std::env::var("MERIDIAN_SYMBOLS") {
        config.symbols = symbols
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if config.symbols.is_empty() {
        bail!("no symbols configured");
    }

    info!(symbols = ?config.symbols, "configured symbols");
    info!(config_hash = %config.config_hash(), "config fingerprint");
    info!(
        mode = %config.execution.mode,
        enable_real_orders = config.execution.enable_real_orders,
        "execution mode"
    );

    if config.execution.mode == ExecutionMode::Live && config.execution.enable_real_orders {
        bail!(
            "live order routing requires a broker transport; only the simulated \
             gateway is bundled — run in dry_run or paper mode"
        );
    }

    // ── 2. Gateway from configured broker metadata ───────────────────────
    let mut symbol_meta = HashMap::new();
    for symbol in &config.symbols {
        match config.broker_symbols.get(symbol) {
            Some(meta) => {
                meta.validate(symbol)?;
                symbol_meta.insert(symbol.clone(), meta.clone());
            }
            None => bail!("no broker metadata configured for {symbol}"),
        }
    }
    let gateway = SimBroker::new(symbol_meta, config.system.sim_equity);

    // ── 3. Data source ───────────────────────────────────────────────────
    let timeframe = config.timeframe.clone();
    let mut feed: Box<dyn MarketData + Send> = match config.system.data_source.as_str() {
        "csv" => {
            info!(dir = %config.system.csv_dir, "replaying bars from CSV");
            Box::new(CsvReplay::new(&config.system.csv_dir, &timeframe))
        }
        _ => {
            info!("generating synthetic bars");
            Box::new(SyntheticFeed::new(Utc::now(), 15))
        }
    };

    // ── 4. Pipeline & series warm-up ─────────────────────────────────────
    let symbols = config.symbols.clone();
    let min_bars = config.system.min_bars;
    let max_bars = config.system.max_bars_retained;
    let close_on_shutdown = config.sessions.close_positions_on_session_end;

    let mut pipeline = TradingPipeline::new(config, gateway, Utc::now())?;

    let mut series_by_symbol: HashMap<String, BarSeries> = HashMap::new();
    for symbol in &symbols {
        let mut series = BarSeries::new(symbol.clone(), timeframe.clone(), max_bars);
        for bar in feed.fetch_history(symbol, &timeframe, min_bars) {
            pipeline.gateway_mut().update_from_bar(symbol, &bar);
            if let Err(e) = series.push(bar) {
                warn!(symbol = %symbol, error = %e, "warm-up bar rejected");
            }
        }
        info!(symbol = %symbol, bars = series.len(), "series warmed up");
        series_by_symbol.insert(symbol.clone(), series);
    }

    // ── 5. Bar loop with graceful shutdown ───────────────────────────────
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(500));
    let mut exhausted = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received — draining");
                break;
            }
            _ = interval.tick() => {
                let mut any_bar = false;
                for symbol in &symbols {
                    let Some(series) = series_by_symbol.get_mut(symbol) else { continue };
                    let Some(bar) = feed.fetch_next_bar(symbol) else { continue };
                    any_bar = true;

                    pipeline.gateway_mut().update_from_bar(symbol, &bar);
                    if let Err(e) = series.push(bar) {
                        warn!(symbol = %symbol, error = %e, "bar rejected");
                        continue;
                    }
                    match pipeline.process_bar(series) {
                        Ok(decisions) if !decisions.is_empty() => {
                            info!(symbol = %symbol, decisions = decisions.len(), "bar produced decisions");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            // Recoverable by contract: log with context and
                            // move on to the next bar.
                            error!(symbol = %symbol, error = %e, "bar processing error");
                        }
                    }
                }
                if !any_bar {
                    exhausted = true;
                    info!("data source exhausted");
                    break;
                }
            }
        }
    }

    // ── 6. Drain ─────────────────────────────────────────────────────────
    if close_on_shutdown && !exhausted {
        info!("closing tracked positions on shutdown");
        for symbol in &symbols {
            if let Ok(positions) = pipeline.gateway_mut().positions(Some(symbol)) {
                for position in positions {
                    let _ = pipeline
                        .gateway_mut()
                        .close_position(position.ticket, "shutdown close");
                }
            }
        }
    }

    pipeline.finalize_session();
    let stats = pipeline.stats();
    info!(
        processed_bars = stats.processed_bars,
        decisions_generated = stats.decisions_generated,
        orders_executed = stats.orders_executed,
        "engine stopped"
    );

    Ok(())
}
