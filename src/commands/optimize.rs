use crate::commands::market_data_snapshot::{load_candles, MarketSelection};
use crate::config::RuntimeSettings;
use crate::models::{parse_parameter_map_from_json, OptimizationResult};
use crate::optimizer::WalkForwardOptimizer;
use crate::optimizer_status::OptimizerStatus;
use crate::report::{
    format_segment_line, write_optimization_summary, OptimizationSummary, OPTIMIZATION_LOG_FILE,
};
use crate::search::create_parameter_search;
use crate::strategy::default_search_space;
use anyhow::{Context, Result};
use log::{info, warn};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Runs the optimization and cancels it at the next segment boundary on Ctrl-C.
pub async fn run(
    settings: &RuntimeSettings,
    template_id: &str,
    params_json: Option<&str>,
    selection: &MarketSelection,
) -> Result<OptimizationResult> {
    let status = OptimizerStatus::new();
    let interrupt_status = status.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current segment");
            interrupt_status.cancel();
        }
    });

    let result = run_with_status(settings, template_id, params_json, selection, status).await;
    interrupt.abort();
    result
}

pub async fn run_with_status(
    settings: &RuntimeSettings,
    template_id: &str,
    params_json: Option<&str>,
    selection: &MarketSelection,
    status: OptimizerStatus,
) -> Result<OptimizationResult> {
    info!("Received optimize command for template_id={}", template_id);
    let base_params = match params_json {
        Some(raw) => parse_parameter_map_from_json(raw)?,
        None => HashMap::new(),
    };
    let market = load_candles(settings, selection).await?;

    let config = settings.walk_forward_config();
    let space = default_search_space(template_id)?;
    let search = create_parameter_search(settings, space, base_params)?;
    let optimizer =
        WalkForwardOptimizer::new(template_id, &market.symbol, &market.timeframe, config.clone())?
            .with_status(status.clone())
            .with_progress(true);

    let candles = Arc::new(market.candles);
    let worker_candles = Arc::clone(&candles);
    let result = tokio::task::spawn_blocking(move || {
        optimizer.optimize(&worker_candles, search.as_ref())
    })
    .await
    .context("Optimization worker panicked")?
    .with_context(|| format!("Walk-forward optimization of {} failed", template_id))?;

    for outcome in &result.segments {
        println!("{}", format_segment_line(outcome));
    }
    for index in &result.failed_segments {
        println!("Segment {}: skipped after search failure", index + 1);
    }
    println!("Average test capital: ${:.2}", result.aggregate_score);
    if result.cancelled {
        warn!("Optimization was cancelled; results cover completed segments only");
    }

    let summary_path = Path::new(&settings.log_dir).join(OPTIMIZATION_LOG_FILE);
    write_optimization_summary(
        &summary_path,
        &OptimizationSummary {
            strategy: template_id,
            symbol: &market.symbol,
            timeframe: &market.timeframe,
            num_candles: candles.len(),
            initial_balance: config.initial_balance,
            trials_per_segment: config.trial_budget,
            requested_segments: config.n_splits,
            segments: &result.segments,
            failed_segments: &result.failed_segments,
            best_parameters: &result.best_parameters,
            average_test_capital: result.aggregate_score,
        },
    )?;
    info!("Optimization summary written to {}", summary_path.display());

    let snapshot = status.snapshot();
    info!(
        "{}: {}/{} segment(s) completed, {} failed",
        snapshot.phase,
        snapshot.completed_segments,
        snapshot.total_segments,
        snapshot.failed_segments
    );
    Ok(result)
}
