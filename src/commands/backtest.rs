use crate::commands::market_data_snapshot::{load_candles, MarketSelection};
use crate::config::{EngineConfig, RuntimeSettings};
use crate::engine::BacktestEngine;
use crate::models::{parse_parameter_map_from_json, ResultRecord};
use crate::param_utils::format_parameters;
use crate::report::{format_result_table, write_capital_curve, FileReporter, CAPITAL_CURVE_FILE};
use crate::strategy::create_signal_provider;
use anyhow::Result;
use log::{info, warn};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub async fn run(
    settings: &RuntimeSettings,
    template_id: &str,
    params_json: Option<&str>,
    selection: &MarketSelection,
) -> Result<ResultRecord> {
    let parameters = match params_json {
        Some(raw) => parse_parameter_map_from_json(raw)?,
        None => HashMap::new(),
    };
    info!(
        "Received backtest command for template_id={} [{}]",
        template_id,
        format_parameters(&parameters)
    );

    let market = load_candles(settings, selection).await?;
    let provider = create_signal_provider(template_id, &parameters)?;
    if market.candles.len() < provider.min_data_points() {
        warn!(
            "{} candles is below the {} the {} indicators need to warm up",
            market.candles.len(),
            provider.min_data_points(),
            template_id
        );
    }

    let log_dir = Path::new(&settings.log_dir);
    let reporter = Arc::new(FileReporter::new(log_dir));
    let engine = BacktestEngine::new(EngineConfig {
        initial_balance: settings.initial_balance,
        trailing_stop_fraction: provider.trailing_stop_fraction(),
    })?
    .with_reporter(reporter.clone());

    let mut result = engine.run_strategy(
        provider.as_ref(),
        &market.candles,
        &market.symbol,
        &market.timeframe,
    );

    let curve_path = log_dir.join(CAPITAL_CURVE_FILE);
    match write_capital_curve(&curve_path, &result) {
        Ok(()) => result.chart_path = Some(curve_path.display().to_string()),
        Err(error) => warn!("Capital curve not written: {:#}", error),
    }

    println!("{}", format_result_table(&result));
    info!("Backtest log written to {}", reporter.path().display());
    Ok(result)
}
