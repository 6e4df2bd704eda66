use anyhow::Result;
use backtest_engine::commands::market_data_snapshot::{load_candles, MarketSelection};
use backtest_engine::commands::{backtest, optimize};
use backtest_engine::config::{
    EngineConfig, RuntimeSettings, SegmentFailurePolicy, WalkForwardConfig,
};
use backtest_engine::engine::BacktestEngine;
use backtest_engine::market_data::MarketDataSnapshot;
use backtest_engine::models::{AccountSnapshot, Candle};
use backtest_engine::optimizer::WalkForwardOptimizer;
use backtest_engine::optimizer_status::OptimizerStatus;
use backtest_engine::report::{
    SilentReporter, BACKTEST_LOG_FILE, CAPITAL_CURVE_FILE, OPTIMIZATION_LOG_FILE,
};
use backtest_engine::search::{LocalSearch, RandomSearch};
use backtest_engine::strategy::{create_signal_provider, default_search_space, TEMPLATE_IDS};
use chrono::{Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Once};

const SYMBOL: &str = "BTC/USDT";
const TIMEFRAME: &str = "1h";
const SNAPSHOT_FILE: &str = "market-data.bin";

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Hourly candles: a slow drift, a daily cycle and a longer swing.
fn synthetic_candles(count: usize) -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..count)
        .map(|idx| {
            let idx_f = idx as f64;
            let daily_wave = (idx_f / 24.0 * 2.0 * PI).sin();
            let swing = (idx_f / 120.0 * PI).sin();
            let close = 100.0 + idx_f * 0.01 + daily_wave * 3.0 + swing * 6.0;
            let open = close - daily_wave * 0.4;
            Candle {
                timestamp: start + Duration::hours(idx as i64),
                open,
                high: open.max(close) + 0.8,
                low: open.min(close) - 0.8,
                close,
                volume: 1_000.0 + daily_wave.abs() * 250.0,
            }
        })
        .collect()
}

fn settings_for(log_dir: &Path, extra: &[(&str, &str)]) -> Result<RuntimeSettings> {
    let mut map: HashMap<String, String> = extra
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    map.insert("LOG_DIR".to_string(), log_dir.display().to_string());
    map.insert("OPTIMIZATION_WORKERS".to_string(), "2".to_string());
    RuntimeSettings::from_settings_map(&map)
}

fn write_snapshot(dir: &Path, candles: Vec<Candle>) -> Result<std::path::PathBuf> {
    let path = dir.join("data").join(SNAPSHOT_FILE);
    MarketDataSnapshot::new(SYMBOL, TIMEFRAME, candles).save_to_file(&path)?;
    Ok(path)
}

fn selection(data_file: &Path) -> MarketSelection {
    MarketSelection {
        symbol: SYMBOL.to_string(),
        timeframe: TIMEFRAME.to_string(),
        limit: 0,
        data_file: Some(data_file.to_path_buf()),
    }
}

#[test]
fn every_template_keeps_account_invariants() {
    ensure_test_env();
    let candles = synthetic_candles(720);

    for template_id in TEMPLATE_IDS {
        let provider = create_signal_provider(template_id, &HashMap::new()).unwrap();
        let engine = BacktestEngine::new(EngineConfig {
            initial_balance: 10_000.0,
            trailing_stop_fraction: provider.trailing_stop_fraction(),
        })
        .unwrap()
        .with_reporter(Arc::new(SilentReporter));
        let result = engine.run_strategy(provider.as_ref(), &candles, SYMBOL, TIMEFRAME);

        assert_eq!(result.num_candles, candles.len());
        assert_eq!(result.capital_history.len(), candles.len() + 1);
        assert_eq!(result.drawdown_history.len(), candles.len());
        assert!(result
            .drawdown_history
            .iter()
            .all(|dd| (0.0..=100.0).contains(dd)));

        let realized: f64 = result.trades.iter().map(|trade| trade.profit).sum();
        assert!(
            (result.final_balance - (10_000.0 + realized)).abs() < 1e-6,
            "{} balance does not match its trades",
            template_id
        );
        assert_eq!(result.trade_count, result.trades.len());
        assert_eq!(result.win_count + result.loss_count, result.trade_count);

        for pair in result.trades.windows(2) {
            assert!(pair[1].entry_index >= pair[0].exit_index);
        }
        for trade in &result.trades {
            assert!(trade.exit_index >= trade.entry_index);
            assert!(trade.size > 0.0);
        }
        assert_eq!(result.test_period, "0 years, 30 days, 0 hours, 0 minutes");
    }
}

#[test]
fn signal_generation_leaves_input_untouched() {
    ensure_test_env();
    let candles = synthetic_candles(200);
    let before = candles.clone();
    let provider = create_signal_provider("mean_reversion", &HashMap::new()).unwrap();
    let rows = provider.generate_signals(&candles, &AccountSnapshot::fresh(10_000.0));

    assert_eq!(rows.len(), candles.len());
    assert_eq!(candles, before);
    assert!(rows.iter().any(|row| row.long_signal));
    assert!(rows.iter().any(|row| row.short_signal));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshot_backtest_writes_run_log_and_capital_curve() -> Result<()> {
    ensure_test_env();
    let dir = tempfile::tempdir()?;
    let candles = synthetic_candles(500);
    let data_file = write_snapshot(dir.path(), candles.clone())?;
    let log_dir = dir.path().join("logs");
    let settings = settings_for(&log_dir, &[("BACKTEST_INITIAL_BALANCE", "5000")])?;

    let result = backtest::run(
        &settings,
        "mean_reversion",
        Some(r#"{"rsiPeriod": 10, "takeProfit": 2.5}"#),
        &selection(&data_file),
    )
    .await?;

    assert_eq!(result.initial_balance, 5_000.0);
    assert_eq!(result.capital_history.len(), candles.len() + 1);

    let curve_path = log_dir.join(CAPITAL_CURVE_FILE);
    assert_eq!(
        result.chart_path.as_deref(),
        Some(curve_path.display().to_string().as_str())
    );
    let curve = fs::read_to_string(&curve_path)?;
    let mut lines = curve.lines();
    assert_eq!(lines.next(), Some("index,balance,drawdown"));
    assert_eq!(lines.count(), candles.len() + 1);

    let run_log = fs::read_to_string(log_dir.join(BACKTEST_LOG_FILE))?;
    assert!(run_log.starts_with("=== BACKTEST DEBUG LOG ==="));
    assert!(run_log.contains("Final balance:"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshot_metadata_wins_over_requested_market() -> Result<()> {
    ensure_test_env();
    let dir = tempfile::tempdir()?;
    let data_file = write_snapshot(dir.path(), synthetic_candles(50))?;
    let settings = settings_for(dir.path(), &[])?;

    let mut requested = selection(&data_file);
    requested.symbol = "ETH/USDT".to_string();
    let market = load_candles(&settings, &requested).await?;
    assert_eq!(market.symbol, SYMBOL);
    assert_eq!(market.candles.len(), 50);

    requested.data_file = Some(dir.path().join("missing.bin"));
    let error = load_candles(&settings, &requested).await.err().unwrap();
    assert!(error.to_string().contains("export-market-data"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn optimize_command_records_summary_and_replayable_segments() -> Result<()> {
    ensure_test_env();
    let dir = tempfile::tempdir()?;
    let candles = synthetic_candles(900);
    let data_file = write_snapshot(dir.path(), candles.clone())?;
    let log_dir = dir.path().join("logs");
    let settings = settings_for(
        &log_dir,
        &[
            ("WALK_FORWARD_SPLITS", "3"),
            ("OPTIMIZATION_TRIALS", "4"),
            ("OPTIMIZATION_SEED", "7"),
        ],
    )?;

    let result = optimize::run(&settings, "mean_reversion", None, &selection(&data_file)).await?;

    assert_eq!(result.template_id, "mean_reversion");
    assert_eq!(result.segments.len(), 3);
    assert_eq!(result.trial_budget, 4);
    assert!(result.failed_segments.is_empty());
    assert!(!result.best_parameters.is_empty());
    assert!(result
        .segments
        .iter()
        .any(|outcome| outcome.parameters == result.best_parameters));

    let optimizer = WalkForwardOptimizer::new(
        "mean_reversion",
        SYMBOL,
        TIMEFRAME,
        settings.walk_forward_config(),
    )?;
    for outcome in &result.segments {
        assert_eq!(outcome.segment.train_len(), 210);
        assert_eq!(outcome.segment.test_len(), 90);
        let replayed = optimizer
            .evaluate_parameters(&outcome.parameters, outcome.segment.test_slice(&candles))?;
        assert_eq!(replayed, outcome.test_score);
    }

    let summary = fs::read_to_string(log_dir.join(OPTIMIZATION_LOG_FILE))?;
    assert!(summary.starts_with("=== WALK-FORWARD OPTIMIZATION ==="));
    assert!(summary.contains("Strategy: mean_reversion"));
    assert!(summary.contains("Trials per segment: 4, Segments: 3"));
    assert!(summary.contains("Average test capital:"));
    Ok(())
}

#[test]
fn seeded_searches_are_repeatable() {
    ensure_test_env();
    let candles = synthetic_candles(600);
    let config = WalkForwardConfig {
        n_splits: 2,
        train_ratio: 0.7,
        trial_budget: 5,
        initial_balance: 10_000.0,
        failure_policy: SegmentFailurePolicy::Abort,
    };

    let run_random = || {
        let optimizer =
            WalkForwardOptimizer::new("fixed_fraction", SYMBOL, TIMEFRAME, config.clone()).unwrap();
        let search = RandomSearch::new(
            default_search_space("fixed_fraction").unwrap(),
            HashMap::new(),
            11,
            2,
        )
        .unwrap();
        optimizer.optimize(&candles, &search).unwrap()
    };
    let first = run_random();
    let second = run_random();
    assert_eq!(first.test_scores(), second.test_scores());
    assert_eq!(first.best_parameters, second.best_parameters);

    let optimizer =
        WalkForwardOptimizer::new("mean_reversion", SYMBOL, TIMEFRAME, config.clone()).unwrap();
    let local = LocalSearch::new(
        default_search_space("mean_reversion").unwrap(),
        HashMap::new(),
        vec![-1.0, 1.0],
        2,
    )
    .unwrap();
    let result = optimizer.optimize(&candles, &local).unwrap();
    assert_eq!(result.segments.len(), 2);
    for outcome in &result.segments {
        assert!(outcome.trials_evaluated >= 1 && outcome.trials_evaluated <= 5);
        let replayed = optimizer
            .evaluate_parameters(&outcome.parameters, outcome.segment.train_slice(&candles))
            .unwrap();
        assert_eq!(replayed, outcome.train_score);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn optimize_command_stops_when_cancelled() -> Result<()> {
    ensure_test_env();
    let dir = tempfile::tempdir()?;
    let data_file = write_snapshot(dir.path(), synthetic_candles(600))?;
    let log_dir = dir.path().join("logs");
    let settings = settings_for(
        &log_dir,
        &[("WALK_FORWARD_SPLITS", "2"), ("OPTIMIZATION_TRIALS", "2")],
    )?;

    let status = OptimizerStatus::new();
    status.cancel();
    let error = optimize::run_with_status(
        &settings,
        "fixed_fraction",
        None,
        &selection(&data_file),
        status.clone(),
    )
    .await
    .err()
    .unwrap();

    assert!(format!("{:#}", error).contains("no walk-forward segment completed"));
    assert!(status.snapshot().cancelled);
    assert!(!log_dir.join(OPTIMIZATION_LOG_FILE).exists());
    Ok(())
}
