use crate::config::{EngineConfig, SegmentFailurePolicy, WalkForwardConfig};
use crate::engine::BacktestEngine;
use crate::models::{Candle, OptimizationResult, Segment, SegmentOutcome};
use crate::optimizer_status::OptimizerStatus;
use crate::param_utils::format_parameters;
use crate::report::SilentReporter;
use crate::search::ParameterSearch;
use crate::strategy::create_signal_provider;
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum WalkForwardError {
    #[error("invalid walk-forward configuration: {0}")]
    InvalidConfig(String),

    #[error("{candles} candles are not enough for one walk-forward segment with {n_splits} splits")]
    InsufficientData { candles: usize, n_splits: usize },

    #[error("parameter search failed on segment {}", .segment + 1)]
    Search {
        segment: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("no walk-forward segment completed")]
    NoCompletedSegments,
}

/// Contiguous train/test segments of `len / n_splits` candles each. Splitting
/// stops at the first segment whose train or test slice would be empty.
pub fn split_segments(len: usize, n_splits: usize, train_ratio: f64) -> Vec<Segment> {
    if n_splits == 0 {
        return Vec::new();
    }
    let segment_length = len / n_splits;
    let mut segments = Vec::with_capacity(n_splits);

    for index in 0..n_splits {
        let start = index * segment_length;
        let train_end = start + (segment_length as f64 * train_ratio).floor() as usize;
        let test_end = start + segment_length;

        if train_end <= start || test_end <= train_end {
            break;
        }

        segments.push(Segment {
            index,
            train: start..train_end,
            test: train_end..test_end,
        });
    }

    segments
}

/// The current segment replaces the representative parameters when it is the
/// first, or when it beats every earlier segment's test score.
fn replaces_best(prior_test_scores: &[f64], test_score: f64) -> bool {
    if prior_test_scores.is_empty() {
        return true;
    }
    let prior_best = prior_test_scores
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    test_score > prior_best
}

pub struct WalkForwardOptimizer {
    template_id: String,
    symbol: String,
    timeframe: String,
    config: WalkForwardConfig,
    status: OptimizerStatus,
    show_progress: bool,
}

impl WalkForwardOptimizer {
    pub fn new(
        template_id: &str,
        symbol: &str,
        timeframe: &str,
        config: WalkForwardConfig,
    ) -> Result<Self, WalkForwardError> {
        if config.n_splits == 0 {
            return Err(WalkForwardError::InvalidConfig(
                "split count must be at least 1".to_string(),
            ));
        }
        if !config.train_ratio.is_finite() || config.train_ratio <= 0.0 || config.train_ratio >= 1.0
        {
            return Err(WalkForwardError::InvalidConfig(format!(
                "train ratio must be within (0, 1), got {}",
                config.train_ratio
            )));
        }
        if config.trial_budget == 0 {
            return Err(WalkForwardError::InvalidConfig(
                "trial budget must be at least 1".to_string(),
            ));
        }
        if !config.initial_balance.is_finite() || config.initial_balance <= 0.0 {
            return Err(WalkForwardError::InvalidConfig(format!(
                "initial balance must be positive, got {}",
                config.initial_balance
            )));
        }
        create_signal_provider(template_id, &HashMap::new())
            .map_err(|error| WalkForwardError::InvalidConfig(error.to_string()))?;

        Ok(Self {
            template_id: template_id.to_string(),
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            config,
            status: OptimizerStatus::new(),
            show_progress: false,
        })
    }

    pub fn with_status(mut self, status: OptimizerStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn status(&self) -> &OptimizerStatus {
        &self.status
    }

    pub fn config(&self) -> &WalkForwardConfig {
        &self.config
    }

    pub fn split(&self, candles: &[Candle]) -> Vec<Segment> {
        split_segments(candles.len(), self.config.n_splits, self.config.train_ratio)
    }

    /// Final balance of one fresh engine run. Train objectives, test validation
    /// and replays all go through here.
    pub fn evaluate_parameters(
        &self,
        parameters: &HashMap<String, f64>,
        candles: &[Candle],
    ) -> Result<f64> {
        let provider = create_signal_provider(&self.template_id, parameters)?;
        let engine = BacktestEngine::new(EngineConfig {
            initial_balance: self.config.initial_balance,
            trailing_stop_fraction: provider.trailing_stop_fraction(),
        })?
        .with_reporter(Arc::new(SilentReporter));
        let result = engine.run_strategy(provider.as_ref(), candles, &self.symbol, &self.timeframe);
        Ok(result.final_balance)
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} segments ({eta})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb
    }

    pub fn optimize(
        &self,
        candles: &[Candle],
        search: &dyn ParameterSearch,
    ) -> Result<OptimizationResult, WalkForwardError> {
        let segments = self.split(candles);
        if segments.is_empty() {
            return Err(WalkForwardError::InsufficientData {
                candles: candles.len(),
                n_splits: self.config.n_splits,
            });
        }

        let total = segments.len();
        info!(
            "Walk-forward optimization of {} on {} candles: {} segment(s), {} trial(s) each, {} search",
            self.template_id,
            candles.len(),
            total,
            self.config.trial_budget,
            search.name()
        );

        let pb = self.progress_bar(total);
        let mut outcomes: Vec<SegmentOutcome> = Vec::with_capacity(total);
        let mut failed_segments: Vec<usize> = Vec::new();
        let mut best_parameters: HashMap<String, f64> = HashMap::new();
        let mut cancelled = false;

        for segment in &segments {
            if self.status.is_cancelled() {
                warn!(
                    "Walk-forward optimization cancelled before segment {}/{}",
                    segment.index + 1,
                    total
                );
                cancelled = true;
                break;
            }
            self.status
                .set_phase(format!("Segment {}/{}", segment.index + 1, total));

            let outcome = match self.run_segment(segment, candles, search) {
                Ok(outcome) => outcome,
                Err(source) => match self.config.failure_policy {
                    SegmentFailurePolicy::Abort => {
                        pb.abandon();
                        self.status.set_phase("Failed");
                        return Err(WalkForwardError::Search {
                            segment: segment.index,
                            source,
                        });
                    }
                    SegmentFailurePolicy::Skip => {
                        warn!(
                            "Skipping segment {}/{} after search failure: {:#}",
                            segment.index + 1,
                            total,
                            source
                        );
                        failed_segments.push(segment.index);
                        pb.inc(1);
                        self.update_progress(total, &outcomes, &failed_segments);
                        continue;
                    }
                },
            };

            let prior_scores: Vec<f64> = outcomes.iter().map(|o| o.test_score).collect();
            if replaces_best(&prior_scores, outcome.test_score) {
                best_parameters = outcome.parameters.clone();
            }

            info!(
                "Segment {}/{} - train capital ${:.2}, test capital ${:.2}",
                segment.index + 1,
                total,
                outcome.train_score,
                outcome.test_score
            );
            outcomes.push(outcome);
            pb.inc(1);
            self.update_progress(total, &outcomes, &failed_segments);
        }

        pb.finish_and_clear();

        if outcomes.is_empty() {
            self.status.set_phase("No segments completed");
            return Err(WalkForwardError::NoCompletedSegments);
        }

        let aggregate_score =
            outcomes.iter().map(|o| o.test_score).sum::<f64>() / outcomes.len() as f64;
        self.status.set_phase(if cancelled { "Cancelled" } else { "Completed" });
        info!(
            "Walk-forward optimization finished: average test capital ${:.2}, best parameters [{}]",
            aggregate_score,
            format_parameters(&best_parameters)
        );

        Ok(OptimizationResult {
            template_id: self.template_id.clone(),
            best_parameters,
            segments: outcomes,
            aggregate_score,
            trial_budget: self.config.trial_budget,
            failed_segments,
            cancelled,
        })
    }

    fn run_segment(
        &self,
        segment: &Segment,
        candles: &[Candle],
        search: &dyn ParameterSearch,
    ) -> Result<SegmentOutcome> {
        let train = segment.train_slice(candles);
        let objective =
            |parameters: &HashMap<String, f64>| self.evaluate_parameters(parameters, train);
        let searched = search.search(&objective, self.config.trial_budget)?;
        let test_score =
            self.evaluate_parameters(&searched.best_params, segment.test_slice(candles))?;

        Ok(SegmentOutcome {
            segment: segment.clone(),
            parameters: searched.best_params,
            train_score: searched.best_score,
            test_score,
            trials_evaluated: searched.trials_evaluated,
        })
    }

    fn update_progress(&self, total: usize, outcomes: &[SegmentOutcome], failed: &[usize]) {
        let best = outcomes
            .iter()
            .map(|o| o.test_score)
            .fold(None, |acc: Option<f64>, score| {
                Some(acc.map_or(score, |best| best.max(score)))
            });
        self.status
            .set_progress(total, outcomes.len(), failed.len(), best);
    }
}
