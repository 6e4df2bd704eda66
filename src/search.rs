use crate::config::{RuntimeSettings, SearchKind};
use crate::models::ParameterRange;
use crate::param_utils::{
    add_single_parameter_neighbor_variations, clamp_to_bounds, format_parameters,
    parameter_signature,
};
use anyhow::{anyhow, Context, Result};
use dashmap::DashMap;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Scores one parameter set; higher is better.
pub type Objective<'a> = dyn Fn(&HashMap<String, f64>) -> Result<f64> + Sync + 'a;

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best_params: HashMap<String, f64>,
    pub best_score: f64,
    pub trials_evaluated: usize,
}

pub trait ParameterSearch: Send + Sync {
    fn name(&self) -> &'static str;

    fn search(&self, objective: &Objective, trial_budget: usize) -> Result<SearchOutcome>;
}

/// Scores already computed within one search call, keyed by parameter signature.
#[derive(Default)]
pub struct TrialCache {
    scores: DashMap<String, f64>,
}

impl TrialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn get_or_evaluate(
        &self,
        parameters: &HashMap<String, f64>,
        objective: &Objective,
    ) -> Result<f64> {
        let signature = parameter_signature(parameters);
        if let Some(score) = self.scores.get(&signature) {
            return Ok(*score);
        }
        let score = rank_score(objective(parameters)?);
        self.scores.insert(signature, score);
        Ok(score)
    }
}

fn rank_score(score: f64) -> f64 {
    if score.is_finite() {
        score
    } else {
        f64::NEG_INFINITY
    }
}

fn validate_space(space: &BTreeMap<String, ParameterRange>) -> Result<()> {
    if space.is_empty() {
        return Err(anyhow!("Search space must contain at least one parameter"));
    }
    for (name, range) in space {
        if !range.min.is_finite() || !range.max.is_finite() || range.min > range.max {
            return Err(anyhow!(
                "Invalid range for parameter {}: [{}, {}]",
                name,
                range.min,
                range.max
            ));
        }
        if !range.step.is_finite() || range.step < 0.0 {
            return Err(anyhow!(
                "Invalid step for parameter {}: {}",
                name,
                range.step
            ));
        }
    }
    Ok(())
}

fn build_pool(workers: usize) -> Result<Arc<ThreadPool>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|index| format!("search-worker-{}", index))
        .build()
        .map_err(|error| anyhow!("Failed to build search worker pool: {}", error))?;
    Ok(Arc::new(pool))
}

/// Score `candidates` in parallel, keeping input order in the returned scores.
fn evaluate_batch(
    pool: &ThreadPool,
    cache: &TrialCache,
    candidates: &[HashMap<String, f64>],
    objective: &Objective,
) -> Result<Vec<f64>> {
    let results: Vec<Result<f64>> = pool.install(|| {
        candidates
            .par_iter()
            .map(|parameters| cache.get_or_evaluate(parameters, objective))
            .collect()
    });

    results
        .into_iter()
        .zip(candidates)
        .map(|(result, parameters)| {
            result.with_context(|| {
                format!("Trial failed for parameters [{}]", format_parameters(parameters))
            })
        })
        .collect()
}

/// Index of the best score; the earliest index wins ties.
fn best_index(scores: &[f64]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (index, score) in scores.iter().enumerate() {
        match best {
            Some(current) if *score <= scores[current] => {}
            _ => best = Some(index),
        }
    }
    best
}

pub struct RandomSearch {
    space: BTreeMap<String, ParameterRange>,
    base_params: HashMap<String, f64>,
    seed: u64,
    calls: AtomicU64,
    pool: Arc<ThreadPool>,
}

impl RandomSearch {
    pub fn new(
        space: BTreeMap<String, ParameterRange>,
        base_params: HashMap<String, f64>,
        seed: u64,
        workers: usize,
    ) -> Result<Self> {
        validate_space(&space)?;
        Ok(Self {
            space,
            base_params,
            seed,
            calls: AtomicU64::new(0),
            pool: build_pool(workers)?,
        })
    }

    fn sample(&self, rng: &mut StdRng) -> HashMap<String, f64> {
        let mut parameters = self.base_params.clone();
        for (name, range) in &self.space {
            let value = if range.max > range.min {
                rng.gen_range(range.min..=range.max)
            } else {
                range.min
            };
            parameters.insert(name.clone(), range.snap(value));
        }
        parameters
    }
}

impl ParameterSearch for RandomSearch {
    fn name(&self) -> &'static str {
        "random"
    }

    fn search(&self, objective: &Objective, trial_budget: usize) -> Result<SearchOutcome> {
        if trial_budget == 0 {
            return Err(anyhow!("Trial budget must be at least 1"));
        }

        let call_index = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut rng = StdRng::seed_from_u64(
            self.seed
                .wrapping_add(call_index.wrapping_mul(0x9E37_79B9_7F4A_7C15)),
        );
        let candidates: Vec<HashMap<String, f64>> =
            (0..trial_budget).map(|_| self.sample(&mut rng)).collect();

        let cache = TrialCache::new();
        let scores = evaluate_batch(&self.pool, &cache, &candidates, objective)?;
        let best = best_index(&scores).ok_or_else(|| anyhow!("No trials were evaluated"))?;

        debug!(
            "Random search evaluated {} trials ({} unique), best score {:.4}",
            scores.len(),
            cache.len(),
            scores[best]
        );

        Ok(SearchOutcome {
            best_params: candidates[best].clone(),
            best_score: scores[best],
            trials_evaluated: scores.len(),
        })
    }
}

/// Hill climbing over single-parameter neighbours.
pub struct LocalSearch {
    space: BTreeMap<String, ParameterRange>,
    base_params: HashMap<String, f64>,
    step_multipliers: Vec<f64>,
    pool: Arc<ThreadPool>,
}

impl LocalSearch {
    pub fn new(
        space: BTreeMap<String, ParameterRange>,
        base_params: HashMap<String, f64>,
        step_multipliers: Vec<f64>,
        workers: usize,
    ) -> Result<Self> {
        validate_space(&space)?;
        if step_multipliers.is_empty() {
            return Err(anyhow!("Local search needs at least one step multiplier"));
        }
        Ok(Self {
            space,
            base_params,
            step_multipliers,
            pool: build_pool(workers)?,
        })
    }

    /// Base values snapped onto the space; parameters without one start at the midpoint.
    pub fn starting_point(&self) -> HashMap<String, f64> {
        let mut parameters = self.base_params.clone();
        for (name, range) in &self.space {
            let value = match self.base_params.get(name) {
                Some(value) if value.is_finite() => range.snap(*value),
                _ => range.midpoint(),
            };
            parameters.insert(name.clone(), value);
        }
        clamp_to_bounds(&mut parameters, &self.space);
        parameters
    }
}

impl ParameterSearch for LocalSearch {
    fn name(&self) -> &'static str {
        "local"
    }

    fn search(&self, objective: &Objective, trial_budget: usize) -> Result<SearchOutcome> {
        if trial_budget == 0 {
            return Err(anyhow!("Trial budget must be at least 1"));
        }

        let cache = TrialCache::new();
        let mut current_params = self.starting_point();
        let mut best_score = evaluate_batch(
            &self.pool,
            &cache,
            std::slice::from_ref(&current_params),
            objective,
        )?[0];
        let mut evaluated = 1usize;

        let mut seen_variations = HashSet::new();
        seen_variations.insert(parameter_signature(&current_params));

        while evaluated < trial_budget {
            let mut neighbor_variations = Vec::new();
            add_single_parameter_neighbor_variations(
                &self.space,
                &self.step_multipliers,
                &current_params,
                &mut seen_variations,
                &mut neighbor_variations,
            );
            if neighbor_variations.is_empty() {
                break;
            }
            neighbor_variations.truncate(trial_budget - evaluated);

            let scores = evaluate_batch(&self.pool, &cache, &neighbor_variations, objective)?;
            evaluated += scores.len();

            let Some(best) = best_index(&scores) else {
                break;
            };
            if scores[best] > best_score {
                debug!(
                    "Local search improved score {:.4} -> {:.4}",
                    best_score, scores[best]
                );
                best_score = scores[best];
                current_params = neighbor_variations.swap_remove(best);
            } else {
                break;
            }
        }

        Ok(SearchOutcome {
            best_params: current_params,
            best_score,
            trials_evaluated: evaluated,
        })
    }
}

pub fn create_parameter_search(
    settings: &RuntimeSettings,
    space: BTreeMap<String, ParameterRange>,
    base_params: HashMap<String, f64>,
) -> Result<Box<dyn ParameterSearch>> {
    info!(
        "Using {} over {} parameter(s) with {} worker(s)",
        settings.optimization_search.label(),
        space.len(),
        settings.optimization_workers
    );
    match settings.optimization_search {
        SearchKind::Random => Ok(Box::new(RandomSearch::new(
            space,
            base_params,
            settings.optimization_seed,
            settings.optimization_workers,
        )?)),
        SearchKind::Local => Ok(Box::new(LocalSearch::new(
            space,
            base_params,
            settings.local_search_step_multipliers.clone(),
            settings.optimization_workers,
        )?)),
    }
}
