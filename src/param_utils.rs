use crate::models::ParameterRange;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Extract a parameter as f64 with a default value
pub fn get_param_f64(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

/// Extract a parameter as f64, clamped to a range with finite checks
pub fn get_param_f64_clamped(
    params: &HashMap<String, f64>,
    key: &str,
    default: f64,
    min: f64,
    max: f64,
) -> f64 {
    let raw = params.get(key).copied().unwrap_or(default);
    if !raw.is_finite() {
        return default;
    }
    raw.clamp(min, max)
}

/// Get a parameter as usize with a minimum value
pub fn get_usize_param_min(
    params: &HashMap<String, f64>,
    key: &str,
    default: usize,
    min: usize,
) -> usize {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .map(|v| v.round().max(min as f64) as usize)
        .unwrap_or(default)
}

/// Percent-valued parameter (e.g. `2.0` meaning 2%) converted to a fraction.
pub fn get_percent_param(params: &HashMap<String, f64>, key: &str, default_percent: f64) -> f64 {
    get_param_f64_clamped(params, key, default_percent, 0.0, 99.0) / 100.0
}

/// Clamp parameter values to their defined bounds
pub fn clamp_to_bounds(
    params: &mut HashMap<String, f64>,
    parameter_ranges: &BTreeMap<String, ParameterRange>,
) {
    for (key, range) in parameter_ranges {
        if let Some(value) = params.get_mut(key) {
            *value = value.clamp(range.min, range.max);
        }
    }
}

/// Stable textual key for a parameter set, independent of map ordering.
pub fn parameter_signature(parameters: &HashMap<String, f64>) -> String {
    let mut sorted: Vec<_> = parameters.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    format!("{:?}", sorted)
}

pub fn format_parameters(parameters: &HashMap<String, f64>) -> String {
    let mut sorted: Vec<_> = parameters.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    sorted
        .into_iter()
        .map(|(k, v)| {
            let formatted_value = format!("{:.4}", v);
            let trimmed_value = formatted_value.trim_end_matches('0').trim_end_matches('.');
            let cleaned_value = if trimmed_value.is_empty() || trimmed_value == "-0" {
                "0"
            } else {
                trimmed_value
            };
            format!("{}: {}", k, cleaned_value)
        })
        .collect::<Vec<String>>()
        .join(", ")
}

/// Add neighbor parameter variations by adjusting one parameter at a time
pub fn add_single_parameter_neighbor_variations(
    parameter_ranges: &BTreeMap<String, ParameterRange>,
    step_multipliers: &[f64],
    current_params: &HashMap<String, f64>,
    seen_variations: &mut HashSet<String>,
    neighbor_variations: &mut Vec<HashMap<String, f64>>,
) {
    for (param, range) in parameter_ranges {
        let current_value = match current_params.get(param) {
            Some(v) => *v,
            None => continue,
        };
        let step = if range.step > 0.0 {
            range.step
        } else {
            // Continuous ranges move in tenths of their width.
            (range.max - range.min) / 10.0
        };
        if step <= 0.0 || !step.is_finite() {
            continue;
        }

        for &multiplier in step_multipliers {
            let candidate = current_value + multiplier * step;

            if candidate < range.min - 1e-9 || candidate > range.max + 1e-9 {
                continue;
            }

            let new_value = candidate.clamp(range.min, range.max);
            if (new_value - current_value).abs() < 1e-9 {
                continue;
            }

            let mut neighbor_params = current_params.clone();
            neighbor_params.insert(param.clone(), new_value);

            if seen_variations.insert(parameter_signature(&neighbor_params)) {
                neighbor_variations.push(neighbor_params);
            }
        }
    }
}
