use crate::models::*;
use anyhow::{anyhow, Result};
use std::collections::{BTreeMap, HashMap};

/// Maps a candle sequence and an account snapshot to annotated rows.
/// Implementations must not depend on anything but their inputs and parameters.
pub trait SignalProvider: Send + Sync {
    fn template_id(&self) -> &str;

    /// Fraction the engine uses to ratchet trailing stops on open positions.
    fn trailing_stop_fraction(&self) -> f64;

    fn min_data_points(&self) -> usize;

    fn generate_signals(&self, candles: &[Candle], account: &AccountSnapshot)
        -> Vec<AnnotatedCandle>;
}

#[path = "strategies/mean_reversion.rs"]
pub mod mean_reversion;

pub use mean_reversion::MeanReversionProvider;

#[path = "strategies/fixed_fraction.rs"]
pub mod fixed_fraction;

pub use fixed_fraction::FixedFractionProvider;

pub const TEMPLATE_IDS: [&str; 2] = ["mean_reversion", "fixed_fraction"];

pub fn create_signal_provider(
    template_id: &str,
    parameters: &HashMap<String, f64>,
) -> Result<Box<dyn SignalProvider>> {
    match template_id {
        "mean_reversion" => Ok(Box::new(MeanReversionProvider::new(parameters))),
        "fixed_fraction" => Ok(Box::new(FixedFractionProvider::new(parameters))),
        _ => Err(anyhow!("Unknown strategy template: {}", template_id)),
    }
}

/// Parameters the walk-forward search varies for each template.
pub fn default_search_space(template_id: &str) -> Result<BTreeMap<String, ParameterRange>> {
    let mut space = BTreeMap::new();
    space.insert("takeProfit".to_string(), ParameterRange::new(0.5, 5.0, 0.0));
    space.insert("stopLoss".to_string(), ParameterRange::new(0.5, 5.0, 0.0));
    space.insert("trailingStop".to_string(), ParameterRange::new(0.5, 5.0, 0.0));

    match template_id {
        "mean_reversion" => {
            space.insert(
                "riskPerTrade".to_string(),
                ParameterRange::new(0.01, 0.05, 0.0),
            );
            space.insert(
                "atrMultiplier".to_string(),
                ParameterRange::new(1.0, 3.0, 0.0),
            );
        }
        "fixed_fraction" => {
            space.insert("fastPeriod".to_string(), ParameterRange::new(5.0, 20.0, 1.0));
            space.insert(
                "slowPeriod".to_string(),
                ParameterRange::new(30.0, 100.0, 5.0),
            );
        }
        _ => return Err(anyhow!("Unknown strategy template: {}", template_id)),
    }

    Ok(space)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_knows_both_templates() {
        for template_id in TEMPLATE_IDS {
            let provider = create_signal_provider(template_id, &HashMap::new()).unwrap();
            assert_eq!(provider.template_id(), template_id);
            assert!(default_search_space(template_id).is_ok());
        }
        assert!(create_signal_provider("trend_following", &HashMap::new()).is_err());
        assert!(default_search_space("trend_following").is_err());
    }

    #[test]
    fn mean_reversion_space_matches_percent_ranges() {
        let space = default_search_space("mean_reversion").unwrap();
        assert_eq!(space.len(), 5);
        assert_eq!(space["takeProfit"].min, 0.5);
        assert_eq!(space["takeProfit"].max, 5.0);
        assert_eq!(space["riskPerTrade"].max, 0.05);
        assert_eq!(space["atrMultiplier"].min, 1.0);
    }
}
