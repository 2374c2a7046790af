//! Configuration management

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fusion: FusionConfig,
    pub trailing_stop: TrailingStopConfig,
    pub consolidation: ConsolidationConfig,
    pub profit_lock: ProfitLockConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Vote ratio needed for a weak majority (e.g. 0.5 = half the batch)
    pub weak_consensus: f64,
    /// Vote ratio needed for a strong consensus
    pub strong_consensus: f64,
    /// BUY/SELL vote ratio that turns a strong HOLD into an opportunity trade
    pub opportunity_ratio: f64,
    /// Number of advisory providers configured upstream
    pub total_providers: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrailingStopConfig {
    /// P&L fraction that moves the stop to breakeven
    pub breakeven_at: f64,
    /// P&L fraction that starts locking profit
    pub lock_profit_at: f64,
    /// P&L fraction that switches to aggressive locking
    pub aggressive_lock_at: f64,
    /// Base trailing distance as a price fraction
    pub trailing_distance: f64,
    /// Wider distance used by the aggressive lock offset
    pub conservative_distance: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    /// Window length used for the range check
    pub window_points: usize,
    /// Price range (percent) below which the market counts as sideways
    pub range_threshold_pct: f64,
    /// Minimum sideways duration before consolidation is declared
    pub min_duration_mins: i64,
    /// Move from the start price (percent) that ends the consolidation
    pub breakout_pct: f64,
    /// Consolidation auto-expires after this long
    pub timeout_mins: i64,
    /// How much price history to retain
    pub retention_mins: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfitLockConfig {
    /// Minimum profit fraction for the profit gate
    pub min_profit_pct: f64,
    /// Profit fraction required before a lock action is emitted
    pub lock_trigger_pct: f64,
    /// Base sideways threshold shared by the volatility and channel gates
    pub consolidation_threshold: f64,
    /// Price-stability ceiling (stdev / mean of recent closes)
    pub breakout_threshold: f64,
    /// Minimum absolute volume for the volume gate
    pub min_volume: f64,
    /// Candles examined by the windowed gates
    pub lookback_periods: usize,
    /// Gates (out of 6) that must pass before locking
    pub min_gates_passed: usize,
    /// Maximum share of window points that are support/resistance pivots
    pub max_sr_density: f64,
    /// Fraction of current profit locked in by the action
    pub locked_fraction: f64,
}

impl Config {
    /// Load configuration from file, with FUSION_* environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&path.as_ref().to_string_lossy()))
            .add_source(config::Environment::with_prefix("FUSION"))
            .build()?;

        let config: Config = settings.try_deserialize()?;
        Ok(config)
    }

    /// Load from default locations, falling back to built-in defaults.
    pub fn load_default() -> anyhow::Result<Self> {
        let paths = ["config.toml", "~/.config/fusion-core/config.toml"];

        for path in paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::load(expanded.as_ref());
            }
        }

        Ok(Config::default())
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            weak_consensus: 0.5,
            strong_consensus: 0.6,
            opportunity_ratio: 0.2,
            total_providers: 4,
        }
    }
}

impl Default for TrailingStopConfig {
    fn default() -> Self {
        Self {
            breakeven_at: 0.01,       // 1% profit
            lock_profit_at: 0.03,     // 3% profit
            aggressive_lock_at: 0.05, // 5% profit
            trailing_distance: 0.015, // 1.5%
            conservative_distance: 0.02,
        }
    }
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            window_points: 20,
            range_threshold_pct: 2.0,
            min_duration_mins: 30,
            breakout_pct: 3.0,
            timeout_mins: 120,
            retention_mins: 60,
        }
    }
}

impl Default for ProfitLockConfig {
    fn default() -> Self {
        Self {
            min_profit_pct: 0.005, // 0.5%
            lock_trigger_pct: 0.01,
            consolidation_threshold: 0.008,
            breakout_threshold: 0.012,
            min_volume: 1_000_000.0,
            lookback_periods: 6,
            min_gates_passed: 5,
            max_sr_density: 0.20,
            locked_fraction: 0.8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.fusion.weak_consensus, 0.5);
        assert_eq!(config.fusion.strong_consensus, 0.6);
        assert_eq!(config.trailing_stop.breakeven_at, 0.01);
        assert_eq!(config.profit_lock.min_gates_passed, 5);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let toml_str = r#"
            [fusion]
            strong_consensus = 0.7

            [trailing_stop]
            trailing_distance = 0.02
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.fusion.strong_consensus, 0.7);
        // Untouched fields keep their defaults
        assert_eq!(config.fusion.weak_consensus, 0.5);
        assert_eq!(config.trailing_stop.trailing_distance, 0.02);
        assert_eq!(config.trailing_stop.breakeven_at, 0.01);
    }
}
