//! Detection configuration
//!
//! One immutable value, passed explicitly into every entry point.
//! Defaults mirror the thresholds the detector was calibrated with.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// One precision-penalty band. Matches when
/// `precision_rate < max_precision` and `total_unique_tokens > min_tokens`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyBand {
    /// Fraction, e.g. 0.01 = 1%
    pub max_precision: f64,
    pub min_tokens: u64,
    /// Share of the base score that survives (0, 1]
    pub multiplier: f64,
}

impl PenaltyBand {
    pub const fn new(max_precision: f64, min_tokens: u64, multiplier: f64) -> Self {
        Self {
            max_precision,
            min_tokens,
            multiplier,
        }
    }

    pub fn matches(&self, precision_rate: f64, total_unique_tokens: u64) -> bool {
        precision_rate < self.max_precision && total_unique_tokens > self.min_tokens
    }
}

/// Lower bounds of each score tier (inclusive)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreTiers {
    pub high_priority: f64,
    pub watchlist: f64,
    pub moderate: f64,
    pub low: f64,
}

impl Default for ScoreTiers {
    fn default() -> Self {
        Self {
            high_priority: 80.0,
            watchlist: 60.0,
            moderate: 40.0,
            low: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// A buy ranked at or below this counts as early
    pub first_n_buyers: u32,
    /// Early hits needed for CONSISTENT_EARLY_BUYER
    pub min_early_hits: u32,
    /// Average buy rank ceiling for CONSISTENT_EARLY_BUYER
    pub early_buyer_avg_rank_threshold: f64,
    /// Same-block buys needed for LIQUIDITY_SNIPER
    pub liquidity_sniper_min_hits: u32,
    /// Wallets younger than this (days) are fresh
    pub fresh_wallet_days: f64,
    /// Early hits needed for FRESH_WALLET_ALPHA
    pub fresh_wallet_min_early_hits: u32,
    pub cluster_min_size: u32,
    pub strategic_dumper_min_exits: u32,
    /// Average hold below this (hours) makes a dumper severity 5
    pub quick_flip_hours: f64,
    /// Fraction of a position a sell must liquidate to count as a strategic exit
    pub strategic_exit_min_fraction: f64,
    pub watchlist_threshold: f64,
    pub alert_threshold: f64,
    pub tiers: ScoreTiers,
    /// Evaluated in order, first match wins
    pub penalty_bands: Vec<PenaltyBand>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            first_n_buyers: 100,
            min_early_hits: 5,
            early_buyer_avg_rank_threshold: 20.0,
            liquidity_sniper_min_hits: 3,
            fresh_wallet_days: 7.0,
            fresh_wallet_min_early_hits: 2,
            cluster_min_size: 5,
            strategic_dumper_min_exits: 3,
            quick_flip_hours: 48.0,
            strategic_exit_min_fraction: 0.5,
            watchlist_threshold: 60.0,
            alert_threshold: 80.0,
            tiers: ScoreTiers::default(),
            penalty_bands: vec![
                PenaltyBand::new(0.01, 500, 0.2),
                PenaltyBand::new(0.05, 200, 0.5),
                PenaltyBand::new(0.10, 100, 0.7),
            ],
        }
    }
}

impl DetectionConfig {
    /// Reject configurations the scorer cannot use. Called once before a run.
    pub fn validate(&self) -> EngineResult<()> {
        if self.first_n_buyers == 0 {
            return Err(invalid("first_n_buyers must be at least 1"));
        }

        let floats = [
            ("early_buyer_avg_rank_threshold", self.early_buyer_avg_rank_threshold),
            ("fresh_wallet_days", self.fresh_wallet_days),
            ("quick_flip_hours", self.quick_flip_hours),
            ("strategic_exit_min_fraction", self.strategic_exit_min_fraction),
            ("watchlist_threshold", self.watchlist_threshold),
            ("alert_threshold", self.alert_threshold),
        ];
        for (name, value) in floats {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!("{name} must be a non-negative number, got {value}")));
            }
        }

        if self.strategic_exit_min_fraction > 1.0 {
            return Err(invalid("strategic_exit_min_fraction must be within [0, 1]"));
        }
        if self.watchlist_threshold > 100.0 || self.alert_threshold > 100.0 {
            return Err(invalid("watchlist/alert thresholds must be within [0, 100]"));
        }
        if self.alert_threshold < self.watchlist_threshold {
            return Err(invalid(format!(
                "alert_threshold ({}) is below watchlist_threshold ({})",
                self.alert_threshold, self.watchlist_threshold
            )));
        }

        self.validate_tiers()?;
        self.validate_bands()
    }

    fn validate_tiers(&self) -> EngineResult<()> {
        let t = &self.tiers;
        let bounds = [t.high_priority, t.watchlist, t.moderate, t.low];
        if bounds.iter().any(|b| !b.is_finite() || *b < 0.0 || *b > 100.0) {
            return Err(invalid(format!("tier bounds must be within [0, 100]: {bounds:?}")));
        }
        if bounds.windows(2).any(|w| w[0] <= w[1]) {
            return Err(invalid(format!(
                "tier bounds must strictly decrease from high_priority to low: {bounds:?}"
            )));
        }
        Ok(())
    }

    fn validate_bands(&self) -> EngineResult<()> {
        for (i, band) in self.penalty_bands.iter().enumerate() {
            if !band.multiplier.is_finite() || band.multiplier <= 0.0 || band.multiplier > 1.0 {
                return Err(invalid(format!(
                    "penalty band {i}: multiplier {} outside (0, 1]",
                    band.multiplier
                )));
            }
            if !band.max_precision.is_finite()
                || band.max_precision < 0.0
                || band.max_precision > 1.0
            {
                return Err(invalid(format!(
                    "penalty band {i}: precision bound {} outside [0, 1]",
                    band.max_precision
                )));
            }
        }

        // Tightest band first: looser precision bounds and softer penalties follow
        for (i, pair) in self.penalty_bands.windows(2).enumerate() {
            let (tight, loose) = (&pair[0], &pair[1]);
            if loose.max_precision < tight.max_precision || loose.multiplier < tight.multiplier {
                return Err(invalid(format!(
                    "penalty bands {i} and {} are not ordered tightest-first",
                    i + 1
                )));
            }
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::Configuration(msg.into())
}
