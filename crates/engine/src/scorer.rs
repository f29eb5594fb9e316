//! Whale scorer — composite 0-100 score from metrics and pattern matches
//!
//! Components:
//! - Early hit score (0-50): `50 · ln(1 + hits) / ln(21)`
//! - Buy rank score (0-30): `30 · (1 − ln(max(rank, 1)) / ln(100))`
//! - Pattern score (0-20): `min(4 · Σ severity, 20)`
//! - Precision penalty: first matching band multiplier, else 1.0

use crate::config::{DetectionConfig, PenaltyBand, ScoreTiers};
use crate::error::{EngineError, EngineResult};
use crate::patterns::total_severity;
use crate::types::{PatternMatch, ScoreBreakdown, ScoreTier, WalletMetrics, WalletReport};

pub const EARLY_HIT_MAX: f64 = 50.0;
pub const BUY_RANK_MAX: f64 = 30.0;
pub const PATTERN_MAX: f64 = 20.0;
const POINTS_PER_SEVERITY: u32 = 4;
/// Hit count that earns the full early-hit score
const EARLY_HIT_SATURATION: f64 = 20.0;
/// Rank at which the buy-rank score reaches zero
const BUY_RANK_FLOOR: f64 = 100.0;

pub fn early_hit_score(early_hit_count: u32) -> f64 {
    let score = EARLY_HIT_MAX * (1.0 + early_hit_count as f64).ln()
        / (1.0 + EARLY_HIT_SATURATION).ln();
    score.clamp(0.0, EARLY_HIT_MAX)
}

/// No qualifying early buys scores like rank ≥ 100
pub fn buy_rank_score(avg_buy_rank: Option<f64>) -> f64 {
    match avg_buy_rank {
        Some(rank) => {
            let score = BUY_RANK_MAX * (1.0 - rank.max(1.0).ln() / BUY_RANK_FLOOR.ln());
            score.clamp(0.0, BUY_RANK_MAX)
        }
        None => 0.0,
    }
}

pub fn pattern_score(severity_sum: u32) -> f64 {
    (severity_sum.saturating_mul(POINTS_PER_SEVERITY) as f64).min(PATTERN_MAX)
}

/// First band (tightest first) that matches wins; unknown precision is neutral
pub fn precision_penalty(
    precision_rate: Option<f64>,
    total_unique_tokens: Option<u64>,
    bands: &[PenaltyBand],
) -> f64 {
    let (Some(rate), Some(tokens)) = (precision_rate, total_unique_tokens) else {
        return 1.0;
    };
    bands
        .iter()
        .find(|b| b.matches(rate, tokens))
        .map_or(1.0, |b| b.multiplier)
}

pub fn tier_for(score: f64, tiers: &ScoreTiers) -> ScoreTier {
    if score >= tiers.high_priority {
        ScoreTier::HighPriority
    } else if score >= tiers.watchlist {
        ScoreTier::Watchlist
    } else if score >= tiers.moderate {
        ScoreTier::Moderate
    } else if score >= tiers.low {
        ScoreTier::Low
    } else {
        ScoreTier::Minimal
    }
}

/// Reject negative, NaN or infinite metric values before scoring
pub fn validate_metrics(metrics: &WalletMetrics) -> EngineResult<()> {
    let fail = |reason: String| EngineError::InvalidMetrics {
        wallet: metrics.wallet.clone(),
        reason,
    };

    let mut checks: Vec<(&str, f64)> = vec![("wallet_age_days", metrics.wallet_age_days)];
    let optional = [
        ("avg_buy_rank", metrics.avg_buy_rank),
        ("median_buy_rank", metrics.median_buy_rank),
        ("precision_rate", metrics.precision_rate),
        ("activity_span_days", metrics.activity_span_days),
        ("fastest_entry_seconds", metrics.fastest_entry_seconds),
        ("avg_entry_delay_seconds", metrics.avg_entry_delay_seconds),
    ];
    checks.extend(optional.into_iter().filter_map(|(n, v)| v.map(|v| (n, v))));
    if let Some(sells) = &metrics.sell_behavior {
        checks.push(("strategic_exit_count", sells.strategic_exit_count as f64));
        checks.push(("avg_hold_time_hours", sells.avg_hold_time_hours));
        checks.push(("avg_sell_percentage", sells.avg_sell_percentage));
    }

    for (name, value) in checks {
        if value.is_nan() {
            return Err(fail(format!("{name} is NaN")));
        }
        if value.is_infinite() {
            return Err(fail(format!("{name} is infinite")));
        }
        if value < 0.0 {
            return Err(fail(format!("{name} is negative ({value})")));
        }
    }
    Ok(())
}

/// Score one wallet. Deterministic: identical inputs give identical output.
pub fn score_wallet(
    metrics: &WalletMetrics,
    patterns: &[PatternMatch],
    config: &DetectionConfig,
) -> EngineResult<ScoreBreakdown> {
    validate_metrics(metrics)?;

    let early_hit_score = early_hit_score(metrics.early_hit_count);
    let buy_rank_score = buy_rank_score(metrics.avg_buy_rank);
    let pattern_score = pattern_score(total_severity(patterns));
    let base_score = early_hit_score + buy_rank_score + pattern_score;

    let precision_penalty = precision_penalty(
        metrics.precision_rate,
        metrics.total_unique_tokens,
        &config.penalty_bands,
    );
    let final_score = (base_score * precision_penalty).clamp(0.0, 100.0);

    Ok(ScoreBreakdown {
        early_hit_score,
        buy_rank_score,
        pattern_score,
        base_score,
        precision_penalty,
        final_score,
        tier: tier_for(final_score, &config.tiers),
    })
}

/// A penalty of half or worse marks indiscriminate spray-and-pray buying
pub fn is_spray_and_pray(breakdown: &ScoreBreakdown) -> bool {
    breakdown.precision_penalty <= 0.5
}

pub fn should_add_to_watchlist(score: f64, config: &DetectionConfig) -> bool {
    score >= config.watchlist_threshold
}

pub fn should_send_alert(score: f64, config: &DetectionConfig) -> bool {
    score >= config.alert_threshold
}

/// Reports at or above `min_score`, best first
pub fn rank_wallets(reports: &[WalletReport], min_score: f64) -> Vec<WalletReport> {
    let mut ranked: Vec<WalletReport> = reports
        .iter()
        .filter(|r| r.final_score() >= min_score)
        .cloned()
        .collect();
    ranked.sort_by(|a, b| {
        b.final_score()
            .partial_cmp(&a.final_score())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.wallet.cmp(&b.wallet))
    });
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::tests::report;
    use crate::patterns::tests::metrics;
    use crate::types::PatternName;

    fn pattern(name: PatternName, severity: u8) -> PatternMatch {
        PatternMatch {
            name,
            severity,
            description: String::new(),
        }
    }

    #[test]
    fn test_early_hit_score_curve() {
        assert_eq!(early_hit_score(0), 0.0);
        assert!((early_hit_score(20) - 50.0).abs() < 1e-9);
        assert_eq!(early_hit_score(500), 50.0);

        let mut prev = 0.0;
        for hits in 0..60 {
            let s = early_hit_score(hits);
            assert!(s >= prev, "early hit score decreased at {hits}");
            assert!((0.0..=50.0).contains(&s));
            prev = s;
        }
    }

    #[test]
    fn test_buy_rank_score_curve() {
        assert_eq!(buy_rank_score(Some(1.0)), 30.0);
        assert_eq!(buy_rank_score(Some(0.2)), 30.0);
        assert!(buy_rank_score(Some(100.0)).abs() < 1e-9);
        assert_eq!(buy_rank_score(Some(250.0)), 0.0);
        assert_eq!(buy_rank_score(None), 0.0);

        let mut prev = 30.0;
        for rank in 1..150 {
            let s = buy_rank_score(Some(rank as f64));
            assert!(s <= prev, "buy rank score increased at {rank}");
            assert!((0.0..=30.0).contains(&s));
            prev = s;
        }
    }

    #[test]
    fn test_pattern_score_caps_at_twenty() {
        for sum in 0..40u32 {
            assert_eq!(pattern_score(sum), ((4 * sum).min(20)) as f64);
        }
        assert_eq!(pattern_score(u32::MAX), 20.0);
    }

    #[test]
    fn test_precision_penalty_bands() {
        let bands = DetectionConfig::default().penalty_bands;
        assert_eq!(precision_penalty(Some(0.001), Some(5000), &bands), 0.2);
        // Tight precision but too few tokens for band 1 falls through to band 2
        assert_eq!(precision_penalty(Some(0.001), Some(300), &bands), 0.5);
        assert_eq!(precision_penalty(Some(0.04), Some(300), &bands), 0.5);
        assert_eq!(precision_penalty(Some(0.08), Some(150), &bands), 0.7);
        assert_eq!(precision_penalty(Some(0.08), Some(100), &bands), 1.0);
        assert_eq!(precision_penalty(Some(0.10), Some(1000), &bands), 1.0);
        assert_eq!(precision_penalty(None, Some(1000), &bands), 1.0);
        assert_eq!(precision_penalty(Some(0.0), None, &bands), 1.0);
    }

    #[test]
    fn test_penalty_is_total_over_grid() {
        let bands = DetectionConfig::default().penalty_bands;
        for tokens in [0u64, 50, 101, 201, 501, 10_000] {
            for rate in [0.0, 0.005, 0.02, 0.07, 0.2, 1.0] {
                let p = precision_penalty(Some(rate), Some(tokens), &bands);
                assert!([0.2, 0.5, 0.7, 1.0].contains(&p));
            }
        }
    }

    #[test]
    fn test_tiers() {
        let tiers = ScoreTiers::default();
        assert_eq!(tier_for(100.0, &tiers), ScoreTier::HighPriority);
        assert_eq!(tier_for(80.0, &tiers), ScoreTier::HighPriority);
        assert_eq!(tier_for(79.9, &tiers), ScoreTier::Watchlist);
        assert_eq!(tier_for(60.0, &tiers), ScoreTier::Watchlist);
        assert_eq!(tier_for(45.0, &tiers), ScoreTier::Moderate);
        assert_eq!(tier_for(20.0, &tiers), ScoreTier::Low);
        assert_eq!(tier_for(19.99, &tiers), ScoreTier::Minimal);
        assert_eq!(tier_for(0.0, &tiers), ScoreTier::Minimal);
    }

    #[test]
    fn test_consistent_sniper_scenario() {
        let config = DetectionConfig::default();
        let mut m = metrics();
        m.early_hit_count = 6;
        m.avg_buy_rank = Some(4.1);
        m.total_unique_tokens = Some(36);
        m.precision_rate = Some(6.0 / 36.0);
        let patterns = vec![
            pattern(PatternName::ConsistentEarlyBuyer, 5),
            pattern(PatternName::LiquiditySniper, 5),
        ];

        let b = score_wallet(&m, &patterns, &config).unwrap();
        assert_eq!(b.precision_penalty, 1.0);
        assert_eq!(b.pattern_score, 20.0);
        assert!(b.final_score > 70.0 && b.final_score < 76.0, "got {}", b.final_score);
        assert_eq!(b.tier, ScoreTier::Watchlist);
        assert_eq!(b.final_score, b.base_score);
    }

    #[test]
    fn test_spray_and_pray_keeps_twenty_percent() {
        let config = DetectionConfig::default();
        let mut m = metrics();
        m.early_hit_count = 5;
        m.avg_buy_rank = Some(10.0);
        let patterns = vec![pattern(PatternName::ConsistentEarlyBuyer, 5)];

        let unpenalized = score_wallet(&m, &patterns, &config).unwrap();

        m.total_unique_tokens = Some(5000);
        m.precision_rate = Some(5.0 / 5000.0);
        let penalized = score_wallet(&m, &patterns, &config).unwrap();

        assert_eq!(penalized.precision_penalty, 0.2);
        assert_eq!(penalized.base_score, unpenalized.base_score);
        assert_eq!(penalized.final_score, unpenalized.base_score * 0.2);
        assert!(is_spray_and_pray(&penalized));
        assert!(!is_spray_and_pray(&unpenalized));
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let config = DetectionConfig::default();
        let mut m = metrics();
        m.early_hit_count = 3;
        m.avg_buy_rank = Some(17.5);
        let patterns = vec![pattern(PatternName::FreshWalletAlpha, 4)];

        let a = score_wallet(&m, &patterns, &config).unwrap();
        let b = score_wallet(&m, &patterns, &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_metrics_rejected() {
        let config = DetectionConfig::default();

        let mut nan_rank = metrics();
        nan_rank.avg_buy_rank = Some(f64::NAN);
        assert!(matches!(
            score_wallet(&nan_rank, &[], &config),
            Err(EngineError::InvalidMetrics { .. })
        ));

        let mut negative_span = metrics();
        negative_span.activity_span_days = Some(-3.0);
        assert!(matches!(
            score_wallet(&negative_span, &[], &config),
            Err(EngineError::InvalidMetrics { .. })
        ));
    }

    #[test]
    fn test_negative_exit_count_rejected() {
        let mut m = metrics();
        m.sell_behavior = Some(crate::types::SellBehavior {
            wallet: "0xabc".into(),
            strategic_exit_count: -1,
            avg_hold_time_hours: 4.0,
            avg_sell_percentage: 60.0,
        });
        assert!(matches!(
            validate_metrics(&m),
            Err(EngineError::InvalidMetrics { .. })
        ));
    }

    #[test]
    fn test_rank_wallets_filters_and_orders() {
        let reports = vec![
            report("0xccc", 61.0, 0),
            report("0xbbb", 75.0, 0),
            report("0xaaa", 61.0, 0),
            report("0xddd", 59.9, 0),
        ];

        let ranked = rank_wallets(&reports, 60.0);
        let wallets: Vec<&str> = ranked.iter().map(|r| r.wallet.as_str()).collect();
        // Equal scores fall back to wallet order
        assert_eq!(wallets, vec!["0xbbb", "0xaaa", "0xccc"]);

        assert_eq!(rank_wallets(&reports, 0.0).len(), 4);
        assert!(rank_wallets(&reports, 90.0).is_empty());
    }

    #[test]
    fn test_watchlist_and_alert_thresholds() {
        let config = DetectionConfig::default();
        assert!(should_add_to_watchlist(60.0, &config));
        assert!(!should_add_to_watchlist(59.9, &config));
        assert!(should_send_alert(80.0, &config));
        assert!(!should_send_alert(79.0, &config));
    }
}
