//! Pattern detector — independent suspicion rules over wallet metrics
//!
//! Each pattern is one row of `RULES`: a predicate, a severity function and a
//! description. Rules share no state, so evaluation order does not matter and
//! a new pattern is a new row.

use crate::config::DetectionConfig;
use crate::types::{ClusterAssignment, PatternMatch, PatternName, WalletMetrics};
use serde::Serialize;
use std::collections::BTreeMap;

/// Everything a rule may look at
pub struct RuleInput<'a> {
    pub metrics: &'a WalletMetrics,
    pub cluster: Option<&'a ClusterAssignment>,
    pub config: &'a DetectionConfig,
}

impl RuleInput<'_> {
    fn is_fresh(&self) -> bool {
        self.metrics.wallet_age_days < self.config.fresh_wallet_days
    }
}

pub struct PatternRule {
    pub name: PatternName,
    pub applies: fn(&RuleInput<'_>) -> bool,
    pub severity: fn(&RuleInput<'_>) -> u8,
    pub describe: fn(&RuleInput<'_>, u8) -> String,
}

pub const RULES: &[PatternRule] = &[
    PatternRule {
        name: PatternName::ConsistentEarlyBuyer,
        applies: |i| {
            i.metrics.early_hit_count >= i.config.min_early_hits
                && matches!(i.metrics.avg_buy_rank, Some(r) if r <= i.config.early_buyer_avg_rank_threshold)
        },
        severity: |_| 5,
        describe: |i, _| {
            format!(
                "Consistently bought early (avg rank {:.0}) on {} tokens",
                i.metrics.avg_buy_rank.unwrap_or_default(),
                i.metrics.early_hit_count
            )
        },
    },
    // Context-aware: a fresh wallet sniping launches is an insider signal,
    // an established one doing the same is routine MEV.
    PatternRule {
        name: PatternName::LiquiditySniper,
        applies: |i| i.metrics.same_block_buy_count >= i.config.liquidity_sniper_min_hits,
        severity: |i| if i.is_fresh() { 5 } else { 2 },
        describe: |i, severity| {
            if severity >= 5 {
                format!(
                    "Fresh wallet ({:.1}d old) sniping liquidity adds ({} times)",
                    i.metrics.wallet_age_days, i.metrics.same_block_buy_count
                )
            } else {
                format!(
                    "Routine sniping ({} same-block buys) on established wallet ({:.1}d old)",
                    i.metrics.same_block_buy_count, i.metrics.wallet_age_days
                )
            }
        },
    },
    PatternRule {
        name: PatternName::FreshWalletAlpha,
        applies: |i| {
            i.is_fresh() && i.metrics.early_hit_count >= i.config.fresh_wallet_min_early_hits
        },
        severity: |_| 4,
        describe: |i, _| {
            format!(
                "Fresh wallet ({:.1}d old) started early buying with {} hits",
                i.metrics.wallet_age_days, i.metrics.early_hit_count
            )
        },
    },
    PatternRule {
        name: PatternName::WalletCluster,
        applies: |i| matches!(i.cluster, Some(c) if c.cluster_size >= i64::from(i.config.cluster_min_size)),
        severity: |_| 4,
        describe: |i, _| {
            let (id, size) = i
                .cluster
                .map(|c| (c.cluster_id.as_str(), c.cluster_size))
                .unwrap_or_default();
            format!("Part of {size}-wallet cluster {id}, likely one entity behind several wallets")
        },
    },
    PatternRule {
        name: PatternName::StrategicDumper,
        applies: |i| {
            matches!(&i.metrics.sell_behavior, Some(s) if s.strategic_exit_count >= i64::from(i.config.strategic_dumper_min_exits))
        },
        severity: |i| match &i.metrics.sell_behavior {
            Some(s) if s.avg_hold_time_hours < i.config.quick_flip_hours => 5,
            _ => 4,
        },
        describe: |i, severity| {
            let (exits, hold) = i
                .metrics
                .sell_behavior
                .as_ref()
                .map(|s| (s.strategic_exit_count, s.avg_hold_time_hours))
                .unwrap_or_default();
            if severity >= 5 {
                format!("Quick flipper: {exits} strategic exits, avg hold {hold:.1}h")
            } else {
                format!("Profit taker: {exits} strategic exits, avg hold {hold:.1}h")
            }
        },
    },
];

/// Evaluate every rule. Each pattern name appears at most once in the result,
/// ordered by pattern name.
pub fn detect_patterns(
    metrics: &WalletMetrics,
    cluster: Option<&ClusterAssignment>,
    config: &DetectionConfig,
) -> Vec<PatternMatch> {
    let input = RuleInput {
        metrics,
        cluster,
        config,
    };

    let mut matches: BTreeMap<PatternName, PatternMatch> = BTreeMap::new();
    for rule in RULES.iter().filter(|r| (r.applies)(&input)) {
        let severity = (rule.severity)(&input).clamp(1, 5);
        // Keep the most severe if a name ever appears twice in the table
        let replace = matches
            .get(&rule.name)
            .map_or(true, |existing| severity > existing.severity);
        if replace {
            matches.insert(
                rule.name,
                PatternMatch {
                    name: rule.name,
                    severity,
                    description: (rule.describe)(&input, severity),
                },
            );
        }
    }

    matches.into_values().collect()
}

pub fn total_severity(patterns: &[PatternMatch]) -> u32 {
    patterns.iter().map(|p| p.severity as u32).sum()
}

/// Summary statistics over one wallet's matches
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternSummary {
    pub total_patterns: usize,
    pub total_severity: u32,
    pub max_severity: u8,
    pub pattern_names: Vec<PatternName>,
}

pub fn summarize(patterns: &[PatternMatch]) -> PatternSummary {
    PatternSummary {
        total_patterns: patterns.len(),
        total_severity: total_severity(patterns),
        max_severity: patterns.iter().map(|p| p.severity).max().unwrap_or(0),
        pattern_names: patterns.iter().map(|p| p.name).collect(),
    }
}

pub fn filter_by_severity(patterns: &[PatternMatch], min_severity: u8) -> Vec<PatternMatch> {
    patterns
        .iter()
        .filter(|p| p.severity >= min_severity)
        .cloned()
        .collect()
}

/// Pattern combinations that indicate insider trading on their own
pub fn is_likely_insider(patterns: &[PatternMatch]) -> bool {
    let has = |name: PatternName| patterns.iter().any(|p| p.name == name);

    (has(PatternName::ConsistentEarlyBuyer) && has(PatternName::LiquiditySniper))
        || total_severity(patterns) >= 15
        || patterns.len() >= 4
}
