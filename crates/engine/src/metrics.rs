//! Metrics calculator — per-wallet aggregates from raw trade facts
//!
//! Pure functions: the same trades, density and sell rows always produce the
//! same `WalletMetrics`.

use crate::config::DetectionConfig;
use crate::error::{EngineError, EngineResult};
use crate::types::{ActivityDensity, SellBehavior, TradeAction, TradeRecord, WalletMetrics};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

const SECONDS_PER_DAY: f64 = 86_400.0;

// ---------------------------------------------------------------------------
// Wallet metrics
// ---------------------------------------------------------------------------

/// Compute metrics for one wallet.
///
/// `trades` must all belong to `wallet` and are expected to be restricted to
/// the tokens of interest already. Fails with `MissingData` when empty.
pub fn compute_metrics(
    wallet: &str,
    chain: &str,
    trades: &[TradeRecord],
    activity: Option<&ActivityDensity>,
    sells: Option<&SellBehavior>,
    config: &DetectionConfig,
) -> EngineResult<WalletMetrics> {
    let (first_trade_at, last_trade_at) = match (
        trades.iter().map(|t| t.timestamp).min(),
        trades.iter().map(|t| t.timestamp).max(),
    ) {
        (Some(first), Some(last)) => (first, last),
        _ => {
            return Err(EngineError::MissingData {
                wallet: wallet.to_string(),
            })
        }
    };

    if let Some(rank) = trades.iter().find_map(|t| t.buy_rank.filter(|r| *r < 1)) {
        return Err(invalid(wallet, format!("buy_rank must start at 1, got {rank}")));
    }
    let total_unique_tokens = activity
        .map(|a| non_negative(wallet, "total_unique_tokens", a.total_unique_tokens))
        .transpose()?;
    let total_tx_count = activity
        .map(|a| non_negative(wallet, "total_tx_count", a.total_tx_count))
        .transpose()?;

    let buys: Vec<&TradeRecord> = trades
        .iter()
        .filter(|t| t.action == TradeAction::Buy)
        .collect();
    let buy_count = buys.len() as u32;
    let sell_count = trades.len() as u32 - buy_count;

    let unique_tokens_traded = trades
        .iter()
        .map(|t| t.token_address.as_str())
        .collect::<HashSet<_>>()
        .len() as u32;

    // Best qualifying rank per token; a token counts once however many buys it has
    let early_buys: Vec<&TradeRecord> = buys
        .iter()
        .copied()
        .filter(|t| matches!(t.buy_rank, Some(r) if r <= i64::from(config.first_n_buyers)))
        .collect();
    let mut best_rank_by_token: BTreeMap<&str, i64> = BTreeMap::new();
    for trade in &early_buys {
        if let Some(rank) = trade.buy_rank {
            best_rank_by_token
                .entry(trade.token_address.as_str())
                .and_modify(|r| *r = (*r).min(rank))
                .or_insert(rank);
        }
    }

    let early_hit_count = best_rank_by_token.len() as u32;
    let early_buy_tokens: Vec<String> = best_rank_by_token.keys().map(|t| t.to_string()).collect();
    let ranks: Vec<f64> = best_rank_by_token.values().map(|&r| r as f64).collect();
    let avg_buy_rank = mean(&ranks);
    let median_buy_rank = median(&ranks);
    let best_buy_rank = best_rank_by_token
        .values()
        .min()
        .and_then(|r| u32::try_from(*r).ok());

    let same_block_buy_count = buys.iter().filter(|t| t.is_same_block_buy).count() as u32;

    // Entry delay after launch, early buys with a known launch time only
    let entry_delays: Vec<f64> = early_buys
        .iter()
        .filter_map(|t| entry_delay_seconds(t))
        .collect();
    let fastest_entry_seconds = entry_delays.iter().copied().reduce(f64::min);
    let avg_entry_delay_seconds = mean(&entry_delays);

    let wallet_age_days = (last_trade_at - first_trade_at).num_seconds() as f64 / SECONDS_PER_DAY;

    let precision_rate = match total_unique_tokens {
        Some(total) if total > 0 => Some(early_hit_count as f64 / total as f64),
        _ => None,
    };

    Ok(WalletMetrics {
        wallet: wallet.to_string(),
        chain: chain.to_string(),
        total_trades: trades.len() as u32,
        buy_count,
        sell_count,
        unique_tokens_traded,
        first_trade_at,
        last_trade_at,
        wallet_age_days,
        early_hit_count,
        early_buy_tokens,
        avg_buy_rank,
        median_buy_rank,
        best_buy_rank,
        same_block_buy_count,
        fastest_entry_seconds,
        avg_entry_delay_seconds,
        total_unique_tokens,
        total_tx_count,
        activity_span_days: activity.map(|a| a.activity_span_days),
        precision_rate,
        sell_behavior: sells.cloned(),
    })
}

fn invalid(wallet: &str, reason: String) -> EngineError {
    EngineError::InvalidMetrics {
        wallet: wallet.to_string(),
        reason,
    }
}

fn non_negative(wallet: &str, name: &str, value: i64) -> EngineResult<u64> {
    u64::try_from(value).map_err(|_| invalid(wallet, format!("{name} is negative ({value})")))
}

/// Seconds between token launch and this buy (never negative)
fn entry_delay_seconds(trade: &TradeRecord) -> Option<f64> {
    let launch = trade.launch_timestamp?;
    let delay = (trade.timestamp - launch).num_milliseconds() as f64 / 1000.0;
    Some(delay.max(0.0))
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

// ---------------------------------------------------------------------------
// Sell behaviour derived from the wallet's own trades
// ---------------------------------------------------------------------------

/// Reconstruct exit behaviour from BUY/SELL amounts when no sell data was supplied.
///
/// Positions are replayed per token in time order. A sell that liquidates at
/// least `strategic_exit_min_fraction` of the position held at that moment is
/// a strategic exit; its hold time runs from the first buy of the position.
/// Sells with no open position are ignored. Returns None when no sell could be
/// matched to a position.
pub fn derive_sell_behavior(
    wallet: &str,
    trades: &[TradeRecord],
    config: &DetectionConfig,
) -> Option<SellBehavior> {
    let mut ordered: Vec<&TradeRecord> = trades.iter().collect();
    ordered.sort_by_key(|t| (t.timestamp, t.block_number));

    struct Position {
        held: f64,
        opened_at: Option<chrono::DateTime<chrono::Utc>>,
    }

    let mut positions: HashMap<&str, Position> = HashMap::new();
    let mut sell_fractions: Vec<f64> = Vec::new();
    let mut exit_hold_hours: Vec<f64> = Vec::new();

    for trade in ordered {
        if !trade.amount.is_finite() || trade.amount <= 0.0 {
            continue;
        }
        let position = positions
            .entry(trade.token_address.as_str())
            .or_insert(Position {
                held: 0.0,
                opened_at: None,
            });

        match trade.action {
            TradeAction::Buy => {
                if position.held <= 0.0 {
                    position.opened_at = Some(trade.timestamp);
                }
                position.held += trade.amount;
            }
            TradeAction::Sell => {
                if position.held <= 0.0 {
                    continue;
                }
                let fraction = (trade.amount / position.held).min(1.0);
                sell_fractions.push(fraction);

                if fraction >= config.strategic_exit_min_fraction {
                    if let Some(opened) = position.opened_at {
                        let hours = (trade.timestamp - opened).num_seconds() as f64 / 3600.0;
                        exit_hold_hours.push(hours.max(0.0));
                    }
                }

                position.held = (position.held - trade.amount).max(0.0);
                if position.held == 0.0 {
                    position.opened_at = None;
                }
            }
        }
    }

    if sell_fractions.is_empty() {
        return None;
    }

    Some(SellBehavior {
        wallet: wallet.to_string(),
        strategic_exit_count: exit_hold_hours.len() as i64,
        avg_hold_time_hours: mean(&exit_hold_hours).unwrap_or(0.0),
        avg_sell_percentage: mean(&sell_fractions).unwrap_or(0.0) * 100.0,
    })
}

// ---------------------------------------------------------------------------
// Sniping profile (informational, does not feed the whale score)
// ---------------------------------------------------------------------------

const ULTRA_FAST_ENTRY_SECS: f64 = 60.0;
const ULTRA_FAST_MIN_BUYS: usize = 3;
const TOP_TEN_RANK: i64 = 10;
const TOP_TEN_MIN_BUYS: usize = 5;
const HIGH_FREQUENCY_TRADES_PER_DAY: f64 = 5.0;
const LIKELY_SNIPER_SCORE: u32 = 40;

/// Heuristic bot/sniper indicators with evidence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnipingProfile {
    pub sniping_score: u32,
    pub is_likely_sniper: bool,
    pub evidence: Vec<String>,
}

pub fn sniping_profile(trades: &[TradeRecord], config: &DetectionConfig) -> SnipingProfile {
    let mut score = 0u32;
    let mut evidence = Vec::new();

    let buys: Vec<&TradeRecord> = trades
        .iter()
        .filter(|t| t.action == TradeAction::Buy)
        .collect();

    let same_block = buys.iter().filter(|t| t.is_same_block_buy).count();
    if same_block >= config.liquidity_sniper_min_hits as usize {
        evidence.push(format!("Same-block liquidity sniping: {same_block} times"));
        score += 30;
    }

    let ultra_fast = buys
        .iter()
        .filter_map(|t| entry_delay_seconds(t))
        .filter(|d| *d < ULTRA_FAST_ENTRY_SECS)
        .count();
    if ultra_fast >= ULTRA_FAST_MIN_BUYS {
        evidence.push(format!("Ultra-fast buys (<60s): {ultra_fast} times"));
        score += 20;
    }

    let top_ten = buys
        .iter()
        .filter(|t| matches!(t.buy_rank, Some(r) if r <= TOP_TEN_RANK))
        .count();
    if top_ten >= TOP_TEN_MIN_BUYS {
        evidence.push(format!("Consistent top-10 buyer: {top_ten} times"));
        score += 25;
    }

    let first = trades.iter().map(|t| t.timestamp).min();
    let last = trades.iter().map(|t| t.timestamp).max();
    if let (Some(first), Some(last)) = (first, last) {
        let span_days = (last - first).num_days();
        if span_days > 0 {
            let per_day = trades.len() as f64 / span_days as f64;
            if per_day >= HIGH_FREQUENCY_TRADES_PER_DAY {
                evidence.push(format!("High-frequency: {per_day:.1} trades/day"));
                score += 15;
            }
        }
    }

    SnipingProfile {
        sniping_score: score,
        is_likely_sniper: score >= LIKELY_SNIPER_SCORE,
        evidence,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    pub(crate) fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    pub(crate) fn buy(token: &str, rank: Option<i64>, hours: i64) -> TradeRecord {
        TradeRecord {
            wallet: "0xabc".into(),
            chain: "ethereum".into(),
            token_address: token.into(),
            action: TradeAction::Buy,
            amount: 100.0,
            timestamp: base_time() + Duration::hours(hours),
            block_number: 1_000 + hours as u64,
            tx_hash: format!("0x{token}{hours}"),
            buy_rank: rank,
            launch_timestamp: None,
            launch_block: None,
            is_same_block_buy: false,
        }
    }

    pub(crate) fn sell(token: &str, amount: f64, hours: i64) -> TradeRecord {
        TradeRecord {
            action: TradeAction::Sell,
            amount,
            buy_rank: None,
            ..buy(token, None, hours)
        }
    }

    fn density(total_unique_tokens: i64) -> ActivityDensity {
        ActivityDensity {
            wallet: "0xabc".into(),
            total_unique_tokens,
            total_tx_count: total_unique_tokens * 2,
            activity_span_days: 90.0,
        }
    }

    #[test]
    fn test_empty_trades_is_missing_data() {
        let config = DetectionConfig::default();
        let err = compute_metrics("0xabc", "ethereum", &[], None, None, &config).unwrap_err();
        assert_eq!(
            err,
            EngineError::MissingData {
                wallet: "0xabc".into()
            }
        );
    }

    #[test]
    fn test_early_hits_count_distinct_tokens() {
        let config = DetectionConfig::default();
        let trades = vec![
            buy("tokA", Some(4), 0),
            buy("tokA", Some(9), 1),
            buy("tokB", Some(40), 2),
            buy("tokC", Some(250), 3),
            buy("tokD", None, 4),
        ];
        let m = compute_metrics("0xabc", "ethereum", &trades, None, None, &config).unwrap();

        assert_eq!(m.early_hit_count, 2);
        assert_eq!(m.early_buy_tokens, vec!["tokA".to_string(), "tokB".to_string()]);
        assert_eq!(m.best_buy_rank, Some(4));
        assert_eq!(m.avg_buy_rank, Some(22.0));
        assert_eq!(m.median_buy_rank, Some(22.0));
        assert_eq!(m.unique_tokens_traded, 4);
        assert_eq!(m.buy_count, 5);
    }

    #[test]
    fn test_rank_zero_is_invalid() {
        let config = DetectionConfig::default();
        let trades = vec![buy("tokA", Some(3), 0), buy("tokB", Some(0), 1)];
        let err = compute_metrics("0xabc", "ethereum", &trades, None, None, &config).unwrap_err();
        assert!(matches!(err, EngineError::InvalidMetrics { .. }));
    }

    #[test]
    fn test_negative_density_is_invalid() {
        let config = DetectionConfig::default();
        let trades = vec![buy("tokA", Some(3), 0)];
        let err = compute_metrics("0xabc", "ethereum", &trades, Some(&density(-5)), None, &config)
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::InvalidMetrics {
                wallet: "0xabc".into(),
                reason: "total_unique_tokens is negative (-5)".into(),
            }
        );
    }

    #[test]
    fn test_first_n_buyers_is_inclusive() {
        let config = DetectionConfig {
            first_n_buyers: 50,
            ..DetectionConfig::default()
        };
        let trades = vec![buy("tokA", Some(50), 0), buy("tokB", Some(51), 1)];
        let m = compute_metrics("0xabc", "ethereum", &trades, None, None, &config).unwrap();
        assert_eq!(m.early_hit_count, 1);
    }

    #[test]
    fn test_wallet_age_spans_first_to_last_trade() {
        let config = DetectionConfig::default();
        let trades = vec![buy("tokA", Some(1), 0), buy("tokB", Some(2), 36)];
        let m = compute_metrics("0xabc", "ethereum", &trades, None, None, &config).unwrap();
        assert!((m.wallet_age_days - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_precision_rate() {
        let config = DetectionConfig::default();
        let trades: Vec<TradeRecord> = (0..6).map(|i| buy(&format!("t{i}"), Some(3), i)).collect();

        let m = compute_metrics("0xabc", "ethereum", &trades, Some(&density(36)), None, &config)
            .unwrap();
        let p = m.precision_rate.unwrap();
        assert!((p - 6.0 / 36.0).abs() < 1e-12);
        assert_eq!(m.total_tx_count, Some(72));
    }

    #[test]
    fn test_precision_undefined_without_breadth() {
        let config = DetectionConfig::default();
        let trades = vec![buy("tokA", Some(1), 0)];

        let none = compute_metrics("0xabc", "ethereum", &trades, None, None, &config).unwrap();
        assert_eq!(none.precision_rate, None);

        let zero = compute_metrics("0xabc", "ethereum", &trades, Some(&density(0)), None, &config)
            .unwrap();
        assert_eq!(zero.precision_rate, None);
        assert_eq!(zero.total_unique_tokens, Some(0));
    }

    #[test]
    fn test_same_block_and_entry_delay() {
        let config = DetectionConfig::default();
        let mut a = buy("tokA", Some(1), 0);
        a.is_same_block_buy = true;
        a.launch_timestamp = Some(a.timestamp - Duration::seconds(12));
        let mut b = buy("tokB", Some(2), 1);
        b.launch_timestamp = Some(b.timestamp - Duration::seconds(30));
        let mut c = buy("tokC", Some(500), 2);
        c.is_same_block_buy = true;

        let m = compute_metrics("0xabc", "ethereum", &[a, b, c], None, None, &config).unwrap();
        assert_eq!(m.same_block_buy_count, 2);
        assert_eq!(m.fastest_entry_seconds, Some(12.0));
        assert_eq!(m.avg_entry_delay_seconds, Some(21.0));
    }

    #[test]
    fn test_sells_only_wallet_has_no_early_hits() {
        let config = DetectionConfig::default();
        let trades = vec![sell("tokA", 10.0, 0)];
        let m = compute_metrics("0xabc", "ethereum", &trades, None, None, &config).unwrap();
        assert_eq!(m.early_hit_count, 0);
        assert_eq!(m.avg_buy_rank, None);
        assert_eq!(m.sell_count, 1);
    }

    #[test]
    fn test_derive_sell_behavior() {
        let config = DetectionConfig::default();
        let trades = vec![
            buy("tokA", Some(1), 0),
            sell("tokA", 80.0, 10),
            buy("tokB", Some(2), 0),
            sell("tokB", 20.0, 5),
            sell("tokB", 80.0, 30),
            sell("tokC", 50.0, 40),
        ];
        let behavior = derive_sell_behavior("0xabc", &trades, &config).unwrap();

        // tokA 80% after 10h, tokB final 100% after 30h; the 20% sell is not an exit
        assert_eq!(behavior.strategic_exit_count, 2);
        assert!((behavior.avg_hold_time_hours - 20.0).abs() < 1e-9);
        assert!((behavior.avg_sell_percentage - (80.0 + 20.0 + 100.0) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_derive_sell_behavior_without_sells() {
        let config = DetectionConfig::default();
        assert!(derive_sell_behavior("0xabc", &[buy("tokA", Some(1), 0)], &config).is_none());
    }

    #[test]
    fn test_sniping_profile() {
        let config = DetectionConfig::default();
        let trades: Vec<TradeRecord> = (0..5)
            .map(|i| {
                let mut t = buy(&format!("t{i}"), Some(2), i);
                t.is_same_block_buy = true;
                t.launch_timestamp = Some(t.timestamp - Duration::seconds(5));
                t
            })
            .collect();

        let profile = sniping_profile(&trades, &config);
        assert_eq!(profile.sniping_score, 75);
        assert!(profile.is_likely_sniper);
        assert_eq!(profile.evidence.len(), 3);
    }
}
