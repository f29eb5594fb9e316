//! Plain-text wallet reports for terminal output

use crate::patterns::summarize;
use crate::scorer::is_spray_and_pray;
use crate::types::{PatternMatch, WalletReport};
use std::fmt::Write;

const RULE: &str = "============================================================";

fn opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| v.to_string())
}

/// Score breakdown, key metrics and detected patterns for one wallet
pub fn render_wallet_report(report: &WalletReport, matches: &[PatternMatch]) -> String {
    let s = &report.score;
    let m = &report.metrics;
    let mut out = String::new();

    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "WHALE REPORT: {} ({})", report.wallet, report.chain);
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "Final score:      {:.1}/100", s.final_score);
    let _ = writeln!(out, "Tier:             {} ({})", s.tier.label(), s.tier);
    let _ = writeln!(out, "Analysed at:      {}", report.analysis_date.format("%Y-%m-%d %H:%M UTC"));
    let _ = writeln!(out);
    let _ = writeln!(out, "Score breakdown");
    let _ = writeln!(out, "  Early hits:     {:>5.1}/50", s.early_hit_score);
    let _ = writeln!(out, "  Buy rank:       {:>5.1}/30", s.buy_rank_score);
    let _ = writeln!(out, "  Patterns:       {:>5.1}/20", s.pattern_score);
    let _ = writeln!(out, "  Base:           {:>5.1}", s.base_score);
    let _ = writeln!(out, "  Precision x:    {:>5.2}", s.precision_penalty);
    if is_spray_and_pray(s) {
        let _ = writeln!(out, "  (spray-and-pray: most early buys are noise)");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "Metrics");
    let _ = writeln!(out, "  Early hits:     {} tokens", m.early_hit_count);
    let _ = writeln!(
        out,
        "  Buy rank:       avg {} / median {} / best {}",
        opt(m.avg_buy_rank.map(|r| format!("{r:.1}"))),
        opt(m.median_buy_rank.map(|r| format!("{r:.1}"))),
        opt(m.best_buy_rank)
    );
    let _ = writeln!(out, "  Same-block buys: {}", m.same_block_buy_count);
    let _ = writeln!(out, "  Wallet age:     {:.1} days", m.wallet_age_days);
    let _ = writeln!(
        out,
        "  Precision:      {} of {} tokens",
        opt(m.precision_rate.map(|p| format!("{:.1}%", p * 100.0))),
        opt(m.total_unique_tokens)
    );
    let _ = writeln!(
        out,
        "  Trades:         {} ({} buys, {} sells)",
        m.total_trades, m.buy_count, m.sell_count
    );
    if let Some(fastest) = m.fastest_entry_seconds {
        let _ = writeln!(out, "  Fastest entry:  {fastest:.0}s after launch");
    }
    if let Some(sells) = &m.sell_behavior {
        let _ = writeln!(
            out,
            "  Exits:          {} strategic, avg hold {:.1}h, avg sold {:.0}%",
            sells.strategic_exit_count, sells.avg_hold_time_hours, sells.avg_sell_percentage
        );
    }
    if let Some(size) = report.cluster_size {
        let _ = writeln!(out, "  Cluster size:   {size}");
    }
    let _ = writeln!(out);
    out.push_str(&render_pattern_report(matches));
    out
}

/// Detected patterns, most severe first
pub fn render_pattern_report(matches: &[PatternMatch]) -> String {
    let mut out = String::new();
    if matches.is_empty() {
        let _ = writeln!(out, "No suspicious patterns detected");
        return out;
    }

    let summary = summarize(matches);
    let _ = writeln!(
        out,
        "Detected patterns: {} (total severity {}, max {})",
        summary.total_patterns, summary.total_severity, summary.max_severity
    );

    let mut sorted: Vec<&PatternMatch> = matches.iter().collect();
    sorted.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.name.cmp(&b.name)));
    for p in sorted {
        let _ = writeln!(out, "  [{}/5] {}: {}", p.severity, p.name, p.description);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::tests::report;
    use crate::types::PatternName;

    #[test]
    fn test_pattern_report_orders_by_severity() {
        let matches = vec![
            PatternMatch {
                name: PatternName::FreshWalletAlpha,
                severity: 4,
                description: "fresh".into(),
            },
            PatternMatch {
                name: PatternName::LiquiditySniper,
                severity: 5,
                description: "sniper".into(),
            },
        ];
        let text = render_pattern_report(&matches);
        assert!(text.contains("total severity 9, max 5"));
        let sniper = text.find("LIQUIDITY_SNIPER").unwrap();
        let fresh = text.find("FRESH_WALLET_ALPHA").unwrap();
        assert!(sniper < fresh);
    }

    #[test]
    fn test_wallet_report_contents() {
        let r = report("0xfeed", 72.8, 0);
        let text = render_wallet_report(&r, &[]);
        assert!(text.contains("0xfeed (ethereum)"));
        assert!(text.contains("72.8/100"));
        assert!(text.contains("No suspicious patterns detected"));
        assert!(text.contains("n/a"));
    }
}
