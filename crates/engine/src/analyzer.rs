//! Orchestrator — run a batch, merge into the master set, persist

use crate::aggregator::{MergeSummary, ReportAggregator};
use crate::config::DetectionConfig;
use crate::pipeline::{run_batch, AnalysisBatch, BatchOutcome, FreshnessFilter, PipelineOptions};
use crate::types::{PatternName, ScoreBreakdown, ScoreTier, WalletMetrics, WalletReport};
use anyhow::{anyhow, Context};
use chrono::{DateTime, Duration, Utc};
use persistence::repository::{ReportRepository, WalletReportRecord};
use persistence::SqlitePool;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

/// Result of one analyse-and-merge run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub outcome: BatchOutcome,
    pub merge: MergeSummary,
    /// Rows written to SQLite (0 without a database)
    pub persisted: usize,
}

pub fn report_to_record(report: &WalletReport) -> anyhow::Result<WalletReportRecord> {
    let s = &report.score;
    let m = &report.metrics;
    let metrics_json =
        serde_json::to_string(m).with_context(|| format!("serialising metrics of {}", report.key()))?;

    Ok(WalletReportRecord {
        wallet: report.wallet.clone(),
        chain: report.chain.clone(),
        final_score: s.final_score,
        base_score: s.base_score,
        early_hit_score: s.early_hit_score,
        buy_rank_score: s.buy_rank_score,
        pattern_score: s.pattern_score,
        precision_penalty: s.precision_penalty,
        tier: s.tier.as_str().to_string(),
        early_hit_count: m.early_hit_count as i64,
        avg_buy_rank: m.avg_buy_rank,
        best_buy_rank: m.best_buy_rank.map(i64::from),
        same_block_buy_count: m.same_block_buy_count as i64,
        wallet_age_days: m.wallet_age_days,
        precision_rate: m.precision_rate,
        total_unique_tokens: m.total_unique_tokens.map(|t| t as i64),
        patterns: report
            .patterns
            .iter()
            .map(PatternName::as_str)
            .collect::<Vec<_>>()
            .join(","),
        metrics_json: Some(metrics_json),
        analysis_date: report.analysis_date.timestamp(),
        strategic_exit_count: m
            .sell_behavior
            .as_ref()
            .map(|s| s.strategic_exit_count),
        cluster_size: report.cluster_size.map(i64::from),
    })
}

pub fn record_to_report(record: &WalletReportRecord) -> anyhow::Result<WalletReport> {
    let json = record
        .metrics_json
        .as_deref()
        .ok_or_else(|| anyhow!("{}@{} has no stored metrics", record.wallet, record.chain))?;
    let metrics: WalletMetrics = serde_json::from_str(json)
        .with_context(|| format!("parsing metrics of {}@{}", record.wallet, record.chain))?;

    let tier = ScoreTier::parse(&record.tier)
        .ok_or_else(|| anyhow!("unknown tier {:?}", record.tier))?;
    let patterns = record
        .patterns
        .split(',')
        .filter(|p| !p.is_empty())
        .map(|p| PatternName::parse(p).ok_or_else(|| anyhow!("unknown pattern {p:?}")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let analysis_date = DateTime::<Utc>::from_timestamp(record.analysis_date, 0)
        .ok_or_else(|| anyhow!("analysis_date out of range: {}", record.analysis_date))?;

    Ok(WalletReport {
        wallet: record.wallet.clone(),
        chain: record.chain.clone(),
        metrics,
        patterns,
        score: ScoreBreakdown {
            early_hit_score: record.early_hit_score,
            buy_rank_score: record.buy_rank_score,
            pattern_score: record.pattern_score,
            base_score: record.base_score,
            precision_penalty: record.precision_penalty,
            final_score: record.final_score,
            tier,
        },
        analysis_date,
        cluster_size: record.cluster_size.and_then(|c| u32::try_from(c).ok()),
    })
}

/// Rebuild the in-memory master set from SQLite. Unreadable rows are logged
/// and left out.
pub async fn load_master(pool: &SqlitePool) -> anyhow::Result<ReportAggregator> {
    let records = ReportRepository::new(pool).get_all().await?;
    let aggregator = ReportAggregator::new();
    for record in &records {
        match record_to_report(record) {
            Ok(report) => {
                aggregator.merge(report);
            }
            Err(e) => warn!(wallet = %record.wallet, chain = %record.chain, "Skipping stored report: {e:#}"),
        }
    }
    info!(reports = aggregator.len(), "Loaded master report set");
    Ok(aggregator)
}

/// Score a batch, merge it into `aggregator` and, with a pool, into SQLite.
///
/// `skip_fresh_within` skips wallets whose stored report is younger than the
/// window, read from the database when given, otherwise from the aggregator.
pub async fn analyze_and_persist(
    batch: AnalysisBatch,
    config: &DetectionConfig,
    mut options: PipelineOptions,
    skip_fresh_within: Option<Duration>,
    aggregator: &ReportAggregator,
    pool: Option<&SqlitePool>,
) -> anyhow::Result<RunSummary> {
    // Stored dates have second resolution
    let now = Utc::now();
    let analysis_date = DateTime::<Utc>::from_timestamp(now.timestamp(), 0).unwrap_or(now);

    if let Some(window) = skip_fresh_within {
        let last_analysed = match pool {
            Some(pool) => ReportRepository::new(pool)
                .last_analysis_dates(&batch.chain)
                .await?
                .into_iter()
                .filter_map(|(w, ts)| DateTime::<Utc>::from_timestamp(ts, 0).map(|d| (w, d)))
                .collect(),
            None => aggregator
                .snapshot()
                .into_iter()
                .filter(|r| r.chain == batch.chain)
                .map(|r| (r.wallet, r.analysis_date))
                .collect::<HashMap<_, _>>(),
        };
        options.freshness = Some(FreshnessFilter {
            window,
            last_analysed,
        });
    }

    let config_owned = config.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        run_batch(&batch, &config_owned, &options, analysis_date)
    })
    .await
    .context("analysis worker panicked")??;

    // Database first so a failed write leaves the master set untouched
    let reports = outcome.reports();
    let persisted = match pool {
        Some(pool) => {
            let records = reports
                .iter()
                .map(report_to_record)
                .collect::<anyhow::Result<Vec<_>>>()?;
            ReportRepository::new(pool).upsert_batch(&records).await?
        }
        None => 0,
    };
    let merge = aggregator.merge_batch(reports);

    info!(
        chain = %outcome.chain,
        scored = outcome.analyses.len(),
        failed = outcome.failures.len(),
        inserted = merge.inserted,
        replaced = merge.replaced,
        unchanged = merge.unchanged,
        persisted,
        "Run merged into master set"
    );

    Ok(RunSummary {
        outcome,
        merge,
        persisted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::tests::buy;
    use crate::types::{ActivityDensity, TradeRecord};
    use persistence::Database;

    fn batch(wallet: &str, hits: u32, rank: i64) -> AnalysisBatch {
        let trades: Vec<TradeRecord> = (0..hits)
            .map(|i| TradeRecord {
                wallet: wallet.into(),
                ..buy(&format!("tok{i}"), Some(rank), i as i64 * 48)
            })
            .collect();
        AnalysisBatch {
            chain: "ethereum".into(),
            trades,
            activity: vec![ActivityDensity {
                wallet: wallet.into(),
                total_unique_tokens: 40,
                total_tx_count: 100,
                activity_span_days: 200.0,
            }],
            ..AnalysisBatch::default()
        }
    }

    fn options() -> PipelineOptions {
        PipelineOptions {
            workers: 2,
            ..PipelineOptions::default()
        }
    }

    #[tokio::test]
    async fn test_record_roundtrip_preserves_report() {
        let config = DetectionConfig::default();
        let outcome = run_batch(&batch("0xaaa", 6, 3), &config, &options(), Utc::now()).unwrap();
        let report = outcome.reports().remove(0);

        let record = report_to_record(&report).unwrap();
        assert_eq!(record.patterns, "CONSISTENT_EARLY_BUYER");
        let back = record_to_report(&record).unwrap();
        assert_eq!(back.metrics, report.metrics);
        assert_eq!(back.score, report.score);
        assert_eq!(back.analysis_date.timestamp(), report.analysis_date.timestamp());
    }

    #[tokio::test]
    async fn test_persist_keeps_best_score() {
        let db = Database::in_memory().await.unwrap();
        let config = DetectionConfig::default();
        let aggregator = ReportAggregator::new();

        let strong = analyze_and_persist(
            batch("0xaaa", 8, 2),
            &config,
            options(),
            None,
            &aggregator,
            Some(db.pool()),
        )
        .await
        .unwrap();
        assert_eq!(strong.merge.inserted, 1);
        assert_eq!(strong.persisted, 1);
        let best = strong.outcome.analyses[0].report.final_score();

        let weak = analyze_and_persist(
            batch("0xaaa", 5, 40),
            &config,
            options(),
            None,
            &aggregator,
            Some(db.pool()),
        )
        .await
        .unwrap();
        assert_eq!(weak.merge.unchanged, 1);
        assert_eq!(weak.persisted, 0);

        let reloaded = load_master(db.pool()).await.unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.top(1)[0].final_score(), best);
        assert_eq!(aggregator.top(1)[0].final_score(), best);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_master_set_unchanged() {
        let db = Database::in_memory().await.unwrap();
        let config = DetectionConfig::default();
        let aggregator = ReportAggregator::new();
        db.pool().close().await;

        let result = analyze_and_persist(
            batch("0xaaa", 6, 3),
            &config,
            options(),
            None,
            &aggregator,
            Some(db.pool()),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(aggregator.len(), 0);
    }

    #[tokio::test]
    async fn test_skip_fresh_uses_stored_dates() {
        let db = Database::in_memory().await.unwrap();
        let config = DetectionConfig::default();
        let aggregator = ReportAggregator::new();

        analyze_and_persist(batch("0xaaa", 6, 3), &config, options(), None, &aggregator, Some(db.pool()))
            .await
            .unwrap();
        let rerun = analyze_and_persist(
            batch("0xaaa", 6, 3),
            &config,
            options(),
            Some(Duration::hours(6)),
            &aggregator,
            Some(db.pool()),
        )
        .await
        .unwrap();

        assert_eq!(rerun.outcome.skipped_fresh, vec!["0xaaa".to_string()]);
        assert!(rerun.outcome.analyses.is_empty());
    }
}
