//! Batch pipeline — metrics → patterns → score for every wallet in a batch
//!
//! Each wallet depends only on its own inputs, so wallets are spread over a
//! bounded pool of worker threads with no shared mutable state. Cluster,
//! activity and sell tables are read-only for the whole run.

use crate::config::DetectionConfig;
use crate::error::{EngineError, EngineResult};
use crate::metrics::{compute_metrics, derive_sell_behavior, sniping_profile, SnipingProfile};
use crate::patterns::{detect_patterns, is_likely_insider};
use crate::scorer::score_wallet;
use crate::types::{
    ActivityDensity, ClusterAssignment, PatternMatch, SellBehavior, TradeRecord, WalletReport,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Everything the collaborators produced for one chain
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisBatch {
    pub chain: String,
    #[serde(default)]
    pub trades: Vec<TradeRecord>,
    #[serde(default)]
    pub activity: Vec<ActivityDensity>,
    #[serde(default)]
    pub sells: Vec<SellBehavior>,
    #[serde(default)]
    pub clusters: Vec<ClusterAssignment>,
}

/// Skip wallets whose stored report is younger than `window`
#[derive(Debug, Clone)]
pub struct FreshnessFilter {
    pub window: Duration,
    pub last_analysed: HashMap<String, DateTime<Utc>>,
}

impl FreshnessFilter {
    fn is_fresh(&self, wallet: &str, now: DateTime<Utc>) -> bool {
        self.last_analysed
            .get(wallet)
            .is_some_and(|last| now - *last < self.window)
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Worker threads; 0 is treated as 1
    pub workers: usize,
    /// Rebuild SellBehavior from BUY/SELL amounts when none was supplied
    pub derive_sell_behavior: bool,
    pub freshness: Option<FreshnessFilter>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(4, |n| n.get()),
            derive_sell_behavior: false,
            freshness: None,
        }
    }
}

/// One scored wallet with the detail behind its report
#[derive(Debug, Clone, Serialize)]
pub struct WalletAnalysis {
    pub report: WalletReport,
    pub matches: Vec<PatternMatch>,
    pub sniping: SnipingProfile,
    pub likely_insider: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    MissingData,
    InvalidMetrics,
}

/// A wallet that could not be scored in this run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletFailure {
    pub wallet: String,
    pub chain: String,
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub chain: String,
    pub analysis_date: DateTime<Utc>,
    /// Best final score first
    pub analyses: Vec<WalletAnalysis>,
    pub failures: Vec<WalletFailure>,
    pub skipped_fresh: Vec<String>,
}

impl BatchOutcome {
    pub fn reports(&self) -> Vec<WalletReport> {
        self.analyses.iter().map(|a| a.report.clone()).collect()
    }

    pub fn into_reports(self) -> Vec<WalletReport> {
        self.analyses.into_iter().map(|a| a.report).collect()
    }
}

/// Read-only lookups shared by every worker
struct RunContext<'a> {
    chain: &'a str,
    config: &'a DetectionConfig,
    options: &'a PipelineOptions,
    analysis_date: DateTime<Utc>,
    activity: HashMap<&'a str, &'a ActivityDensity>,
    sells: HashMap<&'a str, &'a SellBehavior>,
    clusters: HashMap<&'a str, &'a ClusterAssignment>,
}

impl RunContext<'_> {
    fn analyse(&self, wallet: &str, trades: &[TradeRecord]) -> EngineResult<WalletAnalysis> {
        let cluster = self.clusters.get(wallet).copied();
        let cluster_size = cluster
            .map(|c| {
                u32::try_from(c.cluster_size).map_err(|_| EngineError::InvalidMetrics {
                    wallet: wallet.to_string(),
                    reason: format!("cluster_size is out of range ({})", c.cluster_size),
                })
            })
            .transpose()?;

        let derived;
        let sells = match self.sells.get(wallet) {
            Some(s) => Some(*s),
            None if self.options.derive_sell_behavior => {
                derived = derive_sell_behavior(wallet, trades, self.config);
                derived.as_ref()
            }
            None => None,
        };

        let metrics = compute_metrics(
            wallet,
            self.chain,
            trades,
            self.activity.get(wallet).copied(),
            sells,
            self.config,
        )?;
        let matches = detect_patterns(&metrics, cluster, self.config);
        let score = score_wallet(&metrics, &matches, self.config)?;

        debug!(
            wallet,
            score = score.final_score,
            tier = %score.tier,
            patterns = matches.len(),
            "Scored wallet"
        );

        Ok(WalletAnalysis {
            report: WalletReport {
                wallet: wallet.to_string(),
                chain: self.chain.to_string(),
                metrics,
                patterns: matches.iter().map(|m| m.name).collect(),
                score,
                analysis_date: self.analysis_date,
                cluster_size,
            },
            likely_insider: is_likely_insider(&matches),
            sniping: sniping_profile(trades, self.config),
            matches,
        })
    }
}

/// Score every wallet in the batch.
///
/// An invalid configuration aborts before any wallet is processed. Per-wallet
/// errors are collected into `failures` and never stop the batch.
pub fn run_batch(
    batch: &AnalysisBatch,
    config: &DetectionConfig,
    options: &PipelineOptions,
    analysis_date: DateTime<Utc>,
) -> EngineResult<BatchOutcome> {
    config.validate()?;
    let started = Instant::now();

    let mut by_wallet: BTreeMap<&str, Vec<TradeRecord>> = BTreeMap::new();
    let mut foreign = 0usize;
    for trade in &batch.trades {
        if trade.chain != batch.chain {
            foreign += 1;
            continue;
        }
        by_wallet
            .entry(trade.wallet.as_str())
            .or_default()
            .push(trade.clone());
    }
    if foreign > 0 {
        warn!(chain = %batch.chain, foreign, "Ignoring trades from another chain");
    }

    let mut failures: Vec<WalletFailure> = batch
        .activity
        .iter()
        .filter(|a| !by_wallet.contains_key(a.wallet.as_str()))
        .map(|a| WalletFailure {
            wallet: a.wallet.clone(),
            chain: batch.chain.clone(),
            kind: FailureKind::MissingData,
            reason: "no trades for tokens of interest".to_string(),
        })
        .collect();

    let mut skipped_fresh = Vec::new();
    let jobs: Vec<(&str, Vec<TradeRecord>)> = by_wallet
        .into_iter()
        .filter(|(wallet, _)| match &options.freshness {
            Some(filter) if filter.is_fresh(wallet, analysis_date) => {
                skipped_fresh.push(wallet.to_string());
                false
            }
            _ => true,
        })
        .collect();

    let workers = options.workers.max(1).min(jobs.len().max(1));
    info!(
        chain = %batch.chain,
        wallets = jobs.len(),
        skipped = skipped_fresh.len(),
        workers,
        "Starting batch analysis"
    );

    let ctx = RunContext {
        chain: &batch.chain,
        config,
        options,
        analysis_date,
        activity: batch.activity.iter().map(|a| (a.wallet.as_str(), a)).collect(),
        sells: batch.sells.iter().map(|s| (s.wallet.as_str(), s)).collect(),
        clusters: batch.clusters.iter().map(|c| (c.wallet.as_str(), c)).collect(),
    };

    let next = AtomicUsize::new(0);
    let (next, jobs_ref, ctx) = (&next, &jobs, &ctx);
    let mut results: Vec<(usize, EngineResult<WalletAnalysis>)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(move || {
                    let mut local = Vec::new();
                    loop {
                        let i = next.fetch_add(1, Ordering::Relaxed);
                        let Some((wallet, trades)) = jobs_ref.get(i) else {
                            break;
                        };
                        local.push((i, ctx.analyse(wallet, trades)));
                    }
                    local
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|h| match h.join() {
                Ok(local) => local,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    });
    results.sort_by_key(|(i, _)| *i);

    let mut analyses = Vec::with_capacity(results.len());
    for (i, result) in results {
        let wallet = jobs[i].0;
        match result {
            Ok(analysis) => analyses.push(analysis),
            Err(EngineError::MissingData { .. }) => failures.push(WalletFailure {
                wallet: wallet.to_string(),
                chain: batch.chain.clone(),
                kind: FailureKind::MissingData,
                reason: "no usable trades".to_string(),
            }),
            Err(EngineError::InvalidMetrics { reason, .. }) => failures.push(WalletFailure {
                wallet: wallet.to_string(),
                chain: batch.chain.clone(),
                kind: FailureKind::InvalidMetrics,
                reason,
            }),
            Err(e @ EngineError::Configuration(_)) => return Err(e),
        }
    }

    for failure in &failures {
        warn!(
            wallet = %failure.wallet,
            kind = ?failure.kind,
            reason = %failure.reason,
            "Wallet not scored"
        );
    }

    analyses.sort_by(|a, b| {
        b.report
            .final_score()
            .partial_cmp(&a.report.final_score())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.report.wallet.cmp(&b.report.wallet))
    });

    info!(
        chain = %batch.chain,
        scored = analyses.len(),
        failed = failures.len(),
        skipped = skipped_fresh.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Batch analysis complete"
    );

    Ok(BatchOutcome {
        chain: batch.chain.clone(),
        analysis_date,
        analyses,
        failures,
        skipped_fresh,
    })
}
