//! Report aggregator — in-memory master store keyed by (wallet, chain)
//!
//! Merges are atomic per key through the map's entry API; merges on disjoint
//! keys proceed in parallel.

use crate::types::{WalletKey, WalletReport};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::cmp::Ordering;
use tracing::debug;

/// What a single merge did to the master store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Replaced,
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
}

impl MergeSummary {
    fn record(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Inserted => self.inserted += 1,
            MergeOutcome::Replaced => self.replaced += 1,
            MergeOutcome::Unchanged => self.unchanged += 1,
        }
    }

    /// Rows that changed the store
    pub fn written(&self) -> usize {
        self.inserted + self.replaced
    }
}

#[derive(Debug, Default)]
pub struct ReportAggregator {
    master: DashMap<WalletKey, WalletReport>,
}

impl ReportAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from previously persisted reports, applying the keep-max rule to
    /// duplicates.
    pub fn from_reports(reports: impl IntoIterator<Item = WalletReport>) -> Self {
        let aggregator = Self::new();
        aggregator.load(reports);
        aggregator
    }

    pub fn load(&self, reports: impl IntoIterator<Item = WalletReport>) {
        for report in reports {
            self.merge(report);
        }
    }

    /// Keep-max merge of one report. The shard lock is held for the whole
    /// compare-and-write.
    pub fn merge(&self, report: WalletReport) -> MergeOutcome {
        match self.master.entry(report.key()) {
            Entry::Vacant(slot) => {
                slot.insert(report);
                MergeOutcome::Inserted
            }
            Entry::Occupied(mut slot) => {
                if report.supersedes(slot.get()) {
                    debug!(
                        key = %slot.key(),
                        old = slot.get().final_score(),
                        new = report.final_score(),
                        "Replacing master record"
                    );
                    slot.insert(report);
                    MergeOutcome::Replaced
                } else {
                    MergeOutcome::Unchanged
                }
            }
        }
    }

    pub fn merge_batch(&self, reports: impl IntoIterator<Item = WalletReport>) -> MergeSummary {
        let mut summary = MergeSummary::default();
        for report in reports {
            summary.record(self.merge(report));
        }
        summary
    }

    pub fn get(&self, key: &WalletKey) -> Option<WalletReport> {
        self.master.get(key).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.master.len()
    }

    pub fn is_empty(&self) -> bool {
        self.master.is_empty()
    }

    /// Every master record with final_score >= threshold, best first.
    /// Recomputed from the store on each call.
    pub fn watchlist(&self, threshold: f64) -> Vec<WalletReport> {
        let mut reports: Vec<WalletReport> = self
            .master
            .iter()
            .filter(|r| r.final_score() >= threshold)
            .map(|r| r.value().clone())
            .collect();
        reports.sort_by(by_score_desc);
        reports
    }

    pub fn top(&self, limit: usize) -> Vec<WalletReport> {
        let mut reports = self.snapshot();
        reports.truncate(limit);
        reports
    }

    /// All master records, best first
    pub fn snapshot(&self) -> Vec<WalletReport> {
        let mut reports: Vec<WalletReport> =
            self.master.iter().map(|r| r.value().clone()).collect();
        reports.sort_by(by_score_desc);
        reports
    }
}

fn by_score_desc(a: &WalletReport, b: &WalletReport) -> Ordering {
    b.final_score()
        .partial_cmp(&a.final_score())
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.analysis_date.cmp(&a.analysis_date))
        .then_with(|| a.key().cmp(&b.key()))
}
