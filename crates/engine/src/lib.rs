//! Whale Hunter Engine — insider-trading detection and scoring
//!
//! Provides:
//! - Per-wallet metrics from raw trades (early hits, buy rank, precision)
//! - Rule-table pattern detection (five suspicious behaviours)
//! - Composite 0-100 whale score with precision penalty and tiers
//! - Keep-max master set and watchlist projection
//! - Parallel batch pipeline and SQLite-backed orchestrator

pub mod aggregator;
pub mod analyzer;
pub mod config;
pub mod error;
pub mod metrics;
pub mod patterns;
pub mod pipeline;
pub mod report;
pub mod scorer;
pub mod types;

// Re-exports for convenience
pub use aggregator::{MergeOutcome, MergeSummary, ReportAggregator};
pub use analyzer::{analyze_and_persist, load_master, record_to_report, report_to_record, RunSummary};
pub use config::{DetectionConfig, PenaltyBand, ScoreTiers};
pub use error::{EngineError, EngineResult};
pub use metrics::{compute_metrics, derive_sell_behavior, sniping_profile, SnipingProfile};
pub use patterns::{
    detect_patterns, filter_by_severity, is_likely_insider, summarize, PatternRule, PatternSummary,
    RULES,
};
pub use pipeline::{
    run_batch, AnalysisBatch, BatchOutcome, FailureKind, FreshnessFilter, PipelineOptions,
    WalletAnalysis, WalletFailure,
};
pub use report::{render_pattern_report, render_wallet_report};
pub use scorer::{
    rank_wallets, score_wallet, should_add_to_watchlist, should_send_alert, tier_for,
    validate_metrics,
};
pub use types::*;
