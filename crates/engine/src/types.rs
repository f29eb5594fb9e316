//! Data model for the detection & scoring engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

/// A single on-chain trade, as produced by the ingestion layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub wallet: String,
    pub chain: String,
    pub token_address: String,
    pub action: TradeAction,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    pub block_number: u64,
    pub tx_hash: String,
    /// Position of this wallet's purchase among all buyers of the token, from 1.
    /// Signed so a malformed rank fails only its own wallet.
    #[serde(default)]
    pub buy_rank: Option<i64>,
    #[serde(default)]
    pub launch_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub launch_block: Option<u64>,
    #[serde(default)]
    pub is_same_block_buy: bool,
}

/// Total trading breadth of a wallet, independent of the tokens of interest.
/// Counts are signed on the wire; negatives are rejected per wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDensity {
    pub wallet: String,
    pub total_unique_tokens: i64,
    pub total_tx_count: i64,
    pub activity_span_days: f64,
}

/// Exit behaviour of a wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellBehavior {
    pub wallet: String,
    /// Sells that liquidated at least half of the position held at the time
    pub strategic_exit_count: i64,
    pub avg_hold_time_hours: f64,
    /// Mean share of the position sold per sell, in percent (0-100)
    pub avg_sell_percentage: f64,
}

/// Output of the wallet-graph clustering collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub wallet: String,
    pub cluster_id: String,
    pub cluster_size: i64,
}

/// Master-store key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalletKey {
    pub wallet: String,
    pub chain: String,
}

impl WalletKey {
    pub fn new(wallet: impl Into<String>, chain: impl Into<String>) -> Self {
        Self {
            wallet: wallet.into(),
            chain: chain.into(),
        }
    }
}

impl fmt::Display for WalletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.wallet, self.chain)
    }
}

/// Per-wallet aggregates, recomputed fresh on every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletMetrics {
    pub wallet: String,
    pub chain: String,
    pub total_trades: u32,
    pub buy_count: u32,
    pub sell_count: u32,
    /// Distinct tokens in the supplied trade set
    pub unique_tokens_traded: u32,
    pub first_trade_at: DateTime<Utc>,
    pub last_trade_at: DateTime<Utc>,
    /// Days between first and last observed trade
    pub wallet_age_days: f64,
    pub early_hit_count: u32,
    pub early_buy_tokens: Vec<String>,
    pub avg_buy_rank: Option<f64>,
    pub median_buy_rank: Option<f64>,
    pub best_buy_rank: Option<u32>,
    pub same_block_buy_count: u32,
    pub fastest_entry_seconds: Option<f64>,
    pub avg_entry_delay_seconds: Option<f64>,
    /// From ActivityDensity; None when no density row was supplied
    pub total_unique_tokens: Option<u64>,
    pub total_tx_count: Option<u64>,
    pub activity_span_days: Option<f64>,
    /// early_hit_count / total_unique_tokens; None when breadth is unknown or zero
    pub precision_rate: Option<f64>,
    pub sell_behavior: Option<SellBehavior>,
}

/// The five suspicious patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternName {
    ConsistentEarlyBuyer,
    LiquiditySniper,
    FreshWalletAlpha,
    WalletCluster,
    StrategicDumper,
}

impl PatternName {
    pub const ALL: [PatternName; 5] = [
        Self::ConsistentEarlyBuyer,
        Self::LiquiditySniper,
        Self::FreshWalletAlpha,
        Self::WalletCluster,
        Self::StrategicDumper,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConsistentEarlyBuyer => "CONSISTENT_EARLY_BUYER",
            Self::LiquiditySniper => "LIQUIDITY_SNIPER",
            Self::FreshWalletAlpha => "FRESH_WALLET_ALPHA",
            Self::WalletCluster => "WALLET_CLUSTER",
            Self::StrategicDumper => "STRATEGIC_DUMPER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == s)
    }
}

impl fmt::Display for PatternName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected pattern. Severity is always within 1..=5.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub name: PatternName,
    pub severity: u8,
    pub description: String,
}

/// Score tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreTier {
    HighPriority,
    Watchlist,
    Moderate,
    Low,
    Minimal,
}

impl ScoreTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighPriority => "HIGH_PRIORITY",
            Self::Watchlist => "WATCHLIST",
            Self::Moderate => "MODERATE",
            Self::Low => "LOW",
            Self::Minimal => "MINIMAL",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::HighPriority => "High Priority Whale",
            Self::Watchlist => "Watchlist",
            Self::Moderate => "Moderate Interest",
            Self::Low => "Low Interest",
            Self::Minimal => "Minimal Interest",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            Self::HighPriority,
            Self::Watchlist,
            Self::Moderate,
            Self::Low,
            Self::Minimal,
        ]
        .into_iter()
        .find(|t| t.as_str() == s)
    }
}

impl fmt::Display for ScoreTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Component breakdown of a whale score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// 0-50
    pub early_hit_score: f64,
    /// 0-30
    pub buy_rank_score: f64,
    /// 0-20
    pub pattern_score: f64,
    /// Sum of the three components, 0-100
    pub base_score: f64,
    /// One of the configured band multipliers, or 1.0
    pub precision_penalty: f64,
    pub final_score: f64,
    pub tier: ScoreTier,
}

/// The persisted result of analysing one wallet on one chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletReport {
    pub wallet: String,
    pub chain: String,
    pub metrics: WalletMetrics,
    pub patterns: Vec<PatternName>,
    pub score: ScoreBreakdown,
    pub analysis_date: DateTime<Utc>,
    #[serde(default)]
    pub cluster_size: Option<u32>,
}

impl WalletReport {
    pub fn key(&self) -> WalletKey {
        WalletKey::new(self.wallet.clone(), self.chain.clone())
    }

    pub fn final_score(&self) -> f64 {
        self.score.final_score
    }

    /// True when `self` should replace `current` in the master store:
    /// strictly higher final score, or an equal score analysed later.
    pub fn supersedes(&self, current: &WalletReport) -> bool {
        self.score.final_score > current.score.final_score
            || (self.score.final_score == current.score.final_score
                && self.analysis_date > current.analysis_date)
    }
}
