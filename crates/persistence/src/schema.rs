//! Database schema definitions

/// SQL to create all tables
/// NOTE: timestamps are unix seconds (INTEGER); scores are REAL in [0, 100]
pub const CREATE_TABLES: &str = r#"
-- Master wallet report store: one surviving row per (wallet, chain)
CREATE TABLE IF NOT EXISTS wallet_reports (
    wallet TEXT NOT NULL,
    chain TEXT NOT NULL,
    final_score REAL NOT NULL DEFAULT 0,
    base_score REAL NOT NULL DEFAULT 0,
    early_hit_score REAL NOT NULL DEFAULT 0,
    buy_rank_score REAL NOT NULL DEFAULT 0,
    pattern_score REAL NOT NULL DEFAULT 0,
    precision_penalty REAL NOT NULL DEFAULT 1,
    tier TEXT NOT NULL,
    early_hit_count INTEGER NOT NULL DEFAULT 0,
    avg_buy_rank REAL,
    best_buy_rank INTEGER,
    same_block_buy_count INTEGER NOT NULL DEFAULT 0,
    wallet_age_days REAL NOT NULL DEFAULT 0,
    precision_rate REAL,
    total_unique_tokens INTEGER,
    patterns TEXT NOT NULL DEFAULT '',
    metrics_json TEXT,
    analysis_date INTEGER NOT NULL,
    updated_at INTEGER DEFAULT (strftime('%s', 'now')),
    PRIMARY KEY (wallet, chain)
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_reports_score ON wallet_reports(final_score DESC);
CREATE INDEX IF NOT EXISTS idx_reports_chain_date ON wallet_reports(chain, analysis_date)
"#;

/// Column additions applied after table creation.
/// "duplicate column name" failures are tolerated so these are safe to re-run.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE wallet_reports ADD COLUMN strategic_exit_count INTEGER",
    "ALTER TABLE wallet_reports ADD COLUMN cluster_size INTEGER",
];
