//! Wallet report repository — master store of scored wallets

use crate::DbResult;
use serde::{Deserialize, Serialize};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments};
use sqlx::{FromRow, SqlitePool};
use std::collections::HashMap;

/// A persisted wallet report (one row per wallet + chain)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct WalletReportRecord {
    pub wallet: String,
    pub chain: String,
    pub final_score: f64,
    pub base_score: f64,
    pub early_hit_score: f64,
    pub buy_rank_score: f64,
    pub pattern_score: f64,
    pub precision_penalty: f64,
    pub tier: String,
    pub early_hit_count: i64,
    pub avg_buy_rank: Option<f64>,
    pub best_buy_rank: Option<i64>,
    pub same_block_buy_count: i64,
    pub wallet_age_days: f64,
    pub precision_rate: Option<f64>,
    pub total_unique_tokens: Option<i64>,
    /// Comma-separated pattern names
    pub patterns: String,
    pub metrics_json: Option<String>,
    /// Unix seconds
    pub analysis_date: i64,
    pub strategic_exit_count: Option<i64>,
    pub cluster_size: Option<i64>,
}

/// Insert, or overwrite only when the incoming row wins: higher final_score,
/// or an equal score with a later analysis_date.
const UPSERT_KEEP_MAX: &str = r#"
    INSERT INTO wallet_reports
        (wallet, chain, final_score, base_score, early_hit_score, buy_rank_score,
         pattern_score, precision_penalty, tier, early_hit_count, avg_buy_rank,
         best_buy_rank, same_block_buy_count, wallet_age_days, precision_rate,
         total_unique_tokens, patterns, metrics_json, analysis_date,
         strategic_exit_count, cluster_size, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
            ?16, ?17, ?18, ?19, ?20, ?21, strftime('%s', 'now'))
    ON CONFLICT(wallet, chain) DO UPDATE SET
        final_score = excluded.final_score,
        base_score = excluded.base_score,
        early_hit_score = excluded.early_hit_score,
        buy_rank_score = excluded.buy_rank_score,
        pattern_score = excluded.pattern_score,
        precision_penalty = excluded.precision_penalty,
        tier = excluded.tier,
        early_hit_count = excluded.early_hit_count,
        avg_buy_rank = excluded.avg_buy_rank,
        best_buy_rank = excluded.best_buy_rank,
        same_block_buy_count = excluded.same_block_buy_count,
        wallet_age_days = excluded.wallet_age_days,
        precision_rate = excluded.precision_rate,
        total_unique_tokens = excluded.total_unique_tokens,
        patterns = excluded.patterns,
        metrics_json = excluded.metrics_json,
        analysis_date = excluded.analysis_date,
        strategic_exit_count = excluded.strategic_exit_count,
        cluster_size = excluded.cluster_size,
        updated_at = strftime('%s', 'now')
    WHERE excluded.final_score > wallet_reports.final_score
       OR (excluded.final_score = wallet_reports.final_score
           AND excluded.analysis_date > wallet_reports.analysis_date)
"#;

fn bind_upsert(record: &WalletReportRecord) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    sqlx::query(UPSERT_KEEP_MAX)
        .bind(&record.wallet)
        .bind(&record.chain)
        .bind(record.final_score)
        .bind(record.base_score)
        .bind(record.early_hit_score)
        .bind(record.buy_rank_score)
        .bind(record.pattern_score)
        .bind(record.precision_penalty)
        .bind(&record.tier)
        .bind(record.early_hit_count)
        .bind(record.avg_buy_rank)
        .bind(record.best_buy_rank)
        .bind(record.same_block_buy_count)
        .bind(record.wallet_age_days)
        .bind(record.precision_rate)
        .bind(record.total_unique_tokens)
        .bind(&record.patterns)
        .bind(&record.metrics_json)
        .bind(record.analysis_date)
        .bind(record.strategic_exit_count)
        .bind(record.cluster_size)
}

/// Repository for the master wallet report store
pub struct ReportRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ReportRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Keep-max upsert of a single report. Returns true when the row was written.
    ///
    /// Comparison and write are one statement, so two writers on the same key
    /// cannot interleave between them.
    pub async fn upsert_keep_max(&self, record: &WalletReportRecord) -> DbResult<bool> {
        let result = bind_upsert(record).execute(self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    /// Keep-max upsert of a whole batch in one transaction.
    /// Returns the number of rows written (inserted or replaced).
    pub async fn upsert_batch(&self, records: &[WalletReportRecord]) -> DbResult<usize> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0usize;
        for record in records {
            let result = bind_upsert(record).execute(&mut *tx).await?;
            if result.rows_affected() > 0 {
                written += 1;
            }
        }
        tx.commit().await?;
        Ok(written)
    }

    /// Fetch the stored report for one key
    pub async fn get(&self, wallet: &str, chain: &str) -> DbResult<Option<WalletReportRecord>> {
        let record = sqlx::query_as::<_, WalletReportRecord>(
            "SELECT * FROM wallet_reports WHERE wallet = ?1 AND chain = ?2",
        )
        .bind(wallet)
        .bind(chain)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    /// All stored reports, best score first
    pub async fn get_all(&self) -> DbResult<Vec<WalletReportRecord>> {
        let records = sqlx::query_as::<_, WalletReportRecord>(
            "SELECT * FROM wallet_reports ORDER BY final_score DESC, analysis_date DESC",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Reports with final_score >= threshold, best score first
    pub async fn watchlist(&self, threshold: f64) -> DbResult<Vec<WalletReportRecord>> {
        let records = sqlx::query_as::<_, WalletReportRecord>(
            r#"SELECT * FROM wallet_reports
               WHERE final_score >= ?1
               ORDER BY final_score DESC, analysis_date DESC"#,
        )
        .bind(threshold)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Top N reports by final_score
    pub async fn top(&self, limit: u32) -> DbResult<Vec<WalletReportRecord>> {
        let records = sqlx::query_as::<_, WalletReportRecord>(
            "SELECT * FROM wallet_reports ORDER BY final_score DESC, analysis_date DESC LIMIT ?1",
        )
        .bind(i64::from(limit))
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    pub async fn count(&self) -> DbResult<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM wallet_reports")
            .fetch_one(self.pool)
            .await?;
        Ok(row.0)
    }

    /// wallet -> analysis_date (unix seconds) of the stored report, for one chain.
    /// Used to skip wallets analysed recently.
    pub async fn last_analysis_dates(&self, chain: &str) -> DbResult<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT wallet, analysis_date FROM wallet_reports WHERE chain = ?1")
                .bind(chain)
                .fetch_all(self.pool)
                .await?;

        Ok(rows.into_iter().collect())
    }
}
