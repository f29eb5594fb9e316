//! Whale Hunter — insider wallet detection
//!
//! Usage:
//!   whale-hunter analyze --input batch.json   — Score a batch and merge it into the master set
//!   whale-hunter watchlist --threshold 60     — Wallets at or above the watchlist score
//!   whale-hunter top --limit 20               — Best scored wallets
//!   whale-hunter serve --port 3001            — Launch the JSON API

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use engine::{
    analyze_and_persist, load_master, render_wallet_report, should_send_alert, AnalysisBatch,
    DetectionConfig, PipelineOptions, ReportAggregator, RunSummary, WalletKey, WalletReport,
};
use persistence::repository::{ReportRepository, WalletReportRecord};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_DB_PATH: &str = "data/whales.db";

#[derive(Parser)]
#[command(name = "whale-hunter")]
#[command(about = "Insider wallet detection and scoring", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON detection config (missing fields use defaults)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a batch of trades and merge it into the master set
    Analyze {
        /// AnalysisBatch JSON file
        #[arg(short, long)]
        input: String,
        /// Worker threads (default: available cores)
        #[arg(long)]
        workers: Option<usize>,
        /// Rebuild sell behaviour from trades when none is supplied
        #[arg(long)]
        derive_sells: bool,
        /// Skip wallets analysed within the last H hours
        #[arg(long)]
        skip_fresh_hours: Option<i64>,
        /// Optional JSON export path
        #[arg(long)]
        export: Option<String>,
    },
    /// Show wallets at or above the watchlist threshold
    Watchlist {
        /// Score threshold (default: configured watchlist threshold)
        #[arg(long)]
        threshold: Option<f64>,
        /// Optional JSON export path
        #[arg(long)]
        export: Option<String>,
    },
    /// Show the best scored wallets
    Top {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Launch the JSON API server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
    },
}

#[derive(Clone)]
struct AppState {
    db: Arc<persistence::Database>,
    master: Arc<ReportAggregator>,
    config: Arc<DetectionConfig>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,persistence=debug,whale_hunter=debug")
    } else {
        EnvFilter::new("info,engine=info,persistence=info,whale_hunter=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze {
            input,
            workers,
            derive_sells,
            skip_fresh_hours,
            export,
        } => {
            cmd_analyze(config, input, workers, derive_sells, skip_fresh_hours, export).await?;
        }
        Commands::Watchlist { threshold, export } => {
            cmd_watchlist(threshold.unwrap_or(config.watchlist_threshold), export).await?;
        }
        Commands::Top { limit } => {
            cmd_top(limit).await?;
        }
        Commands::Serve { host, port } => {
            cmd_serve(config, &host, port).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Configuration
// ============================================================================

/// Defaults, then the JSON file, then environment overrides; validated last.
fn load_config(path: Option<&str>) -> anyhow::Result<DetectionConfig> {
    load_config_with(path, |key| std::env::var(key).ok())
}

fn load_config_with(
    path: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<DetectionConfig> {
    let mut config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| anyhow::anyhow!("Cannot read config {}: {}", path, e))?;
            serde_json::from_str(&raw)
                .map_err(|e| anyhow::anyhow!("Invalid config {}: {}", path, e))?
        }
        None => DetectionConfig::default(),
    };

    if let Some(v) = env_parse::<f64>(&env, "WHALE_WATCHLIST_THRESHOLD")? {
        config.watchlist_threshold = v;
    }
    if let Some(v) = env_parse::<f64>(&env, "WHALE_ALERT_THRESHOLD")? {
        config.alert_threshold = v;
    }
    if let Some(v) = env_parse::<u32>(&env, "WHALE_FIRST_N_BUYERS")? {
        config.first_n_buyers = v;
    }

    config.validate()?;
    Ok(config)
}

fn env_parse<T: std::str::FromStr>(
    env: impl Fn(&str) -> Option<String>,
    key: &str,
) -> anyhow::Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has an invalid value {:?}: {}", key, raw, e)),
        None => Ok(None),
    }
}

fn db_path() -> String {
    std::env::var("WHALE_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string())
}

async fn open_db() -> anyhow::Result<(persistence::Database, String)> {
    let path = db_path();
    let db = persistence::Database::new(&path)
        .await
        .map_err(|e| anyhow::anyhow!("Database initialization failed: {}", e))?;
    Ok((db, path))
}

// ============================================================================
// Analyze command
// ============================================================================

async fn cmd_analyze(
    config: DetectionConfig,
    input: String,
    workers: Option<usize>,
    derive_sells: bool,
    skip_fresh_hours: Option<i64>,
    export: Option<String>,
) -> anyhow::Result<()> {
    println!("\n=== Whale Hunter v{} ===", APP_VERSION);

    let raw = std::fs::read_to_string(&input)
        .map_err(|e| anyhow::anyhow!("Cannot read batch {}: {}", input, e))?;
    let batch: AnalysisBatch = serde_json::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Invalid batch {}: {}", input, e))?;

    let (db, path) = open_db().await?;
    let master = load_master(db.pool()).await?;
    println!("Database: {} ({} wallets in master set)", path, master.len());
    println!(
        "Chain: {} | Trades: {} | Density rows: {} | Clusters: {}",
        batch.chain,
        batch.trades.len(),
        batch.activity.len(),
        batch.clusters.len()
    );
    println!();

    let mut options = PipelineOptions {
        derive_sell_behavior: derive_sells,
        ..PipelineOptions::default()
    };
    if let Some(workers) = workers {
        options.workers = workers;
    }
    let skip_fresh = skip_fresh_hours.map(chrono::Duration::hours);

    let summary =
        analyze_and_persist(batch, &config, options, skip_fresh, &master, Some(db.pool())).await?;

    print_run(&summary, &config);

    if let Some(export_path) = export {
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(&export_path, &json)?;
        println!("\nResults exported to {}", export_path);
    }

    Ok(())
}

fn print_run(summary: &RunSummary, config: &DetectionConfig) {
    let outcome = &summary.outcome;

    println!("Scored {} wallets:", outcome.analyses.len());
    println!(
        "  {:>3}  {:<44} {:>7} {:<14} {:>5} {:>7}  {}",
        "#", "Wallet", "Score", "Tier", "Hits", "AvgRank", "Patterns"
    );
    println!("  {}", "-".repeat(110));
    for (i, a) in outcome.analyses.iter().enumerate() {
        let r = &a.report;
        let alert = if should_send_alert(r.final_score(), config) { "!" } else { " " };
        println!(
            "{} {:>3}  {:<44} {:>7.1} {:<14} {:>5} {:>7}  {}",
            alert,
            i + 1,
            r.wallet,
            r.final_score(),
            r.score.tier.as_str(),
            r.metrics.early_hit_count,
            r.metrics
                .avg_buy_rank
                .map(|v| format!("{:.1}", v))
                .unwrap_or_else(|| "-".to_string()),
            r.patterns
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    if !outcome.failures.is_empty() {
        println!("\nNot scored ({}):", outcome.failures.len());
        for f in &outcome.failures {
            println!("  {:<44} {:?}: {}", f.wallet, f.kind, f.reason);
        }
    }
    if !outcome.skipped_fresh.is_empty() {
        println!("\nSkipped (recently analysed): {}", outcome.skipped_fresh.len());
    }

    println!(
        "\nMaster set: {} inserted, {} replaced, {} unchanged ({} rows written)",
        summary.merge.inserted, summary.merge.replaced, summary.merge.unchanged, summary.persisted
    );

    for a in outcome.analyses.iter().take(3) {
        println!();
        print!("{}", render_wallet_report(&a.report, &a.matches));
    }
}

// ============================================================================
// Watchlist / Top commands
// ============================================================================

async fn cmd_watchlist(threshold: f64, export: Option<String>) -> anyhow::Result<()> {
    let (db, _) = open_db().await?;
    let records = ReportRepository::new(db.pool()).watchlist(threshold).await?;

    println!("\nWatchlist (score >= {:.1}): {} wallets", threshold, records.len());
    print_records(&records);

    if let Some(export_path) = export {
        let json = serde_json::to_string_pretty(&records)?;
        std::fs::write(&export_path, &json)?;
        println!("\nWatchlist exported to {}", export_path);
    }
    Ok(())
}

async fn cmd_top(limit: u32) -> anyhow::Result<()> {
    let (db, _) = open_db().await?;
    let repo = ReportRepository::new(db.pool());
    let total = repo.count().await?;
    let records = repo.top(limit).await?;

    println!("\nTop {} of {} wallets:", records.len(), total);
    print_records(&records);
    Ok(())
}

fn print_records(records: &[WalletReportRecord]) {
    println!(
        "  {:>3}  {:<44} {:<10} {:>7} {:<14} {:<12}  {}",
        "#", "Wallet", "Chain", "Score", "Tier", "Analysed", "Patterns"
    );
    println!("  {}", "-".repeat(115));
    for (i, r) in records.iter().enumerate() {
        let date = chrono::DateTime::<chrono::Utc>::from_timestamp(r.analysis_date, 0)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        println!(
            "  {:>3}  {:<44} {:<10} {:>7.1} {:<14} {:<12}  {}",
            i + 1,
            r.wallet,
            r.chain,
            r.final_score,
            r.tier,
            date,
            r.patterns
        );
    }
}

// ============================================================================
// Serve command — Axum web server
// ============================================================================

async fn cmd_serve(config: DetectionConfig, host: &str, port: u16) -> anyhow::Result<()> {
    info!("Whale Hunter v{} starting...", APP_VERSION);

    let (db, path) = open_db().await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        e
    })?;
    info!("Database initialized: {}", path);
    let master = load_master(db.pool()).await?;

    let state = AppState {
        db: Arc::new(db),
        master: Arc::new(master),
        config: Arc::new(config),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/watchlist", get(api_watchlist))
        .route("/wallets/top", get(api_top_wallets))
        .route("/wallets/:chain/:wallet", get(api_wallet))
        .route("/analyze", post(api_analyze))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Whale Hunter v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health                  - Health check");
    println!("  GET  /api/watchlist?threshold=    - Wallets at or above threshold");
    println!("  GET  /api/wallets/top?limit=      - Best scored wallets");
    println!("  GET  /api/wallets/:chain/:wallet  - One wallet report");
    println!("  POST /api/analyze                 - Score and merge a batch");
    println!("\n  Database: {}", path);
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// GET /api/health
async fn api_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "whale-hunter",
        "version": APP_VERSION,
        "wallets": state.master.len(),
    }))
}

#[derive(Deserialize)]
struct WatchlistQuery {
    threshold: Option<f64>,
}

/// GET /api/watchlist — master records at or above the threshold
async fn api_watchlist(
    State(state): State<AppState>,
    Query(query): Query<WatchlistQuery>,
) -> Json<serde_json::Value> {
    let threshold = query.threshold.unwrap_or(state.config.watchlist_threshold);
    let wallets = state.master.watchlist(threshold);
    Json(serde_json::json!({
        "threshold": threshold,
        "count": wallets.len(),
        "wallets": wallets,
    }))
}

#[derive(Deserialize)]
struct TopQuery {
    limit: Option<usize>,
}

/// GET /api/wallets/top
async fn api_top_wallets(
    State(state): State<AppState>,
    Query(query): Query<TopQuery>,
) -> Json<serde_json::Value> {
    let wallets = state.master.top(query.limit.unwrap_or(20).min(500));
    Json(serde_json::json!({
        "count": wallets.len(),
        "wallets": wallets,
    }))
}

/// GET /api/wallets/:chain/:wallet
async fn api_wallet(
    State(state): State<AppState>,
    Path((chain, wallet)): Path<(String, String)>,
) -> Result<Json<WalletReport>, StatusCode> {
    state
        .master
        .get(&WalletKey::new(wallet, chain))
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// POST /api/analyze — score a batch and merge it into the master set
async fn api_analyze(
    State(state): State<AppState>,
    Json(batch): Json<AnalysisBatch>,
) -> Json<serde_json::Value> {
    info!(
        chain = %batch.chain,
        trades = batch.trades.len(),
        "Analysis requested via API"
    );

    match analyze_and_persist(
        batch,
        &state.config,
        PipelineOptions::default(),
        None,
        &state.master,
        Some(state.db.pool()),
    )
    .await
    {
        Ok(summary) => Json(serde_json::json!({
            "success": true,
            "summary": summary,
        })),
        Err(e) => {
            warn!("Analysis failed: {:#}", e);
            Json(serde_json::json!({
                "success": false,
                "error": e.to_string(),
            }))
        }
    }
}
