use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod aggregator;
mod config;
mod counseling;
mod db;
mod error;
mod http;
#[cfg(test)]
mod memory;
mod models;
mod report;
mod responder;
mod risk;
mod store;

use aggregator::Aggregator;
use config::ScoringArgs;
use store::ProgressStore;

#[derive(Parser)]
#[command(name = "student-progress")]
#[command(about = "Attendance and assessment risk tracking for schools", long_about = None)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 5)]
    max_connections: u32,
    #[command(flatten)]
    scoring: ScoringArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import assessment marks from a CSV file
    ImportMarks {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Record attendance from a CSV file and refresh progress
    ImportAttendance {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        recorded_by: String,
    },
    /// Compute and store a progress snapshot for one student
    Score {
        #[arg(long)]
        student: String,
        #[arg(long)]
        window_days: Option<i64>,
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Show stored snapshots, most recent first
    History {
        #[arg(long)]
        student: String,
        #[arg(long, default_value_t = 30)]
        limit: usize,
    },
    /// Ask the rule-based assistant a question on behalf of a student
    Ask {
        #[arg(long)]
        student: String,
        #[arg(long)]
        question: String,
    },
    /// Generate a markdown risk report for a school
    Report {
        #[arg(long)]
        school: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Serve the JSON API
    Serve {
        #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
        bind: String,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();
    let scoring = cli.scoring.scoring().context("invalid scoring configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(cli.max_connections)
        .connect(&cli.database_url)
        .await
        .context("failed to connect to Postgres")?;

    let store: Arc<dyn ProgressStore> = Arc::new(db::PgStore::new(pool.clone()));
    let aggregator = Aggregator::new(store.clone(), scoring, cli.scoring.storage_retries);

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportMarks { csv } => {
            let inserted = db::import_marks_csv(&pool, &csv).await?;
            println!("Inserted {inserted} marks from {}.", csv.display());
        }
        Commands::ImportAttendance { csv, recorded_by } => {
            let records = db::read_attendance_csv(&csv)?;
            let outcome = aggregator
                .batch_record_attendance(records, &recorded_by)
                .await?;
            println!(
                "Recorded {} attendance rows from {}.",
                outcome.rows_written,
                csv.display()
            );
            for student_id in &outcome.recompute_failures {
                println!("- progress not refreshed for {student_id}");
            }
        }
        Commands::Score {
            student,
            window_days,
            as_of,
        } => {
            let snapshot = aggregator
                .compute_snapshot(
                    &student,
                    window_days.unwrap_or(scoring.window_days),
                    as_of.unwrap_or_else(risk::today),
                )
                .await?;
            println!(
                "{} on {}: score {} ({}), attendance {}%, academics {}%",
                snapshot.student_id,
                snapshot.date_recorded,
                snapshot.overall_score,
                snapshot.risk_level,
                snapshot.attendance_percentage,
                snapshot.academic_performance
            );
        }
        Commands::History { student, limit } => {
            let history = aggregator.snapshot_history(&student, limit).await?;
            if history.is_empty() {
                println!("No snapshots recorded for {student}.");
                return Ok(());
            }
            for snapshot in &history {
                println!(
                    "- {} score {} ({})",
                    snapshot.date_recorded, snapshot.overall_score, snapshot.risk_level
                );
            }
        }
        Commands::Ask { student, question } => {
            let responder = responder::Responder::new(aggregator.clone());
            let reply = responder.answer(&student, &question, None).await?;
            println!("{}", reply.response);
        }
        Commands::Report { school, out } => {
            let roster = store.school_roster(&school).await?;
            let report = report::build_report(&school, risk::today(), &roster);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
        Commands::Serve { bind } => {
            let router = http::build_router(http::AppState::new(aggregator));
            let listener = TcpListener::bind(&bind)
                .await
                .with_context(|| format!("failed to bind {bind}"))?;
            info!(%bind, "serving student progress api");
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await?;
        }
    }

    Ok(())
}
