use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod dashboard;
mod db;
mod error;
mod interventions;
mod models;
mod pre_assessment;
mod progress;
mod reading_level;
mod report;
mod snapshot;

use crate::models::{Collections, DocumentId};
use crate::snapshot::Snapshot;

#[derive(Parser)]
#[command(name = "reading-dashboard")]
#[command(about = "Teacher dashboard aggregation for reading assessments", long_about = None)]
struct Cli {
    /// Maximum Postgres connections in the pool
    #[arg(long, global = true, default_value_t = 5)]
    max_connections: u32,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import students from a CSV file
    ImportStudents {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Import a JSON array of documents into a collection
    Import {
        #[arg(long, value_enum)]
        collection: db::Collection,
        #[arg(long)]
        json: PathBuf,
    },
    /// Build the dashboard payload as JSON
    Dashboard {
        /// Read collections from a JSON snapshot instead of the database
        #[arg(long)]
        snapshot: Option<PathBuf>,
        #[arg(long)]
        section: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Score a student's pre-assessment response
    ScorePreAssessment {
        #[arg(long)]
        student_id: String,
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        snapshot: Option<PathBuf>,
        #[arg(long)]
        section: Option<String>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|value| matches!(value.trim(), "1" | "true" | "TRUE" | "yes"))
        .unwrap_or(false)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if env_flag("DASHBOARD_LOG_JSON") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn connect(max_connections: u32) -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

async fn load_collections(
    snapshot: Option<&Path>,
    section: Option<&str>,
    max_connections: u32,
) -> anyhow::Result<Collections> {
    let collections = match snapshot {
        Some(path) => {
            Snapshot::from_path(path)
                .with_context(|| format!("failed to read snapshot {}", path.display()))?
                .collections
        }
        None => {
            let pool = connect(max_connections).await?;
            db::fetch_collections(&pool)
                .await
                .context("failed to load dashboard collections")?
        }
    };

    Ok(match section {
        Some(section) => dashboard::scope_to_section(&collections, section),
        None => collections,
    })
}

async fn score_pre_assessment(
    student_id: &DocumentId,
    snapshot: Option<&Path>,
    max_connections: u32,
) -> anyhow::Result<pre_assessment::PreAssessmentResult> {
    if let Some(path) = snapshot {
        let snapshot = Snapshot::from_path(path)
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        return Ok(pre_assessment::score_for_student(
            student_id,
            &snapshot.responses,
            &snapshot.pre_assessments,
            &snapshot.collections.students,
        )?);
    }

    let pool = connect(max_connections).await?;
    let responses = db::fetch_pre_assessment_responses(&pool, student_id).await?;
    let response = pre_assessment::latest_response_for(student_id, &responses)?;
    let assessments = db::fetch_pre_assessment(&pool, &response.assessment_id).await?;
    let assessment = pre_assessment::definition_for(response, &assessments)?;
    let student = db::fetch_student(&pool, student_id).await?;

    info!(
        student_id = %student_id,
        assessment = assessment.title.as_deref().unwrap_or(assessment.id.as_str()),
        language = assessment.language.as_deref().unwrap_or("unspecified"),
        "scoring pre-assessment"
    );
    Ok(pre_assessment::score_pre_assessment(
        response,
        assessment,
        student.as_ref(),
    ))
}

fn emit(json: &str, out: Option<&Path>) -> anyhow::Result<()> {
    match out {
        Some(path) => {
            std::fs::write(path, json)?;
            info!(path = %path.display(), "payload written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let max_connections = cli.max_connections;

    match cli.command {
        Commands::InitDb => {
            let pool = connect(max_connections).await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect(max_connections).await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportStudents { csv } => {
            let pool = connect(max_connections).await?;
            let inserted = db::import_students_csv(&pool, &csv).await?;
            println!("Imported {inserted} students from {}.", csv.display());
        }
        Commands::Import { collection, json } => {
            let pool = connect(max_connections).await?;
            let inserted = db::import_documents(&pool, collection, &json).await?;
            println!(
                "Imported {inserted} documents into {} from {}.",
                collection.table(),
                json.display()
            );
        }
        Commands::Dashboard {
            snapshot,
            section,
            out,
        } => {
            let collections =
                load_collections(snapshot.as_deref(), section.as_deref(), max_connections).await?;
            let payload = dashboard::build_dashboard(&collections, Utc::now());
            let json = serde_json::to_string_pretty(&payload)?;
            emit(&json, out.as_deref())?;
        }
        Commands::ScorePreAssessment {
            student_id,
            snapshot,
        } => {
            let student_id = DocumentId::new(student_id);
            let result = score_pre_assessment(&student_id, snapshot.as_deref(), max_connections)
                .await?;
            let json = serde_json::to_string_pretty(&result)?;
            emit(&json, None)?;
        }
        Commands::Report {
            snapshot,
            section,
            out,
        } => {
            let collections =
                load_collections(snapshot.as_deref(), section.as_deref(), max_connections).await?;
            let now = Utc::now();
            let payload = dashboard::build_dashboard(&collections, now);
            let report = report::build_report(&payload, now);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
