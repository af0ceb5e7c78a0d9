//! Unstuck CLI - operator tooling for stuck-task recovery
//!
//! Usage:
//!   unstuck init [path]                  Write default .unstuck/config.toml
//!   unstuck analyze <records.jsonl>      Replay iteration records through the detector
//!   unstuck review list                  List tasks parked for review
//!   unstuck review show <task_id>        Print one escalation report
//!   unstuck summarize <frames.json>      Compact memory frames into a digest

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use unstuck_core::config::STATE_DIR;
use unstuck_core::{Frame, IterationRecord, RecoveryConfig};
use unstuck_detect::{Detection, DetectorConfig, StuckDetector};
use unstuck_model::AnthropicModel;
use unstuck_recovery::{offline_digest, FileReviewQueue, ReviewQueue, Summarizer};

#[derive(Parser)]
#[command(name = "unstuck")]
#[command(author, version, about = "Detect and recover stuck autonomous tasks")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Project root (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Replay iteration records (one JSON object per line) through the detector
    Analyze {
        /// JSONL file of iteration records
        records: PathBuf,

        /// Project root holding .unstuck/config.toml
        #[arg(long, value_name = "ROOT", default_value = ".")]
        config: PathBuf,
    },

    /// Human-review queue
    Review {
        #[command(subcommand)]
        action: ReviewCommands,
    },

    /// Compact memory frames into a bounded digest
    Summarize {
        /// JSON array of memory frames
        frames: PathBuf,

        /// Use the deterministic digest instead of the compression model
        #[arg(long)]
        offline: bool,

        /// Project root holding .unstuck/config.toml
        #[arg(long, value_name = "ROOT", default_value = ".")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum ReviewCommands {
    /// List parked escalation reports
    List {
        /// Review directory (defaults to review_dir from config)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Show one escalation report
    Show {
        task_id: String,

        /// Review directory (defaults to review_dir from config)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Print the raw JSON report
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG overrides --verbose
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { path } => cmd_init(&path),
        Commands::Analyze { records, config } => cmd_analyze(&records, &config),
        Commands::Review { action } => cmd_review(action).await,
        Commands::Summarize {
            frames,
            offline,
            config,
        } => cmd_summarize(&frames, offline, &config).await,
    }
}

fn cmd_init(path: &Path) -> Result<()> {
    info!("Initializing Unstuck in {:?}", path);

    let config_path = path.join(STATE_DIR).join("config.toml");
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        return Ok(());
    }

    let written = RecoveryConfig::write_default(path).context("Failed to write default config")?;
    println!("Wrote {}", written.display());
    Ok(())
}

fn cmd_analyze(records_path: &Path, root: &Path) -> Result<()> {
    let config = RecoveryConfig::load_or_default(root).context("Failed to load config")?;
    let content = std::fs::read_to_string(records_path)
        .with_context(|| format!("Failed to read {}", records_path.display()))?;

    let records = parse_records(&content)?;
    let lines = analyze_records(records, DetectorConfig::from(&config));

    if lines.is_empty() {
        println!("No stuck patterns detected");
    }
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

fn parse_records(content: &str) -> Result<Vec<IterationRecord>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Invalid iteration record on line {}", index + 1))
        })
        .collect()
}

/// One report line per signal or ambiguity, per task
///
/// Each task gets its own detector. A signal clears that task's window, as
/// a remediation would during a live run.
fn analyze_records(records: Vec<IterationRecord>, config: DetectorConfig) -> Vec<String> {
    let mut detectors: HashMap<String, (StuckDetector, usize)> = HashMap::new();
    let mut lines = Vec::new();

    for record in records {
        let task_id = record.task_id().to_string();
        let (detector, seen) = detectors
            .entry(task_id.clone())
            .or_insert_with(|| (StuckDetector::new(task_id.clone(), config.clone()), 0));
        *seen += 1;

        match detector.observe(record) {
            Detection::Stuck { signal } => {
                lines.push(format!("{} #{}: {}", task_id, seen, signal));
                detector.reset();
            }
            Detection::Ambiguous { near_misses } => {
                let details: Vec<String> = near_misses
                    .iter()
                    .map(|m| format!("{} ({})", m.pattern, m.detail))
                    .collect();
                lines.push(format!("{} #{}: ambiguous: {}", task_id, seen, details.join("; ")));
            }
            Detection::Clear | Detection::Insufficient { .. } => {}
        }
    }

    lines
}

async fn cmd_review(action: ReviewCommands) -> Result<()> {
    match action {
        ReviewCommands::List { dir } => {
            let queue = review_queue(dir)?;
            let reports = queue.list().await.context("Failed to read review queue")?;

            if reports.is_empty() {
                println!("No tasks awaiting review in {}", queue.dir().display());
                return Ok(());
            }

            println!("Tasks awaiting review:\n");
            for report in reports {
                println!(
                    "  {} - {} [{}] ({} iterations, {})",
                    report.task.id,
                    report.task.title,
                    report.reason,
                    report.iterations,
                    report.escalated_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        ReviewCommands::Show { task_id, dir, json } => {
            let queue = review_queue(dir)?;
            let report = queue
                .load(&task_id)
                .await
                .with_context(|| format!("No review report for {}", task_id))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.to_markdown());
            }
        }
    }
    Ok(())
}

fn review_queue(dir: Option<PathBuf>) -> Result<FileReviewQueue> {
    let dir = match dir {
        Some(dir) => dir,
        None => {
            RecoveryConfig::load_or_default(Path::new("."))
                .context("Failed to load config")?
                .review_dir
        }
    };
    Ok(FileReviewQueue::new(dir))
}

async fn cmd_summarize(frames_path: &Path, offline: bool, root: &Path) -> Result<()> {
    let config = RecoveryConfig::load_or_default(root).context("Failed to load config")?;
    let content = std::fs::read_to_string(frames_path)
        .with_context(|| format!("Failed to read {}", frames_path.display()))?;
    let frames: Vec<Frame> =
        serde_json::from_str(&content).context("Failed to parse memory frames JSON")?;

    let digest = if offline {
        offline_digest(&frames, config.max_summary_tokens)
    } else {
        let model = AnthropicModel::from_config(&config.models, &config.models.compression)
            .context("Failed to create compression model")?;
        Summarizer::new(Arc::new(model), config.max_summary_tokens)
            .summarize(&frames)
            .await
    };

    println!("{}", digest);
    Ok(())
}
