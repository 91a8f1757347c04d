use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recollect::config::Config;
use recollect::models::FeedbackRequest;
use recollect::services::{format_report, parse_transcript, AdaptiveLearningSystem, MemorySession};

#[derive(Parser)]
#[command(name = "recollect")]
#[command(about = "Decide what to remember from a conversation, and for how long")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a transcript of `Speaker: text` lines
    Analyze {
        file: PathBuf,
        #[arg(long, default_value = "default")]
        user: String,
        /// Print the full analysis as JSON instead of the report
        #[arg(long)]
        json: bool,
    },
    /// Record a correction for one statement
    Feedback {
        #[arg(long)]
        user: String,
        #[arg(long)]
        statement: String,
        /// Tier the system predicted (long_term, short_term, immediate)
        #[arg(long)]
        predicted: String,
        /// Tier it should have been
        #[arg(long)]
        expected: String,
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,
        #[arg(long, default_value_t = 0.0)]
        score: f64,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Print learning statistics for a user as JSON
    Stats {
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env();

    match args.command {
        Command::Analyze { file, user, json } => {
            let transcript = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read transcript {}", file.display()))?;
            let turns = parse_transcript(&transcript);
            tracing::info!(turns = turns.len(), file = %file.display(), "Parsed transcript");

            let cancel_token = CancellationToken::new();
            let token = cancel_token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, abandoning pending enhancement calls");
                    token.cancel();
                }
            });

            let mut session = MemorySession::from_config(user, &config)
                .await?
                .with_cancellation(cancel_token);
            let analysis = session.analyze_conversation(&turns).await;

            if json {
                let output = serde_json::json!({
                    "analysis": analysis,
                    "summary": session.memory_summary(&analysis),
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{}", format_report(&analysis.memory_items()));
            }
        }
        Command::Feedback {
            user,
            statement,
            predicted,
            expected,
            categories,
            score,
            comment,
        } => {
            let learning = AdaptiveLearningSystem::from_config(&config.learning).await;
            let feedback = learning
                .collect_feedback(FeedbackRequest {
                    user_id: user,
                    statement,
                    predicted,
                    expected,
                    categories,
                    importance_score: score,
                    comment,
                })
                .await?;
            println!("{} ({})", feedback.kind, feedback.id);
        }
        Command::Stats { user } => {
            let learning = AdaptiveLearningSystem::from_config(&config.learning).await;
            let stats = learning.get_user_stats(&user);
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

/// `RUST_LOG` overrides the default filter; `LOG_FORMAT=json` switches to
/// JSON lines. Logs go to stderr so stdout stays machine-readable.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "recollect=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
