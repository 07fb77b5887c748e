use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lore::config::LoreConfig;
use lore::lesson::LessonDraft;
use lore::Lore;

#[derive(Parser)]
#[command(name = "lore", version, about = "Cross-agent lesson memory")]
struct Cli {
    /// Path to the config file (default: ~/.lore/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the lesson server
    Serve,
    /// Publish a lesson to the local database
    Publish {
        /// What went wrong
        #[arg(long)]
        problem: String,
        /// How it was fixed
        #[arg(long)]
        resolution: String,
        /// Optional surrounding detail
        #[arg(long)]
        context: Option<String>,
        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,
        #[arg(long, default_value_t = 0.5)]
        confidence: f64,
        #[arg(long)]
        source: Option<String>,
    },
    /// List lessons, newest first
    List {
        #[arg(long)]
        project: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Export all lessons as JSON to stdout (or a file)
    Export {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Import lessons from a JSON export file
    Import { file: PathBuf },
}

fn open_local(config: &LoreConfig) -> Result<Lore> {
    let mut builder = Lore::builder()
        .db_path(config.resolved_db_path())
        .redact(config.redact.enabled)
        .redact_patterns(config.redact_patterns())
        .decay_half_life_days(config.retrieval.half_life_days);
    if let Some(project) = &config.storage.project {
        builder = builder.project(project.clone());
    }
    Ok(builder.build()?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => LoreConfig::load_from(path)?,
        None => LoreConfig::load()?,
    };

    // Log to stderr so stdout stays clean for JSON output.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => {
            lore::server::serve(&config).await?;
        }
        Command::Publish {
            problem,
            resolution,
            context,
            tags,
            confidence,
            source,
        } => {
            let store = open_local(&config)?;
            let tags = tags
                .map(|t| {
                    t.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default();
            let id = store.publish(LessonDraft {
                problem,
                resolution,
                context,
                tags,
                confidence: Some(confidence),
                source,
                ..Default::default()
            })?;
            store.close()?;
            println!("{id}");
        }
        Command::List { project, limit } => {
            let store = open_local(&config)?;
            let lessons = store.list(project.as_deref(), Some(limit))?;
            store.close()?;
            if lessons.is_empty() {
                println!("No lessons.");
            } else {
                for lesson in &lessons {
                    println!("{}  {:50.50}  {:50.50}", lesson.id, lesson.problem, lesson.resolution);
                }
            }
        }
        Command::Export { output } => {
            let store = open_local(&config)?;
            let lessons = store.export_lessons()?;
            store.close()?;
            let count = lessons.len();
            let json = serde_json::to_string_pretty(&serde_json::json!({
                "version": 1,
                "lessons": lessons,
            }))?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &json)
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    eprintln!("Exported {count} lessons to {}", path.display());
                }
                None => println!("{json}"),
            }
        }
        Command::Import { file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read import file: {}", file.display()))?;
            let payload: serde_json::Value =
                serde_json::from_str(&json).context("failed to parse import JSON")?;
            // Accept both the wrapped {"version", "lessons"} format and a
            // bare list.
            let lessons: Vec<lore::Lesson> = match payload.get("lessons") {
                Some(list) => serde_json::from_value(list.clone())?,
                None => serde_json::from_value(payload)?,
            };

            let store = open_local(&config)?;
            let imported = store.import_lessons(&lessons)?;
            store.close()?;
            println!("Imported {imported} lessons from {}", file.display());
        }
    }

    Ok(())
}
