use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};

#[derive(Parser)]
#[command(name = "sift")]
#[command(about = "Activity intelligence: sessions, batching, summaries and project detection", long_about = None)]
#[command(version)]
struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store collector events (one event from flags, or a JSONL file)
    Ingest {
        #[arg(long)]
        source: Option<String>,
        #[arg(long = "event-type")]
        event_type: Option<String>,
        /// Defaults to now (UTC).
        #[arg(long = "occurred-at")]
        occurred_at: Option<String>,
        /// JSON payload; defaults to `{}`.
        #[arg(long)]
        payload: Option<String>,
        /// JSONL file with one event object per line.
        #[arg(long, conflicts_with_all = ["source", "event_type", "occurred_at", "payload"])]
        file: Option<PathBuf>,
    },
    /// Group ungrouped events into sessions
    Group,
    /// Show the batch gate decision and the next batch
    Batch {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show paths, backlog, runs and configuration health
    Status,
    /// Run the processing cycle
    Watch {
        #[arg(long)]
        once: bool,
        #[arg(long)]
        daemon: bool,
        /// Bypass the batch gate.
        #[arg(long)]
        force: bool,
    },
    /// Delete expired page summaries
    CacheCleanup,
    /// Inspect and manage the project registry
    Projects {
        #[command(subcommand)]
        action: ProjectCommands,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// List registered projects
    List,
    /// Register a project by hand
    Add {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long = "keyword")]
        keywords: Vec<String>,
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long = "repo")]
        repos: Vec<String>,
        #[arg(long)]
        path: Option<String>,
    },
    /// Suggest the best matching project for a description
    Suggest {
        description: String,
        #[arg(long = "tech")]
        technologies: Vec<String>,
    },
    /// Show candidate names and whether they pass the creation rule
    Candidates,
    /// Map unprocessed events to projects heuristically
    Classify {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

fn render(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    let status = if report.ok { "ok" } else { "failed" };
    println!("{}: {status}", report.command);
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  issue: {issue}");
    }
    Ok(())
}

/// Parse arguments, run the command and print its report. Returns the
/// process exit code: 0 when the report is ok, 2 otherwise.
pub fn run() -> Result<i32> {
    let cli = Cli::parse();

    let report = match cli.command {
        Commands::Ingest {
            source,
            event_type,
            occurred_at,
            payload,
            file,
        } => commands::ingest::run(&commands::ingest::IngestOptions {
            source,
            event_type,
            occurred_at,
            payload,
            file,
        })?,
        Commands::Group => commands::group::run()?,
        Commands::Batch { limit } => commands::batch::run(limit)?,
        Commands::Status => commands::status::run()?,
        Commands::Watch {
            once,
            daemon,
            force,
        } => commands::watch::run(&commands::watch::WatchOptions {
            once,
            daemon,
            force,
        })?,
        Commands::CacheCleanup => commands::cache_cleanup::run()?,
        Commands::Projects { action } => match action {
            ProjectCommands::List => commands::projects::list()?,
            ProjectCommands::Add {
                name,
                description,
                keywords,
                tags,
                repos,
                path,
            } => commands::projects::add(&commands::projects::AddOptions {
                name,
                description,
                keywords,
                tags,
                repos,
                path,
            })?,
            ProjectCommands::Suggest {
                description,
                technologies,
            } => commands::projects::suggest(&description, &technologies)?,
            ProjectCommands::Candidates => commands::projects::candidates()?,
            ProjectCommands::Classify { limit } => commands::projects::classify(limit)?,
        },
    };

    render(&report, cli.json)?;
    Ok(if report.ok { 0 } else { 2 })
}
