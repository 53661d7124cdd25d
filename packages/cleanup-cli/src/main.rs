//! Admin CLI for the redirect cleanup engine
//!
//! Reads rules and content from a JSON site file and keeps jobs, backups and
//! the analysis cache in a JSON state file.

mod config;
mod site;

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use redirect_cleanup::{
    AnalysisResult, CleanupEngine, ContentStore, ContentType, EngineConfig, FileKvStore, Job,
    JobOptions, JobProgress, MemoryContentStore, MemoryRuleSource, RedirectRuleSource,
};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::config::{parse_hosts, Config};
use crate::site::SiteStore;

#[derive(Parser)]
#[command(name = "redirect-cleanup")]
#[command(about = "Collapse redirect chains and rewrite superseded URLs in site content")]
struct Cli {
    /// State file (jobs, backups, analysis cache)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Site file with rules and content
    #[arg(long, global = true)]
    site: Option<PathBuf>,

    /// Comma-separated hosts that belong to the site
    #[arg(long, global = true)]
    hosts: Option<String>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze redirect rules and cache the resolved mapping
    Analyze,

    /// Create a job against the cached analysis
    Start(JobArgs),

    /// Run every remaining batch of a job
    Process { job_id: Uuid },

    /// Start a job and run it to the end
    Run(JobArgs),

    /// Show job progress
    Progress { job_id: Uuid },

    /// Show a job with its log
    Show { job_id: Uuid },

    /// List recent jobs
    Recent {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Restore content changed by a completed job
    Rollback { job_id: Uuid },

    /// Repair malformed URLs in a file (or stdin) and print the result
    Repair { input: Option<PathBuf> },

    /// Delete backups past their retention
    PurgeBackups,
}

#[derive(Args)]
struct JobArgs {
    /// Count replacements without writing
    #[arg(long)]
    dry_run: bool,

    /// Skip backups (the job cannot be rolled back)
    #[arg(long)]
    no_backup: bool,

    /// Content types to process (posts, meta, options)
    #[arg(long, value_delimiter = ',')]
    types: Vec<ContentType>,

    #[arg(long)]
    batch_size: Option<usize>,
}

impl JobArgs {
    fn into_options(self) -> JobOptions {
        JobOptions {
            content_types: self.types,
            batch_size: self.batch_size,
            dry_run: self.dry_run,
            create_backup: !self.no_backup,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,redirect_cleanup=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    if let Commands::Repair { input } = &cli.command {
        return cmd_repair(input.as_ref(), cli.json);
    }

    let needs_site = matches!(
        cli.command,
        Commands::Analyze
            | Commands::Start(_)
            | Commands::Process { .. }
            | Commands::Run(_)
            | Commands::Rollback { .. }
    );
    let engine = open_engine(&cli, &config, needs_site).await?;
    let json = cli.json;

    match cli.command {
        Commands::Analyze => {
            let analysis = engine.analyze_redirections().await?;
            emit(json, &analysis, print_analysis)
        }
        Commands::Start(args) => {
            let job_id = engine
                .start_cleanup_process(args.into_options())
                .await?;
            emit(json, &job_id, |id| {
                println!("{} {}", "Created job".green(), id.to_string().bold())
            })
        }
        Commands::Process { job_id } => {
            let job = engine.process_cleanup_job(job_id).await?;
            emit(json, &job, print_job)
        }
        Commands::Run(args) => {
            let job = engine.run_cleanup(args.into_options()).await?;
            emit(json, &job, print_job)
        }
        Commands::Progress { job_id } => {
            let progress = engine.get_job_progress(job_id).await?;
            emit(json, &progress, print_progress)
        }
        Commands::Show { job_id } => {
            let job = engine.get_job_details(job_id).await?;
            emit(json, &job, |job| {
                print_job(job);
                println!();
                for line in &job.logs {
                    println!("  {}", line.dimmed());
                }
            })
        }
        Commands::Recent { limit } => {
            let jobs = engine.get_recent_jobs(limit).await?;
            emit(json, &jobs, |jobs| {
                if jobs.is_empty() {
                    println!("{}", "No jobs yet".dimmed());
                }
                for job in jobs {
                    println!(
                        "{}  {:<11}  {}  {} urls{}",
                        job.id,
                        job.status.to_string(),
                        job.started_at.format("%Y-%m-%d %H:%M"),
                        job.results.urls_replaced,
                        if job.options.dry_run { " (dry run)" } else { "" }
                    );
                }
            })
        }
        Commands::Rollback { job_id } => {
            let outcome = engine.rollback_changes(job_id).await?;
            emit(json, &outcome, |o| {
                println!("{} {} items", "Restored".green(), o.restored_count)
            })
        }
        Commands::PurgeBackups => {
            let purged = engine.purge_expired_backups().await?;
            emit(json, &purged, |n| println!("Purged {n} expired backups"))
        }
        Commands::Repair { .. } => Ok(()),
    }
}

async fn open_engine(cli: &Cli, config: &Config, needs_site: bool) -> Result<CleanupEngine> {
    let state_path = cli.state.clone().unwrap_or_else(|| config.state_path.clone());
    let kv = FileKvStore::open(&state_path)
        .await
        .with_context(|| format!("Failed to open state file {}", state_path.display()))?;

    let hosts = match &cli.hosts {
        Some(raw) => parse_hosts(raw),
        None => config.site_hosts.clone(),
    };
    let mut engine_config = EngineConfig::default().with_site_hosts(hosts);
    if let Some(size) = config.batch_size {
        engine_config = engine_config.with_batch_size(size);
    }

    let site_path = cli.site.clone().or_else(|| config.site_path.clone());
    let (rules, content): (Arc<dyn RedirectRuleSource>, Arc<dyn ContentStore>) = match site_path {
        Some(path) => {
            let site = Arc::new(SiteStore::open(&path).await?);
            let rules: Arc<dyn RedirectRuleSource> = site.clone();
            let content: Arc<dyn ContentStore> = site;
            (rules, content)
        }
        None if needs_site => {
            anyhow::bail!("No site file: pass --site or set REDIRECT_CLEANUP_SITE")
        }
        None => {
            let rules: Arc<dyn RedirectRuleSource> = Arc::new(MemoryRuleSource::default());
            let content: Arc<dyn ContentStore> = Arc::new(MemoryContentStore::new());
            (rules, content)
        }
    };

    Ok(CleanupEngine::new(rules, content, Arc::new(kv), engine_config))
}

fn cmd_repair(input: Option<&PathBuf>, json: bool) -> Result<()> {
    let content = match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };

    let (fixed, fixes) = redirect_cleanup::fix_malformed_urls(&content);

    #[derive(Serialize)]
    struct Repair {
        fixes: usize,
        content: String,
    }

    emit(json, &Repair { fixes, content: fixed }, |r| {
        print!("{}", r.content);
        eprintln!("{} {} malformed URLs", "Fixed".green(), r.fixes);
    })
}

/// JSON for scripts, text for people.
fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text(value);
    }
    Ok(())
}

fn print_analysis(analysis: &AnalysisResult) {
    println!("{}", "Redirect analysis".bold());
    println!("  redirections:    {}", analysis.total_redirections);
    println!("  mappings:        {}", analysis.url_mapping.len());
    println!("  chains resolved: {}", analysis.redirect_chains_resolved);
    if analysis.skipped_patterns > 0 {
        println!("  skipped:         {} non-literal patterns", analysis.skipped_patterns);
    }
    for entry in &analysis.unresolved {
        println!(
            "  {} {} -> {} ({:?})",
            "unresolved".yellow(),
            entry.source,
            entry.destination,
            entry.reason
        );
    }
    println!();
    for (content_type, stats) in &analysis.content_analysis {
        println!(
            "  {:<8} {} scanned, {} with matches, {} occurrences",
            content_type.as_str(),
            stats.items_scanned,
            stats.items_with_matches,
            stats.occurrences
        );
    }
}

fn print_job(job: &Job) {
    let status = match job.status {
        redirect_cleanup::JobStatus::Completed => job.status.to_string().green(),
        redirect_cleanup::JobStatus::Failed => job.status.to_string().red(),
        _ => job.status.to_string().yellow(),
    };
    println!("{} {}", job.id.to_string().bold(), status);
    if job.options.dry_run {
        println!("  {}", "dry run: nothing was written".dimmed());
    }
    println!(
        "  posts {}  meta {}  options {}  urls {}  failed {}  backups {}",
        job.results.posts_updated,
        job.results.meta_updated,
        job.results.options_updated,
        job.results.urls_replaced,
        job.results.failed_items,
        job.results.backups_created
    );
    if let Some(error) = &job.error {
        println!("  {} {}", "error:".red(), error);
    }
}

fn print_progress(progress: &JobProgress) {
    println!(
        "{} {}  {}/{} mappings ({:.1}%)",
        progress.job_id,
        progress.status,
        progress.processed_mappings,
        progress.total_mappings,
        progress.percent_complete
    );
}
