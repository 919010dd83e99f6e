use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nalgae::bootstrap::SystemBuilder;
use nalgae::config::Config;
use nalgae::escalation::ManualEscalationQueue;
use nalgae::models::{Post, PostMetadata, PostStatus, PriorityClass};
use nalgae::platform::Platform;
use nalgae::storage::{PostRepository, SqliteStateRepository};

#[derive(Parser)]
#[command(
    name = "nalgae",
    version,
    about = "Resilient video distribution orchestrator with cascading fallback upload",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (TOML); environment overrides apply on top
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the distribution orchestrator loop
    Run,

    /// Queue a post for distribution
    Enqueue {
        /// Content reference (path or blob handle)
        content_ref: String,

        /// Post title
        #[arg(short, long)]
        title: String,

        /// Post description
        #[arg(short, long, default_value = "")]
        description: String,

        /// Comma-separated tags
        #[arg(long)]
        tags: Option<String>,

        /// Comma-separated target platforms (default: all)
        #[arg(short, long)]
        platforms: Option<String>,

        /// Priority class (breaking, urgent, normal, scheduled)
        #[arg(long, default_value = "normal")]
        priority: String,

        /// Desired schedule time (RFC 3339)
        #[arg(long)]
        schedule: Option<String>,
    },

    /// Show post status and dispatch counters
    Status {
        /// Specific post id
        post_id: Option<String>,
    },

    /// Inspect and resolve manual escalations
    Escalations {
        #[command(subcommand)]
        command: EscalationCommands,
    },
}

#[derive(Subcommand)]
enum EscalationCommands {
    /// List pending escalations
    List,

    /// Record an operator resolution
    Resolve {
        /// Escalation id
        id: String,

        /// URL of the manually-created platform post
        #[arg(long)]
        url: Option<String>,

        /// Operator note
        #[arg(long, default_value = "resolved manually")]
        note: String,

        /// Operator identifier
        #[arg(long)]
        operator: Option<String>,
    },

    /// Export pending escalations as JSON
    Export {
        /// Output file path
        #[arg(short, long, default_value = "escalations.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_tracing(&cli.log_format, cli.verbose)?;

    let config = load_config(cli.config.as_deref())?;
    config.validate()?;

    match cli.command {
        Commands::Run => run(config).await?,

        Commands::Enqueue {
            content_ref,
            title,
            description,
            tags,
            platforms,
            priority,
            schedule,
        } => {
            enqueue(
                config,
                content_ref,
                title,
                description,
                tags,
                platforms,
                priority,
                schedule,
            )
            .await?;
        }

        Commands::Status { post_id } => status(config, post_id)?,

        Commands::Escalations { command } => escalations(config, command)?,
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    }
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("nalgae=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("nalgae=info,warn")
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    tracing::info!("assembling distribution system");

    // Platform adapters are deployment-specific: the stock binary has none
    // compiled in. Embed nalgae as a library and register adapters on the
    // builder to run a live system.
    let system = SystemBuilder::new(config)
        .build()
        .context("cannot start: register platform adapters via SystemBuilder::with_adapter")?;

    let recovered = system.recover_pending().await?;
    tracing::info!(recovered, "orchestrator starting");

    let orchestrator = Arc::clone(&system.orchestrator);
    let runner = tokio::spawn(async move { orchestrator.run().await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested, draining in-flight posts");
    system.orchestrator.request_shutdown();

    runner.await.context("orchestrator task failed")??;

    let snapshot = system.stats.snapshot();
    tracing::info!(
        completed = snapshot.completed,
        escalated = snapshot.escalated,
        failed = snapshot.failed,
        "orchestrator stopped"
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn enqueue(
    config: Config,
    content_ref: String,
    title: String,
    description: String,
    tags: Option<String>,
    platforms: Option<String>,
    priority: String,
    schedule: Option<String>,
) -> Result<()> {
    let priority = PriorityClass::parse(&priority)
        .with_context(|| format!("unknown priority class: {priority}"))?;

    let platforms = match platforms {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Platform::parse(s).with_context(|| format!("unknown platform: {s}")))
            .collect::<Result<Vec<_>>>()?,
        None => Platform::all(),
    };

    let metadata = PostMetadata {
        title,
        description,
        tags: tags
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default(),
    };

    let mut post = Post::new(content_ref, metadata, platforms, priority);
    if let Some(raw) = schedule {
        let at = chrono::DateTime::parse_from_rfc3339(&raw)
            .context("schedule must be RFC 3339")?
            .with_timezone(&chrono::Utc);
        post = post.with_schedule(at);
    }
    post.compute_fingerprint();

    let repository = SqliteStateRepository::new(&config.storage.sqlite_path)?;
    repository.save_post(&post)?;

    println!("queued post {} ({} platforms)", post.id, post.platforms.len());
    Ok(())
}

fn status(config: Config, post_id: Option<String>) -> Result<()> {
    let repository = SqliteStateRepository::new(&config.storage.sqlite_path)?;

    match post_id {
        Some(id) => {
            let post = repository
                .get_post(&id)?
                .with_context(|| format!("post not found: {id}"))?;
            println!("{}", serde_json::to_string_pretty(&post)?);
        }
        None => {
            for status in [
                PostStatus::Pending,
                PostStatus::InProgress,
                PostStatus::Completed,
                PostStatus::Failed,
                PostStatus::Escalated,
            ] {
                let count = repository.count_by_status(status)?;
                println!("{:<12} {count}", status.as_str());
            }
        }
    }
    Ok(())
}

fn escalations(config: Config, command: EscalationCommands) -> Result<()> {
    let repository = Arc::new(SqliteStateRepository::new(&config.storage.sqlite_path)?);
    let queue = ManualEscalationQueue::new(repository);

    match command {
        EscalationCommands::List => {
            let pending = queue.pending()?;
            if pending.is_empty() {
                println!("no pending escalations");
                return Ok(());
            }
            for record in pending {
                println!(
                    "{}  {}  post={}  strategies_tried={}  created={}",
                    record.id,
                    record.platform,
                    record.post_id,
                    record.attempts.len(),
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                );
            }
        }
        EscalationCommands::Resolve {
            id,
            url,
            note,
            operator,
        } => {
            let record = queue.resolve(&id, url, note, operator)?;
            println!("resolved escalation {} for {}", record.id, record.platform);
        }
        EscalationCommands::Export { output } => {
            let count = queue.export(&output)?;
            println!("exported {count} pending escalations to {}", output.display());
        }
    }
    Ok(())
}
