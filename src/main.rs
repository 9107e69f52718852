use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;

use curator::jobs::{JobSnapshot, JobStatus};
use curator::storage::{DatabaseError, TitleQuery};
use curator::{Config, Curator};

/// Get the config directory path (~/.config/curator/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("curator"))
}

#[derive(Parser, Debug)]
#[command(
    name = "curator",
    about = "Media catalog reconciler: library sync, rankings, performer feeds and ratings"
)]
struct Args {
    /// Config file (default: ~/.config/curator/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Reset database (delete and recreate)
    #[arg(long, global = true)]
    reset_db: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pull the media library into the catalog, then recompute scores
    Sync {
        /// Leave stored scores untouched
        #[arg(long)]
        no_rescore: bool,
    },
    /// List catalog titles with their ranking tags
    Titles {
        /// Case-insensitive match on code or performers
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// List one ranking list in rank order
    List {
        label: String,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Ranked codes that are not in the catalog
    Missing,
    /// Recompute every stored score
    Rescore,
    /// Catalog counts and ranking list sizes
    Stats,
    /// Manage followed performers
    Performers {
        #[command(subcommand)]
        command: PerformerCommand,
    },
    /// Show detected feed items
    FeedItems {
        /// Only this performer (default: all, grouped by performer)
        #[arg(long)]
        performer: Option<String>,
        /// Hide items already marked watched
        #[arg(long)]
        unwatched: bool,
    },
    /// Mark feed items watched
    MarkWatched {
        #[arg(required = true)]
        ids: Vec<i64>,
        /// Clear the watched flag instead
        #[arg(long)]
        unset: bool,
    },
    /// Poll every performer feed
    RefreshFeeds {
        /// Run as a background job and report progress while it runs
        #[arg(long)]
        background: bool,
    },
    /// Scrape ratings for titles that have none
    Backfill {
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        background: bool,
    },
    /// Look up and store the rating of one title
    Rating {
        code: String,
        /// Whole-lookup attempts
        #[arg(long, default_value_t = 3)]
        attempts: u32,
    },
}

#[derive(Subcommand, Debug)]
enum PerformerCommand {
    List,
    Add {
        name: String,
        #[arg(long)]
        feed_id: Option<String>,
    },
    Update {
        id: i64,
        /// New feed id; an empty string clears it
        #[arg(long)]
        feed_id: Option<String>,
        #[arg(long)]
        watch: Option<bool>,
    },
    Remove {
        id: i64,
    },
    /// Register every performer credited in the catalog
    Import,
    /// Credit counts across the catalog
    Counts,
    /// Catalog titles crediting one performer
    Titles {
        name: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Poll a background job until it completes, logging progress to stderr
async fn wait_for_job(status: impl Fn() -> JobSnapshot) -> JobSnapshot {
    let mut last_total = usize::MAX;
    loop {
        let snapshot = status();
        if snapshot.summary.total != last_total {
            last_total = snapshot.summary.total;
            eprintln!(
                "{}: {}/{} processed",
                snapshot.kind, snapshot.summary.total, snapshot.summary.planned
            );
        }
        if snapshot.status != JobStatus::Running {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => {
            let config_dir = get_config_dir()?;
            if !config_dir.exists() {
                std::fs::create_dir_all(&config_dir)
                    .context("Failed to create config directory")?;
                eprintln!("Created config directory: {}", config_dir.display());
            }
            config_dir.join("config.toml")
        }
    };

    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    if let Some(base) = config_path.parent() {
        config.resolve_paths(base);
    }

    if args.reset_db && config.database.exists() {
        std::fs::remove_file(&config.database).context("Failed to delete database")?;
        eprintln!("Database reset.");
    }

    let curator = match Curator::open(config).await {
        Ok(curator) => curator,
        Err(e) if matches!(
            e.downcast_ref::<DatabaseError>(),
            Some(DatabaseError::InstanceLocked)
        ) =>
        {
            eprintln!("Error: The catalog database is in use by another process. Please try again.");
            std::process::exit(1);
        }
        Err(e) => return Err(e),
    };

    match args.command {
        Command::Sync { no_rescore } => {
            let synced = curator
                .sync_catalog()
                .await
                .context("Catalog sync failed")?;
            let rescored = if no_rescore {
                0
            } else {
                curator.recompute_scores().await?
            };
            print_json(&json!({ "synced": synced, "rescored": rescored }))?;
        }
        Command::Titles {
            search,
            offset,
            limit,
        } => {
            let query = TitleQuery {
                search,
                offset,
                limit,
            };
            print_json(&curator.list_titles(&query).await?)?;
        }
        Command::List {
            label,
            offset,
            limit,
        } => print_json(&curator.list_by_label(&label, offset, limit).await?)?,
        Command::Missing => print_json(&curator.missing().await?)?,
        Command::Rescore => {
            let changed = curator.recompute_scores().await?;
            print_json(&json!({ "changed": changed }))?;
        }
        Command::Stats => print_json(&curator.stats().await?)?,
        Command::Performers { command } => match command {
            PerformerCommand::List => print_json(&curator.list_performers().await?)?,
            PerformerCommand::Add { name, feed_id } => {
                print_json(&curator.add_performer(&name, feed_id.as_deref()).await?)?
            }
            PerformerCommand::Update { id, feed_id, watch } => {
                let updated = curator
                    .update_performer(id, feed_id.as_deref(), watch)
                    .await?;
                if !updated {
                    anyhow::bail!("No performer with id {id}");
                }
                print_json(&json!({ "updated": id }))?;
            }
            PerformerCommand::Remove { id } => {
                if !curator.remove_performer(id).await? {
                    anyhow::bail!("No performer with id {id}");
                }
                print_json(&json!({ "removed": id }))?;
            }
            PerformerCommand::Import => {
                let added = curator.import_performers().await?;
                print_json(&json!({ "added": added }))?;
            }
            PerformerCommand::Counts => print_json(&curator.performer_counts().await?)?,
            PerformerCommand::Titles { name } => {
                print_json(&curator.performer_titles(&name).await?)?
            }
        },
        Command::FeedItems {
            performer,
            unwatched,
        } => match performer {
            Some(name) => match curator.feed_items_for(&name, unwatched).await? {
                Some(items) => print_json(&items)?,
                None => anyhow::bail!("No performer named {name}"),
            },
            None => print_json(&curator.feed_items_grouped(unwatched).await?)?,
        },
        Command::MarkWatched { ids, unset } => {
            let changed = curator.mark_watched(&ids, !unset).await?;
            print_json(&json!({ "changed": changed }))?;
        }
        Command::RefreshFeeds { background } => {
            if background {
                let _handle = curator.start_feed_refresh()?;
                let snapshot = wait_for_job(|| curator.feed_refresh_status()).await;
                print_json(&snapshot)?;
            } else {
                let summary = curator.refresh_feeds_now().await?;
                print_json(&json!({
                    "summary": summary,
                    "entries": curator.feed_refresh_status().entries,
                }))?;
            }
        }
        Command::Backfill { limit, background } => {
            if background {
                let _handle = curator.start_rating_backfill(limit)?;
                let snapshot = wait_for_job(|| curator.rating_backfill_status()).await;
                print_json(&snapshot)?;
            } else {
                let summary = curator.backfill_ratings_now(limit).await?;
                print_json(&json!({
                    "summary": summary,
                    "entries": curator.rating_backfill_status().entries,
                }))?;
            }
        }
        Command::Rating { code, attempts } => {
            let rating = curator.fetch_rating(&code, attempts).await?;
            print_json(&json!({ "code": code, "rating": rating }))?;
        }
    }

    Ok(())
}
