//! CLI administration tool for community-cache.
//!
//! Lets an operator publish invalidations, purge cache keys and inspect or
//! rebuild derived caches without going through a running API process.
//!
//! # Usage
//!
//! ```bash
//! # Broadcast an invalidation to every process
//! cargo run --bin admin -- publish user:42 --type user
//!
//! # Routed publish, delivered only to matching bindings
//! cargo run --bin admin -- publish 'topic:9:*' --type topic --routing-key topic.members
//!
//! # Delete keys directly from the shared backend
//! cargo run --bin admin -- purge 'poll:7:*'
//!
//! # Rebuild a membership hash from the database
//! cargo run --bin admin -- reconcile channel 7
//!
//! # Show vote tallies (read-through)
//! cargo run --bin admin -- tally 7 8 9
//!
//! # Check cache backend and broker reachability
//! cargo run --bin admin -- health
//! ```
//!
//! # Environment Variables
//!
//! Same as the service; see [`community_cache::config`].

use community_cache::application::services::{CollectionCache, TallyCache};
use community_cache::config::{self, Config};
use community_cache::domain::entities::CollectionId;
use community_cache::domain::invalidation::InvalidationTarget;
use community_cache::infrastructure::bus::InvalidationBus;
use community_cache::infrastructure::cache::CacheStore;
use community_cache::infrastructure::health;
use community_cache::infrastructure::persistence::{PgMembershipRepository, PgVoteRepository};
use community_cache::server::connect_backend;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use sqlx::PgPool;
use std::sync::Arc;

/// CLI tool for operating community-cache.
#[derive(Parser)]
#[command(name = "admin")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Top-level commands.
#[derive(Subcommand)]
enum Commands {
    /// Publish an invalidation message on the bus
    Publish {
        /// Keys or prefixes (`topic:9:*`) to invalidate
        #[arg(required = true)]
        keys: Vec<String>,

        /// Diagnostic type tag carried in the message
        #[arg(short = 't', long = "type", default_value = "admin")]
        kind: String,

        /// Publish on the topic exchange with this routing key instead of broadcasting
        #[arg(short, long)]
        routing_key: Option<String>,
    },

    /// Delete a key or a `prefix*` pattern directly from the shared backend
    Purge {
        /// Literal key or prefix pattern ending in `*`
        pattern: String,
    },

    /// Rebuild one membership hash from the database
    Reconcile {
        #[arg(value_enum)]
        collection: CollectionArg,

        /// Channel, topic or event id
        id: i64,
    },

    /// Show vote tallies for one or more polls
    Tally {
        #[arg(required = true)]
        poll_ids: Vec<i64>,
    },

    /// Check cache backend and broker reachability
    Health,
}

/// Collection families addressable from the command line.
#[derive(Clone, Copy, ValueEnum)]
enum CollectionArg {
    /// Active members of a channel
    Channel,
    /// Active members of a topic
    Topic,
    /// Pending join requests for an event
    Event,
}

impl CollectionArg {
    fn collection(self, id: i64) -> CollectionId {
        match self {
            Self::Channel => CollectionId::channel_members(id),
            Self::Topic => CollectionId::topic_members(id),
            Self::Event => CollectionId::event_requests(id),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = config::load_from_env()?;

    match cli.command {
        Commands::Publish {
            keys,
            kind,
            routing_key,
        } => publish(&config, keys, &kind, routing_key).await?,
        Commands::Purge { pattern } => purge(&config, &pattern).await?,
        Commands::Reconcile { collection, id } => {
            reconcile(&config, collection.collection(id)).await?
        }
        Commands::Tally { poll_ids } => tally(&config, &poll_ids).await?,
        Commands::Health => check_health(&config).await?,
    }

    Ok(())
}

async fn connect_bus(config: &Config) -> Result<InvalidationBus> {
    let broker_url = config
        .broker_url
        .as_deref()
        .context("BROKER_URL must be set")?;
    InvalidationBus::connect_redis(broker_url, &config.bus_exchange, &config.retry_policy())
        .await
        .context("Failed to connect to the invalidation bus")
}

async fn connect_pool(config: &Config) -> Result<Arc<PgPool>> {
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    Ok(Arc::new(pool))
}

/// Publishes one invalidation message, broadcast or routed.
async fn publish(
    config: &Config,
    keys: Vec<String>,
    kind: &str,
    routing_key: Option<String>,
) -> Result<()> {
    println!("{}", "📣 Publish invalidation".bright_blue().bold());
    println!();

    for key in &keys {
        if InvalidationTarget::parse(key).is_none() {
            anyhow::bail!("Refusing to publish '{}': not a key or a non-empty prefix", key);
        }
    }

    let bus = connect_bus(config).await?;
    let count = keys.len();
    match &routing_key {
        Some(routing_key) => bus
            .publish_routed(keys, kind, routing_key)
            .await
            .context("Publish failed")?,
        None => bus
            .publish_broadcast(keys, kind)
            .await
            .context("Publish failed")?,
    }

    let route = match routing_key {
        Some(routing_key) => format!("routed ({})", routing_key),
        None => "broadcast".to_string(),
    };
    println!(
        "{} {} key(s) published, {}",
        "✅".green(),
        count.to_string().bright_white().bold(),
        route.cyan()
    );
    println!();

    Ok(())
}

/// Deletes a key or prefix from the shared backend without going through the bus.
async fn purge(config: &Config, pattern: &str) -> Result<()> {
    println!("{}", "🧹 Purge cache keys".bright_blue().bold());
    println!();

    let target = InvalidationTarget::parse(pattern)
        .with_context(|| format!("'{}' is not a key or a non-empty prefix", pattern))?;

    let backend = connect_backend(config).await;
    let store = CacheStore::new(backend, config.cache_ttl_seconds, config.cache_scan_batch);

    match target {
        InvalidationTarget::Literal(key) => {
            store.delete(&key).await;
            println!("  Deleted {}", key.cyan());
        }
        InvalidationTarget::Prefix(prefix) => {
            let deleted = store.delete_pattern(&prefix).await;
            println!(
                "  Deleted {} key(s) under {}",
                deleted.to_string().bright_green().bold(),
                prefix.to_string().cyan()
            );
        }
    }
    println!();

    Ok(())
}

/// Recomputes a membership hash from the database and replaces the cached copy.
async fn reconcile(config: &Config, collection: CollectionId) -> Result<()> {
    println!("{}", "🔁 Reconcile collection".bright_blue().bold());
    println!();

    let pool = connect_pool(config).await?;
    let backend = connect_backend(config).await;
    let cache = CollectionCache::new(
        backend,
        Arc::new(PgMembershipRepository::new(pool)),
        config.collection_ttl_seconds,
    );

    let members = cache
        .reconcile(collection)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load members: {}", e))?;

    println!(
        "  {} now holds {} member(s)",
        collection.to_string().cyan(),
        members.len().to_string().bright_green().bold()
    );
    println!();

    Ok(())
}

/// Prints per-choice tallies, filling cold tallies from the vote rows.
async fn tally(config: &Config, poll_ids: &[i64]) -> Result<()> {
    println!("{}", "📊 Vote tallies".bright_blue().bold());
    println!();

    let pool = connect_pool(config).await?;
    let backend = connect_backend(config).await;
    let tallies = TallyCache::new(
        backend,
        Arc::new(PgVoteRepository::new(pool)),
        config.tally_ttl_seconds,
    );

    let summaries = tallies
        .get_summaries(poll_ids)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load tallies: {}", e))?;

    for summary in summaries {
        println!(
            "  Poll {} ({} vote(s))",
            summary.poll_id.to_string().bright_white().bold(),
            summary.total().to_string().bright_green()
        );
        if summary.counts.is_empty() {
            println!("    {}", "no votes".bright_black());
        }
        for (choice, count) in &summary.counts {
            println!("    {:<24} {}", choice.cyan(), count);
        }
    }
    println!();

    Ok(())
}

/// Checks the cache backend and the broker.
async fn check_health(config: &Config) -> Result<()> {
    println!("{}", "🔍 Checking cache layer...".bright_blue());
    println!();

    let backend = connect_backend(config).await;
    let store = CacheStore::new(backend, config.cache_ttl_seconds, config.cache_scan_batch);
    let bus = connect_bus(config).await?;

    let report = health::check(&store, &bus).await;
    let mark = |ok: bool| if ok { "OK".green().bold() } else { "DOWN".red().bold() };

    println!("  Cache backend: {}", mark(report.cache));
    println!("  Broker:        {}", mark(report.broker));
    println!();

    if !report.is_healthy() {
        anyhow::bail!("Cache layer degraded");
    }
    Ok(())
}
