use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meeple_cache::cache::query_fingerprint;
use meeple_cache::{
    derive_key, BackendSettings, CacheConfig, CacheStats, CacheStore, EndpointKind,
    HealthCheckResult, HealthStatus, InvalidationReport, KvBackend, Neo4jClient,
    Neo4jStatsRepository, RedisBackend, StatsTracker,
};

#[derive(Parser)]
#[command(name = "meeple")]
#[command(about = "Operator tools for the answer cache", long_about = None)]
struct Cli {
    /// Redis URL (overrides REDIS_URL)
    #[arg(long)]
    redis_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show hit/miss statistics and cache footprint
    Stats {
        /// Restrict to one domain
        #[arg(short, long)]
        domain: Option<String>,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Drop every cached answer of a domain
    InvalidateDomain {
        /// Domain identifier (e.g. "chess")
        domain: String,
    },

    /// Drop the cached answers carrying a tag
    InvalidateTag {
        /// Tag (e.g. "domain:chess")
        tag: String,
    },

    /// Drop the cached answers backed by a source document
    InvalidateDoc {
        /// Source document identifier
        document: String,
    },

    /// Probe Redis and Neo4j
    Health,

    /// Print the cache key a request maps to
    Key {
        /// Endpoint kind (qa, explain, setup, ...)
        endpoint: EndpointKind,

        /// Domain identifier
        domain: String,

        /// Question text
        query: Option<String>,

        /// Retrieved-context fingerprint
        #[arg(short, long)]
        context: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "meeple=info,meeple_cache=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut settings = BackendSettings::from_env();
    if let Some(url) = cli.redis_url.clone() {
        settings.redis_url = url;
    }
    let config = CacheConfig::from_env()?;
    let cancel = shutdown_token();

    match cli.command {
        Commands::Stats { ref domain, json } => {
            let backend = connect_redis(&settings).await?;
            let neo4j = Neo4jClient::from_settings(&settings)
                .await
                .context("Failed to connect to Neo4j")?;
            let repository = Neo4jStatsRepository::new(Arc::new(neo4j));
            let tracker = StatsTracker::new(Arc::new(repository), backend, config);

            let stats = tracker.get_stats(domain.as_deref(), &cancel).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(domain.as_deref(), &stats);
            }
        }

        Commands::InvalidateDomain { ref domain } => {
            let store = CacheStore::new(connect_redis(&settings).await?, config);
            let report = store.tag_index().invalidate_domain(domain, &cancel).await?;
            print_report(&report);
        }

        Commands::InvalidateTag { ref tag } => {
            let store = CacheStore::new(connect_redis(&settings).await?, config);
            let report = store.tag_index().invalidate_by_tag(tag, &cancel).await?;
            print_report(&report);
        }

        Commands::InvalidateDoc { ref document } => {
            let store = CacheStore::new(connect_redis(&settings).await?, config);
            let report = store
                .tag_index()
                .invalidate_source_document(document, &cancel)
                .await?;
            print_report(&report);
        }

        Commands::Health => {
            let timeout = config.operation_timeout;
            let redis = match RedisBackend::connect(&settings.redis_url).await {
                Ok(backend) => HealthCheckResult::probe("redis", timeout, backend.ping()).await,
                Err(e) => unreachable_store("redis", e),
            };
            let neo4j = match Neo4jClient::from_settings(&settings).await {
                Ok(client) => client.health_check_detailed(timeout).await,
                Err(e) => unreachable_store("neo4j", e),
            };

            let mut healthy = true;
            for result in [&redis, &neo4j] {
                healthy &= result.status.is_operational();
                print_health(result);
            }
            if !healthy {
                std::process::exit(1);
            }
        }

        Commands::Key {
            ref endpoint,
            ref domain,
            ref query,
            ref context,
        } => {
            let key = derive_key(endpoint, domain, query.as_deref(), context.as_deref());
            println!("key:         {}", key);
            println!(
                "fingerprint: {}",
                query_fingerprint(endpoint, query.as_deref())
            );
        }
    }

    Ok(())
}

async fn connect_redis(settings: &BackendSettings) -> Result<Arc<dyn KvBackend>> {
    let backend = RedisBackend::connect(&settings.redis_url)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", settings.redis_url))?;
    Ok(Arc::new(backend))
}

/// Token cancelled on Ctrl-C so long scans stop cleanly
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

fn unreachable_store(component: &str, error: meeple_cache::CacheError) -> HealthCheckResult {
    HealthCheckResult::from_probe(
        component,
        std::time::Duration::ZERO,
        &Err(error),
        meeple_cache::connection::DEFAULT_DEGRADED_THRESHOLD,
    )
}

fn print_stats(domain: Option<&str>, stats: &CacheStats) {
    println!("Cache statistics ({})", domain.unwrap_or("all domains"));
    println!("{}", "=".repeat(60));
    println!("  Hits:      {}", stats.total_hits);
    println!("  Misses:    {}", stats.total_misses);
    println!("  Hit rate:  {:.1}%", stats.hit_rate * 100.0);
    println!("  Keys:      {}", stats.total_keys);
    println!("  Size:      {} bytes", stats.cache_size_bytes);

    if stats.top_questions.is_empty() {
        return;
    }
    println!("\nTop questions:");
    for (rank, record) in stats.top_questions.iter().enumerate() {
        let label = record
            .sample_query
            .clone()
            .unwrap_or_else(|| record.fingerprint.chars().take(16).collect());
        let last_hit = record
            .last_hit_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {:>2}. [{}] {}  hits={} misses={} last={}",
            rank + 1,
            record.domain_id,
            label,
            record.hit_count,
            record.miss_count,
            last_hit
        );
    }
}

fn print_report(report: &InvalidationReport) {
    info!(reason = %report.reason, removed = report.removed, "Invalidation finished");
    println!("Invalidated ({}): {} entries removed", report.reason, report.removed);
    if !report.complete {
        println!("  Warning: the run stopped early; re-run to finish");
    }
}

fn print_health(result: &HealthCheckResult) {
    let icon = match result.status {
        HealthStatus::Healthy => "●",
        HealthStatus::Degraded => "◐",
        HealthStatus::Unhealthy => "✗",
    };
    println!(
        "{} {:<6} {:?} ({}ms)",
        icon, result.component, result.status, result.response_time_ms
    );
    if let Some(error) = &result.error {
        println!("    {}", error);
    }
}
