//! Cache daemon
//!
//! Binds a cache to a directory on a local filesystem, keeps the culler
//! running and reports statistics until interrupted.

use anyhow::{Context, Result};
use cachefiles::backend::DiskBackend;
use cachefiles::{Cache, CacheConfigLoader};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Bind a local directory as a network filesystem cache")]
struct Args {
    /// Configuration file (JSON, or cachefilesd.conf directives)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backing directory, overriding the configuration
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Seconds between statistics reports; 0 disables them
    #[arg(long, default_value = "60")]
    stats_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(true)
                .with_thread_ids(true),
        )
        .with(tracing_subscriber::filter::LevelFilter::from_level(
            args.log_level,
        ))
        .init();

    let (mut config, source) = CacheConfigLoader::load(args.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(dir) = args.dir {
        config.root_dir = dir;
    }
    info!("Configuration loaded from {:?}", source);
    info!("Backing directory: {}", config.root_dir.display());

    let backend = DiskBackend::new(&config.root_dir).with_context(|| {
        format!(
            "failed to open backing directory {}",
            config.root_dir.display()
        )
    })?;
    let backend = Arc::new(backend);
    let cache = Cache::builder(backend)
        .config(config)
        .build()
        .await
        .context("failed to bind cache")?;
    info!("Cache {} ready", cache.config().tag);

    let reporter = (args.stats_interval > 0).then(|| {
        let cache = cache.clone();
        let period = Duration::from_secs(args.stats_interval);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;
            loop {
                interval.tick().await;
                let stats = cache.stats();
                info!(
                    "lookups={} hits={} misses={} nobufs={} writes={} culled={} io_errors={} culling={}",
                    stats.lookups,
                    stats.hits,
                    stats.misses,
                    stats.nobufs,
                    stats.writes,
                    stats.culled,
                    stats.io_errors,
                    stats.culling
                );
            }
        })
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Shutting down");

    if let Some(reporter) = reporter {
        reporter.abort();
    }
    cache.withdraw();

    println!("{}", serde_json::to_string_pretty(&cache.stats())?);
    Ok(())
}
