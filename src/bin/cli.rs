//! shotcache CLI
//!
//! Runs the screenshot cache server, or inspects its configuration and disk cache.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use shotcache::{
    error::Result,
    models::Config,
    pipeline::{Acquire, Acquirer, AvailabilityBreaker, RateLimiter, Resolver, WorkerPool},
    server::{self, AppState},
    storage::{DiskCache, MemoryCache},
    utils::http::{HttpUpstream, Upstream},
};

/// shotcache - random screenshot cache
#[derive(Parser, Debug)]
#[command(
    name = "shotcache",
    version,
    about = "Random prnt.sc screenshot acquisition and caching service"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "storage/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prefill the caches, start the workers and serve HTTP (default)
    Serve {
        /// Override the bind address from the config
        #[arg(long)]
        bind: Option<String>,

        /// Skip the startup prefill
        #[arg(long)]
        no_prefill: bool,
    },

    /// Validate the configuration file
    Validate,

    /// Show the effective configuration and disk cache state
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load_or_default(&cli.config);
    log::info!("[startup] configuration from {}", cli.config.display());

    match cli.command.unwrap_or(Command::Serve {
        bind: None,
        no_prefill: false,
    }) {
        Command::Serve { bind, no_prefill } => {
            config.validate()?;
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            run_server(&config, &bind, !no_prefill).await?;
        }

        Command::Validate => {
            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!("✓ Config OK");
        }

        Command::Info => {
            log::info!("Upstream: {}", config.upstream.base_url);
            log::info!(
                "Memory cache: {} items, prefill {}, {} workers",
                config.cache.max_size,
                config.cache.prefill_target,
                config.cache.worker_count
            );
            log::info!(
                "Rate limit: {} requests per {}s",
                config.rate_limit.max_requests,
                config.rate_limit.window_secs
            );

            let disk = DiskCache::new(&config.disk.dir, config.disk.max_items);
            let live = disk.init().await?;
            log::info!(
                "Disk cache: {} of {} items in {}",
                live,
                config.disk.max_items,
                config.disk.dir.display()
            );
        }
    }

    Ok(())
}

/// Wire every component, prefill, start the workers and serve until Ctrl-C.
async fn run_server(config: &Config, bind: &str, prefill: bool) -> Result<()> {
    let disk = Arc::new(DiskCache::new(&config.disk.dir, config.disk.max_items));
    disk.init().await?;
    let memory = Arc::new(MemoryCache::new(config.cache.max_size));

    let upstream: Arc<dyn Upstream> = Arc::new(HttpUpstream::new(&config.upstream)?);
    let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
    let breaker = Arc::new(AvailabilityBreaker::new(&config.ban));
    let acquire: Arc<dyn Acquire> = Arc::new(Acquirer::new(
        config,
        upstream,
        limiter,
        Arc::clone(&breaker),
    )?);

    let pool = Arc::new(WorkerPool::new(
        config,
        Arc::clone(&acquire),
        Arc::clone(&memory),
        Arc::clone(&disk),
    ));
    if prefill {
        pool.prefill().await;
    }
    let workers = pool.spawn();
    log::info!("[startup] {} workers running", workers.len());

    let resolver = Arc::new(Resolver::new(acquire, memory, disk));
    server::serve(AppState::new(resolver, breaker), bind).await?;

    for worker in workers {
        worker.abort();
    }
    Ok(())
}
