use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ratelog::config::{LogFormat, LoggingConfig, RatelogConfig, StoreBackend};
use ratelog::ratelimit::{
    GuardConfig, GuardOutcome, LimitSpec, RateLimitGuard, RateLimitStatus, SlidingWindowLimiter,
};
use ratelog::store::{InMemoryStore, RedisStore, TimeOrderedStore};

#[derive(Parser)]
#[command(name = "ratelog", version, about = "Sliding window log rate limiter")]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run rate limit checks for a key and print the resulting headers
    Check {
        key: String,

        /// Override the configured default limit
        #[arg(long)]
        limit: Option<u64>,

        /// Override the configured default window
        #[arg(long)]
        window_secs: Option<u64>,

        /// Number of checks to run
        #[arg(long, default_value_t = 1)]
        repeat: u32,

        /// Use the in-memory store regardless of configuration
        #[arg(long)]
        memory: bool,
    },
    /// Verify the store is reachable
    Ping,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = RatelogConfig::load(cli.config.as_deref())?;

    init_tracing(&config.logging);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Check {
            key,
            limit,
            window_secs,
            repeat,
            memory,
        } => {
            if memory {
                config.store.backend = StoreBackend::Memory;
            }
            if let Some(limit) = limit {
                config.rate_limiting.default_limit = limit;
            }
            if let Some(window_secs) = window_secs {
                config.rate_limiting.default_window_secs = window_secs;
            }
            config.validate()?;
            run_check(&config, &key, repeat).await
        }
        Command::Ping => {
            let store = build_store(&config).await?;
            tokio::time::timeout(config.store_timeout(), store.ping())
                .await
                .map_err(|_| anyhow::anyhow!("ping timed out after {:?}", config.store_timeout()))??;
            println!("PONG ({:?})", store.atomicity());
            Ok(())
        }
    }
}

async fn run_check(config: &RatelogConfig, key: &str, repeat: u32) -> anyhow::Result<()> {
    let store = build_store(config).await?;
    let limiter = SlidingWindowLimiter::new(store)
        .with_store_timeout(config.store_timeout())
        .with_deny_policy(config.rate_limiting.deny_policy);
    let guard_config = GuardConfig::from_config(config)?;
    let guard = RateLimitGuard::new(Arc::new(limiter), guard_config);
    let spec: LimitSpec = guard.spec_for(key);

    info!(
        key,
        limit = spec.limit(),
        window = ?spec.window(),
        "Running rate limit checks"
    );

    for _ in 0..repeat {
        let outcome = guard.evaluate(key).await;
        match &outcome {
            GuardOutcome::Bypassed(reason) => println!("bypassed: {:?}", reason),
            GuardOutcome::FailedOpen(err) => println!("store failure, admitted: {}", err),
            GuardOutcome::FailedClosed(err) => println!("store failure, rejected: {}", err),
            GuardOutcome::Admitted { headers, decision }
            | GuardOutcome::Rejected { headers, decision } => {
                for (name, value) in headers.header_pairs() {
                    println!("{}: {}", name, value);
                }
                let status = RateLimitStatus::from_decision(decision, &spec);
                println!("{}", serde_json::to_string(&status)?);
            }
        }
    }

    Ok(())
}

async fn build_store(config: &RatelogConfig) -> anyhow::Result<Arc<dyn TimeOrderedStore>> {
    let store: Arc<dyn TimeOrderedStore> = match config.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store");
            Arc::new(InMemoryStore::new())
        }
        StoreBackend::Redis => {
            info!(url = %config.store.redis_url, atomic = config.store.atomic, "Connecting to Redis");
            let connect = RedisStore::connect(&config.store.redis_url, config.store.atomic);
            let store = tokio::time::timeout(Duration::from_millis(config.store.timeout_ms), connect)
                .await
                .map_err(|_| anyhow::anyhow!("timed out connecting to {}", config.store.redis_url))??;
            Arc::new(store)
        }
    };
    Ok(store)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
    }
}
