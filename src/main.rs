use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rand::Rng;
use serde_json::json;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::config::{LoggingConfig, TollgateConfig};
use tollgate::ratelimit::{RateLimitGuard, RateLimiter, RequestIdentity};

/// Request throttling engine: inspect presets and simulate traffic.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the effective policy presets as JSON
    Presets,

    /// Load and validate the configuration and policy presets
    Validate,

    /// Drive a preset with synthetic requests and print each decision
    Simulate {
        /// Preset name
        #[arg(short, long)]
        policy: String,

        /// Number of requests to send
        #[arg(short = 'n', long, default_value_t = 10)]
        requests: u32,

        /// Delay between requests in milliseconds
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,

        /// Client address used for every request
        #[arg(long, default_value = "127.0.0.1")]
        address: String,

        /// Use a random client address for every request
        #[arg(long)]
        rotate_addresses: bool,

        /// Authenticated wallet attached to every request
        #[arg(long)]
        wallet: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TollgateConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => TollgateConfig::default(),
    };

    init_tracing(&config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting Tollgate");

    let registry = Arc::new(config.load_registry()?);

    match cli.command {
        Command::Presets => {
            println!("{}", serde_json::to_string_pretty(&registry.to_file())?);
        }
        Command::Validate => {
            for policy in registry.iter() {
                info!(
                    name = policy.name(),
                    algorithm = %policy.limit().algorithm(),
                    limit = policy.limit().capacity(),
                    strict = policy.is_strict(),
                    "Policy valid"
                );
            }
            println!(
                "configuration ok: {} presets (version {})",
                registry.len(),
                registry.version()
            );
        }
        Command::Simulate {
            policy,
            requests,
            interval_ms,
            address,
            rotate_addresses,
            wallet,
        } => {
            let limiter = Arc::new(RateLimiter::with_config(config.store.clone())?);
            let guard = RateLimitGuard::with_registry(limiter, registry);
            let plan = Simulation {
                policy,
                requests,
                interval: Duration::from_millis(interval_ms.max(1)),
                address,
                rotate_addresses,
                wallet,
            };
            simulate(&guard, plan).await?;
        }
    }

    Ok(())
}

fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

struct Simulation {
    policy: String,
    requests: u32,
    interval: Duration,
    address: String,
    rotate_addresses: bool,
    wallet: Option<String>,
}

async fn simulate(guard: &RateLimitGuard<RateLimiter>, plan: Simulation) -> anyhow::Result<()> {
    let policy = guard.registry().require(&plan.policy)?.clone();
    info!(
        policy = policy.name(),
        requests = plan.requests,
        interval_ms = plan.interval.as_millis() as u64,
        "Starting simulation"
    );

    let mut ticker = tokio::time::interval(plan.interval);
    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    let (mut admitted, mut denied) = (0u32, 0u32);
    for request in 1..=plan.requests {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Received Ctrl+C, stopping simulation");
                break;
            }
            _ = ticker.tick() => {}
        }

        let address = if plan.rotate_addresses {
            random_address()
        } else {
            plan.address.clone()
        };
        let mut identity = RequestIdentity::new().with_header("x-forwarded-for", address.clone());
        if let Some(wallet) = &plan.wallet {
            identity = identity.with_wallet(wallet.clone());
        }

        let line = match guard.apply(&identity, &policy) {
            Ok(decision) => {
                admitted += 1;
                json!({
                    "request": request,
                    "address": address,
                    "allowed": true,
                    "remaining": decision.remaining,
                    "reset_in_ms": decision.reset_in_ms(),
                    "headers": decision.headers(),
                })
            }
            Err(err) if err.is_rate_limited() => {
                denied += 1;
                json!({
                    "request": request,
                    "address": address,
                    "allowed": false,
                    "reason": err.to_string(),
                    "retry_after": err.retry_after_secs(),
                })
            }
            Err(err) => return Err(err.into()),
        };
        println!("{}", line);
    }

    let stats = guard.backend().stats();
    info!(
        admitted,
        denied,
        sliding_window_entries = stats.sliding_window_entries,
        token_bucket_entries = stats.token_bucket_entries,
        "Simulation finished"
    );
    Ok(())
}

fn random_address() -> String {
    let octets: [u8; 4] = rand::thread_rng().gen();
    Ipv4Addr::from(octets).to_string()
}
