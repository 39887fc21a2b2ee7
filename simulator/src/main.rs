//! AtomicDoc Simulator
//!
//! Runs the sample business flows through the coordinator against an
//! in-memory store or a MongoDB replica set.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atomicdoc_coordinator::CoordinatorConfig;
use atomicdoc_mongodb::{Connection, MongoStore};
use atomicdoc_store::MemoryStore;

mod controller;
mod fixtures;
mod flows;
mod metrics;
mod scenario;

use controller::SimulationController;
use fixtures::Fixtures;
use scenario::Scenario;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Memory,
    Mongodb,
}

/// AtomicDoc Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Run transactional document flows against a store")]
struct Args {
    /// Store to run against
    #[arg(long, value_enum, default_value = "memory")]
    store: StoreKind,

    /// MongoDB connection string (replica set required for transactions)
    #[arg(long, default_value = "mongodb://localhost:27017/atomicdoc?replicaSet=rs0")]
    uri: String,

    /// Scenario to run, or "all"
    #[arg(short, long, default_value = "all")]
    scenario: String,

    /// Attempts per plan, including the first
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Deadline for each plan in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Print outcomes and logs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = CoordinatorConfig::from_env();

    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
    );
    if args.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    if let Some(attempts) = args.max_attempts {
        config.retry.max_attempts = attempts;
    }
    if let Some(ms) = args.timeout_ms {
        config.plan_timeout = Duration::from_millis(ms);
    }
    config.validate().map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let scenarios = Scenario::load_many(&args.scenario)?;

    info!("Starting AtomicDoc Simulator");
    info!("Store: {:?}", args.store);
    info!("Max attempts: {}", config.retry.max_attempts);
    info!("Plan timeout: {:?}", config.plan_timeout);

    let failures = match args.store {
        StoreKind::Memory => {
            let store = Arc::new(MemoryStore::new());
            run(store, config, &args, &scenarios).await?
        }
        StoreKind::Mongodb => {
            let connection = Connection::new(&args.uri).await?;
            connection.ping().await?;
            info!("Connected to MongoDB database {}", connection.database_name());
            let store = Arc::new(MongoStore::new(&connection));
            let failures = run(store, config, &args, &scenarios).await?;
            connection.disconnect().await;
            failures
        }
    };

    if failures.is_empty() {
        info!("Simulation complete");
        Ok(())
    } else {
        for failure in &failures {
            eprintln!("assertion failed: {}", failure);
        }
        Err(anyhow::anyhow!("{} assertion(s) failed", failures.len()))
    }
}

async fn run<S: Fixtures>(
    store: Arc<S>,
    config: CoordinatorConfig,
    args: &Args,
    scenarios: &[Scenario],
) -> anyhow::Result<Vec<String>> {
    let mut controller = SimulationController::new(store, config, args.seed, args.json);

    for scenario in scenarios {
        controller.run_scenario(scenario).await?;
    }

    let metrics = controller.metrics();
    info!("Total plans: {}", metrics.total_plans);
    info!("Committed: {}", metrics.committed);
    info!("Aborted: {}", metrics.aborted);
    info!("Failed: {}", metrics.failed);
    info!("Extra attempts: {}", metrics.extra_attempts);
    info!("Commit rate: {:.1}%", metrics.commit_rate() * 100.0);
    info!("Average latency: {}ms", metrics.average_latency_ms());
    info!("p99 latency: {}ms", metrics.p99_latency_ms());

    let coordinator = controller.coordinator();
    let snapshot = coordinator.metrics().snapshot();
    if args.json {
        println!("{}", serde_json::to_string(&snapshot)?);
    } else {
        print!("{}", coordinator.metrics().to_prometheus());
    }
    coordinator.shutdown(Duration::from_secs(5)).await;

    Ok(controller.failures().to_vec())
}
