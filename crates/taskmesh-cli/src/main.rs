mod config;
mod report;
mod sim;

use clap::{Parser, Subcommand};
use config::{PromptSet, TaskmeshConfig};
use sim::AgentPool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use taskmesh_bus::{InMemoryBus, MessageBus};
use taskmesh_decomposer::{Decomposer, DecompositionOutcome, OpenAiCompatibleOracle};
use taskmesh_orchestrator::{
    build_forest, new_task_id, JsonFileReputationStore, Orchestrator, ReputationStore,
    ResultsLog,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "taskmesh", about = "taskmesh: decompose prompts and orchestrate worker agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "taskmesh.toml")]
    config: PathBuf,

    /// Human-readable logs instead of JSON
    #[arg(long)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a prompts file through the orchestrator and simulated agents
    Run {
        /// Prompts file with `[[category]]` tables
        #[arg(short, long, default_value = "prompts.toml")]
        prompts: PathBuf,
        /// Seconds to wait between prompts
        #[arg(long, default_value_t = 20)]
        interval_secs: u64,
        /// Seconds to wait for in-flight tasks after the last prompt
        #[arg(long, default_value_t = 30)]
        settle_secs: u64,
    },
    /// Decompose one prompt and print its chains without dispatching
    Decompose {
        /// Prompt to decompose
        prompt: String,
    },
    /// Print the persisted reputation table
    Reputation,
    /// Print the results log summary
    Summary,
}

fn init_tracing(pretty: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if pretty {
        builder.init();
    } else {
        builder.json().init();
    }
}

fn decomposer(config: &TaskmeshConfig) -> anyhow::Result<Decomposer> {
    let oracle = Arc::new(OpenAiCompatibleOracle::new(config.oracle.clone())?);
    Ok(Decomposer::new(oracle, config.orchestrator.channels.clone()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.pretty);

    let config = TaskmeshConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Run {
            prompts,
            interval_secs,
            settle_secs,
        } => {
            let prompts = PromptSet::load(&prompts).await?;
            run(
                config,
                prompts,
                Duration::from_secs(interval_secs),
                Duration::from_secs(settle_secs),
            )
            .await?;
        }
        Commands::Decompose { prompt } => {
            let decomposer = decomposer(&config)?;
            let task_id = new_task_id();
            let decomposition = decomposer.decompose(&prompt).await;
            let forest = build_forest(&task_id, &decomposition.subtasks);

            println!(
                "Decomposed in {:.3}s into {} subtasks",
                decomposition.duration.as_secs_f64(),
                decomposition.subtasks.len()
            );
            if let DecompositionOutcome::Fallback { reason } = &decomposition.outcome {
                println!("Fallback used: {reason}");
            }
            print!("{}", report::render_forest(&forest));
        }
        Commands::Reputation => {
            let store = JsonFileReputationStore::new(config.orchestrator.reputation_path());
            match store.load().await? {
                Some(table) => print!("{}", report::render_table(&table)),
                None => println!("No reputation table at {}", store.path().display()),
            }
        }
        Commands::Summary => {
            let log = ResultsLog::open(config.orchestrator.results_path()).await?;
            println!("{}", serde_json::to_string_pretty(&log.summary().await)?);
        }
    }

    Ok(())
}

async fn run(
    config: TaskmeshConfig,
    prompts: PromptSet,
    interval: Duration,
    settle: Duration,
) -> anyhow::Result<()> {
    if prompts.is_empty() {
        anyhow::bail!("Prompts file contains no prompts");
    }

    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::default());
    let decomposer = decomposer(&config)?;
    let orchestrator =
        Arc::new(Orchestrator::open(config.orchestrator.clone(), bus.clone(), decomposer).await?);

    if !config.seed.is_empty() {
        let seeded = orchestrator.seed_reputation(&config.seed).await?;
        info!(seeded, "Reputation seeded");
    }

    if config.agents.is_empty() {
        warn!("No simulated agents configured; tasks will time out");
    }
    let pool = AgentPool::spawn(bus.clone(), &config.agents).await?;
    for channel in &config.orchestrator.channels {
        if !pool.agent_types().contains(channel) {
            warn!(channel = %channel, "No simulated agent serves this channel");
        }
    }

    orchestrator.on_task_complete(|task| println!("{}", report::render_task(task)));
    orchestrator.start().await?;

    let total = prompts.len();
    let replay = async {
        for (n, (category, i, prompt)) in prompts.iter().enumerate() {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            let task_id = format!("{category}_{i}_{}", &suffix[..6]);
            info!(task_id = %task_id, progress = n + 1, total, "Submitting prompt");

            match orchestrator.submit(prompt, task_id.as_str(), category).await {
                Ok(receipt) => {
                    if !receipt.dropped.is_empty() {
                        warn!(
                            task_id = %receipt.task_id,
                            dropped = ?receipt.dropped,
                            "Subtasks dropped from chains"
                        );
                    }
                }
                Err(e) => warn!(task_id = %task_id, error = %e, "Failed to submit prompt"),
            }

            if n + 1 < total {
                tokio::time::sleep(interval).await;
            }
        }

        let deadline = tokio::time::Instant::now() + settle;
        while orchestrator.tracker().live_count() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    };

    tokio::select! {
        () = replay => {}
        _ = tokio::signal::ctrl_c() => warn!("Interrupted; shutting down"),
    }

    let still_live = orchestrator.tracker().live_count();
    if still_live > 0 {
        warn!(still_live, "Tasks still in flight at exit");
    }

    pool.shutdown();
    orchestrator.shutdown().await?;

    let summary = orchestrator.results().summary().await;
    println!("Results written to {}", orchestrator.results().path().display());
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
