use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use conclave::agents::{
    ArbitratorAgent, CoordinatorAgent, EchoBackend, ModeratorAgent, RefinerAgent,
    ToolExecutorAgent, WorkerAgent, WorkflowGeneratorAgent,
};
use conclave::bus::{Bus, MemoryBus, RedisBus};
use conclave::config::ConclaveConfig;
use conclave::error::Result;
use conclave::gateway::Gateway;
use conclave::heartbeat::ReadinessMonitor;
use conclave::intelligence::{HashEmbedder, IntelligenceHub};
use conclave::llm::CannedGenerator;
use conclave::orchestrator::DebateOrchestrator;
use conclave::protocol::channels::TOOL_REQUESTS;
use conclave::runtime::{AgentHandler, AgentRuntime, RunningAgent};

#[derive(Parser)]
#[command(name = "conclave", about = "Multi-agent orchestration fabric", version)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the moderator: debate orchestration and task routing.
    Moderator,
    /// Run the arbitrator: proposal critique.
    Arbitrator,
    /// Run the refiner: critique-driven rework.
    Refiner,
    /// Run a proposal worker.
    Worker {
        #[arg(long)]
        name: String,
    },
    /// Run the tool executor.
    ToolExecutor,
    /// Run the coordinator and readiness monitor.
    Coordinator,
    /// Run the workflow generator.
    WorkflowGenerator,
    /// Run the WebSocket gateway.
    Gateway,
    /// Run every component in one process.
    Stack {
        /// Use the in-memory bus instead of the broker.
        #[arg(long)]
        memory_bus: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Fatal");
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("conclave=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("conclave=info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = ConclaveConfig::load(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Moderator => {
            let bus = connect(&config).await?;
            run_moderator(bus, &config).await
        }
        Commands::Arbitrator => {
            let bus = connect(&config).await?;
            let handler = Arc::new(
                ArbitratorAgent::new(role_name(&config, "arbitrator"), generator())
                    .with_call_timeout(config.call_timeout()),
            );
            run_agent(bus, handler, &config, vec![]).await
        }
        Commands::Refiner => {
            let bus = connect(&config).await?;
            let handler = Arc::new(
                RefinerAgent::new(role_name(&config, "refiner"), generator())
                    .with_call_timeout(config.call_timeout()),
            );
            run_agent(bus, handler, &config, vec![]).await
        }
        Commands::Worker { name } => {
            let bus = connect(&config).await?;
            let handler =
                Arc::new(WorkerAgent::new(name, generator()).with_call_timeout(config.call_timeout()));
            run_agent(bus, handler, &config, vec![]).await
        }
        Commands::ToolExecutor => {
            let bus = connect(&config).await?;
            let handler = Arc::new(
                ToolExecutorAgent::new(role_name(&config, "tool_executor"), Arc::new(EchoBackend))
                    .with_call_timeout(config.call_timeout()),
            );
            run_agent(bus, handler, &config, vec![TOOL_REQUESTS.to_string()]).await
        }
        Commands::Coordinator => {
            let bus = connect(&config).await?;
            run_coordinator(bus, &config).await
        }
        Commands::WorkflowGenerator => {
            let bus = connect(&config).await?;
            let handler = Arc::new(WorkflowGeneratorAgent::new(
                role_name(&config, "workflow_generator"),
                generator(),
            ));
            run_agent(bus, handler, &config, vec![]).await
        }
        Commands::Gateway => {
            let bus = connect(&config).await?;
            run_gateway(bus, &config).await
        }
        Commands::Stack { memory_bus } => {
            let bus: Arc<dyn Bus> = if memory_bus {
                Arc::new(MemoryBus::new())
            } else {
                connect(&config).await?
            };
            run_stack(bus, &config).await
        }
    }
}

async fn connect(config: &ConclaveConfig) -> Result<Arc<dyn Bus>> {
    let bus = RedisBus::connect(&config.bus.effective_url()).await?;
    Ok(Arc::new(bus))
}

/// AGENT_NAME (via config) wins over the role default.
fn role_name(config: &ConclaveConfig, default: &str) -> String {
    if config.agent.name == "agent" {
        default.to_string()
    } else {
        config.agent.name.clone()
    }
}

fn generator() -> Arc<CannedGenerator> {
    Arc::new(CannedGenerator::default())
}

fn build_hub(bus: &Arc<dyn Bus>, config: &ConclaveConfig) -> Arc<IntelligenceHub> {
    Arc::new(IntelligenceHub::new(
        Arc::clone(bus),
        config.hub_config(),
        config.estimator.clone(),
        config.router_config(),
        Arc::new(HashEmbedder::new(config.hub.embedding_dimension)),
    ))
}

async fn run_agent(
    bus: Arc<dyn Bus>,
    handler: Arc<dyn AgentHandler>,
    config: &ConclaveConfig,
    extra_channels: Vec<String>,
) -> Result<()> {
    let mut runtime_config = config.runtime_config();
    runtime_config.extra_channels = extra_channels;

    let agent = AgentRuntime::new(bus, handler, runtime_config).start().await?;
    wait_for_shutdown_signal().await;
    agent.stop().await
}

async fn run_moderator(bus: Arc<dyn Bus>, config: &ConclaveConfig) -> Result<()> {
    let hub = build_hub(&bus, config);
    let orchestrator = Arc::new(DebateOrchestrator::new(
        config.orchestrator_config(),
        Arc::clone(&hub),
    ));
    let handler = Arc::new(ModeratorAgent::new(
        role_name(config, "moderator"),
        Arc::clone(&orchestrator),
    ));

    let agent = AgentRuntime::new(bus, handler, config.runtime_config())
        .start()
        .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(Arc::clone(&hub).run_background(shutdown_rx.clone()));
    tokio::spawn(orchestrator.run_kill_switch(Arc::clone(agent.context()), shutdown_rx));

    wait_for_shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    agent.stop().await
}

async fn run_coordinator(bus: Arc<dyn Bus>, config: &ConclaveConfig) -> Result<()> {
    let handler = Arc::new(CoordinatorAgent::new(role_name(config, "coordinator")));
    let agent = AgentRuntime::new(Arc::clone(&bus), handler, config.runtime_config())
        .start()
        .await?;

    let monitor = ReadinessMonitor::new(
        bus,
        config.coordinator.required_agents.clone(),
        std::time::Duration::from_secs(config.agent.heartbeat_interval_secs),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_handle = tokio::spawn(monitor.run(shutdown_rx));

    wait_for_shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    let _ = monitor_handle.await;
    agent.stop().await
}

async fn run_gateway(bus: Arc<dyn Bus>, config: &ConclaveConfig) -> Result<()> {
    let gateway = Arc::new(Gateway::new(
        bus,
        config.gateway_config(),
        Arc::new(conclave::intelligence::EffortEstimator::new(
            config.estimator.clone(),
        )),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let serve = tokio::spawn(gateway.run(shutdown_rx));

    wait_for_shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    serve
        .await
        .map_err(|e| conclave::error::ConclaveError::Gateway(e.to_string()))?
}

/// Everything in one process, sharing one bus connection.
async fn run_stack(bus: Arc<dyn Bus>, config: &ConclaveConfig) -> Result<()> {
    let mut agents: Vec<RunningAgent> = Vec::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Moderator with its hub, rebuild loop, and kill-switch.
    let hub = build_hub(&bus, config);
    let orchestrator = Arc::new(DebateOrchestrator::new(
        config.orchestrator_config(),
        Arc::clone(&hub),
    ));
    let moderator = AgentRuntime::new(
        Arc::clone(&bus),
        Arc::new(ModeratorAgent::new("moderator", Arc::clone(&orchestrator))),
        config.runtime_config(),
    )
    .start()
    .await?;
    tokio::spawn(Arc::clone(&hub).run_background(shutdown_rx.clone()));
    tokio::spawn(
        Arc::clone(&orchestrator).run_kill_switch(Arc::clone(moderator.context()), shutdown_rx.clone()),
    );
    agents.push(moderator);

    let debaters: Vec<Arc<dyn AgentHandler>> = vec![
        Arc::new(
            ArbitratorAgent::new(&config.orchestrator.critic, generator())
                .with_call_timeout(config.call_timeout()),
        ),
        Arc::new(
            RefinerAgent::new(&config.orchestrator.refiner, generator())
                .with_call_timeout(config.call_timeout()),
        ),
        Arc::new(WorkflowGeneratorAgent::new("workflow_generator", generator())),
        Arc::new(CoordinatorAgent::new("coordinator")),
    ];
    for handler in debaters {
        agents.push(
            AgentRuntime::new(Arc::clone(&bus), handler, config.runtime_config())
                .start()
                .await?,
        );
    }

    for worker in &config.hub.available_agents {
        let handler = Arc::new(
            WorkerAgent::new(worker, generator()).with_call_timeout(config.call_timeout()),
        );
        agents.push(
            AgentRuntime::new(Arc::clone(&bus), handler, config.runtime_config())
                .start()
                .await?,
        );
    }

    let mut tool_runtime_config = config.runtime_config();
    tool_runtime_config.extra_channels = vec![TOOL_REQUESTS.to_string()];
    agents.push(
        AgentRuntime::new(
            Arc::clone(&bus),
            Arc::new(ToolExecutorAgent::new("tool_executor", Arc::new(EchoBackend))),
            tool_runtime_config,
        )
        .start()
        .await?,
    );

    let monitor = ReadinessMonitor::new(
        Arc::clone(&bus),
        config.coordinator.required_agents.clone(),
        std::time::Duration::from_secs(config.agent.heartbeat_interval_secs),
    );
    tokio::spawn(monitor.run(shutdown_rx.clone()));

    let gateway = Arc::new(Gateway::new(
        Arc::clone(&bus),
        config.gateway_config(),
        Arc::new(conclave::intelligence::EffortEstimator::new(
            config.estimator.clone(),
        )),
    ));
    let gateway_handle = tokio::spawn(gateway.run(shutdown_rx));

    info!("Stack running");
    wait_for_shutdown_signal().await;

    let _ = shutdown_tx.send(true);
    for agent in agents {
        if let Err(e) = agent.stop().await {
            error!(error = %e, "Agent shutdown error");
        }
    }
    let _ = gateway_handle.await;
    bus.close().await
}

async fn wait_for_shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Signal listener failed");
    }
    info!("Shutdown requested");
}
