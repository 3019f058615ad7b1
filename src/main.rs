//! switchboard server entry point.
//!
//! Constructs every component once, wires the gateways to the
//! orchestrator through the message bus, and tears everything down in
//! reverse dependency order on SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};

use switchboard::agent::{AgentBrain, BrainConfig, EchoModel, ModelProvider, Summarizer, ToolDescriptor};
use switchboard::attachments::AttachmentProcessor;
use switchboard::bus::MessageBus;
use switchboard::compaction::{CompactionConfig, Compactor};
use switchboard::config::{Config, load_config};
use switchboard::context::{ContextStore, ContextStoreConfig};
use switchboard::database::{DatabaseConnection, DatabasePath};
use switchboard::gateway::{GatewaySupervisor, SocketGateway, TerminalGateway};
use switchboard::memory::{HashEmbedding, MemoryIndex, MemoryIndexConfig, MemorySource};
use switchboard::orchestrator::Orchestrator;
use switchboard::relay::{BrowserRelay, RelayConfig};
use switchboard::security::SecurityFilter;
use switchboard::skills::{SkillsRegistry, SkillsRegistryConfig};
use switchboard::tool_policy::{ToolInfo, ToolPolicy};
use switchboard::validator::MessageValidator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum GatewayChoice {
    Cli,
    Socket,
    All,
}

#[derive(Debug, Parser)]
#[command(name = "switchboard", about = "A message switchboard runtime for AI agents")]
struct Args {
    /// Which gateways to run.
    #[arg(short, long, value_enum, default_value_t = GatewayChoice::Cli)]
    gateway: GatewayChoice,

    /// Path to the configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket gateway port.
    #[arg(short, long, default_value_t = 8765)]
    port: u16,

    /// Socket gateway host.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("switchboard=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = load_config(args.config.as_deref()).context("configuration")?;
    if args.port != 8765 {
        config.gateways.socket.port = args.port;
    }
    if args.host != "0.0.0.0" {
        config.gateways.socket.host = args.host.clone();
    }

    info!(gateway = ?args.gateway, "starting switchboard");
    run(config, args.gateway).await
}

async fn run(config: Config, gateway_choice: GatewayChoice) -> Result<()> {
    // Model provider: a missing or unknown provider is a fatal
    // configuration error.
    let provider: Arc<dyn ModelProvider> = match config.model.provider.as_str() {
        "echo" => Arc::new(EchoModel),
        other => bail!("unknown model provider '{other}'"),
    };

    // Memory index and its database.
    let db_path = DatabasePath::parse(&config.memory.db_path).context("memory db path")?;
    let connection = DatabaseConnection::initialize(db_path)
        .await
        .context("memory database")?;
    let embedder = Arc::new(HashEmbedding::new(config.memory.embedding_dimensions));
    let memory_index = Arc::new(MemoryIndex::new(
        connection,
        embedder,
        MemoryIndexConfig {
            chunk_size_tokens: config.memory.chunk_size,
            chunk_overlap_tokens: config.memory.chunk_overlap,
        },
    ));

    if !config.memory.paths.is_empty() {
        let paths: Vec<PathBuf> = config.memory.paths.iter().map(PathBuf::from).collect();
        match memory_index.sync(&paths, MemorySource::Memory).await {
            Ok(synced) => info!(files = synced, "memory paths synced"),
            Err(error) => warn!(%error, "initial memory sync failed"),
        }
    }

    // Conversation context store with its summarizer.
    let summarizer = Arc::new(Summarizer::new(Arc::clone(&provider)));
    let context_store = Arc::new(ContextStore::new(
        ContextStoreConfig {
            memory_path: PathBuf::from(&config.context.memory_path),
            max_history_tokens: config.context.max_history_tokens,
            summary_threshold_tokens: config.context.summary_threshold_tokens,
        },
        Compactor::new(CompactionConfig {
            strategy: config.context.compaction_strategy,
            min_messages_to_keep: config.context.min_messages_to_keep,
        }),
        summarizer,
    ));

    // Skills.
    let skills = Arc::new(SkillsRegistry::new(SkillsRegistryConfig {
        workspace_path: PathBuf::from(&config.skills.workspace_path),
        managed_path: config.skills.managed_path.as_ref().map(PathBuf::from),
        bundled_path: config.skills.bundled_path.as_ref().map(PathBuf::from),
        extra_paths: config.skills.extra_paths.iter().map(PathBuf::from).collect(),
        check_eligibility: config.skills.check_eligibility,
        available_providers: [config.model.provider.clone()].into(),
        config_flags: config.skills.flags.clone(),
    }));
    let skill_count = skills.load_skills().await;
    info!(count = skill_count, "skills loaded");

    // Tool catalog, shared between policy filtering and the brain.
    let tool_catalog: Vec<ToolInfo> = config
        .tools
        .catalog
        .iter()
        .map(|entry| ToolInfo {
            name: entry.name.clone(),
            group: entry.group,
            groups: entry.groups.clone(),
            approval_required: entry.approval_required,
            dangerous: entry.dangerous,
            admin_only: entry.admin_only,
        })
        .collect();
    let tool_descriptors: Vec<ToolDescriptor> = config
        .tools
        .catalog
        .iter()
        .map(|entry| ToolDescriptor {
            name: entry.name.clone(),
            description: entry.description.clone(),
        })
        .collect();

    let brain = Arc::new(AgentBrain::new(
        Arc::clone(&provider),
        Arc::clone(&skills),
        tool_descriptors,
        BrainConfig {
            bot_name: config.bot.name.clone(),
            ..BrainConfig::default()
        },
    ));
    brain.initialize();

    // Bus, supervisor, orchestrator.
    let (bus, consumer) = MessageBus::new(config.bus.capacity);
    let supervisor = GatewaySupervisor::new(
        config.supervisor.auto_restart,
        config.supervisor.max_restarts,
    );

    let orchestrator = Orchestrator::new(
        bus,
        consumer,
        Arc::clone(&context_store),
        MessageValidator::new(config.validation.clone()),
        SecurityFilter::new(config.security.clone()),
        AttachmentProcessor::new(None),
        brain,
        ToolPolicy::new(config.tools.policy.clone()),
        tool_catalog,
        Arc::clone(&supervisor),
    );

    // Gateways per the CLI selection, honoring per-gateway enable flags.
    let run_terminal = matches!(gateway_choice, GatewayChoice::Cli | GatewayChoice::All)
        && config.gateways.terminal.enabled;
    let run_socket = matches!(gateway_choice, GatewayChoice::Socket | GatewayChoice::All)
        && config.gateways.socket.enabled;

    let terminal = if run_terminal {
        let terminal = Arc::new(TerminalGateway::new("terminal"));
        supervisor
            .register(
                "terminal",
                Arc::clone(&terminal) as Arc<dyn switchboard::gateway::GatewayProvider>,
            )
            .await?;
        Some(terminal)
    } else {
        None
    };
    if run_socket {
        let socket = Arc::new(SocketGateway::new(
            "socket",
            config.gateways.socket.host.clone(),
            config.gateways.socket.port,
        ));
        supervisor
            .register(
                "socket",
                socket as Arc<dyn switchboard::gateway::GatewayProvider>,
            )
            .await?;
    }

    supervisor.set_message_handler(orchestrator.handler()).await;

    // Browser relay, an independent service sharing only the logger.
    let relay = if config.relay.enabled {
        let relay = BrowserRelay::new(RelayConfig {
            host: config.relay.host.clone(),
            port: config.relay.port,
        });
        relay.start().await.context("browser relay")?;
        Some(relay)
    } else {
        None
    };

    orchestrator.start().await;
    let results = supervisor.start_all().await;
    for (name, ok) in &results {
        if !ok {
            error!(gateway = %name, "gateway failed to start");
        }
    }

    wait_for_shutdown(terminal.as_deref()).await;

    // Teardown in reverse dependency order, each step bounded.
    info!("shutting down");
    supervisor.stop_all(Duration::from_secs(10)).await;
    orchestrator.stop(Duration::from_secs(5)).await;
    if let Some(relay) = &relay {
        relay.stop().await;
    }
    if tokio::time::timeout(Duration::from_secs(5), memory_index.close())
        .await
        .is_err()
    {
        warn!("memory index close timed out");
    }

    info!("shutdown complete");
    Ok(())
}

/// Block until SIGINT/SIGTERM, or until the interactive terminal gateway
/// asks to stop (the user typed `quit`).
async fn wait_for_shutdown(terminal: Option<&TerminalGateway>) {
    use switchboard::gateway::GatewayProvider as _;

    let signals = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("sigterm handler");
            tokio::select! {
                _ = ctrl_c => {},
                _ = term.recv() => {},
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
    };

    match terminal {
        Some(terminal) => {
            let stop = terminal.stop_signal();
            tokio::select! {
                () = stop.wait() => info!("terminal gateway requested shutdown"),
                () = signals => info!("shutdown signal received"),
            }
        }
        None => {
            signals.await;
            info!("shutdown signal received");
        }
    }
}
