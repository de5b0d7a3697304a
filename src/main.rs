use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::net::TcpListener;
use tracing::{error, info};

use chronicle::{
    config::Config,
    create_router,
    events::EventKind,
    export::FileExporter,
    llm::create_adapter,
    mission::{MissionCriteria, MissionState},
    storage::{FileMissionStore, MemoryMissionStore, MissionStore},
    utils::init_logger,
    AppState, MissionEngine,
};

#[derive(Parser)]
#[command(name = "chronicle")]
#[command(
    author,
    version,
    about = "Mission orchestration engine for market research",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API (default)
    Serve,

    /// Run one mission in-process and print its events
    Run {
        /// Research goal
        #[arg(long)]
        goal: String,

        /// Number of well-researched entities wanted
        #[arg(long)]
        target: Option<usize>,

        /// Quality threshold in [0, 1]
        #[arg(long)]
        threshold: Option<f64>,

        #[arg(long, value_enum, default_value = "text")]
        output: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
enum OutputFormat {
    #[default]
    Text,
    /// One JSON event per line
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env()?;
    let _log_guard = init_logger(&config.logging);
    info!("Configuration loaded: {:?}", config.server);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Run {
            goal,
            target,
            threshold,
            output,
        } => run_mission(config, goal, target, threshold, output).await,
    }
}

fn build_engine(config: &Config, store: Arc<dyn MissionStore>) -> anyhow::Result<MissionEngine> {
    let adapter = create_adapter(&config.llm).context("Failed to create model adapter")?;
    let exporter = Arc::new(FileExporter::new(config.storage.export_dir.clone()));
    Ok(MissionEngine::new(
        config.mission.clone(),
        &config.llm,
        adapter,
        store,
        exporter,
    ))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let store = Arc::new(FileMissionStore::new(config.storage.data_dir.clone()));
    info!(data_dir = %store.data_dir().display(), "Using file mission store");
    let engine = build_engine(&config, store)?;

    // Periodically drop finished missions from memory
    let sweeper = engine.clone();
    let retention = config.mission.retention();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(600));
        loop {
            ticker.tick().await;
            sweeper.sweep_expired(retention).await;
        }
    });

    let state = AppState {
        engine,
        config: config.clone(),
    };
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid HOST/PORT")?;
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}

async fn run_mission(
    config: Config,
    goal: String,
    target: Option<usize>,
    threshold: Option<f64>,
    output: OutputFormat,
) -> anyhow::Result<()> {
    let engine = build_engine(&config, Arc::new(MemoryMissionStore::new()))?;

    let mut criteria = MissionCriteria::from_config(&config.mission);
    if let Some(target) = target {
        criteria.target_count = target;
        criteria.target_fixed = true;
    }
    if let Some(threshold) = threshold {
        criteria.quality_threshold = threshold;
    }

    let status = engine.start(&goal, criteria).await?;
    let mission_id = status.mission_id;
    let mut events = engine.subscribe(&mission_id, 1).await?;

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                match output {
                    OutputFormat::Json => println!("{}", serde_json::to_string(&event)?),
                    OutputFormat::Text if event.kind == EventKind::Heartbeat => {}
                    OutputFormat::Text => {
                        println!("[{:>4}] {:<8} {}", event.seq, event.kind.as_str(), event.data)
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!(mission_id = %mission_id, "Interrupted, cancelling mission");
                if let Err(err) = engine.cancel(&mission_id).await {
                    error!(error = %err, "Cancel failed");
                    break;
                }
            }
        }
    }

    let status = engine.status(&mission_id).await?;
    match status.state {
        MissionState::Completed => {
            if let Some(report) = &status.report {
                println!("\n{}", report.executive_summary);
            }
            for export in &status.exports {
                if let Some(file) = &export.file {
                    println!("{}: {}", export.format, file);
                }
            }
            Ok(())
        }
        state => anyhow::bail!(
            "mission {} ended {}: {}",
            mission_id,
            state,
            status.failure_reason.unwrap_or_default()
        ),
    }
}
