//! CLI entry point for apa-core orchestration.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use apa_core::{
    global_budget, AnthropicClient, CaptureMode, ClientConfig, Compiler, EventBus, Fingerprinter,
    GraphRepository, HandlerRegistry, Orchestrator, ReconToolbox, RunGuard, Settings,
};

#[derive(Parser)]
#[command(name = "apa", about = "Autonomous web-application penetration agent", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Fingerprint the target and run one orchestration cycle (default)
    Run {
        /// Capture file override
        #[arg(long)]
        traffic_file: Option<String>,
        /// Target profile override
        #[arg(long)]
        profile: Option<String>,
        /// Target URL override
        #[arg(long)]
        target_url: Option<String>,
    },
    /// Sever the latest compiled graph for the target, forcing a recompile
    Break {
        /// Capture file override
        #[arg(long)]
        traffic_file: Option<String>,
    },
    /// Wipe the knowledge graph store and recreate the schema
    Reset,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("configuration error: {}", err);
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone())),
        )
        .init();

    match run(cli, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "aborting");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, mut settings: Settings) -> apa_core::Result<()> {
    let command = cli.command.unwrap_or(Command::Run {
        traffic_file: None,
        profile: None,
        target_url: None,
    });

    let repo = Arc::new(GraphRepository::open(&settings.store_path)?);

    match command {
        Command::Reset => {
            repo.reset()?;
            info!("knowledge graph store wiped and schema recreated");
            Ok(())
        }
        Command::Break { traffic_file } => {
            if let Some(file) = traffic_file {
                settings.traffic_file = file;
            }
            let fingerprint = fingerprint_capture(&settings)?;
            let hash = fingerprint.hash.clone().unwrap_or_default();
            let corrupted = repo.corrupt_action_graph(&hash)?;
            info!(hash = %&hash[..12.min(hash.len())], corrupted, "break requested");
            Ok(())
        }
        Command::Run {
            traffic_file,
            profile,
            target_url,
        } => {
            if let Some(file) = traffic_file {
                settings.traffic_file = file;
            }
            if let Some(profile) = profile {
                settings.target_profile = profile;
            }
            if let Some(url) = target_url {
                settings.target_url = url;
            }
            run_once(repo, &settings).await
        }
    }
}

fn fingerprint_capture(settings: &Settings) -> apa_core::Result<apa_core::Fingerprint> {
    let flows = apa_core::read_flows(&settings.traffic_file)?;
    let transcript = apa_core::render_transcript(&flows);
    let mut fingerprint = Fingerprinter::new().fingerprint(&transcript);
    fingerprint.ensure_hash();
    Ok(fingerprint)
}

async fn run_once(repo: Arc<GraphRepository>, settings: &Settings) -> apa_core::Result<()> {
    if settings.capture_mode == CaptureMode::Live {
        // Live capture is recorded by the external proxy into the same
        // flow format; by the time a run starts the file is on disk.
        info!("live mode: reading proxy-recorded capture");
    }

    let _guard = RunGuard::acquire()?;

    let budget = global_budget();
    budget.set_max(settings.max_token_budget);
    budget.reset();

    let profile = apa_core::get_profile(Some(&settings.target_profile))?;
    let client = Arc::new(AnthropicClient::new(
        ClientConfig::new(settings.anthropic_api_key.clone())
            .with_default_model(settings.model_id.clone()),
    ));
    let compiler = Compiler::new(
        client,
        budget,
        Some(settings.model_id.clone()),
        settings.max_critic_iterations,
    );

    let toolbox = ReconToolbox::load(&settings.traffic_file)?;
    let fingerprint = fingerprint_capture(settings)?;
    info!(
        tech_stack = %fingerprint.tech_stack,
        auth_model = %fingerprint.auth_model,
        endpoint_pattern = %fingerprint.endpoint_pattern,
        "fingerprinted target"
    );

    let orchestrator = Orchestrator::new(
        repo,
        compiler,
        HandlerRegistry::with_defaults(),
        EventBus::default(),
        settings.target_url.clone(),
        profile,
    );

    let result = orchestrator
        .run(fingerprint, &toolbox, &settings.traffic_file)
        .await?;

    info!(path = %result.path, compiled = result.compiled, repaired = result.repaired, "orchestration complete");
    if let Some(execution) = &result.execution {
        info!(
            success = execution.success,
            steps_executed = execution.steps_executed,
            findings = execution.findings.len(),
            "execution summary"
        );
    }
    Ok(())
}
