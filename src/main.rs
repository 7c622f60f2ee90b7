use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sequential_analysis::{
    analysis::{AnalysisController, Document},
    config::{Config, LogFormat},
    langbase::LangbaseClient,
    prompts::{
        CROSS_REFERENCE_PROMPT, DEEP_ANALYSIS_PROMPT, HYPOTHESIS_GENERATION_PROMPT,
        RECURSIVE_REFINEMENT_PROMPT, SURFACE_EXTRACTION_PROMPT,
    },
};

#[derive(Parser, Debug)]
#[command(name = "seqanalysis", version, about = "Sequential deepening analysis over Langbase Pipes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a document and print the finished session as JSON
    Analyze {
        /// Path to the document text
        #[arg(long)]
        file: PathBuf,

        /// Document id (defaults to the file stem)
        #[arg(long)]
        id: Option<String>,

        /// Document title
        #[arg(long)]
        title: Option<String>,

        /// Document source URL
        #[arg(long)]
        url: Option<String>,

        /// Maximum number of stages to execute (1-10)
        #[arg(long)]
        depth: Option<u32>,

        /// Maximum number of stages to schedule
        #[arg(long)]
        max_stages: Option<usize>,

        /// Stop when a stage reports confidence below this
        #[arg(long)]
        threshold: Option<f64>,

        /// Per-stage deadline in milliseconds
        #[arg(long)]
        stage_timeout_ms: Option<u64>,

        /// Skip cross-reference validation
        #[arg(long)]
        no_cross_reference: bool,

        /// Skip hypothesis generation
        #[arg(long)]
        no_hypotheses: bool,
    },

    /// Create or update the five stage pipes
    SetupPipes,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Sequential analysis starting..."
    );

    let langbase = match LangbaseClient::new(&config.langbase, config.request.clone()) {
        Ok(c) => {
            info!(base_url = %config.langbase.base_url, "Langbase client initialized");
            c
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize Langbase client");
            return Err(e.into());
        }
    };

    match cli.command {
        Commands::SetupPipes => setup_pipes(&config, &langbase).await,
        Commands::Analyze {
            file,
            id,
            title,
            url,
            depth,
            max_stages,
            threshold,
            stage_timeout_ms,
            no_cross_reference,
            no_hypotheses,
        } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read document {}", file.display()))?;
            let id = id
                .or_else(|| file.file_stem().map(|s| s.to_string_lossy().into_owned()))
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            let mut document = Document::new(id, content);
            if let Some(title) = title {
                document = document.with_title(title);
            }
            if let Some(url) = url {
                document = document.with_url(url);
            }

            let mut analysis = config.analysis.clone();
            if let Some(depth) = depth {
                analysis = analysis.with_depth(depth);
            }
            if let Some(max_stages) = max_stages {
                analysis = analysis.with_max_stages(max_stages);
            }
            if let Some(threshold) = threshold {
                analysis = analysis.with_confidence_threshold(threshold);
            }
            if let Some(timeout_ms) = stage_timeout_ms {
                analysis = analysis.with_timeout_per_stage_ms(timeout_ms);
            }
            if no_cross_reference {
                analysis = analysis.with_cross_reference(false);
            }
            if no_hypotheses {
                analysis = analysis.with_hypotheses(false);
            }

            analyze(&config, langbase, document, analysis).await
        }
    }
}

async fn setup_pipes(config: &Config, langbase: &LangbaseClient) -> anyhow::Result<()> {
    let pipes = [
        (&config.pipes.surface, "Surface entity extraction", SURFACE_EXTRACTION_PROMPT),
        (&config.pipes.deep_analysis, "Deep relationship analysis", DEEP_ANALYSIS_PROMPT),
        (&config.pipes.cross_reference, "Cross-reference validation", CROSS_REFERENCE_PROMPT),
        (&config.pipes.hypothesis, "Hypothesis generation", HYPOTHESIS_GENERATION_PROMPT),
        (&config.pipes.refinement, "Recursive refinement", RECURSIVE_REFINEMENT_PROMPT),
    ];

    info!("Ensuring stage pipes exist...");
    for (name, description, prompt) in pipes {
        if let Err(e) = langbase.ensure_pipe(name, description, prompt).await {
            error!(pipe = %name, error = %e, "Failed to ensure pipe exists");
            return Err(e.into());
        }
    }
    info!("All stage pipes ready");
    Ok(())
}

async fn analyze(
    config: &Config,
    langbase: LangbaseClient,
    document: Document,
    analysis: sequential_analysis::AnalysisConfig,
) -> anyhow::Result<()> {
    let controller = Arc::new(
        AnalysisController::new(Arc::new(langbase), &config.pipes)
            .with_defaults(config.analysis.clone()),
    );
    let sweeper = controller.spawn_retention_sweeper(
        Duration::from_secs(config.retention.sweep_interval_secs),
        Duration::from_secs(config.retention.max_age_secs),
    );

    let session = controller.start_analysis(document, Some(analysis))?;
    info!(session_id = %session.id, stages = session.stages.len(), "Analysis running");

    let finished = tokio::select! {
        result = controller.wait_for_completion(&session.id) => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!(session_id = %session.id, "Interrupted, terminating session");
            controller.terminate_session(&session.id)?;
            controller.wait_for_completion(&session.id).await?
        }
    };

    controller.shutdown().await;
    sweeper.await.context("Retention sweeper panicked")?;

    println!("{}", serde_json::to_string_pretty(&finished)?);

    info!(status = %finished.status, "Analysis finished");
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
