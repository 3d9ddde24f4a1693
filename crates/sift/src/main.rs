//! Classify a directory of security incidents with a language model.
//!
//! # Examples
//!
//! ```sh
//! # Dry run against the keyword mock
//! sift data/ --columns title description --model mock --technique progressive_hint
//!
//! # Local Ollama model, hypothesis testing, JSON output
//! sift data/ --columns description --model ollama --technique hypothesis_testing --output json
//!
//! # Single-call baseline
//! sift data/ --columns description --model mock --technique zeroshot
//!
//! # Override loop parameters
//! sift data/ --columns description --model gpt --technique self_hint \
//!   --max-iterations 6 --threshold 0.8 --concurrency 4
//!
//! # Inspect the configuration
//! sift --list-models
//! sift --print-config-schema
//! ```

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use sift::api::RunMetrics;
use sift::config::{DEFAULT_CONFIG_PATH, ExperimentConfig};
use sift::io::{OutputFormat, load_incidents, save_results, validate_columns};
use sift::model::ModelClient;
use sift::runner::IncidentRunner;
use sift::technique::TechniqueParams;
use sift::technique::events::{CompositeEventHandler, LoggingHandler, ProgressHandler};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Classify security incidents with iterative and single-call prompting techniques.
#[derive(Parser)]
#[command(name = "sift", version)]
struct Cli {
    /// Directory (searched recursively) or file of .csv/.json incidents
    #[arg(required_unless_present_any = ["list_models", "list_techniques", "info", "print_config_schema"])]
    input_dir: Option<PathBuf>,

    /// Columns rendered into the prompt, in order
    #[arg(long, num_args = 1..)]
    columns: Vec<String>,

    /// Model entry from the config
    #[arg(long)]
    model: Option<String>,

    /// Prompting technique
    #[arg(long, default_value = "progressive_hint")]
    technique: String,

    /// Deprecated: legacy technique mode, overrides --technique
    #[arg(long, value_parser = ["php", "shp", "prp", "htp"])]
    mode: Option<String>,

    // ── Files ──────────────────────────────────────────────────
    /// Experiment configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Result file format
    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    output: OutputFormat,

    /// Directory for result files
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    // ── Technique overrides ────────────────────────────────────
    /// Iteration ceiling (hints for progressive_hint)
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Convergence threshold (0.0 – 1.0)
    #[arg(long, visible_alias = "rouge-threshold")]
    threshold: Option<f64>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Maximum tokens per response
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Incidents processed at once
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    // ── Inspection ─────────────────────────────────────────────
    /// List configured models and exit
    #[arg(long)]
    list_models: bool,

    /// List enabled techniques and exit
    #[arg(long)]
    list_techniques: bool,

    /// Print framework information and exit
    #[arg(long)]
    info: bool,

    /// Print the config file's JSON Schema and exit
    #[arg(long)]
    print_config_schema: bool,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = tokio::select! {
        result = run(cli) => match result {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("Error: {e}");
                1
            }
        },
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted");
            130
        }
    };
    process::exit(code);
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> Result<(), String> {
    if cli.print_config_schema {
        let schema = serde_json::to_string_pretty(&ExperimentConfig::json_schema())
            .map_err(|e| format!("failed to render schema: {e}"))?;
        println!("{schema}");
        return Ok(());
    }

    let config = ExperimentConfig::load_or_default(&cli.config)?;
    if cli.list_models || cli.list_techniques || cli.info {
        print_listings(&cli, &config);
        return Ok(());
    }

    // ── Setup ──────────────────────────────────────────────────
    let technique_name = match &cli.mode {
        Some(mode) => {
            warn!("--mode is deprecated; use --technique");
            mode.as_str()
        }
        None => cli.technique.as_str(),
    };
    let (technique, configured) = config.technique(technique_name)?;
    let overrides = TechniqueParams {
        max_iter: cli.max_iterations,
        threshold: cli.threshold,
        temperature: cli.temperature,
        max_tokens: cli.max_tokens,
        ..Default::default()
    };
    let params = configured.merged(&overrides);
    params.validate()?;

    if cli.columns.is_empty() {
        return Err("at least one --columns value is required".into());
    }
    let input = cli
        .input_dir
        .as_deref()
        .ok_or("an input directory is required")?;
    let incidents = load_incidents(input)?;
    validate_columns(&incidents, &cli.columns)?;

    let model_name = cli
        .model
        .as_deref()
        .ok_or("--model is required (see --list-models)")?;
    let metrics = RunMetrics::new();
    let metrics = Arc::new(if config.logging.interactions {
        metrics.with_interaction_log(config.logging.log_dir.clone())
    } else {
        metrics
    });
    let client = ModelClient::from_config(model_name, config.model(model_name)?, metrics.clone())?;
    match client.health_check().await {
        Some(Ok(version)) => info!("Ollama server is up (version {version})"),
        Some(Err(e)) => warn!("Ollama health check failed: {e}. Calls may fail."),
        None => {}
    }

    // ── Run ────────────────────────────────────────────────────
    let started = Instant::now();
    let handler = CompositeEventHandler::new()
        .with(LoggingHandler)
        .with(ProgressHandler::new());
    let runner = IncidentRunner::new(&client, technique)
        .with_columns(cli.columns.clone())
        .with_definitions(config.nist_categories.enabled)
        .with_params(params)
        .with_scorer(config.scorer)
        .with_event_handler(&handler)
        .with_concurrency(cli.concurrency);
    let records = runner.run(&incidents).await;

    let path = save_results(
        &records,
        &cli.output_dir,
        model_name,
        technique.name(),
        cli.output,
    )?;

    // ── Summary ────────────────────────────────────────────────
    let snapshot = metrics.snapshot();
    let errors = records.iter().filter(|r| r.error).count();
    println!("Run:        {}", snapshot.run_id);
    println!("Model:      {model_name}");
    println!("Technique:  {technique} (scorer: {})", config.scorer.label());
    println!("Incidents:  {}", incidents.len());
    println!("Records:    {} ({errors} error(s))", records.len());
    println!("Output:     {}", path.display());
    println!("Usage:      {}", snapshot.summary());
    println!("Elapsed:    {:.1}s", started.elapsed().as_secs_f64());
    Ok(())
}

fn print_listings(cli: &Cli, config: &ExperimentConfig) {
    if cli.info {
        println!("{} {}", config.framework.name, config.framework.version);
        println!(
            "Category definitions in prompts: {}",
            if config.nist_categories.enabled { "on" } else { "off" }
        );
        println!("Scorer: {}", config.scorer.label());
        println!();
    }
    if cli.list_models || cli.info {
        println!("Models:");
        for (name, model) in &config.models {
            println!(
                "  {name:<20} {:<8} {}",
                format!("{:?}", model.backend).to_lowercase(),
                model.description.as_deref().unwrap_or("")
            );
        }
    }
    if cli.list_techniques || cli.info {
        println!("Techniques:");
        for (name, technique, description) in config.enabled_techniques() {
            println!("  {name:<28} [{}] {description}", technique.mode());
        }
    }
}
