use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow};
use clap::{Parser, Subcommand, ValueHint};
use serde_json::to_writer_pretty;
use shipline::context::Context;
use shipline::modules;
use shipline::observability::log_snapshot;
use shipline::pipeline::load_build_pipeline;
use shipline::recipe::Recipe;
use shipline::registry::ModuleRegistry;
use shipline::validation::validate_recipe;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_tracing()?;

    match cli.command {
        Commands::Run {
            config,
            publish,
            print_metrics,
            metrics_json,
        } => run_pipeline(config, publish, print_metrics, metrics_json),
        Commands::Validate { config } => validate_cmd(config),
        Commands::ListModules => {
            list_modules();
            Ok(())
        }
    }
}

fn configure_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))?;

    Ok(())
}

fn run_pipeline(
    config: Option<PathBuf>,
    publish: bool,
    print_metrics: bool,
    metrics_json: Option<PathBuf>,
) -> Result<()> {
    let path = Recipe::detect_path(config.as_deref());
    let recipe = Recipe::load(&path)?;
    let pipeline = load_build_pipeline(build_registry(), &recipe)
        .with_context(|| format!("Failed to load pipeline: {}", path.display()))?;
    let metrics_handle = pipeline.metrics();

    let mut ctx = Context::new();
    if publish {
        ctx.env.set("SKIP_PUBLISH", "false");
    }
    pipeline.run_with(&mut ctx)?;

    info!(
        project = ctx.project_name.as_str(),
        version = ctx.version.as_str(),
        artifacts = ctx.artifacts.len(),
        "Pipeline completed"
    );

    if print_metrics || metrics_json.is_some() {
        let snapshot = metrics_handle.snapshot();
        if print_metrics {
            log_snapshot(&snapshot);
        }
        if let Some(path) = metrics_json {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create metrics directory: {}", parent.display())
                })?;
            }
            let file = File::create(&path)
                .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
            to_writer_pretty(file, &snapshot)
                .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
            info!(metrics = %path.display(), "Metrics JSON written");
        }
    }

    Ok(())
}

fn validate_cmd(config: Option<PathBuf>) -> Result<()> {
    let path = Recipe::detect_path(config.as_deref());
    let recipe = Recipe::load(&path)?;
    let report = validate_recipe(&recipe, build_registry());

    for warning in &report.warnings {
        warn!(file = %path.display(), "{warning}");
    }

    if report.is_ok() {
        info!(file = %path.display(), "Pipeline validation passed");
        Ok(())
    } else {
        for error_msg in &report.errors {
            error!(file = %path.display(), "{error_msg}");
        }
        Err(anyhow!(
            "Pipeline validation failed with {} error(s)",
            report.errors.len()
        ))
    }
}

fn list_modules() {
    let registry = build_registry();
    println!("Available modules:");
    for key in registry.known_modules() {
        let deps = registry.dependencies(key);
        if deps.is_empty() {
            println!("- {key}");
        } else {
            let deps: Vec<String> = deps.iter().map(ToString::to_string).collect();
            println!("- {key} (requires {})", deps.join(", "));
        }
    }
}

fn build_registry() -> Arc<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();
    modules::register_defaults(&mut registry);
    Arc::new(registry)
}

#[derive(Parser)]
#[command(
    name = "shipline",
    version,
    about = "Declarative build and release pipeline runner"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the setup, build and publish stages.
    Run {
        #[arg(long, value_hint = ValueHint::FilePath)]
        config: Option<PathBuf>,
        /// Enable the publish stage.
        #[arg(long)]
        publish: bool,
        #[arg(long)]
        print_metrics: bool,
        #[arg(long = "metrics-json")]
        metrics_json: Option<PathBuf>,
    },
    /// Check a pipeline file without running it.
    Validate {
        #[arg(long, value_hint = ValueHint::FilePath)]
        config: Option<PathBuf>,
    },
    ListModules,
}
