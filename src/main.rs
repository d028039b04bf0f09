//! Statistical Analysis Orchestrator demo
//!
//! Usage: analysis-orchestrator <dataset.json> [purpose] [group_var]
//!
//! Profiles the dataset, checks assumptions, prints the recommendation and
//! the result of running it on the in-process simulated backend.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::info;

use analysis_orchestrator::config::ConfigLoader;
use analysis_orchestrator::decision::Purpose;
use analysis_orchestrator::runtime::ProgressEvent;
use analysis_orchestrator::{DataProfile, Dataset, Orchestrator, SimulatedBackend, VariableSelection};

const DEFAULT_CONFIG_PATH: &str = "orchestrator.json";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    #[cfg(feature = "otel")]
    let _otel = analysis_orchestrator::telemetry::otel::init_telemetry("analysis-orchestrator")?;
    #[cfg(not(feature = "otel"))]
    analysis_orchestrator::telemetry::init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(dataset_path) = args.first() else {
        bail!("usage: analysis-orchestrator <dataset.json> [purpose] [group_var]");
    };
    let purpose: Purpose = match args.get(1) {
        Some(p) => p.parse()?,
        None => Purpose::CompareGroups,
    };
    let selection = args.get(2).map(|g| VariableSelection {
        group_variable: Some(g.clone()),
        ..Default::default()
    });

    let config_path = std::env::var("ORCHESTRATOR_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = ConfigLoader::new(&config_path).load().await?;
    config.apply_env();
    info!("Configuration loaded from {}", config_path);

    let text = tokio::fs::read_to_string(dataset_path)
        .await
        .with_context(|| format!("reading {}", dataset_path))?;
    let dataset = Dataset::from_json(&text).with_context(|| format!("parsing {}", dataset_path))?;

    let orchestrator = Orchestrator::new(Arc::new(SimulatedBackend::new()), config)?;
    let progress = orchestrator.runtime().on_progress(|event: &ProgressEvent| {
        let cached = if event.from_cache { " (cached)" } else { "" };
        println!("  [{:>3}%] {:?}{}", event.percent, event.stage, cached);
    });

    let profile = DataProfile::from_dataset(&dataset);
    println!("\n{}", "═".repeat(60));
    println!(
        "Dataset: {} rows, {} numeric, {} categorical",
        profile.row_count, profile.numeric_var_count, profile.categorical_var_count
    );
    println!("Purpose: {}", purpose);
    println!("{}\n", "═".repeat(60));

    let outcome = orchestrator
        .recommend_and_run(purpose, &dataset, selection.as_ref())
        .await;
    progress.unsubscribe();
    let outcome = outcome?;

    let rec = &outcome.recommendation;
    println!("\nRecommended: {} ({:.0}% confidence)", rec.method.display_name(), rec.confidence * 100.0);
    println!("Why: {}", rec.rationale);
    if let Some(post_hoc) = rec.post_hoc {
        println!("Post-hoc: {}", post_hoc.display_name());
    }
    if !rec.alternative_methods.is_empty() {
        let names: Vec<&str> = rec.alternative_methods.iter().map(|m| m.display_name()).collect();
        println!("Alternatives: {}", names.join(", "));
    }
    println!("\nVariables:\n{}", serde_json::to_string_pretty(&rec.detected_variables)?);
    println!("\nAssumptions:\n{}", serde_json::to_string_pretty(&outcome.assumptions)?);
    println!("\nResult:\n{}", serde_json::to_string_pretty(outcome.result.as_ref())?);
    println!("\nUsage:\n{}", serde_json::to_string_pretty(&orchestrator.stats().snapshot())?);

    orchestrator.shutdown().await;
    Ok(())
}
