//! Strata - declarative service orchestration planner

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use strata::planner::{Catalog, Planner};

/// Strata - derive routing, compute, autoscaling, CDN, and certificate
/// resources from a declarative service catalog
#[derive(Parser, Debug)]
#[command(name = "strata", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Plan the catalog: print every derived resource and certificate request
    ///
    /// Per-service failures are reported on stderr; the surviving services
    /// still produce a plan, and the exit code reflects whether the whole
    /// catalog made it through.
    Plan(PlanArgs),

    /// Print the dependency-ordered creation (or destruction) levels
    Order(OrderArgs),
}

/// Shared catalog-file arguments
#[derive(Parser, Debug)]
struct PlanArgs {
    /// Path to the catalog file (YAML or JSON)
    #[arg(short = 'f', long = "config")]
    config_file: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
    output: OutputFormat,
}

#[derive(Parser, Debug)]
struct OrderArgs {
    /// Path to the catalog file (YAML or JSON)
    #[arg(short = 'f', long = "config")]
    config_file: PathBuf,

    /// Print destruction order instead of creation order
    #[arg(long)]
    destroy: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
    output: OutputFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Plan(args) => run_plan(args),
        Commands::Order(args) => run_order(args),
    }
}

/// Read and parse the catalog file, YAML or JSON by extension
fn load_catalog(path: &Path) -> anyhow::Result<Catalog> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read catalog file {:?}: {}", path, e))?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse catalog: {}", e))
    } else {
        serde_yaml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse catalog: {}", e))
    }
}

fn emit<T: serde::Serialize>(value: &T, format: OutputFormat) -> anyhow::Result<()> {
    let rendered = match format {
        OutputFormat::Yaml => serde_yaml::to_string(value)
            .map_err(|e| anyhow::anyhow!("Failed to serialize output: {}", e))?,
        OutputFormat::Json => serde_json::to_string_pretty(value)
            .map_err(|e| anyhow::anyhow!("Failed to serialize output: {}", e))?,
    };
    println!("{rendered}");
    Ok(())
}

fn run_plan(args: PlanArgs) -> anyhow::Result<()> {
    let catalog = load_catalog(&args.config_file)?;
    let outcome = Planner::new(&catalog.global).plan(&catalog.services)?;

    emit(&outcome.plan, args.output)?;

    if !outcome.is_clean() {
        for (service, error) in &outcome.failures {
            eprintln!("error: {service}: {error}");
        }
        anyhow::bail!(
            "{} of {} catalog entries failed; see errors above",
            outcome.failures.len(),
            catalog.services.len()
        );
    }
    Ok(())
}

fn run_order(args: OrderArgs) -> anyhow::Result<()> {
    let catalog = load_catalog(&args.config_file)?;
    let outcome = Planner::new(&catalog.global).plan(&catalog.services)?;
    let graph = outcome.plan.resource_graph();

    let levels = if args.destroy {
        graph.destruction_levels()?
    } else {
        graph.creation_levels()?
    };

    let rendered: Vec<Vec<String>> = levels
        .iter()
        .map(|level| level.iter().map(ToString::to_string).collect())
        .collect();
    emit(&rendered, args.output)?;

    if !outcome.is_clean() {
        anyhow::bail!(
            "{} catalog entries failed and are missing from the order",
            outcome.failures.len()
        );
    }
    Ok(())
}
