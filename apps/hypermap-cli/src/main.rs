//! Hypermap CLI - inspect and exercise a mapper registry.
//!
//! Command-line interface for hypermap. Mappers are declared in a TOML
//! manifest; the CLI registers them as trace mappers, then lists, checks,
//! plans or executes resolutions against the sealed registry.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use hypermap_core::{
    AvailableSet, BoundaryRequest, CONFIG_FILE_NAME, Resolver, ResolverConfig,
    SealedRegistry, ServeRuntime, TypeTag, Value,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

mod manifest;

use manifest::{MANIFEST_FILE_NAME, Manifest, render};

/// Hypermap - type-directed value resolution
///
/// Plans and runs chains of mappers declared in a manifest.
#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Mapper manifest to load
    #[arg(short, long, global = true, default_value = MANIFEST_FILE_NAME)]
    manifest: PathBuf,

    /// Resolver configuration file
    #[arg(short, long, global = true, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available hypermap commands
#[derive(Subcommand)]
enum Commands {
    /// List registered mappers in registration order
    Mappers,

    /// Report registry diagnostics
    ///
    /// Shows tags that only callers can supply and tags nothing consumes.
    Check,

    /// Print the plan for a conversion without running it
    Plan {
        /// Tags the caller holds
        #[arg(long = "have", value_name = "TAG")]
        have: Vec<String>,

        /// Tag to produce
        #[arg(long = "want", value_name = "TAG")]
        want: String,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a conversion and print the produced value
    Resolve {
        /// Values the caller holds, as TAG=VALUE
        #[arg(long = "have", value_name = "TAG=VALUE")]
        have: Vec<String>,

        /// Tag to produce
        #[arg(long = "want", value_name = "TAG")]
        want: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing subscriber
    init_tracing(cli.verbose);

    // Execute command
    if let Err(e) = run_command(cli).await {
        // Log with tracing
        error!("Command failed: {:#}", e);
        // Also print to stderr for CLI users
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Initialize tracing subscriber for structured logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = if verbose {
        EnvFilter::new("hypermap=debug,hypermap_core=debug")
    } else {
        EnvFilter::new("hypermap=info,hypermap_core=info")
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Execute the specified command
async fn run_command(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    let registry = load_registry(&cli.manifest, &config)?;

    match cli.command {
        Commands::Mappers => run_mappers(&registry),
        Commands::Check => run_check(&registry),
        Commands::Plan { have, want, json } => {
            info!("Planning conversion to {}", want);
            run_plan(&registry, &have, &want, json)
        }
        Commands::Resolve { have, want } => {
            info!("Resolving {}", want);
            run_resolve(registry, config, &have, &want).await
        }
    }
}

/// Load resolver configuration, falling back to defaults if the file is absent
fn load_config(path: &Path) -> Result<ResolverConfig> {
    ResolverConfig::load(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

/// Build and seal the registry described by the manifest
fn load_registry(path: &Path, config: &ResolverConfig) -> Result<Arc<SealedRegistry>> {
    let manifest = Manifest::load(path)?;
    let mut registry = config.registry();
    manifest.register_into(&mut registry)?;
    Ok(registry.seal())
}

/// Run the mappers command
fn run_mappers(registry: &SealedRegistry) -> Result<()> {
    if registry.is_empty() {
        println!("No mappers registered.");
        return Ok(());
    }

    for mapper in registry.mappers() {
        let inputs: Vec<&str> = mapper.inputs().iter().map(TypeTag::as_str).collect();
        let mut line = format!(
            "{:>4} {} ({}) -> {}",
            mapper.id().to_string(),
            mapper.name(),
            inputs.join(", "),
            mapper.output()
        );
        if let Some(source) = mapper.source() {
            line.push_str(&format!(" [{source}]"));
        }
        if mapper.is_pure() {
            line.push_str(" pure");
        }
        println!("{line}");
    }
    Ok(())
}

/// Run the check command
fn run_check(registry: &SealedRegistry) -> Result<()> {
    let graph = registry.graph();
    let sources = graph.source_tags();
    let sinks = graph.sink_tags();

    println!("{} mappers over {} tags", registry.len(), registry.tags().len());
    println!("\nCaller-supplied only (never produced):");
    for tag in &sources {
        let consumers: Vec<&str> = registry.mappers_consuming(tag.as_str()).map(|m| m.name()).collect();
        println!("  {tag}  <- used by {}", consumers.join(", "));
    }

    println!("\nFinal products (never consumed):");
    for tag in &sinks {
        println!("  {tag}");
    }

    // Tags that stay out of reach even with every caller-supplied tag present.
    let reachable = graph.reachable_from(sources.iter().copied());
    let unreachable: Vec<&TypeTag> = registry
        .produced_tags()
        .into_iter()
        .filter(|t| !reachable.contains(*t))
        .collect();
    if !unreachable.is_empty() {
        println!("\nUnreachable (part of a cycle with no entry point):");
        for tag in unreachable {
            println!("  {tag}");
        }
    }
    Ok(())
}

/// Run the plan command
fn run_plan(registry: &Arc<SealedRegistry>, have: &[String], want: &str, json: bool) -> Result<()> {
    let available: Vec<TypeTag> = have.iter().map(|t| TypeTag::from(t.as_str())).collect();
    let target = TypeTag::from(want);
    let plan = Resolver::new(Arc::clone(registry)).plan_for_tags(&available, &target)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print!("{plan}");
        if plan.is_empty() {
            println!();
        } else {
            println!("cost: {}", plan.cost());
        }
    }
    Ok(())
}

/// Run the resolve command
async fn run_resolve(
    registry: Arc<SealedRegistry>,
    config: ResolverConfig,
    have: &[String],
    want: &str,
) -> Result<()> {
    let available = parse_values(have)?;
    let runtime = ServeRuntime::new(registry, config)?;

    let resolution = runtime
        .resolve(BoundaryRequest::new(available, want))
        .await
        .with_context(|| format!("Failed to resolve `{want}`"))?;

    info!(
        steps = resolution.plan().len(),
        invocations = resolution.invocations(),
        "resolution complete"
    );
    println!("{}", render(resolution.value()));
    Ok(())
}

/// Parse `TAG=VALUE` pairs into an available set of string values
fn parse_values(pairs: &[String]) -> Result<AvailableSet> {
    let mut available = AvailableSet::new();
    for pair in pairs {
        let Some((tag, value)) = pair.split_once('=') else {
            bail!("Expected TAG=VALUE, got `{pair}`");
        };
        if tag.is_empty() {
            bail!("Empty tag in `{pair}`");
        }
        available.insert(tag, Value::hashed(value.to_string()));
    }
    Ok(available)
}
