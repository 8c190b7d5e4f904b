//! # TypeSynth CLI
//!
//! Parse a catalog DSL file, synthesize plans from a source type to a goal
//! type, and optionally execute the best plan.
//!
//! ## Usage
//!
//! ```bash
//! typesynth catalog.dsl Product CO2
//! typesynth catalog.dsl Product CO2 --execute 1000
//! typesynth catalog.dsl Fuel CO2 --execute 400 --provenance
//! ```

use anyhow::{bail, Context};
use clap::Parser;
use typesynth::{Config, ExecutionContext, Executor, SynthesisEngine, Value};

#[derive(Parser, Debug)]
#[command(name = "typesynth", about = "Type-directed pipeline synthesis")]
struct Args {
    /// Catalog DSL file path
    dsl_file: String,

    /// Source type name
    source_type: String,

    /// Goal type name
    goal_type: String,

    /// Execute the best plan with this input value
    #[arg(short, long)]
    execute: Option<f64>,

    /// Maximum search cost
    #[arg(short = 'c', long, default_value_t = 100.0)]
    max_cost: f64,

    /// Maximum number of plans to report
    #[arg(short = 'n', long, default_value_t = 10)]
    max_results: usize,

    /// Track provenance during execution and print the Turtle export
    #[arg(long)]
    provenance: bool,

    /// Configuration file (defaults to typesynth.toml lookup)
    #[arg(long)]
    config: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let engine = SynthesisEngine::from_dsl(
        &std::fs::read_to_string(&args.dsl_file)
            .with_context(|| format!("cannot read {}", args.dsl_file))?,
    )
    .context("catalog parse failed")?;

    if args.verbose {
        eprintln!("Types: {}", engine.catalog().type_count());
        eprintln!("Product Types: {}", engine.catalog().product_type_count());
        eprintln!("Functions: {}", engine.catalog().func_count());
    }

    let results = engine.synthesize_with(
        &args.source_type,
        &args.goal_type,
        args.max_cost,
        args.max_results,
    );

    if results.is_empty() {
        bail!(
            "no path found from {} to {}",
            args.source_type,
            args.goal_type
        );
    }

    let output = serde_json::json!({
        "goal": format!("{}->{}", args.source_type, args.goal_type),
        "plans": results.iter().map(|r| r.to_json()).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if let Some(input) = args.execute {
        let context = match &args.config {
            Some(path) => Config::from_file(path)
                .context("config load failed")?
                .into_context(),
            None => Config::load()
                .map(Config::into_context)
                .unwrap_or_else(|_| ExecutionContext::new()),
        };
        let context = if args.provenance {
            context.with_provenance()
        } else {
            context
        };

        let mut executor = Executor::new(context);
        let result = executor.execute_path(&results[0].path, &Value::Float(input))?;
        eprintln!("Result: {result}");

        if args.provenance {
            if let Some(graph) = executor.context().provenance() {
                println!("{}", graph.export_turtle());
            }
        }
    }

    Ok(())
}
