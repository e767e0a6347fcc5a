//! CLI entry point for evalpool-rs.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use evalpool_rs::cli::{Cli, Commands, ModelArgs};
use evalpool_rs::config::Config;
use evalpool_rs::engine::{available_engines, engine_by_name, Engine, ModelHandle};
use evalpool_rs::{BatchRunner, Device, EvaluationPool, NodeGroup, TensorMap};

/// Model settings after merging the config file with command-line flags.
struct ModelSetup {
    config: Config,
    path: PathBuf,
    device: Device,
    engine: Arc<dyn Engine>,
}

fn resolve_model(args: &ModelArgs) -> Result<ModelSetup> {
    let config = if let Some(config_path) = &args.config {
        Config::from_yaml_file(config_path)
            .with_context(|| format!("Failed to load config: {}", config_path.display()))?
    } else {
        Config::default()
    };

    let path = match args.model.clone().or_else(|| config.model.path.clone()) {
        Some(path) => path,
        None => bail!("No model given: pass --model or set model.path in the config"),
    };
    let device: Device = args
        .device
        .as_deref()
        .unwrap_or(&config.model.device)
        .parse()?;
    let engine = engine_by_name(args.engine.as_deref().unwrap_or(&config.model.engine))?;

    Ok(ModelSetup {
        config,
        path,
        device,
        engine,
    })
}

fn open_pool(setup: &ModelSetup, pool_size: Option<usize>) -> Result<EvaluationPool> {
    let size = pool_size.unwrap_or(setup.config.pool.size);
    info!("Using device: {}", setup.device);
    let pool = EvaluationPool::new(Arc::clone(&setup.engine));
    pool.initialize(size, &setup.path, setup.device.clone())
        .with_context(|| format!("Failed to load model: {}", setup.path.display()))?;
    Ok(pool)
}

fn load_input(input: &Path) -> Result<TensorMap> {
    info!("Loading input: {}", input.display());
    TensorMap::from_json_file(input)
        .with_context(|| format!("Failed to read input: {}", input.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Logs go to stderr so JSON on stdout stays machine-readable.
    FmtSubscriber::builder()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Eval {
            model,
            input,
            pool_size,
            format,
        } => {
            let setup = resolve_model(&model)?;
            let pool = open_pool(&setup, pool_size)?;
            let inputs = load_input(&input)?;

            info!("Running evaluation...");
            let outputs = pool.evaluate(&inputs)?;
            let stats = pool.stats();
            pool.shutdown();

            info!(
                "Evaluation complete: {} outputs in {:.2}ms",
                outputs.len(),
                stats.busy_time.as_secs_f64() * 1000.0
            );

            let output = serde_json::json!({
                "num_outputs": outputs.len(),
                "latency_ms": stats.busy_time.as_secs_f64() * 1000.0,
                "outputs": outputs.to_json_value()?,
            });

            if format == "pretty" {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{}", serde_json::to_string(&output)?);
            }
        }

        Commands::Run {
            model,
            input,
            pool_size,
            iterations,
            threads,
            format,
        } => {
            let setup = resolve_model(&model)?;
            let pool = open_pool(&setup, pool_size)?;
            let inputs = load_input(&input)?;

            let iterations = iterations.unwrap_or(setup.config.run.iterations);
            let threads = threads
                .or(setup.config.run.threads)
                .unwrap_or_else(|| pool.pool_size());
            let requests = vec![inputs; iterations];

            let report = BatchRunner::new(&pool).threads(threads).run(&requests)?;
            pool.shutdown();

            if let Some(err) = report.results.iter().find_map(|r| r.as_ref().err()) {
                warn!(
                    "{} of {} evaluations failed, first error: {}",
                    report.failed(),
                    iterations,
                    err
                );
            }

            if format == "json" {
                let output = serde_json::json!({
                    "succeeded": report.succeeded(),
                    "failed": report.failed(),
                    "throughput": report.stats.throughput(),
                    "error_rate": report.stats.error_rate(),
                    "stats": report.stats,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("{}", report.stats.summary());
            }
        }

        Commands::Info { model } => {
            let setup = resolve_model(&model)?;

            println!("evalpool-rs v{}", env!("CARGO_PKG_VERSION"));
            println!("engines: {}", available_engines().join(", "));
            println!();
            println!("Model: {}", setup.path.display());
            println!("Engine: {}", setup.engine.name());
            println!("Device: {}", setup.device);

            info!("Loading model...");
            let handle: Box<dyn ModelHandle> = setup
                .engine
                .load(&setup.path, &setup.device)
                .with_context(|| format!("Failed to load model: {}", setup.path.display()))?;
            let schema = handle.schema();
            println!(
                "Nodes: {} inputs, {} outputs",
                schema.dimensions(NodeGroup::Input).len(),
                schema.dimensions(NodeGroup::Output).len()
            );
            print!("{}", schema);
        }
    }

    Ok(())
}
