//! Glassbox CLI
//!
//! Compiles fitted additive models into SQL artifacts and verifies them
//! against the reference evaluator.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use glassbox_model::{Calibration, DeclaredTask, FittedAdditiveModel, Link, ModelExport, Task};
use glassbox_sql::{ExportConfig, SqlExporter};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "glassbox")]
#[command(author = "Glassbox Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile interpretable additive models to SQL", long_about = None)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a model and write `<run-dir>/model/ebm_in_sql.sql`
    Export {
        #[command(flatten)]
        model: ModelArgs,

        /// Run directory receiving the artifact
        #[arg(long)]
        run_dir: PathBuf,
    },
    /// Compile a model, run it in SQLite over a CSV file and compare with the model
    #[cfg(feature = "sqlite-verify")]
    Verify {
        #[command(flatten)]
        model: ModelArgs,

        /// CSV file with one column per feature
        #[arg(long)]
        data: PathBuf,

        /// Relative tolerance
        #[arg(long, default_value_t = glassbox_sql::verify::DEFAULT_TOLERANCE)]
        tolerance: f64,
    },
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Fitted model export (JSON)
    #[arg(short, long)]
    model: PathBuf,

    /// Run configuration (JSON or TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Calibration curve (JSON)
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// Declared task: binary, multiclass or regression; defaults to the task of the model's link
    #[arg(long)]
    task: Option<Task>,

    /// Comma-separated class labels expected in the model
    #[arg(long, value_delimiter = ',')]
    classes: Option<Vec<String>>,
}

struct Loaded {
    export: ModelExport,
    declared: DeclaredTask,
    calibration: Option<Calibration>,
    config: ExportConfig,
}

fn load(args: &ModelArgs) -> Result<Loaded> {
    info!("Loading model export from: {}", args.model.display());
    let export = ModelExport::load_json(&args.model).context("Failed to load model export")?;

    let config = ExportConfig::load(&args.config).context("Failed to load configuration")?;

    let calibration = args
        .calibration
        .as_deref()
        .map(load_calibration)
        .transpose()?;

    let task = match args.task {
        Some(task) => task,
        None => Link::from_export_name(&export.link)?.task(),
    };
    let mut declared = DeclaredTask::new(task);
    if let Some(classes) = &args.classes {
        declared = declared.with_classes(classes.clone());
    }

    Ok(Loaded {
        export,
        declared,
        calibration,
        config,
    })
}

fn load_calibration(path: &Path) -> Result<Calibration> {
    info!("Loading calibration curve from: {}", path.display());
    Calibration::load_json(path).context("Failed to load calibration curve")
}

fn introspect(loaded: &Loaded) -> Result<FittedAdditiveModel> {
    let model = glassbox_model::introspect(&loaded.export, &loaded.declared).context("Failed to introspect model")?;
    info!(
        "Model: {} task, {} features, {} output columns",
        model.task,
        model.features.len(),
        model.output_columns().len()
    );
    Ok(model)
}

fn run_export(args: &ModelArgs, run_dir: &Path) -> Result<()> {
    let loaded = load(args)?;
    let model = introspect(&loaded)?;

    let mut exporter = SqlExporter::new(&loaded.config);
    let path = exporter
        .export(&model, loaded.calibration.as_ref(), run_dir)
        .context("SQL export failed")?;

    info!("✓ Export completed");
    info!("  Artifact: {}", path.display());
    info!("  Model hash: {}", model.hash_hex()?);
    Ok(())
}

#[cfg(feature = "sqlite-verify")]
fn run_verify(args: &ModelArgs, data: &Path, tolerance: f64) -> Result<()> {
    use glassbox_sql::verify::{verify, Dataset};
    use glassbox_sql::Dialect;

    let loaded = load(args)?;
    let model = introspect(&loaded)?;

    // verification always executes in SQLite
    let config = ExportConfig {
        dialect: Dialect::Sqlite,
        ..loaded.config.clone()
    };
    let calibration = config.calibration.as_ref().and(loaded.calibration.as_ref());

    let compilation = SqlExporter::new(&config)
        .compile(&model, calibration)
        .context("SQL compilation failed")?;

    info!("Loading verification data from: {}", data.display());
    let dataset = Dataset::from_csv_path(data).context("Failed to load verification data")?;

    let report = verify(
        &model,
        calibration,
        &compilation.query,
        &config.input_table,
        &dataset,
        tolerance,
    )
    .context("Verification failed")?;

    info!("✓ Verification passed");
    info!("  Packaging: {}", compilation.query.packaging);
    info!("  Rows: {}", report.rows_checked);
    info!("  Max relative error: {:e}", report.max_relative_error);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    info!("Glassbox SQL export v{}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Command::Export { model, run_dir } => run_export(model, run_dir),
        #[cfg(feature = "sqlite-verify")]
        Command::Verify {
            model,
            data,
            tolerance,
        } => run_verify(model, data, *tolerance),
    }
}
