use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use catalog_loader::client::{CatalogClient, DeleteMode, HttpCatalogClient, MemoryCatalog};
use catalog_loader::ingest::write_results_file;
use catalog_loader::{
    BulkLoader, CsvSource, DeltaEngine, HandlerRegistry, LoaderConfig, LoaderError,
    RecordSource, ReloadSemantic, StaticSchema, SubmitMode, init_logger,
};

#[derive(Parser, Debug)]
#[command(
    name = "catalog-loader",
    about = "Bulk load tabular entity descriptions into a metadata catalog",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a CSV export into the catalog.
    Load(LoadArgs),
    /// Compare two exports and print what a delta load would do.
    Delta(DeltaArgs),
}

#[derive(Args, Debug)]
struct LoadArgs {
    /// CSV file to load (`.gz` is decompressed).
    source: PathBuf,

    /// Only update entities that already exist in the catalog.
    #[arg(long)]
    update_only: bool,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    workers: Option<usize>,

    /// Columns whose blank values clear the stored value.
    #[arg(long = "overwrite-blank", num_args = 1..)]
    overwrite_blank: Vec<String>,

    /// Write one CSV line per entity outcome to this file.
    #[arg(long)]
    results: Option<PathBuf>,

    /// Exit with status 1 when any entity failed.
    #[arg(long)]
    fail_on_errors: bool,

    /// Previous export; enables delta mode.
    #[arg(long)]
    previous: Option<PathBuf>,

    /// In delta mode, reload every entity present in both exports.
    #[arg(long)]
    reload_all: bool,

    /// In delta mode, only compare and delete these types.
    #[arg(long = "delta-types", value_delimiter = ',')]
    delta_types: Vec<String>,

    /// `soft`, `hard` or `purge`.
    #[arg(long)]
    delete_mode: Option<DeleteMode>,

    /// JSON file with relationship declarations replacing the built-in ones.
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Identity cache persisted between runs.
    #[arg(long)]
    cache_file: Option<PathBuf>,

    /// Run against an in-memory catalog instead of the remote one.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct DeltaArgs {
    previous: PathBuf,
    current: PathBuf,

    #[arg(long)]
    reload_all: bool,

    #[arg(long)]
    container_segments: Option<usize>,

    /// Only compare these types.
    #[arg(long = "types", value_delimiter = ',')]
    types: Vec<String>,

    /// Write the delta here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logger();
    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Load(args) => load(args).await,
        Command::Delta(args) => delta(args),
    };

    match outcome {
        Ok(code) => code,
        Err(err) => {
            log::error!("{}", err);
            let _ = writeln!(io::stderr(), "error: {err}");
            ExitCode::from(2)
        }
    }
}

async fn load(args: LoadArgs) -> Result<ExitCode, LoaderError> {
    let mut config = LoaderConfig::from_env();
    let mut settings = config.settings.clone();
    if let Some(batch_size) = args.batch_size {
        settings = settings.with_batch_size(batch_size);
    }
    if let Some(workers) = args.workers {
        settings = settings.with_workers(workers);
    }
    if args.update_only {
        settings = settings.with_mode(SubmitMode::UpdateOnly);
    }
    if !args.overwrite_blank.is_empty() {
        settings = settings.with_overwrite_blank(args.overwrite_blank.iter().cloned());
    }
    if let Some(mode) = args.delete_mode {
        settings = settings.with_delete_mode(mode);
    }
    config.settings = settings;
    if args.reload_all {
        config.delta = config.delta.with_reload(ReloadSemantic::ReloadAll);
    }
    if !args.delta_types.is_empty() {
        config.delta = config.delta.with_types(args.delta_types);
    }

    let client: Arc<dyn CatalogClient> = if args.dry_run {
        log::info!("Dry run: writing to an in-memory catalog");
        Arc::new(MemoryCatalog::new())
    } else {
        Arc::new(HttpCatalogClient::new(config.catalog.clone())?)
    };

    let mut loader = BulkLoader::new(config, client);
    if let Some(path) = &args.schema {
        let schema = StaticSchema::from_json_file(path).map_err(LoaderError::Schema)?;
        loader = loader.with_schema(Arc::new(schema));
    }
    if let Some(path) = &args.cache_file {
        loader = loader.with_cache_file(path);
    }

    let current = CsvSource::open(&args.source)?;
    let previous = args.previous.as_deref().map(CsvSource::open).transpose()?;

    let previous = previous.as_ref().map(|p| p as &dyn RecordSource);
    let run = loader.load(&current, previous).await?;

    run.report.log_summary();
    if let Some(path) = &args.results {
        write_results_file(path, &run.report.results)?;
    }

    Ok(ExitCode::from(run.report.exit_code(args.fail_on_errors) as u8))
}

fn delta(args: DeltaArgs) -> Result<ExitCode, LoaderError> {
    let mut config = LoaderConfig::from_env().delta;
    if args.reload_all {
        config = config.with_reload(ReloadSemantic::ReloadAll);
    }
    if let Some(segments) = args.container_segments {
        config = config.with_container_segments(segments);
    }
    if !args.types.is_empty() {
        config = config.with_types(args.types);
    }

    let previous = CsvSource::open(&args.previous)?;
    let current = CsvSource::open(&args.current)?;
    let result = DeltaEngine::new(config).compute_from_sources(
        &previous,
        &current,
        &HandlerRegistry::builtin(),
    )?;

    let json = serde_json::to_string_pretty(&result)
        .map_err(|err| LoaderError::Io(io::Error::other(err)))?;
    match &args.output {
        Some(path) => write_output(path, &json)?,
        None => writeln!(io::stdout(), "{json}")?,
    }

    Ok(ExitCode::SUCCESS)
}

fn write_output(path: &Path, json: &str) -> io::Result<()> {
    std::fs::write(path, json)?;
    log::info!("Wrote delta to {}", path.display());
    Ok(())
}
