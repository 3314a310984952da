use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use bravo_ingest::app::{App, GeneModelFiles};
use bravo_ingest::config::{ConfigLoader, ResolvedConfig};
use bravo_ingest::domain::BulkMode;
use bravo_ingest::error::IngestError;
use bravo_ingest::output::{ConsoleOutput, OutputMode};
use bravo_ingest::store::SqliteStore;

#[derive(Parser)]
#[command(name = "bravo-ingest")]
#[command(about = "Loads genomic reference and variant data into the BRAVO document store")]
#[command(version, author)]
struct Cli {
    /// JSON configuration file (defaults to $BRAVO_CONFIG_FILE, then ./bravo.json).
    #[arg(long, global = true)]
    config: Option<Utf8PathBuf>,

    /// Print a JSON summary instead of progress lines.
    #[arg(long, global = true)]
    json: bool,

    /// Overrides the configured bulk write mode.
    #[arg(long, global = true)]
    bulk_mode: Option<BulkMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Creates and populates the genes, transcripts and exons collections")]
    LoadGenes(GenesArgs),
    #[command(about = "Creates the users collection")]
    LoadUsers,
    #[command(about = "Creates and populates the whitelist collection")]
    LoadWhitelist(WhitelistArgs),
    #[command(about = "Creates and populates the dbSNP collection")]
    LoadDbsnp(DbsnpArgs),
    #[command(about = "Creates and populates the metrics collection")]
    LoadMetrics(MetricsArgs),
    #[command(about = "Creates and populates the variants collection")]
    LoadVariants(VariantsArgs),
    #[command(about = "Creates the sequence cache collection with its unique index")]
    CreateSequenceCache,
    #[command(about = "Creates and populates a named collection of additional variants")]
    LoadCustomVariants(CustomVariantsArgs),
    #[command(about = "Adds quality metric percentiles to existing variants")]
    LoadPercentiles(VariantsArgs),
    #[command(about = "Sets extra fields on existing variants")]
    UpdateVariants(VariantsArgs),
}

#[derive(Args)]
struct GenesArgs {
    /// Canonical transcripts (gzip, two columns: gene ID, transcript ID).
    #[arg(short = 't', long = "canonical-transcripts")]
    canonical_transcripts: Utf8PathBuf,
    /// OMIM gene descriptions (gzip, tab-delimited with header).
    #[arg(short = 'm', long)]
    omim: Utf8PathBuf,
    /// HGNC gene names (gzip, tab-delimited with header).
    #[arg(short = 'f', long)]
    genenames: Utf8PathBuf,
    /// GENCODE gene models (gzip GTF).
    #[arg(short = 'g', long)]
    gencode: Utf8PathBuf,
}

#[derive(Args)]
struct WhitelistArgs {
    /// One email per line.
    #[arg(short = 'w', long)]
    whitelist: Utf8PathBuf,
}

#[derive(Args)]
struct DbsnpArgs {
    /// bgzip-compressed, tabix-indexed dbSNP files.
    #[arg(short = 'd', long, num_args = 1.., required = true)]
    dbsnp: Vec<Utf8PathBuf>,
    #[arg(short = 't', long, default_value_t = 1)]
    threads: usize,
}

#[derive(Args)]
struct MetricsArgs {
    /// One JSON metric per line.
    #[arg(short = 'm', long)]
    metrics: Utf8PathBuf,
}

#[derive(Args)]
struct VariantsArgs {
    /// bgzip-compressed, indexed sites-only VCF files.
    #[arg(short = 'v', long, num_args = 1.., required = true)]
    variants: Vec<Utf8PathBuf>,
    #[arg(short = 't', long, default_value_t = 1)]
    threads: usize,
}

#[derive(Args)]
struct CustomVariantsArgs {
    #[arg(short = 'v', long, num_args = 1.., required = true)]
    variants: Vec<Utf8PathBuf>,
    /// Target collection name.
    #[arg(short = 'n', long)]
    name: String,
    #[arg(short = 't', long, default_value_t = 1)]
    threads: usize,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<IngestError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &IngestError) -> u8 {
    match error {
        error if error.is_setup() => 2,
        IngestError::UnknownContig { .. } => 2,
        IngestError::StoreConnect(_)
        | IngestError::Store(_)
        | IngestError::BulkWrite { .. }
        | IngestError::DuplicateKeys { .. } => 3,
        IngestError::WorkUnitsFailed { .. } | IngestError::WorkerPanic(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(mode) = cli.bulk_mode {
        config.load.bulk_mode = mode;
    }
    let output = ConsoleOutput::new(if cli.json { OutputMode::Json } else { OutputMode::Text });
    tracing::debug!(
        config = ?config.source,
        store = %config.store.path,
        bulk_mode = %config.load.bulk_mode,
        duplicate_policy = %config.load.duplicate_policy,
        "resolved configuration"
    );

    let app = App::new(SqliteStore::new(&config.store), config.load.clone());
    run_command(cli.command, &app, &config, &output)
}

fn run_command(
    command: Commands,
    app: &App<SqliteStore>,
    config: &ResolvedConfig,
    output: &ConsoleOutput,
) -> miette::Result<()> {
    let database = config.store.name.as_str();
    match command {
        Commands::LoadGenes(args) => {
            let files = GeneModelFiles {
                canonical_transcripts: args.canonical_transcripts,
                omim: args.omim,
                genenames: args.genenames,
                gencode: args.gencode,
            };
            banner(output, database, "loading genes", || {
                app.load_genes(&files, output)
            })
        }
        Commands::LoadUsers => banner(
            output,
            database,
            "creating users collection",
            || app.create_users(),
        ),
        Commands::LoadWhitelist(args) => banner(
            output,
            database,
            "creating whitelist collection",
            || app.load_whitelist(&args.whitelist, output),
        ),
        Commands::LoadDbsnp(args) => banner(
            output,
            database,
            "creating dbSNP collection",
            || app.load_dbsnp(&args.dbsnp, args.threads, output),
        ),
        Commands::LoadMetrics(args) => banner(
            output,
            database,
            "creating metrics collection",
            || app.load_metrics(&args.metrics, output),
        ),
        Commands::LoadVariants(args) => banner(
            output,
            database,
            "creating variants collection",
            || app.load_variants(&args.variants, args.threads, output),
        ),
        Commands::CreateSequenceCache => banner(
            output,
            database,
            "creating sequence cache collection",
            || app.create_sequence_cache(),
        ),
        Commands::LoadCustomVariants(args) => {
            let doing = format!("creating {} collection", args.name);
            banner(output, database, &doing, || {
                app.load_custom_variants(&args.variants, &args.name, args.threads, output)
            })
        }
        Commands::LoadPercentiles(args) => banner(
            output,
            database,
            "loading percentiles",
            || app.load_percentiles(&args.variants, args.threads, output),
        ),
        Commands::UpdateVariants(args) => banner(
            output,
            database,
            "updating variants",
            || app.update_variants(&args.variants, args.threads, output),
        ),
    }
}

/// Wraps a command in "Start ..." / "Done ..." lines naming the database,
/// and prints the JSON summary in JSON mode.
fn banner<T, F>(
    output: &ConsoleOutput,
    database: &str,
    action: &str,
    command: F,
) -> miette::Result<()>
where
    T: Serialize,
    F: FnOnce() -> Result<T, IngestError>,
{
    output
        .line(&format!("Start {action} in {database} database."))
        .into_diagnostic()?;
    let result = command()?;
    output
        .line(&format!("Done {action} in {database} database."))
        .into_diagnostic()?;
    if output.mode() == OutputMode::Json {
        output.print_json(&result).into_diagnostic()?;
    }
    Ok(())
}
