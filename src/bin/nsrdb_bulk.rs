use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use nsrdb_bulk::app::{self, App, FetchOptions};
use nsrdb_bulk::config::{ConfigLoader, Credentials};
use nsrdb_bulk::error::BulkError;
use nsrdb_bulk::nsrdb::NsrdbHttpClient;
use nsrdb_bulk::output::{ConsoleProgress, JsonOutput, OutputMode, print_status_summary};
use nsrdb_bulk::pacing::FixedIntervalGate;
use nsrdb_bulk::store::ArtifactStore;

#[derive(Parser)]
#[command(name = "nsrdb-bulk")]
#[command(about = "Bulk-download NSRDB time series over a lat/lon grid; safe to stop and resume")]
#[command(version)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download every missing or invalid artifact")]
    Fetch(FetchArgs),
    #[command(about = "Report which artifacts are present, missing or failed")]
    Status(StatusArgs),
}

#[derive(Args)]
struct FetchArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long, help = "Re-download artifacts that are already valid")]
    force: bool,

    #[arg(long, help = "List what would be downloaded without sending requests")]
    dry_run: bool,
}

#[derive(Args)]
struct StatusArgs {
    #[arg(long)]
    config: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<BulkError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &BulkError) -> u8 {
    match error {
        BulkError::MissingConfig(_)
        | BulkError::ConfigRead(_)
        | BulkError::ConfigParse(_)
        | BulkError::InvalidGrid(_)
        | BulkError::MissingCredentials(_) => 2,
        BulkError::NsrdbHttp(_) => 3,
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
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Fetch(args) => run_fetch(args, output_mode),
        Commands::Status(args) => run_status(args, output_mode),
    }
}

fn run_fetch(args: FetchArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let credentials = Credentials::from_env()?;

    let client = NsrdbHttpClient::new(&config.endpoint, config.timeout, config.retry_client_errors)?;
    let limiter = FixedIntervalGate::new(config.pacing);
    let app = App::new(&config, credentials, client, limiter);
    let options = FetchOptions {
        force: args.force,
        dry_run: args.dry_run,
        summary_only: false,
    };

    match output_mode {
        OutputMode::NonInteractive => {
            let report = app.run(options, &JsonOutput)?;
            JsonOutput::print_report(&report).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let options = FetchOptions {
                summary_only: true,
                ..options
            };
            app.run(options, &ConsoleProgress::new())?;
        }
    }
    Ok(())
}

fn run_status(args: StatusArgs, output_mode: OutputMode) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let store = ArtifactStore::with_marker(config.out_dir.clone(), &config.validity_marker);
    let result = app::status(&config.grid, &store);

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_status(&result).into_diagnostic(),
        OutputMode::Interactive => {
            print_status_summary(&result);
            Ok(())
        }
    }
}
