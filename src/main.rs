use anyhow::{Context, Result};
use benchledger::cli::{
    AnalyzeArgs, Cli, Command, IngestArgs, OutputFormat, PruneArgs, ShowArgs, ValidateArgs,
};
use benchledger::pipeline::{self, IngestRequest, PipelineOptions};
use benchledger::report::Report;
use benchledger::retention::RetentionPolicy;
use benchledger::store::HistoryStore;
use benchledger::validate::{validate, RawRun};
use clap::Parser;
use std::io::Read;
use std::path::Path;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// No regressions
const EXIT_OK: u8 = 0;
/// At least one regression
const EXIT_REGRESSION: u8 = 1;
/// Rejected input, storage or policy failure
const EXIT_ERROR: u8 = 2;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Read a run payload from a file, or stdin for `-`
fn read_run(path: &Path) -> Result<RawRun> {
    let text = if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read run payload from stdin")?;
        text
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read run payload: {}", path.display()))?
    };
    Ok(RawRun::from_json(&text)?)
}

fn open_existing(path: &Path) -> Result<HistoryStore> {
    if !path.exists() {
        anyhow::bail!("Ledger not found: {}", path.display());
    }
    HistoryStore::open_file(path)
        .with_context(|| format!("Failed to open ledger: {}", path.display()))
}

fn print_report(report: &Report, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => print!("{}", report.to_report_string()),
        OutputFormat::Json => println!("{}", report.to_json()?),
        OutputFormat::Markdown => print!("{}", report.to_markdown()),
    }
    Ok(())
}

fn exit_code_for(report: &Report) -> u8 {
    if !report.rejected.is_empty() {
        EXIT_ERROR
    } else if report.has_regressions() {
        EXIT_REGRESSION
    } else {
        EXIT_OK
    }
}

fn run_ingest(args: IngestArgs) -> Result<u8> {
    let policy = args.policy.resolve()?;
    let raw = read_run(&args.run)?;
    let store = HistoryStore::open_file(&args.ledger)
        .with_context(|| format!("Failed to open ledger: {}", args.ledger.display()))?;

    let mut options = PipelineOptions::new(policy);
    if let Some(keep) = args.keep_last {
        options = options.with_retention(RetentionPolicy::KeepLast(keep));
    }
    if args.no_analyze {
        options = options.without_analysis();
    }

    let report = pipeline::ingest(&store, vec![IngestRequest::new(args.suite, raw)], &options)?;
    print_report(&report, args.format)?;
    Ok(exit_code_for(&report))
}

fn run_analyze(args: AnalyzeArgs) -> Result<u8> {
    let policy = args.policy.resolve()?;
    let store = open_existing(&args.ledger)?;
    let report = pipeline::analyze_ledger(&store, &args.suites, &policy)?;
    print_report(&report, args.format)?;
    Ok(exit_code_for(&report))
}

fn run_prune(args: PruneArgs) -> Result<u8> {
    let Some(retention) = args.retention() else {
        anyhow::bail!("One of --keep-last, --newer-than or --keep-last-per-key is required");
    };
    let store = open_existing(&args.ledger)?;
    let outcome = pipeline::prune_ledger(&store, &args.suites, &retention, args.protect_window)?;
    println!(
        "Pruned {} runs, {} measurements",
        outcome.runs_removed, outcome.measurements_removed
    );
    Ok(EXIT_OK)
}

fn run_show(args: ShowArgs) -> Result<u8> {
    let store = open_existing(&args.ledger)?;

    let json = match (&args.tool, &args.name) {
        (Some(tool), Some(name)) => {
            serde_json::to_string_pretty(&store.runs_for(&args.suite, tool, name))?
        }
        (tool, _) => {
            let runs: Vec<_> = store
                .load(&args.suite)
                .into_iter()
                .filter(|run| tool.as_deref().map_or(true, |t| run.tool == t))
                .collect();
            serde_json::to_string_pretty(&runs)?
        }
    };
    println!("{json}");
    Ok(EXIT_OK)
}

fn run_validate(args: ValidateArgs) -> Result<u8> {
    let raw = match read_run(&args.run) {
        Ok(raw) => raw,
        Err(error) => {
            eprintln!("❌ {error:#}");
            return Ok(EXIT_ERROR);
        }
    };

    match validate(&args.suite, &raw) {
        Ok(run) => {
            println!(
                "✅ valid run for '{}': commit {}, tool {}, {} measurements",
                args.suite,
                run.commit.id,
                run.tool,
                run.benches.len()
            );
            Ok(EXIT_OK)
        }
        Err(error) => {
            eprintln!("❌ invalid run for '{}':", args.suite);
            for violation in error.violations() {
                eprintln!("  - {violation}");
            }
            Ok(EXIT_ERROR)
        }
    }
}

fn run(cli: Cli) -> Result<u8> {
    match cli.command {
        Command::Ingest(args) => run_ingest(args),
        Command::Analyze(args) => run_analyze(args),
        Command::Prune(args) => run_prune(args),
        Command::Show(args) => run_show(args),
        Command::Validate(args) => run_validate(args),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing (RUST_LOG always honored, --debug forces TRACE)
    init_tracing(cli.debug);

    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(error) => {
            eprintln!("Error: {error:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}
