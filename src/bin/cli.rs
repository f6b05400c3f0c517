//! Binary entry point for the pagekeep administrative CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use pagekeep::admin::{purge_session, stats, verify, PurgeReport, StatsReport, VerifyReport};
use pagekeep::StoreOptions;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "pagekeep",
    version,
    about = "Administrative CLI for pagekeep session stores",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        help = "Store configuration (TOML); its root is used when ROOT is omitted"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Summarise sessions, records and bytes on disk")]
    Stats {
        #[arg(value_name = "ROOT")]
        root: Option<PathBuf>,
    },

    #[command(about = "Validate every record header and checksum")]
    Verify {
        #[arg(value_name = "ROOT")]
        root: Option<PathBuf>,
    },

    #[command(about = "Delete all records of one session")]
    Purge {
        #[arg(value_name = "SESSION")]
        session: String,

        #[arg(long, value_name = "ROOT")]
        root: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("PAGEKEEP_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Stats { ref root } => {
            let root = resolve_root(root.clone(), cli.config.as_ref())?;
            let report = stats(&root)?;
            emit(&cli.format, &report, |_| print_stats_text(&report))?;
        }
        Command::Verify { ref root } => {
            let root = resolve_root(root.clone(), cli.config.as_ref())?;
            let report = verify(&root)?;
            emit(&cli.format, &report, |_| print_verify_text(&report))?;
            if !report.success {
                std::process::exit(2);
            }
        }
        Command::Purge {
            ref session,
            ref root,
        } => {
            let root = resolve_root(root.clone(), cli.config.as_ref())?;
            let report = purge_session(&root, session)?;
            emit(&cli.format, &report, |_| print_purge_text(&report))?;
        }
    }

    Ok(())
}

fn resolve_root(
    explicit: Option<PathBuf>,
    config: Option<&PathBuf>,
) -> Result<PathBuf, Box<dyn Error>> {
    if let Some(root) = explicit {
        return Ok(root);
    }
    let options = match config {
        Some(path) => StoreOptions::from_toml_file(path)?,
        None => StoreOptions::default(),
    };
    Ok(options.root)
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(OutputFormat),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(OutputFormat::Text),
    }
    Ok(())
}

fn print_stats_text(report: &StatsReport) {
    println!(
        "Root: {} sessions={} records={} bytes={} unrecognized={}",
        report.root,
        report.session_count,
        report.record_count,
        report.size_bytes,
        report.unrecognized_entries
    );
    for session in &report.sessions {
        println!(
            "  {} records={} bytes={}",
            session.session_id, session.record_count, session.size_bytes
        );
        for (namespace, ns) in &session.namespaces {
            let label = if namespace.is_empty() {
                "<default>"
            } else {
                namespace.as_str()
            };
            println!(
                "    {label}: objects={} records={} bytes={} newest_version={}",
                ns.objects, ns.record_count, ns.size_bytes, ns.newest_version
            );
        }
    }
}

fn print_verify_text(report: &VerifyReport) {
    println!(
        "Verify => success={} sessions={} records={} valid={} temp_files={}",
        report.success,
        report.counts.sessions,
        report.counts.records,
        report.counts.valid_records,
        report.counts.temp_files,
    );
    for finding in &report.findings {
        println!("- {:?}: {} ({})", finding.severity, finding.message, finding.path);
    }
    let hidden = report.finding_count.saturating_sub(report.findings.len() as u64);
    if hidden > 0 {
        println!("... {hidden} more");
    }
}

fn print_purge_text(report: &PurgeReport) {
    if report.existed {
        println!(
            "Purged session {} ({} records)",
            report.session_id, report.records_removed
        );
    } else {
        println!("Session {} had no records", report.session_id);
    }
}
